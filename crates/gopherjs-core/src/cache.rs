//! On-disk archive cache.
//!
//! Entries are keyed by import path and a fingerprint of every setting that
//! changes compiler output. An entry is served only when it was built after
//! the newest source it depends on was modified; anything else, including an
//! unreadable or undecodable entry, is a miss.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::compiler::{Archive, TypeRegistry};

/// Cache format version. Bumping it invalidates every entry.
pub const CACHE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cache encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// A stored archive with the time its build started.
#[derive(Debug, Serialize, Deserialize)]
struct CachedArchive {
    build_time: SystemTime,
    archive: Archive,
}

impl CachedArchive {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CacheError::from)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(CacheError::from)
    }
}

/// Build configuration that partitions the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildCache {
    pub goos: String,
    pub goarch: String,
    pub goroot: PathBuf,
    pub gopath: Vec<PathBuf>,
    pub build_tags: Vec<String>,
    pub minify: bool,
    /// Package under test. It is never stored or served.
    pub tested_package: String,
    #[serde(skip)]
    pub root: PathBuf,
}

impl BuildCache {
    /// Hash of the configuration and [`CACHE_VERSION`].
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        // Serializing plain strings, paths and bools cannot fail.
        let config = bincode::serialize(self).unwrap_or_default();
        hasher.update(&config);
        hasher.update(&CACHE_VERSION.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Location of the entry for `import_path`.
    pub fn entry_path(&self, import_path: &str) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.fingerprint().as_bytes());
        hasher.update(b"\0archive\0");
        hasher.update(import_path.as_bytes());
        let hash = hasher.finalize().to_hex().to_string();
        self.root.join(&hash[..2]).join(format!("{hash}.bin"))
    }

    /// Stores `archive` stamped with `build_time`. The entry is written to a
    /// temporary file and renamed into place.
    pub fn store_archive(&self, archive: &Archive, build_time: SystemTime) -> Result<()> {
        if archive.import_path == self.tested_package {
            return Ok(());
        }
        let path = self.entry_path(&archive.import_path);
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;

        let bytes = CachedArchive {
            build_time,
            archive: archive.clone(),
        }
        .to_bytes()?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;
        debug!(package = %archive.import_path, path = %path.display(), "stored archive");
        Ok(())
    }

    /// Returns the cached archive for `import_path` if it was built after
    /// `src_mod_time`, registering its types in `types`.
    pub fn load_archive(
        &self,
        import_path: &str,
        src_mod_time: SystemTime,
        types: &mut TypeRegistry,
    ) -> Option<Arc<Archive>> {
        if import_path == self.tested_package {
            return None;
        }
        let path = self.entry_path(import_path);
        let cached = match fs::read(&path)
            .map_err(CacheError::from)
            .and_then(|bytes| CachedArchive::from_bytes(&bytes))
        {
            Ok(cached) => cached,
            Err(err) => {
                debug!(package = %import_path, error = %err, "archive cache miss");
                return None;
            }
        };
        if cached.build_time <= src_mod_time {
            debug!(package = %import_path, "cached archive is stale");
            return None;
        }
        if cached.archive.import_path != import_path {
            debug!(package = %import_path, "cached archive belongs to another package");
            return None;
        }
        debug!(package = %import_path, "archive cache hit");
        types.register(&cached.archive);
        Some(Arc::new(cached.archive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn cache(root: &Path) -> BuildCache {
        BuildCache {
            goos: "js".into(),
            goarch: "ecmascript".into(),
            goroot: "/goroot".into(),
            gopath: vec!["/gopath".into()],
            build_tags: Vec::new(),
            minify: false,
            tested_package: String::new(),
            root: root.to_path_buf(),
        }
    }

    fn archive(path: &str) -> Archive {
        let mut a = Archive::new(path, "pkg");
        a.code = "\t$pkg.x = 1;\n".into();
        a.exports = vec!["X".into()];
        a
    }

    #[test]
    fn test_store_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = cache(dir.path());
        let built = SystemTime::now();
        cache.store_archive(&archive("example.com/pkg"), built).unwrap();

        let mut types = TypeRegistry::new();
        let src_mod_time = built - Duration::from_secs(10);
        let loaded = cache
            .load_archive("example.com/pkg", src_mod_time, &mut types)
            .unwrap();
        assert_eq!(*loaded, archive("example.com/pkg"));
        assert_eq!(types.get("example.com/pkg").unwrap().exports, vec!["X"]);
    }

    #[test]
    fn test_entry_must_be_strictly_newer_than_sources() {
        let dir = TempDir::new().unwrap();
        let cache = cache(dir.path());
        let built = SystemTime::now();
        cache.store_archive(&archive("p"), built).unwrap();

        let mut types = TypeRegistry::new();
        assert!(cache.load_archive("p", built, &mut types).is_none());
        assert!(cache
            .load_archive("p", built + Duration::from_secs(1), &mut types)
            .is_none());
        assert!(types.is_empty());
    }

    #[test]
    fn test_configuration_partitions_entries() {
        let dir = TempDir::new().unwrap();
        let plain = cache(dir.path());
        let minified = BuildCache {
            minify: true,
            ..plain.clone()
        };
        let tagged = BuildCache {
            build_tags: vec!["debug".into()],
            ..plain.clone()
        };
        assert_ne!(plain.fingerprint(), minified.fingerprint());
        assert_ne!(plain.fingerprint(), tagged.fingerprint());
        assert_ne!(plain.entry_path("p"), plain.entry_path("q"));

        plain
            .store_archive(&archive("p"), SystemTime::now())
            .unwrap();
        let mut types = TypeRegistry::new();
        assert!(minified
            .load_archive("p", SystemTime::UNIX_EPOCH, &mut types)
            .is_none());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(dir.path());
        let path = cache.entry_path("p");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not an archive").unwrap();

        let mut types = TypeRegistry::new();
        assert!(cache
            .load_archive("p", SystemTime::UNIX_EPOCH, &mut types)
            .is_none());
    }

    #[test]
    fn test_tested_package_is_never_cached() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache {
            tested_package: "p".into(),
            ..cache(dir.path())
        };
        cache.store_archive(&archive("p"), SystemTime::now()).unwrap();
        assert!(!cache.entry_path("p").exists());
    }
}
