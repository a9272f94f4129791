//! Temporary Go source trees for build tests
//!
//! A [`GoTree`] lays out a GOROOT, one GOPATH workspace, an overlay
//! ("natives") tree and a cache directory under one temporary directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use gopherjs_core::Env;
use tempfile::TempDir;

/// Release written to `GOROOT/VERSION`
pub const TEST_GO_RELEASE: &str = "go1.21.4";

/// Temporary GOROOT/GOPATH/natives layout
///
/// The GOROOT starts out with a `runtime` package, which every linked
/// program depends on.
pub struct GoTree {
    dir: TempDir,
}

impl GoTree {
    /// Creates the tree with `GOROOT/VERSION` and `GOROOT/src/runtime`
    ///
    /// # Panics
    /// Panics if the temporary directory cannot be created or written
    pub fn new() -> Self {
        let tree = Self {
            dir: TempDir::new().expect("create temp dir"),
        };
        tree.write("goroot/VERSION", &format!("{TEST_GO_RELEASE}\ntime 2023-11-01\n"));
        tree.goroot_package("runtime", &[("runtime.go", "package runtime\n\nfunc GOROOT() string { return \"/\" }\n")]);
        fs::create_dir_all(tree.gopath().join("src")).expect("create gopath");
        fs::create_dir_all(tree.natives().join("src")).expect("create natives");
        tree
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn goroot(&self) -> PathBuf {
        self.root().join("goroot")
    }

    pub fn gopath(&self) -> PathBuf {
        self.root().join("gopath")
    }

    pub fn natives(&self) -> PathBuf {
        self.root().join("natives")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root().join("cache")
    }

    /// Environment pointing at this tree's roots and cache
    pub fn env(&self) -> Env {
        let mut env = Env::for_roots(self.goroot(), vec![self.gopath()]);
        env.natives = Some(self.natives());
        env.cache_dir = Some(self.cache_dir());
        env
    }

    /// Writes `content` to `rel` under the tree root, creating directories
    ///
    /// # Arguments
    /// * `rel` - Path relative to the tree root
    /// * `content` - File contents
    ///
    /// # Returns
    /// The absolute path of the written file
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    /// Adds a standard library package
    ///
    /// # Returns
    /// The package directory
    pub fn goroot_package(&self, import_path: &str, files: &[(&str, &str)]) -> PathBuf {
        self.package("goroot", import_path, files)
    }

    /// Adds a package to the GOPATH workspace
    ///
    /// # Returns
    /// The package directory
    pub fn gopath_package(&self, import_path: &str, files: &[(&str, &str)]) -> PathBuf {
        self.package("gopath", import_path, files)
    }

    /// Adds overlay files for `import_path`
    ///
    /// # Returns
    /// The overlay package directory
    pub fn native_package(&self, import_path: &str, files: &[(&str, &str)]) -> PathBuf {
        self.package("natives", import_path, files)
    }

    fn package(&self, root: &str, import_path: &str, files: &[(&str, &str)]) -> PathBuf {
        for (name, content) in files {
            self.write(&format!("{root}/src/{import_path}/{name}"), content);
        }
        self.root().join(root).join("src").join(import_path)
    }

    /// Sets the modification time of `path`
    ///
    /// # Panics
    /// Panics if the file cannot be opened or its time set
    pub fn touch(&self, path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .expect("open file")
            .set_modified(time)
            .expect("set mtime");
    }
}

impl Default for GoTree {
    fn default() -> Self {
        Self::new()
    }
}
