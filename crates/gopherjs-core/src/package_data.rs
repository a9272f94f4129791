use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::error;

use crate::context::Env;

/// Which build of a package this value describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageVariant {
    #[default]
    Plain,
    /// Production files plus `_test.go` files of the same package.
    InternalTest,
    /// The `<path>_test` package made of external test files.
    ExternalTest,
}

/// A `.inc.js` file bundled with a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsFile {
    /// Full path of the file in the tree it came from.
    pub path: PathBuf,
    pub mod_time: SystemTime,
    pub content: String,
}

impl JsFile {
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mod_time = fs::metadata(path)?.modified()?;
        Ok(Self {
            path: path.to_path_buf(),
            mod_time,
            content,
        })
    }
}

/// A discovered Go package with the metadata the build needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageData {
    pub import_path: String,
    pub name: String,
    pub dir: PathBuf,

    /// Source file names, relative to `dir` unless given absolutely.
    pub go_files: Vec<String>,
    pub test_go_files: Vec<String>,
    pub xtest_go_files: Vec<String>,

    /// Sorted, deduplicated import paths.
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
    pub xtest_imports: Vec<String>,

    pub js_files: Vec<JsFile>,
    pub variant: PackageVariant,

    /// Newest modification time of the package and everything it imports.
    /// Filled in by the build session.
    pub src_mod_time: SystemTime,
    pub up_to_date: bool,

    /// No directory on disk backs this package (e.g. built from a file list).
    pub is_virtual: bool,

    /// Found under GOROOT.
    pub goroot: bool,
}

impl PackageData {
    pub fn new(import_path: impl Into<String>, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            import_path: import_path.into(),
            name: name.into(),
            dir: dir.into(),
            go_files: Vec::new(),
            test_go_files: Vec::new(),
            xtest_go_files: Vec::new(),
            imports: Vec::new(),
            test_imports: Vec::new(),
            xtest_imports: Vec::new(),
            js_files: Vec::new(),
            variant: PackageVariant::Plain,
            src_mod_time: SystemTime::UNIX_EPOCH,
            up_to_date: false,
            is_virtual: false,
            goroot: false,
        }
    }

    pub fn is_test(&self) -> bool {
        self.variant != PackageVariant::Plain
    }

    pub fn is_command(&self) -> bool {
        self.name == "main"
    }

    pub fn go_file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Newest modification time among this package's own `.go` and `.inc.js`
    /// files, dependencies excluded. A source file that cannot be stat'ed
    /// makes the package count as modified now.
    pub fn file_mod_time(&self) -> SystemTime {
        let mut newest = self
            .js_files
            .iter()
            .map(|f| f.mod_time)
            .max()
            .unwrap_or(SystemTime::UNIX_EPOCH);

        for name in &self.go_files {
            let path = self.go_file_path(name);
            match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => newest = newest.max(t),
                Err(err) => {
                    error!(
                        file = %path.display(),
                        package = %self.name,
                        error = %err,
                        "no mtime found for source file, assuming now"
                    );
                    return SystemTime::now();
                }
            }
        }
        newest
    }

    /// The variant with internal tests compiled in.
    pub fn test_package(&self) -> Self {
        let mut go_files = self.go_files.clone();
        go_files.extend(self.test_go_files.iter().cloned());
        let mut imports = self.imports.clone();
        imports.extend(self.test_imports.iter().cloned());
        imports.sort();
        imports.dedup();

        Self {
            go_files,
            test_go_files: Vec::new(),
            xtest_go_files: Vec::new(),
            imports,
            test_imports: Vec::new(),
            xtest_imports: Vec::new(),
            variant: PackageVariant::InternalTest,
            src_mod_time: SystemTime::UNIX_EPOCH,
            up_to_date: false,
            ..self.clone()
        }
    }

    /// The `<path>_test` package built from external test files.
    pub fn xtest_package(&self) -> Self {
        Self {
            import_path: format!("{}_test", self.import_path),
            name: format!("{}_test", self.name),
            go_files: self.xtest_go_files.clone(),
            test_go_files: Vec::new(),
            xtest_go_files: Vec::new(),
            imports: self.xtest_imports.clone(),
            test_imports: Vec::new(),
            xtest_imports: Vec::new(),
            js_files: Vec::new(),
            variant: PackageVariant::ExternalTest,
            src_mod_time: SystemTime::UNIX_EPOCH,
            up_to_date: false,
            ..self.clone()
        }
    }

    /// Where `install` places a command's output: `$GOBIN/<base>.js`, else
    /// `$GOPATH/bin/<base>.js`, else `~/go/bin/<base>.js`. Libraries have no
    /// install path.
    pub fn install_path(&self, env: &Env) -> Option<PathBuf> {
        if !self.is_command() {
            return None;
        }
        let base = self
            .import_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.import_path);
        let name = format!("{base}.js");
        if let Some(gobin) = &env.gobin {
            return Some(gobin.join(name));
        }
        if let Some(gopath) = env.gopath.first() {
            return Some(gopath.join("bin").join(name));
        }
        dirs_next::home_dir().map(|home| home.join("go").join("bin").join(name))
    }
}

impl fmt::Display for PackageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [is_test={}]", self.import_path, self.is_test())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample() -> PackageData {
        let mut pkg = PackageData::new("example.com/foo", "foo", "/src/foo");
        pkg.go_files = vec!["a.go".into()];
        pkg.test_go_files = vec!["a_test.go".into()];
        pkg.xtest_go_files = vec!["x_test.go".into()];
        pkg.imports = vec!["fmt".into()];
        pkg.test_imports = vec!["testing".into(), "fmt".into()];
        pkg.xtest_imports = vec!["example.com/foo".into(), "testing".into()];
        pkg.js_files = vec![JsFile {
            path: "/src/foo/a.inc.js".into(),
            mod_time: SystemTime::UNIX_EPOCH,
            content: String::new(),
        }];
        pkg
    }

    #[test]
    fn test_test_package_variants_are_new_values() {
        let pkg = sample();
        let internal = pkg.test_package();
        assert_eq!(internal.import_path, "example.com/foo");
        assert_eq!(internal.go_files, vec!["a.go", "a_test.go"]);
        assert_eq!(internal.imports, vec!["fmt", "testing"]);
        assert_eq!(internal.js_files.len(), 1);
        assert_eq!(internal.variant, PackageVariant::InternalTest);

        let external = pkg.xtest_package();
        assert_eq!(external.import_path, "example.com/foo_test");
        assert_eq!(external.name, "foo_test");
        assert_eq!(external.go_files, vec!["x_test.go"]);
        assert!(external.js_files.is_empty());
        assert_eq!(external.variant, PackageVariant::ExternalTest);

        assert_eq!(pkg.variant, PackageVariant::Plain);
        assert_eq!(pkg.to_string(), "example.com/foo [is_test=false]");
        assert_eq!(external.to_string(), "example.com/foo_test [is_test=true]");
    }

    #[test]
    fn test_file_mod_time_uses_newest_file() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.go");
        let b = dir.path().join("b.go");
        fs::write(&a, "package foo\n").unwrap();
        fs::write(&b, "package foo\n").unwrap();
        let newer = SystemTime::now() + Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&b)
            .unwrap()
            .set_modified(newer)
            .unwrap();

        let mut pkg = PackageData::new("foo", "foo", dir.path());
        pkg.go_files = vec!["a.go".into(), "b.go".into()];
        assert!(pkg.file_mod_time() > SystemTime::now() + Duration::from_secs(1800));
    }

    #[test]
    fn test_missing_file_counts_as_modified_now() {
        let dir = TempDir::new().unwrap();
        let mut pkg = PackageData::new("foo", "foo", dir.path());
        pkg.go_files = vec!["missing.go".into()];
        let before = SystemTime::now();
        assert!(pkg.file_mod_time() >= before);
    }

    #[test]
    fn test_install_path() {
        let mut env = Env::for_roots("/goroot", vec![PathBuf::from("/gopath")]);
        let mut pkg = sample();
        assert_eq!(pkg.install_path(&env), None);

        pkg.name = "main".into();
        assert_eq!(
            pkg.install_path(&env),
            Some(PathBuf::from("/gopath/bin/foo.js"))
        );
        env.gobin = Some(PathBuf::from("/gobin"));
        assert_eq!(pkg.install_path(&env), Some(PathBuf::from("/gobin/foo.js")));
    }
}
