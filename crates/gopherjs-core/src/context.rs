//! Package discovery over GOROOT/GOPATH-style source trees.
//!
//! A package with import path `p` lives in `<root>/src/p` for the first root
//! that has such a directory. The overlay ("natives") tree follows the same
//! layout and is searched through [`BuildContext::natives`].

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::ast::{parse_file, ErrorList, Mode};
use crate::error::{BuildError, Result};
use crate::package_data::{JsFile, PackageData};

/// Minor version of the Go distribution the overlays target.
pub const GO_VERSION: u32 = 21;

pub const DEFAULT_GOOS: &str = "js";
pub const DEFAULT_GOARCH: &str = "ecmascript";

const KNOWN_OS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "js", "linux",
    "nacl", "netbsd", "openbsd", "plan9", "solaris", "wasip1", "windows", "zos",
];

const KNOWN_ARCH: &[&str] = &[
    "386", "amd64", "amd64p32", "arm", "armbe", "arm64", "arm64be", "ecmascript", "loong64",
    "mips", "mipsle", "mips64", "mips64le", "mips64p32", "mips64p32le", "ppc", "ppc64", "ppc64le",
    "riscv", "riscv64", "s390", "s390x", "sparc", "sparc64", "wasm",
];

/// Toolchain environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Env {
    pub goroot: PathBuf,
    pub gopath: Vec<PathBuf>,
    pub goos: String,
    pub goarch: String,
    pub gobin: Option<PathBuf>,
    /// Root of the overlay tree; packages live under `<natives>/src`.
    pub natives: Option<PathBuf>,
    /// Directory of the on-disk build cache.
    pub cache_dir: Option<PathBuf>,
}

impl Env {
    /// Reads `GOROOT`, `GOPATH`, `GOOS`, `GOARCH`, `GOBIN`,
    /// `GOPHERJS_NATIVES` and `GOPHERJS_CACHE`.
    pub fn from_env() -> Self {
        let home = dirs_next::home_dir();
        let goroot = env::var_os("GOROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/usr/local/go"));
        let gopath: Vec<PathBuf> = match env::var_os("GOPATH") {
            Some(v) if !v.is_empty() => env::split_paths(&v).collect(),
            _ => home.iter().map(|h| h.join("go")).collect(),
        };
        let natives = env::var_os("GOPHERJS_NATIVES")
            .map(PathBuf::from)
            .or_else(|| {
                gopath
                    .first()
                    .map(|p| p.join("src/github.com/gopherjs/gopherjs/compiler/natives"))
            });
        let cache_dir = env::var_os("GOPHERJS_CACHE")
            .map(PathBuf::from)
            .or_else(|| dirs_next::cache_dir().map(|d| d.join("gopherjs")));

        Self {
            goroot,
            gopath,
            goos: env::var("GOOS").unwrap_or_else(|_| DEFAULT_GOOS.to_string()),
            goarch: env::var("GOARCH").unwrap_or_else(|_| DEFAULT_GOARCH.to_string()),
            gobin: env::var_os("GOBIN")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            natives,
            cache_dir,
        }
    }

    /// An environment over explicit roots with default target settings.
    pub fn for_roots(goroot: impl Into<PathBuf>, gopath: Vec<PathBuf>) -> Self {
        Self {
            goroot: goroot.into(),
            gopath,
            goos: DEFAULT_GOOS.to_string(),
            goarch: DEFAULT_GOARCH.to_string(),
            gobin: None,
            natives: None,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    pub dir: PathBuf,
    pub goroot: bool,
}

/// Resolves import paths to [`PackageData`].
#[derive(Debug, Clone)]
pub struct BuildContext {
    env: Env,
    roots: Vec<SourceRoot>,
    build_tags: Vec<String>,
    install_suffix: String,
    release_tags: Vec<String>,
}

impl BuildContext {
    pub fn new(env: Env, install_suffix: impl Into<String>, build_tags: Vec<String>) -> Self {
        let mut roots = vec![SourceRoot {
            dir: env.goroot.clone(),
            goroot: true,
        }];
        roots.extend(env.gopath.iter().map(|dir| SourceRoot {
            dir: dir.clone(),
            goroot: false,
        }));
        let release_tags = (1..=GO_VERSION).map(|minor| format!("go1.{minor}")).collect();
        Self {
            env,
            roots,
            build_tags,
            install_suffix: install_suffix.into(),
            release_tags,
        }
    }

    /// A context over the overlay tree only. Without a configured overlay
    /// tree no package is found.
    pub fn natives(&self) -> Self {
        Self {
            roots: self
                .env
                .natives
                .iter()
                .map(|dir| SourceRoot {
                    dir: dir.clone(),
                    goroot: true,
                })
                .collect(),
            ..self.clone()
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn roots(&self) -> &[SourceRoot] {
        &self.roots
    }

    pub fn build_tags(&self) -> &[String] {
        &self.build_tags
    }

    pub fn install_suffix(&self) -> &str {
        &self.install_suffix
    }

    /// Finds and scans the package named by `path`. Relative paths (`.`,
    /// `./x`, `../x`) resolve against `src_dir`, or the working directory
    /// when `src_dir` is empty.
    pub fn import(&self, path: &str, src_dir: &Path) -> Result<PackageData> {
        if is_local_import(path) {
            let base = if src_dir.as_os_str().is_empty() {
                env::current_dir()?
            } else {
                src_dir.to_path_buf()
            };
            let dir = clean_path(&base.join(path));
            let (import_path, goroot) = match self.import_path_for_dir(&dir) {
                Some((p, goroot)) => (p, goroot),
                None => (dir.display().to_string(), false),
            };
            return self.import_from_dir(&import_path, &dir, goroot);
        }

        for root in &self.roots {
            let dir = root.dir.join("src").join(path);
            if dir.is_dir() {
                return self.import_from_dir(path, &dir, root.goroot);
            }
        }

        let searched = self
            .roots
            .iter()
            .map(|r| format!("\t{}", r.dir.join("src").join(path).display()))
            .collect::<Vec<_>>()
            .join("\n");
        Err(BuildError::PackageNotFound {
            path: path.to_string(),
            searched,
        })
    }

    /// Scans the package in `dir`.
    pub fn import_dir(&self, dir: &Path) -> Result<PackageData> {
        self.import(".", dir)
    }

    fn import_path_for_dir(&self, dir: &Path) -> Option<(String, bool)> {
        self.roots.iter().find_map(|root| {
            let rel = dir.strip_prefix(root.dir.join("src")).ok()?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if parts.is_empty() {
                return None;
            }
            Some((parts.join("/"), root.goroot))
        })
    }

    fn import_from_dir(&self, import_path: &str, dir: &Path, goroot: bool) -> Result<PackageData> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map_err(|e| BuildError::file(dir, e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let mut pkg = PackageData::new(import_path, "", dir);
        pkg.goroot = goroot;
        let mut imports = BTreeSet::new();
        let mut test_imports = BTreeSet::new();
        let mut xtest_imports = BTreeSet::new();
        let mut first_file = String::new();

        for name in names {
            if name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            let path = dir.join(&name);
            if name.ends_with(".inc.js") {
                pkg.js_files
                    .push(JsFile::read(&path).map_err(|e| BuildError::file(&path, e))?);
                continue;
            }
            if !name.ends_with(".go") || !self.good_os_arch_file(&name) {
                continue;
            }

            let src = fs::read_to_string(&path).map_err(|e| BuildError::file(&path, e))?;
            let file = parse_file(&path, &src, Mode::ImportsOnly).map_err(ErrorList::capped)?;
            if let Some(expr) = file.build_constraint() {
                if !self.eval_constraint(expr)? {
                    debug!(file = %path.display(), constraint = expr, "excluded by build constraint");
                    continue;
                }
            }

            let pkg_name = file.package.name.clone();
            let is_test_file = name.ends_with("_test.go");
            if is_test_file && pkg_name.ends_with("_test") {
                pkg.xtest_go_files.push(name);
                xtest_imports.extend(file.import_paths());
                continue;
            }
            if pkg.name.is_empty() {
                pkg.name = pkg_name;
                first_file = name.clone();
            } else if pkg.name != pkg_name {
                return Err(BuildError::MultiplePackages {
                    first: format!("{} ({first_file})", pkg.name),
                    second: format!("{pkg_name} ({name})"),
                    dir: dir.to_path_buf(),
                });
            }
            if is_test_file {
                pkg.test_go_files.push(name);
                test_imports.extend(file.import_paths());
            } else {
                pkg.go_files.push(name);
                imports.extend(file.import_paths());
            }
        }

        if pkg.go_files.is_empty() && pkg.test_go_files.is_empty() && pkg.xtest_go_files.is_empty()
        {
            return Err(BuildError::NoGoFiles(dir.to_path_buf()));
        }
        if pkg.name.is_empty() {
            if let Some(base) = import_path.rsplit('/').next() {
                pkg.name = base.to_string();
            }
        }
        pkg.imports = imports.into_iter().collect();
        pkg.test_imports = test_imports.into_iter().collect();
        pkg.xtest_imports = xtest_imports.into_iter().collect();
        Ok(pkg)
    }

    /// Whether a file name's `_GOOS`, `_GOARCH` or `_GOOS_GOARCH` suffix, if
    /// any, matches the target.
    pub fn good_os_arch_file(&self, name: &str) -> bool {
        let stem = name.strip_suffix(".go").unwrap_or(name);
        let stem = stem.strip_suffix("_test").unwrap_or(stem);
        let Some(i) = stem.find('_') else {
            return true;
        };
        let parts: Vec<&str> = stem[i..].split('_').collect();
        let n = parts.len();
        if n >= 2 && KNOWN_OS.contains(&parts[n - 2]) && KNOWN_ARCH.contains(&parts[n - 1]) {
            return parts[n - 2] == self.env.goos && parts[n - 1] == self.env.goarch;
        }
        let last = parts[n - 1];
        if KNOWN_OS.contains(&last) {
            return last == self.env.goos;
        }
        if KNOWN_ARCH.contains(&last) {
            return last == self.env.goarch;
        }
        true
    }

    fn tag_satisfied(&self, tag: &str) -> bool {
        tag == self.env.goos
            || tag == self.env.goarch
            || tag == "gopherjs"
            || self.build_tags.iter().any(|t| t == tag)
            || self.release_tags.iter().any(|t| t == tag)
    }

    /// Evaluates a `//go:build` expression.
    pub fn eval_constraint(&self, expr: &str) -> Result<bool> {
        let tokens = constraint_tokens(expr).ok_or_else(|| BuildError::BuildConstraint {
            expr: expr.to_string(),
            msg: "unexpected character".to_string(),
        })?;
        let mut eval = ConstraintEval {
            ctx: self,
            tokens: &tokens,
            idx: 0,
        };
        let value = eval.or().map_err(|msg| BuildError::BuildConstraint {
            expr: expr.to_string(),
            msg,
        })?;
        if eval.idx != tokens.len() {
            return Err(BuildError::BuildConstraint {
                expr: expr.to_string(),
                msg: format!("unexpected {:?}", tokens[eval.idx]),
            });
        }
        Ok(value)
    }
}

fn constraint_tokens(expr: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        match ch {
            ' ' | '\t' => {}
            '(' | ')' | '!' => tokens.push(ch.to_string()),
            '&' | '|' => {
                if chars.next_if(|&(_, c)| c == ch).is_none() {
                    return None;
                }
                tokens.push(format!("{ch}{ch}"));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(expr[i..end].to_string());
            }
            _ => return None,
        }
    }
    Some(tokens)
}

struct ConstraintEval<'a> {
    ctx: &'a BuildContext,
    tokens: &'a [String],
    idx: usize,
}

impl<'a> ConstraintEval<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.idx).map(String::as_str)
    }

    fn or(&mut self) -> std::result::Result<bool, String> {
        let mut value = self.and()?;
        while self.peek() == Some("||") {
            self.idx += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> std::result::Result<bool, String> {
        let mut value = self.not()?;
        while self.peek() == Some("&&") {
            self.idx += 1;
            let rhs = self.not()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not(&mut self) -> std::result::Result<bool, String> {
        match self.peek() {
            Some("!") => {
                self.idx += 1;
                Ok(!self.not()?)
            }
            Some("(") => {
                self.idx += 1;
                let value = self.or()?;
                if self.peek() != Some(")") {
                    return Err("missing )".to_string());
                }
                self.idx += 1;
                Ok(value)
            }
            Some(tag) if !matches!(tag, ")" | "&&" | "||") => {
                let value = self.ctx.tag_satisfied(tag);
                self.idx += 1;
                Ok(value)
            }
            Some(tok) => Err(format!("unexpected {tok}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn is_local_import(path: &str) -> bool {
    path == "." || path == ".." || path.starts_with("./") || path.starts_with("../")
}

/// Lexically resolves `.` and `..` components.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The release string of the Go distribution at `goroot`, from its
/// `VERSION` file, or the targeted release when the file is absent.
pub fn go_release(goroot: &Path) -> String {
    fs::read_to_string(goroot.join("VERSION"))
        .ok()
        .and_then(|v| v.lines().next().map(|l| l.trim().to_string()))
        .filter(|v| v.starts_with("go"))
        .unwrap_or_else(|| format!("go1.{GO_VERSION}"))
}

/// Verifies that `goroot` is a Go distribution of the targeted release.
pub fn check_go_version(goroot: &Path) -> Result<()> {
    if !goroot.join("src").is_dir() {
        return Err(BuildError::InvalidGoRoot(goroot.to_path_buf()));
    }
    let release = go_release(goroot);
    let required = format!("go1.{GO_VERSION}");
    let matches = release
        .strip_prefix(&required)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'));
    if !matches {
        return Err(BuildError::UnsupportedGoVersion {
            found: release,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn context(goroot: &Path, gopath: &Path) -> BuildContext {
        BuildContext::new(
            Env::for_roots(goroot, vec![gopath.to_path_buf()]),
            "",
            vec!["custom".to_string()],
        )
    }

    #[test]
    fn test_import_splits_files() {
        let goroot = TempDir::new().unwrap();
        let gopath = TempDir::new().unwrap();
        let dir = "src/example.com/lib";
        write(gopath.path(), &format!("{dir}/lib.go"), "package lib\n\nimport \"fmt\"\n");
        write(gopath.path(), &format!("{dir}/lib_test.go"), "package lib\n\nimport \"testing\"\n");
        write(
            gopath.path(),
            &format!("{dir}/ext_test.go"),
            "package lib_test\n\nimport (\n\t\"example.com/lib\"\n\t\"testing\"\n)\n",
        );
        write(gopath.path(), &format!("{dir}/helper.inc.js"), "var x = 1;\n");
        write(gopath.path(), &format!("{dir}/_ignored.go"), "package other\n");
        write(gopath.path(), &format!("{dir}/README.md"), "docs\n");

        let ctx = context(goroot.path(), gopath.path());
        let pkg = ctx.import("example.com/lib", Path::new("")).unwrap();
        assert_eq!(pkg.name, "lib");
        assert!(!pkg.goroot);
        assert_eq!(pkg.go_files, vec!["lib.go"]);
        assert_eq!(pkg.test_go_files, vec!["lib_test.go"]);
        assert_eq!(pkg.xtest_go_files, vec!["ext_test.go"]);
        assert_eq!(pkg.imports, vec!["fmt"]);
        assert_eq!(pkg.test_imports, vec!["testing"]);
        assert_eq!(pkg.xtest_imports, vec!["example.com/lib", "testing"]);
        assert_eq!(pkg.js_files.len(), 1);
        assert_eq!(pkg.js_files[0].content, "var x = 1;\n");
    }

    #[test]
    fn test_goroot_wins_over_gopath() {
        let goroot = TempDir::new().unwrap();
        let gopath = TempDir::new().unwrap();
        write(goroot.path(), "src/fmt/print.go", "package fmt\n");
        write(gopath.path(), "src/fmt/fake.go", "package fake\n");
        let pkg = context(goroot.path(), gopath.path())
            .import("fmt", Path::new(""))
            .unwrap();
        assert!(pkg.goroot);
        assert_eq!(pkg.name, "fmt");
    }

    #[test]
    fn test_build_constraints_and_file_suffixes() {
        let goroot = TempDir::new().unwrap();
        let gopath = TempDir::new().unwrap();
        let dir = "src/example.com/c";
        write(gopath.path(), &format!("{dir}/a.go"), "package c\n");
        write(gopath.path(), &format!("{dir}/b_js.go"), "package c\n");
        write(gopath.path(), &format!("{dir}/c_linux.go"), "package c\n");
        write(gopath.path(), &format!("{dir}/d_js_wasm.go"), "package c\n");
        write(gopath.path(), &format!("{dir}/e.go"), "//go:build !js\n\npackage c\n");
        write(gopath.path(), &format!("{dir}/f.go"), "//go:build custom && (gopherjs || wasm)\n\npackage c\n");
        write(gopath.path(), &format!("{dir}/g.go"), "//go:build go1.99\n\npackage c\n");
        write(gopath.path(), &format!("{dir}/h.go"), "//go:build go1.18\n\npackage c\n");

        let pkg = context(goroot.path(), gopath.path())
            .import("example.com/c", Path::new(""))
            .unwrap();
        assert_eq!(pkg.go_files, vec!["a.go", "b_js.go", "f.go", "h.go"]);
    }

    #[test]
    fn test_mixed_packages_rejected() {
        let goroot = TempDir::new().unwrap();
        let gopath = TempDir::new().unwrap();
        write(gopath.path(), "src/m/a.go", "package a\n");
        write(gopath.path(), "src/m/b.go", "package b\n");
        let err = context(goroot.path(), gopath.path())
            .import("m", Path::new(""))
            .unwrap_err();
        assert!(matches!(err, BuildError::MultiplePackages { .. }));
    }

    #[test]
    fn test_missing_and_empty_packages() {
        let goroot = TempDir::new().unwrap();
        let gopath = TempDir::new().unwrap();
        write(gopath.path(), "src/empty/notes.txt", "nothing\n");
        let ctx = context(goroot.path(), gopath.path());
        assert!(matches!(
            ctx.import("nowhere", Path::new("")),
            Err(BuildError::PackageNotFound { .. })
        ));
        assert!(matches!(
            ctx.import("empty", Path::new("")),
            Err(BuildError::NoGoFiles(_))
        ));
    }

    #[test]
    fn test_relative_import_maps_to_import_path() {
        let goroot = TempDir::new().unwrap();
        let gopath = TempDir::new().unwrap();
        write(gopath.path(), "src/app/main.go", "package main\n");
        write(gopath.path(), "src/app/util/util.go", "package util\n");
        let ctx = context(goroot.path(), gopath.path());
        let app_dir = gopath.path().join("src/app");
        let util = ctx.import("./util", &app_dir).unwrap();
        assert_eq!(util.import_path, "app/util");
        let app = ctx.import_dir(&app_dir).unwrap();
        assert_eq!(app.import_path, "app");
        assert!(app.is_command());
    }

    #[test]
    fn test_natives_context() {
        let goroot = TempDir::new().unwrap();
        let natives = TempDir::new().unwrap();
        write(natives.path(), "src/sync/sync.go", "package sync\n");
        let mut env = Env::for_roots(goroot.path(), vec![]);
        let ctx = BuildContext::new(env.clone(), "", vec![]);
        assert!(ctx.natives().import("sync", Path::new("")).is_err());

        env.natives = Some(natives.path().to_path_buf());
        let ctx = BuildContext::new(env, "", vec![]);
        let pkg = ctx.natives().import("sync", Path::new("")).unwrap();
        assert_eq!(pkg.go_files, vec!["sync.go"]);
    }

    #[test]
    fn test_constraint_syntax_errors() {
        let ctx = BuildContext::new(Env::for_roots("/goroot", vec![]), "", vec![]);
        assert!(ctx.eval_constraint("js &&").is_err());
        assert!(ctx.eval_constraint("(js").is_err());
        assert!(ctx.eval_constraint("js & wasm").is_err());
        assert!(ctx.eval_constraint("!linux && ecmascript").unwrap());
    }

    #[test]
    fn test_go_version_checks() {
        let goroot = TempDir::new().unwrap();
        assert!(matches!(
            check_go_version(goroot.path()),
            Err(BuildError::InvalidGoRoot(_))
        ));
        fs::create_dir(goroot.path().join("src")).unwrap();
        assert_eq!(go_release(goroot.path()), format!("go1.{GO_VERSION}"));
        check_go_version(goroot.path()).unwrap();

        fs::write(goroot.path().join("VERSION"), "go1.19.3\ntime 2022\n").unwrap();
        assert_eq!(go_release(goroot.path()), "go1.19.3");
        assert!(matches!(
            check_go_version(goroot.path()),
            Err(BuildError::UnsupportedGoVersion { .. })
        ));

        fs::write(goroot.path().join("VERSION"), format!("go1.{GO_VERSION}.4\n")).unwrap();
        check_go_version(goroot.path()).unwrap();
    }
}
