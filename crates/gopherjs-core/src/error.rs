use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ast::{ErrorList, Position};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Parse(ErrorList),

    /// An import path that no source root provides.
    #[error("cannot find package \"{path}\" in any of:\n{searched}")]
    PackageNotFound { path: String, searched: String },

    #[error("no buildable Go source files in {0}")]
    NoGoFiles(PathBuf),

    #[error("found packages {first} and {second} in {dir}")]
    MultiplePackages {
        first: String,
        second: String,
        dir: PathBuf,
    },

    #[error("no Go files given")]
    NoSources,

    #[error("named files must all be in one directory; have {first} and {second}")]
    MixedDirectories { first: PathBuf, second: PathBuf },

    #[error("cannot build/run non-main package")]
    NotMain,

    #[error("import cycle not allowed: {0}")]
    ImportCycle(String),

    #[error("GOROOT {0} is not a Go installation (missing src directory)")]
    InvalidGoRoot(PathBuf),

    #[error("GopherJS requires a Go {required}.x distribution, but found version {found}")]
    UnsupportedGoVersion { found: String, required: String },

    #[error("invalid build constraint {expr:?}: {msg}")]
    BuildConstraint { expr: String, msg: String },

    /// A `//go:embed` directive that cannot be satisfied.
    #[error("{pos}: {msg}")]
    Embed { pos: Position, msg: String },

    #[error("compile error in {import_path}: {msg}")]
    Compile { import_path: String, msg: String },

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BuildError {
    pub fn compile(import_path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Compile {
            import_path: import_path.into(),
            msg: msg.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

impl From<ErrorList> for BuildError {
    fn from(errors: ErrorList) -> Self {
        Self::Parse(errors)
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
