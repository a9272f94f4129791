use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};
use crate::session::Options;

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "gopherjs.yaml";

/// Project defaults read from `gopherjs.yaml`. Command-line flags take
/// precedence over every value set here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub minify: bool,
    pub tags: Vec<String>,
    pub source_map: bool,
    pub map_to_local_disk: bool,
    pub color: Option<bool>,
    pub no_cache: bool,
    pub verbose: bool,
    pub quiet: bool,
    /// Default output file for `build`.
    pub output: Option<PathBuf>,
}

impl BuildConfig {
    pub fn from_yaml(src: &str) -> Result<Self> {
        serde_yaml::from_str(src).map_err(|e| BuildError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = fs::read_to_string(path).map_err(|e| BuildError::file(path, e))?;
        Self::from_yaml(&src).map_err(|e| match e {
            BuildError::Config(msg) => BuildError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Loads `dir/gopherjs.yaml` if it exists.
    pub fn discover(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Session options with these values as defaults.
    pub fn options(&self) -> Options {
        let mut options = Options::new()
            .minify(self.minify)
            .build_tags(self.tags.clone())
            .create_map_file(self.source_map)
            .map_to_local_disk(self.map_to_local_disk)
            .no_cache(self.no_cache)
            .verbose(self.verbose)
            .quiet(self.quiet);
        if let Some(color) = self.color {
            options = options.color(color);
        }
        options
    }
}
