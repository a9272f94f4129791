//! Front-end contract, compiled package archives and program linking.
//!
//! The expression and statement code generator sits behind [`FrontEnd`]; the
//! build session drives it with augmented files and an [`ImportContext`]
//! that builds dependencies on demand.

pub mod linker;
pub mod listing;

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::ast::File;
use crate::error::{BuildError, Result};

pub use linker::write_program_code;
pub use listing::ListingFrontEnd;

/// A `//go:linkname local target` pair recorded at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkName {
    pub local: String,
    pub target: String,
}

/// Compiled output for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Unique package key.
    pub import_path: String,

    /// Package clause name.
    pub name: String,

    /// Import paths this package depends on, in dependency order.
    pub imports: Vec<String>,

    /// Exported top-level names, the type metadata importers see.
    pub exports: Vec<String>,

    /// Package body, emitted inside the package's registration unit.
    pub code: String,

    /// Wrapped `.inc.js` files, emitted before `code`.
    pub inc_js_code: String,

    pub linknames: Vec<LinkName>,

    pub minified: bool,
}

impl Archive {
    pub fn new(import_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            import_path: import_path.into(),
            name: name.into(),
            imports: Vec::new(),
            exports: Vec::new(),
            code: String::new(),
            inc_js_code: String::new(),
            linknames: Vec::new(),
            minified: false,
        }
    }
}

/// What importers know about a compiled package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTypes {
    pub path: String,
    pub name: String,
    pub exports: Vec<String>,
}

impl From<&Archive> for PackageTypes {
    fn from(archive: &Archive) -> Self {
        Self {
            path: archive.import_path.clone(),
            name: archive.name.clone(),
            exports: archive.exports.clone(),
        }
    }
}

/// Type information of every package compiled or loaded in a session.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    packages: FxHashMap<String, PackageTypes>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&PackageTypes> {
        self.packages.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.packages.contains_key(path)
    }

    pub fn register(&mut self, archive: &Archive) {
        self.packages
            .insert(archive.import_path.clone(), PackageTypes::from(archive));
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn clear(&mut self) {
        self.packages.clear();
    }
}

/// Gives a front end access to the packages it imports.
pub trait ImportContext {
    /// Types of packages compiled so far.
    fn packages(&self) -> &TypeRegistry;

    /// The archive for `path`, building it if needed.
    fn import(&mut self, path: &str) -> Result<Arc<Archive>>;
}

/// Translates augmented Go files of one package into an [`Archive`].
pub trait FrontEnd {
    fn compile(
        &self,
        import_path: &str,
        files: &[File],
        importer: &mut dyn ImportContext,
        minify: bool,
    ) -> Result<Archive>;
}

/// Orders every archive `root` depends on: `runtime` first, then the root's
/// imports depth-first in post-order, each path once, and `root` last.
pub fn import_dependencies<F>(root: Arc<Archive>, mut resolve: F) -> Result<Vec<Arc<Archive>>>
where
    F: FnMut(&str) -> Result<Arc<Archive>>,
{
    struct Walk<'a> {
        resolve: &'a mut dyn FnMut(&str) -> Result<Arc<Archive>>,
        done: FxHashSet<String>,
        visiting: Vec<String>,
        deps: Vec<Arc<Archive>>,
    }

    impl Walk<'_> {
        fn collect(&mut self, path: &str) -> Result<()> {
            if self.done.contains(path) {
                return Ok(());
            }
            if self.visiting.iter().any(|p| p == path) {
                let mut cycle = self.visiting.clone();
                cycle.push(path.to_string());
                return Err(BuildError::ImportCycle(cycle.join(" -> ")));
            }
            let dep = (self.resolve)(path)?;
            self.visiting.push(path.to_string());
            for import in &dep.imports {
                self.collect(import)?;
            }
            self.visiting.pop();
            self.done.insert(dep.import_path.clone());
            self.deps.push(dep);
            Ok(())
        }
    }

    let mut walk = Walk {
        resolve: &mut resolve,
        done: FxHashSet::default(),
        visiting: Vec::new(),
        deps: Vec::new(),
    };
    walk.collect("runtime")?;
    for import in &root.imports {
        walk.collect(import)?;
    }
    let mut deps = walk.deps;
    deps.push(root);
    Ok(deps)
}
