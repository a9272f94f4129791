//! Front end wrappers for observing session behaviour

use std::sync::Arc;

use gopherjs_core::ast::File;
use gopherjs_core::{Archive, FrontEnd, ImportContext, ListingFrontEnd, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Listing front end that counts compilations per import path
///
/// Clones share their counters, so a test can hand one clone to a session
/// and query the other.
#[derive(Debug, Clone, Default)]
pub struct CountingFrontEnd {
    counts: Arc<Mutex<FxHashMap<String, usize>>>,
    order: Arc<Mutex<Vec<String>>>,
}

impl CountingFrontEnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `import_path` was compiled
    pub fn count(&self, import_path: &str) -> usize {
        self.counts.lock().get(import_path).copied().unwrap_or(0)
    }

    /// Total number of compilations
    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    /// Import paths in the order their compilation finished
    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    /// Forgets all recorded compilations
    pub fn reset(&self) {
        self.counts.lock().clear();
        self.order.lock().clear();
    }

    /// Shareable handle for a session
    pub fn shared(&self) -> Arc<dyn FrontEnd> {
        Arc::new(self.clone())
    }
}

impl FrontEnd for CountingFrontEnd {
    fn compile(
        &self,
        import_path: &str,
        files: &[File],
        importer: &mut dyn ImportContext,
        minify: bool,
    ) -> Result<Archive> {
        let archive = ListingFrontEnd.compile(import_path, files, importer, minify)?;
        *self.counts.lock().entry(import_path.to_string()).or_insert(0) += 1;
        self.order.lock().push(import_path.to_string());
        Ok(archive)
    }
}
