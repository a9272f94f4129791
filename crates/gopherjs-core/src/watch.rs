use std::path::Path;

use crossbeam_channel::{unbounded, Receiver};
use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tracing::debug;

use crate::error::Result;

/// Watches package directories and queues their events.
pub struct Watcher {
    inner: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
}

impl Watcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded();
        let inner = notify::recommended_watcher(move |res| {
            // The receiver is gone once the session stops waiting.
            let _ = tx.send(res);
        })?;
        Ok(Self { inner, events: rx })
    }

    pub fn add(&mut self, dir: &Path) -> Result<()> {
        debug!(dir = %dir.display(), "watching directory");
        self.inner.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    pub fn events(&self) -> &Receiver<notify::Result<Event>> {
        &self.events
    }

    /// Discards everything queued so far.
    pub fn drain(&self) -> usize {
        self.events.try_iter().count()
    }
}

/// The first path of `event` that should trigger a rebuild: a created,
/// written, removed or renamed `.go` or `.inc.js` file whose name does not
/// start with `.`.
pub fn relevant_path(event: &Event) -> Option<&Path> {
    let relevant_kind = match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => false,
    };
    if !relevant_kind {
        return None;
    }
    event
        .paths
        .iter()
        .map(|p| p.as_path())
        .find(|p| is_source_file(p))
}

fn is_source_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && (name.ends_with(".go") || name.ends_with(".inc.js"))
}
