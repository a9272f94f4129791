//! Host-side package loader.
//!
//! The same registration protocol the JavaScript prelude implements, for
//! hosts that drive package units from Rust. A unit registers a
//! constructor under its import path; the constructor may await other
//! packages through the [`Loader`], which fetches unregistered units from
//! `<base>/<import path>.js` through a [`Fetcher`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to fetch {location}: {msg}")]
    Fetch { location: String, msg: String },

    #[error("package {0} was fetched but did not register")]
    NotRegistered(String),

    #[error("package {path} failed to construct: {msg}")]
    Construct { path: String, msg: String },
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Package lifecycle callback.
pub type Hook = Box<dyn Fn(&Output) + Send + Sync>;

/// Buffered program output, flushed to the sink at the end of start-up.
pub struct Output {
    pending: Mutex<String>,
    sink: Box<dyn Fn(&str) + Send + Sync>,
}

impl Output {
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            pending: Mutex::new(String::new()),
            sink: Box::new(sink),
        }
    }

    pub fn stdout() -> Self {
        Self::new(|s| println!("{s}"))
    }

    pub fn print(&self, s: &str) {
        self.pending.lock().push_str(s);
    }

    pub fn flush(&self) {
        let text = std::mem::take(&mut *self.pending.lock());
        if !text.is_empty() {
            (self.sink)(&text);
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("pending", &*self.pending.lock())
            .finish_non_exhaustive()
    }
}

/// A constructed package.
pub struct Package {
    path: String,
    imports: Vec<Arc<Package>>,
    init: Option<Hook>,
    main: Option<Hook>,
    finish_setup: Option<Hook>,
    link: Option<Hook>,
    initialized: AtomicBool,
}

impl Package {
    pub fn builder(path: impl Into<String>) -> PackageBuilder {
        PackageBuilder {
            path: path.into(),
            imports: Vec::new(),
            init: None,
            main: None,
            finish_setup: None,
            link: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn imports(&self) -> &[Arc<Package>] {
        &self.imports
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Runs package initialization once, dependencies first.
    pub fn initialize(&self, out: &Output) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        for dep in &self.imports {
            dep.initialize(out);
        }
        if let Some(init) = &self.init {
            init(out);
        }
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("path", &self.path)
            .field("imports", &self.imports.iter().map(|p| &p.path).collect::<Vec<_>>())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

pub struct PackageBuilder {
    path: String,
    imports: Vec<Arc<Package>>,
    init: Option<Hook>,
    main: Option<Hook>,
    finish_setup: Option<Hook>,
    link: Option<Hook>,
}

impl PackageBuilder {
    pub fn import(mut self, dep: Arc<Package>) -> Self {
        self.imports.push(dep);
        self
    }

    pub fn init(mut self, hook: impl Fn(&Output) + Send + Sync + 'static) -> Self {
        self.init = Some(Box::new(hook));
        self
    }

    pub fn main(mut self, hook: impl Fn(&Output) + Send + Sync + 'static) -> Self {
        self.main = Some(Box::new(hook));
        self
    }

    /// Completes method tables that depend on types of other packages.
    pub fn finish_setup(mut self, hook: impl Fn(&Output) + Send + Sync + 'static) -> Self {
        self.finish_setup = Some(Box::new(hook));
        self
    }

    /// Resolves `go:linkname` aliases once every package is loaded.
    pub fn link(mut self, hook: impl Fn(&Output) + Send + Sync + 'static) -> Self {
        self.link = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Package {
        Package {
            path: self.path,
            imports: self.imports,
            init: self.init,
            main: self.main,
            finish_setup: self.finish_setup,
            link: self.link,
            initialized: AtomicBool::new(false),
        }
    }
}

/// Retrieves and evaluates the unit at a location. Evaluating a unit
/// registers its package with the loader.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, loader: Loader, location: String) -> BoxFuture<'static, Result<()>>;
}

type Constructor = BoxFuture<'static, Result<Package>>;
type PackageFuture = Shared<BoxFuture<'static, Result<Arc<Package>>>>;

struct Slot {
    sender: Option<oneshot::Sender<Result<Constructor>>>,
    fetching: bool,
    package: PackageFuture,
}

struct Inner {
    base: String,
    fetcher: Arc<dyn Fetcher>,
    slots: Mutex<FxHashMap<String, Slot>>,
    loaded: Mutex<Vec<Arc<Package>>>,
    output: Output,
}

/// Process-wide package registry. Cloning yields another handle to the
/// same registry.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<Inner>,
}

impl Loader {
    pub fn new(base: impl Into<String>, fetcher: Arc<dyn Fetcher>, output: Output) -> Self {
        Self {
            inner: Arc::new(Inner {
                base: base.into(),
                fetcher,
                slots: Mutex::new(FxHashMap::default()),
                loaded: Mutex::new(Vec::new()),
                output,
            }),
        }
    }

    pub fn output(&self) -> &Output {
        &self.inner.output
    }

    /// Where the unit for `path` is fetched from.
    pub fn location(&self, path: &str) -> String {
        format!("{}/{}.js", self.inner.base.trim_end_matches('/'), path)
    }

    /// Paths of packages constructed so far, in completion order.
    pub fn loaded(&self) -> Vec<String> {
        self.inner
            .loaded
            .lock()
            .iter()
            .map(|p| p.path.clone())
            .collect()
    }

    fn with_slot<R>(&self, path: &str, f: impl FnOnce(&mut Slot) -> R) -> R {
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(path.to_string()).or_insert_with(|| {
            let (tx, rx) = oneshot::channel::<Result<Constructor>>();
            let missing = path.to_string();
            let package = async move {
                match rx.await {
                    Ok(Ok(construct)) => construct.await.map(Arc::new),
                    Ok(Err(err)) => Err(err),
                    Err(oneshot::Canceled) => Err(LoadError::NotRegistered(missing)),
                }
            }
            .boxed()
            .shared();
            Slot {
                sender: Some(tx),
                fetching: false,
                package,
            }
        });
        f(slot)
    }

    /// Registers the package at `path`. The constructor runs when the
    /// package is first awaited. Later registrations of the same path are
    /// ignored.
    pub fn register<F, Fut>(&self, path: &str, construct: F)
    where
        F: FnOnce(Loader) -> Fut,
        Fut: std::future::Future<Output = Result<Package>> + Send + 'static,
    {
        let Some(sender) = self.with_slot(path, |slot| slot.sender.take()) else {
            debug!(package = %path, "duplicate registration ignored");
            return;
        };
        // The receiver lives in the slot for as long as the loader does.
        let _ = sender.send(Ok(construct(self.clone()).boxed()));
    }

    fn fail(&self, path: &str, err: LoadError) {
        if let Some(sender) = self.with_slot(path, |slot| slot.sender.take()) {
            let _ = sender.send(Err(err));
        }
    }

    /// Resolves the package at `path`, fetching its unit first when it is
    /// not registered.
    pub async fn load(&self, path: &str) -> Result<Arc<Package>> {
        let (package, fetch) = self.with_slot(path, |slot| {
            let fetch = slot.sender.is_some() && !slot.fetching;
            if fetch {
                slot.fetching = true;
            }
            (slot.package.clone(), fetch)
        });

        if fetch {
            let location = self.location(path);
            debug!(package = %path, location = %location, "fetching package");
            match self.inner.fetcher.fetch(self.clone(), location).await {
                Ok(()) => self.fail(path, LoadError::NotRegistered(path.to_string())),
                Err(err) => self.fail(path, err),
            }
        }

        let pkg = package.await?;
        self.note_loaded(&pkg);
        Ok(pkg)
    }

    fn note_loaded(&self, pkg: &Arc<Package>) {
        let mut loaded = self.inner.loaded.lock();
        if !loaded.iter().any(|p| Arc::ptr_eq(p, pkg)) {
            loaded.push(Arc::clone(pkg));
        }
    }

    /// Runs the program whose entry package is `entry`: resolve it, finish
    /// method setup of every loaded package, run link hooks, initialize
    /// `runtime` and then the entry package, run its `main` and flush
    /// output. The first failure aborts start-up.
    pub async fn start(&self, entry: &str) -> Result<()> {
        let main = self.load(entry).await?;
        let runtime = self.load("runtime").await?;

        let loaded: Vec<Arc<Package>> = self.inner.loaded.lock().clone();
        let out = self.output();
        for pkg in &loaded {
            if let Some(hook) = &pkg.finish_setup {
                hook(out);
            }
        }
        for pkg in &loaded {
            if let Some(hook) = &pkg.link {
                hook(out);
            }
        }
        runtime.initialize(out);
        main.initialize(out);
        if let Some(hook) = &main.main {
            hook(out);
        }
        out.flush();
        Ok(())
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("base", &self.inner.base)
            .field("loaded", &self.loaded())
            .finish_non_exhaustive()
    }
}
