//! Incremental build session.
//!
//! A [`Session`] builds packages on demand, recursively building imports
//! first. Each package is compiled at most once per session; across
//! sessions the on-disk [`BuildCache`] serves archives whose sources have
//! not changed since they were built.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::{debug, error, info, warn};

use crate::ast::{parse_file, ErrorList, Mode};
use crate::augment::parse_and_augment;
use crate::cache::BuildCache;
use crate::compiler::{
    import_dependencies, write_program_code, Archive, FrontEnd, ImportContext, TypeRegistry,
};
use crate::context::{check_go_version, go_release, BuildContext, Env};
use crate::embed::embed_files;
use crate::error::{BuildError, Result};
use crate::package_data::{JsFile, PackageData};
use crate::sourcemap::{FileNameMapper, SourceMapBuilder, SourceMapFilter};
use crate::watch::{relevant_path, Watcher};

/// Modification time of the running toolchain binary. A rebuilt toolchain
/// invalidates every cached archive.
static EXE_MOD_TIME: Lazy<SystemTime> = Lazy::new(|| {
    match std::env::current_exe().and_then(|exe| fs::metadata(exe)?.modified()) {
        Ok(t) => t,
        Err(err) => {
            warn!(error = %err, "could not get toolchain binary mod time, assuming now");
            SystemTime::now()
        }
    }
});

/// Session options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub verbose: bool,
    pub quiet: bool,
    pub watch: bool,
    pub create_map_file: bool,
    pub map_to_local_disk: bool,
    pub minify: bool,
    pub color: bool,
    pub build_tags: Vec<String>,
    pub tested_package: String,
    pub no_cache: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn create_map_file(mut self, create: bool) -> Self {
        self.create_map_file = create;
        self
    }

    pub fn map_to_local_disk(mut self, local: bool) -> Self {
        self.map_to_local_disk = local;
        self
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn build_tags(mut self, tags: Vec<String>) -> Self {
        self.build_tags = tags;
        self
    }

    pub fn tested_package(mut self, path: impl Into<String>) -> Self {
        self.tested_package = path.into();
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Writes `msg` to stderr, in red when colour is enabled.
    pub fn print_error(&self, msg: &str) {
        eprint!("{}", self.error_message(msg));
    }

    /// Writes `msg` to stderr, in green when colour is enabled.
    pub fn print_success(&self, msg: &str) {
        eprint!("{}", self.success_message(msg));
    }

    pub fn error_message(&self, msg: &str) -> String {
        self.paint(31, msg)
    }

    pub fn success_message(&self, msg: &str) -> String {
        self.paint(32, msg)
    }

    fn paint(&self, code: u8, msg: &str) -> String {
        if self.color {
            format!("\x1B[{code}m{msg}\x1B[39m")
        } else {
            msg.to_string()
        }
    }
}

/// Build state shared by every package built in one invocation.
pub struct Session {
    options: Options,
    ctx: BuildContext,
    cache: BuildCache,
    front_end: Arc<dyn FrontEnd>,

    /// Archives compiled or loaded during this session.
    up_to_date: FxHashMap<String, Arc<Archive>>,
    /// Computed source mod time of every package in `up_to_date`.
    mod_times: FxHashMap<String, SystemTime>,
    /// Packages whose build is in progress, outermost first.
    building: IndexSet<String, FxBuildHasher>,
    types: TypeRegistry,
    watcher: Option<Watcher>,
}

impl Session {
    pub fn new(mut options: Options, env: Env, front_end: Arc<dyn FrontEnd>) -> Result<Self> {
        if options.watch {
            options.verbose = true;
        }
        let install_suffix = if options.minify { "min" } else { "" };
        check_go_version(&env.goroot)?;

        let cache = BuildCache {
            goos: env.goos.clone(),
            goarch: env.goarch.clone(),
            goroot: env.goroot.clone(),
            gopath: env.gopath.clone(),
            build_tags: options.build_tags.clone(),
            minify: options.minify,
            tested_package: options.tested_package.clone(),
            root: env
                .cache_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("gopherjs-cache")),
        };
        let ctx = BuildContext::new(env, install_suffix, options.build_tags.clone());
        let watcher = if options.watch {
            Some(Watcher::new()?)
        } else {
            None
        };

        Ok(Self {
            options,
            ctx,
            cache,
            front_end,
            up_to_date: FxHashMap::default(),
            mod_times: FxHashMap::default(),
            building: IndexSet::default(),
            types: TypeRegistry::new(),
            watcher,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn install_suffix(&self) -> &str {
        self.ctx.install_suffix()
    }

    pub fn go_release(&self) -> String {
        go_release(&self.ctx.env().goroot)
    }

    /// Archive already built in this session.
    pub fn archive(&self, import_path: &str) -> Option<Arc<Archive>> {
        self.up_to_date.get(import_path).cloned()
    }

    /// Builds the `main` package made of `filenames` and writes the program
    /// to `pkg_obj`. Relative names resolve against `cwd`.
    pub fn build_files(&mut self, filenames: &[PathBuf], pkg_obj: &Path, cwd: &Path) -> Result<()> {
        let Some(first) = filenames.first() else {
            return Err(BuildError::NoSources);
        };
        let dir_of = |f: &PathBuf| -> PathBuf {
            let full = if f.is_absolute() { f.clone() } else { cwd.join(f) };
            full.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf())
        };
        let dir = dir_of(first);
        if let Some(other) = filenames.iter().map(dir_of).find(|d| *d != dir) {
            return Err(BuildError::MixedDirectories {
                first: dir,
                second: other,
            });
        }

        let mut pkg = PackageData::new("main", "main", &dir);
        pkg.is_virtual = true;
        let mut imports = BTreeSet::new();
        for file in filenames {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let path = dir.join(&name);
            if name.ends_with(".inc.js") {
                pkg.js_files
                    .push(JsFile::read(&path).map_err(|e| BuildError::file(&path, e))?);
                continue;
            }
            let src = fs::read_to_string(&path).map_err(|e| BuildError::file(&path, e))?;
            let parsed = parse_file(&path, &src, Mode::ImportsOnly).map_err(ErrorList::capped)?;
            imports.extend(parsed.import_paths());
            pkg.go_files.push(name);
        }
        pkg.imports = imports.into_iter().collect();
        pkg.src_mod_time = SystemTime::now() + Duration::from_secs(3600);

        let archive = self.build_package(&mut pkg)?;
        if self.types.get("main").map(|t| t.name.as_str()) != Some("main") {
            return Err(BuildError::NotMain);
        }
        self.write_command_package(&archive, pkg_obj)
    }

    /// Builds the package with import path `path`.
    pub fn build_import_path(&mut self, path: &str) -> Result<(PackageData, Arc<Archive>)> {
        self.build_import_path_with_src_dir(path, Path::new(""))
    }

    /// Builds `path`, resolving relative import paths against `src_dir`.
    /// The package's directory is watched in watch mode, also when its build
    /// then fails.
    pub fn build_import_path_with_src_dir(
        &mut self,
        path: &str,
        src_dir: &Path,
    ) -> Result<(PackageData, Arc<Archive>)> {
        let imported = self.ctx.import(path, src_dir);
        if let Some(watcher) = self.watcher.as_mut() {
            let dir = match &imported {
                Ok(pkg) => Some(pkg.dir.as_path()),
                Err(BuildError::NoGoFiles(dir)) => Some(dir.as_path()),
                Err(BuildError::MultiplePackages { dir, .. }) => Some(dir.as_path()),
                Err(_) => None,
            };
            if let Some(dir) = dir {
                if let Err(err) = watcher.add(dir) {
                    warn!(dir = %dir.display(), error = %err, "cannot watch package directory");
                }
            }
        }
        let mut pkg = imported?;
        let archive = self.build_package(&mut pkg)?;
        Ok((pkg, archive))
    }

    /// Compiles `pkg` unless an up-to-date archive exists in memory or in
    /// the on-disk cache. Imports are built first and their mod times
    /// folded into `pkg.src_mod_time`.
    pub fn build_package(&mut self, pkg: &mut PackageData) -> Result<Arc<Archive>> {
        if let Some(archive) = self.up_to_date.get(&pkg.import_path) {
            if let Some(t) = self.mod_times.get(&pkg.import_path) {
                pkg.src_mod_time = pkg.src_mod_time.max(*t);
            }
            pkg.up_to_date = true;
            return Ok(Arc::clone(archive));
        }
        if let Some(at) = self.building.get_index_of(&pkg.import_path) {
            let mut chain: Vec<&str> = self.building.iter().skip(at).map(String::as_str).collect();
            chain.push(&pkg.import_path);
            return Err(BuildError::ImportCycle(chain.join(" -> ")));
        }
        self.building.insert(pkg.import_path.clone());
        let result = self.build_package_uncached(pkg);
        self.building.pop();
        result
    }

    fn build_package_uncached(&mut self, pkg: &mut PackageData) -> Result<Arc<Archive>> {
        pkg.src_mod_time = pkg.src_mod_time.max(*EXE_MOD_TIME);
        for import in pkg.imports.clone() {
            if import == "unsafe" {
                continue;
            }
            let (imported, _) = self.build_import_path_with_src_dir(&import, &pkg.dir)?;
            pkg.src_mod_time = pkg.src_mod_time.max(imported.src_mod_time);
        }
        pkg.src_mod_time = pkg.src_mod_time.max(pkg.file_mod_time());

        if !self.options.no_cache && !pkg.is_virtual {
            if let Some(archive) =
                self.cache
                    .load_archive(&pkg.import_path, pkg.src_mod_time, &mut self.types)
            {
                pkg.up_to_date = true;
                self.record(pkg, Arc::clone(&archive));
                return Ok(archive);
            }
        }

        let (mut files, overlay_js) = parse_and_augment(&self.ctx, pkg, pkg.is_test())?;
        if let Some(embedded) = embed_files(pkg, &mut files)? {
            files.push(embedded);
        }
        let minify = self.options.minify;
        let front_end = Arc::clone(&self.front_end);
        let mut archive = {
            let mut importer = SessionImporter {
                session: self,
                dir: pkg.dir.clone(),
            };
            front_end.compile(&pkg.import_path, &files, &mut importer, minify)?
        };

        for js in pkg.js_files.iter().chain(overlay_js.iter()) {
            archive.inc_js_code.push_str("\t(function() {\n");
            archive.inc_js_code.push_str(&js.content);
            archive.inc_js_code.push_str("\n\t}).call($global);\n");
        }

        if self.options.verbose {
            info!(package = %pkg.import_path, "compiled");
        }

        if !pkg.is_virtual {
            if let Err(err) = self.cache.store_archive(&archive, SystemTime::now()) {
                warn!(package = %pkg.import_path, error = %err, "failed to store archive in cache");
            }
        }

        self.types.register(&archive);
        let archive = Arc::new(archive);
        self.record(pkg, Arc::clone(&archive));
        Ok(archive)
    }

    fn record(&mut self, pkg: &PackageData, archive: Arc<Archive>) {
        self.mod_times
            .insert(pkg.import_path.clone(), pkg.src_mod_time);
        self.up_to_date.insert(pkg.import_path.clone(), archive);
    }

    /// Links `archive` with everything it depends on and writes the program
    /// to `pkg_obj`, plus `<pkg_obj>.map` when source maps are enabled.
    pub fn write_command_package(&mut self, archive: &Arc<Archive>, pkg_obj: &Path) -> Result<()> {
        let deps = import_dependencies(Arc::clone(archive), |path| {
            if let Some(archive) = self.up_to_date.get(path) {
                return Ok(Arc::clone(archive));
            }
            self.build_import_path(path).map(|(_, archive)| archive)
        })?;
        let release = self.go_release();

        if let Some(parent) = pkg_obj.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| BuildError::file(parent, e))?;
            }
        }
        let file = fs::File::create(pkg_obj).map_err(|e| BuildError::file(pkg_obj, e))?;
        let mut out = BufWriter::new(file);

        if self.options.create_map_file {
            let base = pkg_obj
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let env = self.ctx.env();
            let mapper = FileNameMapper::new(&env.goroot, &env.gopath, self.options.map_to_local_disk);
            let mut builder = SourceMapBuilder::new(base.clone());
            {
                let mut filter = SourceMapFilter::with_callback(&mut out, |mapping| {
                    builder.add(mapper.map_mapping(mapping));
                });
                write_program_code(&deps, &mut filter, &release)?;
            }

            let mut map_path = pkg_obj.as_os_str().to_owned();
            map_path.push(".map");
            let map_path = PathBuf::from(map_path);
            let map_json = serde_json::to_vec(&builder.build())
                .map_err(|e| BuildError::compile(&archive.import_path, e.to_string()))?;
            fs::write(&map_path, map_json).map_err(|e| BuildError::file(&map_path, e))?;
            writeln!(out, "//# sourceMappingURL={base}.map")?;
        } else {
            let mut filter = SourceMapFilter::new(&mut out);
            write_program_code(&deps, &mut filter, &release)?;
        }

        out.flush()?;
        debug!(output = %pkg_obj.display(), packages = deps.len(), "wrote program");
        Ok(())
    }

    /// Forgets everything built so far and blocks until a watched source
    /// file changes. The watcher is closed afterwards; a new session is
    /// needed for the next round.
    pub fn wait_for_change(&mut self) {
        self.up_to_date.clear();
        self.mod_times.clear();
        self.types.clear();

        self.options.print_success("watching for changes...\n");
        let Some(watcher) = self.watcher.take() else {
            return;
        };
        loop {
            match watcher.events().recv() {
                Ok(Ok(event)) => {
                    if let Some(path) = relevant_path(&event) {
                        self.options
                            .print_success(&format!("change detected: {}\n", path.display()));
                        break;
                    }
                }
                Ok(Err(err)) => {
                    error!(error = %err, "watcher error");
                    self.options.print_error(&format!("watcher error: {err}\n"));
                    break;
                }
                Err(_) => break,
            }
        }
        watcher.drain();
    }
}

/// Import context handed to the front end while one package compiles.
/// Relative imports resolve against the importing package's directory.
struct SessionImporter<'a> {
    session: &'a mut Session,
    dir: PathBuf,
}

impl ImportContext for SessionImporter<'_> {
    fn packages(&self) -> &TypeRegistry {
        &self.session.types
    }

    fn import(&mut self, path: &str) -> Result<Arc<Archive>> {
        if let Some(archive) = self.session.up_to_date.get(path) {
            return Ok(Arc::clone(archive));
        }
        self.session
            .build_import_path_with_src_dir(path, &self.dir)
            .map(|(_, archive)| archive)
    }
}
