//! Merges per-target overlay ("natives") files into original package sources.
//!
//! Overlay declarations replace original declarations of the same identity.
//! Three directives in an overlay declaration's doc comment refine this:
//!
//! - `//gopherjs:keep-original` keeps the original function, renamed to
//!   `_gopherjs_original_<name>`, so the overlay can call it;
//! - `//gopherjs:purge` removes the declaration from both sides, and for a
//!   type also every original method with that receiver;
//! - `//gopherjs:override-signature` splices the overlay's receiver, type
//!   parameters, parameters and results into the original function and drops
//!   the overlay declaration.
//!
//! Removal tombstones slots and [`finalize_removals`] compacts them, after
//! which [`prune_imports`] drops imports the remaining code no longer uses.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::util::{self, ORIGINAL_PREFIX};
use crate::ast::{
    parse_file, CommentGroup, Decl, ErrorList, Expr, File, GenToken, Ident, ImportSpec, Mode,
    Signature, Spec, ValueSpec,
};
use crate::context::BuildContext;
use crate::error::{BuildError, Result};
use crate::package_data::{JsFile, PackageData};

/// Packages whose `sync` import is redirected to [`NOSYNC_PATH`].
pub const NOSYNC_PACKAGES: &[&str] = &[
    "crypto/rand",
    "encoding/gob",
    "encoding/json",
    "expvar",
    "go/token",
    "log",
    "math/big",
    "math/rand",
    "regexp",
    "time",
];

pub const NOSYNC_PATH: &str = "github.com/gopherjs/gopherjs/nosync";

/// File name prefix given to overlay files placed in the package directory.
pub const OVERLAY_FILE_PREFIX: &str = "gopherjs__";

/// Directives for one overridden declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideInfo {
    /// Rename the original instead of removing it.
    pub keep_original: bool,
    /// The declaration is a purged type; its original methods go too.
    pub purge_methods: bool,
    /// Signature parts to splice into the original function.
    pub override_signature: Option<SignatureOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOverride {
    pub recv: Option<Expr>,
    pub signature: Signature,
}

/// Override map keyed by declaration identity (see [`util::func_key`]).
pub type Overrides = FxHashMap<String, OverrideInfo>;

/// Augments `originals` of package `import_path` with `overlays`. Returns the
/// overlay files followed by the original files.
pub fn augment(import_path: &str, mut originals: Vec<File>, mut overlays: Vec<File>) -> Vec<File> {
    let mut overrides = Overrides::default();
    for file in &mut overlays {
        augment_overlay_file(file, &mut overrides);
    }
    overrides.remove("init");

    for file in &mut originals {
        augment_original_imports(import_path, file);
    }

    if !overrides.is_empty() {
        for file in &mut originals {
            augment_original_file(file, &overrides);
        }
    }

    overlays.extend(originals);
    overlays
}

/// Records the directives of every top-level declaration in an overlay file
/// and removes purged and signature-only declarations from it.
pub fn augment_overlay_file(file: &mut File, overrides: &mut Overrides) {
    let mut any_change = false;
    for slot in file.decls.slots_mut() {
        let Some(decl) = slot else { continue };
        let mut purge_decl = util::purge(decl.doc());
        match decl {
            Decl::Func(f) => {
                let mut info = OverrideInfo {
                    keep_original: util::keep_original(f),
                    ..OverrideInfo::default()
                };
                if util::override_signature(f) {
                    info.override_signature = Some(SignatureOverride {
                        recv: f.recv.clone(),
                        signature: f.signature.clone(),
                    });
                    purge_decl = true;
                }
                overrides.insert(util::func_key(f), info);
            }
            Decl::Gen(g) => {
                for spec_slot in g.specs.slots_mut() {
                    let Some(spec) = spec_slot else { continue };
                    let purge_spec = purge_decl || util::purge(spec.doc());
                    match spec {
                        Spec::Type(t) => {
                            overrides.insert(
                                t.name.name.clone(),
                                OverrideInfo {
                                    purge_methods: purge_spec,
                                    ..OverrideInfo::default()
                                },
                            );
                        }
                        Spec::Value(v) => {
                            for name in v.names.iter() {
                                overrides.insert(name.name.clone(), OverrideInfo::default());
                            }
                        }
                        Spec::Import(_) => {}
                    }
                    if purge_spec {
                        any_change = true;
                        *spec_slot = None;
                    }
                }
            }
        }
        if purge_decl {
            any_change = true;
            *slot = None;
        }
    }
    if any_change {
        finalize_removals(file);
        prune_imports(file);
    }
}

/// Redirects `sync` imports of the packages in [`NOSYNC_PACKAGES`].
pub fn augment_original_imports(import_path: &str, file: &mut File) {
    if !NOSYNC_PACKAGES.contains(&import_path) {
        return;
    }
    for spec in file
        .decls
        .iter_mut()
        .filter_map(|d| match d {
            Decl::Gen(g) if g.tok == GenToken::Import => Some(g),
            _ => None,
        })
        .flat_map(|g| g.specs.iter_mut())
    {
        let Spec::Import(import) = spec else { continue };
        if import.path() == "sync" {
            if import.name.is_none() {
                import.name = Some(Ident::new("sync"));
            }
            import.set_path(NOSYNC_PATH);
        }
    }
}

/// Applies `overrides` to the declarations of an original file.
pub fn augment_original_file(file: &mut File, overrides: &Overrides) {
    let mut any_change = false;
    for slot in file.decls.slots_mut() {
        let Some(decl) = slot else { continue };
        let remove = match decl {
            Decl::Func(f) => {
                if let Some(info) = overrides.get(&util::func_key(f)) {
                    any_change = true;
                    let mut remove = true;
                    if info.keep_original {
                        f.name.name = format!("{ORIGINAL_PREFIX}{}", f.name.name);
                        remove = false;
                    }
                    if let Some(sig) = &info.override_signature {
                        f.recv = sig.recv.clone();
                        f.signature = sig.signature.clone();
                        remove = false;
                    }
                    remove
                } else {
                    let purged = f
                        .recv
                        .as_ref()
                        .and_then(util::func_receiver_key)
                        .and_then(|recv| overrides.get(&recv))
                        .is_some_and(|info| info.purge_methods);
                    any_change |= purged;
                    purged
                }
            }
            Decl::Gen(g) => {
                for spec_slot in g.specs.slots_mut() {
                    let Some(spec) = spec_slot else { continue };
                    let remove_spec = match spec {
                        Spec::Type(t) => overrides.contains_key(&t.name.name),
                        Spec::Value(v) => {
                            let changed = remove_overridden_values(v, overrides);
                            any_change |= changed;
                            changed && v.names.is_empty()
                        }
                        Spec::Import(_) => false,
                    };
                    if remove_spec {
                        any_change = true;
                        *spec_slot = None;
                    }
                }
                false
            }
        };
        if remove {
            *slot = None;
        }
    }
    if any_change {
        finalize_removals(file);
        prune_imports(file);
    }
}

/// Removes overridden names from a value spec. Returns whether anything
/// changed; an emptied `names` means the whole spec should go.
///
/// With one value per name, an overridden name is removed together with its
/// value unless the value may have side effects, in which case the name is
/// blanked and the value kept. With a single multi-value initializer, the
/// overridden names are blanked, and once every name is blank the spec is
/// dropped if the initializer has no side effects.
fn remove_overridden_values(spec: &mut ValueSpec, overrides: &Overrides) -> bool {
    let mut changed = false;
    if spec.names.len() == spec.values.len() {
        for i in 0..spec.names.slots().len() {
            let overridden = spec
                .names
                .get(i)
                .is_some_and(|n| !n.is_blank() && overrides.contains_key(&n.name));
            if !overridden {
                continue;
            }
            changed = true;
            if spec.values.get(i).is_some_and(Expr::may_have_side_effects) {
                if let Some(name) = spec.names.get_mut(i) {
                    name.name = "_".to_string();
                }
            } else {
                spec.names.remove(i);
                spec.values.remove(i);
            }
        }
        return changed;
    }

    for name in spec.names.iter_mut() {
        if !name.is_blank() && overrides.contains_key(&name.name) {
            name.name = "_".to_string();
            changed = true;
        }
    }
    let all_blank = spec.names.iter().all(Ident::is_blank);
    if changed && all_blank && !spec.values.iter().any(Expr::may_have_side_effects) {
        spec.names.clear();
        spec.values.clear();
    }
    changed
}

/// Whether the file holds nothing but import declarations.
pub fn is_only_imports(file: &File) -> bool {
    file.decls
        .iter()
        .all(|d| matches!(d, Decl::Gen(g) if g.tok == GenToken::Import))
}

/// Removes imports that nothing in the file refers to.
///
/// Dot and blank imports are kept unless the file holds only imports and no
/// `//go:linkname` directive, in which case everything is cleared. Imports of
/// `unsafe` and `embed` needed by `//go:linkname` and `//go:embed` directives
/// are kept as blank imports. Names are guessed from the last path segment
/// when no alias is given.
pub fn prune_imports(file: &mut File) {
    if is_only_imports(file) && !util::has_directive_prefix(file, "//go:linkname ") {
        file.decls.clear();
        file.comments.clear();
        return;
    }

    // name -> (decl slot, spec slot)
    let mut unused: IndexMap<String, (usize, usize)> = IndexMap::new();
    for (d, slot) in file.decls.slots().iter().enumerate() {
        let Some(Decl::Gen(g)) = slot else { continue };
        if g.tok != GenToken::Import {
            continue;
        }
        for (s, spec) in g.specs.slots().iter().enumerate() {
            if let Some(Spec::Import(import)) = spec {
                if let Some(name) = util::import_name(import) {
                    unused.insert(name, (d, s));
                }
            }
        }
    }

    for base in used_selector_bases(file) {
        unused.shift_remove(&base);
    }
    if unused.is_empty() {
        return;
    }

    let directive_imports = [("unsafe", "//go:linkname "), ("embed", "//go:embed ")];
    let mut kept = Vec::new();
    for (name, &(d, s)) in &unused {
        let Some(import) = import_spec_mut(file, d, s) else { continue };
        let path = import.path();
        let needed = directive_imports
            .iter()
            .any(|(p, prefix)| *p == path && util::has_directive_prefix(file, prefix));
        if needed {
            if let Some(import) = import_spec_mut(file, d, s) {
                import.name = Some(Ident::new("_"));
            }
            kept.push(name.clone());
        }
    }
    for name in kept {
        unused.shift_remove(&name);
    }
    if unused.is_empty() {
        return;
    }

    for (name, (d, s)) in unused {
        debug!(file = %file.path.display(), import = %name, "pruning unused import");
        if let Some(Decl::Gen(g)) = file.decls.get_mut(d) {
            g.specs.remove(s);
        }
    }
    finalize_removals(file);
}

fn import_spec_mut(file: &mut File, d: usize, s: usize) -> Option<&mut ImportSpec> {
    match file.decls.get_mut(d)? {
        Decl::Gen(g) => match g.specs.get_mut(s)? {
            Spec::Import(import) => Some(import),
            _ => None,
        },
        Decl::Func(_) => None,
    }
}

/// Every identifier used as a selector base outside import declarations.
fn used_selector_bases(file: &File) -> Vec<String> {
    let mut exprs: Vec<&Expr> = Vec::new();
    for decl in file.decls.iter() {
        match decl {
            Decl::Func(f) => {
                exprs.extend(f.recv.as_ref());
                exprs.extend(f.signature.type_params.as_ref());
                exprs.push(&f.signature.params);
                exprs.extend(f.signature.results.as_ref());
                exprs.extend(f.body.as_ref());
            }
            Decl::Gen(g) => {
                for spec in g.specs.iter() {
                    match spec {
                        Spec::Type(t) => exprs.push(&t.rest),
                        Spec::Value(v) => {
                            exprs.extend(v.ty.as_ref());
                            exprs.extend(v.values.iter());
                        }
                        Spec::Import(_) => {}
                    }
                }
            }
        }
    }
    exprs
        .into_iter()
        .flat_map(|e| e.selector_bases().iter().cloned())
        .collect()
}

/// Compacts every tombstoned declaration, spec, name and value, dropping
/// specs and declarations left empty, then rebuilds the file's comment list
/// from the comments still attached to the tree.
pub fn finalize_removals(file: &mut File) {
    for slot in file.decls.slots_mut() {
        let Some(Decl::Gen(g)) = slot else { continue };
        let mut decl_changed = false;
        for spec_slot in g.specs.slots_mut() {
            match spec_slot {
                None => decl_changed = true,
                Some(Spec::Value(v)) => {
                    if v.names.has_tombstones() {
                        v.names.squeeze();
                        v.values.squeeze();
                    }
                    if v.names.is_empty() {
                        decl_changed = true;
                        *spec_slot = None;
                    }
                }
                Some(_) => {}
            }
        }
        if decl_changed {
            g.specs.squeeze();
            if g.specs.is_empty() {
                *slot = None;
            }
        }
    }
    file.decls.squeeze();
    file.comments = attached_comments(file);
}

fn attached_comments(file: &File) -> Vec<CommentGroup> {
    let mut groups: Vec<CommentGroup> = Vec::new();
    groups.extend(file.doc.iter().cloned());
    for decl in file.decls.iter() {
        groups.extend(decl.doc().cloned());
        if let Decl::Gen(g) = decl {
            for spec in g.specs.iter() {
                groups.extend(spec.doc().cloned());
                groups.extend(spec.line_comment().cloned());
            }
        }
    }
    groups.sort_by_key(|g| g.pos().offset);
    groups
}

/// Parses the sources of `pkg` and merges in the overlay files found for it
/// in the natives tree. Returns the merged files (overlays first) and the
/// overlay's `.inc.js` files.
///
/// For an internal test build the overlay's test files are included; for an
/// external test package (`<path>_test`) only the overlay's external test
/// files are used.
pub fn parse_and_augment(
    ctx: &BuildContext,
    pkg: &PackageData,
    is_test: bool,
) -> Result<(Vec<File>, Vec<JsFile>)> {
    let (overlays, js_files) = parse_overlay_files(ctx, pkg, is_test)?;
    let originals = parse_original_files(pkg)?;
    debug!(
        package = %pkg.import_path,
        overlays = overlays.len(),
        originals = originals.len(),
        "augmenting package"
    );
    Ok((augment(&pkg.import_path, originals, overlays), js_files))
}

fn parse_overlay_files(
    ctx: &BuildContext,
    pkg: &PackageData,
    is_test: bool,
) -> Result<(Vec<File>, Vec<JsFile>)> {
    let is_xtest = pkg.import_path.ends_with("_test");
    let import_path = pkg
        .import_path
        .strip_suffix("_test")
        .unwrap_or(&pkg.import_path);

    let natives = ctx.natives();
    let natives_pkg = match natives.import(import_path, Path::new("")) {
        Ok(natives_pkg) => natives_pkg,
        Err(err) => {
            debug!(package = %import_path, error = %err, "no overlay files");
            return Ok((Vec::new(), Vec::new()));
        }
    };

    let names: Vec<&String> = if is_xtest {
        natives_pkg.xtest_go_files.iter().collect()
    } else if is_test {
        natives_pkg
            .go_files
            .iter()
            .chain(natives_pkg.test_go_files.iter())
            .collect()
    } else {
        natives_pkg.go_files.iter().collect()
    };

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let full_path = natives_pkg.dir.join(name);
        let src = fs::read_to_string(&full_path).map_err(|e| BuildError::file(&full_path, e))?;
        let new_path = pkg.dir.join(format!("{OVERLAY_FILE_PREFIX}{name}"));
        files.push(parse_file(&new_path, &src, Mode::Full).map_err(ErrorList::capped)?);
    }
    Ok((files, natives_pkg.js_files))
}

fn parse_original_files(pkg: &PackageData) -> Result<Vec<File>> {
    let mut files = Vec::with_capacity(pkg.go_files.len());
    let mut errors = ErrorList::default();
    for name in &pkg.go_files {
        let path = pkg.dir.join(name);
        let src = fs::read_to_string(&path).map_err(|e| BuildError::file(&path, e))?;
        match parse_file(&path, &src, Mode::Full) {
            Ok(file) => files.push(file),
            Err(list) => errors.extend(list.capped()),
        }
    }
    if errors.is_empty() {
        Ok(files)
    } else {
        Err(BuildError::Parse(errors))
    }
}
