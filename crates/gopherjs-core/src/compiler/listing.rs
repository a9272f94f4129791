use std::collections::BTreeSet;
use std::fmt::Write as _;

use tracing::debug;

use crate::ast::{print_file, Decl, File, Position, Spec};
use crate::compiler::linker::json_string;
use crate::compiler::{Archive, FrontEnd, ImportContext, LinkName};
use crate::error::{BuildError, Result};
use crate::sourcemap::position_marker;

const LINKNAME: &str = "//go:linkname ";

/// Front end that carries each package's augmented sources verbatim.
///
/// Every file is printed back to Go and embedded as a string in the
/// package's registration unit under `$pkg.$sources`. Dependencies are still
/// resolved through the import context, exports and link names are
/// recorded, and `$init` initializes imported packages first, once each.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListingFrontEnd;

impl FrontEnd for ListingFrontEnd {
    fn compile(
        &self,
        import_path: &str,
        files: &[File],
        importer: &mut dyn ImportContext,
        minify: bool,
    ) -> Result<Archive> {
        let first = files
            .first()
            .ok_or_else(|| BuildError::compile(import_path, "no Go files to compile"))?;
        let name = first.package.name.clone();
        if let Some(other) = files.iter().find(|f| f.package.name != name) {
            return Err(BuildError::compile(
                import_path,
                format!(
                    "found packages {} and {} in {}",
                    name,
                    other.package.name,
                    other.path.display()
                ),
            ));
        }

        let imports: BTreeSet<String> = files
            .iter()
            .flat_map(|f| f.import_paths())
            .filter(|p| p != "unsafe")
            .collect();
        for path in &imports {
            importer.import(path)?;
            if !importer.packages().contains(path) {
                return Err(BuildError::compile(
                    import_path,
                    format!("could not import {path}"),
                ));
            }
        }

        let mut archive = Archive::new(import_path, name);
        archive.imports = imports.into_iter().collect();
        archive.exports = exports(files);
        archive.linknames = files.iter().flat_map(linknames).collect();
        archive.minified = minify;
        archive.code = emit(&archive, files, minify);
        debug!(
            package = %import_path,
            files = files.len(),
            exports = archive.exports.len(),
            "listed package"
        );
        Ok(archive)
    }
}

fn exports(files: &[File]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for file in files {
        for decl in file.decls.iter() {
            match decl {
                Decl::Func(func) if func.recv.is_none() => {
                    names.insert(func.name.name.clone());
                }
                Decl::Func(_) => {}
                Decl::Gen(gen) => {
                    for spec in gen.specs.iter() {
                        match spec {
                            Spec::Type(ts) => {
                                names.insert(ts.name.name.clone());
                            }
                            Spec::Value(vs) => {
                                names.extend(vs.names.iter().map(|n| n.name.clone()));
                            }
                            Spec::Import(_) => {}
                        }
                    }
                }
            }
        }
    }
    names
        .into_iter()
        .filter(|n| n.starts_with(|c: char| c.is_uppercase()))
        .collect()
}

fn linknames(file: &File) -> Vec<LinkName> {
    file.comments
        .iter()
        .flat_map(|group| group.list.iter())
        .filter_map(|c| {
            let mut fields = c.text.strip_prefix(LINKNAME)?.split_whitespace();
            let local = fields.next()?;
            let target = fields.next()?;
            Some(LinkName {
                local: local.to_string(),
                target: target.to_string(),
            })
        })
        .collect()
}

fn emit(archive: &Archive, files: &[File], minify: bool) -> String {
    let (nl, t) = if minify { ("", "") } else { ("\n", "\t") };
    let mut out = String::new();

    let _ = write!(out, "{t}var $deps = [];{nl}");
    for path in &archive.imports {
        let _ = write!(out, "{t}$deps.push(await $import({}));{nl}", json_string(path));
    }
    let _ = write!(out, "{t}$pkg.$name = {};{nl}", json_string(&archive.name));
    let _ = write!(out, "{t}$pkg.$sources = {{}};{nl}");
    for file in files {
        let base = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let start = Position {
            filename: file.path.display().to_string(),
            offset: 0,
            line: 1,
            column: 1,
        };
        let _ = write!(
            out,
            "{t}$pkg.$sources[{}] = {}{};{nl}",
            json_string(&base),
            position_marker(&start),
            json_string(&print_file(file))
        );
    }
    let _ = write!(
        out,
        "{t}$init = function() {{{nl}\
         {t}{t}$pkg.$init = function() {{}};{nl}\
         {t}{t}for (var i = 0; i < $deps.length; i++) {{ $deps[i].$init(); }}{nl}\
         {t}}};{nl}\
         {t}$pkg.$init = $init;{nl}"
    );
    if archive.name == "main" {
        let _ = write!(out, "{t}$pkg.main = function() {{}};{nl}");
    }
    out
}
