//! `//go:embed` support.
//!
//! Package-level `string` and `[]byte` variables annotated with `//go:embed`
//! receive the contents of the file their patterns match in the package
//! directory. The contents become constants of a generated file appended to
//! the package, and each annotated variable is initialized from its
//! constant, so the variables are ready before any other initializer runs.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::debug;
use walkdir::WalkDir;

use crate::ast::{parse_file, Decl, ErrorList, Expr, File, GenToken, Mode, Position, Spec, ValueSpec};
use crate::error::{BuildError, Result};
use crate::package_data::PackageData;

/// Name of the generated file holding embedded contents.
pub const EMBED_FILE_NAME: &str = "_gopherjs_embed.go";

const EMBED_DIRECTIVE: &str = "//go:embed";
const CONST_PREFIX: &str = "_gopherjs_embed_";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedKind {
    String,
    Bytes,
}

/// Resolves the `//go:embed` directives of `files`, rewriting the annotated
/// variables in place. Returns the generated file, or `None` when nothing
/// in the package embeds.
pub fn embed_files(pkg: &PackageData, files: &mut [File]) -> Result<Option<File>> {
    let Some(package_name) = files.first().map(|f| f.package.name.clone()) else {
        return Ok(None);
    };

    let mut consts = Vec::new();
    for file in files.iter_mut() {
        let imports_embed = file.import_paths().iter().any(|p| p == "embed");
        for decl in file.decls.iter_mut() {
            let Decl::Gen(gen) = decl else { continue };
            if gen.tok != GenToken::Var {
                continue;
            }
            let decl_doc = if gen.grouped { None } else { gen.doc.clone() };
            for spec in gen.specs.iter_mut() {
                let Spec::Value(value) = spec else { continue };
                let Some((pos, patterns)) = value
                    .doc
                    .as_ref()
                    .or(decl_doc.as_ref())
                    .map(|doc| directive_patterns(doc.list.iter().map(|c| (&c.text, &c.pos))))
                    .transpose()?
                    .flatten()
                else {
                    continue;
                };
                if !imports_embed {
                    return Err(embed_error(
                        &pos,
                        "go:embed only allowed in Go files that import \"embed\"",
                    ));
                }

                let kind = embed_kind(value, &pos)?;
                let content = read_single_file(&pkg.dir, &patterns, &pos)?;
                let name = format!("{CONST_PREFIX}{}", consts.len());
                value.values.push(Expr {
                    text: match kind {
                        EmbedKind::String => name.clone(),
                        EmbedKind::Bytes => format!("[]byte({name})"),
                    },
                    bases: Vec::new(),
                    side_effects: kind == EmbedKind::Bytes,
                });
                consts.push((name, content));
            }
        }
    }

    if consts.is_empty() {
        return Ok(None);
    }
    debug!(package = %pkg.import_path, files = consts.len(), "embedding files");

    let mut src = format!("package {package_name}\n\nconst (\n");
    for (name, content) in &consts {
        let _ = writeln!(src, "\t{name} = {}", go_quote(content));
    }
    src.push_str(")\n");
    let file = parse_file(&pkg.dir.join(EMBED_FILE_NAME), &src, Mode::Full).map_err(ErrorList::capped)?;
    Ok(Some(file))
}

/// Collects the patterns of every `//go:embed` line in a doc comment, along
/// with the position of the first one.
fn directive_patterns<'a>(
    comments: impl Iterator<Item = (&'a String, &'a Position)>,
) -> Result<Option<(Position, Vec<String>)>> {
    let mut found: Option<(Position, Vec<String>)> = None;
    for (text, pos) in comments {
        let Some(args) = text.strip_prefix(EMBED_DIRECTIVE) else {
            continue;
        };
        if !args.starts_with([' ', '\t']) {
            continue;
        }
        let patterns = split_patterns(args)
            .ok_or_else(|| embed_error(pos, format!("invalid quoted string in {text}")))?;
        if patterns.is_empty() {
            return Err(embed_error(pos, "usage: //go:embed pattern..."));
        }
        found
            .get_or_insert_with(|| (pos.clone(), Vec::new()))
            .1
            .extend(patterns);
    }
    Ok(found)
}

/// Splits directive arguments on white space. Patterns may be quoted with
/// `"` or a backquote to include spaces.
fn split_patterns(args: &str) -> Option<Vec<String>> {
    let mut patterns = Vec::new();
    let mut rest = args.trim_start();
    while !rest.is_empty() {
        let (word, tail) = match rest.chars().next() {
            Some(quote @ ('"' | '`')) => {
                let body = &rest[1..];
                let end = body.find(quote)?;
                (&body[..end], &body[end + 1..])
            }
            _ => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            }
        };
        patterns.push(word.to_string());
        rest = tail.trim_start();
    }
    Some(patterns)
}

fn embed_kind(value: &ValueSpec, pos: &Position) -> Result<EmbedKind> {
    if value.names.len() != 1 {
        return Err(embed_error(pos, "go:embed cannot apply to multiple vars"));
    }
    if !value.values.is_empty() {
        return Err(embed_error(pos, "go:embed cannot apply to var with initializer"));
    }
    let Some(ty) = &value.ty else {
        return Err(embed_error(pos, "go:embed cannot apply to var without type"));
    };
    match ty.text.split_whitespace().collect::<String>().as_str() {
        "string" => Ok(EmbedKind::String),
        "[]byte" | "[]uint8" => Ok(EmbedKind::Bytes),
        other => Err(embed_error(
            pos,
            format!("go:embed cannot apply to var of type {other}"),
        )),
    }
}

/// Reads the one file that `patterns` match under `dir`.
fn read_single_file(dir: &Path, patterns: &[String], pos: &Position) -> Result<Vec<u8>> {
    let mut matched = BTreeMap::new();
    for pattern in patterns {
        matched.extend(matching_files(dir, pattern, pos)?);
    }
    let mut matched = matched.into_values();
    match (matched.next(), matched.next()) {
        (Some(path), None) => fs::read(&path).map_err(|e| BuildError::file(&path, e)),
        _ => Err(embed_error(pos, "invalid go:embed: multiple files for type string or []byte")),
    }
}

/// Files under `dir` matched by `pattern`, keyed by slash-separated path
/// relative to `dir`. A matched directory contributes every file below it
/// except those whose path has an element starting with `.` or `_`; an
/// `all:` prefix keeps those too.
fn matching_files(dir: &Path, pattern: &str, pos: &Position) -> Result<BTreeMap<String, PathBuf>> {
    let (all, glob) = match pattern.strip_prefix("all:") {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    if !valid_pattern(glob) {
        return Err(embed_error(pos, format!("invalid pattern syntax: {pattern}")));
    }
    let matcher = Pattern::new(glob)
        .map_err(|e| embed_error(pos, format!("invalid pattern syntax: {pattern}: {e}")))?;

    let mut found = BTreeMap::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));
    for entry in walker {
        let entry = entry.map_err(|e| BuildError::file(dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let rel = parts.join("/");

        let included = if matcher.matches_with(&rel, MATCH_OPTIONS) {
            true
        } else {
            (1..parts.len())
                .find(|&depth| matcher.matches_with(&parts[..depth].join("/"), MATCH_OPTIONS))
                .is_some_and(|depth| {
                    all || parts[depth..]
                        .iter()
                        .all(|p| !p.starts_with('.') && !p.starts_with('_'))
                })
        };
        if included {
            found.insert(rel, entry.into_path());
        }
    }

    if found.is_empty() {
        return Err(embed_error(pos, format!("pattern {pattern}: no matching files found")));
    }
    Ok(found)
}

/// Patterns are unrooted slash-separated paths without `.` or `..`
/// elements.
fn valid_pattern(pattern: &str) -> bool {
    !pattern.is_empty()
        && !pattern.contains('\\')
        && pattern
            .split('/')
            .all(|elem| !elem.is_empty() && elem != "." && elem != "..")
}

/// Quotes `data` as a Go interpreted string literal. Bytes that are not
/// valid UTF-8 are written as `\x` escapes.
fn go_quote(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 2);
    out.push('"');
    for chunk in data.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {
                    let _ = write!(out, "\\u{:04x}", u32::from(c));
                }
                c => out.push(c),
            }
        }
        for b in chunk.invalid() {
            let _ = write!(out, "\\x{b:02x}");
        }
    }
    out.push('"');
    out
}

fn embed_error(pos: &Position, msg: impl Into<String>) -> BuildError {
    BuildError::Embed {
        pos: pos.clone(),
        msg: msg.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::print_file;
    use indoc::indoc;
    use tempfile::TempDir;

    fn package(files: &[(&str, &str)]) -> (TempDir, PackageData) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let pkg = PackageData::new("example.com/assets", "assets", dir.path());
        (dir, pkg)
    }

    fn parse(pkg: &PackageData, src: &str) -> File {
        parse_file(&pkg.dir.join("assets.go"), src, Mode::Full).unwrap()
    }

    #[test]
    fn test_string_and_bytes_vars_are_initialized() {
        let (_dir, pkg) = package(&[("hello.txt", "hello \"gopher\"\n"), ("logo.bin", "\u{1}PNG")]);
        let mut files = vec![parse(
            &pkg,
            indoc! {r#"
                package assets

                import _ "embed"

                //go:embed hello.txt
                var greeting string

                var (
                	// Logo bytes.
                	//go:embed logo.bin
                	logo []byte
                )
            "#},
        )];

        let generated = embed_files(&pkg, &mut files).unwrap().unwrap();
        assert_eq!(generated.path, pkg.dir.join(EMBED_FILE_NAME));
        assert_eq!(
            print_file(&generated),
            indoc! {r#"
                package assets

                const (
                	_gopherjs_embed_0 = "hello \"gopher\"\n"
                	_gopherjs_embed_1 = "\u0001PNG"
                )
            "#}
        );

        let printed = print_file(&files[0]);
        assert!(printed.contains("var greeting string = _gopherjs_embed_0"), "{printed}");
        assert!(printed.contains("\tlogo []byte = []byte(_gopherjs_embed_1)"), "{printed}");
    }

    #[test]
    fn test_no_directives_means_no_file() {
        let (_dir, pkg) = package(&[]);
        let mut files = vec![parse(&pkg, "package assets\n\n// Plain.\nvar x string\n")];
        assert!(embed_files(&pkg, &mut files).unwrap().is_none());
        assert!(print_file(&files[0]).contains("var x string\n"));
    }

    #[test]
    fn test_patterns_match_globs_and_directories() {
        let (_dir, pkg) = package(&[
            ("static/index.html", "<html>"),
            ("static/.hidden", "secret"),
            ("static/_draft.html", "draft"),
            ("notes.md", "notes"),
        ]);
        let pos = Position::default();

        let files = matching_files(&pkg.dir, "static", &pos).unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["static/index.html"]);

        let files = matching_files(&pkg.dir, "all:static", &pos).unwrap();
        assert_eq!(files.len(), 3);

        let files = matching_files(&pkg.dir, "*.md", &pos).unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["notes.md"]);

        assert!(matches!(
            matching_files(&pkg.dir, "*.txt", &pos),
            Err(BuildError::Embed { ref msg, .. }) if msg.contains("no matching files")
        ));
        for bad in ["../x", "./notes.md", "static/", "/abs"] {
            assert!(matching_files(&pkg.dir, bad, &pos).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_invalid_targets_are_rejected() {
        let (_dir, pkg) = package(&[("a.txt", "a"), ("b.txt", "b")]);
        let cases = [
            ("//go:embed *.txt\nvar s string", "multiple files"),
            ("//go:embed a.txt\nvar s = \"x\"", "initializer"),
            ("//go:embed a.txt\nvar s, t string", "multiple vars"),
            ("//go:embed a.txt\nvar s int", "of type int"),
        ];
        for (decl, want) in cases {
            let src = format!("package assets\n\nimport _ \"embed\"\n\n{decl}\n");
            let mut files = vec![parse(&pkg, &src)];
            let err = embed_files(&pkg, &mut files).unwrap_err();
            assert!(err.to_string().contains(want), "{decl}: {err}");
        }

        let mut files = vec![parse(&pkg, "package assets\n\n//go:embed a.txt\nvar s string\n")];
        let err = embed_files(&pkg, &mut files).unwrap_err();
        assert!(err.to_string().contains("import \"embed\""), "{err}");
    }

    #[test]
    fn test_split_quoted_patterns() {
        assert_eq!(
            split_patterns(" a.txt \"with space.txt\" `raw name`").unwrap(),
            vec!["a.txt", "with space.txt", "raw name"]
        );
        assert!(split_patterns(" \"unterminated").is_none());
    }

    #[test]
    fn test_go_quote_escapes() {
        assert_eq!(go_quote(b"a\tb\\c"), "\"a\\tb\\\\c\"");
        assert_eq!(go_quote(&[0x68, 0xff, 0x69]), "\"h\\xffi\"");
        assert_eq!(go_quote("é".as_bytes()), "\"é\"");
    }
}
