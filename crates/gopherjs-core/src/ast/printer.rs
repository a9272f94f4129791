//! Renders a [`File`] back to Go source.

use rustc_hash::FxHashSet;

use super::{CommentGroup, Decl, File, FuncDecl, GenDecl, Spec};

/// Prints `file` as Go source. Free-floating comment groups that survived
/// augmentation are emitted in source order between declarations.
pub fn print_file(file: &File) -> String {
    let attached = attached_comment_offsets(file);
    let spans: Vec<(usize, usize)> = file.decls.iter().map(Decl::span).collect();
    let free: Vec<&CommentGroup> = file
        .comments
        .iter()
        .filter(|g| !attached.contains(&g.pos().offset))
        .filter(|g| {
            let at = g.pos().offset;
            !spans.iter().any(|&(start, end)| at >= start && at < end)
        })
        .collect();
    let mut free = free.into_iter().peekable();

    let mut items: Vec<String> = Vec::new();
    let package_offset = file.package.pos.offset;
    while let Some(group) = free.next_if(|g| g.pos().offset < package_offset) {
        items.push(comment_text(group));
    }

    let mut header = String::new();
    if let Some(doc) = &file.doc {
        header.push_str(&comment_text(doc));
        header.push('\n');
    }
    header.push_str("package ");
    header.push_str(&file.package.name);
    items.push(header);

    for decl in file.decls.iter() {
        let (start, _) = decl.span();
        while let Some(group) = free.next_if(|g| g.pos().offset < start) {
            items.push(comment_text(group));
        }
        items.push(print_decl(decl));
    }
    items.extend(free.map(comment_text));

    let mut out = items.join("\n\n");
    out.push('\n');
    out
}

pub fn print_decl(decl: &Decl) -> String {
    let mut out = String::new();
    if let Some(doc) = decl.doc() {
        out.push_str(&comment_text(doc));
        out.push('\n');
    }
    match decl {
        Decl::Func(f) => out.push_str(&func_header(f)),
        Decl::Gen(g) => out.push_str(&gen_decl(g)),
    }
    out
}

fn func_header(f: &FuncDecl) -> String {
    let mut out = String::from("func ");
    if let Some(recv) = &f.recv {
        out.push_str(&recv.text);
        out.push(' ');
    }
    out.push_str(&f.name.name);
    if let Some(tparams) = &f.signature.type_params {
        out.push_str(&tparams.text);
    }
    out.push_str(&f.signature.params.text);
    if let Some(results) = &f.signature.results {
        out.push(' ');
        out.push_str(&results.text);
    }
    if let Some(body) = &f.body {
        out.push(' ');
        out.push_str(&body.text);
    }
    out
}

fn gen_decl(g: &GenDecl) -> String {
    let mut out = String::from(g.tok.as_str());
    if !g.grouped {
        if let Some(spec) = g.specs.iter().next() {
            out.push(' ');
            out.push_str(&spec_line(spec));
        }
        return out;
    }

    out.push_str(" (\n");
    for spec in g.specs.iter() {
        if let Some(doc) = spec.doc() {
            for comment in &doc.list {
                out.push('\t');
                out.push_str(&comment.text);
                out.push('\n');
            }
        }
        out.push('\t');
        out.push_str(&spec_line(spec));
        out.push('\n');
    }
    out.push(')');
    out
}

fn spec_line(spec: &Spec) -> String {
    let mut out = match spec {
        Spec::Import(s) => match &s.name {
            Some(name) => format!("{} {}", name.name, s.path_literal),
            None => s.path_literal.clone(),
        },
        Spec::Type(s) => format!("{}{}", s.name.name, s.rest.text),
        Spec::Value(s) => {
            let names: Vec<&str> = s.names.iter().map(|n| n.name.as_str()).collect();
            let mut line = names.join(", ");
            if let Some(ty) = &s.ty {
                line.push(' ');
                line.push_str(&ty.text);
            }
            if !s.values.is_empty() {
                let values: Vec<&str> = s.values.iter().map(|v| v.text.as_str()).collect();
                line.push_str(" = ");
                line.push_str(&values.join(", "));
            }
            line
        }
    };
    if let Some(comment) = spec.line_comment() {
        out.push(' ');
        let texts: Vec<&str> = comment.list.iter().map(|c| c.text.as_str()).collect();
        out.push_str(&texts.join(" "));
    }
    out
}

fn comment_text(group: &CommentGroup) -> String {
    let texts: Vec<&str> = group.list.iter().map(|c| c.text.as_str()).collect();
    texts.join("\n")
}

fn attached_comment_offsets(file: &File) -> FxHashSet<usize> {
    let mut offsets = FxHashSet::default();
    let mut add = |g: Option<&CommentGroup>| {
        if let Some(g) = g {
            offsets.insert(g.pos().offset);
        }
    };
    add(file.doc.as_ref());
    for decl in file.decls.iter() {
        add(decl.doc());
        if let Decl::Gen(g) = decl {
            for spec in g.specs.iter() {
                add(spec.doc());
                add(spec.line_comment());
            }
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_file, Mode};
    use indoc::indoc;
    use std::path::PathBuf;

    fn roundtrip(src: &str) -> String {
        let file = parse_file(&PathBuf::from("p.go"), src, Mode::Full).unwrap();
        print_file(&file)
    }

    #[test]
    fn test_print_preserves_canonical_source() {
        let src = indoc! {r#"
            //go:build js

            // Package foo does things.
            package foo

            import (
            	"fmt"
            	s "strings" // for Join
            )

            // Answer is the answer.
            const Answer = 42

            type Pair[T any] struct {
            	a, b T
            }

            // Join joins.
            func (p *Pair[T]) Join(sep string) string {
            	return s.Join([]string{fmt.Sprint(p.a), fmt.Sprint(p.b)}, sep)
            }

            func external(x int) int
        "#};
        assert_eq!(roundtrip(src), src);
    }

    #[test]
    fn test_print_value_spec_forms() {
        let src = indoc! {r#"
            package foo

            var a, b int = 1, 2

            var c []string
        "#};
        assert_eq!(roundtrip(src), src);
    }

    #[test]
    fn test_free_floating_comment_kept_between_decls() {
        let src = indoc! {r#"
            package foo

            func a() {}

            // Detached note.

            func b() {}
        "#};
        assert_eq!(roundtrip(src), src);
    }
}
