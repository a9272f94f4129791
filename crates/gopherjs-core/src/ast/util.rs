//! Declaration identity and directive helpers.

use super::{CommentGroup, Expr, File, FuncDecl, ImportSpec};

pub const KEEP_ORIGINAL: &str = "//gopherjs:keep-original";
pub const PURGE: &str = "//gopherjs:purge";
pub const OVERRIDE_SIGNATURE: &str = "//gopherjs:override-signature";

/// Prefix given to original functions retained under `keep-original`.
pub const ORIGINAL_PREFIX: &str = "_gopherjs_original_";

/// The override key of a function: `Recv.Name` for methods, `Name` otherwise.
pub fn func_key(decl: &FuncDecl) -> String {
    match decl.recv.as_ref().and_then(func_receiver_key) {
        Some(recv) => format!("{recv}.{}", decl.name.name),
        None => decl.name.name.clone(),
    }
}

/// The receiver's type name with any pointer and type arguments stripped:
/// `(b *Buffer[T])` yields `Buffer`.
pub fn func_receiver_key(recv: &Expr) -> Option<String> {
    let list = recv.text.trim();
    let inner = list.strip_prefix('(')?.strip_suffix(')')?;
    let ty = inner.split('[').next()?;
    ty.rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
        .find(|part| !part.is_empty())
        .map(str::to_string)
}

pub fn keep_original(decl: &FuncDecl) -> bool {
    has_directive(decl.doc.as_ref(), KEEP_ORIGINAL)
}

pub fn override_signature(decl: &FuncDecl) -> bool {
    has_directive(decl.doc.as_ref(), OVERRIDE_SIGNATURE)
}

pub fn purge(doc: Option<&CommentGroup>) -> bool {
    has_directive(doc, PURGE)
}

fn has_directive(doc: Option<&CommentGroup>, directive: &str) -> bool {
    doc.is_some_and(|g| g.has_directive(directive))
}

/// Whether any comment in the file starts with `prefix`.
pub fn has_directive_prefix(file: &File, prefix: &str) -> bool {
    file.comments
        .iter()
        .flat_map(|g| g.list.iter())
        .any(|c| c.text.starts_with(prefix))
}

/// The name an import is referred to by: the explicit alias, else the last
/// path segment. Dot and blank imports have no usable name.
pub fn import_name(spec: &ImportSpec) -> Option<String> {
    let name = match &spec.name {
        Some(ident) => ident.name.clone(),
        None => {
            let path = spec.path();
            path.rsplit('/').next().unwrap_or_default().to_string()
        }
    };
    match name.as_str() {
        "" | "_" | "." => None,
        _ => Some(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_file, Decl, Mode};
    use std::path::PathBuf;

    fn funcs(src: &str) -> Vec<FuncDecl> {
        let file = parse_file(&PathBuf::from("u.go"), src, Mode::Full).unwrap();
        file.decls
            .iter()
            .filter_map(Decl::as_func)
            .cloned()
            .collect()
    }

    #[test]
    fn test_func_keys() {
        let fs = funcs(
            "package p\nfunc A() {}\nfunc (b *Buffer) Len() int { return 0 }\nfunc (l List[T]) At(i int) T { return l[i] }\nfunc (Pair[K, V]) Key() {}\n",
        );
        let keys: Vec<String> = fs.iter().map(func_key).collect();
        assert_eq!(keys, vec!["A", "Buffer.Len", "List.At", "Pair.Key"]);
    }

    #[test]
    fn test_directives_on_func_docs() {
        let fs = funcs(
            "package p\n\n//gopherjs:keep-original\nfunc A() {}\n\n// Docs.\n//gopherjs:override-signature\nfunc B(x int)\n\n//gopherjs:keep-originals\nfunc C() {}\n",
        );
        assert!(keep_original(&fs[0]));
        assert!(override_signature(&fs[1]));
        assert!(!keep_original(&fs[2]));
    }

    #[test]
    fn test_import_names() {
        assert_eq!(import_name(&ImportSpec::new(None, "math/rand")), Some("rand".into()));
        assert_eq!(import_name(&ImportSpec::new(Some("r"), "math/rand")), Some("r".into()));
        assert_eq!(import_name(&ImportSpec::new(Some("_"), "embed")), None);
        assert_eq!(import_name(&ImportSpec::new(Some("."), "fmt")), None);
    }
}
