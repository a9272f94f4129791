//! Top-level Go source model used by the augmentation engine.
//!
//! Only the package clause, imports and top-level declarations are modelled
//! structurally. Function bodies, type definitions and initializer
//! expressions are kept as verbatim source text ([`Expr`]), which is all the
//! overlay merge needs: it works on declaration identity, never on the
//! statements inside a declaration.
//!
//! Removable collections are [`Slots`]: removal tombstones a slot and a later
//! [`Slots::squeeze`] compacts the sequence in one pass, so walks that remove
//! entries never shift the indices they are iterating over.

pub mod parser;
pub mod printer;
pub mod util;

use std::fmt;
use std::path::PathBuf;

pub use parser::{parse_file, ErrorList, Mode, ParseError};
pub use printer::print_file;

/// A source position. Lines and columns are 1-based, `offset` is a byte offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub filename: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filename.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.filename, self.line, self.column)
        }
    }
}

/// Ordered sequence of present-or-removed slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slots<T>(Vec<Option<T>>);

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Slots<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, item: T) {
        self.0.push(Some(item));
    }

    /// Present items, in order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut().flatten()
    }

    /// Raw slots including tombstones, for index-based walks.
    pub fn slots(&self) -> &[Option<T>] {
        &self.0
    }

    pub fn slots_mut(&mut self) -> &mut [Option<T>] {
        &mut self.0
    }

    /// Tombstone the slot at `index`, returning what was there.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.0.get_mut(index).and_then(Option::take)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.0.get_mut(index).and_then(Option::as_mut)
    }

    /// Number of present items.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn has_tombstones(&self) -> bool {
        self.0.iter().any(Option::is_none)
    }

    /// Drop tombstones, preserving the relative order of present items.
    /// Returns true when anything was dropped.
    pub fn squeeze(&mut self) -> bool {
        let before = self.0.len();
        self.0.retain(Option::is_some);
        self.0.len() != before
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<T> FromIterator<T> for Slots<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Some).collect())
    }
}

impl<T> From<Vec<T>> for Slots<T> {
    fn from(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }
}

/// A single `//` or `/* */` comment, verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub pos: Position,
    pub end: usize,
    pub end_line: usize,
}

/// Comments with no tokens and no blank lines between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentGroup {
    pub list: Vec<Comment>,
}

impl CommentGroup {
    pub fn pos(&self) -> &Position {
        &self.list[0].pos
    }

    pub fn end(&self) -> usize {
        self.list.last().map_or(0, |c| c.end)
    }

    pub fn end_line(&self) -> usize {
        self.list.last().map_or(0, |c| c.end_line)
    }

    /// Whether any comment line is exactly `directive`, optionally followed
    /// by whitespace and arguments.
    pub fn has_directive(&self, directive: &str) -> bool {
        self.list.iter().any(|c| {
            c.text
                .strip_prefix(directive)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub pos: Position,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pos: Position::default(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name == "_"
    }
}

/// Verbatim source fragment: a type, an expression, a parameter list or a
/// body, with what the overlay merge needs to know about its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expr {
    pub text: String,
    /// Identifiers used as the base of a qualified reference (`base.Sel`),
    /// in order of first use.
    pub bases: Vec<String>,
    /// Contains a call, a conversion or a receive outside function literals.
    pub side_effects: bool,
}

impl Expr {
    pub fn selector_bases(&self) -> &[String] {
        &self.bases
    }

    /// Whether evaluating the fragment may run code. Conversions count, as
    /// they are indistinguishable from calls without types.
    pub fn may_have_side_effects(&self) -> bool {
        self.side_effects
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub path: PathBuf,
    pub doc: Option<CommentGroup>,
    pub package: Ident,
    pub decls: Slots<Decl>,
    /// Every comment group in the file. Rebuilt from the tree after removals.
    pub comments: Vec<CommentGroup>,
}

impl File {
    /// Import specs, in source order.
    pub fn imports(&self) -> impl Iterator<Item = &ImportSpec> {
        self.decls
            .iter()
            .filter_map(Decl::as_gen)
            .filter(|d| d.tok == GenToken::Import)
            .flat_map(|d| d.specs.iter())
            .filter_map(Spec::as_import)
    }

    pub fn import_paths(&self) -> Vec<String> {
        self.imports().map(ImportSpec::path).collect()
    }

    /// The `//go:build` expression preceding the package clause, if any.
    pub fn build_constraint(&self) -> Option<&str> {
        self.comments
            .iter()
            .take_while(|g| g.pos().offset < self.package.pos.offset)
            .flat_map(|g| g.list.iter())
            .find_map(|c| c.text.strip_prefix("//go:build "))
            .map(str::trim)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Func(FuncDecl),
    Gen(GenDecl),
}

impl Decl {
    pub fn as_gen(&self) -> Option<&GenDecl> {
        match self {
            Decl::Gen(d) => Some(d),
            Decl::Func(_) => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncDecl> {
        match self {
            Decl::Func(d) => Some(d),
            Decl::Gen(_) => None,
        }
    }

    pub fn doc(&self) -> Option<&CommentGroup> {
        match self {
            Decl::Func(d) => d.doc.as_ref(),
            Decl::Gen(d) => d.doc.as_ref(),
        }
    }

    /// Byte range of the declaration in its original source.
    pub fn span(&self) -> (usize, usize) {
        match self {
            Decl::Func(d) => (d.pos.offset, d.end),
            Decl::Gen(d) => (d.pos.offset, d.end),
        }
    }
}

/// The callable part of a function header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub type_params: Option<Expr>,
    pub params: Expr,
    pub results: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDecl {
    pub doc: Option<CommentGroup>,
    pub pos: Position,
    pub end: usize,
    /// Receiver list including parentheses, e.g. `(b *Buffer)`.
    pub recv: Option<Expr>,
    pub name: Ident,
    pub signature: Signature,
    /// Body including braces; absent for externally implemented functions.
    pub body: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenToken {
    Import,
    Const,
    Type,
    Var,
}

impl GenToken {
    pub fn as_str(self) -> &'static str {
        match self {
            GenToken::Import => "import",
            GenToken::Const => "const",
            GenToken::Type => "type",
            GenToken::Var => "var",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenDecl {
    pub doc: Option<CommentGroup>,
    pub pos: Position,
    pub end: usize,
    pub tok: GenToken,
    /// Written with parentheses.
    pub grouped: bool,
    pub specs: Slots<Spec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spec {
    Import(ImportSpec),
    Type(TypeSpec),
    Value(ValueSpec),
}

impl Spec {
    pub fn as_import(&self) -> Option<&ImportSpec> {
        match self {
            Spec::Import(s) => Some(s),
            _ => None,
        }
    }

    pub fn doc(&self) -> Option<&CommentGroup> {
        match self {
            Spec::Import(s) => s.doc.as_ref(),
            Spec::Type(s) => s.doc.as_ref(),
            Spec::Value(s) => s.doc.as_ref(),
        }
    }

    pub fn line_comment(&self) -> Option<&CommentGroup> {
        match self {
            Spec::Import(s) => s.comment.as_ref(),
            Spec::Type(s) => s.comment.as_ref(),
            Spec::Value(s) => s.comment.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub doc: Option<CommentGroup>,
    pub name: Option<Ident>,
    /// The path literal as written, quotes included.
    pub path_literal: String,
    pub comment: Option<CommentGroup>,
}

impl ImportSpec {
    pub fn new(name: Option<&str>, path: &str) -> Self {
        Self {
            doc: None,
            name: name.map(Ident::new),
            path_literal: format!("\"{path}\""),
            comment: None,
        }
    }

    /// The unquoted import path.
    pub fn path(&self) -> String {
        self.path_literal
            .trim_matches(|c| c == '"' || c == '`')
            .to_string()
    }

    pub fn set_path(&mut self, path: &str) {
        self.path_literal = format!("\"{path}\"");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    pub doc: Option<CommentGroup>,
    pub name: Ident,
    /// Everything after the name (type parameters, `=`, the type), with the
    /// original leading whitespace.
    pub rest: Expr,
    pub comment: Option<CommentGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSpec {
    pub doc: Option<CommentGroup>,
    pub names: Slots<Ident>,
    pub ty: Option<Expr>,
    pub values: Slots<Expr>,
    pub comment: Option<CommentGroup>,
}
