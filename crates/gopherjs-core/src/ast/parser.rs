//! Go source parsing on top of the tree-sitter Go grammar.
//!
//! The concrete syntax tree is lowered to the declaration-level model of
//! [`super`]: names, receivers, signatures and spec lists are structural,
//! everything below them is kept as verbatim [`Expr`] text together with the
//! facts the overlay merge reads from it.

use std::fmt;
use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use super::{
    Comment, CommentGroup, Decl, Expr, File, FuncDecl, GenDecl, GenToken, Ident, ImportSpec,
    Position, Signature, Slots, Spec, TypeSpec, ValueSpec,
};

/// Maximum number of errors reported for a single file.
pub const MAX_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stop after the import declarations.
    ImportsOnly,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub pos: Position,
    pub msg: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.msg)
    }
}

/// A list of parse errors, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorList(pub Vec<ParseError>);

impl ErrorList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Keep the first [`MAX_ERRORS`] entries, followed by a synthetic
    /// "too many errors" entry positioned at the last kept error.
    pub fn capped(mut self) -> Self {
        if self.0.len() > MAX_ERRORS {
            self.0.truncate(MAX_ERRORS);
            let pos = self.0[MAX_ERRORS - 1].pos.clone();
            self.0.push(ParseError {
                pos,
                msg: "too many errors".to_string(),
            });
        }
        self
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [only] => write!(f, "{only}"),
            [first, rest @ ..] => write!(f, "{first} (and {} more errors)", rest.len()),
        }
    }
}

impl std::error::Error for ErrorList {}

/// Parses a Go source file.
pub fn parse_file(path: &Path, src: &str, mode: Mode) -> Result<File, ErrorList> {
    let filename = path.display().to_string();
    let tree = parse_tree(src).map_err(|msg| {
        ErrorList(vec![ParseError {
            pos: Position {
                filename: filename.clone(),
                ..Position::default()
            },
            msg,
        }])
    })?;

    let mut lowering = Lowering::new(src, &filename, tree.root_node());
    let file = lowering.file(path, tree.root_node(), mode);
    if lowering.errors.is_empty() {
        Ok(file)
    } else {
        lowering.errors.sort_by_key(|e| e.pos.offset);
        Err(ErrorList(lowering.errors))
    }
}

fn parse_tree(src: &str) -> Result<Tree, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| format!("cannot load the Go grammar: {e}"))?;
    parser
        .parse(src, None)
        .ok_or_else(|| "parsing was cancelled".to_string())
}

/// Byte range and last line of a non-comment leaf.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    end_line: usize,
}

struct Group {
    comments: CommentGroup,
    /// Starts on the same line as the preceding token.
    trailing: bool,
    /// End offset of the last real token before the group.
    prev_token_end: Option<usize>,
}

struct Lowering<'a> {
    src: &'a str,
    filename: &'a str,
    tokens: Vec<Span>,
    groups: Vec<Group>,
    errors: Vec<ParseError>,
}

impl<'a> Lowering<'a> {
    fn new(src: &'a str, filename: &'a str, root: Node<'_>) -> Self {
        let (tokens, comments) = scan(root, src, filename);
        let groups = group_comments(&tokens, comments);
        Self {
            src,
            filename,
            tokens,
            groups,
            errors: Vec::new(),
        }
    }

    fn file(&mut self, path: &Path, root: Node<'_>, mode: Mode) -> File {
        let mut doc = None;
        let mut package: Option<Ident> = None;
        let mut decls = Slots::new();
        let mut imports_closed = false;
        let mut limit = usize::MAX;

        let mut cursor = root.walk();
        let children: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
        for node in children {
            match node.kind() {
                "comment" => continue,
                "package_clause" => {
                    doc = self.lead_comment(node);
                    let name = named_child(node, "package_identifier")
                        .map_or_else(String::new, |n| self.text(n).to_string());
                    package = Some(Ident {
                        name,
                        pos: self.position(node),
                    });
                    continue;
                }
                "import_declaration" => {
                    if imports_closed {
                        self.error(node, "imports must appear before other declarations");
                    } else {
                        decls.push(Decl::Gen(self.gen_decl(node, GenToken::Import)));
                    }
                    continue;
                }
                _ => {}
            }

            imports_closed = true;
            if mode == Mode::ImportsOnly {
                limit = node.start_byte();
                break;
            }
            let decl = match node.kind() {
                "function_declaration" | "method_declaration" => Some(Decl::Func(self.func_decl(node))),
                "const_declaration" => Some(Decl::Gen(self.gen_decl(node, GenToken::Const))),
                "var_declaration" => Some(Decl::Gen(self.gen_decl(node, GenToken::Var))),
                "type_declaration" => Some(Decl::Gen(self.gen_decl(node, GenToken::Type))),
                "ERROR" => None,
                _ => {
                    self.error(node, "non-declaration statement outside function body");
                    None
                }
            };
            if let Some(decl) = decl {
                decls.push(decl);
            }
        }

        self.collect_errors(root, limit);
        let package = package.unwrap_or_else(|| {
            self.error(root, "expected 'package' clause");
            Ident::new("")
        });
        let comments = self.groups.iter().map(|g| g.comments.clone()).collect();
        File {
            path: path.to_path_buf(),
            doc,
            package,
            decls,
            comments,
        }
    }

    fn func_decl(&self, node: Node<'_>) -> FuncDecl {
        let field = |name: &str| node.child_by_field_name(name).map(|n| self.expr(n));
        let name = node
            .child_by_field_name("name")
            .map_or_else(|| Ident::new("_"), |n| self.ident(n));
        FuncDecl {
            doc: self.lead_comment(node),
            pos: self.position(node),
            end: self.content_end(node),
            recv: field("receiver"),
            name,
            signature: Signature {
                type_params: field("type_parameters"),
                params: field("parameters").unwrap_or_default(),
                results: field("result"),
            },
            body: field("body"),
        }
    }

    fn gen_decl(&self, node: Node<'_>, tok: GenToken) -> GenDecl {
        let after_keyword = node.start_byte() + tok.as_str().len();
        let grouped = self
            .src
            .get(after_keyword..)
            .is_some_and(|rest| rest.trim_start().starts_with('('));

        let kinds: &[&str] = match tok {
            GenToken::Import => &["import_spec"],
            GenToken::Const => &["const_spec"],
            GenToken::Var => &["var_spec"],
            GenToken::Type => &["type_spec", "type_alias"],
        };
        let specs = spec_nodes(node, kinds)
            .into_iter()
            .map(|spec| {
                let doc = if grouped { self.lead_comment(spec) } else { None };
                let comment = self.line_comment(self.content_end(spec));
                match tok {
                    GenToken::Import => Spec::Import(self.import_spec(spec, doc, comment)),
                    GenToken::Type => Spec::Type(self.type_spec(spec, doc, comment)),
                    GenToken::Const | GenToken::Var => {
                        Spec::Value(self.value_spec(spec, doc, comment))
                    }
                }
            })
            .collect();

        GenDecl {
            doc: self.lead_comment(node),
            pos: self.position(node),
            end: self.content_end(node),
            tok,
            grouped,
            specs,
        }
    }

    fn import_spec(
        &self,
        node: Node<'_>,
        doc: Option<CommentGroup>,
        comment: Option<CommentGroup>,
    ) -> ImportSpec {
        ImportSpec {
            doc,
            name: node.child_by_field_name("name").map(|n| self.ident(n)),
            path_literal: node
                .child_by_field_name("path")
                .map_or_else(String::new, |n| self.text(n).to_string()),
            comment,
        }
    }

    fn type_spec(
        &self,
        node: Node<'_>,
        doc: Option<CommentGroup>,
        comment: Option<CommentGroup>,
    ) -> TypeSpec {
        let name = node.child_by_field_name("name");
        let rest_start = name.map_or(node.start_byte(), |n| n.end_byte());
        let rest_end = self.content_end(node).max(rest_start);
        TypeSpec {
            doc,
            name: name.map_or_else(|| Ident::new("_"), |n| self.ident(n)),
            rest: self.expr_in(node, rest_start, rest_end),
            comment,
        }
    }

    fn value_spec(
        &self,
        node: Node<'_>,
        doc: Option<CommentGroup>,
        comment: Option<CommentGroup>,
    ) -> ValueSpec {
        let mut cursor = node.walk();
        let names = node
            .children_by_field_name("name", &mut cursor)
            .map(|n| self.ident(n))
            .collect();
        let values = node
            .child_by_field_name("value")
            .map(|list| {
                let mut cursor = list.walk();
                list.named_children(&mut cursor)
                    .filter(|n| n.kind() != "comment")
                    .map(|n| self.expr(n))
                    .collect()
            })
            .unwrap_or_default();
        ValueSpec {
            doc,
            names,
            ty: node.child_by_field_name("type").map(|n| self.expr(n)),
            values,
            comment,
        }
    }

    fn expr(&self, node: Node<'_>) -> Expr {
        self.expr_in(node, node.start_byte(), self.content_end(node))
    }

    /// The text in `start..end` with the facts of the parts of `node` inside it.
    fn expr_in(&self, node: Node<'_>, start: usize, end: usize) -> Expr {
        let mut expr = Expr {
            text: self.src[start..end].to_string(),
            ..Expr::default()
        };
        let mut stack = vec![(node, false)];
        while let Some((node, in_closure)) = stack.pop() {
            if node.end_byte() <= start || node.start_byte() >= end {
                continue;
            }
            match node.kind() {
                "selector_expression" => {
                    let operand = node
                        .child_by_field_name("operand")
                        .filter(|n| n.kind() == "identifier");
                    self.add_base(&mut expr, operand);
                }
                "qualified_type" => self.add_base(&mut expr, node.child_by_field_name("package")),
                "call_expression" | "type_conversion_expression" if !in_closure => {
                    expr.side_effects = true;
                }
                "unary_expression" if !in_closure => {
                    if node
                        .child_by_field_name("operator")
                        .is_some_and(|op| op.kind() == "<-")
                    {
                        expr.side_effects = true;
                    }
                }
                _ => {}
            }
            let in_closure = in_closure || node.kind() == "func_literal";
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev().map(|c| (c, in_closure)));
        }
        expr
    }

    fn add_base(&self, expr: &mut Expr, node: Option<Node<'_>>) {
        if let Some(node) = node {
            let base = self.text(node);
            if !expr.bases.iter().any(|b| b == base) {
                expr.bases.push(base.to_string());
            }
        }
    }

    fn ident(&self, node: Node<'_>) -> Ident {
        Ident {
            name: self.text(node).to_string(),
            pos: self.position(node),
        }
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        &self.src[node.start_byte()..node.end_byte()]
    }

    /// End of the last real token inside `node`; trailing comments and
    /// statement terminators are not part of a declaration.
    fn content_end(&self, node: Node<'_>) -> usize {
        prev_token(&self.tokens, node.end_byte())
            .map_or(node.end_byte(), |t| t.end)
            .max(node.start_byte())
    }

    fn position(&self, node: Node<'_>) -> Position {
        let point = node.start_position();
        Position {
            filename: self.filename.to_string(),
            offset: node.start_byte(),
            line: point.row + 1,
            column: point.column + 1,
        }
    }

    /// The comment group ending on the line directly above `node`, with no
    /// token in between.
    fn lead_comment(&self, node: Node<'_>) -> Option<CommentGroup> {
        let start = node.start_byte();
        let line = node.start_position().row + 1;
        let prev_end = prev_token(&self.tokens, start).map(|t| t.end);
        self.groups
            .iter()
            .find(|g| {
                !g.trailing
                    && g.comments.end_line() + 1 == line
                    && g.comments.end() <= start
                    && prev_end.map_or(true, |end| g.comments.pos().offset >= end)
            })
            .map(|g| g.comments.clone())
    }

    /// A trailing comment group starting on the same line right after `end`.
    fn line_comment(&self, end: usize) -> Option<CommentGroup> {
        self.groups
            .iter()
            .find(|g| g.trailing && g.prev_token_end == Some(end))
            .map(|g| g.comments.clone())
    }

    /// Reports syntax errors starting before `limit`; subtrees without
    /// errors are skipped.
    fn collect_errors(&mut self, node: Node<'_>, limit: usize) {
        if node.start_byte() >= limit {
            return;
        }
        if node.is_error() {
            let found = self.text(node).split_whitespace().next().unwrap_or("EOF");
            self.error(node, &format!("syntax error: unexpected {found}"));
            return;
        }
        if node.is_missing() {
            self.error(node, &format!("syntax error: missing {}", node.kind()));
            return;
        }
        if !node.has_error() {
            return;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        for child in children {
            self.collect_errors(child, limit);
        }
    }

    fn error(&mut self, node: Node<'_>, msg: &str) {
        self.errors.push(ParseError {
            pos: self.position(node),
            msg: msg.to_string(),
        });
    }
}

fn named_child<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|n| n.kind() == kind);
    found
}

/// Spec nodes of a declaration, looking through the parenthesized list
/// node the grammar wraps grouped specs in.
fn spec_nodes<'t>(decl: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut specs = Vec::new();
    let mut cursor = decl.walk();
    for child in decl.named_children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            specs.push(child);
        } else if child.kind().ends_with("_list") {
            let mut inner = child.walk();
            specs.extend(
                child
                    .named_children(&mut inner)
                    .filter(|n| kinds.contains(&n.kind())),
            );
        }
    }
    specs
}

/// Splits the tree into real tokens and comments, both in source order.
/// Statement terminators made of whitespace are not tokens.
fn scan(root: Node<'_>, src: &str, filename: &str) -> (Vec<Span>, Vec<Comment>) {
    let mut tokens = Vec::new();
    let mut comments = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.kind() == "comment" {
            let text = src[node.start_byte()..node.end_byte()].trim_end_matches('\r');
            let point = node.start_position();
            comments.push(Comment {
                text: text.to_string(),
                pos: Position {
                    filename: filename.to_string(),
                    offset: node.start_byte(),
                    line: point.row + 1,
                    column: point.column + 1,
                },
                end: node.start_byte() + text.len(),
                end_line: node.end_position().row + 1,
            });
            continue;
        }
        if node.child_count() == 0 {
            let text = &src[node.start_byte()..node.end_byte()];
            if !node.is_missing() && !text.trim().is_empty() {
                tokens.push(Span {
                    start: node.start_byte(),
                    end: node.end_byte(),
                    end_line: node.end_position().row + 1,
                });
            }
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    tokens.sort_by_key(|t| t.start);
    comments.sort_by_key(|c| c.pos.offset);
    (tokens, comments)
}

fn prev_token(tokens: &[Span], offset: usize) -> Option<&Span> {
    let idx = tokens.partition_point(|t| t.end <= offset);
    idx.checked_sub(1).map(|i| &tokens[i])
}

/// Groups comments that have no tokens and no blank lines between them. A
/// comment on the same line as a preceding token starts a trailing group
/// that only extends along that line.
fn group_comments(tokens: &[Span], comments: Vec<Comment>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for comment in comments {
        let prev = prev_token(tokens, comment.pos.offset);
        let prev_token_end = prev.map(|t| t.end);
        let trailing = prev.is_some_and(|t| t.end_line == comment.pos.line);

        if let Some(last) = groups.last_mut() {
            let last_end = last.comments.end();
            let token_between = prev_token_end.is_some_and(|end| end > last_end);
            let adjacent = comment.pos.line <= last.comments.end_line() + 1;
            let same_line = comment.pos.line == last.comments.end_line();
            let joins = !token_between && !trailing && adjacent && (!last.trailing || same_line);
            if joins {
                last.comments.list.push(comment);
                continue;
            }
        }
        groups.push(Group {
            comments: CommentGroup {
                list: vec![comment],
            },
            trailing,
            prev_token_end,
        });
    }
    groups
}
