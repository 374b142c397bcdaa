//
// script.rs
//
// A parsed bash script: syntax tree, cursor lookup, identifier extraction
//

use std::fmt;

use tree_sitter::{Node, Tree};

use crate::parser_pool::with_parser;
use crate::position::{Cursor, Position, Span};
use crate::symbols::FunctionRef;

/// The primary document did not parse cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub position: Position,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}",
            self.position.line, self.position.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Source text together with its syntax tree.
pub struct Script {
    text: String,
    tree: Tree,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("len", &self.text.len())
            .finish_non_exhaustive()
    }
}

impl Script {
    /// Parse `text`. Any error or missing node in the tree is a parse failure,
    /// reported at the first such node in source order.
    pub fn parse(text: &str) -> Result<Script, ParseError> {
        let tree = with_parser(|parser| parser.parse(text, None)).ok_or_else(|| ParseError {
            position: Position::new(1, 1),
            message: "parser returned no tree".to_string(),
        })?;

        let root = tree.root_node();
        if root.has_error() {
            if let Some(err) = first_error(root, text) {
                return Err(err);
            }
        }

        Ok(Script {
            text: text.to_string(),
            tree,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn node_text(&self, node: Node) -> &str {
        node_text(node, &self.text)
    }

    /// The deepest named node covering `cursor`. When two siblings touch at the
    /// cursor (inclusive ends), the later one wins.
    pub fn node_at(&self, cursor: Cursor) -> Option<Node<'_>> {
        let root = self.root();
        if !Span::of_node(root).contains(cursor) {
            return None;
        }

        let mut current = root;
        loop {
            let mut walker = current.walk();
            let next = current
                .named_children(&mut walker)
                .filter(|child| Span::of_node(*child).contains(cursor))
                .last();
            match next {
                Some(child) => current = child,
                None => return Some(current),
            }
        }
    }

    /// The identifier under `cursor` and the span of the token it came from.
    pub fn identifier_at(&self, cursor: Cursor) -> Option<(String, Span)> {
        let node = self.node_at(cursor)?;
        let ident = identifier_node(node)?;
        let name = self.node_text(ident);
        if name.is_empty() {
            return None;
        }
        Some((name.to_string(), Span::of_node(ident)))
    }

    /// All function declarations, in source order.
    pub fn functions(&self) -> Vec<FunctionRef> {
        let mut functions = Vec::new();
        collect_functions(self.root(), &self.text, &mut functions);
        functions
    }

    /// The innermost function whose span contains `cursor`, if any.
    pub fn enclosing_function(&self, cursor: Cursor) -> Option<FunctionRef> {
        enclosing_function(&self.functions(), cursor)
    }
}

/// Innermost function among `functions` containing `cursor`. Functions come in
/// source order, so the last containing one is the innermost.
pub fn enclosing_function(functions: &[FunctionRef], cursor: Cursor) -> Option<FunctionRef> {
    functions
        .iter()
        .filter(|f| f.span.contains(cursor))
        .last()
        .cloned()
}

pub fn node_text<'a>(node: Node, text: &'a str) -> &'a str {
    text.get(node.byte_range()).unwrap_or("")
}

/// Map a node under the cursor to the token carrying an identifier.
fn identifier_node(node: Node) -> Option<Node> {
    match node.kind() {
        "variable_name" | "word" => Some(node),
        "command_name" => node.named_child(0).filter(|c| c.kind() == "word"),
        "simple_expansion" | "expansion" => expansion_variable(node),
        "variable_assignment" => node.child_by_field_name("name").and_then(assignment_name),
        "subscript" => node.child_by_field_name("name"),
        "function_definition" => node.child_by_field_name("name"),
        _ => None,
    }
}

/// The `variable_name` token of an assignment target, looking through
/// `arr[i]=...` subscripts.
pub(crate) fn assignment_name(target: Node) -> Option<Node> {
    match target.kind() {
        "variable_name" => Some(target),
        "subscript" => target
            .child_by_field_name("name")
            .filter(|n| n.kind() == "variable_name"),
        _ => None,
    }
}

/// The variable named by `$x`, `${x}`, `${#x}`, `${x:-y}` or `${x[0]}`.
pub(crate) fn expansion_variable(node: Node) -> Option<Node> {
    let mut walker = node.walk();
    let found = node.named_children(&mut walker).find_map(|child| match child.kind() {
        "variable_name" => Some(child),
        "subscript" => child
            .child_by_field_name("name")
            .filter(|n| n.kind() == "variable_name"),
        _ => None,
    });
    found
}

fn collect_functions(node: Node, text: &str, out: &mut Vec<FunctionRef>) {
    if node.kind() == "function_definition" {
        if let Some(name) = node.child_by_field_name("name") {
            out.push(FunctionRef {
                name: node_text(name, text).to_string(),
                span: Span::of_node(node),
            });
        }
    }

    let mut walker = node.walk();
    for child in node.named_children(&mut walker) {
        collect_functions(child, text, out);
    }
}

fn first_error(node: Node, text: &str) -> Option<ParseError> {
    if node.is_missing() {
        return Some(ParseError {
            position: Position::from_point(node.start_position()),
            message: format!("missing `{}`", node.kind()),
        });
    }
    if node.is_error() {
        let snippet = node_text(node, text)
            .lines()
            .next()
            .unwrap_or("")
            .trim();
        let message = if snippet.is_empty() {
            "syntax error".to_string()
        } else {
            let shown: String = snippet.chars().take(40).collect();
            format!("syntax error near `{}`", shown)
        };
        return Some(ParseError {
            position: Position::from_point(node.start_position()),
            message,
        });
    }
    if !node.has_error() {
        return None;
    }

    let mut walker = node.walk();
    let children: Vec<Node> = node.children(&mut walker).collect();
    children.into_iter().find_map(|child| first_error(child, text))
}
