//
// cross_file/source_detect.rs
//
// Detection of `source` and `.` statements in bash scripts
//

use tree_sitter::Node;

use crate::position::{Cursor, Span};
use crate::script::{expansion_variable, Script};

use super::Env;

/// A `source path` or `. path` statement whose target could be expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatement {
    /// Target after substitution, before resolution against a directory.
    pub path: String,
    /// Span of the whole command.
    pub span: Span,
    /// Span of the target argument.
    pub path_span: Span,
}

/// Every `source`/`.` statement in `script`, in source order. Statements whose
/// target cannot be expanded statically, or expands to nothing, are skipped.
pub fn find_source_statements(script: &Script, env: &Env) -> Vec<SourceStatement> {
    let mut statements = Vec::new();
    visit_node(script.root(), script, env, &mut statements);
    statements
}

/// The statement whose target argument is under `cursor`, if any.
pub fn source_statement_at(script: &Script, env: &Env, cursor: Cursor) -> Option<SourceStatement> {
    find_source_statements(script, env)
        .into_iter()
        .find(|s| s.path_span.contains(cursor))
}

fn visit_node(node: Node, script: &Script, env: &Env, statements: &mut Vec<SourceStatement>) {
    if node.kind() == "command" {
        if let Some(statement) = try_parse_source(node, script, env) {
            statements.push(statement);
        }
    }

    let mut walker = node.walk();
    for child in node.named_children(&mut walker) {
        visit_node(child, script, env, statements);
    }
}

fn try_parse_source(node: Node, script: &Script, env: &Env) -> Option<SourceStatement> {
    let head = node.child_by_field_name("name")?;
    let head_text = script.node_text(head);
    if head_text != "source" && head_text != "." {
        return None;
    }

    let mut walker = node.walk();
    let target = node.children_by_field_name("argument", &mut walker).next()?;

    match expand_word(target, script, env) {
        Some(path) if !path.is_empty() => Some(SourceStatement {
            path,
            span: Span::of_node(node),
            path_span: Span::of_node(target),
        }),
        _ => {
            log::trace!(
                "Skipping unresolvable source target '{}'",
                script.node_text(target)
            );
            None
        }
    }
}

/// Expand a word using only literal text and parameter substitution from
/// `env`. Unset names expand to the empty string. `${name:-word}` and the
/// other default/alternative forms pick their branch from `env`. Returns
/// `None` for anything that would need evaluation (command substitution,
/// arithmetic, globbing, pattern operators).
pub fn expand_word(node: Node, script: &Script, env: &Env) -> Option<String> {
    let mut out = String::new();
    expand_into(node, script, env, &mut out)?;

    if starts_with_unquoted_tilde(node, script) && (out == "~" || out.starts_with("~/")) {
        let home = env.get("HOME").cloned().unwrap_or_default();
        out = format!("{}{}", home, &out[1..]);
    }
    Some(out)
}

/// Tilde expansion only applies to a literal `~` at the very start of the
/// word, outside quotes.
fn starts_with_unquoted_tilde(node: Node, script: &Script) -> bool {
    let first = match node.kind() {
        "word" => node,
        "concatenation" => match node.named_child(0) {
            Some(child) if child.kind() == "word" => child,
            _ => return false,
        },
        _ => return false,
    };
    script.node_text(first).starts_with('~')
}

fn expand_into(node: Node, script: &Script, env: &Env, out: &mut String) -> Option<()> {
    match node.kind() {
        "word" | "string_content" | "number" => out.push_str(script.node_text(node)),
        "raw_string" => {
            let text = script.node_text(node);
            out.push_str(text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')).unwrap_or(text));
        }
        "simple_expansion" => {
            let name = match expansion_variable(node) {
                Some(var) if var.kind() == "variable_name" => script.node_text(var),
                Some(_) => return None,
                None => special_parameter(node, script)?,
            };
            out.push_str(env.get(name).map(String::as_str).unwrap_or(""));
        }
        "expansion" => expand_parameter(node, script, env, out)?,
        "string" | "concatenation" => {
            let mut walker = node.walk();
            for child in node.named_children(&mut walker) {
                expand_into(child, script, env, out)?;
            }
        }
        _ => return None,
    }
    Some(())
}

/// `${name}` and `${name<op>word}` for the default (`-`, `=`), alternative
/// (`+`) and error (`?`) operators, with or without the leading `:`.
/// Prefix forms (`${#name}`, `${!name}`), subscripts and pattern operators
/// are unresolvable.
fn expand_parameter(node: Node, script: &Script, env: &Env, out: &mut String) -> Option<()> {
    let mut walker = node.walk();
    let children: Vec<Node> = node.children(&mut walker).collect();

    // `${` name [operator word...] `}`
    let name = children
        .get(1)
        .filter(|c| matches!(c.kind(), "variable_name" | "special_variable_name"))?;
    let value = env.get(script.node_text(*name)).map(String::as_str);
    let operator = children.get(2).filter(|c| !c.is_named()).map(|c| c.kind())?;
    let word: Vec<Node> = children.iter().skip(3).filter(|c| c.is_named()).copied().collect();

    // With `:`, an empty value counts as unset
    let is_set = |colon: bool| match value {
        Some(v) => !(colon && v.is_empty()),
        None => false,
    };

    match operator {
        "}" => out.push_str(value.unwrap_or("")),
        ":-" | "-" | ":=" | "=" => {
            if is_set(operator.starts_with(':')) {
                out.push_str(value.unwrap_or(""));
            } else {
                for part in word {
                    expand_into(part, script, env, out)?;
                }
            }
        }
        ":+" | "+" => {
            if is_set(operator.starts_with(':')) {
                for part in word {
                    expand_into(part, script, env, out)?;
                }
            }
        }
        ":?" | "?" => {
            if !is_set(operator.starts_with(':')) {
                return None;
            }
            out.push_str(value.unwrap_or(""));
        }
        _ => return None,
    }
    Some(())
}

/// `$1`, `$@` and friends are never in the environment snapshot but are
/// still plain substitutions.
fn special_parameter<'a>(node: Node, script: &'a Script) -> Option<&'a str> {
    let mut walker = node.walk();
    let found = node
        .named_children(&mut walker)
        .find(|c| c.kind() == "special_variable_name")
        .map(|c| script.node_text(c));
    found
}
