//
// symbols.rs
//
// Definition and use extraction for bash scripts
//

use std::collections::HashSet;

use tree_sitter::Node;

use crate::position::{Position, Span};
use crate::script::{assignment_name, expansion_variable, node_text, Script};

/// Stable handle for a function declaration: its name plus the span of the
/// whole declaration. Survives re-parsing and compares across files by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKeyword {
    Local,
    Declare,
    Typeset,
}

impl DeclarationKeyword {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "local" => Some(Self::Local),
            "declare" => Some(Self::Declare),
            "typeset" => Some(Self::Typeset),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Declare => "declare",
            Self::Typeset => "typeset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionKind {
    /// `name=value`, including `export`/`readonly` forms and command prefixes.
    Assignment,
    /// `local`, `declare` or `typeset`.
    Declaration(DeclarationKeyword),
    /// `name() { ... }`; `body` covers the whole declaration.
    Function { body: Span },
    /// `for x in ...` or the initializer target of `for ((x=0; ...))`.
    LoopVariable { c_style: bool },
    /// A variable filled by `read`.
    ReadTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    /// Span of the name token only.
    pub span: Span,
    /// Smallest enclosing function. Always `None` for function declarations.
    pub owner: Option<FunctionRef>,
    pub is_scoped: bool,
    pub kind: DefinitionKind,
}

impl Definition {
    /// Identity used for "same definition" checks: start position and name.
    pub fn key(&self) -> (Position, &str) {
        (self.span.start, self.name.as_str())
    }

    pub fn is_same(&self, other: &Definition) -> bool {
        self.key() == other.key()
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, DefinitionKind::Function { .. })
    }

    pub fn as_use(&self) -> Use {
        Use {
            name: self.name.clone(),
            span: self.span,
            owner: self.owner.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Use {
    pub name: String,
    pub span: Span,
    pub owner: Option<FunctionRef>,
}

/// One identifier occurrence, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occurrence {
    Definition(Definition),
    Use(Use),
}

/// Walk `script` once and return every definition and use in source order.
pub fn occurrences(script: &Script) -> Vec<Occurrence> {
    let mut extractor = Extractor {
        text: script.text(),
        consumed: HashSet::new(),
        claimed: HashSet::new(),
        out: Vec::new(),
    };
    extractor.visit(script.root(), None, false);
    extractor.out
}

pub fn collect_definitions(script: &Script) -> Vec<Definition> {
    definitions_from(&occurrences(script))
}

pub fn collect_uses(script: &Script, include_declarations: bool) -> Vec<Use> {
    uses_from(&occurrences(script), include_declarations)
}

pub fn definitions_from(occurrences: &[Occurrence]) -> Vec<Definition> {
    occurrences
        .iter()
        .filter_map(|o| match o {
            Occurrence::Definition(d) => Some(d.clone()),
            Occurrence::Use(_) => None,
        })
        .collect()
}

pub fn uses_from(occurrences: &[Occurrence], include_declarations: bool) -> Vec<Use> {
    occurrences
        .iter()
        .filter_map(|o| match o {
            Occurrence::Use(u) => Some(u.clone()),
            Occurrence::Definition(d) if include_declarations => Some(d.as_use()),
            Occurrence::Definition(_) => None,
        })
        .collect()
}

/// Whether `name` is a valid shell variable name.
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The node kinds extraction cares about.
enum NodeClass {
    Function,
    Assignment,
    ScopedDeclaration(DeclarationKeyword),
    ForLoop,
    CStyleFor,
    Command,
    Expansion,
    Arithmetic,
    Substitution,
    Name,
    Other,
}

fn classify(node: Node) -> NodeClass {
    match node.kind() {
        "function_definition" => NodeClass::Function,
        "variable_assignment" => NodeClass::Assignment,
        "declaration_command" => node
            .child(0)
            .and_then(|keyword| DeclarationKeyword::from_keyword(keyword.kind()))
            .map(NodeClass::ScopedDeclaration)
            .unwrap_or(NodeClass::Other),
        "for_statement" => NodeClass::ForLoop,
        "c_style_for_statement" => NodeClass::CStyleFor,
        "command" => NodeClass::Command,
        "simple_expansion" | "expansion" => NodeClass::Expansion,
        "arithmetic_expansion" => NodeClass::Arithmetic,
        "compound_statement" | "test_command"
            if node.child(0).map(|c| c.kind()) == Some("((") =>
        {
            NodeClass::Arithmetic
        }
        "command_substitution" | "process_substitution" => NodeClass::Substitution,
        "variable_name" | "word" => NodeClass::Name,
        _ => NodeClass::Other,
    }
}

/// Options of `read` that consume the following argument.
const READ_OPTIONS_WITH_VALUE: &[char] = &['d', 'i', 'n', 'N', 'p', 't', 'u'];

struct Extractor<'a> {
    text: &'a str,
    /// `(start, name)` of names already recorded by a declaration form, so the
    /// generic assignment rule does not record them again.
    consumed: HashSet<(Position, String)>,
    /// Node ids already recorded as a definition or use.
    claimed: HashSet<usize>,
    out: Vec<Occurrence>,
}

impl<'a> Extractor<'a> {
    fn visit(&mut self, node: Node, owner: Option<&FunctionRef>, arithmetic: bool) {
        match classify(node) {
            NodeClass::Function => {
                let Some(name) = node.child_by_field_name("name") else {
                    return self.visit_children(node, owner, arithmetic);
                };
                let span = Span::of_node(node);
                let function = FunctionRef {
                    name: self.text_of(name).to_string(),
                    span,
                };
                self.claimed.insert(name.id());
                self.define(name, None, false, DefinitionKind::Function { body: span });
                return self.visit_children(node, Some(&function), false);
            }
            NodeClass::Assignment => {
                if let Some(name) = node.child_by_field_name("name").and_then(assignment_name) {
                    let key = (Span::of_node(name).start, self.text_of(name).to_string());
                    if !self.consumed.contains(&key) {
                        self.define(name, owner, false, DefinitionKind::Assignment);
                    }
                }
            }
            NodeClass::ScopedDeclaration(keyword) => {
                let mut walker = node.walk();
                let names: Vec<Node> = node
                    .named_children(&mut walker)
                    .filter_map(|arg| match arg.kind() {
                        "variable_assignment" => {
                            arg.child_by_field_name("name").and_then(assignment_name)
                        }
                        "variable_name" => Some(arg),
                        _ => None,
                    })
                    .collect();
                for name in names {
                    self.consume(name);
                    self.define(
                        name,
                        owner,
                        owner.is_some(),
                        DefinitionKind::Declaration(keyword),
                    );
                }
            }
            NodeClass::ForLoop => {
                if let Some(var) = node
                    .child_by_field_name("variable")
                    .filter(|v| self.is_name(*v))
                {
                    self.define(
                        var,
                        owner,
                        owner.is_some(),
                        DefinitionKind::LoopVariable { c_style: false },
                    );
                }
            }
            NodeClass::CStyleFor => {
                if let Some(var) = c_style_initializer(node).filter(|v| self.is_name(*v)) {
                    self.consume(var);
                    self.define(
                        var,
                        owner,
                        owner.is_some(),
                        DefinitionKind::LoopVariable { c_style: true },
                    );
                }
                let body = node.child_by_field_name("body").map(|b| b.id());
                let mut walker = node.walk();
                let children: Vec<Node> = node.children(&mut walker).collect();
                for child in children {
                    let in_header = Some(child.id()) != body;
                    self.visit(child, owner, in_header);
                }
                return;
            }
            NodeClass::Command => self.visit_command(node, owner),
            NodeClass::Expansion => {
                if let Some(var) = expansion_variable(node).filter(|v| self.is_name(*v)) {
                    self.record_use(var, owner);
                }
            }
            NodeClass::Arithmetic => return self.visit_children(node, owner, true),
            NodeClass::Substitution => return self.visit_children(node, owner, false),
            NodeClass::Name => {
                if arithmetic && !self.claimed.contains(&node.id()) && self.is_name(node) {
                    self.record_use(node, owner);
                }
            }
            NodeClass::Other => {}
        }

        self.visit_children(node, owner, arithmetic);
    }

    fn visit_children(&mut self, node: Node, owner: Option<&FunctionRef>, arithmetic: bool) {
        let mut walker = node.walk();
        let children: Vec<Node> = node.children(&mut walker).collect();
        for child in children {
            self.visit(child, owner, arithmetic);
        }
    }

    fn visit_command(&mut self, node: Node, owner: Option<&FunctionRef>) {
        let Some(head) = node
            .child_by_field_name("name")
            .and_then(|name| name.named_child(0))
            .filter(|word| word.kind() == "word")
        else {
            return;
        };

        let head_text = self.text_of(head);
        if head_text == "read" {
            let mut walker = node.walk();
            let args: Vec<Node> = node
                .children_by_field_name("argument", &mut walker)
                .collect();
            for target in read_targets(&args, self.text) {
                self.define(target, owner, owner.is_some(), DefinitionKind::ReadTarget);
            }
        } else if !head_text.is_empty() {
            self.record_use(head, owner);
        }
    }

    fn define(
        &mut self,
        name: Node,
        owner: Option<&FunctionRef>,
        is_scoped: bool,
        kind: DefinitionKind,
    ) {
        self.claimed.insert(name.id());
        self.out.push(Occurrence::Definition(Definition {
            name: self.text_of(name).to_string(),
            span: Span::of_node(name),
            owner: owner.cloned(),
            is_scoped,
            kind,
        }));
    }

    fn record_use(&mut self, name: Node, owner: Option<&FunctionRef>) {
        self.claimed.insert(name.id());
        self.out.push(Occurrence::Use(Use {
            name: self.text_of(name).to_string(),
            span: Span::of_node(name),
            owner: owner.cloned(),
        }));
    }

    fn consume(&mut self, name: Node) {
        self.consumed
            .insert((Span::of_node(name).start, self.text_of(name).to_string()));
    }

    fn is_name(&self, node: Node) -> bool {
        is_variable_name(self.text_of(node))
    }

    fn text_of(&self, node: Node) -> &'a str {
        node_text(node, self.text)
    }
}

/// Target of the first initializer in `for ((x=0; ...))`. Older grammars
/// produce `binary_expression` with `=` instead of `variable_assignment`.
fn c_style_initializer(node: Node) -> Option<Node> {
    let init = node.child_by_field_name("initializer")?;
    match init.kind() {
        "variable_assignment" => init.child_by_field_name("name").and_then(assignment_name),
        "binary_expression" => {
            let op = init.child_by_field_name("operator")?;
            if op.kind() != "=" {
                return None;
            }
            init.child_by_field_name("left")
                .filter(|left| matches!(left.kind(), "word" | "variable_name"))
        }
        _ => None,
    }
}

/// The variable-name arguments of a `read` invocation, skipping options and
/// option values. The argument after `-a` names an array and counts.
fn read_targets<'t>(args: &[Node<'t>], text: &str) -> Vec<Node<'t>> {
    let mut targets = Vec::new();
    let mut skip_next = false;
    let mut options_done = false;

    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        let arg_text = node_text(*arg, text);

        if !options_done && arg.kind() == "word" && arg_text.starts_with('-') {
            if arg_text == "--" {
                options_done = true;
                continue;
            }
            let flags: Vec<char> = arg_text.chars().skip(1).collect();
            for (i, flag) in flags.iter().enumerate() {
                let has_inline_value = i + 1 < flags.len();
                if *flag == 'a' {
                    // `-a name`: the next argument is the target
                    break;
                }
                if READ_OPTIONS_WITH_VALUE.contains(flag) {
                    skip_next = !has_inline_value;
                    break;
                }
            }
            continue;
        }

        if arg.kind() == "word" && is_variable_name(arg_text) {
            targets.push(*arg);
        }
    }

    targets
}
