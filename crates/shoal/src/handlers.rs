//
// handlers.rs
//
// LSP feature handlers
//

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tower_lsp::lsp_types::*;

use crate::builtins::{collides_with_command, BASH_BUILTINS};
use crate::cross_file::{
    base_dir_of, path_to_uri, resolve_source_path, source_statement_at, uri_to_path,
    ContentProvider, FileReferences, Resolver,
};
use crate::position::{Cursor, Span};
use crate::reserved_words::{is_reserved_word, RESERVED_WORDS};
use crate::scope::FileScope;
use crate::script::{ParseError, Script};
use crate::state::WorldState;
use crate::symbols::{is_variable_name, Definition, DefinitionKind};
use crate::utf16::{utf16_column_to_byte_offset, LineIndex};

// ============================================================================
// Request Context
// ============================================================================

/// The parsed document behind a positional request.
struct DocumentRequest<'s> {
    script: &'s Script,
    path: PathBuf,
    cursor: Cursor,
    index: LineIndex<'s>,
}

/// Documents that are closed, not `file://`, or do not currently parse yield
/// `None`: symbol operations on them have nothing to show.
fn document_request<'s>(
    state: &'s WorldState,
    uri: &Url,
    position: Position,
) -> Option<DocumentRequest<'s>> {
    let doc = state.get_document(uri)?;
    let script = doc.parsed()?;
    let path = uri_to_path(uri)?;
    let index = LineIndex::new(script.text());
    let cursor = index.cursor(position);
    Some(DocumentRequest {
        script,
        path,
        cursor,
        index,
    })
}

/// Text of `path` for range conversion: the request's own script when it is
/// the same file, otherwise whatever the provider has.
fn text_for(request: &DocumentRequest, provider: &dyn ContentProvider, path: &Path) -> Option<String> {
    if path == request.path {
        return Some(request.script.text().to_string());
    }
    provider.get_content(path)
}

fn locations_for(
    request: &DocumentRequest,
    provider: &dyn ContentProvider,
    references: &FileReferences,
) -> Vec<Location> {
    let mut locations = Vec::new();
    for (path, uses) in references {
        let (Some(uri), Some(text)) = (path_to_uri(path), text_for(request, provider, path)) else {
            log::warn!("Dropping references in unreadable file {}", path.display());
            continue;
        };
        let index = LineIndex::new(&text);
        locations.extend(uses.iter().map(|u| Location {
            uri: uri.clone(),
            range: index.range(u.span),
        }));
    }
    locations
}

// ============================================================================
// Goto Definition
// ============================================================================

/// Definition of the identifier under the cursor, in this file or in a file
/// it sources. On the target of a `source` statement, jumps to that file.
pub fn goto_definition(
    state: &WorldState,
    uri: &Url,
    position: Position,
) -> Option<GotoDefinitionResponse> {
    let request = document_request(state, uri, position)?;
    let provider = state.content_provider();
    let resolver = Resolver::new(&state.env, &provider);

    if let Some(statement) = source_statement_at(request.script, &state.env, request.cursor) {
        let target = resolve_source_path(&statement.path, &base_dir_of(&request.path))?;
        if !provider.exists(&target) {
            log::trace!("Source target {} does not exist", target.display());
            return None;
        }
        return Some(GotoDefinitionResponse::Scalar(Location {
            uri: path_to_uri(&target)?,
            range: Range::default(),
        }));
    }

    let resolved = resolver.resolve_definition(&request.path, request.script, request.cursor)?;
    let text = text_for(&request, &provider, &resolved.path)?;
    let index = LineIndex::new(&text);

    Some(GotoDefinitionResponse::Scalar(Location {
        uri: path_to_uri(&resolved.path)?,
        range: index.range(resolved.definition.span),
    }))
}

// ============================================================================
// References
// ============================================================================

pub fn references(
    state: &WorldState,
    uri: &Url,
    position: Position,
    include_declaration: bool,
) -> Option<Vec<Location>> {
    let request = document_request(state, uri, position)?;
    let provider = state.content_provider();
    let resolver = Resolver::new(&state.env, &provider);

    let found = resolver.find_references(
        &request.path,
        request.script,
        request.cursor,
        include_declaration,
        state.workspace_candidates(),
    );
    if found.is_empty() {
        return None;
    }

    Some(locations_for(&request, &provider, &found))
}

// ============================================================================
// Rename
// ============================================================================

/// Why a rename was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameRejection {
    /// The identifier is a builtin or an executable on `PATH`.
    Command(String),
    /// The new name is a shell keyword.
    Keyword(String),
    /// The new name is not a valid variable or function name.
    InvalidName(String),
}

impl fmt::Display for RenameRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(name) => write!(f, "`{}` is a builtin or external command", name),
            Self::Keyword(name) => write!(f, "`{}` is a reserved word", name),
            Self::InvalidName(name) => write!(f, "`{}` is not a valid name", name),
        }
    }
}

impl std::error::Error for RenameRejection {}

/// Whether `name` may name a function. Bash accepts more than variable
/// names here; `-`, `.` and `:` are common in library prefixes.
pub fn is_function_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

pub fn validate_new_name(new_name: &str, is_function: bool) -> Result<(), RenameRejection> {
    if is_reserved_word(new_name) {
        return Err(RenameRejection::Keyword(new_name.to_string()));
    }
    let valid = if is_function {
        is_function_name(new_name)
    } else {
        is_variable_name(new_name)
    };
    if !valid {
        return Err(RenameRejection::InvalidName(new_name.to_string()));
    }
    Ok(())
}

pub fn prepare_rename(
    state: &WorldState,
    uri: &Url,
    position: Position,
) -> Option<PrepareRenameResponse> {
    let request = document_request(state, uri, position)?;
    let (name, span) = request.script.identifier_at(request.cursor)?;

    if is_reserved_word(&name) || collides_with_command(&name, &state.path_executables) {
        log::trace!("Refusing to rename command '{}'", name);
        return None;
    }

    Some(PrepareRenameResponse::RangeWithPlaceholder {
        range: request.index.range(span),
        placeholder: name,
    })
}

pub fn rename(
    state: &WorldState,
    uri: &Url,
    position: Position,
    new_name: &str,
) -> Result<Option<WorkspaceEdit>, RenameRejection> {
    let Some(request) = document_request(state, uri, position) else {
        return Ok(None);
    };
    let Some((name, _)) = request.script.identifier_at(request.cursor) else {
        return Ok(None);
    };
    if collides_with_command(&name, &state.path_executables) {
        return Err(RenameRejection::Command(name));
    }

    let provider = state.content_provider();
    let resolver = Resolver::new(&state.env, &provider);

    let is_function = resolver
        .resolve_definition(&request.path, request.script, request.cursor)
        .map(|r| r.definition.is_function())
        .unwrap_or_else(|| !is_variable_name(&name));
    validate_new_name(new_name, is_function)?;

    let found = resolver.find_references(
        &request.path,
        request.script,
        request.cursor,
        true,
        state.workspace_candidates(),
    );
    if found.is_empty() {
        return Ok(None);
    }

    let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
    for location in locations_for(&request, &provider, &found) {
        changes.entry(location.uri).or_default().push(TextEdit {
            range: location.range,
            new_text: new_name.to_string(),
        });
    }

    log::info!(
        "Renaming '{}' to '{}' across {} file(s)",
        name,
        new_name,
        changes.len()
    );
    Ok(Some(WorkspaceEdit {
        changes: Some(changes),
        ..Default::default()
    }))
}

// ============================================================================
// Document Symbols
// ============================================================================

pub fn document_symbol(state: &WorldState, uri: &Url) -> Option<DocumentSymbolResponse> {
    let doc = state.get_document(uri)?;
    let script = doc.parsed()?;
    let scope = FileScope::new(script);
    let index = LineIndex::new(script.text());

    Some(DocumentSymbolResponse::Nested(collect_symbols(&scope, &index)))
}

/// Functions with their scoped variables as children, plus each global
/// variable once at its first definition. In source order.
fn collect_symbols(scope: &FileScope, index: &LineIndex) -> Vec<DocumentSymbol> {
    let mut symbols = Vec::new();
    let mut seen_globals = HashSet::new();

    for def in scope.definitions() {
        match &def.kind {
            DefinitionKind::Function { body } => {
                let mut seen_locals = HashSet::new();
                let children: Vec<DocumentSymbol> = scope
                    .definitions()
                    .iter()
                    .filter(|d| d.is_scoped && d.owner.as_ref().is_some_and(|o| o.span == *body))
                    .filter(|d| seen_locals.insert(d.name.clone()))
                    .map(|d| make_symbol(d, SymbolKind::VARIABLE, d.span, index, None))
                    .collect();
                symbols.push(make_symbol(def, SymbolKind::FUNCTION, *body, index, Some(children)));
            }
            _ if def.is_scoped => {}
            _ => {
                if seen_globals.insert(def.name.clone()) {
                    symbols.push(make_symbol(def, SymbolKind::VARIABLE, def.span, index, None));
                }
            }
        }
    }

    symbols
}

#[allow(deprecated)]
fn make_symbol(
    def: &Definition,
    kind: SymbolKind,
    full: Span,
    index: &LineIndex,
    children: Option<Vec<DocumentSymbol>>,
) -> DocumentSymbol {
    DocumentSymbol {
        name: def.name.clone(),
        detail: definition_detail(def),
        kind,
        tags: None,
        deprecated: None,
        range: index.range(full),
        selection_range: index.range(def.span),
        children: children.filter(|c| !c.is_empty()),
    }
}

fn definition_detail(def: &Definition) -> Option<String> {
    match &def.kind {
        DefinitionKind::Declaration(keyword) => Some(keyword.as_str().to_string()),
        DefinitionKind::LoopVariable { .. } => Some("for".to_string()),
        DefinitionKind::ReadTarget => Some("read".to_string()),
        DefinitionKind::Assignment | DefinitionKind::Function { .. } => None,
    }
}

// ============================================================================
// Workspace Symbols
// ============================================================================

/// Global definitions across workspace scripts and open documents whose name
/// contains `query`, ignoring case.
#[allow(deprecated)]
pub fn workspace_symbol(state: &WorldState, query: &str) -> Vec<SymbolInformation> {
    let provider = state.content_provider();
    let query = query.to_lowercase();

    let mut paths: Vec<PathBuf> = state.workspace_scripts.clone();
    paths.extend(state.documents.keys().filter_map(uri_to_path));
    paths.sort();
    paths.dedup();

    let mut symbols = Vec::new();
    for path in paths {
        let Some(text) = provider.get_content(&path) else {
            continue;
        };
        let Ok(script) = Script::parse(&text) else {
            continue;
        };
        let Some(uri) = path_to_uri(&path) else {
            continue;
        };
        let scope = FileScope::new(&script);
        let index = LineIndex::new(&text);

        let mut seen = HashSet::new();
        for def in scope.definitions().iter().filter(|d| !d.is_scoped) {
            if !def.name.to_lowercase().contains(&query) || !seen.insert(def.name.as_str()) {
                continue;
            }
            let kind = if def.is_function() {
                SymbolKind::FUNCTION
            } else {
                SymbolKind::VARIABLE
            };
            symbols.push(SymbolInformation {
                name: def.name.clone(),
                kind,
                tags: None,
                deprecated: None,
                location: Location {
                    uri: uri.clone(),
                    range: index.range(def.span),
                },
                container_name: None,
            });
        }
    }

    symbols
}

// ============================================================================
// Completion
// ============================================================================

/// Whether the text before the cursor is a parameter expansion being typed:
/// `$`, `${`, optionally followed by part of a name.
fn in_parameter_expansion(line: &str, byte_col: usize) -> bool {
    let before = line.get(..byte_col).unwrap_or(line);
    let stem = before.trim_end_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    stem.ends_with('$')
}

fn completion_item(label: &str, kind: CompletionItemKind, detail: Option<String>) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        kind: Some(kind),
        detail,
        ..Default::default()
    }
}

/// Variables after `$`/`${`: definitions visible from the cursor in this file
/// and its source closure, then environment variables. Elsewhere: keywords,
/// functions, builtins and `PATH` executables. A document that does not
/// parse still gets the names that need no syntax tree.
pub fn completion(
    state: &WorldState,
    uri: &Url,
    position: Position,
    trigger: Option<&str>,
) -> Option<CompletionResponse> {
    let doc = state.get_document(uri)?;
    let line = doc.line_text(position.line as usize);
    let byte_col = utf16_column_to_byte_offset(&line, position.character);
    let variables = trigger == Some("$") || in_parameter_expansion(&line, byte_col);

    let mut definitions: Vec<Definition> = Vec::new();
    if let (Some(script), Some(path)) = (doc.parsed(), uri_to_path(uri)) {
        let scope = FileScope::new(script);
        let cursor = LineIndex::new(script.text()).cursor(position);
        let enclosing = scope.enclosing_function(cursor).map(|f| f.name);
        let visible = |d: &&Definition| {
            !d.is_scoped || d.owner.as_ref().map(|o| &o.name) == enclosing.as_ref()
        };
        definitions.extend(scope.definitions().iter().filter(visible).cloned());

        let provider = state.content_provider();
        let resolver = Resolver::new(&state.env, &provider);
        let closure = resolver.source_closure(script, &base_dir_of(&path), &mut HashSet::new());
        for file in closure.iter().filter(|f| f.path != path) {
            if let Some(parsed) = &file.parsed {
                definitions.extend(parsed.scope.definitions().iter().filter(|d| !d.is_scoped).cloned());
            }
        }
    }

    let mut seen = HashSet::new();
    let mut items = Vec::new();

    if variables {
        for def in definitions.iter().filter(|d| !d.is_function()) {
            if seen.insert(def.name.clone()) {
                items.push(completion_item(&def.name, CompletionItemKind::VARIABLE, definition_detail(def)));
            }
        }
        let mut env: Vec<(&String, &String)> = state.env.iter().collect();
        env.sort();
        for (name, value) in env {
            if seen.insert(name.clone()) {
                items.push(completion_item(name, CompletionItemKind::CONSTANT, Some(value.clone())));
            }
        }
    } else {
        for keyword in RESERVED_WORDS {
            if seen.insert(keyword.to_string()) {
                items.push(completion_item(keyword, CompletionItemKind::KEYWORD, None));
            }
        }
        for def in definitions.iter().filter(|d| d.is_function()) {
            if seen.insert(def.name.clone()) {
                items.push(completion_item(&def.name, CompletionItemKind::FUNCTION, None));
            }
        }
        for builtin in BASH_BUILTINS {
            if seen.insert(builtin.to_string()) {
                items.push(completion_item(builtin, CompletionItemKind::FUNCTION, Some("builtin".to_string())));
            }
        }
        let mut executables: Vec<&String> = state.path_executables.iter().collect();
        executables.sort();
        for name in executables {
            if seen.insert(name.clone()) {
                items.push(completion_item(name, CompletionItemKind::FUNCTION, Some("executable".to_string())));
            }
        }
    }

    log::trace!("Completion at {}:{}: {} item(s)", uri, position.line, items.len());
    Some(CompletionResponse::Array(items))
}

// ============================================================================
// Hover
// ============================================================================

/// Where the identifier under the cursor is defined. Functions also show
/// their source text. On a `source` target, the resolved path.
pub fn hover(state: &WorldState, uri: &Url, position: Position) -> Option<Hover> {
    let request = document_request(state, uri, position)?;
    let provider = state.content_provider();

    if let Some(statement) = source_statement_at(request.script, &state.env, request.cursor) {
        let target = resolve_source_path(&statement.path, &base_dir_of(&request.path))?;
        let status = if provider.exists(&target) { "" } else { " (missing)" };
        return Some(markdown_hover(
            format!("`{}`{}", target.display(), status),
            request.index.range(statement.path_span),
        ));
    }

    let (_, span) = request.script.identifier_at(request.cursor)?;
    let resolver = Resolver::new(&state.env, &provider);
    let resolved = resolver.resolve_definition(&request.path, request.script, request.cursor)?;
    let definition = &resolved.definition;

    let line = definition.span.start.line;
    let location = if resolved.path == request.path {
        format!("defined at line **{}**", line)
    } else {
        format!("defined at `{}` line **{}**", resolved.path.display(), line)
    };

    let value = match &definition.kind {
        DefinitionKind::Function { body } => {
            let text = text_for(&request, &provider, &resolved.path)?;
            let first = body.start.line.saturating_sub(1) as usize;
            let count = (body.end.line.saturating_sub(body.start.line) + 1) as usize;
            let snippet: Vec<&str> = text.lines().skip(first).take(count).collect();
            format!("```sh\n{}\n```\n\n({})", snippet.join("\n"), location)
        }
        _ => match definition_detail(definition) {
            Some(detail) => format!("`{}`, {}", detail, location),
            None => location,
        },
    };

    Some(markdown_hover(value, request.index.range(span)))
}

fn markdown_hover(value: String, range: Range) -> Hover {
    Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range: Some(range),
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Parse error, or `source` statements naming files that do not exist.
pub fn diagnostics(state: &WorldState, uri: &Url) -> Vec<Diagnostic> {
    let Some(doc) = state.get_document(uri) else {
        return Vec::new();
    };
    let path = uri_to_path(uri);
    diagnostics_for(state, path.as_deref(), &doc.script, |line| doc.line_text(line))
}

/// Diagnostics for workspace scripts that are not open, read through the
/// content provider. Files without findings are left out.
pub fn workspace_diagnostics(state: &WorldState) -> Vec<(Url, Vec<Diagnostic>)> {
    let provider = state.content_provider();
    let found: Vec<(Url, Vec<Diagnostic>)> = state
        .workspace_scripts
        .iter()
        .filter(|path| !provider.is_open(path))
        .filter_map(|path| {
            let text = provider.get_content(path)?;
            let uri = path_to_uri(path)?;
            let script = Script::parse(&text);
            let line_text = |line: usize| text.lines().nth(line).unwrap_or("").to_string();
            let diagnostics = diagnostics_for(state, Some(path), &script, line_text);
            (!diagnostics.is_empty()).then_some((uri, diagnostics))
        })
        .collect();

    log::info!("Workspace diagnostics: {} file(s) with findings", found.len());
    found
}

fn diagnostics_for(
    state: &WorldState,
    path: Option<&Path>,
    parsed: &Result<Script, ParseError>,
    line_text: impl Fn(usize) -> String,
) -> Vec<Diagnostic> {
    let script = match parsed {
        Ok(script) => script,
        Err(err) => {
            let line = err.position.line.saturating_sub(1) as usize;
            let line_text = line_text(line);
            let index = LineIndex::new(&line_text);
            let mut start = index.lsp_position(crate::position::Position::new(1, err.position.column));
            start.line = line as u32;
            return vec![Diagnostic {
                range: Range::new(start, start),
                severity: Some(DiagnosticSeverity::ERROR),
                source: Some("shoal".to_string()),
                message: err.message.clone(),
                ..Default::default()
            }];
        }
    };

    let Some(path) = path else {
        return Vec::new();
    };
    let provider = state.content_provider();
    let resolver = Resolver::new(&state.env, &provider);
    let index = LineIndex::new(script.text());

    resolver
        .missing_sources(script, &base_dir_of(path))
        .into_iter()
        .map(|(statement, target)| Diagnostic {
            range: index.range(statement.path_span),
            severity: Some(state.config.missing_source_severity),
            source: Some("shoal".to_string()),
            message: format!("File `{}` does not exist", target.display()),
            ..Default::default()
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_file::Env;

    struct Workspace {
        _dir: tempfile::TempDir,
        root: PathBuf,
        state: WorldState,
    }

    impl Workspace {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            for (name, content) in files {
                let path = root.join(name);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&path, content).unwrap();
            }
            let mut state = WorldState::new(Env::new());
            state.workspace_scripts = files.iter().map(|(name, _)| root.join(name)).collect();
            state.workspace_scripts.sort();
            Self {
                _dir: dir,
                root,
                state,
            }
        }

        fn uri(&self, name: &str) -> Url {
            Url::from_file_path(self.root.join(name)).unwrap()
        }

        /// Open `name` with its on-disk content.
        fn open(&mut self, name: &str) -> Url {
            let uri = self.uri(name);
            let text = std::fs::read_to_string(self.root.join(name)).unwrap();
            self.state.open_document(uri.clone(), &text, Some(1));
            uri
        }
    }

    fn lines_of(locations: &[Location], uri: &Url) -> Vec<u32> {
        locations
            .iter()
            .filter(|l| &l.uri == uri)
            .map(|l| l.range.start.line)
            .collect()
    }

    #[test]
    fn test_goto_definition_local_shadow() {
        let mut ws = Workspace::new(&[(
            "main.sh",
            "x=0\nf() {\n  local x=1\n  echo $x\n}\necho $x\n",
        )]);
        let uri = ws.open("main.sh");

        let Some(GotoDefinitionResponse::Scalar(loc)) =
            goto_definition(&ws.state, &uri, Position::new(3, 8))
        else {
            panic!("expected a definition");
        };
        assert_eq!(loc.uri, uri);
        assert_eq!(loc.range.start, Position::new(2, 8));

        let Some(GotoDefinitionResponse::Scalar(loc)) =
            goto_definition(&ws.state, &uri, Position::new(5, 6))
        else {
            panic!("expected a definition");
        };
        assert_eq!(loc.range.start, Position::new(0, 0));
    }

    #[test]
    fn test_goto_definition_across_source() {
        let mut ws = Workspace::new(&[
            ("main.sh", "source lib/util.sh\nhelper\n"),
            ("lib/util.sh", "\nhelper() {\n  :\n}\n"),
        ]);
        let uri = ws.open("main.sh");

        let Some(GotoDefinitionResponse::Scalar(loc)) =
            goto_definition(&ws.state, &uri, Position::new(1, 2))
        else {
            panic!("expected a definition");
        };
        assert_eq!(loc.uri, ws.uri("lib/util.sh"));
        assert_eq!(loc.range.start, Position::new(1, 0));
    }

    #[test]
    fn test_goto_definition_on_source_path() {
        let mut ws = Workspace::new(&[
            ("main.sh", "source lib/util.sh\nsource nope.sh\n"),
            ("lib/util.sh", "u=1\n"),
        ]);
        let uri = ws.open("main.sh");

        let Some(GotoDefinitionResponse::Scalar(loc)) =
            goto_definition(&ws.state, &uri, Position::new(0, 10))
        else {
            panic!("expected a definition");
        };
        assert_eq!(loc.uri, ws.uri("lib/util.sh"));
        assert_eq!(loc.range, Range::default());

        assert!(goto_definition(&ws.state, &uri, Position::new(1, 9)).is_none());
    }

    #[test]
    fn test_references_include_declaration_flag() {
        let mut ws = Workspace::new(&[("main.sh", "n=1\necho $n\necho ${n}\n")]);
        let uri = ws.open("main.sh");

        let with = references(&ws.state, &uri, Position::new(1, 6), true).unwrap();
        assert_eq!(lines_of(&with, &uri), vec![0, 1, 2]);

        let without = references(&ws.state, &uri, Position::new(1, 6), false).unwrap();
        assert_eq!(lines_of(&without, &uri), vec![1, 2]);
    }

    #[test]
    fn test_references_reach_sourcing_files() {
        let mut ws = Workspace::new(&[
            ("lib.sh", "log_msg() {\n  echo \"$1\"\n}\n"),
            ("main.sh", "source ./lib.sh\nlog_msg start\n"),
            ("other.sh", "log_msg unrelated\n"),
        ]);
        let lib = ws.open("lib.sh");

        let found = references(&ws.state, &lib, Position::new(0, 2), true).unwrap();
        assert_eq!(lines_of(&found, &lib), vec![0]);
        assert_eq!(lines_of(&found, &ws.uri("main.sh")), vec![1]);
        assert!(lines_of(&found, &ws.uri("other.sh")).is_empty());

        ws.state.config.workspace_references = false;
        let found = references(&ws.state, &lib, Position::new(0, 2), true).unwrap();
        assert!(lines_of(&found, &ws.uri("main.sh")).is_empty());
    }

    #[test]
    fn test_open_document_overrides_disk_for_sourced_file() {
        let mut ws = Workspace::new(&[("main.sh", "source lib.sh\necho $v\n"), ("lib.sh", "w=1\n")]);
        let main = ws.open("main.sh");
        let lib = ws.uri("lib.sh");
        ws.state.open_document(lib.clone(), "\nv=2\n", Some(1));

        let Some(GotoDefinitionResponse::Scalar(loc)) =
            goto_definition(&ws.state, &main, Position::new(1, 6))
        else {
            panic!("expected a definition");
        };
        assert_eq!(loc.uri, lib);
        assert_eq!(loc.range.start.line, 1);
    }

    #[test]
    fn test_rename_across_files() {
        let mut ws = Workspace::new(&[
            ("main.sh", "source lib.sh\nCOUNT=1\nbump\n"),
            ("lib.sh", "bump() {\n  COUNT=$((COUNT + 1))\n}\n"),
        ]);
        let uri = ws.open("main.sh");

        let edit = rename(&ws.state, &uri, Position::new(1, 1), "TOTAL")
            .unwrap()
            .unwrap();
        let changes = edit.changes.unwrap();
        assert_eq!(changes[&uri].len(), 1);
        assert_eq!(changes[&ws.uri("lib.sh")].len(), 2);
        assert!(changes.values().flatten().all(|e| e.new_text == "TOTAL"));
    }

    #[test]
    fn test_rename_rejections() {
        let mut ws = Workspace::new(&[("main.sh", "v=1\necho $v\nf() { :; }\n")]);
        let uri = ws.open("main.sh");

        assert_eq!(
            rename(&ws.state, &uri, Position::new(1, 1), "x"),
            Err(RenameRejection::Command("echo".to_string()))
        );
        assert_eq!(
            rename(&ws.state, &uri, Position::new(0, 0), "fi"),
            Err(RenameRejection::Keyword("fi".to_string()))
        );
        assert_eq!(
            rename(&ws.state, &uri, Position::new(0, 0), "my-var"),
            Err(RenameRejection::InvalidName("my-var".to_string()))
        );
        assert!(rename(&ws.state, &uri, Position::new(2, 0), "lib::f")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_prepare_rename() {
        let mut ws = Workspace::new(&[("main.sh", "name=1\necho \"$name\"\n")]);
        let uri = ws.open("main.sh");

        match prepare_rename(&ws.state, &uri, Position::new(1, 8)) {
            Some(PrepareRenameResponse::RangeWithPlaceholder { range, placeholder }) => {
                assert_eq!(placeholder, "name");
                assert_eq!(range, Range::new(Position::new(1, 7), Position::new(1, 11)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(prepare_rename(&ws.state, &uri, Position::new(1, 1)).is_none());
    }

    #[test]
    fn test_document_symbols_nested() {
        let mut ws = Workspace::new(&[(
            "main.sh",
            "A=1\nA=2\nsetup() {\n  local dir tmp\n  local dir\n  B=3\n}\n",
        )]);
        let uri = ws.open("main.sh");

        let Some(DocumentSymbolResponse::Nested(symbols)) = document_symbol(&ws.state, &uri) else {
            panic!("expected nested symbols");
        };
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "setup", "B"]);

        let setup = &symbols[1];
        assert_eq!(setup.kind, SymbolKind::FUNCTION);
        assert_eq!(setup.range.start, Position::new(2, 0));
        let children: Vec<_> = setup
            .children
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(children, vec!["dir", "tmp"]);
    }

    #[test]
    fn test_workspace_symbols_filter() {
        let mut ws = Workspace::new(&[
            ("a.sh", "build_all() { :; }\nBUILD_DIR=out\n"),
            ("b.sh", "deploy() { :; }\n"),
        ]);
        ws.open("b.sh");

        let found = workspace_symbol(&ws.state, "build");
        let mut names: Vec<_> = found.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["BUILD_DIR", "build_all"]);

        assert_eq!(workspace_symbol(&ws.state, "").len(), 3);
    }

    #[test]
    fn test_diagnostics_missing_source_and_parse_error() {
        let mut ws = Workspace::new(&[
            ("main.sh", "source ./present.sh\nsource ./absent.sh\n"),
            ("present.sh", "p=1\n"),
            ("broken.sh", "x=1\nif true; then\n"),
        ]);
        let main = ws.open("main.sh");
        let diags = diagnostics(&ws.state, &main);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("absent.sh"));
        assert!(diags[0].message.ends_with("does not exist"));
        assert_eq!(diags[0].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(diags[0].range.start, Position::new(1, 7));

        let broken = ws.open("broken.sh");
        let diags = diagnostics(&ws.state, &broken);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Some(DiagnosticSeverity::ERROR));

        // Symbol operations on an unparsable document are empty
        assert!(goto_definition(&ws.state, &broken, Position::new(0, 0)).is_none());
        assert!(document_symbol(&ws.state, &broken).is_none());
    }

    #[test]
    fn test_workspace_diagnostics_cover_unopened_scripts() {
        let mut ws = Workspace::new(&[
            ("main.sh", "source ./absent.sh\n"),
            ("tool.sh", "echo start\n. ./gone.sh\n"),
            ("ok.sh", "echo fine\n"),
            ("broken.sh", "x=1\nif true; then\n"),
        ]);
        ws.open("main.sh");

        let mut found = workspace_diagnostics(&ws.state);
        found.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        let uris: Vec<&Url> = found.iter().map(|(uri, _)| uri).collect();
        assert_eq!(uris, vec![&ws.uri("broken.sh"), &ws.uri("tool.sh")]);

        let tool = &found[1].1;
        assert_eq!(tool.len(), 1);
        assert!(tool[0].message.contains("gone.sh"));
        assert_eq!(tool[0].range.start, Position::new(1, 2));
    }

    fn labels(response: Option<CompletionResponse>) -> Vec<(String, Option<CompletionItemKind>)> {
        match response {
            Some(CompletionResponse::Array(items)) => {
                items.into_iter().map(|i| (i.label, i.kind)).collect()
            }
            other => panic!("unexpected completion response: {:?}", other),
        }
    }

    fn has(items: &[(String, Option<CompletionItemKind>)], label: &str) -> bool {
        items.iter().any(|(l, _)| l == label)
    }

    #[test]
    fn test_parameter_expansion_context() {
        assert!(in_parameter_expansion("echo $", 6));
        assert!(in_parameter_expansion("echo ${fo", 9));
        assert!(in_parameter_expansion("x=$HO more", 5));
        assert!(!in_parameter_expansion("echo fo", 7));
        assert!(!in_parameter_expansion("echo $x y", 9));
    }

    #[test]
    fn test_variable_completion_respects_function_scope() {
        let mut ws = Workspace::new(&[
            (
                "main.sh",
                "source ./lib.sh\ng=1\nf() {\n  local inner=2\n  echo $in\n}\nh() { local other=3; }\n",
            ),
            ("lib.sh", "libvar=1\nlibfn() { local hidden=1; }\n"),
        ]);
        ws.state.env.insert("SHOAL_TEST".to_string(), "on".to_string());
        let uri = ws.open("main.sh");

        let items = labels(completion(&ws.state, &uri, Position::new(4, 10), None));
        for name in ["g", "inner", "libvar"] {
            assert!(
                items.contains(&(name.to_string(), Some(CompletionItemKind::VARIABLE))),
                "missing {}",
                name
            );
        }
        assert!(items.contains(&("SHOAL_TEST".to_string(), Some(CompletionItemKind::CONSTANT))));
        for name in ["other", "hidden", "f", "libfn", "if"] {
            assert!(!has(&items, name), "unexpected {}", name);
        }

        // Typing `$` elsewhere on a line still asks for variables
        let items = labels(completion(&ws.state, &uri, Position::new(1, 0), Some("$")));
        assert!(has(&items, "g"));
        assert!(!has(&items, "inner"));
    }

    #[test]
    fn test_command_completion() {
        let mut ws = Workspace::new(&[
            ("main.sh", "source ./lib.sh\ng=1\nf() { :; }\n"),
            ("lib.sh", "libfn() { :; }\n"),
        ]);
        ws.state.path_executables.insert("shoal-tool".to_string());
        let uri = ws.open("main.sh");

        let items = labels(completion(&ws.state, &uri, Position::new(1, 0), None));
        assert!(items.contains(&("if".to_string(), Some(CompletionItemKind::KEYWORD))));
        assert!(items.contains(&("f".to_string(), Some(CompletionItemKind::FUNCTION))));
        assert!(items.contains(&("libfn".to_string(), Some(CompletionItemKind::FUNCTION))));
        assert!(has(&items, "echo"));
        assert!(has(&items, "shoal-tool"));
        assert!(!has(&items, "g"));
    }

    #[test]
    fn test_completion_without_a_syntax_tree() {
        let mut ws = Workspace::new(&[("broken.sh", "if true; then\n  echo $SH\n")]);
        ws.state.env.insert("SHOAL_HOME".to_string(), "/srv".to_string());
        let uri = ws.open("broken.sh");

        let items = labels(completion(&ws.state, &uri, Position::new(1, 10), None));
        assert_eq!(items, vec![("SHOAL_HOME".to_string(), Some(CompletionItemKind::CONSTANT))]);

        let items = labels(completion(&ws.state, &uri, Position::new(1, 2), None));
        assert!(has(&items, "fi"));
    }

    fn hover_text(hover: Option<Hover>) -> String {
        match hover.map(|h| h.contents) {
            Some(HoverContents::Markup(markup)) => markup.value,
            other => panic!("unexpected hover: {:?}", other),
        }
    }

    #[test]
    fn test_hover_shows_definition_line() {
        let mut ws = Workspace::new(&[(
            "main.sh",
            "x=0\nf() {\n  local x=1\n  echo $x\n}\necho $x\n",
        )]);
        let uri = ws.open("main.sh");

        let shown = hover(&ws.state, &uri, Position::new(3, 8));
        assert_eq!(shown.as_ref().and_then(|h| h.range).map(|r| r.start.line), Some(3));
        assert_eq!(hover_text(shown), "`local`, defined at line **3**");

        assert_eq!(
            hover_text(hover(&ws.state, &uri, Position::new(5, 6))),
            "defined at line **1**"
        );
        assert!(hover(&ws.state, &uri, Position::new(3, 3)).is_none());
    }

    #[test]
    fn test_hover_shows_sourced_function_body() {
        let mut ws = Workspace::new(&[
            ("main.sh", "source lib/util.sh\nhelper\nsource ./absent.sh\n"),
            ("lib/util.sh", "\nhelper() {\n  :\n}\n"),
        ]);
        let uri = ws.open("main.sh");

        let text = hover_text(hover(&ws.state, &uri, Position::new(1, 2)));
        assert!(text.starts_with("```sh\nhelper() {\n  :\n}\n```"), "{}", text);
        assert!(text.contains("util.sh"));
        assert!(text.ends_with("line **2**)"));

        let text = hover_text(hover(&ws.state, &uri, Position::new(0, 10)));
        assert!(text.contains("util.sh") && !text.contains("(missing)"));
        let text = hover_text(hover(&ws.state, &uri, Position::new(2, 10)));
        assert!(text.ends_with("(missing)"));
    }

    #[test]
    fn test_function_name_validation() {
        assert!(is_function_name("lib::log"));
        assert!(is_function_name("do-thing"));
        assert!(is_function_name("a.b"));
        assert!(!is_function_name("1abc"));
        assert!(!is_function_name("has space"));
        assert!(validate_new_name("ok_name", false).is_ok());
        assert!(validate_new_name("lib::x", false).is_err());
    }
}
