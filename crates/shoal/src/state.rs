//
// state.rs
//
// Global LSP state management
//

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rayon::prelude::*;
use regex::Regex;
use ropey::Rope;
use tower_lsp::lsp_types::TextDocumentContentChangeEvent;
use tower_lsp::lsp_types::Url;
use walkdir::{DirEntry, WalkDir};

use crate::builtins::scan_path_executables;
use crate::config::ServerConfig;
use crate::cross_file::{
    DiagnosticsGate, DocumentContent, Env, OverlayContentProvider, RevalidationState,
};
use crate::script::{ParseError, Script};

/// An open document and its latest parse
pub struct Document {
    pub contents: Rope,
    pub script: Result<Script, ParseError>,
    pub version: Option<i32>,
    pub revision: u64,
}

impl Document {
    pub fn new(text: &str, version: Option<i32>) -> Self {
        let contents = Rope::from_str(text);
        let script = Script::parse(text);
        Self {
            contents,
            script,
            version,
            revision: 0,
        }
    }

    pub fn apply_change(&mut self, change: TextDocumentContentChangeEvent) {
        if let Some(range) = change.range {
            let start_line = range.start.line as usize;
            let start_utf16_char = range.start.character as usize;
            let end_line = range.end.line as usize;
            let end_utf16_char = range.end.character as usize;

            let start_line_text = self.line_text(start_line);
            let end_line_text = self.line_text(end_line);

            let start_char = utf16_offset_to_char_offset(&start_line_text, start_utf16_char);
            let end_char = utf16_offset_to_char_offset(&end_line_text, end_utf16_char);

            let start_idx = self.line_to_char(start_line) + start_char;
            let end_idx = self.line_to_char(end_line) + end_char;

            self.contents.remove(start_idx..end_idx.max(start_idx));
            self.contents.insert(start_idx, &change.text);
        } else {
            // Full document sync
            self.contents = Rope::from_str(&change.text);
        }

        self.revision += 1;
        self.script = Script::parse(&self.contents.to_string());
    }

    pub fn text(&self) -> String {
        self.contents.to_string()
    }

    /// Text of a 0-based line without its terminator. Out-of-range lines are
    /// empty.
    pub fn line_text(&self, line: usize) -> String {
        if line >= self.contents.len_lines() {
            return String::new();
        }
        let text = self.contents.line(line).to_string();
        text.trim_end_matches(['\n', '\r']).to_string()
    }

    fn line_to_char(&self, line: usize) -> usize {
        if line >= self.contents.len_lines() {
            return self.contents.len_chars();
        }
        self.contents.line_to_char(line)
    }

    /// The parsed script, or `None` while the text does not parse.
    pub fn parsed(&self) -> Option<&Script> {
        self.script.as_ref().ok()
    }
}

impl DocumentContent for Document {
    fn content(&self) -> String {
        self.text()
    }
}

fn utf16_offset_to_char_offset(line_text: &str, utf16_offset: usize) -> usize {
    let mut utf16_count = 0;
    let mut char_count = 0;

    for ch in line_text.chars() {
        if utf16_count >= utf16_offset {
            return char_count;
        }
        utf16_count += ch.len_utf16();
        char_count += 1;
    }
    char_count
}

pub struct WorldState {
    pub documents: HashMap<Url, Document>,

    // Workspace configuration
    pub workspace_folders: Vec<Url>,
    /// Script files found under the workspace folders, sorted
    pub workspace_scripts: Vec<PathBuf>,

    /// Environment snapshot taken at startup, used to expand `source` targets
    pub env: Env,
    /// Executable names on `PATH` at startup
    pub path_executables: HashSet<String>,

    pub config: ServerConfig,
    pub revalidation: RevalidationState,
    pub diagnostics_gate: DiagnosticsGate,
}

impl WorldState {
    pub fn new(env: Env) -> Self {
        let config = ServerConfig::default();
        log::info!("Initializing with default configuration:");
        log::info!("  exclude_dirs: {:?}", config.exclude_dirs);
        log::info!("  diagnostics_debounce_ms: {}", config.diagnostics_debounce_ms);
        log::info!("  missing_source_severity: {:?}", config.missing_source_severity);
        log::info!("  workspace_references: {}", config.workspace_references);

        let path_executables = env
            .get("PATH")
            .map(|p| scan_path_executables(p))
            .unwrap_or_default();

        Self {
            documents: HashMap::new(),
            workspace_folders: Vec::new(),
            workspace_scripts: Vec::new(),
            env,
            path_executables,
            config,
            revalidation: RevalidationState::new(),
            diagnostics_gate: DiagnosticsGate::new(),
        }
    }

    /// Content provider where open documents shadow disk.
    pub fn content_provider(&self) -> OverlayContentProvider<'_, Document> {
        OverlayContentProvider::new(&self.documents)
    }

    pub fn open_document(&mut self, uri: Url, text: &str, version: Option<i32>) {
        self.documents.insert(uri, Document::new(text, version));
    }

    pub fn close_document(&mut self, uri: &Url) {
        self.documents.remove(uri);
    }

    pub fn apply_change(&mut self, uri: &Url, change: TextDocumentContentChangeEvent) {
        if let Some(doc) = self.documents.get_mut(uri) {
            doc.apply_change(change);
        }
    }

    pub fn get_document(&self, uri: &Url) -> Option<&Document> {
        self.documents.get(uri)
    }

    /// Candidate files for workspace-wide references.
    pub fn workspace_candidates(&self) -> Option<&[PathBuf]> {
        self.config
            .workspace_references
            .then_some(self.workspace_scripts.as_slice())
    }
}

/// Find shell scripts under the workspace folders: `.sh`/`.bash` files and
/// extension-less files with a shell shebang. Excluded and hidden
/// directories are not descended into.
pub fn scan_workspace_scripts(folders: &[Url], config: &ServerConfig) -> Vec<PathBuf> {
    let mut scripts = Vec::new();
    let mut needs_shebang = Vec::new();

    for folder in folders {
        let Ok(root) = folder.to_file_path() else {
            log::warn!("Skipping non-file workspace folder: {}", folder);
            continue;
        };
        log::info!("Scanning folder: {}", root.display());

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_entry(e, config));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::trace!("Walk error under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match classify_path(entry.path()) {
                ScriptCandidate::Script => scripts.push(entry.into_path()),
                ScriptCandidate::IfShebang => needs_shebang.push(entry.into_path()),
                ScriptCandidate::No => {}
            }
        }
    }

    let sniffed: Vec<PathBuf> = needs_shebang
        .into_par_iter()
        .filter(|path| file_has_shell_shebang(path))
        .collect();
    scripts.extend(sniffed);

    scripts.sort();
    scripts.dedup();
    log::info!("Found {} shell scripts in workspace", scripts.len());
    scripts
}

fn is_skipped_entry(entry: &DirEntry, config: &ServerConfig) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() && config.is_excluded_dir(&name) {
        return true;
    }
    name.starts_with('.')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptCandidate {
    Script,
    IfShebang,
    No,
}

fn classify_path(path: &Path) -> ScriptCandidate {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("sh") || ext.eq_ignore_ascii_case("bash") => {
            ScriptCandidate::Script
        }
        Some(_) => ScriptCandidate::No,
        None => ScriptCandidate::IfShebang,
    }
}

fn shebang_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^#!\s*/(?:usr/)?(?:local/)?bin/(?:env\s+)?(?:sh|bash|dash|ksh|mksh|zsh|bats)(?:\s|$)")
            .expect("shebang pattern is valid")
    })
}

/// Whether `first_line` is a shebang for a shell this server understands.
pub fn has_shell_shebang(first_line: &str) -> bool {
    shebang_pattern().is_match(first_line)
}

fn file_has_shell_shebang(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    let mut first_line = String::new();
    match BufReader::new(file).read_line(&mut first_line) {
        Ok(_) => has_shell_shebang(first_line.trim_end()),
        Err(_) => false,
    }
}
