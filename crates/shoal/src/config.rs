//
// config.rs
//
// Server configuration
//

use tower_lsp::lsp_types::DiagnosticSeverity;

/// Directory names never descended into during workspace discovery.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[".git", ".venv", "node_modules"];

/// User-tunable server settings. Read from `initializationOptions` and from
/// `workspace/didChangeConfiguration` under the `shoal` key.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Directory names skipped when scanning workspace folders for scripts
    pub exclude_dirs: Vec<String>,
    /// Delay before diagnostics run after an edit, in milliseconds
    pub diagnostics_debounce_ms: u64,
    /// Severity for `source` statements naming a file that does not exist
    pub missing_source_severity: DiagnosticSeverity,
    /// Whether references and rename also search workspace files that
    /// source the current file
    pub workspace_references: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
            diagnostics_debounce_ms: 200,
            missing_source_severity: DiagnosticSeverity::ERROR,
            workspace_references: true,
        }
    }
}

impl ServerConfig {
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|d| d == name)
    }
}
