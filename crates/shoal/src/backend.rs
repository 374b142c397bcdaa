//
// backend.rs
//
// LSP server wiring
//

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::config::ServerConfig;
use crate::cross_file::capture_env;
use crate::handlers;
use crate::state::{scan_workspace_scripts, WorldState};

/// Read the `shoal` section of a settings object. Returns `None` when the
/// section is absent so callers can keep their current configuration.
fn parse_server_config(settings: &serde_json::Value) -> Option<ServerConfig> {
    settings.get("shoal").map(parse_settings_section)
}

fn parse_settings_section(section: &serde_json::Value) -> ServerConfig {
    let mut config = ServerConfig::default();

    if let Some(dirs) = section.get("excludeDirs").and_then(|v| v.as_array()) {
        config.exclude_dirs = dirs
            .iter()
            .filter_map(|d| d.as_str())
            .map(|d| d.to_string())
            .collect();
    }
    if let Some(v) = section
        .get("workspaceReferences")
        .and_then(|v| v.as_bool())
    {
        config.workspace_references = v;
    }

    if let Some(diagnostics) = section.get("diagnostics") {
        if let Some(v) = diagnostics.get("debounceMs").and_then(|v| v.as_u64()) {
            config.diagnostics_debounce_ms = v;
        }
        if let Some(sev) = diagnostics
            .get("missingSourceSeverity")
            .and_then(|v| v.as_str())
        {
            config.missing_source_severity = parse_severity(sev);
        }
    }

    log::info!("Parsed configuration:");
    log::info!("  exclude_dirs: {:?}", config.exclude_dirs);
    log::info!("  diagnostics_debounce_ms: {}", config.diagnostics_debounce_ms);
    log::info!(
        "  missing_source_severity: {:?}",
        config.missing_source_severity
    );
    log::info!("  workspace_references: {}", config.workspace_references);

    config
}

fn parse_severity(s: &str) -> DiagnosticSeverity {
    match s.to_lowercase().as_str() {
        "error" => DiagnosticSeverity::ERROR,
        "warning" => DiagnosticSeverity::WARNING,
        "information" | "info" => DiagnosticSeverity::INFORMATION,
        "hint" => DiagnosticSeverity::HINT,
        _ => DiagnosticSeverity::WARNING,
    }
}

/// Compute and send diagnostics for one open document. Stale versions are
/// dropped by the diagnostics gate.
async fn publish_diagnostics(client: &Client, state: &RwLock<WorldState>, uri: &Url) {
    let (version, diagnostics) = {
        let state = state.read().await;
        let Some(doc) = state.get_document(uri) else {
            return;
        };
        let version = doc.version;
        if let Some(v) = version {
            if !state.diagnostics_gate.can_publish(uri, v) {
                log::trace!("Skipping stale diagnostics for {} (v{})", uri, v);
                return;
            }
        }
        (version, handlers::diagnostics(&state, uri))
    };

    client
        .publish_diagnostics(uri.clone(), diagnostics, version)
        .await;

    let state = state.read().await;
    if let Some(v) = version {
        state.diagnostics_gate.record_publish(uri, v);
    }
}

pub struct Backend {
    client: Client,
    state: Arc<RwLock<WorldState>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Arc::new(RwLock::new(WorldState::new(capture_env()))),
        }
    }

    async fn publish_all_open(&self) {
        let uris: Vec<Url> = {
            let state = self.state.read().await;
            state.documents.keys().cloned().collect()
        };
        for uri in uris {
            publish_diagnostics(&self.client, &self.state, &uri).await;
        }
    }

    async fn rescan_workspace(&self) {
        let (folders, config) = {
            let state = self.state.read().await;
            (state.workspace_folders.clone(), state.config.clone())
        };

        let scripts = tokio::task::spawn_blocking(move || scan_workspace_scripts(&folders, &config))
            .await
            .unwrap_or_default();
        log::info!("Workspace scan found {} script(s)", scripts.len());

        let mut state = self.state.write().await;
        state.workspace_scripts = scripts;
    }

    /// Parse errors and missing `source` targets for scanned scripts that are
    /// not open. Open documents are published on their own schedule.
    async fn publish_workspace_diagnostics(&self) {
        let found = {
            let state = self.state.read().await;
            handlers::workspace_diagnostics(&state)
        };
        for (uri, diagnostics) in found {
            self.client.publish_diagnostics(uri, diagnostics, None).await;
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing shoal");

        let mut state = self.state.write().await;

        if let Some(folders) = params.workspace_folders {
            for folder in folders {
                log::info!("Workspace folder: {}", folder.uri);
                state.workspace_folders.push(folder.uri);
            }
        } else if let Some(root_uri) = params.root_uri {
            log::info!("Adding root URI as workspace folder: {}", root_uri);
            state.workspace_folders.push(root_uri);
        }

        // Clients send either `{ "shoal": {...} }` or the section itself
        if let Some(options) = params.initialization_options.as_ref() {
            let config = parse_server_config(options)
                .or_else(|| options.is_object().then(|| parse_settings_section(options)));
            if let Some(config) = config {
                state.config = config;
            }
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "shoal".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec!["$".to_string(), "{".to_string()]),
                    ..Default::default()
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                rename_provider: Some(OneOf::Right(RenameOptions {
                    prepare_provider: Some(true),
                    work_done_progress_options: Default::default(),
                })),
                document_symbol_provider: Some(OneOf::Left(true)),
                workspace_symbol_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("shoal initialized");
        self.rescan_workspace().await;
        self.publish_workspace_diagnostics().await;
    }

    async fn shutdown(&self) -> Result<()> {
        let state = self.state.read().await;
        state.revalidation.cancel_all();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut state = self.state.write().await;
            state.open_document(
                uri.clone(),
                &params.text_document.text,
                Some(params.text_document.version),
            );
        }
        log::trace!("Opened {}", uri);
        publish_diagnostics(&self.client, &self.state, &uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        let (debounce_ms, token) = {
            let mut state = self.state.write().await;
            for change in params.content_changes {
                state.apply_change(&uri, change);
            }
            let Some(doc) = state.documents.get_mut(&uri) else {
                return;
            };
            doc.version = Some(version);
            (
                state.config.diagnostics_debounce_ms,
                state.revalidation.schedule(uri.clone()),
            )
        };

        let client = self.client.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::trace!("Diagnostics for {} superseded", uri);
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(debounce_ms)) => {}
            }

            // A newer edit may have landed while this task slept
            let current = {
                let state = state.read().await;
                state.get_document(&uri).and_then(|d| d.version)
            };
            if current != Some(version) {
                return;
            }

            publish_diagnostics(&client, &state, &uri).await;
            state.read().await.revalidation.complete(&uri);
        });
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut state = self.state.write().await;
            state.diagnostics_gate.clear(&uri);
            state.revalidation.cancel(&uri);
            state.close_document(&uri);
        }
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let Some(config) = parse_server_config(&params.settings) else {
            log::warn!("Configuration change without a 'shoal' section; keeping current settings");
            return;
        };

        let exclusions_changed = {
            let mut state = self.state.write().await;
            let changed = state.config.exclude_dirs != config.exclude_dirs;
            state.config = config;
            changed
        };

        if exclusions_changed {
            self.rescan_workspace().await;
        }
        self.publish_all_open().await;
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let state = self.state.read().await;
        let uri = &params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let trigger = params.context.and_then(|c| c.trigger_character);
        Ok(handlers::completion(&state, uri, position, trigger.as_deref()))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let state = self.state.read().await;
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        Ok(handlers::hover(&state, uri, position))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let state = self.state.read().await;
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        Ok(handlers::goto_definition(&state, uri, position))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let state = self.state.read().await;
        let uri = &params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        Ok(handlers::references(
            &state,
            uri,
            position,
            params.context.include_declaration,
        ))
    }

    async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<PrepareRenameResponse>> {
        let state = self.state.read().await;
        Ok(handlers::prepare_rename(
            &state,
            &params.text_document.uri,
            params.position,
        ))
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let state = self.state.read().await;
        let uri = &params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        handlers::rename(&state, uri, position, &params.new_name).map_err(|e| {
            log::info!("Rename rejected: {}", e);
            tower_lsp::jsonrpc::Error::invalid_params(e.to_string())
        })
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let state = self.state.read().await;
        Ok(handlers::document_symbol(&state, &params.text_document.uri))
    }

    async fn symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> Result<Option<Vec<SymbolInformation>>> {
        let state = self.state.read().await;
        Ok(Some(handlers::workspace_symbol(&state, &params.query)))
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(Backend::new).finish();
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
