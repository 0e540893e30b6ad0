//! Core language server implementation

use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, error, info, warn};

use crate::commands::{AggIdCommand, ClientForwarder, CommandError};
use crate::config::Config;
use crate::schema::{HttpRegistry, SchemaRegistry};
use crate::state::SessionState;

/// Custom request returning the JSON Schema for header documents
pub const HEADER_SCHEMA_METHOD: &str = "eventdoc/headerSchema";

/// The main Backend struct for the event document language server
pub struct Backend {
    /// LSP client to communicate with the editor
    client: Client,
    /// Settings received at initialization
    config: RwLock<Config>,
    /// Documents, caches and handlers for this session
    state: SessionState,
    /// Whether the registry was supplied by the embedder rather than configured
    registry_fixed: bool,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let config = Config::default();
        let registry = Arc::new(HttpRegistry::new(config.registry_url.clone()));
        Self {
            client,
            config: RwLock::new(config),
            state: SessionState::new(registry),
            registry_fixed: false,
        }
    }

    /// Backend that always talks to `registry`, whatever the configuration says
    pub fn with_registry(client: Client, registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            client,
            config: RwLock::new(Config::default()),
            state: SessionState::new(registry),
            registry_fixed: true,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn config(&self) -> Config {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Load the namespace catalog (to be called after server initialization)
    async fn initialize_catalog(&self) {
        info!("Loading namespace catalog");
        match self.state.load_catalog().await {
            Ok(count) => {
                self.client
                    .log_message(
                        MessageType::INFO,
                        format!("Loaded {} namespaces from the schema registry", count),
                    )
                    .await;
            }
            Err(e) => {
                let error_msg = format!("Failed to load namespaces: {}", e);
                error!("{}", error_msg);
                self.client.show_message(MessageType::WARNING, error_msg).await;
            }
        }
    }

    /// Validate a document and publish diagnostics
    async fn validate_document(&self, uri: Url) {
        let Some(document) = self.state.document(&uri) else {
            debug!("Document not found for validation: {}", uri);
            return;
        };
        let Some(diagnostics) = self.state.diagnostics(&uri) else {
            return;
        };

        self.client
            .publish_diagnostics(uri, diagnostics, Some(document.version))
            .await;
    }

    /// Handler for [`HEADER_SCHEMA_METHOD`]
    pub async fn header_schema(&self) -> Result<Option<JsonValue>> {
        Ok(self.state.header_schema())
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        info!("Initializing event document language server");

        match Config::from_initialization_options(params.initialization_options.as_ref()) {
            Ok(config) => {
                if !self.registry_fixed {
                    info!("Using schema registry at {}", config.registry_url);
                    self.state
                        .set_registry(Arc::new(HttpRegistry::new(config.registry_url.clone())));
                }
                *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
            }
            Err(e) => warn!("Ignoring initialization options: {}", e),
        }

        if self.config().forward_commands {
            for command in AggIdCommand::ALL {
                let forwarder = Arc::new(ClientForwarder::new(self.client.clone(), command));
                match command {
                    AggIdCommand::Focus => self.state.register_focus_handler(forwarder),
                    AggIdCommand::Merge => self.state.register_merge_handler(forwarder),
                }
            }
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        will_save: None,
                        will_save_wait_until: None,
                        save: None,
                    },
                )),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: AggIdCommand::ALL
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect(),
                    work_done_progress_options: Default::default(),
                }),
                ..ServerCapabilities::default()
            },
            server_info: Some(ServerInfo {
                name: "eventdoc-ls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("Event document language server initialized");
        self.client
            .log_message(MessageType::INFO, "Event document language server initialized")
            .await;

        self.initialize_catalog().await;
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down event document language server");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        info!("Document opened: {}", doc.uri);

        self.state
            .update_document(doc.uri.clone(), doc.text, doc.version);
        self.validate_document(doc.uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        debug!("Document changed: {}", uri);

        // Full sync: the last change carries the whole text
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        self.state
            .update_document(uri.clone(), change.text, params.text_document.version);
        self.validate_document(uri).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        info!("Document closed: {}", uri);

        self.state.close_document(&uri);
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position = params.text_document_position_params;
        Ok(self
            .state
            .hover(&position.text_document.uri, position.position)
            .await)
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<JsonValue>> {
        match self
            .state
            .execute_command(&params.command, &params.arguments)
            .await
        {
            Ok(()) => {}
            Err(CommandError::Unhandled(command)) => {
                self.client
                    .show_message(
                        MessageType::ERROR,
                        format!("No handler registered for command {}", command),
                    )
                    .await;
            }
            Err(e) => {
                warn!("Command failed: {}", e);
                self.client.log_message(MessageType::WARNING, e.to_string()).await;
            }
        }
        Ok(None)
    }
}
