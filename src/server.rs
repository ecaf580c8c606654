//! The host: binds the transport to an ordered list of features.
//!
//! ```ignore
//! let dialects = Arc::new(JsonSchemaDialects::new());
//! let builder = ServerBuilder::new().with_default_features(dialects);
//! let (service, socket) = LspService::new(|client| builder.build(client));
//! ```

use std::{
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use serde_json::{json, Value};
use tower_lsp::{
    jsonrpc::{self, ErrorCode},
    lsp_types::{
        CompletionParams, CompletionResponse, DidChangeConfigurationParams,
        DidChangeTextDocumentParams, DidChangeWatchedFilesParams, DidCloseTextDocumentParams,
        DidOpenTextDocumentParams, DidSaveTextDocumentParams, Hover, HoverParams,
        InitializeParams, InitializeResult, InitializedParams, MessageType, ServerCapabilities,
        ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
        TextDocumentSyncSaveOptions,
    },
    LanguageServer,
};

use crate::{
    bus::{self, MessageBus},
    completion::{CompletionFeature, SchemaCompleter},
    config::{Settings, SharedSettings},
    connection::{ClientHandle, Connection},
    dialects::JsonSchemaDialects,
    discovery::DialectDiscovery,
    document::TextDocuments,
    feature::{merge_capabilities, Feature},
    hover::HoverFeature,
    resolver::{DocumentLoader, DocumentResolver},
    workspace::WorkspaceFeature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
}

/// Collects the pieces a [`Host`] is made of.
///
/// The documents table, resolver, bus and settings are created here so that
/// features can be constructed against them before the client exists.
/// Anything that replaces one of them (`with_bus`, `with_loader`) has to be
/// called before features that capture it are added.
pub struct ServerBuilder {
    features: Vec<Arc<dyn Feature>>,
    documents: Arc<TextDocuments>,
    resolver: Arc<DocumentResolver>,
    bus: Arc<MessageBus>,
    settings: SharedSettings,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let documents = Arc::new(TextDocuments::new());
        let resolver = Arc::new(DocumentResolver::new(documents.clone()));
        ServerBuilder {
            features: Vec::new(),
            documents,
            resolver,
            bus: MessageBus::global(),
            settings: Settings::default().shared(),
        }
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.resolver = Arc::new(DocumentResolver::with_loader(
            self.documents.clone(),
            loader,
        ));
        self
    }

    pub fn documents(&self) -> Arc<TextDocuments> {
        self.documents.clone()
    }

    pub fn resolver(&self) -> Arc<DocumentResolver> {
        self.resolver.clone()
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    /// Appends a feature. Registration order is invocation order.
    pub fn feature(mut self, feature: impl Feature + 'static) -> Self {
        self.features.push(Arc::new(feature));
        self
    }

    /// The feature set the `jsonschema-ls` binary ships with.
    pub fn with_default_features(self, dialects: Arc<JsonSchemaDialects>) -> Self {
        let workspace =
            WorkspaceFeature::new(self.resolver(), self.bus(), self.settings());
        let discovery = DialectDiscovery::new(
            self.resolver(),
            dialects.clone(),
            self.bus(),
            self.settings(),
        );
        let completion = CompletionFeature::new(self.resolver(), self.settings())
            .with_provider(SchemaCompleter::new(dialects.clone()));
        let hover = HoverFeature::new(self.resolver(), dialects, self.settings());

        self.feature(workspace)
            .feature(discovery)
            .feature(completion)
            .feature(hover)
    }

    pub fn build(self, client: impl ClientHandle) -> Host {
        Host {
            connection: Connection::new(Arc::new(client)),
            features: self.features,
            documents: self.documents,
            resolver: self.resolver,
            bus: self.bus,
            settings: self.settings,
            state: RwLock::new(ServerState::Uninitialized),
        }
    }
}

pub struct Host {
    connection: Connection,
    features: Vec<Arc<dyn Feature>>,
    documents: Arc<TextDocuments>,
    resolver: Arc<DocumentResolver>,
    bus: Arc<MessageBus>,
    settings: SharedSettings,
    state: RwLock<ServerState>,
}

impl Host {
    pub fn state(&self) -> ServerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn documents(&self) -> &Arc<TextDocuments> {
        &self.documents
    }

    pub fn resolver(&self) -> &Arc<DocumentResolver> {
        &self.resolver
    }

    fn set_state(&self, state: ServerState) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = ?*current, to = ?state, "server state changed");
        *current = state;
    }

    fn load_settings(&self, params: &InitializeParams) {
        let Some(root) = workspace_root(params) else {
            tracing::debug!("no workspace root, using default settings");
            return;
        };

        match Settings::new(&root, &params.capabilities) {
            Ok(settings) => {
                tracing::info!(root = %root.display(), ?settings, "loaded settings");
                *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
            }
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "invalid settings, using defaults");
            }
        }
    }

    fn publish(&self, message: &str, data: Value) {
        self.bus.publish(message, &data);
    }
}

/// Capabilities the host declares before any feature adds its own.
pub fn base_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
            open_close: Some(true),
            change: Some(TextDocumentSyncKind::INCREMENTAL),
            save: Some(TextDocumentSyncSaveOptions::Supported(true)),
            ..Default::default()
        })),
        ..Default::default()
    }
}

fn workspace_root(params: &InitializeParams) -> Option<PathBuf> {
    params
        .workspace_folders
        .as_ref()
        .and_then(|folders| folders.first())
        .map(|folder| &folder.uri)
        .or(params.root_uri.as_ref())
        .and_then(|uri| uri.to_file_path().ok())
}

fn internal_error(message: String) -> jsonrpc::Error {
    jsonrpc::Error {
        code: ErrorCode::InternalError,
        message: message.into(),
        data: None,
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Host {
    async fn initialize(&self, params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        self.load_settings(&params);

        let mut declared = Vec::with_capacity(self.features.len());
        for feature in &self.features {
            match feature.on_initialize(&params) {
                Ok(capabilities) => declared.push(capabilities),
                Err(err) => {
                    tracing::error!(feature = feature.name(), error = %err, "feature failed to initialize");
                    return Err(internal_error(format!(
                        "{} failed to initialize: {err:#}",
                        feature.name()
                    )));
                }
            }
        }

        let capabilities = merge_capabilities(base_capabilities(), declared)
            .map_err(|err| internal_error(format!("capabilities could not be merged: {err}")))?;

        self.set_state(ServerState::Initializing);

        Ok(InitializeResult {
            capabilities,
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        if self.state() != ServerState::Initializing {
            tracing::warn!(state = ?self.state(), "ignoring unexpected initialized notification");
            return;
        }

        for feature in &self.features {
            feature.load(&self.connection, &self.documents);
        }

        for feature in &self.features {
            if let Err(err) = feature
                .on_initialized(&self.connection, &self.documents)
                .await
            {
                tracing::error!(feature = feature.name(), error = %err, "feature setup failed");
                self.connection
                    .client()
                    .log_message(
                        MessageType::ERROR,
                        format!("{} setup failed: {err:#}", feature.name()),
                    )
                    .await;
            }
        }

        self.set_state(ServerState::Ready);
        self.publish(bus::SERVER_READY, Value::Null);
        tracing::info!(features = self.features.len(), "server ready");
    }

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        for feature in &self.features {
            if let Err(err) = feature
                .on_shutdown(&self.connection, &self.documents)
                .await
            {
                tracing::warn!(feature = feature.name(), error = %err, "feature shutdown failed");
            }
        }

        self.set_state(ServerState::ShuttingDown);
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri.clone();

        // Live copy goes in before the disk copy is evicted
        let document = self.documents.open(params.text_document.clone());
        if self.resolver.invalidate(&uri) {
            tracing::debug!(%uri, "evicted disk copy of opened document");
        }

        self.publish(
            bus::DOCUMENT_OPENED,
            json!({ "uri": uri.as_str(), "version": document.version() }),
        );
        self.connection.did_open(params).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = &params.text_document.uri;
        let Some(document) = self.documents.change(
            uri,
            params.text_document.version,
            &params.content_changes,
        ) else {
            tracing::warn!(%uri, "change for a document that is not open");
            return;
        };

        self.publish(
            bus::DOCUMENT_CHANGED,
            json!({ "uri": uri.as_str(), "version": document.version() }),
        );
        self.connection.did_change(params).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = &params.text_document.uri;
        let version = self.documents.close(uri).and_then(|doc| doc.version());

        self.publish(
            bus::DOCUMENT_CLOSED,
            json!({ "uri": uri.as_str(), "version": version }),
        );
        self.connection.did_close(params).await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        self.connection.did_save(params).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        self.connection.did_change_configuration(params).await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        self.connection.did_change_watched_files(params).await;
    }

    async fn completion(
        &self,
        params: CompletionParams,
    ) -> jsonrpc::Result<Option<CompletionResponse>> {
        self.connection.completion(params).await
    }

    async fn hover(&self, params: HoverParams) -> jsonrpc::Result<Option<Hover>> {
        self.connection.hover(params).await
    }
}
