use std::sync::Arc;

use tower_lsp::{
    async_trait,
    lsp_types::{
        CompletionItem, CompletionList, CompletionOptions, CompletionParams, CompletionResponse,
        InitializeParams, ServerCapabilities,
    },
};

use crate::{
    config::{self, SharedSettings},
    connection::Connection,
    document::{Document, TextDocuments},
    feature::Feature,
    json_tree::JsonNode,
    resolver::DocumentResolver,
};

pub use self::schema_completer::{dialect_label, SchemaCompleter, LEGACY_DIALECTS};

mod schema_completer;

/// Produces candidates for the node under the cursor.
///
/// An empty result means "nothing to offer here" and is never an error.
pub trait CompletionProvider: Send + Sync {
    fn completions(&self, node: &JsonNode, document: &Document) -> Vec<CompletionItem>;
}

pub struct CompletionFeature {
    resolver: Arc<DocumentResolver>,
    settings: SharedSettings,
    providers: Vec<Arc<dyn CompletionProvider>>,
}

impl CompletionFeature {
    pub fn new(resolver: Arc<DocumentResolver>, settings: SharedSettings) -> Self {
        CompletionFeature {
            resolver,
            settings,
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl CompletionProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }
}

#[async_trait]
impl Feature for CompletionFeature {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn load(&self, connection: &Connection, _documents: &Arc<TextDocuments>) {
        let resolver = self.resolver.clone();
        let settings = self.settings.clone();
        let providers: Arc<[Arc<dyn CompletionProvider>]> = self.providers.clone().into();

        connection.on_completion(move |params| {
            let resolver = resolver.clone();
            let settings = settings.clone();
            let providers = providers.clone();
            async move {
                if !config::current(&settings).completion {
                    return Ok(None);
                }
                Ok(get_completions(&resolver, &providers, &params).await)
            }
        });
    }

    fn on_initialize(&self, _params: &InitializeParams) -> anyhow::Result<ServerCapabilities> {
        Ok(ServerCapabilities {
            completion_provider: Some(CompletionOptions {
                trigger_characters: Some(vec!["\"".to_string(), ":".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn on_initialized(
        &self,
        _connection: &Connection,
        _documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_shutdown(
        &self,
        _connection: &Connection,
        _documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Collects the candidates of every provider for the cursor in `params`.
///
/// Returns `None` when the document can't be resolved or the cursor is not on
/// a value.
pub async fn get_completions(
    resolver: &DocumentResolver,
    providers: &[Arc<dyn CompletionProvider>],
    params: &CompletionParams,
) -> Option<CompletionResponse> {
    let position = &params.text_document_position;
    let document = match resolver.fetch(&position.text_document.uri).await {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(error = %err, "completion requested for unresolvable document");
            return None;
        }
    };

    let node = document.node_at(position.position)?;
    let items = providers
        .iter()
        .flat_map(|provider| provider.completions(node, &document))
        .collect::<Vec<CompletionItem>>();

    tracing::debug!(pointer = %node.pointer, count = items.len(), "computed completions");

    Some(CompletionResponse::List(CompletionList {
        is_incomplete: false,
        items,
    }))
}
