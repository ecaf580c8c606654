//! Hover provider for `$schema` values.
//!
//! Hovering the value of a `$schema` keyword tells whether it names a dialect
//! the server knows about.
//!
//! # Configuration
//!
//! Hover can be disabled via [`Settings::hover`](crate::config::Settings::hover):
//!
//! ```toml
//! hover = false
//! ```

use std::sync::Arc;

use tower_lsp::{
    async_trait,
    lsp_types::{
        Hover, HoverContents, HoverParams, HoverProviderCapability, InitializeParams,
        MarkupContent, MarkupKind, Range, ServerCapabilities,
    },
};

use crate::{
    config::{self, SharedSettings},
    connection::Connection,
    dialects::{canonical_id, DialectRegistry},
    document::TextDocuments,
    feature::Feature,
    json_tree::NodeKind,
    resolver::DocumentResolver,
};

pub struct HoverFeature {
    resolver: Arc<DocumentResolver>,
    dialects: Arc<dyn DialectRegistry>,
    settings: SharedSettings,
}

impl HoverFeature {
    pub fn new(
        resolver: Arc<DocumentResolver>,
        dialects: Arc<dyn DialectRegistry>,
        settings: SharedSettings,
    ) -> Self {
        HoverFeature {
            resolver,
            dialects,
            settings,
        }
    }
}

#[async_trait]
impl Feature for HoverFeature {
    fn name(&self) -> &'static str {
        "hover"
    }

    fn load(&self, connection: &Connection, _documents: &Arc<TextDocuments>) {
        let resolver = self.resolver.clone();
        let dialects = self.dialects.clone();
        let settings = self.settings.clone();

        connection.on_hover(move |params| {
            let resolver = resolver.clone();
            let dialects = dialects.clone();
            let settings = settings.clone();
            async move {
                if !config::current(&settings).hover {
                    return Ok(None);
                }
                Ok(hover(&resolver, dialects.as_ref(), &params).await)
            }
        });
    }

    fn on_initialize(&self, _params: &InitializeParams) -> anyhow::Result<ServerCapabilities> {
        Ok(ServerCapabilities {
            hover_provider: Some(HoverProviderCapability::Simple(true)),
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

/// Describe the `$schema` value under the cursor.
///
/// # Returns
///
/// `Some(Hover)` with markdown content, or `None` if:
/// - The document can't be resolved
/// - The cursor is not on a string `$schema` value
pub async fn hover(
    resolver: &DocumentResolver,
    dialects: &dyn DialectRegistry,
    params: &HoverParams,
) -> Option<Hover> {
    let position = &params.text_document_position_params;
    let document = resolver.fetch(&position.text_document.uri).await.ok()?;
    let node = document.node_at(position.position)?;

    if node.kind != NodeKind::String || !node.pointer.ends_with("/$schema") {
        return None;
    }

    // Ranges off a char boundary come back as None rather than panicking
    let raw = document
        .rope()
        .get_byte_slice(node.range.clone())?
        .to_string();
    let value: String = serde_json::from_str(&raw).ok()?;

    let known = dialects
        .dialect_ids()
        .iter()
        .any(|id| id == canonical_id(&value));
    let message = if known {
        format!("**JSON Schema dialect**\n\n`{value}`")
    } else {
        format!("**Unknown dialect**\n\n`{value}` is not a dialect this server knows about.")
    };

    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: message,
        }),
        range: Some(Range {
            start: document.position_at(node.range.start),
            end: document.position_at(node.range.end),
        }),
    })
}
