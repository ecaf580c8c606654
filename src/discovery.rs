//! Registers meta-schemas opened in the editor as dialects.
//!
//! A document is a meta-schema when its root object has a string `$id` and an
//! object `$vocabulary`. Once registered, its `$id` is offered by `$schema`
//! completion like any built-in draft.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use serde_json::Value;
use tower_lsp::{
    async_trait,
    lsp_types::{InitializeParams, ServerCapabilities, Url},
};

use crate::{
    bus::{self, Handler, MessageBus, SubscriptionToken},
    config::{self, SharedSettings},
    connection::Connection,
    dialects::JsonSchemaDialects,
    document::TextDocuments,
    feature::Feature,
    resolver::DocumentResolver,
};

const WATCHED_MESSAGES: [&str; 2] = [bus::DOCUMENT_OPENED, bus::DOCUMENT_CHANGED];

pub struct DialectDiscovery {
    resolver: Arc<DocumentResolver>,
    dialects: Arc<JsonSchemaDialects>,
    bus: Arc<MessageBus>,
    settings: SharedSettings,
    subscriptions: Mutex<Vec<(&'static str, SubscriptionToken)>>,
}

impl DialectDiscovery {
    pub fn new(
        resolver: Arc<DocumentResolver>,
        dialects: Arc<JsonSchemaDialects>,
        bus: Arc<MessageBus>,
        settings: SharedSettings,
    ) -> Self {
        DialectDiscovery {
            resolver,
            dialects,
            bus,
            settings,
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

/// The `$id` of `schema` if it declares a vocabulary.
pub fn meta_schema_id(schema: &Value) -> Option<&str> {
    let root = schema.as_object()?;
    if !root.get("$vocabulary").is_some_and(Value::is_object) {
        return None;
    }
    root.get("$id").and_then(Value::as_str)
}

/// Looks at the document named in a bus payload and registers it when it is
/// a meta-schema. Returns whether a new dialect was added.
pub async fn discover(
    resolver: &DocumentResolver,
    dialects: &JsonSchemaDialects,
    data: &Value,
) -> anyhow::Result<bool> {
    let uri = data["uri"]
        .as_str()
        .context("payload has no uri")
        .and_then(|uri| Url::parse(uri).context("payload uri is malformed"))?;
    let document = resolver.fetch(&uri).await?;

    // Half-typed documents are the common case while editing
    let Ok(schema) = serde_json::from_str::<Value>(&document.text()) else {
        return Ok(false);
    };
    let Some(id) = meta_schema_id(&schema) else {
        return Ok(false);
    };

    let added = dialects.register(id);
    if added {
        tracing::info!(dialect = id, %uri, "discovered dialect");
    }
    Ok(added)
}

#[async_trait]
impl Feature for DialectDiscovery {
    fn name(&self) -> &'static str {
        "dialect-discovery"
    }

    fn load(&self, _connection: &Connection, _documents: &Arc<TextDocuments>) {}

    fn on_initialize(&self, _params: &InitializeParams) -> anyhow::Result<ServerCapabilities> {
        Ok(ServerCapabilities::default())
    }

    async fn on_initialized(
        &self,
        _connection: &Connection,
        _documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()> {
        if !config::current(&self.settings).dialect_discovery {
            return Ok(());
        }

        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for message in WATCHED_MESSAGES {
            let resolver = self.resolver.clone();
            let dialects = self.dialects.clone();
            let handler = Handler::new_async(move |data| {
                let resolver = resolver.clone();
                let dialects = dialects.clone();
                async move { discover(&resolver, &dialects, &data).await.map(|_| ()) }
            });
            subscriptions.push((message, self.bus.subscribe(message, handler)?));
        }
        Ok(())
    }

    async fn on_shutdown(
        &self,
        _connection: &Connection,
        _documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()> {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (message, token) in subscriptions {
            self.bus.unsubscribe(message, token);
        }
        Ok(())
    }
}
