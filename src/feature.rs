//! The contract every pluggable capability implements.

use std::sync::Arc;

use serde_json::{Map, Value};
use tower_lsp::{
    async_trait,
    lsp_types::{InitializeParams, ServerCapabilities},
};

use crate::{connection::Connection, document::TextDocuments};

/// A unit of server capability driven through the host lifecycle.
///
/// Hooks run in the order features were registered with the
/// [`ServerBuilder`](crate::server::ServerBuilder):
///
/// 1. [`on_initialize`](Feature::on_initialize) while answering `initialize`.
///    An error here aborts startup.
/// 2. [`load`](Feature::load) for every feature once the client sends
///    `initialized`; this is where handlers are registered on the connection.
/// 3. [`on_initialized`](Feature::on_initialized) for every feature, awaited
///    one after the other. Errors are logged and skipped.
/// 4. [`on_shutdown`](Feature::on_shutdown) on `shutdown`. Errors are logged.
#[async_trait]
pub trait Feature: Send + Sync {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn load(&self, connection: &Connection, documents: &Arc<TextDocuments>);

    fn on_initialize(&self, params: &InitializeParams) -> anyhow::Result<ServerCapabilities>;

    async fn on_initialized(
        &self,
        connection: &Connection,
        documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()>;

    async fn on_shutdown(
        &self,
        connection: &Connection,
        documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()>;
}

/// Folds capability declarations into `base`, in order.
///
/// Nested objects are merged key by key; any other value declared later
/// replaces the earlier one.
pub fn merge_capabilities(
    base: ServerCapabilities,
    declared: impl IntoIterator<Item = ServerCapabilities>,
) -> Result<ServerCapabilities, serde_json::Error> {
    let mut merged = serde_json::to_value(base)?;
    for capabilities in declared {
        merge_value(&mut merged, serde_json::to_value(capabilities)?);
    }
    serde_json::from_value(merged)
}

fn merge_value(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => merge_object(target, source),
        (target, source) => *target = source,
    }
}

fn merge_object(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match target.get_mut(&key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::{
        CompletionOptions, HoverProviderCapability, OneOf, TextDocumentSyncCapability,
        TextDocumentSyncKind, WorkspaceFoldersServerCapabilities, WorkspaceServerCapabilities,
    };

    #[test]
    fn test_merge_is_a_union() {
        let completion = ServerCapabilities {
            completion_provider: Some(CompletionOptions::default()),
            ..Default::default()
        };
        let hover = ServerCapabilities {
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            ..Default::default()
        };

        let merged = merge_capabilities(ServerCapabilities::default(), [completion, hover]).unwrap();

        assert!(merged.completion_provider.is_some());
        assert_eq!(
            merged.hover_provider,
            Some(HoverProviderCapability::Simple(true))
        );
    }

    #[test]
    fn test_later_declaration_wins_on_conflict() {
        let base = ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(
                TextDocumentSyncKind::INCREMENTAL,
            )),
            ..Default::default()
        };
        let full = ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
            ..Default::default()
        };

        let merged = merge_capabilities(base, [full]).unwrap();
        assert_eq!(
            merged.text_document_sync,
            Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL))
        );
    }

    #[test]
    fn test_empty_declaration_removes_nothing() {
        let base = ServerCapabilities {
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            ..Default::default()
        };

        let merged = merge_capabilities(base, [ServerCapabilities::default()]).unwrap();
        assert!(merged.hover_provider.is_some());
    }

    #[test]
    fn test_nested_objects_merge_key_by_key() {
        let supported = ServerCapabilities {
            workspace: Some(WorkspaceServerCapabilities {
                workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                    supported: Some(true),
                    change_notifications: None,
                }),
                file_operations: None,
            }),
            ..Default::default()
        };
        let notifications = ServerCapabilities {
            workspace: Some(WorkspaceServerCapabilities {
                workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                    supported: None,
                    change_notifications: Some(OneOf::Left(true)),
                }),
                file_operations: None,
            }),
            ..Default::default()
        };

        let merged =
            merge_capabilities(ServerCapabilities::default(), [supported, notifications]).unwrap();
        let folders = merged.workspace.unwrap().workspace_folders.unwrap();
        assert_eq!(folders.supported, Some(true));
        assert_eq!(folders.change_notifications, Some(OneOf::Left(true)));
    }
}
