//! Keeps disk-loaded documents in step with the file system.
//!
//! The client watches the configured glob on our behalf and reports changes
//! through `workspace/didChangeWatchedFiles`. A changed or deleted file drops
//! its cached copy so the next fetch reads it again.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::anyhow;
use serde_json::json;
use tower_lsp::{
    async_trait,
    lsp_types::{
        DidChangeWatchedFilesRegistrationOptions, FileChangeType, FileSystemWatcher, GlobPattern,
        InitializeParams, Registration, ServerCapabilities,
    },
};

use crate::{
    bus::{self, MessageBus},
    config::{self, SharedSettings},
    connection::Connection,
    document::TextDocuments,
    feature::Feature,
    resolver::DocumentResolver,
};

const WATCH_REGISTRATION_ID: &str = "jsonschema-ls/watched-files";
const WATCH_METHOD: &str = "workspace/didChangeWatchedFiles";

pub struct WorkspaceFeature {
    resolver: Arc<DocumentResolver>,
    bus: Arc<MessageBus>,
    settings: SharedSettings,
    dynamic_watch: AtomicBool,
}

impl WorkspaceFeature {
    pub fn new(
        resolver: Arc<DocumentResolver>,
        bus: Arc<MessageBus>,
        settings: SharedSettings,
    ) -> Self {
        WorkspaceFeature {
            resolver,
            bus,
            settings,
            dynamic_watch: AtomicBool::new(false),
        }
    }
}

fn change_kind(typ: FileChangeType) -> Option<&'static str> {
    if typ == FileChangeType::CHANGED {
        Some("changed")
    } else if typ == FileChangeType::DELETED {
        Some("deleted")
    } else {
        None
    }
}

#[async_trait]
impl Feature for WorkspaceFeature {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn load(&self, connection: &Connection, _documents: &Arc<TextDocuments>) {
        let resolver = self.resolver.clone();
        let bus = self.bus.clone();

        connection.on_did_change_watched_files(move |params| {
            let resolver = resolver.clone();
            let bus = bus.clone();
            async move {
                for change in params.changes {
                    let Some(kind) = change_kind(change.typ) else {
                        continue;
                    };
                    let evicted = resolver.invalidate(&change.uri);
                    tracing::debug!(uri = %change.uri, kind, evicted, "watched file changed");
                    bus.publish(
                        bus::FILE_CHANGED,
                        &json!({ "uri": change.uri.as_str(), "kind": kind }),
                    );
                }
            }
        });
    }

    fn on_initialize(&self, params: &InitializeParams) -> anyhow::Result<ServerCapabilities> {
        let dynamic = params
            .capabilities
            .workspace
            .as_ref()
            .and_then(|workspace| workspace.did_change_watched_files.as_ref())
            .and_then(|watched| watched.dynamic_registration)
            .unwrap_or(false);
        self.dynamic_watch.store(dynamic, Ordering::Relaxed);

        Ok(ServerCapabilities::default())
    }

    async fn on_initialized(
        &self,
        connection: &Connection,
        _documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()> {
        if !self.dynamic_watch.load(Ordering::Relaxed) {
            tracing::debug!("client cannot register file watchers dynamically");
            return Ok(());
        }

        let pattern = config::current(&self.settings).watch_pattern;
        let options = DidChangeWatchedFilesRegistrationOptions {
            watchers: vec![FileSystemWatcher {
                glob_pattern: GlobPattern::String(pattern.clone()),
                kind: None,
            }],
        };

        connection
            .client()
            .register_capability(vec![Registration {
                id: WATCH_REGISTRATION_ID.to_string(),
                method: WATCH_METHOD.to_string(),
                register_options: Some(serde_json::to_value(options)?),
            }])
            .await
            .map_err(|err| anyhow!("registering file watcher for '{pattern}': {err}"))?;

        tracing::info!(%pattern, "watching workspace files");
        Ok(())
    }

    async fn on_shutdown(
        &self,
        _connection: &Connection,
        _documents: &Arc<TextDocuments>,
    ) -> anyhow::Result<()> {
        let cleared = self.resolver.clear();
        tracing::debug!(cleared, "dropped disk-loaded documents");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::Handler,
        config::Settings,
        test_utils::{create_test_workspace_dir, RecordingClient},
    };
    use std::sync::Mutex;
    use tower_lsp::lsp_types::{
        ClientCapabilities, DidChangeWatchedFilesClientCapabilities, DidChangeWatchedFilesParams,
        FileEvent, Url, WorkspaceClientCapabilities,
    };

    fn feature() -> (WorkspaceFeature, Arc<DocumentResolver>, Arc<MessageBus>) {
        let documents = Arc::new(TextDocuments::new());
        let resolver = Arc::new(DocumentResolver::new(documents));
        let bus = Arc::new(MessageBus::new());
        let settings = Settings {
            watch_pattern: "schemas/*.json".to_string(),
            ..Settings::default()
        }
        .shared();
        (
            WorkspaceFeature::new(resolver.clone(), bus.clone(), settings),
            resolver,
            bus,
        )
    }

    fn params(dynamic: bool) -> InitializeParams {
        InitializeParams {
            capabilities: ClientCapabilities {
                workspace: Some(WorkspaceClientCapabilities {
                    did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
                        dynamic_registration: Some(dynamic),
                        relative_pattern_support: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_registers_watcher_for_configured_glob() {
        let (feature, _resolver, _bus) = feature();
        let client = RecordingClient::default();
        let connection = Connection::new(Arc::new(client.clone()));
        let documents = Arc::new(TextDocuments::new());

        feature.on_initialize(&params(true)).unwrap();
        feature.on_initialized(&connection, &documents).await.unwrap();

        let registrations = client.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].method, WATCH_METHOD);
        let options = registrations[0].register_options.clone().unwrap();
        assert_eq!(options["watchers"][0]["globPattern"], "schemas/*.json");
    }

    #[tokio::test]
    async fn test_no_registration_without_client_support() {
        let (feature, _resolver, _bus) = feature();
        let client = RecordingClient::default();
        let connection = Connection::new(Arc::new(client.clone()));

        feature.on_initialize(&params(false)).unwrap();
        feature
            .on_initialized(&connection, &Arc::new(TextDocuments::new()))
            .await
            .unwrap();

        assert!(client.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_registration_is_an_error() {
        let (feature, _resolver, _bus) = feature();
        let connection = Connection::new(Arc::new(RecordingClient::rejecting_registrations()));

        feature.on_initialize(&params(true)).unwrap();
        let result = feature
            .on_initialized(&connection, &Arc::new(TextDocuments::new()))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_changed_file_is_reloaded_and_announced() {
        let (_temp_dir, workspace) = create_test_workspace_dir();
        let path = workspace.join("a.json");
        std::fs::write(&path, "{\"v\": 1}").unwrap();
        let uri = Url::from_file_path(&path).unwrap();

        let (feature, resolver, bus) = feature();
        let announced = Arc::new(Mutex::new(Vec::new()));
        let sink = announced.clone();
        bus.subscribe(
            bus::FILE_CHANGED,
            Handler::new_sync(move |data| {
                sink.lock().unwrap().push(data["kind"].as_str().unwrap().to_string());
                Ok(())
            }),
        )
        .unwrap();

        let connection = Connection::new(Arc::new(RecordingClient::default()));
        feature.load(&connection, &Arc::new(TextDocuments::new()));

        resolver.fetch(&uri).await.unwrap();
        std::fs::write(&path, "{\"v\": 2}").unwrap();

        connection
            .did_change_watched_files(DidChangeWatchedFilesParams {
                changes: vec![
                    FileEvent {
                        uri: uri.clone(),
                        typ: FileChangeType::CHANGED,
                    },
                    FileEvent {
                        uri: Url::from_file_path(workspace.join("new.json")).unwrap(),
                        typ: FileChangeType::CREATED,
                    },
                ],
            })
            .await;

        assert_eq!(*announced.lock().unwrap(), vec!["changed"]);
        assert!(resolver.fetch(&uri).await.unwrap().text().contains('2'));
    }

    #[tokio::test]
    async fn test_shutdown_clears_disk_copies() {
        let (_temp_dir, workspace) = create_test_workspace_dir();
        let path = workspace.join("a.json");
        std::fs::write(&path, "{}").unwrap();

        let (feature, resolver, _bus) = feature();
        resolver
            .fetch(&Url::from_file_path(&path).unwrap())
            .await
            .unwrap();
        assert_eq!(resolver.inactive_count(), 1);

        let connection = Connection::new(Arc::new(RecordingClient::default()));
        feature
            .on_shutdown(&connection, &Arc::new(TextDocuments::new()))
            .await
            .unwrap();
        assert_eq!(resolver.inactive_count(), 0);
    }
}
