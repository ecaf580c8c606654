//! Resolution of a uri to exactly one in-memory [`Document`].
//!
//! Two stores are consulted:
//!
//! - the **inactive store**, owned here, holding documents this server read
//!   from disk itself (referenced schemas, `$ref` targets);
//! - the **live table**, owned by the transport layer, holding documents the
//!   editor is syncing.
//!
//! `fetch` checks the inactive store first, then the live table, and only then
//! reads the disk. A uri that is never opened in the editor is therefore read at
//! most once for the lifetime of the resolver. The host evicts the inactive
//! entry when the editor opens the same uri, so the two stores never both hold
//! an authoritative copy.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::OnceCell;
use tower_lsp::{async_trait, lsp_types::Url};

use crate::document::{Document, LiveDocuments};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot resolve '{0}' to a local file")]
    UnsupportedUri(Url),
    #[error("failed to read '{uri}': {source}")]
    Io {
        uri: Url,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the raw text behind a uri that is not live.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, uri: &Url) -> Result<String, ResolveError>;
}

#[derive(Debug, Default)]
pub struct FileSystemLoader;

#[async_trait]
impl DocumentLoader for FileSystemLoader {
    async fn load(&self, uri: &Url) -> Result<String, ResolveError> {
        if uri.scheme() != "file" {
            return Err(ResolveError::UnsupportedUri(uri.clone()));
        }
        let path = uri
            .to_file_path()
            .map_err(|()| ResolveError::UnsupportedUri(uri.clone()))?;

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ResolveError::Io {
                uri: uri.clone(),
                source,
            })
    }
}

// An empty cell marks a load that is in flight or that failed; only an
// initialized cell counts as a cached document.
type Slot = Arc<OnceCell<Arc<Document>>>;

pub struct DocumentResolver {
    live: Arc<dyn LiveDocuments>,
    loader: Arc<dyn DocumentLoader>,
    inactive: Mutex<HashMap<Url, Slot>>,
}

impl DocumentResolver {
    pub fn new(live: Arc<dyn LiveDocuments>) -> Self {
        Self::with_loader(live, Arc::new(FileSystemLoader))
    }

    pub fn with_loader(live: Arc<dyn LiveDocuments>, loader: Arc<dyn DocumentLoader>) -> Self {
        DocumentResolver {
            live,
            loader,
            inactive: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the canonical document for `uri`, loading it from disk if neither
    /// store has it.
    ///
    /// Concurrent first fetches of the same uri share a single load. A failed
    /// load is not cached, and dropping the returned future abandons the load
    /// without poisoning the entry.
    pub async fn fetch(&self, uri: &Url) -> Result<Arc<Document>, ResolveError> {
        if let Some(document) = self.cached(uri) {
            tracing::trace!(%uri, "resolved from inactive store");
            return Ok(document);
        }

        if let Some(document) = self.live.get(uri) {
            tracing::trace!(%uri, version = ?document.version(), "resolved from live documents");
            return Ok(document);
        }

        let slot = self.store().entry(uri.clone()).or_default().clone();
        let document = slot
            .get_or_try_init(|| async {
                let text = self.loader.load(uri).await?;
                tracing::debug!(%uri, bytes = text.len(), "loaded inactive document");
                Ok::<_, ResolveError>(Arc::new(Document::new(uri.clone(), &text, None)))
            })
            .await
            .inspect_err(|err| tracing::warn!(%uri, error = %err, "document resolution failed"))?;

        // The editor opened the uri while it was loading
        if let Some(live) = self.live.get(uri) {
            let mut store = self.store();
            if store.get(uri).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                store.remove(uri);
            }
            tracing::debug!(%uri, "discarded disk copy of a document opened during load");
            return Ok(live);
        }

        Ok(document.clone())
    }

    /// Whether `uri` is live or already cached from disk.
    pub fn exists(&self, uri: &Url) -> bool {
        self.live.get(uri).is_some() || self.cached(uri).is_some()
    }

    /// Drops the inactive entry for `uri`. Live documents are unaffected.
    ///
    /// Returns whether a cached document was removed.
    pub fn invalidate(&self, uri: &Url) -> bool {
        let removed = self
            .store()
            .remove(uri)
            .is_some_and(|slot| slot.initialized());
        if removed {
            tracing::debug!(%uri, "invalidated inactive document");
        }
        removed
    }

    /// Drops every inactive entry and returns how many documents were cached.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.store());
        drained.values().filter(|slot| slot.initialized()).count()
    }

    pub fn inactive_count(&self) -> usize {
        self.store()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    fn cached(&self, uri: &Url) -> Option<Arc<Document>> {
        self.store()
            .get(uri)
            .and_then(|slot| slot.get().cloned())
    }

    fn store(&self) -> MutexGuard<'_, HashMap<Url, Slot>> {
        self.inactive.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
