//! Documents and the live-documents table.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use ropey::Rope;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent, TextDocumentItem, Url};

use crate::json_tree::{JsonNode, JsonTree};

/// The only language this server edits.
pub const LANGUAGE_ID: &str = "json";

/// One JSON resource, either live-synced from the editor or loaded from disk.
///
/// Documents are immutable snapshots; an edit produces a new `Document`.
#[derive(Debug, Clone)]
pub struct Document {
    uri: Url,
    /// `None` when the document was loaded from disk and is not editor-tracked.
    version: Option<i32>,
    rope: Rope,
    tree: JsonTree,
}

impl Document {
    pub fn new(uri: Url, text: &str, version: Option<i32>) -> Self {
        Self::from_rope(uri, Rope::from_str(text), version)
    }

    fn from_rope(uri: Url, rope: Rope, version: Option<i32>) -> Self {
        let tree = JsonTree::parse(&rope.to_string());
        Document {
            uri,
            version,
            rope,
            tree,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    pub fn is_live(&self) -> bool {
        self.version.is_some()
    }

    pub fn language_id(&self) -> &'static str {
        LANGUAGE_ID
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn tree(&self) -> &JsonTree {
        &self.tree
    }

    /// Byte offset of an LSP (UTF-16) position, clamped to the end of its line.
    pub fn offset_at(&self, position: Position) -> Option<usize> {
        if position.line as usize >= self.rope.len_lines() {
            return None;
        }
        let char_idx = char_index(&self.rope, position);
        Some(self.rope.char_to_byte(char_idx))
    }

    pub fn position_at(&self, offset: usize) -> Position {
        let char_idx = self.rope.byte_to_char(offset.min(self.rope.len_bytes()));
        let line = self.rope.char_to_line(char_idx);
        let line_start = self.rope.char_to_utf16_cu(self.rope.line_to_char(line));
        let character = self.rope.char_to_utf16_cu(char_idx) - line_start;

        Position {
            line: line as u32,
            character: character as u32,
        }
    }

    pub fn node_at(&self, position: Position) -> Option<&JsonNode> {
        self.offset_at(position)
            .and_then(|offset| self.tree.node_at(offset))
    }

    /// Applies editor changes in order and returns the resulting snapshot.
    pub fn with_changes(&self, changes: &[TextDocumentContentChangeEvent], version: i32) -> Self {
        let mut rope = self.rope.clone();

        for change in changes {
            match change.range {
                Some(range) => {
                    let start = char_index(&rope, range.start);
                    let end = char_index(&rope, range.end).max(start);
                    rope.remove(start..end);
                    rope.insert(start, &change.text);
                }
                None => rope = Rope::from_str(&change.text),
            }
        }

        Self::from_rope(self.uri.clone(), rope, Some(version))
    }
}

fn char_index(rope: &Rope, position: Position) -> usize {
    let line = position.line as usize;
    if line >= rope.len_lines() {
        return rope.len_chars();
    }

    let line_start = rope.line_to_char(line);
    let line_end = if line + 1 < rope.len_lines() {
        rope.line_to_char(line + 1)
    } else {
        rope.len_chars()
    };

    let start_cu = rope.char_to_utf16_cu(line_start);
    let end_cu = rope.char_to_utf16_cu(line_end);
    let target = (start_cu + position.character as usize).min(end_cu);
    rope.utf16_cu_to_char(target)
}

/// Read access to the documents the editor is actively syncing.
pub trait LiveDocuments: Send + Sync {
    fn get(&self, uri: &Url) -> Option<Arc<Document>>;
    fn keys(&self) -> Vec<Url>;
}

/// Live-documents table maintained from `textDocument/did*` notifications.
#[derive(Debug, Default)]
pub struct TextDocuments {
    documents: RwLock<HashMap<Url, Arc<Document>>>,
}

impl TextDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, item: TextDocumentItem) -> Arc<Document> {
        if item.language_id != LANGUAGE_ID {
            tracing::debug!(uri = %item.uri, language = %item.language_id, "tracking non-json document as json");
        }

        let document = Arc::new(Document::new(item.uri.clone(), &item.text, Some(item.version)));
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.uri, document.clone());
        document
    }

    /// Returns `None` when the document was never opened.
    pub fn change(
        &self,
        uri: &Url,
        version: i32,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Option<Arc<Document>> {
        let mut documents = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let current = documents.get(uri)?;

        if current.version().is_some_and(|old| version <= old) {
            tracing::warn!(%uri, old = ?current.version(), new = version, "document version did not increase");
        }

        let updated = Arc::new(current.with_changes(changes, version));
        documents.insert(uri.clone(), updated.clone());
        Some(updated)
    }

    pub fn close(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri)
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LiveDocuments for TextDocuments {
    fn get(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }

    fn keys(&self) -> Vec<Url> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}
