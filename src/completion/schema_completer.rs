//! Completion of `$schema` values with the known dialect uris.

use std::sync::Arc;

use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionTextEdit, Range, TextEdit,
};

use super::CompletionProvider;
use crate::{
    dialects::DialectRegistry,
    document::Document,
    json_tree::{JsonNode, NodeKind},
};

/// Dialects whose identifiers are conventionally written with an empty
/// trailing fragment (`…/schema#`). Later dialects dropped the convention.
pub const LEGACY_DIALECTS: [&str; 3] = [
    "http://json-schema.org/draft-04/schema",
    "http://json-schema.org/draft-06/schema",
    "http://json-schema.org/draft-07/schema",
];

/// The text offered for a dialect id.
pub fn dialect_label(id: &str) -> String {
    if LEGACY_DIALECTS.contains(&id) {
        format!("{id}#")
    } else {
        id.to_string()
    }
}

pub struct SchemaCompleter {
    dialects: Arc<dyn DialectRegistry>,
}

impl SchemaCompleter {
    pub fn new(dialects: Arc<dyn DialectRegistry>) -> Self {
        SchemaCompleter { dialects }
    }
}

impl CompletionProvider for SchemaCompleter {
    fn completions(&self, node: &JsonNode, document: &Document) -> Vec<CompletionItem> {
        if node.kind != NodeKind::String || !node.pointer.ends_with("/$schema") {
            return Vec::new();
        }

        let range = Range {
            start: document.position_at(node.range.start),
            end: document.position_at(node.range.end),
        };

        self.dialects
            .dialect_ids()
            .iter()
            .map(|id| {
                let label = dialect_label(id);
                let quoted = format!("\"{label}\"");
                CompletionItem {
                    label,
                    kind: Some(CompletionItemKind::VALUE),
                    // Clients filter on the word under the cursor, which starts at the quote
                    filter_text: Some(quoted.clone()),
                    text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                        range,
                        new_text: quoted,
                    })),
                    ..Default::default()
                }
            })
            .collect()
    }
}
