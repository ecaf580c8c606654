//! Known JSON Schema dialects.
//!
//! The set starts with the drafts the `jsonschema` engine ships and grows when
//! a meta-schema is discovered in the workspace. Consumers must re-query it on
//! every use rather than caching it.

use std::sync::{PoisonError, RwLock};

use jsonschema::Draft;

/// Source of dialect identifiers, owned by the schema engine side.
pub trait DialectRegistry: Send + Sync {
    /// Point-in-time snapshot of canonical dialect uris.
    fn dialect_ids(&self) -> Vec<String>;
}

const BUILTIN_DRAFTS: [Draft; 5] = [
    Draft::Draft4,
    Draft::Draft6,
    Draft::Draft7,
    Draft::Draft201909,
    Draft::Draft202012,
];

/// Canonical meta-schema uri of a built-in draft.
pub fn draft_uri(draft: &Draft) -> Option<&'static str> {
    match draft {
        Draft::Draft4 => Some("http://json-schema.org/draft-04/schema"),
        Draft::Draft6 => Some("http://json-schema.org/draft-06/schema"),
        Draft::Draft7 => Some("http://json-schema.org/draft-07/schema"),
        Draft::Draft201909 => Some("https://json-schema.org/draft/2019-09/schema"),
        Draft::Draft202012 => Some("https://json-schema.org/draft/2020-12/schema"),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Strips an empty trailing fragment so `…/schema#` and `…/schema` compare equal.
pub fn canonical_id(id: &str) -> &str {
    id.strip_suffix('#').unwrap_or(id)
}

#[derive(Debug)]
pub struct JsonSchemaDialects {
    ids: RwLock<Vec<String>>,
}

impl Default for JsonSchemaDialects {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonSchemaDialects {
    pub fn new() -> Self {
        let ids = BUILTIN_DRAFTS
            .iter()
            .filter_map(draft_uri)
            .map(String::from)
            .collect();
        JsonSchemaDialects {
            ids: RwLock::new(ids),
        }
    }

    pub fn empty() -> Self {
        JsonSchemaDialects {
            ids: RwLock::new(Vec::new()),
        }
    }

    /// Adds a dialect; returns `false` if it was already known.
    pub fn register(&self, id: &str) -> bool {
        let id = canonical_id(id);
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        if ids.iter().any(|known| known == id) {
            return false;
        }
        ids.push(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        let id = canonical_id(id);
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|known| known == id)
    }
}

impl DialectRegistry for JsonSchemaDialects {
    fn dialect_ids(&self) -> Vec<String> {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
