//! Position-aware JSON parse tree.
//!
//! Completion and hover need to know *where* in a document the cursor sits,
//! expressed as a JSON Pointer plus the kind of value found there. The
//! document is parsed with the tree-sitter JSON grammar and flattened into one
//! [`JsonNode`] per value, keeping nothing about the value's content beyond
//! its kind.
//!
//! Tree-sitter is error-tolerant. Values outside the broken region keep their
//! nodes, and members of an object whose closing brace is missing are still
//! attributed to that object, so a document that is mid-edit still yields the
//! node the user is typing into.

use std::ops::Range;

use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
}

impl NodeKind {
    fn from_syntax(kind: &str) -> Option<NodeKind> {
        match kind {
            "object" => Some(NodeKind::Object),
            "array" => Some(NodeKind::Array),
            "string" => Some(NodeKind::String),
            "number" => Some(NodeKind::Number),
            "true" | "false" => Some(NodeKind::Boolean),
            "null" => Some(NodeKind::Null),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonNode {
    /// RFC 6901 pointer of this value; the root is `""`.
    pub pointer: String,
    pub kind: NodeKind,
    /// Byte range of the value in the source text.
    pub range: Range<usize>,
}

impl JsonNode {
    /// Unescaped name of the property holding this value, if the parent is an object
    /// (array indices are returned as well).
    pub fn property_name(&self) -> Option<String> {
        if self.pointer.is_empty() {
            return None;
        }
        self.pointer
            .rsplit('/')
            .next()
            .map(unescape_pointer_segment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct JsonTree {
    nodes: Vec<JsonNode>,
    errors: Vec<ParseError>,
}

impl JsonTree {
    pub fn parse(text: &str) -> JsonTree {
        let mut tree = JsonTree::default();

        let mut parser = Parser::new();
        if let Err(err) = parser.set_language(&tree_sitter_json::LANGUAGE.into()) {
            tracing::error!(error = %err, "json grammar could not be loaded");
            tree.push_error("json grammar unavailable", 0);
            return tree;
        }
        let Some(syntax) = parser.parse(text, None) else {
            tree.push_error("parsing failed", 0);
            return tree;
        };

        let document = syntax.root_node();
        collect_errors(document, &mut tree.errors);

        let mut walker = Walker {
            text,
            nodes: &mut tree.nodes,
        };
        let mut roots = named_children(document)
            .into_iter()
            .filter(|node| node.kind() != "comment");
        match roots.next() {
            Some(root) => walker.value(root, String::new()),
            None => tree.push_error("expected a value", text.len()),
        }
        if let Some(extra) = roots.next() {
            tree.push_error("unexpected content after the root value", extra.start_byte());
        }

        tree
    }

    /// Nodes in document order (parents before children).
    pub fn nodes(&self) -> &[JsonNode] {
        &self.nodes
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn root(&self) -> Option<&JsonNode> {
        self.nodes.first()
    }

    pub fn get(&self, pointer: &str) -> Option<&JsonNode> {
        self.nodes.iter().find(|node| node.pointer == pointer)
    }

    /// Innermost node whose range contains `offset` (both ends inclusive).
    pub fn node_at(&self, offset: usize) -> Option<&JsonNode> {
        self.nodes
            .iter()
            .rev()
            .filter(|node| node.range.start <= offset && offset <= node.range.end)
            .min_by_key(|node| node.range.len())
    }

    fn push_error(&mut self, message: &str, offset: usize) {
        self.errors.push(ParseError {
            message: message.to_string(),
            offset,
        });
    }
}

pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

pub fn unescape_pointer_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn collect_errors(node: Node<'_>, errors: &mut Vec<ParseError>) {
    if node.is_error() || node.is_missing() {
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "syntax error".to_string()
        };
        errors.push(ParseError {
            message,
            offset: node.start_byte(),
        });
    }

    for child in children(node) {
        collect_errors(child, errors);
    }
}

/// Flattens the syntax tree into pointer-addressed value nodes.
struct Walker<'a, 'n> {
    text: &'a str,
    nodes: &'n mut Vec<JsonNode>,
}

impl Walker<'_, '_> {
    fn push(&mut self, pointer: String, kind: NodeKind, node: Node<'_>) {
        self.nodes.push(JsonNode {
            pointer,
            kind,
            range: node.byte_range(),
        });
    }

    fn value(&mut self, node: Node<'_>, pointer: String) {
        if node.is_error() {
            return self.error(node, pointer);
        }
        let Some(kind) = NodeKind::from_syntax(node.kind()) else {
            return;
        };

        match kind {
            NodeKind::Object => {
                self.push(pointer.clone(), kind, node);
                self.members(node, &pointer);
            }
            NodeKind::Array => {
                self.push(pointer.clone(), kind, node);
                self.elements(node, &pointer);
            }
            _ => self.push(pointer, kind, node),
        }
    }

    /// Recovers what it can from an `ERROR` node standing where a value was
    /// expected.
    fn error(&mut self, node: Node<'_>, pointer: String) {
        let opener = children(node).first().map(|child| child.kind());
        match opener {
            Some("{") => {
                self.push(pointer.clone(), NodeKind::Object, node);
                self.members(node, &pointer);
            }
            Some("[") => {
                self.push(pointer.clone(), NodeKind::Array, node);
                self.elements(node, &pointer);
            }
            _ => self.members(node, &pointer),
        }
    }

    /// Object members, including `"key": value` runs the grammar could only
    /// place inside an `ERROR` node.
    fn members(&mut self, node: Node<'_>, pointer: &str) {
        let children = children(node);
        let mut i = 0;
        while i < children.len() {
            let child = children[i];
            match child.kind() {
                "pair" => self.pair(child, pointer),
                "string" if children.get(i + 1).is_some_and(|n| n.kind() == ":") => {
                    if let Some(value) = children.get(i + 2) {
                        let key = self.property_key(child);
                        self.value(*value, member_pointer(pointer, &key));
                        i += 2;
                    }
                }
                _ if child.is_error() => self.members(child, pointer),
                _ => {}
            }
            i += 1;
        }
    }

    fn pair(&mut self, pair: Node<'_>, pointer: &str) {
        let (Some(key), Some(value)) = (
            pair.child_by_field_name("key"),
            pair.child_by_field_name("value"),
        ) else {
            return;
        };
        let key = self.property_key(key);
        self.value(value, member_pointer(pointer, &key));
    }

    fn elements(&mut self, node: Node<'_>, pointer: &str) {
        let mut index = 0usize;
        for child in named_children(node) {
            if NodeKind::from_syntax(child.kind()).is_some() {
                self.value(child, format!("{pointer}/{index}"));
                index += 1;
            }
        }
    }

    /// Decoded property name; falls back to the raw text between the quotes
    /// when the literal has invalid escapes.
    fn property_key(&self, key: Node<'_>) -> String {
        let raw = self.text.get(key.byte_range()).unwrap_or_default();
        serde_json::from_str::<String>(raw).unwrap_or_else(|_| {
            let inner = raw.strip_prefix('"').unwrap_or(raw);
            inner.strip_suffix('"').unwrap_or(inner).to_string()
        })
    }
}

fn member_pointer(pointer: &str, key: &str) -> String {
    format!("{pointer}/{}", escape_pointer_segment(key))
}
