//! jsonschema-ls: A schema-aware JSON Language Server Protocol implementation
//!
//! This crate provides the core of the jsonschema-ls server: a host that
//! drives pluggable features through the LSP lifecycle, the document model
//! they share, and the features the binary ships with.
//!
//! # Overview
//!
//! - **Host**: Runs every [`feature::Feature`] through initialize, initialized
//!   and shutdown in registration order, merging their capabilities
//! - **Message Bus**: Name-keyed publish/subscribe between the host and features
//! - **Document Resolver**: One canonical document per uri, live or loaded from disk
//! - **Autocomplete**: `$schema` values completed with the known dialects
//! - **Hover**: Whether a `$schema` value names a known dialect
//!
//! # Architecture
//!
//! - [`server`]: [`server::ServerBuilder`] and the `tower-lsp` [`server::Host`]
//! - [`connection`]: Handler registry features wire themselves into
//! - [`bus`]: The process-wide [`bus::MessageBus`]
//! - [`document`] / [`json_tree`]: Rope-backed documents and their JSON structure
//! - [`resolver`]: [`resolver::DocumentResolver`] over live and disk documents
//! - [`completion`], [`hover`], [`workspace`], [`discovery`]: Shipped features
//! - [`config`]: Configuration management and settings
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use jsonschema_ls::{dialects::JsonSchemaDialects, server::ServerBuilder};
//! use tower_lsp::{LspService, Server};
//!
//! let builder = ServerBuilder::new().with_default_features(Arc::new(JsonSchemaDialects::new()));
//! let (service, socket) = LspService::new(|client| builder.build(client));
//! Server::new(tokio::io::stdin(), tokio::io::stdout(), socket).serve(service).await;
//! ```

// Host and plumbing
pub mod bus;
pub mod connection;
pub mod feature;
pub mod server;

// Documents
pub mod document;
pub mod json_tree;
pub mod resolver;

// LSP feature modules
pub mod completion;
pub mod dialects;
pub mod discovery;
pub mod hover;
pub mod workspace;

// Configuration and logging
pub mod config;
pub mod telemetry;

// Test utilities (only available in test builds)
#[cfg(test)]
pub mod test_utils;
