//! Shared test utilities for jsonschema-ls.
//!
//! This module provides common helpers used across multiple test modules.
//! It is only compiled when running tests.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tower_lsp::{
    async_trait, jsonrpc,
    lsp_types::{MessageType, Registration},
};

use crate::connection::ClientHandle;

/// Creates a temporary workspace directory for testing.
///
/// Returns a tuple of (TempDir, PathBuf) where:
/// - TempDir: The temp directory handle (must be kept alive for the test duration)
/// - PathBuf: The path to the workspace subdirectory
///
/// # Example
///
/// ```ignore
/// use crate::test_utils::create_test_workspace_dir;
///
/// let (_temp_dir, workspace) = create_test_workspace_dir();
/// std::fs::write(workspace.join("schema.json"), "{}").unwrap();
/// ```
pub fn create_test_workspace_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let workspace = temp_dir.path().join("workspace");
    fs::create_dir(&workspace).expect("Failed to create workspace subdirectory");
    (temp_dir, workspace)
}

/// A [`ClientHandle`] that remembers everything sent to it.
///
/// Clones share the same record, so a test can keep one and hand the other to
/// the host.
#[derive(Clone, Default)]
pub struct RecordingClient {
    messages: Arc<Mutex<Vec<(MessageType, String)>>>,
    registrations: Arc<Mutex<Vec<Registration>>>,
    reject_registrations: bool,
}

impl RecordingClient {
    /// A client that answers every `client/registerCapability` with an error.
    pub fn rejecting_registrations() -> Self {
        RecordingClient {
            reject_registrations: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<(MessageType, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientHandle for RecordingClient {
    async fn log_message(&self, typ: MessageType, message: String) {
        self.messages.lock().unwrap().push((typ, message));
    }

    async fn register_capability(&self, registrations: Vec<Registration>) -> jsonrpc::Result<()> {
        if self.reject_registrations {
            return Err(jsonrpc::Error::method_not_found());
        }
        self.registrations.lock().unwrap().extend(registrations);
        Ok(())
    }
}
