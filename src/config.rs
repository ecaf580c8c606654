use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use anyhow::anyhow;
use config::{Config, File};
use serde::Deserialize;
use tower_lsp::lsp_types::ClientCapabilities;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Offer `$schema` dialect completions
    pub completion: bool,
    pub hover: bool,
    /// Glob registered with the client for `workspace/didChangeWatchedFiles`
    pub watch_pattern: String,
    /// Register meta-schemas found in opened documents as dialects
    pub dialect_discovery: bool,
}

/// Settings as seen by every feature; replaced once the workspace root is known.
pub type SharedSettings = Arc<RwLock<Settings>>;

impl Settings {
    pub fn new(root_dir: &Path, capabilities: &ClientCapabilities) -> anyhow::Result<Settings> {
        let expanded = shellexpand::tilde("~/.config/jsonschema-ls/settings");
        let settings = Config::builder()
            .add_source(File::with_name(&expanded).required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.jsonschema-ls",
                    root_dir
                        .to_str()
                        .ok_or(anyhow!("Can't convert root_dir to str"))?
                ))
                .required(false),
            )
            .set_default("completion", true)?
            .set_default("hover", true)?
            .set_default("watch_pattern", "**/*.json")?
            .set_default("dialect_discovery", true)?
            .set_override_option(
                "hover",
                capabilities
                    .text_document
                    .as_ref()
                    .and_then(|it| match it.hover.is_none() {
                        true => Some(false),
                        false => None,
                    }),
            )?
            .build()
            .map_err(|err| anyhow!("Build err: {err}"))?;

        let settings = settings.try_deserialize::<Settings>()?;

        anyhow::Ok(settings)
    }

    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            completion: true,
            hover: true,
            watch_pattern: "**/*.json".to_string(),
            dialect_discovery: true,
        }
    }
}

/// Reads a copy of the current settings, tolerating a poisoned lock.
pub fn current(settings: &SharedSettings) -> Settings {
    settings
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}
