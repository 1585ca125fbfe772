use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// File download capabilities: named scopes map to root directories.
/// A download token names a scope and a path relative to its root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadsConfig {
    /// Scope name → root directory (e.g. `workspace = "./data/workspace"`).
    #[serde(default)]
    pub scopes: HashMap<String, PathBuf>,

    /// Prefix for generated download URLs (e.g. `https://bridge.example.com`).
    /// When unset, URLs are returned as absolute paths.
    #[serde(default)]
    pub public_base_url: Option<String>,
}
