//! Contract of the remote manifest-fetching client used for plugin
//! distribution metadata. The transport implementation lives outside this
//! crate; the host only depends on this interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Distribution metadata for one published plugin package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub download_url: String,
    /// Expected signing-certificate thumbprint, when the publisher signs.
    pub thumbprint: Option<String>,
}

/// Fetches plugin distribution manifests from a remote registry.
#[async_trait]
pub trait ManifestClient: Send + Sync {
    async fn fetch_manifest(&self, plugin: &str) -> anyhow::Result<PluginManifest>;
    async fn list_available(&self) -> anyhow::Result<Vec<PluginManifest>>;
}
