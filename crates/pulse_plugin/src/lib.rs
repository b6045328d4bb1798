//! Contract between the pulsehub host and its plugin packages.
//!
//! Plugin authors implement one or more of the capability traits below and
//! export a single descriptor symbol via [`export_plugin!`]. The host and
//! every plugin link this same crate so the trait objects crossing the
//! module boundary share one definition.

pub mod descriptor;
pub mod testing;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use descriptor::{DescriptorFn, PluginDescriptor, RoleEntry, DESCRIPTOR_SYMBOL, PLUGIN_ABI_VERSION};

/// Status code returned from plugin lifecycle and delivery calls.
/// `0` means success; any other value is a plugin-defined failure.
pub type StatusCode = i32;

/// The success status code.
pub const STATUS_OK: StatusCode = 0;

/// Static metadata a plugin reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: String,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            author: String::new(),
            version: version.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }
}

/// Base capability every plugin implements: identity plus lifecycle.
///
/// `startup` and `shutdown` report a [`StatusCode`]; the host logs non-zero
/// codes but treats the call as attempted either way.
pub trait PulsePlugin: Send {
    /// Metadata about this plugin. `info().name` is the logical name the
    /// host keys its registry on (case-insensitive).
    fn info(&self) -> PluginInfo;

    /// Bring up underlying connections or devices.
    fn startup(&mut self) -> StatusCode;

    /// Tear everything down. Called before the plugin is unloaded.
    fn shutdown(&mut self) -> StatusCode;
}

/// A plugin that pulls data snapshots from an external live source.
pub trait Producer: PulsePlugin {
    /// Whether the external source can currently be read. An unavailable
    /// producer is not pulled and its dependent consumers get stopped.
    fn available(&self) -> bool;

    /// Pull one data snapshot. The payload shape is plugin-specific; the
    /// host treats it as opaque. `Value::Null` means "nothing to deliver".
    fn pull(&mut self) -> Value;
}

/// A plugin that receives data snapshots, optionally bound to one producer.
pub trait Consumer: PulsePlugin {
    /// Logical name of the producer this consumer depends on. `None` (or an
    /// empty string) makes the consumer agnostic: it receives data from
    /// every producer.
    fn required_producer(&self) -> Option<String>;

    /// Handle one data snapshot.
    fn receive(&mut self, data: &Value) -> StatusCode;
}
