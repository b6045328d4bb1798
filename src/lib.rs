//! pulsehub: a process-local plugin host.
//!
//! Discovers producer and consumer plugins under a plugin directory, loads
//! each package in its own isolated context, wires consumers to the
//! producers they depend on and drives a fixed-interval pull/fan-out cycle.

pub mod config;
pub mod gates;
pub mod host;
pub mod logger;
pub mod manifest;
pub mod plugin;
pub mod scheduler;
pub mod verify;

pub use config::HostOptions;
pub use host::{PluginHost, PluginSnapshot};
