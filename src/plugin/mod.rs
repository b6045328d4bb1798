//! The plugin subsystem: isolated module loading, discovery, the record
//! registry, producer→consumer topology and per-plugin lifecycle control.

pub mod discovery;
pub mod lifecycle;
pub mod load_context;
pub mod registry;
pub mod topology;

use thiserror::Error;

pub use discovery::discover;
pub use load_context::LoadContext;
pub use registry::{PluginInstance, PluginRecord, PluginRegistry, PluginStatus, SubStatus};
pub use topology::Topology;

/// Errors surfaced while loading a plugin package.
///
/// None of these abort a discovery pass; they are recorded on the package's
/// registry entry and discovery moves on.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The package directory holds no `<dir>/<dir>.<ext>` module file.
    #[error("module `{0}` not found in its package directory")]
    ModuleNotFound(String),

    /// The module's bitness or machine class does not match the host.
    #[error("module architecture does not match the host: {0}")]
    IncorrectArchitecture(String),

    /// Any other failure from the dynamic loader.
    #[error("failed to load module: {0}")]
    Library(String),

    /// The module loaded but exports no plugin descriptor symbol.
    #[error("module exports no plugin descriptor: {0}")]
    MissingDescriptor(String),

    /// The descriptor was built against another contract revision.
    #[error("plugin ABI version mismatch: expected {expected}, found {found}")]
    AbiMismatch { expected: u32, found: u32 },

    /// The name refers to the host contract crate, which must bind to the
    /// single host-wide definition rather than a package-local copy.
    #[error("`{0}` is a host contract module and binds host-wide, not through a load context")]
    ContractDeferred(String),

    /// A dependency could not be located by any resolver step.
    #[error("dependency `{0}` not found")]
    DependencyNotFound(String),
}
