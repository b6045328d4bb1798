//! Walks the plugins root, loads each package through a fresh load context
//! and instantiates every capability role its descriptor declares.

use std::env::consts::DLL_EXTENSION;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use pulse_plugin::{PluginInfo, RoleEntry};
use tracing::{debug, error, info, warn};

use crate::config::HostOptions;
use crate::verify::SignatureVerifier;

use super::registry::{PluginInstance, PluginRecord, PluginRegistry, SubStatus};
use super::{LoadContext, LoadError};

/// Marker used by the single-producer filter: packages whose module file
/// name contains it are producer packages.
pub const PRODUCER_MARKER: &str = "producer";

/// Discover every plugin package under `plugins_root` and build the registry.
///
/// Load and instantiation failures become error records and never abort the
/// pass; only host-internal environment faults (an unreadable plugins root)
/// propagate.
pub fn discover(
    plugins_root: &Path,
    host_root: &Path,
    options: &HostOptions,
    verifier: &dyn SignatureVerifier,
) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();

    let entries = fs::read_dir(plugins_root)
        .with_context(|| format!("cannot read plugins root {}", plugins_root.display()))?;
    let mut packages: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    // deterministic registration order across discovery passes
    packages.sort();

    for package_dir in packages {
        let package = package_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let module_path = package_dir.join(format!("{package}.{DLL_EXTENSION}"));
        if !module_path.is_file() {
            debug!(package = %package, "no module file, skipping directory");
            continue;
        }
        if excluded_by_filter(&package, options) {
            debug!(package = %package, "excluded by single-producer filter");
            continue;
        }

        emit_load_diagnostics(&module_path, &package, verifier);

        let mut context = LoadContext::new(
            package_dir.clone(),
            plugins_root.to_path_buf(),
            host_root.to_path_buf(),
        );
        if let Err(err) = context.load() {
            warn!(package = %package, error = %err, "plugin module failed to load");
            registry.insert(PluginRecord::load_failure(&package, sub_status_for(&err)));
            continue;
        }
        let descriptor = match context.descriptor() {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(package = %package, error = %err, "plugin descriptor rejected");
                registry.insert(PluginRecord::load_failure(&package, sub_status_for(&err)));
                continue;
            }
        };

        let context = Arc::new(context);
        for (role_index, role) in descriptor.roles.into_iter().enumerate() {
            match instantiate(role) {
                Ok((info, instance)) => {
                    info!(package = %package, plugin = %info.name, role = instance.role(), "plugin instantiated");
                    registry.insert(PluginRecord::with_info(
                        &package,
                        info,
                        Some(context.clone()),
                        instance,
                    ));
                }
                Err(panic_text) => {
                    error!(package = %package, role_index, panic = %panic_text, "plugin constructor panicked");
                    registry.insert(PluginRecord::instantiation_failure(
                        &package,
                        role_index,
                        SubStatus::UNDEFINED_EXCEPTION,
                    ));
                }
            }
        }
    }

    if !registry.has_instances() {
        error!(
            plugins_root = %plugins_root.display(),
            "no plugins could be instantiated; host keeps running with an empty registry"
        );
    }
    Ok(registry)
}

/// Default-construct one declared role and read its metadata, isolating
/// panics from both the constructor and `info()`.
fn instantiate(role: RoleEntry) -> std::result::Result<(PluginInfo, PluginInstance), String> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let instance = match role {
            RoleEntry::Producer { create } => PluginInstance::Producer(create()),
            RoleEntry::Consumer { create } => PluginInstance::Consumer(create()),
            RoleEntry::Plugin { create } => PluginInstance::Bare(create()),
        };
        let info = instance.info();
        (info, instance)
    }));
    result.map_err(|payload| crate::plugin::lifecycle::panic_text(payload.as_ref()))
}

/// When a single producer is requested, every other producer package is
/// excluded; non-producer packages always survive.
fn excluded_by_filter(package: &str, options: &HostOptions) -> bool {
    let Some(wanted) = options.producer.as_deref() else {
        return false;
    };
    let is_producer_package = package.to_ascii_lowercase().contains(PRODUCER_MARKER);
    is_producer_package && !package.eq_ignore_ascii_case(wanted)
}

/// One diagnostic event per load attempt: signing state and module path.
/// Delegated to the tracing sinks; never blocks discovery.
fn emit_load_diagnostics(module_path: &Path, package: &str, verifier: &dyn SignatureVerifier) {
    match verifier.verify(module_path) {
        Some(report) => info!(
            package = %package,
            subject = %report.subject,
            thumbprint = %report.thumbprint,
            verified = report.verified,
            "loading signed plugin module"
        ),
        None => info!(package = %package, module = %module_path.display(), "loading unsigned plugin module"),
    }
}

fn sub_status_for(err: &LoadError) -> SubStatus {
    match err {
        LoadError::ModuleNotFound(_) | LoadError::DependencyNotFound(_) => {
            SubStatus::PLUGIN_NOT_FOUND
        }
        LoadError::IncorrectArchitecture(_) => SubStatus::INCORRECT_ARCHITECTURE,
        LoadError::MissingDescriptor(_) => SubStatus::MISSING_DESCRIPTOR,
        LoadError::AbiMismatch { .. } => SubStatus::ABI_MISMATCH,
        LoadError::Library(_) | LoadError::ContractDeferred(_) => SubStatus::empty(),
    }
}
