//! One isolated module-loading namespace per plugin package.
//!
//! A `LoadContext` owns the package's primary module and every dependency
//! library it loaded on the package's behalf. Dropping the context unloads
//! them, which invalidates every instance constructed from the module — the
//! host guarantees all such instances have completed `shutdown()` first.

use std::env::consts::DLL_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use libloading::{Library, Symbol};
use pulse_plugin::{DescriptorFn, PluginDescriptor, DESCRIPTOR_SYMBOL, PLUGIN_ABI_VERSION};
use tracing::debug;

use super::LoadError;

/// Module name of the shared host contract crate. Never resolved through a
/// load context, so host and plugins agree on the contract shape.
pub const CONTRACT_MODULE: &str = "pulse_plugin";

/// Loader error fragments that indicate a bitness/machine-class mismatch
/// rather than a generally corrupt module.
const ARCH_MISMATCH_MARKERS: &[&str] = &[
    "wrong ELF class",
    "ELFCLASS",
    "incompatible architecture",
    "wrong architecture",
    "not a valid Win32 application",
    "%1 is not a valid",
];

pub struct LoadContext {
    package_dir: PathBuf,
    plugins_root: PathBuf,
    host_root: PathBuf,
    module: Option<Library>,
    dependencies: Mutex<Vec<Library>>,
}

impl LoadContext {
    pub fn new(package_dir: PathBuf, plugins_root: PathBuf, host_root: PathBuf) -> Self {
        Self {
            package_dir,
            plugins_root,
            host_root,
            module: None,
            dependencies: Mutex::new(Vec::new()),
        }
    }

    /// Base name of the primary module, which equals the package dir name.
    pub fn module_name(&self) -> String {
        self.package_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Path the primary module is expected at: `<package>/<package>.<ext>`.
    pub fn module_path(&self) -> PathBuf {
        self.package_dir
            .join(format!("{}.{DLL_EXTENSION}", self.module_name()))
    }

    /// Load the package's primary module.
    pub fn load(&mut self) -> Result<(), LoadError> {
        let name = self.module_name();
        if name.eq_ignore_ascii_case(CONTRACT_MODULE) {
            return Err(LoadError::ContractDeferred(name));
        }
        let path = self.module_path();
        if !path.is_file() {
            return Err(LoadError::ModuleNotFound(name));
        }
        let library = unsafe { Library::new(&path) }.map_err(classify_library_error)?;
        debug!(module = %path.display(), "loaded plugin module");
        self.module = Some(library);
        Ok(())
    }

    /// Resolve the exported discovery symbol and check the contract ABI.
    pub fn descriptor(&self) -> Result<PluginDescriptor, LoadError> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| LoadError::ModuleNotFound(self.module_name()))?;
        let symbol: Symbol<DescriptorFn> = unsafe { module.get(DESCRIPTOR_SYMBOL) }
            .map_err(|e| LoadError::MissingDescriptor(e.to_string()))?;
        let descriptor = symbol();
        if descriptor.abi_version != PLUGIN_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                expected: PLUGIN_ABI_VERSION,
                found: descriptor.abi_version,
            });
        }
        Ok(descriptor)
    }

    /// Locate a dependency of this package by base name.
    ///
    /// Resolution order: the package's own directory, the host root, a
    /// recursive scan of the plugins root restricted to `<name>/<name>.<ext>`,
    /// then a recursive scan of the host root. The contract module is never
    /// resolved here.
    pub fn resolve_dependency(&self, name: &str) -> Option<PathBuf> {
        if name.eq_ignore_ascii_case(CONTRACT_MODULE) {
            return None;
        }
        let file = format!("{name}.{DLL_EXTENSION}");

        let local = self.package_dir.join(&file);
        if local.is_file() {
            return Some(local);
        }
        let host = self.host_root.join(&file);
        if host.is_file() {
            return Some(host);
        }
        if let Some(found) = scan_packaged(&self.plugins_root, name, &file) {
            return Some(found);
        }
        scan_any(&self.host_root, &file)
    }

    /// Resolve and load a native dependency, keeping the library alive for
    /// the lifetime of this context.
    pub fn load_dependency(&self, name: &str) -> Result<PathBuf, LoadError> {
        if name.eq_ignore_ascii_case(CONTRACT_MODULE) {
            return Err(LoadError::ContractDeferred(name.to_string()));
        }
        let path = self
            .resolve_dependency(name)
            .ok_or_else(|| LoadError::DependencyNotFound(name.to_string()))?;
        let library = unsafe { Library::new(&path) }.map_err(classify_library_error)?;
        self.dependencies.lock().unwrap().push(library);
        debug!(dependency = %path.display(), "loaded plugin dependency");
        Ok(path)
    }

    /// Explicit unload. Equivalent to dropping the context; callers must not
    /// hold any instance obtained from this module past this point.
    pub fn unload(self) {
        drop(self);
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("package_dir", &self.package_dir)
            .field("loaded", &self.module.is_some())
            .finish()
    }
}

/// Recursive scan restricted to the `<name>/<name>.<ext>` package layout.
fn scan_packaged(root: &Path, name: &str, file: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.file_name().is_some_and(|d| d == name) {
            let candidate = path.join(file);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if let Some(found) = scan_packaged(&path, name, file) {
            return Some(found);
        }
    }
    None
}

/// Recursive scan matching any file with the wanted name.
fn scan_any(root: &Path, file: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = scan_any(&path, file) {
                return Some(found);
            }
        } else if path.file_name().is_some_and(|f| f == file) {
            return Some(path);
        }
    }
    None
}

/// Distinguish a bitness mismatch from a generally unloadable module.
fn classify_library_error(err: libloading::Error) -> LoadError {
    let text = err.to_string();
    if ARCH_MISMATCH_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
    {
        LoadError::IncorrectArchitecture(text)
    } else {
        LoadError::Library(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn context_for(tmp: &TempDir, package: &str) -> LoadContext {
        let plugins_root = tmp.path().join("plugins");
        let package_dir = plugins_root.join(package);
        fs::create_dir_all(&package_dir).unwrap();
        LoadContext::new(package_dir, plugins_root, tmp.path().to_path_buf())
    }

    #[test]
    fn contract_module_is_deferred_to_host() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context_for(&tmp, CONTRACT_MODULE);
        assert!(matches!(ctx.load(), Err(LoadError::ContractDeferred(_))));
        assert!(ctx.resolve_dependency(CONTRACT_MODULE).is_none());
        assert!(matches!(
            ctx.load_dependency(CONTRACT_MODULE),
            Err(LoadError::ContractDeferred(_))
        ));
    }

    #[test]
    fn missing_module_file_reports_not_found() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context_for(&tmp, "widget");
        assert!(matches!(ctx.load(), Err(LoadError::ModuleNotFound(_))));
    }

    #[test]
    fn garbage_module_is_a_load_error_not_a_panic() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context_for(&tmp, "widget");
        let mut f = File::create(ctx.module_path()).unwrap();
        f.write_all(b"definitely not a shared object").unwrap();

        match ctx.load() {
            Err(LoadError::Library(_)) | Err(LoadError::IncorrectArchitecture(_)) => {}
            other => panic!("expected a load failure, got {other:?}"),
        }
    }

    #[test]
    fn dependency_resolution_prefers_package_local() {
        let tmp = TempDir::new().unwrap();
        let ctx = context_for(&tmp, "widget");
        let file = format!("helper.{DLL_EXTENSION}");

        // host-root copy
        File::create(tmp.path().join(&file)).unwrap();
        // package-local copy wins
        let local = tmp.path().join("plugins/widget").join(&file);
        File::create(&local).unwrap();

        assert_eq!(ctx.resolve_dependency("helper"), Some(local));
    }

    #[test]
    fn dependency_resolution_falls_back_to_packaged_scan() {
        let tmp = TempDir::new().unwrap();
        let ctx = context_for(&tmp, "widget");
        let file = format!("helper.{DLL_EXTENSION}");

        // a sibling package shipping the dependency under <name>/<name>.<ext>
        let sibling = tmp.path().join("plugins/helper");
        fs::create_dir_all(&sibling).unwrap();
        let packaged = sibling.join(&file);
        File::create(&packaged).unwrap();

        assert_eq!(ctx.resolve_dependency("helper"), Some(packaged));
        assert_eq!(ctx.resolve_dependency("absent"), None);
    }

    #[test]
    fn packaged_scan_ignores_loose_files() {
        let tmp = TempDir::new().unwrap();
        let ctx = context_for(&tmp, "widget");
        let file = format!("helper.{DLL_EXTENSION}");

        // a loose file inside another package dir does not satisfy the
        // <name>/<name>.<ext> layout
        let other = tmp.path().join("plugins/other");
        fs::create_dir_all(&other).unwrap();
        File::create(other.join(&file)).unwrap();

        // but it is still found by the host-root fallback scan
        let found = ctx.resolve_dependency("helper").unwrap();
        assert_eq!(found, other.join(&file));
    }
}
