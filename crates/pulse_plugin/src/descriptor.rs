//! The descriptor every plugin module exports.
//!
//! Instead of the host enumerating arbitrary exported symbols, a plugin
//! module exports exactly one discovery function returning a fixed-shape
//! [`PluginDescriptor`] that enumerates the capability roles its types
//! implement, with a constructor per role.

use crate::{Consumer, Producer, PulsePlugin};

/// Current plugin ABI version. A module exporting a descriptor with a
/// different version is rejected at load time.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Name of the descriptor symbol, as looked up through `libloading`.
pub const DESCRIPTOR_SYMBOL: &[u8] = b"pulse_plugin_descriptor";

/// One capability role declared by a plugin module, with its constructor.
///
/// Constructors are plain function pointers so the host can default-construct
/// each role without touching any other symbol of the module.
pub enum RoleEntry {
    Producer { create: fn() -> Box<dyn Producer> },
    Consumer { create: fn() -> Box<dyn Consumer> },
    /// A plugin with only lifecycle methods and no data role.
    Plugin { create: fn() -> Box<dyn PulsePlugin> },
}

impl std::fmt::Debug for RoleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleEntry::Producer { .. } => f.write_str("RoleEntry::Producer"),
            RoleEntry::Consumer { .. } => f.write_str("RoleEntry::Consumer"),
            RoleEntry::Plugin { .. } => f.write_str("RoleEntry::Plugin"),
        }
    }
}

/// The fixed-shape descriptor returned by the exported discovery function.
#[derive(Debug)]
pub struct PluginDescriptor {
    pub abi_version: u32,
    pub roles: Vec<RoleEntry>,
}

impl PluginDescriptor {
    pub fn new(roles: Vec<RoleEntry>) -> Self {
        Self {
            abi_version: PLUGIN_ABI_VERSION,
            roles,
        }
    }
}

/// Signature of the exported descriptor symbol.
pub type DescriptorFn = fn() -> PluginDescriptor;

/// Export the plugin descriptor from a plugin crate.
///
/// ```ignore
/// use pulse_plugin::{export_plugin, Producer};
///
/// struct CpuSensor;
/// // impl PulsePlugin + Producer for CpuSensor ...
///
/// export_plugin! {
///     Producer => || Box::new(CpuSensor::default()),
/// }
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($($role:ident => $create:expr),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub extern "Rust" fn pulse_plugin_descriptor() -> $crate::descriptor::PluginDescriptor {
            $crate::descriptor::PluginDescriptor::new(vec![
                $($crate::descriptor::RoleEntry::$role { create: $create }),+
            ])
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProducer;

    #[test]
    fn descriptor_carries_current_abi() {
        let desc = PluginDescriptor::new(vec![RoleEntry::Producer {
            create: || Box::new(MockProducer::new("abi-check").0),
        }]);
        assert_eq!(desc.abi_version, PLUGIN_ABI_VERSION);
        assert_eq!(desc.roles.len(), 1);
    }
}
