//! The name-keyed store of plugin records.
//!
//! Records carry their owning load context, so dropping a record (or the
//! whole registry) unloads the module once every sibling record from the
//! same package is gone too. The host only drops records after `shutdown()`
//! has returned.

use std::sync::Arc;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use pulse_plugin::{Consumer, PluginInfo, Producer, PulsePlugin};
use serde::Serialize;

use super::LoadContext;

/// Per-record lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PluginStatus {
    NotLoaded,
    Loaded,
    Instantiated,
    LoadingError,
    InstantiationError,
}

impl PluginStatus {
    /// Terminal states are excluded from topology and lifecycle operations.
    pub fn is_error(self) -> bool {
        matches!(self, Self::LoadingError | Self::InstantiationError)
    }
}

bitflags! {
    /// Diagnostic flags recorded alongside an error status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubStatus: u32 {
        const UNDEFINED_EXCEPTION    = 1 << 0;
        const INCORRECT_ARCHITECTURE = 1 << 1;
        const PLUGIN_NOT_FOUND       = 1 << 2;
        const MISSING_DESCRIPTOR     = 1 << 3;
        const ABI_MISMATCH           = 1 << 4;
    }
}

impl SubStatus {
    /// Flag names, for the serializable record snapshot.
    pub fn names(self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_string()).collect()
    }
}

/// A live instance constructed from a plugin module, tagged by capability.
pub enum PluginInstance {
    Producer(Box<dyn Producer>),
    Consumer(Box<dyn Consumer>),
    Bare(Box<dyn PulsePlugin>),
}

impl PluginInstance {
    pub fn role(&self) -> &'static str {
        match self {
            Self::Producer(_) => "producer",
            Self::Consumer(_) => "consumer",
            Self::Bare(_) => "plugin",
        }
    }

    pub fn info(&self) -> PluginInfo {
        self.as_plugin().info()
    }

    pub fn as_plugin(&self) -> &dyn PulsePlugin {
        match self {
            Self::Producer(p) => p.as_ref(),
            Self::Consumer(c) => c.as_ref(),
            Self::Bare(b) => b.as_ref(),
        }
    }

    pub fn as_plugin_mut(&mut self) -> &mut dyn PulsePlugin {
        match self {
            Self::Producer(p) => p.as_mut(),
            Self::Consumer(c) => c.as_mut(),
            Self::Bare(b) => b.as_mut(),
        }
    }

    pub fn as_producer_mut(&mut self) -> Option<&mut dyn Producer> {
        match self {
            Self::Producer(p) => Some(p.as_mut()),
            _ => None,
        }
    }

    pub fn as_consumer(&self) -> Option<&dyn Consumer> {
        match self {
            Self::Consumer(c) => Some(c.as_ref()),
            _ => None,
        }
    }

    pub fn as_consumer_mut(&mut self) -> Option<&mut dyn Consumer> {
        match self {
            Self::Consumer(c) => Some(c.as_mut()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PluginInstance::{}", self.role())
    }
}

/// One registry entry: a plugin instance (or the error that prevented one),
/// its owning load context and its lifecycle state.
#[derive(Debug)]
pub struct PluginRecord {
    pub name: String,
    pub package: String,
    pub info: PluginInfo,
    pub status: PluginStatus,
    pub sub_status: SubStatus,
    pub started: bool,
    pub loaded_at: DateTime<Utc>,
    pub instance: Option<PluginInstance>,
    context: Option<Arc<LoadContext>>,
}

impl PluginRecord {
    /// A successfully constructed instance. `context` is `None` for
    /// instances not backed by a loaded module (host-embedded or test ones).
    ///
    /// Calls `info()` on the instance; discovery uses [`Self::with_info`]
    /// instead so that call stays inside its fault-isolation point.
    pub fn instantiated(
        package: impl Into<String>,
        context: Option<Arc<LoadContext>>,
        instance: PluginInstance,
    ) -> Self {
        let info = instance.info();
        Self::with_info(package, info, context, instance)
    }

    /// An instance whose metadata was already extracted by the caller.
    pub fn with_info(
        package: impl Into<String>,
        info: PluginInfo,
        context: Option<Arc<LoadContext>>,
        instance: PluginInstance,
    ) -> Self {
        Self {
            name: info.name.clone(),
            package: package.into(),
            info,
            status: PluginStatus::Instantiated,
            sub_status: SubStatus::empty(),
            started: false,
            loaded_at: Utc::now(),
            instance: Some(instance),
            context,
        }
    }

    /// A package whose module failed to load; keyed by the package name.
    pub fn load_failure(package: impl Into<String>, sub_status: SubStatus) -> Self {
        let package = package.into();
        Self {
            name: package.clone(),
            info: PluginInfo::new(&package, ""),
            package,
            status: PluginStatus::LoadingError,
            sub_status,
            started: false,
            loaded_at: Utc::now(),
            instance: None,
            context: None,
        }
    }

    /// A role whose constructor failed; the rest of the package proceeds.
    pub fn instantiation_failure(
        package: impl Into<String>,
        role_index: usize,
        sub_status: SubStatus,
    ) -> Self {
        let package = package.into();
        let name = format!("{package}#{role_index}");
        Self {
            name: name.clone(),
            info: PluginInfo::new(&name, ""),
            package,
            status: PluginStatus::InstantiationError,
            sub_status,
            started: false,
            loaded_at: Utc::now(),
            instance: None,
            context: None,
        }
    }

    /// The load context this record's instance came from, if any.
    pub fn context(&self) -> Option<&Arc<LoadContext>> {
        self.context.as_ref()
    }

    pub fn is_producer(&self) -> bool {
        matches!(self.instance, Some(PluginInstance::Producer(_)))
    }

    pub fn is_consumer(&self) -> bool {
        matches!(self.instance, Some(PluginInstance::Consumer(_)))
    }
}

/// Name-keyed plugin store. Keys are case-insensitive; registration order is
/// preserved because the poll scheduler iterates producers in that order.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    records: Vec<PluginRecord>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. A record with the same name (case-insensitive)
    /// is replaced: the last discovered instance wins.
    pub fn insert(&mut self, record: PluginRecord) {
        self.records
            .retain(|r| !r.name.eq_ignore_ascii_case(&record.name));
        self.records.push(record);
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginRecord> {
        self.records
            .iter_mut()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PluginRecord> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether any record holds a live instance.
    pub fn has_instances(&self) -> bool {
        self.records.iter().any(|r| r.instance.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_plugin::testing::{MockConsumer, MockProducer};

    fn producer_record(name: &str) -> PluginRecord {
        let (p, _) = MockProducer::new(name);
        PluginRecord::instantiated(name, None, PluginInstance::Producer(Box::new(p)))
    }

    #[test]
    fn keys_are_case_insensitive_and_last_wins() {
        let mut registry = PluginRegistry::new();
        registry.insert(producer_record("Sensor"));
        registry.insert(producer_record("sensor"));

        assert_eq!(registry.len(), 1);
        // the surviving record is the later one
        assert_eq!(registry.get("SENSOR").unwrap().name, "sensor");
    }

    #[test]
    fn error_records_carry_sub_status() {
        let record = PluginRecord::load_failure("broken", SubStatus::INCORRECT_ARCHITECTURE);
        assert_eq!(record.status, PluginStatus::LoadingError);
        assert!(record.status.is_error());
        assert_eq!(
            record.sub_status.names(),
            vec!["INCORRECT_ARCHITECTURE".to_string()]
        );
        assert!(record.instance.is_none());
    }

    #[test]
    fn instance_roles_are_tagged() {
        let (c, _) = MockConsumer::new("u1");
        let record = PluginRecord::instantiated("u1", None, PluginInstance::Consumer(Box::new(c)));
        assert!(record.is_consumer());
        assert!(!record.is_producer());
        assert_eq!(record.instance.as_ref().unwrap().role(), "consumer");
    }
}
