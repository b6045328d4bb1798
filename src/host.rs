//! The plugin host: owns the registry and topology, coordinates the poll
//! scheduler and the reload cycle through the phase gates, and answers
//! queries about loaded plugins and their last produced data.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pulse_plugin::PluginInfo;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::HostOptions;
use crate::gates::{PhaseGates, ShutdownRequested};
use crate::plugin::{discover, lifecycle, PluginRecord, PluginRegistry, PluginStatus, Topology};
use crate::scheduler;
use crate::verify::{SignatureVerifier, UnsignedVerifier};

/// The registry and the topology derived from it, always mutated together.
#[derive(Debug, Default)]
pub struct HostState {
    pub registry: PluginRegistry,
    pub topology: Topology,
}

/// Serializable view of one registry record for the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSnapshot {
    pub name: String,
    pub package: String,
    pub role: Option<String>,
    pub info: PluginInfo,
    pub status: PluginStatus,
    pub sub_status: Vec<String>,
    pub started: bool,
    pub loaded_at: DateTime<Utc>,
}

impl From<&PluginRecord> for PluginSnapshot {
    fn from(record: &PluginRecord) -> Self {
        Self {
            name: record.name.clone(),
            package: record.package.clone(),
            role: record.instance.as_ref().map(|i| i.role().to_string()),
            info: record.info.clone(),
            status: record.status,
            sub_status: record.sub_status.names(),
            started: record.started,
            loaded_at: record.loaded_at,
        }
    }
}

pub struct PluginHost {
    options: HostOptions,
    host_root: PathBuf,
    plugins_root: PathBuf,
    state: Mutex<HostState>,
    gates: PhaseGates,
    last_data: DashMap<String, Value>,
    verifier: Arc<dyn SignatureVerifier>,
    cancel: CancellationToken,
}

impl PluginHost {
    pub fn new(host_root: impl Into<PathBuf>, options: HostOptions) -> Arc<Self> {
        Self::with_verifier(host_root, options, Arc::new(UnsignedVerifier))
    }

    pub fn with_verifier(
        host_root: impl Into<PathBuf>,
        options: HostOptions,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Arc<Self> {
        Self::build(host_root.into(), options, verifier, HostState::default())
    }

    /// Host preloaded with an in-process registry, for embedding and tests.
    /// The topology is built immediately; `bootstrap` is not needed.
    pub fn with_registry(
        host_root: impl Into<PathBuf>,
        options: HostOptions,
        registry: PluginRegistry,
    ) -> Arc<Self> {
        let topology = Topology::build(&registry);
        let mut state = HostState { registry, topology };
        Self::start_initial(&mut state);
        Self::build(host_root.into(), options, Arc::new(UnsignedVerifier), state)
    }

    fn build(
        host_root: PathBuf,
        options: HostOptions,
        verifier: Arc<dyn SignatureVerifier>,
        state: HostState,
    ) -> Arc<Self> {
        let plugins_root = host_root.join("plugins");
        Arc::new(Self {
            options,
            host_root,
            plugins_root,
            state: Mutex::new(state),
            gates: PhaseGates::default(),
            last_data: DashMap::new(),
            verifier,
            cancel: CancellationToken::new(),
        })
    }

    /// Discover and start the initial plugin set, then spawn the poll loop.
    ///
    /// A missing plugin directory is created; failure to create it is fatal.
    pub async fn bootstrap(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        fs::create_dir_all(&self.plugins_root).with_context(|| {
            format!(
                "creating plugin directory {}",
                self.plugins_root.display()
            )
        })?;

        {
            let mut state = self.state.lock().await;
            let registry = discover(
                &self.plugins_root,
                &self.host_root,
                &self.options,
                self.verifier.as_ref(),
            )?;
            state.topology = Topology::build(&registry);
            state.registry = registry;
            Self::start_initial(&mut state);
            info!(plugins = state.registry.len(), "plugin host bootstrapped");
        }

        Ok(tokio::spawn(scheduler::run(self.clone())))
    }

    /// Run one gate-protected poll iteration.
    ///
    /// Waits until no reload is in progress, then closes the reading gate
    /// for the duration of the iteration.
    pub async fn poll_once(&self) -> Result<(), ShutdownRequested> {
        self.gates.reinitializing.wait_open(&self.cancel).await?;
        self.gates.reading.close();
        {
            let mut state = self.state.lock().await;
            let HostState { registry, topology } = &mut *state;
            scheduler::run_iteration(registry, topology, &self.last_data);
        }
        self.gates.reading.open();
        Ok(())
    }

    /// Tear down every plugin, drop the loaded modules and run a fresh
    /// discovery pass.
    ///
    /// Waits until no poll iteration is reading the topology, then closes
    /// the reinitializing gate for the whole cycle. On a discovery failure
    /// the host is left empty but consistent, with the error propagated.
    pub async fn reload(&self) -> anyhow::Result<()> {
        self.gates.reading.wait_open(&self.cancel).await?;
        self.gates.reinitializing.close();
        let result = self.rebuild().await;
        self.gates.reinitializing.open();
        result
    }

    async fn rebuild(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        Self::stop_all(&mut state);
        // dropping the old registry releases the loaded module handles
        state.registry = PluginRegistry::new();
        state.topology = Topology::default();
        self.last_data.clear();

        let registry = discover(
            &self.plugins_root,
            &self.host_root,
            &self.options,
            self.verifier.as_ref(),
        )?;
        state.topology = Topology::build(&registry);
        state.registry = registry;
        Self::start_initial(&mut state);
        info!(plugins = state.registry.len(), "plugin host reloaded");
        Ok(())
    }

    /// Cancel the poll loop and stop and unload every plugin.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock().await;
        Self::stop_all(&mut state);
        state.registry = PluginRegistry::new();
        state.topology = Topology::default();
        self.last_data.clear();
        info!("plugin host shut down");
    }

    /// Start producers and agnostic consumers. Dependent consumers start
    /// lazily, on their first delivery.
    fn start_initial(state: &mut HostState) {
        let topology = state.topology.clone();
        for slot in topology.producers() {
            if let Some(record) = state.registry.get_mut(&slot.name) {
                lifecycle::start(record);
            }
        }
        for name in topology.agnostic() {
            if let Some(record) = state.registry.get_mut(name) {
                lifecycle::start(record);
            }
        }
    }

    /// Stop everything still running: dependents first, then producers,
    /// then agnostic consumers, then any straggler.
    fn stop_all(state: &mut HostState) {
        let topology = state.topology.clone();
        for slot in topology.producers() {
            for dependent in &slot.dependents {
                if let Some(record) = state.registry.get_mut(dependent) {
                    lifecycle::stop(record);
                }
            }
        }
        for slot in topology.producers() {
            if let Some(record) = state.registry.get_mut(&slot.name) {
                lifecycle::stop(record);
            }
        }
        for name in topology.agnostic() {
            if let Some(record) = state.registry.get_mut(name) {
                lifecycle::stop(record);
            }
        }
        for record in state.registry.iter_mut() {
            if record.started {
                lifecycle::stop(record);
            }
        }
    }

    /// Logical names of every registry record, error records included.
    pub async fn list_plugins(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.registry.names()
    }

    pub async fn get_plugin(&self, name: &str) -> Option<PluginSnapshot> {
        let state = self.state.lock().await;
        state.registry.get(name).map(PluginSnapshot::from)
    }

    /// The most recent data pulled from `producer`, if it produced anything
    /// since the last reload.
    pub fn get_last_data(&self, producer: &str) -> Option<Value> {
        self.last_data.get(producer).map(|entry| entry.clone())
    }

    pub fn update_rate(&self) -> Duration {
        self.options.update_rate
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    pub fn plugins_root(&self) -> &Path {
        &self.plugins_root
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn gates(&self) -> &PhaseGates {
        &self.gates
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("host_root", &self.host_root)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginInstance;
    use pulse_plugin::testing::MockProducer;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    fn seeded_host(root: &Path) -> (Arc<PluginHost>, pulse_plugin::testing::ProducerProbe) {
        let mut registry = PluginRegistry::new();
        let (p, probe) = MockProducer::new("A");
        registry.insert(PluginRecord::instantiated(
            "A",
            None,
            PluginInstance::Producer(Box::new(p)),
        ));
        let host = PluginHost::with_registry(root, HostOptions::default(), registry);
        (host, probe)
    }

    #[tokio::test]
    async fn with_registry_starts_producers_immediately() {
        let root = TempDir::new().unwrap();
        let (host, probe) = seeded_host(root.path());
        assert_eq!(probe.startups.load(Ordering::SeqCst), 1);
        assert!(host.get_plugin("A").await.unwrap().started);
    }

    #[tokio::test]
    async fn poll_once_caches_last_data() {
        let root = TempDir::new().unwrap();
        let (host, probe) = seeded_host(root.path());
        probe.set_data(serde_json::json!(42));

        host.poll_once().await.unwrap();
        assert_eq!(host.get_last_data("A"), Some(serde_json::json!(42)));
        assert_eq!(host.get_last_data("B"), None);
    }

    #[tokio::test]
    async fn poll_once_waits_while_reinitializing_is_closed() {
        let root = TempDir::new().unwrap();
        let (host, probe) = seeded_host(root.path());
        host.gates().reinitializing.close();

        let poller = {
            let host = host.clone();
            tokio::spawn(async move { host.poll_once().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!poller.is_finished());
        assert_eq!(probe.pulls.load(Ordering::SeqCst), 0);

        host.gates().reinitializing.open();
        poller.await.unwrap().unwrap();
        assert_eq!(probe.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reload_waits_while_reading_is_closed() {
        let root = TempDir::new().unwrap();
        let (host, _probe) = seeded_host(root.path());
        fs::create_dir_all(host.plugins_root()).unwrap();
        host.gates().reading.close();

        let reloader = {
            let host = host.clone();
            tokio::spawn(async move { host.reload().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reloader.is_finished());

        host.gates().reading.open();
        reloader.await.unwrap().unwrap();
        assert!(host.gates().reinitializing.is_open());
    }

    #[tokio::test]
    async fn reload_drops_the_previous_registry() {
        let root = TempDir::new().unwrap();
        let (host, probe) = seeded_host(root.path());
        fs::create_dir_all(host.plugins_root()).unwrap();
        probe.set_data(serde_json::json!(1));
        host.poll_once().await.unwrap();
        assert!(host.get_last_data("A").is_some());

        // the plugins directory is empty, so the fresh pass finds nothing
        host.reload().await.unwrap();
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
        assert!(host.list_plugins().await.is_empty());
        assert_eq!(host.get_last_data("A"), None);
    }

    #[tokio::test]
    async fn shutdown_stops_plugins_and_cancels_the_scheduler() {
        let root = TempDir::new().unwrap();
        let (host, probe) = seeded_host(root.path());

        host.shutdown().await;
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
        assert!(host.cancel_token().is_cancelled());
        assert_eq!(host.poll_once().await, Err(ShutdownRequested));
    }

    #[tokio::test]
    async fn bootstrap_creates_the_plugin_directory() {
        let root = TempDir::new().unwrap();
        let host = PluginHost::new(root.path(), HostOptions::default());
        let handle = host.bootstrap().await.unwrap();

        assert!(host.plugins_root().is_dir());
        assert!(host.list_plugins().await.is_empty());
        host.shutdown().await;
        handle.await.unwrap();
    }
}
