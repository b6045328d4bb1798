//! Mock plugins for host and plugin tests.
//!
//! Each mock hands back a probe sharing its counters, so a test keeps
//! visibility after the instance has moved into the host's registry.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::{Consumer, PluginInfo, Producer, PulsePlugin, StatusCode, STATUS_OK};

/// Shared observation handle for a [`MockProducer`].
#[derive(Clone, Default)]
pub struct ProducerProbe {
    pub startups: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub pulls: Arc<AtomicUsize>,
    available: Arc<AtomicBool>,
    data: Arc<Mutex<Value>>,
    panic_on_pull: Arc<AtomicBool>,
}

impl ProducerProbe {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_data(&self, data: Value) {
        *self.data.lock().unwrap() = data;
    }

    pub fn panic_on_pull(&self, panic: bool) {
        self.panic_on_pull.store(panic, Ordering::SeqCst);
    }
}

/// A producer that serves a configurable payload from memory.
pub struct MockProducer {
    name: String,
    probe: ProducerProbe,
}

impl MockProducer {
    pub fn new(name: impl Into<String>) -> (Self, ProducerProbe) {
        let probe = ProducerProbe {
            available: Arc::new(AtomicBool::new(true)),
            data: Arc::new(Mutex::new(serde_json::json!({"reading": 1}))),
            ..Default::default()
        };
        (
            Self {
                name: name.into(),
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl PulsePlugin for MockProducer {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(&self.name, "0.1.0").with_description("mock producer")
    }

    fn startup(&mut self) -> StatusCode {
        self.probe.startups.fetch_add(1, Ordering::SeqCst);
        STATUS_OK
    }

    fn shutdown(&mut self) -> StatusCode {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        STATUS_OK
    }
}

impl Producer for MockProducer {
    fn available(&self) -> bool {
        self.probe.available.load(Ordering::SeqCst)
    }

    fn pull(&mut self) -> Value {
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        if self.probe.panic_on_pull.load(Ordering::SeqCst) {
            panic!("mock pull failure");
        }
        self.probe.data.lock().unwrap().clone()
    }
}

/// Shared observation handle for a [`MockConsumer`].
#[derive(Clone, Default)]
pub struct ConsumerProbe {
    pub startups: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub receives: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<Value>>>,
    status: Arc<AtomicI32>,
    panic_on_receive: Arc<AtomicBool>,
}

impl ConsumerProbe {
    /// The most recent payload delivered to the consumer.
    pub fn last_received(&self) -> Option<Value> {
        self.last.lock().unwrap().clone()
    }

    /// Make `receive` report the given status code.
    pub fn set_receive_status(&self, status: StatusCode) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn panic_on_receive(&self, panic: bool) {
        self.panic_on_receive.store(panic, Ordering::SeqCst);
    }
}

/// A consumer that records everything delivered to it.
pub struct MockConsumer {
    name: String,
    required_producer: Option<String>,
    probe: ConsumerProbe,
}

impl MockConsumer {
    /// An agnostic consumer (no producer affinity).
    pub fn new(name: impl Into<String>) -> (Self, ConsumerProbe) {
        Self::bound_to(name, None::<String>)
    }

    /// A consumer bound to the named producer.
    pub fn bound_to(
        name: impl Into<String>,
        required_producer: Option<impl Into<String>>,
    ) -> (Self, ConsumerProbe) {
        let probe = ConsumerProbe::default();
        (
            Self {
                name: name.into(),
                required_producer: required_producer.map(Into::into),
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl PulsePlugin for MockConsumer {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(&self.name, "0.1.0").with_description("mock consumer")
    }

    fn startup(&mut self) -> StatusCode {
        self.probe.startups.fetch_add(1, Ordering::SeqCst);
        STATUS_OK
    }

    fn shutdown(&mut self) -> StatusCode {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        STATUS_OK
    }
}

impl Consumer for MockConsumer {
    fn required_producer(&self) -> Option<String> {
        self.required_producer.clone()
    }

    fn receive(&mut self, data: &Value) -> StatusCode {
        self.probe.receives.fetch_add(1, Ordering::SeqCst);
        if self.probe.panic_on_receive.load(Ordering::SeqCst) {
            panic!("mock receive failure");
        }
        *self.probe.last.lock().unwrap() = Some(data.clone());
        self.probe.status.load(Ordering::SeqCst)
    }
}

/// A plugin with no data role, for bare-lifecycle tests.
pub struct MockBarePlugin {
    name: String,
    pub startups: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl MockBarePlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            startups: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl PulsePlugin for MockBarePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(&self.name, "0.1.0")
    }

    fn startup(&mut self) -> StatusCode {
        self.startups.fetch_add(1, Ordering::SeqCst);
        STATUS_OK
    }

    fn shutdown(&mut self) -> StatusCode {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        STATUS_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_probe_tracks_calls() {
        let (mut p, probe) = MockProducer::new("p");
        probe.set_data(serde_json::json!(42));
        assert!(p.available());
        assert_eq!(p.pull(), serde_json::json!(42));
        assert_eq!(probe.pulls.load(Ordering::SeqCst), 1);

        probe.set_available(false);
        assert!(!p.available());
    }

    #[test]
    fn consumer_probe_records_last_payload() {
        let (mut c, probe) = MockConsumer::bound_to("c", Some("p"));
        assert_eq!(c.required_producer().as_deref(), Some("p"));
        assert_eq!(c.receive(&serde_json::json!("hello")), STATUS_OK);
        assert_eq!(probe.last_received(), Some(serde_json::json!("hello")));

        probe.set_receive_status(7);
        assert_eq!(c.receive(&serde_json::json!("again")), 7);
    }
}
