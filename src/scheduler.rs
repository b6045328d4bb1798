//! The fixed-interval poll loop: pull each available producer once and fan
//! the data out to its dependent and agnostic consumers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use pulse_plugin::STATUS_OK;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, info, trace, warn};

use crate::host::PluginHost;
use crate::plugin::lifecycle::{self, panic_text};
use crate::plugin::registry::{PluginRecord, PluginRegistry};
use crate::plugin::topology::Topology;

/// Drive the poll loop until the host's cancellation token fires.
///
/// Each pass waits out the configured update rate, then runs one
/// gate-protected iteration through [`PluginHost::poll_once`].
pub async fn run(host: Arc<PluginHost>) {
    let cancel = host.cancel_token().clone();
    info!(
        interval_ms = host.update_rate().as_millis() as u64,
        "poll scheduler running"
    );
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(host.update_rate()) => {}
        }
        if host.poll_once().await.is_err() {
            break;
        }
    }
    info!("poll scheduler stopped");
}

/// One poll iteration over the whole topology, in producer registration
/// order. Callers hold the state lock and the gate protocol around this.
pub(crate) fn run_iteration(
    registry: &mut PluginRegistry,
    topology: &Topology,
    last_data: &DashMap<String, Value>,
) {
    for slot in topology.producers() {
        let pulled = {
            let Some(record) = registry.get_mut(&slot.name) else {
                continue;
            };
            if !record.started {
                continue;
            }
            pull_producer(record, last_data)
        };

        match pulled {
            Pulled::Data(data) => {
                if data.is_null() {
                    continue;
                }
                for consumer_name in topology.agnostic().iter().chain(slot.dependents.iter()) {
                    let Some(record) = registry.get_mut(consumer_name) else {
                        continue;
                    };
                    // consumers activate lazily, on first delivery
                    if !record.started {
                        lifecycle::start(record);
                    }
                    deliver(record, &data);
                }
            }
            Pulled::Unavailable => {
                for dependent in &slot.dependents {
                    if let Some(record) = registry.get_mut(dependent) {
                        if record.started {
                            lifecycle::stop(record);
                        }
                    }
                }
            }
            Pulled::Nothing => {}
        }
    }
}

enum Pulled {
    Data(Value),
    Unavailable,
    Nothing,
}

/// Check availability and pull one snapshot, isolating both plugin calls.
fn pull_producer(record: &mut PluginRecord, last_data: &DashMap<String, Value>) -> Pulled {
    let name = record.name.clone();
    let Some(producer) = record.instance.as_mut().and_then(|i| i.as_producer_mut()) else {
        return Pulled::Nothing;
    };

    let available = match catch_unwind(AssertUnwindSafe(|| producer.available())) {
        Ok(available) => available,
        Err(payload) => {
            error!(producer = %name, panic = %panic_text(payload.as_ref()), "availability check panicked");
            false
        }
    };
    if !available {
        return Pulled::Unavailable;
    }

    match catch_unwind(AssertUnwindSafe(|| producer.pull())) {
        Ok(data) => {
            last_data.insert(name, data.clone());
            Pulled::Data(data)
        }
        Err(payload) => {
            error!(producer = %name, panic = %panic_text(payload.as_ref()), "pull panicked");
            Pulled::Nothing
        }
    }
}

/// Hand one snapshot to a consumer, logging its status code.
fn deliver(record: &mut PluginRecord, data: &Value) {
    let name = record.name.clone();
    let Some(consumer) = record.instance.as_mut().and_then(|i| i.as_consumer_mut()) else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| consumer.receive(data))) {
        Ok(code) if code == STATUS_OK => trace!(consumer = %name, "data delivered"),
        Ok(code) => warn!(consumer = %name, code, "consumer reported delivery failure"),
        Err(payload) => {
            error!(consumer = %name, panic = %panic_text(payload.as_ref()), "receive panicked")
        }
    }
}
