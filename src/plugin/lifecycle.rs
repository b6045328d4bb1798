//! Idempotent start/stop of individual plugin instances.
//!
//! Every call into a plugin is a fault-isolation point: panics and non-zero
//! status codes are logged and never cross into host control flow. The
//! `started` flag is updated deterministically either way — the host treats
//! "attempted" as "running" and lets the plugin report itself unavailable.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use pulse_plugin::STATUS_OK;
use tracing::{error, info, warn};

use super::registry::PluginRecord;

/// Start a plugin if it is not already started. No-op for error records.
pub fn start(record: &mut PluginRecord) {
    if record.started {
        return;
    }
    let name = record.name.clone();
    let Some(instance) = record.instance.as_mut() else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| instance.as_plugin_mut().startup())) {
        Ok(code) if code == STATUS_OK => info!(plugin = %name, "plugin started"),
        Ok(code) => warn!(plugin = %name, code, "plugin startup reported failure"),
        Err(payload) => {
            error!(plugin = %name, panic = %panic_text(payload.as_ref()), "plugin startup panicked")
        }
    }
    record.started = true;
}

/// Stop a plugin if it is started. The flag clears regardless of outcome.
pub fn stop(record: &mut PluginRecord) {
    if !record.started {
        return;
    }
    let name = record.name.clone();
    if let Some(instance) = record.instance.as_mut() {
        match catch_unwind(AssertUnwindSafe(|| instance.as_plugin_mut().shutdown())) {
            Ok(code) if code == STATUS_OK => info!(plugin = %name, "plugin stopped"),
            Ok(code) => warn!(plugin = %name, code, "plugin shutdown reported failure"),
            Err(payload) => {
                error!(plugin = %name, panic = %panic_text(payload.as_ref()), "plugin shutdown panicked")
            }
        }
    }
    record.started = false;
}

/// Human-readable text of a caught panic payload.
pub fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
