//! The phase protocol between the poll scheduler and the reload coordinator.
//!
//! Two binary gates, both initially open. The scheduler waits on
//! "reinitializing open", then closes "reading" for the duration of one
//! iteration. `reload()` waits on "reading open", then closes
//! "reinitializing" around the stop→discover→rebuild→start cycle. The two
//! phases therefore never overlap, and both waits abort cleanly on host
//! shutdown.

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Returned from a gate wait interrupted by host shutdown.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("shutdown requested while waiting on a phase gate")]
pub struct ShutdownRequested;

/// A binary open/closed gate with cancellable waits.
#[derive(Debug)]
pub struct Gate {
    state: watch::Sender<bool>,
}

impl Gate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(true);
        Self { state }
    }

    pub fn close(&self) {
        let _ = self.state.send(false);
    }

    pub fn open(&self) {
        let _ = self.state.send(true);
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the gate is open, or until `cancel` fires.
    pub async fn wait_open(&self, cancel: &CancellationToken) -> Result<(), ShutdownRequested> {
        let mut rx = self.state.subscribe();
        // cancellation wins over an already-open gate
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ShutdownRequested),
            result = rx.wait_for(|open| *open) => {
                // the sender lives in self, so the channel cannot be closed
                result.map(|_| ()).map_err(|_| ShutdownRequested)
            }
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// The two gates shared by the scheduler and the reload coordinator.
#[derive(Debug, Default)]
pub struct PhaseGates {
    /// Closed while reload tears down and rebuilds the topology.
    pub reinitializing: Gate,
    /// Closed while a poll iteration is reading the topology.
    pub reading: Gate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn open_gate_passes_immediately() {
        let gate = Gate::new();
        let cancel = CancellationToken::new();
        assert!(gate.is_open());
        gate.wait_open(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn closed_gate_blocks_until_opened() {
        let gate = std::sync::Arc::new(Gate::new());
        gate.close();
        let cancel = CancellationToken::new();

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_open(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.open();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_closed_gate() {
        let gate = Gate::new();
        gate.close();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(gate.wait_open(&cancel).await, Err(ShutdownRequested));
    }
}
