//! Session lifecycle: endpoint validation, task wiring, stop and restart.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crossbeam_channel::Sender;
use futures::future::join_all;
use shared::{
    domain::{ConnectionState, PrinterEndpoint},
    error::MonitorError,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};
use url::Url;

use crate::{
    reconciler::{PrinterUpdate, Reconciler, DEFAULT_TICK},
    store::PrinterSnapshot,
    supervisor::{spawn_supervisor, StopOutcome, SupervisorConfig, SupervisorHandle},
};

pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub tick: Duration,
    pub join_timeout: Duration,
    pub supervisor: SupervisorConfig,
    /// Withhold presentation updates from the first tick on.
    pub start_paused: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            supervisor: SupervisorConfig::default(),
            start_paused: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no enabled printers configured")]
    NoEndpoints,
    #[error("printer '{name}' has an empty address")]
    EmptyAddress { name: String },
    #[error("printer '{name}' has an invalid address '{address}': {reason}")]
    InvalidAddress {
        name: String,
        address: String,
        reason: String,
    },
    #[error("address '{address}' is configured for more than one printer")]
    DuplicateAddress { address: String },
}

impl From<SessionError> for MonitorError {
    fn from(value: SessionError) -> Self {
        MonitorError::configuration(value.to_string())
    }
}

/// Session-wide flags. Only the session mutates them; components get receivers.
#[derive(Debug)]
pub struct SessionLifecycle {
    updates_paused: watch::Sender<bool>,
    shutting_down: watch::Sender<bool>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            updates_paused: watch::channel(false).0,
            shutting_down: watch::channel(false).0,
        }
    }

    pub fn set_updates_paused(&self, paused: bool) {
        self.updates_paused.send_replace(paused);
    }

    pub fn updates_paused(&self) -> bool {
        *self.updates_paused.borrow()
    }

    pub fn paused_signal(&self) -> watch::Receiver<bool> {
        self.updates_paused.subscribe()
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutting_down.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutting_down.subscribe()
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks the endpoint set before anything connects.
pub fn validate_endpoints(endpoints: &[PrinterEndpoint]) -> Result<(), SessionError> {
    if endpoints.is_empty() {
        return Err(SessionError::NoEndpoints);
    }

    let mut seen = HashSet::new();
    for endpoint in endpoints {
        let address = endpoint.address.trim();
        if address.is_empty() {
            return Err(SessionError::EmptyAddress {
                name: endpoint.name.clone(),
            });
        }
        if address != endpoint.address || address.contains('/') {
            return Err(SessionError::InvalidAddress {
                name: endpoint.name.clone(),
                address: endpoint.address.clone(),
                reason: "expected host or host:port".to_string(),
            });
        }
        let url = Url::parse(&endpoint.websocket_url()).map_err(|err| {
            SessionError::InvalidAddress {
                name: endpoint.name.clone(),
                address: endpoint.address.clone(),
                reason: err.to_string(),
            }
        })?;
        if url.host_str().is_none() {
            return Err(SessionError::InvalidAddress {
                name: endpoint.name.clone(),
                address: endpoint.address.clone(),
                reason: "missing host".to_string(),
            });
        }
        if !seen.insert(endpoint.address.as_str()) {
            return Err(SessionError::DuplicateAddress {
                address: endpoint.address.clone(),
            });
        }
    }
    Ok(())
}

/// One monitoring session over a fixed endpoint set.
pub struct MonitorSession {
    endpoints: Vec<PrinterEndpoint>,
    options: SessionOptions,
    updates: Sender<PrinterUpdate>,
    lifecycle: SessionLifecycle,
    supervisors: HashMap<String, SupervisorHandle>,
    /// Last state of printers stopped through `stop_endpoint`.
    retired: HashMap<String, ConnectionState>,
    reconciler: Option<JoinHandle<Reconciler>>,
}

impl MonitorSession {
    /// Validates `endpoints` and starts one supervisor per printer plus the
    /// reconciler. Must be called from within a Tokio runtime.
    pub fn start(
        endpoints: Vec<PrinterEndpoint>,
        options: SessionOptions,
        updates: Sender<PrinterUpdate>,
    ) -> Result<Self, SessionError> {
        validate_endpoints(&endpoints)?;
        let mut session = Self {
            endpoints: Vec::new(),
            options,
            updates,
            lifecycle: SessionLifecycle::new(),
            supervisors: HashMap::new(),
            retired: HashMap::new(),
            reconciler: None,
        };
        session.set_updates_paused(session.options.start_paused);
        session.launch(endpoints);
        Ok(session)
    }

    fn launch(&mut self, endpoints: Vec<PrinterEndpoint>) {
        let paused = self.lifecycle.updates_paused();
        self.lifecycle = SessionLifecycle::new();
        self.lifecycle.set_updates_paused(paused);
        self.retired.clear();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reconciler = Reconciler::new(
            &endpoints,
            inbound_rx,
            self.updates.clone(),
            self.lifecycle.paused_signal(),
        );
        self.reconciler = Some(tokio::spawn(
            reconciler.run(self.options.tick, self.lifecycle.shutdown_signal()),
        ));

        self.supervisors = endpoints
            .iter()
            .map(|endpoint| {
                let handle = spawn_supervisor(
                    endpoint.clone(),
                    inbound_tx.clone(),
                    self.options.supervisor.clone(),
                );
                (endpoint.address.clone(), handle)
            })
            .collect();
        info!(printers = endpoints.len(), "monitoring session started");
        self.endpoints = endpoints;
    }

    pub fn endpoints(&self) -> &[PrinterEndpoint] {
        &self.endpoints
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    pub fn set_updates_paused(&self, paused: bool) {
        self.lifecycle.set_updates_paused(paused);
    }

    pub fn updates_paused(&self) -> bool {
        self.lifecycle.updates_paused()
    }

    /// Latest published state; stopped printers keep their final state until
    /// the next restart. `None` for addresses outside the session.
    pub fn connection_state(&self, address: &str) -> Option<ConnectionState> {
        self.supervisors
            .get(address)
            .map(SupervisorHandle::state)
            .or_else(|| self.retired.get(address).copied())
    }

    pub fn connection_changes(&self, address: &str) -> Option<watch::Receiver<ConnectionState>> {
        self.supervisors
            .get(address)
            .map(SupervisorHandle::state_changes)
    }

    /// Stops monitoring one printer. Unknown or already stopped printers are a no-op.
    pub async fn stop_endpoint(&mut self, address: &str) -> StopOutcome {
        let Some(mut handle) = self.supervisors.remove(address) else {
            return StopOutcome::NotRunning;
        };
        let outcome = handle.stop_and_join(self.options.join_timeout).await;
        self.retired.insert(address.to_string(), handle.state());
        info!(address, ?outcome, "printer monitoring stopped");
        outcome
    }

    /// Stops every supervisor, then the reconciler once the channel has drained.
    /// Returns the final state of every printer.
    pub async fn shutdown(mut self) -> Vec<PrinterSnapshot> {
        self.shutdown_tasks().await
    }

    /// Replaces the endpoint set. An invalid set leaves the running session untouched.
    pub async fn restart(&mut self, endpoints: Vec<PrinterEndpoint>) -> Result<(), SessionError> {
        validate_endpoints(&endpoints)?;
        self.shutdown_tasks().await;
        self.launch(endpoints);
        Ok(())
    }

    async fn shutdown_tasks(&mut self) -> Vec<PrinterSnapshot> {
        let timeout = self.options.join_timeout;
        let mut supervisors: Vec<SupervisorHandle> =
            self.supervisors.drain().map(|(_, handle)| handle).collect();
        for handle in &supervisors {
            handle.stop();
        }
        let outcomes = join_all(
            supervisors
                .iter_mut()
                .map(|handle| handle.stop_and_join(timeout)),
        )
        .await;
        let abandoned = outcomes
            .iter()
            .filter(|outcome| **outcome == StopOutcome::Abandoned)
            .count();
        if abandoned > 0 {
            warn!(abandoned, "some printer connections were abandoned");
        }

        self.lifecycle.begin_shutdown();
        let Some(mut task) = self.reconciler.take() else {
            return Vec::new();
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(reconciler)) => {
                info!("monitoring session stopped");
                reconciler.snapshots()
            }
            Ok(Err(err)) => {
                warn!(error = %err, "reconciler task failed");
                Vec::new()
            }
            Err(_) => {
                task.abort();
                warn!("reconciler did not stop in time");
                Vec::new()
            }
        }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        for handle in self.supervisors.values() {
            handle.stop();
        }
        self.lifecycle.begin_shutdown();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
