//! Per-printer subscription connection with reconnect and backoff.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::{
    domain::{ConnectionState, PrinterEndpoint},
    error::MonitorError,
    protocol::{RawFrame, RpcRequest},
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::wait_for_stop;

pub const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(20);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type PrinterSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_floor: DEFAULT_BACKOFF_FLOOR,
            backoff_ceiling: DEFAULT_BACKOFF_CEILING,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Doubling reconnect delay, capped at the ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The task did not finish within the join timeout and was aborted.
    Abandoned,
    NotRunning,
}

/// Owner-side handle of a running supervisor.
pub struct SupervisorHandle {
    endpoint: PrinterEndpoint,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn endpoint(&self) -> &PrinterEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Signals the supervisor to stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn stop_and_join(&mut self, timeout: Duration) -> StopOutcome {
        self.stop();
        let Some(mut task) = self.task.take() else {
            return StopOutcome::NotRunning;
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => StopOutcome::Stopped,
            Err(_) => {
                task.abort();
                warn!(
                    address = %self.endpoint.address,
                    timeout_ms = timeout.as_millis() as u64,
                    "supervisor did not stop in time; abandoning connection"
                );
                StopOutcome::Abandoned
            }
        }
    }
}

/// Starts the reconnect loop for `endpoint` on the current Tokio runtime.
pub fn spawn_supervisor(
    endpoint: PrinterEndpoint,
    inbound: mpsc::UnboundedSender<RawFrame>,
    config: SupervisorConfig,
) -> SupervisorHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let supervisor = ConnectionSupervisor {
        endpoint: endpoint.clone(),
        backoff: Backoff::new(config.backoff_floor, config.backoff_ceiling),
        inbound,
        config,
        stop_rx,
        state_tx,
    };
    let task = tokio::spawn(supervisor.run());
    SupervisorHandle {
        endpoint,
        stop_tx,
        state_rx,
        task: Some(task),
    }
}

enum SessionEnd {
    Stopped,
}

struct ConnectionSupervisor {
    endpoint: PrinterEndpoint,
    inbound: mpsc::UnboundedSender<RawFrame>,
    config: SupervisorConfig,
    backoff: Backoff,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    async fn run(mut self) {
        while !self.stop_requested() {
            self.set_state(ConnectionState::Connecting);
            match self.run_session().await {
                Ok(SessionEnd::Stopped) => break,
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    let delay = self.backoff.next_delay();
                    warn!(
                        printer = %self.endpoint.name,
                        address = %self.endpoint.address,
                        error = %err,
                        retry_in_secs = delay.as_secs_f64(),
                        "printer connection failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_for_stop(&mut self.stop_rx) => break,
                    }
                }
            }
        }
        self.set_state(ConnectionState::Stopped);
        info!(address = %self.endpoint.address, "printer supervisor stopped");
    }

    async fn run_session(&mut self) -> Result<SessionEnd, MonitorError> {
        let url = self.endpoint.websocket_url();
        let dial = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str()));
        let mut socket = tokio::select! {
            result = dial => match result {
                Ok(Ok((socket, _))) => socket,
                Ok(Err(err)) => {
                    return Err(MonitorError::transport(format!("failed to connect {url}: {err}")))
                }
                Err(_) => return Err(MonitorError::transport(format!("timed out connecting {url}"))),
            },
            _ = wait_for_stop(&mut self.stop_rx) => return Ok(SessionEnd::Stopped),
        };

        let request = serde_json::to_string(&RpcRequest::subscribe())
            .map_err(|err| MonitorError::decode(format!("failed to encode subscribe request: {err}")))?;
        socket
            .send(Message::Text(request))
            .await
            .map_err(|err| MonitorError::transport(format!("failed to send subscribe request: {err}")))?;

        self.backoff.reset();
        self.set_state(ConnectionState::Subscribed);
        info!(
            printer = %self.endpoint.name,
            address = %self.endpoint.address,
            %url,
            "printer subscribed"
        );

        loop {
            let next = tokio::select! {
                next = socket.next() => next,
                _ = wait_for_stop(&mut self.stop_rx) => {
                    close_socket(&mut socket, self.config.close_timeout).await;
                    return Ok(SessionEnd::Stopped);
                }
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    if !self.forward(&text) {
                        close_socket(&mut socket, self.config.close_timeout).await;
                        return Ok(SessionEnd::Stopped);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(MonitorError::transport(format!(
                        "connection closed by printer: {reason}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    return Err(MonitorError::transport(format!("websocket receive failed: {err}")))
                }
                None => return Err(MonitorError::transport("websocket stream ended")),
            }
        }
    }

    /// Enqueues one decoded frame. Returns false once nobody is consuming frames.
    fn forward(&self, text: &str) -> bool {
        let payload = match serde_json::from_str::<Value>(text) {
            Ok(payload) => payload,
            Err(err) => {
                let err = MonitorError::decode(err.to_string());
                warn!(address = %self.endpoint.address, error = %err, "dropping undecodable frame");
                return true;
            }
        };
        if self
            .inbound
            .send(RawFrame::new(self.endpoint.address.clone(), payload))
            .is_err()
        {
            debug!(address = %self.endpoint.address, "inbound channel closed");
            return false;
        }
        true
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(address = %self.endpoint.address, ?previous, ?state, "connection state changed");
        }
    }
}

async fn close_socket(socket: &mut PrinterSocket, timeout: Duration) {
    if tokio::time::timeout(timeout, socket.close(None)).await.is_err() {
        debug!("websocket close timed out");
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
