use super::*;
use crossbeam_channel::{unbounded, Receiver};
use tokio::net::TcpListener;

fn fast_options() -> SessionOptions {
    SessionOptions {
        tick: Duration::from_millis(20),
        join_timeout: Duration::from_secs(2),
        supervisor: SupervisorConfig {
            backoff_floor: Duration::from_millis(20),
            backoff_ceiling: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_millis(200),
        },
        start_paused: false,
    }
}

/// An address nothing listens on, so supervisors sit in their retry loop.
async fn offline_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr.to_string()
}

async fn collect_updates(updates: &Receiver<PrinterUpdate>, want: usize) -> Vec<PrinterUpdate> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while seen.len() < want && tokio::time::Instant::now() < deadline {
        seen.extend(updates.try_iter());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    seen
}

#[test]
fn rejects_empty_endpoint_set() {
    assert_eq!(validate_endpoints(&[]), Err(SessionError::NoEndpoints));
}

#[test]
fn rejects_bad_addresses() {
    assert_eq!(
        validate_endpoints(&[PrinterEndpoint::new("ender", "")]),
        Err(SessionError::EmptyAddress {
            name: "ender".into()
        })
    );
    for address in ["10.0.0.5/printer", " 10.0.0.5", "ender:notaport", "http://10.0.0.5"] {
        let result = validate_endpoints(&[PrinterEndpoint::new("ender", address)]);
        assert!(
            matches!(result, Err(SessionError::InvalidAddress { .. })),
            "{address} should be rejected, got {result:?}"
        );
    }
}

#[test]
fn rejects_duplicate_addresses() {
    let endpoints = [
        PrinterEndpoint::new("left", "10.0.0.5:7125"),
        PrinterEndpoint::new("right", "10.0.0.5:7125"),
    ];
    assert_eq!(
        validate_endpoints(&endpoints),
        Err(SessionError::DuplicateAddress {
            address: "10.0.0.5:7125".into()
        })
    );
}

#[test]
fn accepts_hosts_with_and_without_port() {
    let endpoints = [
        PrinterEndpoint::new("ender", "10.0.0.5"),
        PrinterEndpoint::new("voron", "voron.local:7125"),
    ];
    assert_eq!(validate_endpoints(&endpoints), Ok(()));
}

#[test]
fn start_fails_before_spawning_anything() {
    let (updates_tx, _updates_rx) = unbounded();
    let result = MonitorSession::start(Vec::new(), fast_options(), updates_tx);
    assert_eq!(result.err(), Some(SessionError::NoEndpoints));
}

#[test]
fn session_error_maps_to_configuration_error() {
    let err: MonitorError = SessionError::NoEndpoints.into();
    assert_eq!(err.kind, shared::error::ErrorKind::Configuration);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn announces_every_printer_and_returns_final_snapshots() {
    let endpoints = vec![
        PrinterEndpoint::new("ender", offline_address().await),
        PrinterEndpoint::new("voron", offline_address().await),
    ];
    let (updates_tx, updates_rx) = unbounded();
    let session =
        MonitorSession::start(endpoints.clone(), fast_options(), updates_tx).expect("start");

    let announced = collect_updates(&updates_rx, 2).await;
    assert_eq!(announced.len(), 2);
    assert!(announced.iter().all(|u| u.snapshot.status == "idle"));

    let snapshots = session.shutdown().await;
    let mut addresses: Vec<_> = endpoints.iter().map(|e| e.address.clone()).collect();
    addresses.sort();
    assert_eq!(
        snapshots.iter().map(|s| s.address.clone()).collect::<Vec<_>>(),
        addresses
    );
}

#[tokio::test]
async fn stop_endpoint_is_idempotent() {
    let address = offline_address().await;
    let (updates_tx, _updates_rx) = unbounded();
    let mut session = MonitorSession::start(
        vec![PrinterEndpoint::new("ender", address.clone())],
        fast_options(),
        updates_tx,
    )
    .expect("start");
    assert!(session.connection_state(&address).is_some());

    assert_eq!(session.stop_endpoint(&address).await, StopOutcome::Stopped);
    assert_eq!(session.stop_endpoint(&address).await, StopOutcome::NotRunning);
    assert_eq!(session.stop_endpoint("10.9.9.9").await, StopOutcome::NotRunning);
    assert_eq!(
        session.connection_state(&address),
        Some(ConnectionState::Stopped)
    );
    assert_eq!(session.connection_state("10.9.9.9"), None);

    session.shutdown().await;
}

#[tokio::test]
async fn invalid_restart_keeps_running_session() {
    let address = offline_address().await;
    let (updates_tx, _updates_rx) = unbounded();
    let mut session = MonitorSession::start(
        vec![PrinterEndpoint::new("ender", address.clone())],
        fast_options(),
        updates_tx,
    )
    .expect("start");

    assert_eq!(
        session.restart(Vec::new()).await,
        Err(SessionError::NoEndpoints)
    );
    assert_eq!(session.endpoints().len(), 1);
    assert!(session.connection_state(&address).is_some());

    session.shutdown().await;
}

#[tokio::test]
async fn restart_swaps_endpoints_and_keeps_pause_flag() {
    let first = offline_address().await;
    let second = offline_address().await;
    let (updates_tx, updates_rx) = unbounded();
    let mut session = MonitorSession::start(
        vec![PrinterEndpoint::new("ender", first.clone())],
        fast_options(),
        updates_tx,
    )
    .expect("start");
    collect_updates(&updates_rx, 1).await;

    session.set_updates_paused(true);
    session
        .restart(vec![PrinterEndpoint::new("voron", second.clone())])
        .await
        .expect("restart");

    assert!(session.updates_paused());
    assert_eq!(session.connection_state(&first), None);
    assert!(session.connection_state(&second).is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(updates_rx.try_recv().is_err());

    session.set_updates_paused(false);
    let announced = collect_updates(&updates_rx, 1).await;
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].snapshot.address, second);

    let snapshots = session.shutdown().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].name, "voron");
}

#[test]
fn lifecycle_flags_are_observable() {
    let lifecycle = SessionLifecycle::default();
    let paused = lifecycle.paused_signal();
    let shutdown = lifecycle.shutdown_signal();

    lifecycle.set_updates_paused(true);
    assert!(lifecycle.updates_paused());
    assert!(*paused.borrow());

    lifecycle.begin_shutdown();
    assert!(lifecycle.is_shutting_down());
    assert!(*shutdown.borrow());
}

#[tokio::test]
async fn start_paused_withholds_the_initial_announce() {
    let (updates_tx, updates_rx) = unbounded();
    let options = SessionOptions {
        start_paused: true,
        ..fast_options()
    };
    let session = MonitorSession::start(
        vec![PrinterEndpoint::new("ender", offline_address().await)],
        options,
        updates_tx,
    )
    .expect("start");
    assert!(session.updates_paused());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(updates_rx.try_recv().is_err());

    session.set_updates_paused(false);
    assert_eq!(collect_updates(&updates_rx, 1).await.len(), 1);
    session.shutdown().await;
}
