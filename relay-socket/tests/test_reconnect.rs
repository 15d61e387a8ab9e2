//! Reconnection timing tests, run on tokio's paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};

use common::{backoff, gaps_ms, record, RefusingConnector, ScriptedConnector};
use relay_core::constants::events;
use relay_socket::{ClientConnection, ClientOptions, ConnectionState, Connector, ReconnectSupervisor};

fn started(connector: &Arc<ScriptedConnector>) -> ClientConnection {
    let connection = ClientConnection::new();
    let connector: Arc<dyn Connector> = connector.clone();
    connection.start(Some(connector), ClientOptions::new("hub.local:9999/socket/"));
    connection
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_until_ceiling() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 3_000)).unwrap();

    connector.open(0);
    assert_eq!(connection.state(), ConnectionState::Open);

    let closed_at = Instant::now();
    connector.close(0);
    assert!(supervisor.is_pending());

    sleep(Duration::from_millis(9_600)).await;

    let times = connector.attempt_times();
    assert_eq!(times.len(), 6);
    assert_eq!(gaps_ms(closed_at, &times[1..]), vec![500, 1_000, 2_000, 3_000, 3_000]);
    assert_eq!(supervisor.current_delay(), Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn test_restart_replays_start_call() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let _supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 3_000)).unwrap();

    connector.open(0);
    connector.close(0);
    sleep(Duration::from_millis(600)).await;

    assert_eq!(connector.attempts(), 2);
    assert_eq!(connector.url(0), "http://hub.local:9999/socket/");
    assert_eq!(connector.url(1), connector.url(0));
    assert_eq!(connection.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_connect_cancels_pending_and_resets_delay() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 3_000)).unwrap();

    connector.open(0);
    connector.close(0);
    assert!(supervisor.is_pending());

    sleep(Duration::from_millis(200)).await;
    connection.internal_emit(events::CONNECT, &Value::Null);
    assert!(!supervisor.is_pending());
    assert_eq!(supervisor.current_delay(), Duration::from_millis(500));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_successful_attempt_resets_grown_delay() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 30_000)).unwrap();

    connector.open(0);
    connector.close(0);

    // attempts at 500ms and 1500ms
    sleep(Duration::from_millis(1_600)).await;
    assert_eq!(connector.attempts(), 3);
    assert_eq!(supervisor.current_delay(), Duration::from_millis(2_000));

    connector.open(2);
    assert_eq!(connection.state(), ConnectionState::Open);
    assert!(!supervisor.is_pending());
    assert_eq!(supervisor.current_delay(), Duration::from_millis(500));

    let closed_at = Instant::now();
    connector.close(2);
    sleep(Duration::from_millis(600)).await;

    let times = connector.attempt_times();
    assert_eq!(times.len(), 4);
    assert_eq!(gaps_ms(closed_at, &times[3..]), vec![500]);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_pending_schedules_nothing_new() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let _supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 30_000)).unwrap();

    connector.open(0);
    let closed_at = Instant::now();
    connector.close(0);

    sleep(Duration::from_millis(100)).await;
    connection.internal_emit(events::CLOSE, &Value::Null);

    // the first retry fails at 600ms, while the chain is still running
    sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.attempts(), 2);
    connector.close(1);

    sleep(Duration::from_millis(3_000)).await;
    let times = connector.attempt_times();
    assert_eq!(times.len(), 4);
    assert_eq!(gaps_ms(closed_at, &times[1..]), vec![500, 1_000, 2_000]);
}

#[tokio::test(start_paused = true)]
async fn test_callbacks_from_replaced_transport_are_ignored() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let _supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 30_000)).unwrap();
    let mut connects = record(&connection, events::CONNECT);

    connector.open(0);
    connector.close(0);
    sleep(Duration::from_millis(600)).await;
    assert_eq!(connector.attempts(), 2);
    assert!(connects.try_recv().is_ok());

    // the first transport is stale now
    connector.open(0);
    assert!(connects.try_recv().is_err());
    assert_eq!(connection.state(), ConnectionState::Connecting);

    connector.open(1);
    assert!(connects.try_recv().is_ok());
    assert_eq!(connection.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_triggers_reconnect() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 30_000)).unwrap();
    let mut closes = record(&connection, events::CLOSE);

    connector.open(0);
    connection.disconnect();
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(closes.try_recv().is_ok());
    assert!(supervisor.is_pending());

    sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_chain() {
    let connector = ScriptedConnector::new();
    let connection = started(&connector);
    let supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 30_000)).unwrap();

    connector.open(0);
    connector.close(0);
    assert!(supervisor.is_pending());

    supervisor.stop();
    assert!(supervisor.is_stopped());
    assert!(!supervisor.is_pending());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 1);

    connection.internal_emit(events::CLOSE, &Value::Null);
    assert!(!supervisor.is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_not_retried() {
    let connection = ClientConnection::new();
    let supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 30_000)).unwrap();
    let mut failures = record(&connection, events::FAILURE);
    let mut closes = record(&connection, events::CLOSE);

    connection.start(None, ClientOptions::new("hub.local"));
    assert!(failures.try_recv().is_ok());
    assert!(!supervisor.is_pending());

    sleep(Duration::from_secs(10)).await;
    assert!(failures.try_recv().is_err());
    assert!(closes.try_recv().is_err());
    assert_eq!(connection.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_refused_connect_keeps_retrying() {
    let connection = ClientConnection::new();
    let _supervisor = ReconnectSupervisor::attach(&connection, backoff(2.0, 500, 30_000)).unwrap();
    let mut closes = record(&connection, events::CLOSE);

    let connector: Arc<dyn Connector> = Arc::new(RefusingConnector);
    connection.start(Some(connector), ClientOptions::new("hub.local"));
    assert_eq!(connection.state(), ConnectionState::Closed);

    // initial refusal, then retries at 500ms and 1500ms
    sleep(Duration::from_millis(1_600)).await;
    let mut count = 0;
    while closes.try_recv().is_ok() {
        count += 1;
    }
    assert_eq!(count, 3);
}
