//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use relay_core::error::{RelayError, RelayResult};
use relay_core::logging::LogSink;
use relay_socket::{ClientConnection, ClientTransport, Connector, ReconnectConfig, TransportHandler};

/// A connector whose sessions are driven by hand from the test body.
///
/// Every `connect` call is recorded with the (possibly paused) tokio clock
/// and its handler kept, so the test decides when each attempt opens,
/// closes or receives frames.
#[derive(Default)]
pub struct ScriptedConnector {
    attempts: Mutex<Vec<Attempt>>,
}

struct Attempt {
    at: Instant,
    url: String,
    handler: Arc<dyn TransportHandler>,
    sent: Arc<Mutex<Vec<String>>>,
}

struct ScriptedTransport {
    sent: Arc<Mutex<Vec<String>>>,
}

impl ClientTransport for ScriptedTransport {
    fn send(&self, frame: &str) -> RelayResult<()> {
        self.sent.lock().push(frame.to_string());
        Ok(())
    }

    fn close(&self) {}
}

impl Connector for ScriptedConnector {
    fn connect(
        &self,
        url: &str,
        handler: Arc<dyn TransportHandler>,
    ) -> RelayResult<Box<dyn ClientTransport>> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.attempts.lock().push(Attempt {
            at: Instant::now(),
            url: url.to_string(),
            handler,
            sent: sent.clone(),
        });
        Ok(Box::new(ScriptedTransport { sent }))
    }
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|a| a.at).collect()
    }

    pub fn url(&self, attempt: usize) -> String {
        self.attempts.lock()[attempt].url.clone()
    }

    pub fn sent(&self, attempt: usize) -> Vec<String> {
        self.attempts.lock()[attempt].sent.lock().clone()
    }

    fn handler(&self, attempt: usize) -> Arc<dyn TransportHandler> {
        self.attempts.lock()[attempt].handler.clone()
    }

    pub fn open(&self, attempt: usize) {
        self.handler(attempt).on_open();
    }

    pub fn close(&self, attempt: usize) {
        self.handler(attempt).on_close();
    }

    pub fn deliver(&self, attempt: usize, frame: &str) {
        self.handler(attempt).on_message(frame);
    }
}

/// A connector that always fails to connect.
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(
        &self,
        url: &str,
        _handler: Arc<dyn TransportHandler>,
    ) -> RelayResult<Box<dyn ClientTransport>> {
        Err(RelayError::Transport(format!("connection to {url} refused")))
    }
}

/// Log sink that keeps every line it receives.
#[derive(Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<(tracing::Level, String, String)>>,
}

impl RecordingLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<(tracing::Level, String, String)> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, _, m)| m.contains(needle))
    }
}

impl LogSink for RecordingLog {
    fn log(&self, level: tracing::Level, context: &str, message: &str) {
        self.lines
            .lock()
            .push((level, context.to_string(), message.to_string()));
    }
}

/// Forward every `event` the connection emits into a channel.
pub fn record(connection: &ClientConnection, event: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.on(event, move |data: &Value| {
        let _ = tx.send(data.clone());
    });
    rx
}

/// Receive the next item or fail after `ms` milliseconds.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, ms: u64) -> T {
    tokio::time::timeout(Duration::from_millis(ms), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

/// Backoff configuration in milliseconds.
pub fn backoff(factor: f64, floor_ms: u64, ceiling_ms: u64) -> ReconnectConfig {
    ReconnectConfig {
        factor,
        floor: Duration::from_millis(floor_ms),
        ceiling: Duration::from_millis(ceiling_ms),
    }
}

/// Milliseconds between consecutive instants.
pub fn gaps_ms(start: Instant, times: &[Instant]) -> Vec<u128> {
    let mut previous = start;
    times
        .iter()
        .map(|t| {
            let gap = t.duration_since(previous).as_millis();
            previous = *t;
            gap
        })
        .collect()
}
