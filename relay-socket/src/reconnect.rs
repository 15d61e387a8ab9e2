//! Automatic reconnection with bounded exponential backoff.
//!
//! A [`ReconnectSupervisor`] listens to a [`ClientConnection`]'s `close` and
//! `connect` events. On close it schedules a retry chain: wait, replay the
//! last start call, multiply the delay by `factor` (capped at the ceiling),
//! wait again, and so on until a `connect` arrives. A connect cancels the
//! chain and resets the delay to the floor. There is no jitter, so with
//! factor 2, floor 500ms and ceiling 3s the waits are 500, 1000, 2000, 3000,
//! 3000, ... milliseconds.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_core::config::ReconnectSettings;
use relay_core::constants::{self, events};
use relay_core::error::{RelayError, RelayResult};

use crate::client::{ClientConnection, WeakClientConnection};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Multiplier applied to the delay after each attempt.
    pub factor: f64,
    /// First delay after a close, and the value restored on connect.
    pub floor: Duration,
    /// Upper bound for the delay.
    pub ceiling: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            factor: f64::from(constants::DEFAULT_RECONNECT_FACTOR),
            floor: Duration::from_millis(constants::DEFAULT_RECONNECT_FLOOR_MS),
            ceiling: Duration::from_millis(constants::DEFAULT_RECONNECT_CEILING_MS),
        }
    }
}

impl ReconnectConfig {
    /// Build from the `[reconnect]` configuration section.
    pub fn from_settings(settings: &ReconnectSettings) -> RelayResult<Self> {
        settings.validate()?;
        let [floor, ceiling] = settings.delay;
        Ok(Self {
            factor: settings.factor,
            floor: Duration::from_millis(floor),
            ceiling: Duration::from_millis(ceiling),
        })
    }

    pub fn validate(&self) -> RelayResult<()> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(RelayError::Config(format!(
                "reconnect factor must be >= 1, got {}",
                self.factor
            )));
        }
        if self.floor.is_zero() {
            return Err(RelayError::Config("reconnect delay floor must be > 0".into()));
        }
        if self.floor > self.ceiling {
            return Err(RelayError::Config(format!(
                "reconnect delay floor ({:?}) exceeds ceiling ({:?})",
                self.floor, self.ceiling
            )));
        }
        Ok(())
    }
}

/// Backoff bookkeeping, owned by one supervisor.
#[derive(Debug)]
pub struct ReconnectState {
    current_delay: Duration,
    floor: Duration,
    ceiling: Duration,
    factor: f64,
    pending: Option<JoinHandle<()>>,
    /// Bumped whenever the pending chain is cancelled.
    epoch: u64,
    stopped: bool,
}

impl ReconnectState {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            current_delay: config.floor,
            floor: config.floor,
            ceiling: config.ceiling,
            factor: config.factor,
            pending: None,
            epoch: 0,
            stopped: false,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Advance to the next delay: `min(current * factor, ceiling)`.
    pub fn grow(&mut self) -> Duration {
        let ceiling_nanos = self.ceiling.as_nanos() as f64;
        let next_nanos = (self.current_delay.as_nanos() as f64 * self.factor)
            .round()
            .min(ceiling_nanos);
        self.current_delay = Duration::from_nanos(next_nanos as u64);
        self.current_delay
    }

    /// Cancel any pending chain and return the delay to the floor.
    pub fn reset(&mut self) {
        self.epoch += 1;
        if let Some(handle) = self.pending.take() {
            handle.abort();
            debug!("cancelled pending reconnect");
        }
        self.current_delay = self.floor;
    }
}

struct Shared {
    state: Mutex<ReconnectState>,
    connection: WeakClientConnection,
}

impl Shared {
    fn on_close(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.stopped {
            debug!("reconnect supervisor stopped, ignoring close");
            return;
        }
        if state.pending.is_some() {
            debug!("reconnect already pending");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, cannot schedule reconnect");
            return;
        };

        let epoch = state.epoch;
        let delay = state.current_delay;
        info!("connection closed, reconnecting in {}ms", delay.as_millis());

        let shared = self.clone();
        state.pending = Some(runtime.spawn(shared.run_chain(epoch, delay)));
    }

    fn on_connect(&self) {
        self.state.lock().reset();
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }

    async fn run_chain(self: Arc<Self>, epoch: u64, first_delay: Duration) {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;
            if !self.is_current(epoch) {
                return;
            }
            let Some(connection) = self.connection.upgrade() else {
                debug!("connection dropped, ending reconnect chain");
                return;
            };

            info!("reconnect attempt after {}ms", delay.as_millis());
            connection.restart();
            drop(connection);

            delay = {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    return;
                }
                state.grow()
            };
            debug!("next reconnect attempt in {}ms", delay.as_millis());
        }
    }
}

/// Keeps a [`ClientConnection`] reconnecting after it closes.
///
/// The supervisor stays attached for the lifetime of the connection; the
/// returned value is only needed to inspect or stop it. A `failure` event
/// never triggers a retry, only `close` does.
#[derive(Clone)]
pub struct ReconnectSupervisor {
    shared: Arc<Shared>,
}

impl ReconnectSupervisor {
    /// Attach a supervisor to `connection`.
    ///
    /// Fails without touching the connection when `config` does not pass
    /// [`ReconnectConfig::validate`].
    pub fn attach(connection: &ClientConnection, config: ReconnectConfig) -> RelayResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(ReconnectState::new(&config)),
            connection: connection.downgrade(),
        });

        {
            let shared = shared.clone();
            connection.on(events::CLOSE, move |_: &Value| shared.on_close());
        }
        {
            let shared = shared.clone();
            connection.on(events::CONNECT, move |_: &Value| shared.on_connect());
        }

        Ok(Self { shared })
    }

    /// The delay the next scheduled attempt will wait.
    pub fn current_delay(&self) -> Duration {
        self.shared.state.lock().current_delay()
    }

    /// Whether a retry chain is running.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Cancel any retry chain and ignore future closes.
    ///
    /// An attempt already inside `restart` completes.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        state.reset();
        info!("reconnect supervisor stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }
}
