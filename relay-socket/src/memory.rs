//! In-process transport.
//!
//! [`MemoryNetwork`] is both a [`Connector`] and a [`Listener`]: clients that
//! connect through it are paired with the server bound to it. Each direction
//! of a session is an unbounded tokio channel drained by its own task, so
//! callbacks arrive asynchronously and in order, as they would from a real
//! socket. Requires a tokio runtime.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use relay_core::error::{RelayError, RelayResult};

use crate::transport::{
    ClientTransport, Connector, Listener, Session, SessionAcceptor, SessionListener,
    TransportHandler,
};

enum ToClient {
    Open,
    Message(String),
    Close,
}

enum ToServer {
    Data(String),
    Close,
}

/// Both directions of one session.
struct Pipe {
    to_client: mpsc::UnboundedSender<ToClient>,
    to_server: mpsc::UnboundedSender<ToServer>,
    closed: AtomicBool,
}

impl Pipe {
    /// Signal close to both ends, once.
    fn shut(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.to_client.send(ToClient::Close);
        let _ = self.to_server.send(ToServer::Close);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryClient {
    pipe: Arc<Pipe>,
}

impl ClientTransport for MemoryClient {
    fn send(&self, frame: &str) -> RelayResult<()> {
        if self.pipe.is_closed() {
            return Err(RelayError::Transport("session closed".into()));
        }
        self.pipe
            .to_server
            .send(ToServer::Data(frame.to_string()))
            .map_err(|_| RelayError::Transport("server end gone".into()))
    }

    fn close(&self) {
        self.pipe.shut();
    }
}

struct MemorySession {
    pipe: Arc<Pipe>,
}

impl Session for MemorySession {
    fn write(&self, frame: &str) -> RelayResult<()> {
        if self.pipe.is_closed() {
            return Err(RelayError::Transport("session closed".into()));
        }
        self.pipe
            .to_client
            .send(ToClient::Message(frame.to_string()))
            .map_err(|_| RelayError::Transport("client end gone".into()))
    }

    fn close(&self) {
        self.pipe.shut();
    }
}

/// An in-process network with room for one server.
pub struct MemoryNetwork {
    acceptor: Mutex<Option<Arc<dyn SessionAcceptor>>>,
    accepting: AtomicBool,
    attempts: AtomicUsize,
    sessions: Mutex<Vec<Weak<Pipe>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            acceptor: Mutex::new(None),
            accepting: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Refuse (or accept again) new connections. Refused connections close
    /// without ever opening.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far.
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of sessions that have not closed.
    pub fn live_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock();
        prune(&mut sessions);
        sessions.len()
    }

    /// Close every live session, as if the network dropped.
    pub fn drop_all(&self) {
        let pipes: Vec<Arc<Pipe>> = self
            .sessions
            .lock()
            .drain(..)
            .filter_map(|pipe| pipe.upgrade())
            .collect();
        debug!("dropping {} memory session(s)", pipes.len());
        for pipe in pipes {
            pipe.shut();
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for MemoryNetwork {
    fn on_connection(&self, acceptor: Arc<dyn SessionAcceptor>) {
        *self.acceptor.lock() = Some(acceptor);
    }
}

impl Connector for MemoryNetwork {
    fn connect(
        &self,
        url: &str,
        handler: Arc<dyn TransportHandler>,
    ) -> RelayResult<Box<dyn ClientTransport>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RelayError::Transport("memory transport needs a tokio runtime".into()))?;
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (to_server, server_rx) = mpsc::unbounded_channel();
        let pipe = Arc::new(Pipe {
            to_client,
            to_server,
            closed: AtomicBool::new(false),
        });

        runtime.spawn(pump_client(client_rx, handler));

        let acceptor = self
            .accepting
            .load(Ordering::SeqCst)
            .then(|| self.acceptor.lock().clone())
            .flatten();

        match acceptor {
            Some(acceptor) => {
                trace!("memory connect to {url}");
                let _ = pipe.to_client.send(ToClient::Open);
                runtime.spawn(pump_server(server_rx, acceptor, pipe.clone()));
                let mut sessions = self.sessions.lock();
                prune(&mut sessions);
                sessions.push(Arc::downgrade(&pipe));
            }
            None => {
                debug!("memory connect to {url} refused");
                pipe.shut();
            }
        }

        Ok(Box::new(MemoryClient { pipe }))
    }
}

/// Forget sessions that closed or were dropped.
fn prune(sessions: &mut Vec<Weak<Pipe>>) {
    sessions.retain(|pipe| pipe.upgrade().is_some_and(|pipe| !pipe.is_closed()));
}

async fn pump_client(mut rx: mpsc::UnboundedReceiver<ToClient>, handler: Arc<dyn TransportHandler>) {
    while let Some(message) = rx.recv().await {
        match message {
            ToClient::Open => handler.on_open(),
            ToClient::Message(frame) => handler.on_message(&frame),
            ToClient::Close => {
                handler.on_close();
                break;
            }
        }
    }
}

async fn pump_server(
    mut rx: mpsc::UnboundedReceiver<ToServer>,
    acceptor: Arc<dyn SessionAcceptor>,
    pipe: Arc<Pipe>,
) {
    let listener: Arc<dyn SessionListener> = acceptor.accept(Arc::new(MemorySession { pipe }));
    while let Some(message) = rx.recv().await {
        match message {
            ToServer::Data(frame) => listener.on_data(&frame),
            ToServer::Close => {
                listener.on_close();
                break;
            }
        }
    }
}
