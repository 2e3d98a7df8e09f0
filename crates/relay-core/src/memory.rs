//! In-memory backend sessions.
//!
//! [`MemoryConnector`] stands in for a real backend service: every emitted
//! event lands in an inbox the caller can read, and the caller can make the
//! backend speak, fail, or refuse connections.

use async_trait::async_trait;
use dashmap::DashMap;
use relay_protocol::Event;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::{
    BackendError, BackendSession, BackendSink, ConnectError, ConnectRequest, Connector,
};
use crate::session::SessionId;

/// Events received by the in-memory backend, tagged with the sender.
pub type Inbox = mpsc::UnboundedReceiver<(SessionId, Event)>;

/// A backend session living in process memory.
#[derive(Debug)]
pub struct MemoryBackend {
    session: SessionId,
    target: String,
    sink: BackendSink,
    inbox: mpsc::UnboundedSender<(SessionId, Event)>,
    healthy: AtomicBool,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Make the backend emit an event towards the external session.
    pub fn push(&self, event: Event) -> bool {
        self.sink.deliver(event)
    }

    /// Simulate a transport failure.
    pub fn fail(&self, reason: &str) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            self.sink.fault(reason);
        }
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendSession for MemoryBackend {
    fn session(&self) -> &SessionId {
        &self.session
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn emit(&self, event: Event) -> Result<(), BackendError> {
        if !self.is_healthy() {
            return Err(BackendError::Closed);
        }
        self.inbox
            .send((self.session.clone(), event))
            .map_err(|e| BackendError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::SeqCst);
        self.healthy.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Connector producing [`MemoryBackend`] sessions.
#[derive(Debug)]
pub struct MemoryConnector {
    target: String,
    reachable: AtomicBool,
    inbox: mpsc::UnboundedSender<(SessionId, Event)>,
    backends: DashMap<SessionId, Arc<MemoryBackend>>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Create a reachable connector and the inbox of its backend.
    #[must_use]
    pub fn new(target: impl Into<String>) -> (Self, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            target: target.into(),
            reachable: AtomicBool::new(true),
            inbox: tx,
            backends: DashMap::new(),
            attempts: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Make future connection attempts succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// The most recent backend opened for a session.
    #[must_use]
    pub fn backend(&self, session: &SessionId) -> Option<Arc<MemoryBackend>> {
        self.backends.get(session).map(|b| Arc::clone(&b))
    }

    /// Number of connection attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn BackendSession>, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ConnectError::Unreachable {
                target: self.target.clone(),
                reason: "connection refused".into(),
            });
        }

        let target = match &request.identity {
            Some(identity) => format!("{}?user_email={}", self.target, identity),
            None => self.target.clone(),
        };

        let backend = Arc::new(MemoryBackend {
            session: request.session.clone(),
            target,
            sink: request.sink,
            inbox: self.inbox.clone(),
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        debug!(session = %request.session, "Memory backend connected");
        self.backends
            .insert(request.session, Arc::clone(&backend));

        Ok(backend)
    }
}
