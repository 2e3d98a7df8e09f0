//! Backend session abstraction.
//!
//! A backend session is the gateway's dedicated outbound connection to a
//! backend service on behalf of one external session. Connectors open them;
//! the registry owns them.
//!
//! Backend traffic never reaches the external session through callbacks.
//! Every backend event is wrapped in a [`RelayInstruction`] addressed to its
//! owning session and pushed through that session's [`BackendSink`].

use async_trait::async_trait;
use relay_protocol::Event;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::SessionId;

/// Errors opening a backend session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The backend could not be reached.
    #[error("Backend unreachable at {target}: {reason}")]
    Unreachable { target: String, reason: String },

    /// The connection attempt did not complete in time.
    #[error("Timed out connecting to {target}")]
    Timeout { target: String },

    /// The backend URL could not be built.
    #[error("Invalid backend target: {0}")]
    InvalidTarget(String),

    /// The session already owns a backend session.
    #[error("Session {0} already has a backend connection")]
    AlreadyConnected(SessionId),
}

/// Errors on an established backend session.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The session was closed or has failed.
    #[error("Backend connection closed")]
    Closed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// What a backend session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// An event emitted by the backend.
    Deliver(Event),
    /// The backend transport failed after being healthy.
    Fault(String),
}

/// A backend report tagged with the owning session.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayInstruction {
    /// Owning external session.
    pub session: SessionId,
    /// The report.
    pub kind: InstructionKind,
}

/// Addressed delivery path from a backend session to its external session.
///
/// Created before the connection attempt so nothing the backend sends while
/// the registry entry is being inserted can be lost.
#[derive(Debug, Clone)]
pub struct BackendSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<RelayInstruction>,
}

impl BackendSink {
    /// Create a sink and the receiver the external session drains.
    #[must_use]
    pub fn channel(session: SessionId) -> (Self, mpsc::UnboundedReceiver<RelayInstruction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session, tx }, rx)
    }

    /// The owning session.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Forward a backend event. Returns `false` once the external session is gone.
    pub fn deliver(&self, event: Event) -> bool {
        self.send(InstructionKind::Deliver(event))
    }

    /// Report a transport failure. Returns `false` once the external session is gone.
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        self.send(InstructionKind::Fault(reason.into()))
    }

    /// Whether the external session stopped listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, kind: InstructionKind) -> bool {
        self.tx
            .send(RelayInstruction {
                session: self.session.clone(),
                kind,
            })
            .is_ok()
    }
}

/// Everything a connector needs to open a backend session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Owning external session.
    pub session: SessionId,
    /// Identity supplied by the external session at connect time.
    pub identity: Option<String>,
    /// Delivery path for backend events.
    pub sink: BackendSink,
}

impl ConnectRequest {
    /// Create a connect request.
    #[must_use]
    pub fn new(session: SessionId, identity: Option<String>, sink: BackendSink) -> Self {
        Self {
            session,
            identity,
            sink,
        }
    }
}

/// A live outbound connection owned by one external session.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// The owning external session.
    fn session(&self) -> &SessionId;

    /// The backend this session is connected to.
    fn target(&self) -> &str;

    /// Send an event to the backend.
    ///
    /// Events emitted from one task are delivered in call order.
    async fn emit(&self, event: Event) -> Result<(), BackendError>;

    /// Close the session. Closing twice is not an error.
    async fn close(&self) -> Result<(), BackendError>;

    /// Whether the transport is still healthy.
    fn is_healthy(&self) -> bool;
}

/// Opens backend sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a backend session for `request.session`.
    ///
    /// Implementations own retry policy; callers make exactly one call.
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn BackendSession>, ConnectError>;
}
