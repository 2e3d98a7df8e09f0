//! Relay namespaces.
//!
//! A namespace bridges the external sessions of one domain to their backend
//! sessions. It never talks to a transport directly: the caller feeds it
//! client events and relay instructions and writes whatever it returns back
//! to the external session.

use relay_protocol::{Domain, Event};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::backend::{BackendError, BackendSink, ConnectError, ConnectRequest, Connector};
use crate::backend::{InstructionKind, RelayInstruction};
use crate::registry::SessionRegistry;
use crate::session::SessionId;

/// Relay errors, all scoped to one external session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The backend session could not be opened.
    #[error("Failed to connect to {domain} server")]
    Connect {
        domain: Domain,
        #[source]
        source: ConnectError,
    },

    /// The session has no backend session.
    #[error("Backend connection not found")]
    NotFound,

    /// The event is not part of the domain's client catalogue.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The backend session rejected the event.
    #[error("Failed to forward event: {0}")]
    Forward(#[from] BackendError),
}

impl RelayError {
    /// The `error` event to send the external session, if any.
    ///
    /// Unknown events are dropped without notifying the client.
    #[must_use]
    pub fn to_event(&self) -> Option<Event> {
        match self {
            RelayError::UnknownEvent(_) => None,
            other => Some(Event::error(other.to_string())),
        }
    }
}

/// Bridges one domain's external sessions to their backend sessions.
pub struct RelayNamespace {
    domain: Domain,
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn Connector>,
}

impl RelayNamespace {
    /// Create a namespace with its own registry.
    #[must_use]
    pub fn new(domain: Domain, connector: Arc<dyn Connector>) -> Self {
        Self::with_registry(domain, Arc::new(SessionRegistry::new()), connector)
    }

    /// Create a namespace over an existing registry.
    #[must_use]
    pub fn with_registry(
        domain: Domain,
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            domain,
            registry,
            connector,
        }
    }

    /// The namespace's domain.
    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// The namespace's registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Open the backend session for a newly connected external session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connect`] if the backend is unreachable. No
    /// state is left behind in that case.
    pub async fn on_connect(
        &self,
        session: &SessionId,
        identity: Option<String>,
        sink: BackendSink,
    ) -> Result<(), RelayError> {
        let request = ConnectRequest::new(session.clone(), identity, sink);

        match self.registry.create(request, self.connector.as_ref()).await {
            Ok(_) => {
                debug!(domain = %self.domain, session = %session, "Relay established");
                Ok(())
            }
            Err(source) => {
                warn!(domain = %self.domain, session = %session, error = %source, "Backend connect failed");
                Err(RelayError::Connect {
                    domain: self.domain,
                    source,
                })
            }
        }
    }

    /// Tear down the backend session of a disconnected external session.
    ///
    /// Safe to call more than once.
    pub async fn on_disconnect(&self, session: &SessionId) -> bool {
        debug!(domain = %self.domain, session = %session, "External session disconnected");
        self.registry.remove(session).await
    }

    /// Forward a client event to the session's backend, unmodified.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is not in the domain's catalogue, the
    /// session has no backend session, or the backend rejects the event.
    pub async fn on_client_event(&self, session: &SessionId, event: Event) -> Result<(), RelayError> {
        if !self.domain.accepts_client_event(&event.name) {
            warn!(domain = %self.domain, session = %session, event = %event.name, "Dropping unknown client event");
            return Err(RelayError::UnknownEvent(event.name));
        }

        let Some(backend) = self.registry.get(session) else {
            debug!(domain = %self.domain, session = %session, event = %event.name, "No backend session");
            return Err(RelayError::NotFound);
        };

        trace!(domain = %self.domain, session = %session, event = %event.name, "Client -> backend");
        backend.emit(event).await?;
        Ok(())
    }

    /// Turn a backend report into the event for its external session.
    ///
    /// Returns `None` when nothing should be sent.
    #[must_use]
    pub fn on_backend_event(&self, instruction: RelayInstruction) -> Option<Event> {
        let RelayInstruction { session, kind } = instruction;

        match kind {
            InstructionKind::Deliver(event) => {
                if self.domain.accepts_backend_event(&event.name) {
                    trace!(domain = %self.domain, session = %session, event = %event.name, "Backend -> client");
                    Some(event)
                } else {
                    warn!(domain = %self.domain, session = %session, event = %event.name, "Dropping unknown backend event");
                    None
                }
            }
            InstructionKind::Fault(reason) => {
                warn!(domain = %self.domain, session = %session, reason = %reason, "Backend session failed");
                Some(Event::error(format!("Lost connection to {} server", self.domain)))
            }
        }
    }
}
