//! Session registry.
//!
//! Maps each external session to the backend session it owns. The registry
//! is the only place backend sessions are created and torn down.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{BackendSession, ConnectError, ConnectRequest, Connector};
use crate::session::SessionId;

/// Registry entry.
struct Registration {
    backend: Arc<dyn BackendSession>,
    identity: Option<String>,
}

/// Concurrency-safe map from external session to backend session.
///
/// Each key is mutated only by the task serving its external session, and no
/// shard guard is held across the connector's network call.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Registration>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a backend session through `connector` and register it.
    ///
    /// Nothing is inserted when the connector fails.
    ///
    /// # Errors
    ///
    /// Returns the connector's error, or [`ConnectError::AlreadyConnected`]
    /// if the session already owns a backend session.
    pub async fn create(
        &self,
        request: ConnectRequest,
        connector: &dyn Connector,
    ) -> Result<Arc<dyn BackendSession>, ConnectError> {
        let session = request.session.clone();
        let identity = request.identity.clone();

        if self.sessions.contains_key(&session) {
            return Err(ConnectError::AlreadyConnected(session));
        }

        let backend = connector.connect(request).await?;

        let inserted = match self.sessions.entry(session.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    backend: Arc::clone(&backend),
                    identity,
                });
                true
            }
        };

        if !inserted {
            if let Err(e) = backend.close().await {
                warn!(session = %session, error = %e, "Failed to close duplicate backend");
            }
            return Err(ConnectError::AlreadyConnected(session));
        }

        info!(session = %session, target = %backend.target(), "Backend session registered");
        Ok(backend)
    }

    /// Look up the backend session of an external session.
    #[must_use]
    pub fn get(&self, session: &SessionId) -> Option<Arc<dyn BackendSession>> {
        self.sessions.get(session).map(|r| Arc::clone(&r.backend))
    }

    /// Close and unregister a backend session.
    ///
    /// Close failures are logged, not returned. Removing an absent session
    /// is a no-op. Returns whether an entry was removed.
    pub async fn remove(&self, session: &SessionId) -> bool {
        let Some((_, registration)) = self.sessions.remove(session) else {
            debug!(session = %session, "No backend session to remove");
            return false;
        };

        if let Err(e) = registration.backend.close().await {
            warn!(session = %session, error = %e, "Error closing backend session");
        }

        info!(session = %session, "Backend session removed");
        true
    }

    /// Close and unregister every backend session.
    pub async fn close_all(&self) {
        let sessions: Vec<SessionId> = self.sessions.iter().map(|r| r.key().clone()).collect();
        for session in sessions {
            self.remove(&session).await;
        }
    }

    /// Identity supplied when the session connected.
    #[must_use]
    pub fn identity(&self, session: &SessionId) -> Option<String> {
        self.sessions
            .get(session)
            .and_then(|r| r.identity.clone())
    }

    /// Check if a session has a backend session.
    #[must_use]
    pub fn contains(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of backend sessions whose transport is healthy.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|r| r.backend.is_healthy())
            .count()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.len(),
            healthy_backends: self.healthy_count(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered external sessions.
    pub active_sessions: usize,
    /// Backend sessions with a healthy transport.
    pub healthy_backends: usize,
}
