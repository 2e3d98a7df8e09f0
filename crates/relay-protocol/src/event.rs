//! The event envelope.
//!
//! Events are the fundamental unit of communication. The payload is kept as
//! raw JSON so relays forward it without knowing its shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::names;
use crate::codec::ProtocolError;

/// A named event with an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `makeMove` or `ice-candidate`.
    #[serde(rename = "event")]
    pub name: String,
    /// Event payload. Missing payloads decode as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Create an event without a payload.
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    /// Create an `error` event carrying a human-readable message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(names::ERROR, Value::String(message.into()))
    }

    /// Create an event from a serializable payload record.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn with_payload<T: Serialize>(
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(name, serde_json::to_value(payload)?))
    }

    /// Decode the payload into a typed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(T::deserialize(&self.data)?)
    }

    /// Check the event name.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// The error message if this is an `error` event with a string payload.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        if self.is(names::ERROR) {
            self.data.as_str()
        } else {
            None
        }
    }
}
