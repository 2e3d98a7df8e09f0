//! # relay-transport
//!
//! Outbound transports for the relay gateway.
//!
//! The gateway opens one backend session per external session. This crate
//! provides the [`Connector`](relay_core::Connector) implementations that
//! open them:
//!
//! - **WebSocket** - JSON or length-prefixed MessagePack over tokio-tungstenite
//!
//! Initial connects follow a bounded [`RetryPolicy`]. Sessions are never
//! reopened once established; a dropped backend is reported to the owner as
//! a fault.
//!
//! ```rust,ignore
//! use relay_transport::{RetryPolicy, WebSocketConfig, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new(WebSocketConfig {
//!     retry: RetryPolicy::default(),
//!     ..WebSocketConfig::new("ws://127.0.0.1:3000/socket")
//! });
//! ```

pub mod retry;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use retry::{Backoff, RetryPolicy};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketBackend, WebSocketConfig, WebSocketConnector};
