//! # relay-protocol
//!
//! Wire protocol definitions for the relay gateway.
//!
//! Every WebSocket message exchanged with external clients, backend services
//! and the signaling service carries exactly one [`Event`]: a name plus an
//! opaque JSON payload.
//!
//! ## Modules
//!
//! - `event` - The `{event, data}` envelope
//! - `catalog` - Domains and the event names each domain relays
//! - `signaling` - Typed records for the meeting signaling exchange
//! - `codec` - JSON text and length-prefixed MessagePack binary encodings
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Event};
//!
//! let event = Event::new("joinMatch", serde_json::json!("ABC123"));
//!
//! let text = codec::encode_text(&event).unwrap();
//! assert_eq!(codec::decode_text(&text).unwrap(), event);
//! ```

pub mod catalog;
pub mod codec;
pub mod event;
pub mod signaling;

pub use catalog::Domain;
pub use codec::{decode, decode_text, encode, encode_text, Encoding, ProtocolError};
pub use event::Event;
