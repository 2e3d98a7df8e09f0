//! # relay-core
//!
//! Session lifecycle and signaling for the relay gateway.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **SessionRegistry** - One backend session per external session
//! - **RelayNamespace** - Per-domain forwarding between the two
//! - **RoomDirectory** - Room membership and peer-targeted signaling relay
//! - **Connector / BackendSession** - The seam to outbound transports
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────────┐
//! │   External   │────▶│ RelayNamespace │────▶│ SessionRegistry │
//! │   session    │◀────│  (game/meet)   │     └────────┬────────┘
//! └──────────────┘     └────────────────┘              │ owns
//!        ▲                                    ┌────────▼────────┐
//!        └──────── RelayInstruction ──────────│ BackendSession  │
//!                                             └─────────────────┘
//! ```
//!
//! The room directory runs on the signaling service side of a meeting
//! backend session.

pub mod backend;
pub mod directory;
pub mod memory;
pub mod namespace;
pub mod registry;
pub mod room;
pub mod session;

pub use backend::{
    BackendError, BackendSession, BackendSink, ConnectError, ConnectRequest, Connector,
    InstructionKind, RelayInstruction,
};
pub use directory::{
    DirectoryConfig, JoinOutcome, MeetingLog, Outbox, RoomDirectory, SignalingError,
};
pub use namespace::{RelayError, RelayNamespace};
pub use registry::{RegistryStats, SessionRegistry};
pub use room::{Room, RoomId};
pub use session::SessionId;
