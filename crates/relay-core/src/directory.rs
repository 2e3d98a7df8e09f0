//! Room directory for the signaling service.
//!
//! The directory tracks which signaling sessions are attached, which rooms
//! they joined, and relays peer-targeted WebRTC messages between them.
//!
//! Delivery goes through one unbounded outbox per attached session, so a
//! broadcast is a series of independent non-blocking sends and never holds a
//! map guard while a member is being written to.

use dashmap::DashMap;
use relay_protocol::catalog::names;
use relay_protocol::signaling::{
    AnswerRequest, IceCandidateRequest, JoinRequest, LeaveRequest, NewPeer, OfferRequest,
    PeerDisconnected, PeerInfo, RelayedAnswer, RelayedIceCandidate, RelayedOffer, RoomFull,
    RoomJoined,
};
use relay_protocol::{Event, ProtocolError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::room::{validate_room_name, Room, RoomId};
use crate::session::SessionId;

/// Delivery handle of an attached session.
pub type Outbox = mpsc::UnboundedSender<Event>;

/// Signaling errors, reported to the sending session only.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// The payload does not match the event.
    #[error("Malformed {event} payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: ProtocolError,
    },

    /// Not a signaling event.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

impl SignalingError {
    /// The `error` event for the sending session.
    #[must_use]
    pub fn to_event(&self) -> Event {
        Event::error(self.to_string())
    }
}

/// Directory configuration.
#[derive(Debug, Clone, Default)]
pub struct DirectoryConfig {
    /// Maximum members per room. `None` means unlimited.
    pub max_room_size: Option<usize>,
}

/// Receives meeting-log entries for room activity.
///
/// Called while no directory guard is held. Implementations must not block;
/// delivery is best-effort.
pub trait MeetingLog: Send + Sync {
    /// Record one entry for a room.
    fn record(&self, room: &str, entry: String);
}

/// Result of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Joined; `peers` other members were present.
    Joined { peers: usize },
    /// The room was full and nothing changed.
    Full,
}

/// An attached signaling session.
struct Peer {
    identity: Option<String>,
    outbox: Outbox,
}

/// Room membership and peer-targeted relay.
pub struct RoomDirectory {
    /// Rooms indexed by name.
    rooms: DashMap<RoomId, Room>,
    /// Attached sessions.
    peers: DashMap<SessionId, Peer>,
    /// Configuration.
    config: DirectoryConfig,
    /// Meeting log for joins and explicit leaves.
    log: Option<Arc<dyn MeetingLog>>,
}

impl RoomDirectory {
    /// Create a directory with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DirectoryConfig::default())
    }

    /// Create a directory with custom configuration.
    #[must_use]
    pub fn with_config(config: DirectoryConfig) -> Self {
        info!("Creating room directory with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            peers: DashMap::new(),
            config,
            log: None,
        }
    }

    /// Report joins and leaves of identified members to a meeting log.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn MeetingLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Register the delivery handle of a newly connected session.
    pub fn attach(&self, session: SessionId, identity: Option<String>, outbox: Outbox) {
        debug!(session = %session, identity = ?identity, "Signaling session attached");
        self.peers.insert(session, Peer { identity, outbox });
    }

    /// Unregister a session and leave every room it is in.
    ///
    /// Returns the rooms that were left. Safe to call more than once.
    pub fn detach(&self, session: &SessionId) -> Vec<RoomId> {
        let left = self.leave_all(session);
        self.peers.remove(session);
        debug!(session = %session, rooms = left.len(), "Signaling session detached");
        left
    }

    /// Add a session to a room, creating the room if needed.
    ///
    /// The joiner receives `room-joined` with the other members; each other
    /// member receives `new-peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid.
    pub fn join(
        &self,
        room: &str,
        session: &SessionId,
        identity: Option<String>,
    ) -> Result<JoinOutcome, SignalingError> {
        validate_room_name(room).map_err(SignalingError::InvalidRoom)?;

        let others = {
            let mut entry = self.rooms.entry(room.to_string()).or_insert_with(|| {
                debug!(room = %room, "Creating room");
                Room::new(room)
            });

            let full = self
                .config
                .max_room_size
                .is_some_and(|max| !entry.contains(session) && entry.len() >= max);

            if full {
                None
            } else {
                entry.insert(session.clone(), identity.clone());
                Some(entry.peers_except(session))
            }
        };

        let Some(others) = others else {
            self.rooms.remove_if(room, |_, r| r.is_empty());
            info!(room = %room, session = %session, "Room full");
            self.send_payload(session, names::ROOM_FULL, &RoomFull { room: room.to_string() });
            return Ok(JoinOutcome::Full);
        };

        info!(room = %room, session = %session, peers = others.len(), "Joined room");

        let recipients: Vec<SessionId> = others.iter().map(|p| SessionId::new(p.id.as_str())).collect();
        let peers = others.len();

        self.send_payload(session, names::ROOM_JOINED, &RoomJoined::new(room, others));

        if let Some(email) = &identity {
            self.log_entry(room, format!("User {email} joined the room"));
        }

        let announce = NewPeer {
            peer_id: session.to_string(),
            user_email: identity,
        };
        for peer in &recipients {
            self.send_payload(peer, names::NEW_PEER, &announce);
        }

        Ok(JoinOutcome::Joined { peers })
    }

    /// Remove a session from a room.
    ///
    /// Empty rooms are deleted; otherwise remaining members receive
    /// `peer-disconnected`. An identified member's leave is written to the
    /// meeting log. Returns `false` if the session was not a member.
    pub fn leave(&self, room: &str, session: &SessionId) -> bool {
        let Some(identity) = self.remove_member(room, session) else {
            return false;
        };
        if let Some(email) = identity {
            self.log_entry(room, format!("User {email} left the room"));
        }
        true
    }

    /// Remove a member and notify the rest, returning its identity.
    fn remove_member(&self, room: &str, session: &SessionId) -> Option<Option<String>> {
        let (identity, remaining) = {
            let mut entry = self.rooms.get_mut(room)?;
            let member = entry.remove(session)?;
            (member.identity, entry.member_ids())
        };

        info!(room = %room, session = %session, remaining = remaining.len(), "Left room");

        if remaining.is_empty() {
            if self.rooms.remove_if(room, |_, r| r.is_empty()).is_some() {
                debug!(room = %room, "Deleted empty room");
            }
            return Some(identity);
        }

        let notice = PeerDisconnected {
            peer_id: session.to_string(),
        };
        for peer in &remaining {
            self.send_payload(peer, names::PEER_DISCONNECTED, &notice);
        }
        Some(identity)
    }

    /// Leave every room containing the session.
    ///
    /// Sessions normally sit in at most one room, but any number is handled.
    /// Disconnect cleanup is not written to the meeting log.
    pub fn leave_all(&self, session: &SessionId) -> Vec<RoomId> {
        let rooms = self.rooms_of(session);
        rooms
            .into_iter()
            .filter(|room| self.remove_member(room, session).is_some())
            .collect()
    }

    /// Deliver a signaling event to one session.
    ///
    /// Room membership is not checked. Events for sessions that are not
    /// attached are dropped. Returns whether the event was handed off.
    pub fn relay(&self, room: &str, from: &SessionId, target: &SessionId, event: Event) -> bool {
        trace!(room = %room, from = %from, target = %target, event = %event.name, "Relaying");
        let delivered = self.send(target, event);
        if !delivered {
            debug!(room = %room, from = %from, target = %target, "Relay target not attached, dropping");
        }
        delivered
    }

    /// Handle a signaling event sent by an attached session.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is unknown, malformed, or names an
    /// invalid room.
    pub fn handle(&self, session: &SessionId, event: Event) -> Result<(), SignalingError> {
        match event.name.as_str() {
            names::JOIN => {
                let req: JoinRequest = parse(&event)?;
                let identity = req.user_email.or_else(|| self.identity_of(session));
                self.join(&req.room, session, identity)?;
            }
            names::LEAVE => {
                let req: LeaveRequest = parse(&event)?;
                self.leave(&req.room, session);
            }
            names::OFFER => {
                let req: OfferRequest = parse(&event)?;
                let relayed = RelayedOffer {
                    peer_id: session.to_string(),
                    offer: req.offer,
                    user_email: req.user_email,
                };
                self.relay_payload(&req.room, session, req.target_id, names::OFFER, &relayed)?;
            }
            names::ANSWER => {
                let req: AnswerRequest = parse(&event)?;
                let relayed = RelayedAnswer {
                    peer_id: session.to_string(),
                    answer: req.answer,
                    user_email: req.user_email,
                };
                self.relay_payload(&req.room, session, req.target_id, names::ANSWER, &relayed)?;
            }
            names::ICE_CANDIDATE => {
                let req: IceCandidateRequest = parse(&event)?;
                let relayed = RelayedIceCandidate {
                    peer_id: session.to_string(),
                    candidate: req.candidate,
                };
                self.relay_payload(
                    &req.room,
                    session,
                    req.target_id,
                    names::ICE_CANDIDATE,
                    &relayed,
                )?;
            }
            other => return Err(SignalingError::UnknownEvent(other.to_string())),
        }
        Ok(())
    }

    /// Identity supplied when the session attached.
    #[must_use]
    pub fn identity_of(&self, session: &SessionId) -> Option<String> {
        self.peers.get(session).and_then(|p| p.identity.clone())
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of attached sessions.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Members of a room in join order.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<PeerInfo> {
        self.rooms
            .get(room)
            .map(|r| {
                r.member_ids()
                    .iter()
                    .map(|id| PeerInfo {
                        id: id.to_string(),
                        user_email: r.member(id).and_then(|m| m.identity.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rooms containing a session.
    #[must_use]
    pub fn rooms_of(&self, session: &SessionId) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|r| r.contains(session))
            .map(|r| r.key().clone())
            .collect()
    }

    fn relay_payload<T: serde::Serialize>(
        &self,
        room: &str,
        from: &SessionId,
        target: String,
        name: &str,
        payload: &T,
    ) -> Result<(), SignalingError> {
        let event = Event::with_payload(name, payload).map_err(|source| SignalingError::Malformed {
            event: name.to_string(),
            source,
        })?;
        self.relay(room, from, &SessionId::from(target), event);
        Ok(())
    }

    fn send_payload<T: serde::Serialize>(&self, target: &SessionId, name: &str, payload: &T) {
        match Event::with_payload(name, payload) {
            Ok(event) => {
                self.send(target, event);
            }
            Err(e) => warn!(session = %target, event = %name, error = %e, "Failed to build event"),
        }
    }

    fn log_entry(&self, room: &str, entry: String) {
        if let Some(log) = &self.log {
            trace!(room = %room, entry = %entry, "Meeting log entry");
            log.record(room, entry);
        }
    }

    fn send(&self, target: &SessionId, event: Event) -> bool {
        let Some(outbox) = self.peers.get(target).map(|p| p.outbox.clone()) else {
            return false;
        };
        if outbox.send(event).is_err() {
            warn!(session = %target, "Outbox closed, dropping event");
            return false;
        }
        true
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn parse<T: DeserializeOwned>(event: &Event) -> Result<T, SignalingError> {
    event.payload().map_err(|source| SignalingError::Malformed {
        event: event.name.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Client {
        id: SessionId,
        rx: mpsc::UnboundedReceiver<Event>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<Event> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn attach(dir: &RoomDirectory, id: &str, email: Option<&str>) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SessionId::new(id);
        dir.attach(id.clone(), email.map(String::from), tx);
        Client { id, rx }
    }

    #[test]
    fn test_join_notifies_both_sides_once() {
        let dir = RoomDirectory::new();
        let mut a = attach(&dir, "sid_a", Some("a@example.com"));
        let mut b = attach(&dir, "sid_b", Some("b@example.com"));

        dir.join("m-1", &a.id, Some("a@example.com".into())).unwrap();
        let a_events = a.drain();
        assert_eq!(a_events.len(), 1);
        assert_eq!(a_events[0].data["peers"], json!([]));

        let outcome = dir.join("m-1", &b.id, Some("b@example.com".into())).unwrap();
        assert_eq!(outcome, JoinOutcome::Joined { peers: 1 });

        let b_events = b.drain();
        assert_eq!(b_events.len(), 1);
        assert!(b_events[0].is("room-joined"));
        assert_eq!(b_events[0].data["peers"], json!(["sid_a"]));
        assert_eq!(
            b_events[0].data["peerInfo"],
            json!([{"id": "sid_a", "user_email": "a@example.com"}])
        );

        let a_events = a.drain();
        assert_eq!(a_events.len(), 1);
        assert!(a_events[0].is("new-peer"));
        assert_eq!(
            a_events[0].data,
            json!({"peerId": "sid_b", "user_email": "b@example.com"})
        );
    }

    #[test]
    fn test_sole_member_leave_deletes_room() {
        let dir = RoomDirectory::new();
        let a = attach(&dir, "sid_a", None);
        let mut b = attach(&dir, "sid_b", None);

        dir.join("m-1", &a.id, None).unwrap();
        assert!(dir.leave("m-1", &a.id));
        assert!(!dir.room_exists("m-1"));

        dir.join("m-1", &b.id, None).unwrap();
        let events = b.drain();
        assert_eq!(events[0].data["peers"], json!([]));
    }

    #[test]
    fn test_leave_notifies_remaining_members() {
        let dir = RoomDirectory::new();
        let mut a = attach(&dir, "sid_a", None);
        let b = attach(&dir, "sid_b", None);

        dir.join("m-1", &a.id, None).unwrap();
        dir.join("m-1", &b.id, None).unwrap();
        a.drain();

        assert!(dir.leave("m-1", &b.id));
        assert!(!dir.leave("m-1", &b.id));

        let events = a.drain();
        assert_eq!(events.len(), 1);
        assert!(events[0].is("peer-disconnected"));
        assert_eq!(events[0].data, json!({"peerId": "sid_b"}));
        assert_eq!(dir.members("m-1").len(), 1);
    }

    #[test]
    fn test_offer_is_unicast() {
        let dir = RoomDirectory::new();
        let mut a = attach(&dir, "sid_a", None);
        let mut b = attach(&dir, "sid_b", None);
        let mut c = attach(&dir, "sid_c", None);
        for client in [&a, &b, &c] {
            dir.join("m-1", &client.id, None).unwrap();
        }
        a.drain();
        b.drain();
        c.drain();

        let offer = Event::new(
            "offer",
            json!({"room": "m-1", "targetId": "sid_b", "offer": "SDP-X", "user_email": "a@example.com"}),
        );
        dir.handle(&a.id, offer).unwrap();

        let delivered = b.drain();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            delivered[0],
            Event::new(
                "offer",
                json!({"peerId": "sid_a", "offer": "SDP-X", "user_email": "a@example.com"})
            )
        );
        assert!(a.drain().is_empty());
        assert!(c.drain().is_empty());
    }

    #[test]
    fn test_relay_skips_membership_check() {
        let dir = RoomDirectory::new();
        let a = attach(&dir, "sid_a", None);
        let mut outsider = attach(&dir, "sid_out", None);

        let candidate = Event::new(
            "ice-candidate",
            json!({"room": "m-1", "targetId": "sid_out", "candidate": {"candidate": "c1"}}),
        );
        dir.handle(&a.id, candidate).unwrap();

        let events = outsider.drain();
        assert_eq!(
            events,
            vec![Event::new(
                "ice-candidate",
                json!({"peerId": "sid_a", "candidate": {"candidate": "c1"}})
            )]
        );
    }

    #[test]
    fn test_relay_to_unknown_target_is_dropped() {
        let dir = RoomDirectory::new();
        let a = attach(&dir, "sid_a", None);

        let answer = Event::new(
            "answer",
            json!({"room": "m-1", "targetId": "sid_ghost", "answer": "SDP-Y"}),
        );
        assert!(dir.handle(&a.id, answer).is_ok());
    }

    #[test]
    fn test_detach_leaves_every_room() {
        let dir = RoomDirectory::new();
        let a = attach(&dir, "sid_a", None);
        let mut b = attach(&dir, "sid_b", None);

        dir.join("m-1", &a.id, None).unwrap();
        dir.join("m-2", &a.id, None).unwrap();
        dir.join("m-2", &b.id, None).unwrap();
        b.drain();

        let mut left = dir.detach(&a.id);
        left.sort();
        assert_eq!(left, ["m-1", "m-2"]);
        assert!(!dir.room_exists("m-1"));
        assert_eq!(b.drain()[0].data, json!({"peerId": "sid_a"}));

        assert!(dir.detach(&a.id).is_empty());
        assert_eq!(dir.peer_count(), 1);
    }

    #[test]
    fn test_join_falls_back_to_attach_identity() {
        let dir = RoomDirectory::new();
        let a = attach(&dir, "sid_a", Some("a@example.com"));

        dir.handle(&a.id, Event::new("join", json!({"room": "m-1"}))).unwrap();
        assert_eq!(
            dir.members("m-1"),
            vec![PeerInfo {
                id: "sid_a".into(),
                user_email: Some("a@example.com".into())
            }]
        );
    }

    #[test]
    fn test_room_full() {
        let dir = RoomDirectory::with_config(DirectoryConfig {
            max_room_size: Some(1),
        });
        let a = attach(&dir, "sid_a", None);
        let mut b = attach(&dir, "sid_b", None);

        dir.join("m-1", &a.id, None).unwrap();
        assert_eq!(dir.join("m-1", &b.id, None).unwrap(), JoinOutcome::Full);
        assert_eq!(b.drain(), vec![Event::new("room-full", json!({"room": "m-1"}))]);
        assert_eq!(dir.members("m-1").len(), 1);

        // Rejoining as an existing member is not blocked.
        assert!(matches!(
            dir.join("m-1", &a.id, None).unwrap(),
            JoinOutcome::Joined { peers: 0 }
        ));
    }

    #[derive(Default)]
    struct RecordingLog {
        entries: std::sync::Mutex<Vec<(String, String)>>,
    }

    impl MeetingLog for RecordingLog {
        fn record(&self, room: &str, entry: String) {
            self.entries.lock().unwrap().push((room.to_string(), entry));
        }
    }

    impl RecordingLog {
        fn take(&self) -> Vec<(String, String)> {
            std::mem::take(&mut *self.entries.lock().unwrap())
        }
    }

    #[test]
    fn test_meeting_log_records_identified_joins_and_leaves() {
        let log = Arc::new(RecordingLog::default());
        let dir = RoomDirectory::new().with_log(log.clone());
        let a = attach(&dir, "sid_a", Some("a@example.com"));
        let b = attach(&dir, "sid_b", None);

        dir.join("m-1", &a.id, Some("a@example.com".into())).unwrap();
        dir.join("m-1", &b.id, None).unwrap();
        assert_eq!(
            log.take(),
            vec![("m-1".to_string(), "User a@example.com joined the room".to_string())]
        );

        assert!(dir.leave("m-1", &b.id));
        assert!(log.take().is_empty());

        assert!(dir.leave("m-1", &a.id));
        assert_eq!(
            log.take(),
            vec![("m-1".to_string(), "User a@example.com left the room".to_string())]
        );

        // Leaving a room one is not in writes nothing.
        assert!(!dir.leave("m-1", &a.id));
        assert!(log.take().is_empty());
    }

    #[test]
    fn test_meeting_log_skips_rejected_joins_and_disconnects() {
        let log = Arc::new(RecordingLog::default());
        let dir = RoomDirectory::with_config(DirectoryConfig {
            max_room_size: Some(1),
        })
        .with_log(log.clone());
        let a = attach(&dir, "sid_a", Some("a@example.com"));
        let b = attach(&dir, "sid_b", Some("b@example.com"));

        dir.join("m-1", &a.id, Some("a@example.com".into())).unwrap();
        log.take();

        assert_eq!(
            dir.join("m-1", &b.id, Some("b@example.com".into())).unwrap(),
            JoinOutcome::Full
        );
        assert!(log.take().is_empty());

        assert_eq!(dir.detach(&a.id), vec!["m-1".to_string()]);
        assert!(!dir.room_exists("m-1"));
        assert!(log.take().is_empty());
    }

    #[test]
    fn test_invalid_room_is_rejected_without_side_effects() {
        let dir = RoomDirectory::new();
        let mut a = attach(&dir, "sid_a", None);
        let mut b = attach(&dir, "sid_b", None);
        dir.join("m-1", &b.id, None).unwrap();
        b.drain();

        let long = "r".repeat(crate::room::MAX_ROOM_NAME_LENGTH + 1);
        for room in ["", "bad\nname", long.as_str()] {
            let err = dir
                .handle(&a.id, Event::new("join", json!({ "room": room })))
                .unwrap_err();
            assert_eq!(err.to_event().name, "error");
        }

        assert_eq!(dir.room_count(), 1);
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        assert!(dir.rooms_of(&a.id).is_empty());
    }

    #[test]
    fn test_malformed_payloads() {
        let dir = RoomDirectory::new();
        let a = attach(&dir, "sid_a", None);

        let err = dir.handle(&a.id, Event::new("offer", json!({"room": "m-1"}))).unwrap_err();
        assert!(matches!(err, SignalingError::Malformed { .. }));
        assert_eq!(err.to_event().name, "error");

        let err = dir.handle(&a.id, Event::new("join", json!({"room": ""}))).unwrap_err();
        assert!(matches!(err, SignalingError::InvalidRoom(_)));

        let err = dir.handle(&a.id, Event::bare("createMatch")).unwrap_err();
        assert!(matches!(err, SignalingError::UnknownEvent(_)));
    }
}
