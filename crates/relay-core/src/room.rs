//! Signaling rooms.
//!
//! A room is a named group of meeting sessions. Rooms exist only while they
//! have members.

use relay_protocol::signaling::PeerInfo;
use std::collections::HashMap;
use tracing::trace;

use crate::session::SessionId;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// A room identifier.
pub type RoomId = String;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// A room member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Identity supplied with the join.
    pub identity: Option<String>,
    /// Set once the member has completed a join.
    pub joined: bool,
    /// Join order within the room.
    seq: u64,
}

/// A signaling room.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<SessionId, Member>,
    next_seq: u64,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a session is a member.
    #[must_use]
    pub fn contains(&self, session: &SessionId) -> bool {
        self.members.contains_key(session)
    }

    /// Get a member.
    #[must_use]
    pub fn member(&self, session: &SessionId) -> Option<&Member> {
        self.members.get(session)
    }

    /// Add a member, or refresh the identity of an existing one.
    ///
    /// Returns `true` if this is a new member. A rejoining member keeps its
    /// place in the join order.
    pub fn insert(&mut self, session: SessionId, identity: Option<String>) -> bool {
        if let Some(member) = self.members.get_mut(&session) {
            member.identity = identity;
            member.joined = true;
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(room = %self.id, session = %session, "Member added");
        self.members.insert(
            session,
            Member {
                identity,
                joined: true,
                seq,
            },
        );
        true
    }

    /// Remove a member.
    pub fn remove(&mut self, session: &SessionId) -> Option<Member> {
        let member = self.members.remove(session);
        if member.is_some() {
            trace!(room = %self.id, session = %session, "Member removed");
        }
        member
    }

    /// Member ids in join order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<SessionId> {
        self.ordered().into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Every member except `session`, in join order.
    #[must_use]
    pub fn peers_except(&self, session: &SessionId) -> Vec<PeerInfo> {
        self.ordered()
            .into_iter()
            .filter(|(id, _)| *id != session)
            .map(|(id, member)| PeerInfo {
                id: id.to_string(),
                user_email: member.identity.clone(),
            })
            .collect()
    }

    fn ordered(&self) -> Vec<(&SessionId, &Member)> {
        let mut members: Vec<_> = self.members.iter().collect();
        members.sort_by_key(|(_, m)| m.seq);
        members
    }
}
