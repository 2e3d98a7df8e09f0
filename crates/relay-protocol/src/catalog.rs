//! Relay domains and their event catalogues.
//!
//! A domain only relays the events it knows about. Client events flow from
//! the external session to the backend, backend events flow the other way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event names.
pub mod names {
    /// Error notification, valid in both domains and both directions.
    pub const ERROR: &str = "error";

    // Game, client -> backend
    pub const CREATE_MATCH: &str = "createMatch";
    pub const JOIN_MATCH: &str = "joinMatch";
    pub const MAKE_MOVE: &str = "makeMove";
    pub const RESTART_GAME: &str = "restartGame";

    // Game, backend -> client
    pub const MATCH_CREATED: &str = "matchCreated";
    pub const MATCH_JOINED: &str = "matchJoined";
    pub const GAME_STATE: &str = "gameState";

    // Meeting, client -> backend
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";

    // Meeting, both directions
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE_CANDIDATE: &str = "ice-candidate";

    // Meeting, backend -> client
    pub const ROOM_JOINED: &str = "room-joined";
    pub const NEW_PEER: &str = "new-peer";
    pub const PEER_DISCONNECTED: &str = "peer-disconnected";
    pub const ROOM_FULL: &str = "room-full";
}

const GAME_CLIENT_EVENTS: &[&str] = &[
    names::CREATE_MATCH,
    names::JOIN_MATCH,
    names::MAKE_MOVE,
    names::RESTART_GAME,
];

const GAME_BACKEND_EVENTS: &[&str] = &[
    names::MATCH_CREATED,
    names::MATCH_JOINED,
    names::GAME_STATE,
    names::ERROR,
];

const MEETING_CLIENT_EVENTS: &[&str] = &[
    names::JOIN,
    names::LEAVE,
    names::OFFER,
    names::ANSWER,
    names::ICE_CANDIDATE,
];

const MEETING_BACKEND_EVENTS: &[&str] = &[
    names::ROOM_JOINED,
    names::NEW_PEER,
    names::PEER_DISCONNECTED,
    names::OFFER,
    names::ANSWER,
    names::ICE_CANDIDATE,
    names::ERROR,
    names::ROOM_FULL,
];

/// A relay domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Multiplayer game sessions.
    Game,
    /// Video meeting signaling sessions.
    Meeting,
}

impl Domain {
    /// All domains.
    pub const ALL: [Domain; 2] = [Domain::Game, Domain::Meeting];

    /// Lowercase domain name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Game => "game",
            Domain::Meeting => "meeting",
        }
    }

    /// Events accepted from external sessions.
    #[must_use]
    pub fn client_events(&self) -> &'static [&'static str] {
        match self {
            Domain::Game => GAME_CLIENT_EVENTS,
            Domain::Meeting => MEETING_CLIENT_EVENTS,
        }
    }

    /// Events accepted from backend sessions.
    #[must_use]
    pub fn backend_events(&self) -> &'static [&'static str] {
        match self {
            Domain::Game => GAME_BACKEND_EVENTS,
            Domain::Meeting => MEETING_BACKEND_EVENTS,
        }
    }

    /// Whether an external session may send this event.
    #[must_use]
    pub fn accepts_client_event(&self, name: &str) -> bool {
        self.client_events().contains(&name)
    }

    /// Whether a backend session may send this event.
    #[must_use]
    pub fn accepts_backend_event(&self, name: &str) -> bool {
        self.backend_events().contains(&name)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "game" => Ok(Domain::Game),
            "meeting" => Ok(Domain::Meeting),
            _ => Err("Invalid domain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_catalogue() {
        let game = Domain::Game;
        assert!(game.accepts_client_event("createMatch"));
        assert!(game.accepts_client_event("restartGame"));
        assert!(!game.accepts_client_event("join"));
        assert!(game.accepts_backend_event("gameState"));
        assert!(game.accepts_backend_event("error"));
        assert!(!game.accepts_backend_event("room-joined"));
    }

    #[test]
    fn test_meeting_catalogue() {
        let meeting = Domain::Meeting;
        assert!(meeting.accepts_client_event("ice-candidate"));
        assert!(!meeting.accepts_client_event("room-joined"));
        assert!(meeting.accepts_backend_event("room-full"));
        assert!(meeting.accepts_backend_event("offer"));
        assert!(!meeting.accepts_backend_event("matchCreated"));
    }

    #[test]
    fn test_domain_names() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>(), Ok(domain));
        }
        assert!("chat".parse::<Domain>().is_err());
        assert_eq!(Domain::Meeting.to_string(), "meeting");
    }
}
