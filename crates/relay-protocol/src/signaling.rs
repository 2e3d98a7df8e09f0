//! Payload records for the meeting signaling exchange.
//!
//! Field names follow the browser client's JSON (`targetId`, `peerId`,
//! `peerInfo`, `user_email`). SDP and ICE bodies stay opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `join` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub room: String,
    #[serde(default)]
    pub user_email: Option<String>,
}

/// `leave` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub room: String,
}

/// `offer` request from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub room: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub offer: Value,
    #[serde(default)]
    pub user_email: Option<String>,
}

/// `answer` request from the callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub room: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub answer: Value,
    #[serde(default)]
    pub user_email: Option<String>,
}

/// `ice-candidate` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateRequest {
    pub room: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub candidate: Value,
}

/// One entry of the `room-joined` peer list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub user_email: Option<String>,
}

/// `room-joined`, sent to the joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomJoined {
    pub room: String,
    pub peers: Vec<String>,
    #[serde(rename = "peerInfo")]
    pub peer_info: Vec<PeerInfo>,
}

impl RoomJoined {
    /// Build from the other members, in join order.
    #[must_use]
    pub fn new(room: impl Into<String>, others: Vec<PeerInfo>) -> Self {
        Self {
            room: room.into(),
            peers: others.iter().map(|p| p.id.clone()).collect(),
            peer_info: others,
        }
    }
}

/// `new-peer`, sent to existing members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPeer {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub user_email: Option<String>,
}

/// `peer-disconnected`, sent to remaining members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDisconnected {
    #[serde(rename = "peerId")]
    pub peer_id: String,
}

/// `room-full`, sent to a rejected joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomFull {
    pub room: String,
}

/// `offer` as delivered to the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedOffer {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub offer: Value,
    pub user_email: Option<String>,
}

/// `answer` as delivered to the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedAnswer {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub answer: Value,
    pub user_email: Option<String>,
}

/// `ice-candidate` as delivered to the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedIceCandidate {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub candidate: Value,
}
