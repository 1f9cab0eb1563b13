use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NegotiationError;

/// Stable identifier of a call participant as known to the relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for status lines, mirroring how principals are displayed.
    pub fn short(&self) -> String {
        const LIMIT: usize = 16;
        if self.0.chars().count() <= LIMIT {
            self.0.clone()
        } else {
            let head: String = self.0.chars().take(LIMIT).collect();
            format!("{head}...")
        }
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PartyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("party id must not be empty".into());
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for PartyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    Initiator,
    Receiver,
}

impl CallRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CallRole::Initiator => "initiator",
            CallRole::Receiver => "receiver",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn has_video(self) -> bool {
        matches!(self, CallType::Video)
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallType::Audio => f.write_str("audio"),
            CallType::Video => f.write_str("video"),
        }
    }
}

/// State reported by the native peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Status of a call as observed by the controller's owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallStatus {
    #[default]
    Idle,
    Initializing,
    Connecting,
    Connected,
    Failed,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
}

impl SdpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
            SdpKind::Pranswer => "pranswer",
        }
    }
}

/// Negotiation payload produced by the native connection.
///
/// The text form is the JSON a browser produces for `RTCSessionDescriptionInit`,
/// so blobs written by either kind of peer can be read by the other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn to_blob(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_blob(blob: &str) -> Result<Self, NegotiationError> {
        let desc: SessionDescription = serde_json::from_str(blob)
            .map_err(|err| NegotiationError::MalformedRemoteDescription(err.to_string()))?;
        if desc.sdp.trim().is_empty() {
            return Err(NegotiationError::MalformedRemoteDescription(
                "empty sdp".into(),
            ));
        }
        Ok(desc)
    }
}

/// Candidate blob in the shape of `RTCIceCandidate.toJSON()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn to_blob(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_blob(blob: &str) -> Result<Self, NegotiationError> {
        serde_json::from_str(blob).map_err(|err| NegotiationError::MalformedCandidate(err.to_string()))
    }
}

/// ICE candidate as stored and returned by the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCandidate {
    pub sender: PartyId,
    pub receiver: PartyId,
    pub timestamp: u64,
    pub payload: String,
}

impl RelayCandidate {
    pub fn key(&self) -> CandidateKey {
        CandidateKey {
            sender: self.sender.clone(),
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        }
    }
}

/// Identity of a relay-delivered candidate for deduplication.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CandidateKey {
    pub sender: PartyId,
    pub timestamp: u64,
    pub payload: String,
}
