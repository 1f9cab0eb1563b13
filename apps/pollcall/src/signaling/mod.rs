//! Store-and-forward relay contract and its clients.
//!
//! The relay is never pushed to the caller; everything the orchestrator learns
//! comes from a fetch, and every fetch may be stale, repeated or empty.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::model::{PartyId, RelayCandidate};

pub mod http;
pub mod memory;
pub mod wire;

pub use http::HttpSignalingChannel;
pub use memory::{MemoryRelay, RelayEndpoint};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Pending,
    Empty,
}

/// Contents of an offer or answer slot at the time of the fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFetch {
    pub state: SlotState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl SlotFetch {
    pub fn empty() -> Self {
        Self {
            state: SlotState::Empty,
            payload: None,
        }
    }

    pub fn pending(payload: impl Into<String>) -> Self {
        Self {
            state: SlotState::Pending,
            payload: Some(payload.into()),
        }
    }

    /// The payload, if the slot is pending and holds something non-blank.
    pub fn usable_payload(&self) -> Option<&str> {
        match (self.state, self.payload.as_deref()) {
            (SlotState::Pending, Some(payload)) if !payload.trim().is_empty() => Some(payload),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBatch {
    pub has_candidates: bool,
    pub candidates: Vec<RelayCandidate>,
}

impl CandidateBatch {
    pub fn new(candidates: Vec<RelayCandidate>) -> Self {
        Self {
            has_candidates: !candidates.is_empty(),
            candidates,
        }
    }
}

/// Request/response operations offered by the relay, from the point of view of
/// one local party.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// The party this channel speaks for.
    fn local_party(&self) -> &PartyId;

    async fn send_offer(&self, callee: &PartyId, offer: &str) -> Result<(), TransportError>;

    /// Offer left for the local party by `caller`.
    async fn fetch_offer(&self, caller: &PartyId) -> Result<SlotFetch, TransportError>;

    async fn send_answer(&self, caller: &PartyId, answer: &str) -> Result<(), TransportError>;

    /// Answer left for the local party by `callee`.
    async fn fetch_answer(&self, callee: &PartyId) -> Result<SlotFetch, TransportError>;

    async fn send_candidate(&self, receiver: &PartyId, candidate: &str)
    -> Result<(), TransportError>;

    /// Candidate log of the conversation with `peer`, in relay order.
    async fn fetch_candidates(&self, peer: &PartyId) -> Result<CandidateBatch, TransportError>;

    async fn clear_call_state(&self, first: &PartyId, second: &PartyId)
    -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_empty_slots_are_not_usable() {
        assert_eq!(SlotFetch::empty().usable_payload(), None);
        assert_eq!(SlotFetch::pending("  ").usable_payload(), None);
        let stale = SlotFetch {
            state: SlotState::Empty,
            payload: Some("{}".into()),
        };
        assert_eq!(stale.usable_payload(), None);
        assert_eq!(SlotFetch::pending("{}").usable_payload(), Some("{}"));
    }

    #[test]
    fn slot_fetch_wire_shape() {
        let json = serde_json::to_value(SlotFetch::empty()).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "empty" }));
        let parsed: SlotFetch =
            serde_json::from_str(r#"{"state":"pending","payload":"x"}"#).unwrap();
        assert_eq!(parsed, SlotFetch::pending("x"));
    }
}
