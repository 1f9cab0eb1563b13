//! HTTP shapes shared by the relay client and the relay server.

use serde::{Deserialize, Serialize};

use crate::model::PartyId;

/// Header carrying the requesting party's id.
pub const PARTY_HEADER: &str = "x-party-id";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadBody {
    pub payload: String,
}

/// Path segments below the relay base, one route per relay operation.
pub fn offer_route(party: &PartyId) -> [&str; 3] {
    ["calls", party.as_str(), "offer"]
}

pub fn answer_route(party: &PartyId) -> [&str; 3] {
    ["calls", party.as_str(), "answer"]
}

pub fn candidates_route(party: &PartyId) -> [&str; 2] {
    ["candidates", party.as_str()]
}

pub fn call_route(party: &PartyId) -> [&str; 2] {
    ["calls", party.as_str()]
}
