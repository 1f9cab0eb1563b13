//! In-process relay with the same storage rules as the hosted one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CandidateBatch, SignalingChannel, SlotFetch};
use crate::error::TransportError;
use crate::model::{PartyId, RelayCandidate};

type PairKey = (PartyId, PartyId);

#[derive(Default)]
struct RelayState {
    /// Keyed by (caller, callee).
    offers: HashMap<PairKey, String>,
    /// Keyed by (caller, callee).
    answers: HashMap<PairKey, String>,
    candidates: Vec<RelayCandidate>,
    clock: u64,
}

/// Shared relay storage. Clones see the same slots and candidate log.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel acting on behalf of `party`.
    pub fn endpoint(&self, party: impl Into<PartyId>) -> RelayEndpoint {
        RelayEndpoint {
            relay: self.clone(),
            party: party.into(),
        }
    }

    pub fn put_offer(&self, caller: &PartyId, callee: &PartyId, offer: String) {
        self.state
            .lock()
            .offers
            .insert((caller.clone(), callee.clone()), offer);
    }

    pub fn offer(&self, caller: &PartyId, callee: &PartyId) -> SlotFetch {
        slot(self.state.lock().offers.get(&(caller.clone(), callee.clone())))
    }

    pub fn put_answer(&self, caller: &PartyId, callee: &PartyId, answer: String) {
        self.state
            .lock()
            .answers
            .insert((caller.clone(), callee.clone()), answer);
    }

    pub fn answer(&self, caller: &PartyId, callee: &PartyId) -> SlotFetch {
        slot(self.state.lock().answers.get(&(caller.clone(), callee.clone())))
    }

    /// Append to the candidate log, stamping it with the next relay tick.
    pub fn push_candidate(
        &self,
        sender: &PartyId,
        receiver: &PartyId,
        payload: String,
    ) -> RelayCandidate {
        let mut state = self.state.lock();
        state.clock += 1;
        let candidate = RelayCandidate {
            sender: sender.clone(),
            receiver: receiver.clone(),
            timestamp: state.clock,
            payload,
        };
        state.candidates.push(candidate.clone());
        candidate
    }

    /// Every candidate exchanged between `a` and `b`, in both directions.
    pub fn candidates_between(&self, a: &PartyId, b: &PartyId) -> CandidateBatch {
        let state = self.state.lock();
        let candidates = state
            .candidates
            .iter()
            .filter(|c| {
                (&c.sender == a && &c.receiver == b) || (&c.sender == b && &c.receiver == a)
            })
            .cloned()
            .collect();
        CandidateBatch::new(candidates)
    }

    /// Drop both slots in both orderings and the pair's candidates.
    pub fn clear(&self, a: &PartyId, b: &PartyId) {
        let mut state = self.state.lock();
        let forward = (a.clone(), b.clone());
        let reverse = (b.clone(), a.clone());
        for key in [&forward, &reverse] {
            state.offers.remove(key);
            state.answers.remove(key);
        }
        state.candidates.retain(|c| {
            !((&c.sender == a && &c.receiver == b) || (&c.sender == b && &c.receiver == a))
        });
    }
}

fn slot(value: Option<&String>) -> SlotFetch {
    match value {
        Some(payload) => SlotFetch::pending(payload.clone()),
        None => SlotFetch::empty(),
    }
}

/// [`SignalingChannel`] over a [`MemoryRelay`] for one party.
#[derive(Clone)]
pub struct RelayEndpoint {
    relay: MemoryRelay,
    party: PartyId,
}

#[async_trait]
impl SignalingChannel for RelayEndpoint {
    fn local_party(&self) -> &PartyId {
        &self.party
    }

    async fn send_offer(&self, callee: &PartyId, offer: &str) -> Result<(), TransportError> {
        self.relay.put_offer(&self.party, callee, offer.to_string());
        Ok(())
    }

    async fn fetch_offer(&self, caller: &PartyId) -> Result<SlotFetch, TransportError> {
        Ok(self.relay.offer(caller, &self.party))
    }

    async fn send_answer(&self, caller: &PartyId, answer: &str) -> Result<(), TransportError> {
        self.relay.put_answer(caller, &self.party, answer.to_string());
        Ok(())
    }

    async fn fetch_answer(&self, callee: &PartyId) -> Result<SlotFetch, TransportError> {
        Ok(self.relay.answer(&self.party, callee))
    }

    async fn send_candidate(
        &self,
        receiver: &PartyId,
        candidate: &str,
    ) -> Result<(), TransportError> {
        self.relay
            .push_candidate(&self.party, receiver, candidate.to_string());
        Ok(())
    }

    async fn fetch_candidates(&self, peer: &PartyId) -> Result<CandidateBatch, TransportError> {
        Ok(self.relay.candidates_between(&self.party, peer))
    }

    async fn clear_call_state(
        &self,
        first: &PartyId,
        second: &PartyId,
    ) -> Result<(), TransportError> {
        self.relay.clear(first, second);
        Ok(())
    }
}
