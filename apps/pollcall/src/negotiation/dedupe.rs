use std::collections::HashSet;

use crate::model::{CandidateKey, RelayCandidate};

/// Remembers which relay-delivered candidates one call attempt has applied.
#[derive(Debug, Default)]
pub struct CandidateDeduper {
    applied: HashSet<CandidateKey>,
}

impl CandidateDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the candidate; returns false if it was already recorded.
    pub fn insert(&mut self, candidate: &RelayCandidate) -> bool {
        self.applied.insert(candidate.key())
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PartyId;

    fn candidate(sender: &str, timestamp: u64, payload: &str) -> RelayCandidate {
        RelayCandidate {
            sender: PartyId::new(sender),
            receiver: PartyId::new("local"),
            timestamp,
            payload: payload.into(),
        }
    }

    #[test]
    fn key_covers_sender_timestamp_and_payload() {
        let mut deduper = CandidateDeduper::new();
        assert!(deduper.is_empty());
        assert!(deduper.insert(&candidate("bob", 1, "c")));
        assert!(!deduper.insert(&candidate("bob", 1, "c")));
        assert!(deduper.insert(&candidate("bob", 2, "c")));
        assert!(deduper.insert(&candidate("carol", 1, "c")));
        assert!(deduper.insert(&candidate("bob", 1, "d")));
        assert_eq!(deduper.len(), 4);
    }
}
