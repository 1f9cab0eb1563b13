//! Offer/answer/candidate exchange over the polled relay.

mod dedupe;
mod orchestrator;

pub use dedupe::CandidateDeduper;
pub use orchestrator::{NegotiationOrchestrator, StartOutcome};
