use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::CandidateDeduper;
use crate::error::NegotiationError;
use crate::model::{CallRole, CandidateInit, PartyId, RelayCandidate, SessionDescription};
use crate::peer::PeerSession;
use crate::signaling::SignalingChannel;

/// How the one-shot start of a call attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Offer or answer published to the relay.
    Sent,
    /// Produced locally but the relay refused it; the next poll resends it.
    Deferred,
    /// Receiver without an inbound offer; polling will find it.
    AwaitingOffer,
    /// A previous start already did the work.
    AlreadyStarted,
    /// The session was cleaned up while the start was in flight.
    Discarded,
}

#[derive(Default)]
struct Guards {
    has_created_offer: bool,
    has_processed_offer: bool,
    unsent_offer: Option<String>,
    unsent_answer: Option<String>,
    rejected: HashSet<String>,
    deduper: CandidateDeduper,
}

/// Drives one call attempt's exchange by polling the relay and feeding
/// the results into the [`PeerSession`].
pub struct NegotiationOrchestrator {
    role: CallRole,
    counterparty: PartyId,
    signaling: Arc<dyn SignalingChannel>,
    session: Arc<PeerSession>,
    guards: Mutex<Guards>,
    apply_order: tokio::sync::Mutex<()>,
}

impl NegotiationOrchestrator {
    pub fn new(
        role: CallRole,
        counterparty: PartyId,
        signaling: Arc<dyn SignalingChannel>,
        session: Arc<PeerSession>,
    ) -> Self {
        Self {
            role,
            counterparty,
            signaling,
            session,
            guards: Mutex::new(Guards::default()),
            apply_order: tokio::sync::Mutex::new(()),
        }
    }

    pub fn counterparty(&self) -> &PartyId {
        &self.counterparty
    }

    pub fn session(&self) -> &Arc<PeerSession> {
        &self.session
    }

    /// Relay candidates recorded as applied so far.
    pub fn seen_candidates(&self) -> usize {
        self.guards.lock().deduper.len()
    }

    /// One-shot trigger after local media is ready. The initiator creates and
    /// sends its offer; the receiver answers `inbound_offer` if it has one.
    /// Safe to call repeatedly.
    pub async fn start(
        &self,
        inbound_offer: Option<SessionDescription>,
    ) -> Result<StartOutcome, NegotiationError> {
        match self.role {
            CallRole::Initiator => self.start_offer().await,
            CallRole::Receiver => match inbound_offer {
                Some(offer) => self.process_offer(offer).await,
                None => Ok(StartOutcome::AwaitingOffer),
            },
        }
    }

    /// Role-appropriate slot fetch followed by the candidate fetch.
    ///
    /// Errors are fatal to the attempt; everything recoverable is logged and
    /// retried on the next refresh.
    pub async fn refresh(&self) -> Result<(), NegotiationError> {
        trace!(role = self.role.as_str(), counterparty = %self.counterparty, "refresh");
        match self.role {
            CallRole::Initiator => self.poll_answer().await,
            CallRole::Receiver => self.poll_offer().await?,
        }
        self.poll_candidates().await;
        Ok(())
    }

    /// Receiver: look for the counterparty's offer and answer it once.
    /// Fails only when answering a usable offer fails.
    pub async fn poll_offer(&self) -> Result<(), NegotiationError> {
        if self.role != CallRole::Receiver || self.session.is_closed() {
            return Ok(());
        }
        if self.guards.lock().has_processed_offer {
            self.resend_answer().await;
            return Ok(());
        }

        let fetched = match self.signaling.fetch_offer(&self.counterparty).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(error = %err, phase = "fetch_offer", "relay request failed");
                return Ok(());
            }
        };
        let Some(blob) = fetched.usable_payload() else {
            trace!(phase = "fetch_offer", "no offer yet");
            return Ok(());
        };
        let Some(offer) = self.parse_description(blob, "offer") else {
            return Ok(());
        };

        match self.process_offer(offer).await {
            Ok(outcome) => {
                trace!(?outcome, phase = "fetch_offer", "offer handled");
                Ok(())
            }
            Err(NegotiationError::MalformedRemoteDescription(reason)) => {
                warn!(%reason, "relay offer rejected by peer connection");
                self.guards.lock().rejected.insert(blob.to_string());
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to answer relay offer");
                Err(err)
            }
        }
    }

    /// Initiator: look for the counterparty's answer and apply it once.
    pub async fn poll_answer(&self) {
        if self.role != CallRole::Initiator || self.session.is_closed() {
            return;
        }
        if !self.guards.lock().has_created_offer {
            return;
        }
        self.resend_offer().await;
        if self.session.has_remote_description() {
            return;
        }

        let fetched = match self.signaling.fetch_answer(&self.counterparty).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(error = %err, phase = "fetch_answer", "relay request failed");
                return;
            }
        };
        let Some(blob) = fetched.usable_payload() else {
            trace!(phase = "fetch_answer", "no answer yet");
            return;
        };
        let Some(answer) = self.parse_description(blob, "answer") else {
            return;
        };

        match self.session.set_remote_description(answer).await {
            Ok(true) => info!(counterparty = %self.counterparty, "remote answer applied"),
            Ok(false) => debug!("answer already applied; ignoring repeat delivery"),
            Err(NegotiationError::SessionClosed) => {
                debug!("answer arrived after cleanup; discarded")
            }
            Err(NegotiationError::MalformedRemoteDescription(reason)) => {
                warn!(%reason, "relay answer rejected by peer connection");
                self.guards.lock().rejected.insert(blob.to_string());
            }
            Err(err) => error!(error = %err, "failed to apply relay answer"),
        }
    }

    /// Apply the counterparty's candidates that have not been seen yet, in
    /// relay order.
    pub async fn poll_candidates(&self) {
        if self.session.is_closed() {
            return;
        }
        let batch = match self.signaling.fetch_candidates(&self.counterparty).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, phase = "fetch_candidates", "relay request failed");
                return;
            }
        };
        if !batch.has_candidates {
            return;
        }

        let fresh: Vec<RelayCandidate> = {
            let mut guards = self.guards.lock();
            batch
                .candidates
                .into_iter()
                .filter(|candidate| candidate.sender == self.counterparty)
                .filter(|candidate| guards.deduper.insert(candidate))
                .collect()
        };
        if fresh.is_empty() {
            return;
        }

        let _order = self.apply_order.lock().await;
        let mut handed = 0usize;
        for candidate in fresh {
            if self.session.is_closed() {
                return;
            }
            match CandidateInit::from_blob(&candidate.payload) {
                Ok(init) => {
                    self.session.add_candidate(init).await;
                    handed += 1;
                }
                Err(err) => warn!(
                    error = %err,
                    timestamp = candidate.timestamp,
                    "skipping malformed relay candidate"
                ),
            }
        }
        debug!(handed, "relay candidates handed to peer session");
    }

    /// Send a locally gathered candidate to the counterparty.
    pub async fn publish_local_candidate(&self, candidate: &CandidateInit) {
        if self.session.is_closed() {
            return;
        }
        if let Err(err) = self
            .signaling
            .send_candidate(&self.counterparty, &candidate.to_blob())
            .await
        {
            warn!(error = %err, phase = "send_candidate", "relay request failed");
        }
    }

    async fn start_offer(&self) -> Result<StartOutcome, NegotiationError> {
        {
            let mut guards = self.guards.lock();
            if guards.has_created_offer {
                return Ok(StartOutcome::AlreadyStarted);
            }
            guards.has_created_offer = true;
        }

        trace!(role = "initiator", op = "session.create_offer", state = "start");
        let offer = match self.session.create_offer().await {
            Ok(offer) => offer,
            Err(NegotiationError::SessionClosed) => return Ok(StartOutcome::Discarded),
            Err(err) => return Err(err),
        };
        trace!(role = "initiator", op = "session.create_offer", state = "end");

        let blob = offer.to_blob();
        if self.session.is_closed() {
            return Ok(StartOutcome::Discarded);
        }
        match self.signaling.send_offer(&self.counterparty, &blob).await {
            Ok(()) => {
                info!(counterparty = %self.counterparty, "offer sent");
                Ok(StartOutcome::Sent)
            }
            Err(err) => {
                warn!(error = %err, phase = "send_offer", "relay request failed; will resend");
                self.guards.lock().unsent_offer = Some(blob);
                Ok(StartOutcome::Deferred)
            }
        }
    }

    async fn process_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<StartOutcome, NegotiationError> {
        {
            let mut guards = self.guards.lock();
            if guards.has_processed_offer {
                return Ok(StartOutcome::AlreadyStarted);
            }
            guards.has_processed_offer = true;
        }

        trace!(role = "receiver", op = "session.create_answer", state = "start");
        let answer = match self.session.create_answer(offer).await {
            Ok(answer) => answer,
            Err(NegotiationError::SessionClosed) => return Ok(StartOutcome::Discarded),
            Err(err @ NegotiationError::MalformedRemoteDescription(_)) => {
                // The session rolled back, so a corrected offer may still be answered.
                self.guards.lock().has_processed_offer = false;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        trace!(role = "receiver", op = "session.create_answer", state = "end");

        let blob = answer.to_blob();
        if self.session.is_closed() {
            return Ok(StartOutcome::Discarded);
        }
        match self.signaling.send_answer(&self.counterparty, &blob).await {
            Ok(()) => {
                info!(counterparty = %self.counterparty, "answer sent");
                Ok(StartOutcome::Sent)
            }
            Err(err) => {
                warn!(error = %err, phase = "send_answer", "relay request failed; will resend");
                self.guards.lock().unsent_answer = Some(blob);
                Ok(StartOutcome::Deferred)
            }
        }
    }

    async fn resend_offer(&self) {
        let Some(blob) = self.guards.lock().unsent_offer.take() else {
            return;
        };
        match self.signaling.send_offer(&self.counterparty, &blob).await {
            Ok(()) => info!(counterparty = %self.counterparty, "offer sent on retry"),
            Err(err) => {
                warn!(error = %err, phase = "send_offer", "relay request failed; will resend");
                self.guards.lock().unsent_offer.get_or_insert(blob);
            }
        }
    }

    async fn resend_answer(&self) {
        let Some(blob) = self.guards.lock().unsent_answer.take() else {
            return;
        };
        match self.signaling.send_answer(&self.counterparty, &blob).await {
            Ok(()) => info!(counterparty = %self.counterparty, "answer sent on retry"),
            Err(err) => {
                warn!(error = %err, phase = "send_answer", "relay request failed; will resend");
                self.guards.lock().unsent_answer.get_or_insert(blob);
            }
        }
    }

    fn parse_description(&self, blob: &str, what: &'static str) -> Option<SessionDescription> {
        if self.guards.lock().rejected.contains(blob) {
            trace!(what, "skipping previously rejected description");
            return None;
        }
        match SessionDescription::from_blob(blob) {
            Ok(desc) => Some(desc),
            Err(err) => {
                warn!(error = %err, what, "skipping malformed relay description");
                self.guards.lock().rejected.insert(blob.to_string());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallConfig;
    use crate::media::SyntheticDevices;
    use crate::model::CallType;
    use crate::peer::mock::MockPeerConnector;
    use crate::signaling::MemoryRelay;

    async fn ready(
        role: CallRole,
        relay: &MemoryRelay,
        local: &str,
        remote: &str,
    ) -> (NegotiationOrchestrator, MockPeerConnector) {
        let connector = MockPeerConnector::default();
        let session = PeerSession::new(CallType::Audio);
        session
            .acquire_media(&SyntheticDevices::default(), &connector, &CallConfig::default())
            .await
            .expect("media");
        let orchestrator = NegotiationOrchestrator::new(
            role,
            PartyId::new(remote),
            Arc::new(relay.endpoint(local)),
            session,
        );
        (orchestrator, connector)
    }

    #[tokio::test]
    async fn repeated_start_sends_one_offer() {
        let relay = MemoryRelay::new();
        let (alice, connector) = ready(CallRole::Initiator, &relay, "alice", "bob").await;

        assert_eq!(alice.start(None).await.unwrap(), StartOutcome::Sent);
        assert_eq!(alice.start(None).await.unwrap(), StartOutcome::AlreadyStarted);
        let (a, b) = tokio::join!(alice.start(None), alice.start(None));
        assert_eq!(a.unwrap(), StartOutcome::AlreadyStarted);
        assert_eq!(b.unwrap(), StartOutcome::AlreadyStarted);

        assert_eq!(connector.latest().unwrap().offers_created(), 1);
        assert!(
            relay
                .offer(&PartyId::new("alice"), &PartyId::new("bob"))
                .usable_payload()
                .is_some()
        );
    }

    #[tokio::test]
    async fn receiver_answers_polled_offer_once() {
        let relay = MemoryRelay::new();
        let (alice, _) = ready(CallRole::Initiator, &relay, "alice", "bob").await;
        let (bob, bob_pc) = ready(CallRole::Receiver, &relay, "bob", "alice").await;

        assert_eq!(bob.start(None).await.unwrap(), StartOutcome::AwaitingOffer);
        bob.poll_offer().await.unwrap();
        assert_eq!(bob_pc.latest().unwrap().answers_created(), 0);

        alice.start(None).await.unwrap();
        bob.poll_offer().await.unwrap();
        bob.poll_offer().await.unwrap();
        let (first, second) = tokio::join!(bob.poll_offer(), bob.poll_offer());
        first.unwrap();
        second.unwrap();

        let pc = bob_pc.latest().unwrap();
        assert_eq!(pc.answers_created(), 1);
        assert_eq!(pc.remote_descriptions().len(), 1);
    }

    #[tokio::test]
    async fn malformed_offer_is_skipped_until_a_valid_one_arrives() {
        let relay = MemoryRelay::new();
        let (bob, bob_pc) = ready(CallRole::Receiver, &relay, "bob", "alice").await;
        let alice_id = PartyId::new("alice");
        let bob_id = PartyId::new("bob");

        relay.put_offer(&alice_id, &bob_id, "not json".into());
        bob.refresh().await.unwrap();
        assert_eq!(bob_pc.latest().unwrap().answers_created(), 0);

        relay.put_offer(&alice_id, &bob_id, SessionDescription::offer("garbage").to_blob());
        bob.refresh().await.unwrap();
        assert_eq!(bob_pc.latest().unwrap().answers_created(), 0);

        relay.put_offer(&alice_id, &bob_id, SessionDescription::offer("v=0\r\n").to_blob());
        bob.refresh().await.unwrap();
        assert_eq!(bob_pc.latest().unwrap().answers_created(), 1);
        assert!(relay.answer(&alice_id, &bob_id).usable_payload().is_some());
    }

    #[tokio::test]
    async fn native_answer_failure_on_polled_offer_is_returned() {
        let relay = MemoryRelay::new();
        let (bob, bob_pc) = ready(CallRole::Receiver, &relay, "bob", "alice").await;
        let pc = bob_pc.latest().unwrap();
        pc.fail_next_answer("codec mismatch");

        relay.put_offer(
            &PartyId::new("alice"),
            &PartyId::new("bob"),
            SessionDescription::offer("v=0\r\n").to_blob(),
        );
        let err = bob.refresh().await.unwrap_err();
        assert_eq!(err, NegotiationError::Native("codec mismatch".into()));
        assert_eq!(pc.answers_created(), 0);
        assert!(
            relay
                .answer(&PartyId::new("alice"), &PartyId::new("bob"))
                .usable_payload()
                .is_none()
        );
    }

    #[tokio::test]
    async fn inbound_malformed_offer_is_fatal() {
        let relay = MemoryRelay::new();
        let (bob, _) = ready(CallRole::Receiver, &relay, "bob", "alice").await;
        let err = bob
            .start(Some(SessionDescription::offer("garbage")))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::MalformedRemoteDescription(_)));
    }

    #[tokio::test]
    async fn candidates_from_others_and_repeats_are_ignored() {
        let relay = MemoryRelay::new();
        let (alice, alice_pc) = ready(CallRole::Initiator, &relay, "alice", "bob").await;
        let alice_id = PartyId::new("alice");
        let bob_id = PartyId::new("bob");

        relay.push_candidate(&bob_id, &alice_id, CandidateInit::new("candidate:1").to_blob());
        relay.push_candidate(&alice_id, &bob_id, CandidateInit::new("candidate:mine").to_blob());
        relay.push_candidate(&bob_id, &alice_id, "{broken".into());
        relay.push_candidate(&bob_id, &alice_id, CandidateInit::new("candidate:2").to_blob());

        alice.poll_candidates().await;
        alice.poll_candidates().await;
        // Queued until the answer lands.
        assert_eq!(alice.session().queued_candidates(), 2);
        assert_eq!(alice.seen_candidates(), 3);

        alice.start(None).await.unwrap();
        relay.put_answer(&alice_id, &bob_id, SessionDescription::answer("v=0\r\n").to_blob());
        alice.poll_answer().await;

        let applied: Vec<_> = alice_pc
            .latest()
            .unwrap()
            .applied_candidates()
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(applied, ["candidate:1", "candidate:2"]);
    }

    #[tokio::test]
    async fn results_after_cleanup_are_discarded() {
        let relay = MemoryRelay::new();
        let (alice, _) = ready(CallRole::Initiator, &relay, "alice", "bob").await;
        alice.session().cleanup().await;
        assert_eq!(alice.start(None).await.unwrap(), StartOutcome::Discarded);
        assert_eq!(
            relay.offer(&PartyId::new("alice"), &PartyId::new("bob")),
            crate::signaling::SlotFetch::empty()
        );
    }
}
