#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use pollcall::config::CallConfig;
use pollcall::media::{MediaConstraints, MediaDevices, MediaStream, SyntheticDevices};
use pollcall::peer::mock::{MockPeerConnection, MockPeerConnector};
use pollcall::signaling::{CandidateBatch, MemoryRelay, RelayEndpoint, SignalingChannel, SlotFetch};
use pollcall::{CallController, CallDeps, MediaAcquisitionError, PartyId, TransportError};

pub const INTERVAL: Duration = Duration::from_secs(3);

pub fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Relay endpoint that counts the requests passing through it.
pub struct CountingChannel {
    inner: RelayEndpoint,
    pub offers_sent: AtomicUsize,
    pub answers_sent: AtomicUsize,
    pub offer_fetches: AtomicUsize,
    pub answer_fetches: AtomicUsize,
    pub candidate_fetches: AtomicUsize,
}

impl CountingChannel {
    pub fn new(inner: RelayEndpoint) -> Self {
        Self {
            inner,
            offers_sent: AtomicUsize::new(0),
            answers_sent: AtomicUsize::new(0),
            offer_fetches: AtomicUsize::new(0),
            answer_fetches: AtomicUsize::new(0),
            candidate_fetches: AtomicUsize::new(0),
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for CountingChannel {
    fn local_party(&self) -> &PartyId {
        self.inner.local_party()
    }

    async fn send_offer(&self, callee: &PartyId, offer: &str) -> Result<(), TransportError> {
        self.offers_sent.fetch_add(1, Ordering::SeqCst);
        self.inner.send_offer(callee, offer).await
    }

    async fn fetch_offer(&self, caller: &PartyId) -> Result<SlotFetch, TransportError> {
        self.offer_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_offer(caller).await
    }

    async fn send_answer(&self, caller: &PartyId, answer: &str) -> Result<(), TransportError> {
        self.answers_sent.fetch_add(1, Ordering::SeqCst);
        self.inner.send_answer(caller, answer).await
    }

    async fn fetch_answer(&self, callee: &PartyId) -> Result<SlotFetch, TransportError> {
        self.answer_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_answer(callee).await
    }

    async fn send_candidate(
        &self,
        receiver: &PartyId,
        candidate: &str,
    ) -> Result<(), TransportError> {
        self.inner.send_candidate(receiver, candidate).await
    }

    async fn fetch_candidates(&self, peer: &PartyId) -> Result<CandidateBatch, TransportError> {
        self.candidate_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_candidates(peer).await
    }

    async fn clear_call_state(
        &self,
        first: &PartyId,
        second: &PartyId,
    ) -> Result<(), TransportError> {
        self.inner.clear_call_state(first, second).await
    }
}

/// Device layer that holds every request until released.
#[derive(Clone, Default)]
pub struct GatedDevices {
    gate: Arc<Notify>,
    devices: SyntheticDevices,
}

impl GatedDevices {
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl MediaDevices for GatedDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaAcquisitionError> {
        self.gate.notified().await;
        self.devices.get_user_media(constraints).await
    }
}

pub struct Party {
    pub id: PartyId,
    pub controller: CallController,
    pub connector: MockPeerConnector,
    pub channel: Arc<CountingChannel>,
}

impl Party {
    pub fn pc(&self) -> Arc<MockPeerConnection> {
        self.connector.latest().expect("peer connection created")
    }
}

pub fn config() -> CallConfig {
    CallConfig::default().with_poll_interval(INTERVAL)
}

pub fn party(relay: &MemoryRelay, id: &str) -> Party {
    party_with(relay, id, Arc::new(SyntheticDevices::default()), config())
}

pub fn party_with(
    relay: &MemoryRelay,
    id: &str,
    devices: Arc<dyn MediaDevices>,
    config: CallConfig,
) -> Party {
    let connector = MockPeerConnector::default();
    let channel = Arc::new(CountingChannel::new(relay.endpoint(id)));
    let controller = CallController::new(CallDeps {
        config,
        devices,
        connector: Arc::new(connector.clone()),
        signaling: channel.clone(),
    });
    Party {
        id: PartyId::new(id),
        controller,
        connector,
        channel,
    }
}

/// Poll `check` on the (usually paused) clock until it holds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}
