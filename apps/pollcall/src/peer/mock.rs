//! In-process peer connection that records every native call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{NativeEvent, NativeEventSender, PeerConfig, PeerConnection, PeerConnector};
use crate::error::NegotiationError;
use crate::media::MediaStream;
use crate::model::{CandidateInit, SdpKind, SessionDescription};

static NEXT_MOCK_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Default)]
struct Recorded {
    offers: usize,
    answers: usize,
    local: Vec<SessionDescription>,
    remote: Vec<SessionDescription>,
    candidates: Vec<CandidateInit>,
}

pub struct MockPeerConnection {
    id: usize,
    events: NativeEventSender,
    attached_tracks: usize,
    recorded: Mutex<Recorded>,
    close_count: AtomicUsize,
    reject_remote: AtomicBool,
    remote_delay: Mutex<Option<Duration>>,
    answer_failure: Mutex<Option<String>>,
}

impl MockPeerConnection {
    fn new(events: NativeEventSender, attached_tracks: usize) -> Self {
        Self {
            id: NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed),
            events,
            attached_tracks,
            recorded: Mutex::new(Recorded::default()),
            close_count: AtomicUsize::new(0),
            reject_remote: AtomicBool::new(false),
            remote_delay: Mutex::new(None),
            answer_failure: Mutex::new(None),
        }
    }

    /// Deliver a native notification as the platform would.
    pub fn emit(&self, event: NativeEvent) {
        let _ = self.events.send(event);
    }

    pub fn reject_next_remote_description(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    /// Make the next `create_answer` fail with a native error.
    pub fn fail_next_answer(&self, reason: impl Into<String>) {
        *self.answer_failure.lock() = Some(reason.into());
    }

    /// Make `set_remote_description` suspend, widening overlap windows in tests.
    pub fn delay_remote_description(&self, delay: Duration) {
        *self.remote_delay.lock() = Some(delay);
    }

    pub fn attached_tracks(&self) -> usize {
        self.attached_tracks
    }

    pub fn offers_created(&self) -> usize {
        self.recorded.lock().offers
    }

    pub fn answers_created(&self) -> usize {
        self.recorded.lock().answers
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.recorded.lock().local.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.recorded.lock().remote.clone()
    }

    pub fn applied_candidates(&self) -> Vec<CandidateInit> {
        self.recorded.lock().candidates.clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn describe(&self, kind: SdpKind, serial: usize) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: format!(
                "v=0\r\no=mock {} {serial} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na={}\r\n",
                self.id,
                kind.as_str()
            ),
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let serial = {
            let mut recorded = self.recorded.lock();
            recorded.offers += 1;
            recorded.offers
        };
        Ok(self.describe(SdpKind::Offer, serial))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        if let Some(reason) = self.answer_failure.lock().take() {
            return Err(NegotiationError::Native(reason));
        }
        let serial = {
            let mut recorded = self.recorded.lock();
            if recorded.remote.is_empty() {
                return Err(NegotiationError::Native(
                    "create_answer without remote offer".into(),
                ));
            }
            recorded.answers += 1;
            recorded.answers
        };
        Ok(self.describe(SdpKind::Answer, serial))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.recorded.lock().local.push(desc);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let delay = *self.remote_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_remote.swap(false, Ordering::SeqCst) || !desc.sdp.starts_with("v=0") {
            return Err(NegotiationError::MalformedRemoteDescription(
                "sdp rejected by mock".into(),
            ));
        }
        self.recorded.lock().remote.push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError> {
        if candidate.candidate.trim().is_empty() {
            return Err(NegotiationError::MalformedCandidate(
                "empty candidate line".into(),
            ));
        }
        self.recorded.lock().candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`MockPeerConnection`]s and remembering each one.
#[derive(Default, Clone)]
pub struct MockPeerConnector {
    connections: Arc<Mutex<Vec<Arc<MockPeerConnection>>>>,
    fail: Arc<AtomicBool>,
}

impl MockPeerConnector {
    pub fn failing() -> Self {
        let connector = Self::default();
        connector.fail.store(true, Ordering::SeqCst);
        connector
    }

    pub fn latest(&self) -> Option<Arc<MockPeerConnection>> {
        self.connections.lock().last().cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

#[async_trait]
impl PeerConnector for MockPeerConnector {
    async fn connect(
        &self,
        _config: &PeerConfig,
        local: &MediaStream,
        events: NativeEventSender,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NegotiationError::Native("mock connector failure".into()));
        }
        let connection = Arc::new(MockPeerConnection::new(events, local.tracks().len()));
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}
