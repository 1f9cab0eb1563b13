//! Native peer-connection boundary and the per-attempt session that drives it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NegotiationError;
use crate::media::{MediaStream, MediaTrack};
use crate::model::{CandidateInit, ConnectionState, SessionDescription};

pub mod mock;
pub mod rtc;
mod session;

pub use session::{PeerEvents, PeerSession, SessionEvent};

/// Raw notification from a native peer connection.
#[derive(Debug, Clone)]
pub enum NativeEvent {
    ConnectionState(ConnectionState),
    IceConnectionState(String),
    RemoteTrack(MediaTrack),
    LocalCandidate(CandidateInit),
}

pub type NativeEventSender = mpsc::UnboundedSender<NativeEvent>;

#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
}

/// Operations exposed by a platform peer-connection binding.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn set_local_description(&self, desc: SessionDescription)
    -> Result<(), NegotiationError>;
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError>;
    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Builds native connections with the local stream's tracks attached and
/// notifications routed into `events`.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        config: &PeerConfig,
        local: &MediaStream,
        events: NativeEventSender,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}
