use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{NativeEvent, PeerConfig, PeerConnection, PeerConnector};
use crate::config::CallConfig;
use crate::error::{MediaAcquisitionError, NegotiationError};
use crate::media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack};
use crate::model::{CallType, CandidateInit, ConnectionState, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteDescription {
    Unset,
    Applying,
    Set,
}

struct SessionState {
    connection: Option<Arc<dyn PeerConnection>>,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    remote: RemoteDescription,
    pending: VecDeque<CandidateInit>,
    closed: bool,
}

/// Owns the native connection and both media streams of one call attempt.
pub struct PeerSession {
    call_type: CallType,
    state: Mutex<SessionState>,
}

/// Translated notification handed to the session's owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    RemoteStream(MediaStream),
    LocalCandidate(CandidateInit),
}

impl PeerSession {
    pub fn new(call_type: CallType) -> Arc<Self> {
        Arc::new(Self {
            call_type,
            state: Mutex::new(SessionState {
                connection: None,
                local_stream: None,
                remote_stream: None,
                remote: RemoteDescription::Unset,
                pending: VecDeque::new(),
                closed: false,
            }),
        })
    }

    /// Capture local media and build the native connection around it.
    pub async fn acquire_media(
        self: &Arc<Self>,
        devices: &dyn MediaDevices,
        connector: &dyn PeerConnector,
        config: &CallConfig,
    ) -> Result<PeerEvents, MediaAcquisitionError> {
        let constraints = MediaConstraints::for_call(self.call_type, config.video);
        trace!(?constraints, op = "devices.get_user_media", state = "start");
        let stream = devices.get_user_media(&constraints).await?;
        trace!(
            stream_id = stream.id(),
            tracks = stream.tracks().len(),
            op = "devices.get_user_media",
            state = "end"
        );

        {
            let mut state = self.state.lock();
            if state.closed {
                stream.stop_all();
                return Err(MediaAcquisitionError::Unknown(
                    "call closed during media acquisition".into(),
                ));
            }
            state.local_stream = Some(stream.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer_config = PeerConfig {
            ice_servers: config.ice_servers.clone(),
        };
        let connection = connector
            .connect(&peer_config, &stream, tx)
            .await
            .map_err(|err| MediaAcquisitionError::Unknown(err.to_string()))?;

        let closed_meanwhile = {
            let mut state = self.state.lock();
            if state.closed {
                true
            } else {
                state.connection = Some(Arc::clone(&connection));
                false
            }
        };
        if closed_meanwhile {
            if let Err(err) = connection.close().await {
                warn!(error = %err, "failed to close connection built after cleanup");
            }
            return Err(MediaAcquisitionError::Unknown(
                "call closed during media acquisition".into(),
            ));
        }

        debug!(call_type = %self.call_type, "local media acquired");
        Ok(PeerEvents {
            rx,
            session: Arc::downgrade(self),
        })
    }

    pub async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let connection = self.connection()?;
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        self.ensure_open()?;
        Ok(offer)
    }

    /// Apply the remote offer, flush queued candidates, and produce the answer.
    pub async fn create_answer(
        &self,
        remote_offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let connection = self.connection()?;
        self.apply_remote_description(&connection, remote_offer)
            .await?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        self.ensure_open()?;
        Ok(answer)
    }

    /// Returns `Ok(false)` when a remote description was already present.
    pub async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<bool, NegotiationError> {
        let connection = self.connection()?;
        self.apply_remote_description(&connection, desc).await
    }

    /// Queue or apply a remote candidate. Failures are logged, never returned.
    pub async fn add_candidate(&self, candidate: CandidateInit) {
        let connection = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            match (&state.connection, state.remote) {
                (Some(connection), RemoteDescription::Set) => Arc::clone(connection),
                _ => {
                    trace!(queued = state.pending.len() + 1, "queueing remote candidate");
                    state.pending.push_back(candidate);
                    return;
                }
            }
        };
        if let Err(err) = connection.add_ice_candidate(candidate).await {
            warn!(error = %err, "failed to add remote ice candidate");
        }
    }

    /// Flip every local audio track. `None` until local media exists.
    pub fn toggle_mute(&self) -> Option<bool> {
        let state = self.state.lock();
        if state.closed {
            return None;
        }
        let stream = state.local_stream.as_ref()?;
        let mut muted = None;
        for track in stream.audio_tracks() {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            muted.get_or_insert(!enabled);
        }
        muted
    }

    /// Flip every local video track; audio-only calls have no camera.
    pub fn toggle_camera(&self) -> Option<bool> {
        if !self.call_type.has_video() {
            return None;
        }
        let state = self.state.lock();
        if state.closed {
            return None;
        }
        let stream = state.local_stream.as_ref()?;
        let mut off = None;
        for track in stream.video_tracks() {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            off.get_or_insert(!enabled);
        }
        off
    }

    /// Stop all tracks and close the native connection. Only the first call
    /// does any work; it returns true.
    pub async fn cleanup(&self) -> bool {
        let (connection, local, remote) = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.pending.clear();
            (
                state.connection.take(),
                state.local_stream.take(),
                state.remote_stream.take(),
            )
        };
        if let Some(stream) = local {
            stream.stop_all();
        }
        if let Some(stream) = remote {
            stream.stop_all();
        }
        if let Some(connection) = connection {
            if let Err(err) = connection.close().await {
                warn!(error = %err, "native connection close failed");
            }
        }
        debug!("peer session cleaned up");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    pub fn has_remote_description(&self) -> bool {
        self.state.lock().remote == RemoteDescription::Set
    }

    pub fn queued_candidates(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.state.lock().local_stream.clone()
    }

    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.state.lock().remote_stream.clone()
    }

    fn connection(&self) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let state = self.state.lock();
        if state.closed {
            return Err(NegotiationError::SessionClosed);
        }
        state
            .connection
            .clone()
            .ok_or(NegotiationError::NotInitialized)
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            Err(NegotiationError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn apply_remote_description(
        &self,
        connection: &Arc<dyn PeerConnection>,
        desc: SessionDescription,
    ) -> Result<bool, NegotiationError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(NegotiationError::SessionClosed);
            }
            if state.remote != RemoteDescription::Unset {
                debug!(kind = desc.kind.as_str(), "remote description already set; ignoring");
                return Ok(false);
            }
            state.remote = RemoteDescription::Applying;
        }

        trace!(kind = desc.kind.as_str(), op = "pc.set_remote_description", state = "start");
        if let Err(err) = connection.set_remote_description(desc).await {
            let mut state = self.state.lock();
            if state.remote == RemoteDescription::Applying {
                state.remote = RemoteDescription::Unset;
            }
            return Err(err);
        }
        trace!(op = "pc.set_remote_description", state = "end");

        self.flush_pending(connection).await;
        Ok(true)
    }

    // Candidates that arrive during the flush queue behind it, so arrival
    // order is preserved until the queue drains and the state flips to Set.
    async fn flush_pending(&self, connection: &Arc<dyn PeerConnection>) {
        let mut flushed = 0usize;
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.closed {
                    state.pending.clear();
                    return;
                }
                match state.pending.pop_front() {
                    Some(candidate) => candidate,
                    None => {
                        state.remote = RemoteDescription::Set;
                        break;
                    }
                }
            };
            if let Err(err) = connection.add_ice_candidate(next).await {
                warn!(error = %err, "failed to add queued ice candidate");
            }
            flushed += 1;
        }
        if flushed > 0 {
            debug!(flushed, "applied queued ice candidates");
        }
    }

    fn attach_remote_track(&self, track: MediaTrack) -> Option<MediaStream> {
        let mut state = self.state.lock();
        if state.closed {
            track.stop();
            return None;
        }
        let stream = state
            .remote_stream
            .get_or_insert_with(|| MediaStream::new(Uuid::new_v4().to_string(), Vec::new()));
        stream.add_track(track);
        Some(stream.clone())
    }
}

/// Receiver side of a session's native notifications.
pub struct PeerEvents {
    rx: mpsc::UnboundedReceiver<NativeEvent>,
    session: Weak<PeerSession>,
}

impl PeerEvents {
    /// Next translated event; `None` once the native side or the session is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            let event = self.rx.recv().await?;
            let session = self.session.upgrade()?;
            match event {
                NativeEvent::ConnectionState(state) => {
                    debug!(?state, "peer connection state changed");
                    return Some(SessionEvent::StateChanged(state));
                }
                NativeEvent::IceConnectionState(state) => {
                    debug!(ice_state = %state, "ice connection state changed");
                }
                NativeEvent::RemoteTrack(track) => {
                    if let Some(stream) = session.attach_remote_track(track) {
                        return Some(SessionEvent::RemoteStream(stream));
                    }
                }
                NativeEvent::LocalCandidate(candidate) => {
                    if !session.is_closed() {
                        return Some(SessionEvent::LocalCandidate(candidate));
                    }
                }
            }
        }
    }
}
