//! webrtc-rs binding for the native peer-connection boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{NativeEvent, NativeEventSender, PeerConfig, PeerConnection, PeerConnector};
use crate::error::NegotiationError;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::model::{CandidateInit, ConnectionState, SdpKind, SessionDescription};

/// Builds webrtc-rs peer connections.
#[derive(Debug, Clone)]
pub struct RtcConnector {
    ice_timeouts: Option<(Duration, Duration, Duration)>,
}

impl Default for RtcConnector {
    fn default() -> Self {
        Self {
            ice_timeouts: Some((
                Duration::from_secs(5),
                Duration::from_secs(25),
                Duration::from_secs(2),
            )),
        }
    }
}

impl RtcConnector {
    fn build_api(&self) -> Result<API, NegotiationError> {
        let mut setting = SettingEngine::default();
        if let Some((disconnected, failed, keepalive)) = self.ice_timeouts {
            setting.set_ice_timeouts(Some(disconnected), Some(failed), Some(keepalive));
        }

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(native_error)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(native_error)?;

        Ok(APIBuilder::new()
            .with_setting_engine(setting)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(
        &self,
        config: &PeerConfig,
        local: &MediaStream,
        events: NativeEventSender,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let api = self.build_api()?;
        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        tracing::trace!(op = "api.new_peer_connection", state = "start");
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(native_error)?,
        );
        tracing::trace!(op = "api.new_peer_connection", state = "end");

        for track in local.tracks() {
            let sample_track = Arc::new(TrackLocalStaticSample::new(
                codec_for(track.kind()),
                track.id().to_owned(),
                local.id().to_owned(),
            ));
            pc.add_track(sample_track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(native_error)?;
        }

        register_handlers(&pc, events);
        Ok(Arc::new(RtcPeerConnection { pc }))
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
    }
}

fn register_handlers(pc: &Arc<RTCPeerConnection>, events: NativeEventSender) {
    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        if let Some(mapped) = map_connection_state(state) {
            let _ = state_events.send(NativeEvent::ConnectionState(mapped));
        }
        Box::pin(async {})
    }));

    let ice_events = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let _ = ice_events.send(NativeEvent::IceConnectionState(state.to_string()));
        Box::pin(async {})
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let kind = match track.kind() {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        };
        if let Some(kind) = kind {
            let _ = track_events.send(NativeEvent::RemoteTrack(MediaTrack::new(track.id(), kind)));
        }
        Box::pin(async {})
    }));

    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(NativeEvent::LocalCandidate(CandidateInit {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to serialize local ice candidate");
                }
            }
        }
        Box::pin(async {})
    }));
}

pub(crate) fn map_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(native_error)?;
        description_from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(native_error)?;
        description_from_rtc(&answer)
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = description_to_rtc(&desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(native_error)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = description_to_rtc(&desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(native_error)
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| NegotiationError::MalformedCandidate(err.to_string()))
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(native_error)
    }
}

fn description_from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        other => {
            return Err(NegotiationError::Native(format!(
                "unsupported sdp type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    })
}

fn description_to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let sdp = desc.sdp.clone();
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp),
    };
    parsed.map_err(|err| NegotiationError::MalformedRemoteDescription(err.to_string()))
}

fn native_error<E: std::fmt::Display>(err: E) -> NegotiationError {
    NegotiationError::Native(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn audio_stream() -> MediaStream {
        MediaStream::new("local", vec![MediaTrack::new("local-audio", TrackKind::Audio)])
    }

    async fn connect() -> Arc<dyn PeerConnection> {
        let (tx, _rx) = mpsc::unbounded_channel();
        RtcConnector::default()
            .connect(&PeerConfig::default(), &audio_stream(), tx)
            .await
            .expect("peer connection")
    }

    #[tokio::test]
    async fn offer_blob_is_accepted_by_remote_peer() {
        let offerer = connect().await;
        let answerer = connect().await;

        let offer = offerer.create_offer().await.expect("offer");
        offerer
            .set_local_description(offer.clone())
            .await
            .expect("local offer");

        let parsed = SessionDescription::from_blob(&offer.to_blob()).expect("parse offer blob");
        assert_eq!(parsed, offer);
        answerer
            .set_remote_description(parsed)
            .await
            .expect("remote accepts offer");

        let answer = answerer.create_answer().await.expect("answer");
        answerer
            .set_local_description(answer.clone())
            .await
            .expect("local answer");
        let parsed = SessionDescription::from_blob(&answer.to_blob()).expect("parse answer blob");
        offerer
            .set_remote_description(parsed)
            .await
            .expect("offerer accepts answer");

        offerer.close().await.expect("close offerer");
        answerer.close().await.expect("close answerer");
    }

    #[tokio::test]
    async fn garbage_sdp_is_reported_as_malformed() {
        let pc = connect().await;
        let err = pc
            .set_remote_description(SessionDescription::offer("not an sdp"))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::MalformedRemoteDescription(_)));
        pc.close().await.expect("close");
    }

    #[test]
    fn unspecified_state_is_not_forwarded() {
        assert_eq!(map_connection_state(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Disconnected),
            Some(ConnectionState::Disconnected)
        );
    }
}
