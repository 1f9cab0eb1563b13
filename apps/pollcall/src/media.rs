//! Local media model and the device boundary that produces it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MediaAcquisitionError;
use crate::model::CallType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Request shape handed to the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    pub fn for_call(call_type: CallType, video: VideoConstraints) -> Self {
        Self {
            audio: true,
            video: call_type.has_video().then_some(video),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Handle to one media track. Clones refer to the same track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Returns true only for the call that actually stopped the track.
    pub fn stop(&self) -> bool {
        !self.inner.stopped.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        if self.tracks.iter().all(|t| t.id() != track.id()) {
            self.tracks.push(track);
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Local capture capability (camera and microphone).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaAcquisitionError>;
}

/// Headless device layer that hands out synthetic tracks.
#[derive(Debug, Clone)]
pub struct SyntheticDevices {
    pub has_microphone: bool,
    pub has_camera: bool,
    pub busy: bool,
    pub permission_denied: bool,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self {
            has_microphone: true,
            has_camera: true,
            busy: false,
            permission_denied: false,
        }
    }
}

impl SyntheticDevices {
    pub fn denied() -> Self {
        Self {
            permission_denied: true,
            ..Self::default()
        }
    }

    pub fn without_camera() -> Self {
        Self {
            has_camera: false,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaAcquisitionError> {
        if self.permission_denied {
            return Err(MediaAcquisitionError::PermissionDenied);
        }
        if (constraints.audio && !self.has_microphone)
            || (constraints.video.is_some() && !self.has_camera)
        {
            return Err(MediaAcquisitionError::DeviceNotFound);
        }
        if self.busy {
            return Err(MediaAcquisitionError::DeviceBusy);
        }

        let stream_id = Uuid::new_v4().to_string();
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(format!("{stream_id}-audio"), TrackKind::Audio));
        }
        if let Some(video) = constraints.video {
            tracing::debug!(width = video.width, height = video.height, "synthetic camera opened");
            tracks.push(MediaTrack::new(format!("{stream_id}-video"), TrackKind::Video));
        }
        Ok(MediaStream::new(stream_id, tracks))
    }
}
