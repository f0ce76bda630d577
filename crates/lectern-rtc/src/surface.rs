//! Viewing surfaces: where bound media becomes visible.
//!
//! The engine makes no assumptions about the UI; the shell provides a
//! [`MediaSurface`] and the engine (re)binds streams to it whenever the
//! set of visible tracks changes. Binding is synchronous and cheap.

use std::sync::Arc;

use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::capture::LocalStream;

/// Inbound media accumulated track-by-track into one stream.
///
/// Gateways deliver remote media per-track; each arrival upserts by
/// kind so a feed swap replaces the previous track instead of leaving
/// it attached.
#[derive(Default, Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Vec<Arc<TrackRemote>>,
}

impl RemoteStream {
    /// Empty remote stream.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks: Vec::new(),
        }
    }

    /// Stream id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a track, replacing any existing track of the same kind.
    pub fn upsert(&mut self, track: Arc<TrackRemote>) {
        let kind = track.kind();
        self.tracks.retain(|t| t.kind() != kind);
        self.tracks.push(track);
    }

    /// Drop every track.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// All tracks.
    pub fn tracks(&self) -> &[Arc<TrackRemote>] {
        &self.tracks
    }

    /// The video track, if one has arrived.
    pub fn video_track(&self) -> Option<&Arc<TrackRemote>> {
        self.tracks.iter().find(|t| t.kind() == RTPCodecType::Video)
    }

    /// The audio track, if one has arrived.
    pub fn audio_track(&self) -> Option<&Arc<TrackRemote>> {
        self.tracks.iter().find(|t| t.kind() == RTPCodecType::Audio)
    }

    /// Whether no track has arrived yet.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// UI seam the engine binds visible media to.
///
/// `clear` is always the last UI-affecting step of a teardown.
pub trait MediaSurface: Send + Sync {
    /// Show the local preview (publisher side).
    fn bind_local(&self, stream: &LocalStream);

    /// Show a remote stream (subscriber side). Called again on every
    /// track change so a feed swap never leaves a stale stream bound.
    fn bind_remote(&self, stream: &RemoteStream);

    /// Detach whatever is bound.
    fn clear(&self);
}
