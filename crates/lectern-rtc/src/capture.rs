//! Local device capture: streams, tracks, and the platform seam.
//!
//! The engine is a pure-Rust core; actual camera/microphone/screen
//! acquisition is platform work done by the embedding shell, which
//! implements [`MediaDevices`] and hands back [`LocalStream`]s whose
//! tracks wrap `TrackLocalStaticSample` feeds. The engine only ever
//! flips track enablement, swaps tracks between peer-connection
//! senders, and stops tracks on teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::Result;

/// Kind of media a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Microphone audio.
    Audio,
    /// Camera or screen video.
    Video,
}

/// One local media track.
///
/// `enabled` is the cheap, reversible mute flag; `stop` is terminal and
/// releases the underlying device feed. The `ended` watch also fires
/// when the platform ends the track on its own (the screen-capture
/// "stop sharing" control), which the publisher uses to drive the same
/// transition as an explicit stop.
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    device_id: String,
    label: String,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    live: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

impl MediaTrack {
    /// Wrap a platform-fed RTP track.
    pub fn new(
        kind: TrackKind,
        device_id: impl Into<String>,
        label: impl Into<String>,
        rtc: Arc<TrackLocalStaticSample>,
    ) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.into(),
            label: label.into(),
            rtc,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            ended_tx,
        }
    }

    /// Convenience constructor for a VP8 video track.
    pub fn video(
        device_id: impl Into<String>,
        label: impl Into<String>,
        stream_id: &str,
    ) -> Self {
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                ..Default::default()
            },
            "video".to_string(),
            stream_id.to_string(),
        ));
        Self::new(TrackKind::Video, device_id, label, rtc)
    }

    /// Convenience constructor for an Opus audio track.
    pub fn audio(
        device_id: impl Into<String>,
        label: impl Into<String>,
        stream_id: &str,
    ) -> Self {
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                ..Default::default()
            },
            "audio".to_string(),
            stream_id.to_string(),
        ));
        Self::new(TrackKind::Audio, device_id, label, rtc)
    }

    /// Stable track id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind.
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Identifier of the device this track captures.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Human-readable device label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The RTP-level track fed by the platform capturer.
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    /// Whether samples are currently being relayed.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the mute flag. Cheap and reversible; never releases the
    /// device.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
    }

    /// Whether the device feed is still held.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Terminally release the track. Idempotent; fires the `ended`
    /// watch on the first call.
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!(track = %self.id, device = %self.device_id, "track stopped");
            // send_replace updates the value even with no subscriber,
            // so a watch taken after the stop still observes it
            self.ended_tx.send_replace(true);
        }
    }

    /// Watch that flips to `true` when the track ends, whether by
    /// [`stop`](Self::stop) or by the platform.
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("device_id", &self.device_id)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// A set of local tracks acquired together.
///
/// Ownership is exclusive: a publisher holds at most one active camera
/// stream and at most one screen stream, and replacing a stream stops
/// the replaced one's tracks so device handles are never leaked.
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl LocalStream {
    /// Group tracks into a stream.
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Stream id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks.
    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    /// First audio track, if any.
    pub fn audio_track(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    /// First video track, if any.
    pub fn video_track(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// Whether any track still holds its device.
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// Stop every track. Idempotent.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Platform seam for device acquisition.
///
/// Implementations return [`crate::Error::PermissionDenied`] when the
/// user or OS refuses access; the engine aborts only the transition
/// that asked and never retries on its own.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire camera video plus microphone audio as one stream.
    async fn open_camera(&self) -> Result<LocalStream>;

    /// Acquire a screen-capture video stream (no audio). The platform
    /// may end the returned track at any time through its own stop
    /// control; observers see that on the track's `ended` watch.
    async fn open_screen(&self) -> Result<LocalStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_stream() -> LocalStream {
        LocalStream::new(vec![
            Arc::new(MediaTrack::audio("mic-1", "Mic", "cam")),
            Arc::new(MediaTrack::video("cam-1", "Cam", "cam")),
        ])
    }

    #[test]
    fn test_stream_track_lookup_by_kind() {
        let stream = camera_stream();
        assert_eq!(stream.audio_track().unwrap().device_id(), "mic-1");
        assert_eq!(stream.video_track().unwrap().device_id(), "cam-1");
    }

    #[test]
    fn test_stop_is_terminal_and_idempotent() {
        let stream = camera_stream();
        assert!(stream.is_live());
        stream.stop_all();
        stream.stop_all();
        assert!(!stream.is_live());
        for track in stream.tracks() {
            assert!(!track.is_live());
        }
    }

    #[test]
    fn test_enable_flag_is_reversible_and_separate_from_stop() {
        let stream = camera_stream();
        let video = stream.video_track().unwrap();
        video.set_enabled(false);
        assert!(!video.is_enabled());
        assert!(video.is_live());
        video.set_enabled(true);
        assert!(video.is_enabled());
    }

    #[tokio::test]
    async fn test_ended_watch_fires_once_on_stop() {
        let track = Arc::new(MediaTrack::video("screen-1", "Screen", "screen"));
        let mut ended = track.ended();
        assert!(!*ended.borrow());

        track.stop();
        ended.changed().await.unwrap();
        assert!(*ended.borrow());

        // A second stop does not re-signal.
        track.stop();
        assert!(!ended.has_changed().unwrap());
    }
}
