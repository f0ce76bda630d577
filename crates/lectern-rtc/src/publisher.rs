//! Mentor-side publisher session.
//!
//! Joins the room as a publisher, offers the camera stream, and
//! renegotiates whenever the outbound media changes: mic/cam toggles
//! are track-enable flips plus a lightweight configure, screen share
//! swaps the outbound video track (sender-level replacement first,
//! full renegotiation only as a fallback).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lectern_core::{FeedId, Participant};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

use crate::capture::{LocalStream, MediaDevices, MediaTrack, TrackKind};
use crate::events::{emit, EventSender, SessionEvent};
use crate::gateway::{Jsep, ParticipantType, PluginHandle, RoomEvent, RoomRequest};
use crate::peer;
use crate::surface::MediaSurface;
use crate::{Error, Result};

const UNPUBLISH_GRACE: Duration = Duration::from_secs(2);

/// Publisher state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    /// Not yet in the room.
    Unjoined,
    /// Join request in flight.
    Joining,
    /// In the room, not yet publishing.
    Joined,
    /// Camera + mic are being published.
    Publishing,
    /// Screen video + mic are being published; the camera track is
    /// disabled but held for resumption.
    ScreenSharing,
    /// Torn down.
    Ended,
}

impl PublisherState {
    /// State name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unjoined => "unjoined",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Publishing => "publishing",
            Self::ScreenSharing => "screen_sharing",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mentor-side session: one publisher per lecture.
pub struct PublisherSession {
    room: u64,
    display: String,
    handle: Arc<PluginHandle>,
    pc: Arc<RTCPeerConnection>,
    devices: Arc<dyn MediaDevices>,
    preview: Arc<dyn MediaSurface>,
    events: EventSender,

    state: Mutex<PublisherState>,
    own_feed: Mutex<Option<FeedId>>,
    camera: Mutex<Option<LocalStream>>,
    screen: Mutex<Option<LocalStream>>,
    audio_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    /// Serializes offer/answer exchanges; a second renegotiation must
    /// not start before the previous one completes.
    negotiation: tokio::sync::Mutex<()>,
    screen_watch: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PublisherSession {
    /// Create an unjoined publisher bound to an attached handle.
    pub fn new(
        room: u64,
        display: String,
        handle: Arc<PluginHandle>,
        pc: Arc<RTCPeerConnection>,
        devices: Arc<dyn MediaDevices>,
        preview: Arc<dyn MediaSurface>,
        events: EventSender,
    ) -> Self {
        Self {
            room,
            display,
            handle,
            pc,
            devices,
            preview,
            events,
            state: Mutex::new(PublisherState::Unjoined),
            own_feed: Mutex::new(None),
            camera: Mutex::new(None),
            screen: Mutex::new(None),
            audio_sender: Mutex::new(None),
            video_sender: Mutex::new(None),
            negotiation: tokio::sync::Mutex::new(()),
            screen_watch: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> PublisherState {
        *self.state.lock()
    }

    /// Our own feed id, once joined.
    pub fn own_feed(&self) -> Option<FeedId> {
        *self.own_feed.lock()
    }

    fn set_state(&self, next: PublisherState) {
        let prev = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, next)
        };
        if prev != next {
            debug!(from = prev.name(), to = next.name(), "publisher state");
            emit(
                &self.events,
                SessionEvent::PublisherStateChanged { state: next },
            );
        }
    }

    /// Join the room and start publishing the given camera stream.
    ///
    /// Returns the publishers already present, which seed the roster.
    /// On failure the session is back in its prior state; the caller
    /// keeps ownership of the stream's device handles.
    pub async fn join_and_publish(&self, stream: LocalStream) -> Result<Vec<Participant>> {
        if self.state() != PublisherState::Unjoined {
            return Err(Error::InvalidState(format!(
                "cannot join while {}",
                self.state()
            )));
        }
        self.set_state(PublisherState::Joining);

        // Local preview first: the mentor sees themselves while the
        // join and the offer are still in flight.
        self.preview.bind_local(&stream);

        let join = RoomRequest::Join {
            room: self.room,
            ptype: ParticipantType::Publisher,
            display: Some(self.display.clone()),
            feed: None,
        };
        let reply = match self.handle.request(&join).await {
            Ok(reply) => reply,
            Err(e) => {
                self.set_state(PublisherState::Unjoined);
                return Err(e);
            }
        };

        let Some(RoomEvent::Joined { id, publishers, .. }) = reply.room_event() else {
            self.set_state(PublisherState::Unjoined);
            return Err(Error::Gateway("join reply was not a joined event".to_string()));
        };

        *self.own_feed.lock() = Some(FeedId(id));
        self.set_state(PublisherState::Joined);
        info!(room = self.room, feed = id, "joined room as publisher");

        // Joined auto-advances: offer the held camera stream.
        if let Err(e) = self.publish_stream(&stream).await {
            self.set_state(PublisherState::Joined);
            return Err(e);
        }

        *self.camera.lock() = Some(stream);
        self.set_state(PublisherState::Publishing);

        Ok(publishers
            .iter()
            .map(|p| Participant::new(p.id, p.display.clone().unwrap_or_default()))
            .collect())
    }

    async fn publish_stream(&self, stream: &LocalStream) -> Result<()> {
        for track in stream.tracks() {
            let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
            let sender = self.pc.add_track(rtc).await.map_err(Error::from)?;
            match track.kind() {
                TrackKind::Audio => *self.audio_sender.lock() = Some(sender),
                TrackKind::Video => *self.video_sender.lock() = Some(sender),
            }
        }

        self.renegotiate(RoomRequest::Publish {
            audio: true,
            video: true,
        })
        .await
    }

    /// Full offer/answer exchange carrying `body`.
    async fn renegotiate(&self, body: RoomRequest) -> Result<()> {
        let _serialized = self.negotiation.lock().await;

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("create_offer failed: {e}")))?;
        let local = peer::set_local_and_gather(&self.pc, offer).await?;

        let reply = self
            .handle
            .request_with_jsep(&body, Jsep::offer(local.sdp))
            .await?;

        let jsep = reply
            .jsep
            .ok_or_else(|| Error::Negotiation("gateway returned no answer".to_string()))?;
        if jsep.is_offer() {
            return Err(Error::Negotiation(
                "gateway answered an offer with an offer".to_string(),
            ));
        }

        let answer = RTCSessionDescription::answer(jsep.sdp)
            .map_err(|e| Error::Negotiation(format!("invalid answer: {e}")))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("set_remote_description failed: {e}")))?;

        self.refresh_senders().await;
        Ok(())
    }

    /// Re-resolve the outbound senders. The stack may attach new
    /// transceivers on the first offer and reuse them afterwards, so
    /// the cached senders are stale after every exchange.
    async fn refresh_senders(&self) {
        let mut audio = None;
        let mut video = None;
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                match track.kind() {
                    RTPCodecType::Audio => audio = Some(Arc::clone(&sender)),
                    RTPCodecType::Video => video = Some(Arc::clone(&sender)),
                    RTPCodecType::Unspecified => {}
                }
            }
        }
        *self.audio_sender.lock() = audio;
        *self.video_sender.lock() = video;
    }

    fn active_camera(&self) -> Result<LocalStream> {
        self.camera
            .lock()
            .clone()
            .ok_or_else(|| Error::InvalidState("no active camera stream".to_string()))
    }

    fn mic_enabled(&self) -> bool {
        self.camera
            .lock()
            .as_ref()
            .and_then(|s| s.audio_track().map(|t| t.is_enabled()))
            .unwrap_or(false)
    }

    fn require_active_publish(&self) -> Result<PublisherState> {
        match self.state() {
            state @ (PublisherState::Publishing | PublisherState::ScreenSharing) => Ok(state),
            other => Err(Error::InvalidState(format!(
                "not publishing (currently {other})"
            ))),
        }
    }

    /// Flip the microphone. Track-enable flip plus a lightweight
    /// configure; the track itself is never stopped.
    pub async fn toggle_mic(&self, on: bool) -> Result<()> {
        let state = self.require_active_publish()?;
        let camera = self.active_camera()?;
        let track = camera
            .audio_track()
            .ok_or_else(|| Error::InvalidState("no microphone track".to_string()))?;
        track.set_enabled(on);

        let video = match state {
            PublisherState::ScreenSharing => true,
            _ => camera.video_track().map(|t| t.is_enabled()).unwrap_or(false),
        };
        self.handle
            .request(&RoomRequest::Configure { audio: on, video })
            .await?;
        debug!(on, "microphone toggled");
        Ok(())
    }

    /// Flip the camera. During a screen share only the flag changes;
    /// the screen video keeps flowing.
    pub async fn toggle_cam(&self, on: bool) -> Result<()> {
        let state = self.require_active_publish()?;
        let camera = self.active_camera()?;
        let track = camera
            .video_track()
            .ok_or_else(|| Error::InvalidState("no camera track".to_string()))?;
        track.set_enabled(on);

        let video = match state {
            PublisherState::ScreenSharing => true,
            _ => on,
        };
        self.handle
            .request(&RoomRequest::Configure {
                audio: self.mic_enabled(),
                video,
            })
            .await?;
        debug!(on, "camera toggled");
        Ok(())
    }

    /// Swap the outbound video track: sender-level replacement when the
    /// transceiver is reusable, full renegotiation otherwise.
    async fn swap_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        let sender = self.video_sender.lock().clone();
        if let Some(sender) = sender {
            let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
            match sender.replace_track(Some(rtc)).await {
                Ok(()) => {
                    self.handle
                        .request(&RoomRequest::Configure {
                            audio: self.mic_enabled(),
                            video: true,
                        })
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    debug!("replace_track failed, renegotiating: {e}");
                    self.pc
                        .remove_track(&sender)
                        .await
                        .map_err(|e| Error::Negotiation(format!("remove_track failed: {e}")))?;
                }
            }
        }

        let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
        let sender = self.pc.add_track(rtc).await.map_err(Error::from)?;
        *self.video_sender.lock() = Some(sender);
        self.renegotiate(RoomRequest::Configure {
            audio: self.mic_enabled(),
            video: true,
        })
        .await
    }

    /// Start sharing the screen instead of the camera.
    ///
    /// The camera video track is disabled, not stopped, so it resumes
    /// instantly when the share ends. The platform's own stop control
    /// ends the screen track; a watcher drives the same transition as
    /// [`stop_screen_share`](Self::stop_screen_share).
    pub async fn start_screen_share(self: &Arc<Self>) -> Result<()> {
        if self.state() != PublisherState::Publishing {
            return Err(Error::InvalidState(format!(
                "screen share requires an active publish (currently {})",
                self.state()
            )));
        }

        let screen = self.devices.open_screen().await?;
        let Some(screen_video) = screen.video_track().cloned() else {
            screen.stop_all();
            return Err(Error::Capture("screen stream has no video track".to_string()));
        };

        let camera = self.active_camera()?;
        let camera_video = camera.video_track().cloned();
        if let Some(video) = &camera_video {
            video.set_enabled(false);
        }

        if let Err(e) = self.swap_video_track(Arc::clone(&screen_video)).await {
            // fully revert: release the screen, resume the camera
            screen.stop_all();
            if let Some(video) = &camera_video {
                video.set_enabled(true);
            }
            warn!("screen share negotiation failed: {e}");
            return Err(e);
        }

        // the preview shows what the room sees: screen video + live mic
        let mut composed = vec![Arc::clone(&screen_video)];
        if let Some(mic) = camera.audio_track() {
            composed.push(Arc::clone(mic));
        }
        self.preview.bind_local(&LocalStream::new(composed));

        *self.screen.lock() = Some(screen);
        self.set_state(PublisherState::ScreenSharing);
        info!("screen share started");

        self.spawn_screen_watch(screen_video);
        Ok(())
    }

    fn spawn_screen_watch(self: &Arc<Self>, track: Arc<MediaTrack>) {
        let mut ended = track.ended();
        let publisher = Arc::clone(self);
        let watch = tokio::spawn(async move {
            if ended.changed().await.is_ok() && *ended.borrow() {
                debug!("screen capture ended by the platform");
                // drop our own handle before stopping so the stop path
                // doesn't cancel this task mid-teardown
                publisher.screen_watch.lock().take();
                if let Err(e) = publisher.stop_screen_share().await {
                    warn!("automatic screen-share stop failed: {e}");
                }
            }
        });

        if let Some(previous) = self.screen_watch.lock().replace(watch) {
            previous.abort();
        }
    }

    /// Return from screen share to the camera.
    ///
    /// Idempotent: a no-op unless currently sharing, which also settles
    /// the race between an explicit stop and the platform's own stop
    /// control.
    pub async fn stop_screen_share(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != PublisherState::ScreenSharing {
                return Ok(());
            }
            *state = PublisherState::Publishing;
        }
        emit(
            &self.events,
            SessionEvent::PublisherStateChanged {
                state: PublisherState::Publishing,
            },
        );

        if let Some(watch) = self.screen_watch.lock().take() {
            watch.abort();
        }

        if let Some(screen) = self.screen.lock().take() {
            screen.stop_all();
        }

        let camera = self.active_camera()?;
        if let Some(video) = camera.video_track() {
            video.set_enabled(true);
        }

        let result = match camera.video_track().cloned() {
            Some(video) => self.swap_video_track(video).await,
            None => Err(Error::InvalidState("no camera track to resume".to_string())),
        };
        if let Err(e) = &result {
            // the screen is already gone; surface the fault but stay on
            // the resumed camera
            warn!("camera resume negotiation failed: {e}");
            emit(
                &self.events,
                SessionEvent::Fault {
                    message: e.user_message().to_string(),
                },
            );
        }

        self.preview.bind_local(&camera);
        emit(&self.events, SessionEvent::ScreenShareEnded);
        info!("screen share stopped");
        result
    }

    /// Tear the publisher down: best-effort unpublish, stop every held
    /// track, close the peer connection. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == PublisherState::Ended {
                return;
            }
            *state = PublisherState::Ended;
        }

        if let Some(watch) = self.screen_watch.lock().take() {
            watch.abort();
        }

        let unpublish = self.handle.request(&RoomRequest::Unpublish);
        match tokio::time::timeout(UNPUBLISH_GRACE, unpublish).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("unpublish failed during teardown: {e}"),
            Err(_) => debug!("unpublish timed out during teardown"),
        }

        if let Some(screen) = self.screen.lock().take() {
            screen.stop_all();
        }
        if let Some(camera) = self.camera.lock().take() {
            camera.stop_all();
        }

        if let Err(e) = self.pc.close().await {
            warn!("peer connection close failed: {e}");
        }

        emit(
            &self.events,
            SessionEvent::PublisherStateChanged {
                state: PublisherState::Ended,
            },
        );
    }
}
