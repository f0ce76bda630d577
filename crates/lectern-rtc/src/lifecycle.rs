//! Session lifecycle: bootstrap, remote termination, teardown.
//!
//! The controller owns every resource a session acquires and is the
//! only component that releases them. `leave` is reachable from any
//! state, idempotent, and able to interrupt an in-flight `start`
//! through a generation counter that gates late completions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lectern_core::{resolve, LectureRef, Role, RosterUpdate, SessionInfo};
use tracing::{debug, info, warn};

use crate::api::{ControlApi, PushChannel, PushEvent, PushSubscription, PushTopic};
use crate::capture::{LocalStream, MediaDevices};
use crate::config::EngineConfig;
use crate::events::{emit, EventSender, SessionEvent};
use crate::gateway::{
    GatewayClient, HandleEvent, ParticipantType, PluginHandle, RoomRequest, VIDEOROOM_PLUGIN,
};
use crate::peer;
use crate::poller::RosterPoller;
use crate::publisher::PublisherSession;
use crate::subscriber::SubscriberSession;
use crate::surface::MediaSurface;
use crate::{Error, Result};

struct ActiveSession {
    info: SessionInfo,
    gateway: Arc<GatewayClient>,
    publisher: Option<Arc<PublisherSession>>,
    subscriber: Option<Arc<SubscriberSession>>,
    poller: Arc<RosterPoller>,
    /// Event pump, termination listener, and (mentee) subscribe driver.
    /// Aborting the listener drops its push subscription, which closes
    /// the stream.
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Owns one live lecture session end to end.
pub struct SessionController {
    config: EngineConfig,
    api: Arc<dyn ControlApi>,
    push: Arc<dyn PushChannel>,
    devices: Arc<dyn MediaDevices>,
    surface: Arc<dyn MediaSurface>,
    events: EventSender,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    /// Bumped by every `leave`; `start` steps compare against the value
    /// they began with and back out when it moved.
    generation: AtomicU64,
}

impl SessionController {
    /// Controller over the given seams. Engine events flow to `events`.
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn ControlApi>,
        push: Arc<dyn PushChannel>,
        devices: Arc<dyn MediaDevices>,
        surface: Arc<dyn MediaSurface>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            api,
            push,
            devices,
            surface,
            events,
            active: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Info of the active session, if one exists.
    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.active.lock().await.as_ref().map(|s| s.info.clone())
    }

    /// The active publisher session (mentor role only).
    pub async fn publisher(&self) -> Option<Arc<PublisherSession>> {
        self.active
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.publisher.clone())
    }

    /// The active subscriber session (mentee role only).
    pub async fn subscriber(&self) -> Option<Arc<SubscriberSession>> {
        self.active
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.subscriber.clone())
    }

    /// Start a session for a lecture.
    ///
    /// Order matters and is part of the contract: local media first
    /// (mentor only), then bootstrap with the join fallback, then the
    /// push subscription, then the gateway, then polling. Any failure
    /// releases everything acquired so far; no partial session is ever
    /// left behind.
    pub async fn start(self: &Arc<Self>, lecture: LectureRef) -> Result<SessionInfo> {
        if self.active.lock().await.is_some() {
            return Err(Error::InvalidState("a session is already active".to_string()));
        }
        let generation = self.generation.load(Ordering::SeqCst);

        // (a) a mentor with no camera never touches the network
        let mut camera: Option<LocalStream> = None;
        if lecture.role == Role::Mentor {
            camera = Some(self.devices.open_camera().await?);
        }
        if self.cancelled(generation) {
            release_camera(&camera);
            return Err(Error::Cancelled);
        }

        // (b) bootstrap, falling back to the plain join request
        let info = match self.api.bootstrap(&lecture.lecture_id).await {
            Ok(info) => info,
            Err(first) => {
                warn!("bootstrap failed, attempting join fallback: {first}");
                match self.api.join(&lecture.lecture_id).await {
                    Ok(info) => info,
                    Err(e) => {
                        release_camera(&camera);
                        return Err(e);
                    }
                }
            }
        };
        if self.cancelled(generation) {
            release_camera(&camera);
            return Err(Error::Cancelled);
        }
        info!(session = %info.session_id, room = info.room_id, role = ?info.role, "session bootstrapped");

        // (c) push subscription keyed by session id
        let push_sub = match self
            .push
            .subscribe(PushTopic::Session(info.session_id.clone()))
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                release_camera(&camera);
                return Err(e);
            }
        };
        if self.cancelled(generation) {
            release_camera(&camera);
            return Err(Error::Cancelled);
        }

        // (d) gateway connect + role-appropriate attach
        let gateway_url = self
            .config
            .gateway_url
            .as_deref()
            .unwrap_or(&info.gateway_url);
        let gateway = match GatewayClient::connect(
            gateway_url,
            Duration::from_millis(self.config.gateway_request_timeout_ms),
            Duration::from_millis(self.config.keepalive_interval_ms),
        )
        .await
        {
            Ok(gateway) => Arc::new(gateway),
            Err(e) => {
                release_camera(&camera);
                return Err(e);
            }
        };

        let session = match self
            .attach_role(&info, Arc::clone(&gateway), camera.take(), push_sub, generation)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                gateway.destroy().await;
                return Err(e);
            }
        };

        let mut guard = self.active.lock().await;
        if self.cancelled(generation) {
            drop(guard);
            teardown(&session, &*self.surface).await;
            return Err(Error::Cancelled);
        }
        *guard = Some(session);
        Ok(info)
    }

    /// Attach the role-specific session objects and start the
    /// background machinery. The camera stream is owned by the
    /// publisher on success and released here on failure.
    async fn attach_role(
        self: &Arc<Self>,
        info: &SessionInfo,
        gateway: Arc<GatewayClient>,
        camera: Option<LocalStream>,
        push_sub: PushSubscription,
        generation: u64,
    ) -> Result<ActiveSession> {
        let handle = match gateway.attach(VIDEOROOM_PLUGIN).await {
            Ok(handle) => handle,
            Err(e) => {
                release_camera(&camera);
                return Err(e);
            }
        };

        let poller = Arc::new(RosterPoller::new(
            info.room_id,
            Arc::clone(&handle),
            self.events.clone(),
        ));

        let mut publisher = None;
        let mut subscriber = None;
        match info.role {
            Role::Mentor => {
                let camera = camera.ok_or_else(|| {
                    Error::InvalidState("mentor session without a camera stream".to_string())
                })?;

                let pc = match peer::create_peer_connection(&self.config, self.events.clone())
                    .await
                {
                    Ok(pc) => pc,
                    Err(e) => {
                        camera.stop_all();
                        return Err(e);
                    }
                };
                let session = Arc::new(PublisherSession::new(
                    info.room_id,
                    info.tagged_display(),
                    Arc::clone(&handle),
                    pc,
                    Arc::clone(&self.devices),
                    Arc::clone(&self.surface),
                    self.events.clone(),
                ));

                match session.join_and_publish(camera.clone()).await {
                    Ok(initial) => poller.seed(RosterUpdate::Joined(initial)),
                    Err(e) => {
                        camera.stop_all();
                        return Err(e);
                    }
                }
                publisher = Some(session);
            }
            Role::Mentee => {
                // The bootstrap response is authoritative; if it demoted
                // the caller, the camera acquired up front is not needed.
                release_camera(&camera);

                // Passive room join: publishes nothing, but makes this
                // mentee visible on the roster.
                let join = RoomRequest::Join {
                    room: info.room_id,
                    ptype: ParticipantType::Publisher,
                    display: Some(info.tagged_display()),
                    feed: None,
                };
                let reply = handle.request(&join).await?;
                if let Some(update) = reply.room_event().and_then(|e| e.as_roster_update()) {
                    poller.seed(update);
                }

                subscriber = Some(Arc::new(SubscriberSession::new(
                    info.room_id,
                    Arc::clone(&gateway),
                    self.config.clone(),
                    Arc::clone(&self.surface),
                    self.events.clone(),
                )));
            }
        }

        if self.cancelled(generation) {
            if let Some(publisher) = &publisher {
                publisher.close().await;
            }
            return Err(Error::Cancelled);
        }

        // (e) roster polling + background listeners
        poller.start(Duration::from_millis(self.config.roster_poll_interval_ms));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(event_pump(
            Arc::clone(&handle),
            Arc::clone(&poller),
        )));
        tasks.push(tokio::spawn(termination_listener(
            Arc::clone(self),
            push_sub,
            info.session_id.clone(),
        )));
        if let Some(subscriber) = &subscriber {
            tasks.push(tokio::spawn(subscribe_driver(
                Arc::clone(&poller),
                Arc::clone(subscriber),
                info.clone(),
                self.events.clone(),
            )));
        }

        Ok(ActiveSession {
            info: info.clone(),
            gateway,
            publisher,
            subscriber,
            poller,
            tasks,
        })
    }

    /// Authoritative termination: asks the control plane to end the
    /// lecture, then tears down locally. Mentor only.
    pub async fn end(&self) -> Result<()> {
        let (session_id, role) = {
            let guard = self.active.lock().await;
            let session = guard
                .as_ref()
                .ok_or_else(|| Error::InvalidState("no active session".to_string()))?;
            (session.info.session_id.clone(), session.info.role)
        };
        if role != Role::Mentor {
            return Err(Error::InvalidState(
                "only the mentor may end the lecture".to_string(),
            ));
        }

        self.api.end(&session_id).await?;
        self.leave().await;
        Ok(())
    }

    /// Local-only teardown. Idempotent, never fails, callable from any
    /// state including mid-`start` and from unmount paths.
    pub async fn leave(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let session = {
            let mut guard = self.active.lock().await;
            guard.take()
        };
        let Some(session) = session else {
            debug!("leave with no active session");
            return;
        };

        info!(session = %session.info.session_id, "tearing down session");
        teardown(&session, &*self.surface).await;
    }

    fn cancelled(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }
}

fn release_camera(camera: &Option<LocalStream>) {
    if let Some(stream) = camera {
        stream.stop_all();
    }
}

/// Ordered teardown, tolerant of partially initialized state. The
/// surface clear is deliberately the last UI-affecting step.
async fn teardown(session: &ActiveSession, surface: &dyn MediaSurface) {
    session.poller.stop();

    if let Some(subscriber) = &session.subscriber {
        subscriber.close().await;
    }
    if let Some(publisher) = &session.publisher {
        publisher.close().await;
    }

    session.gateway.destroy().await;

    // aborting the termination listener drops its push subscription
    for task in &session.tasks {
        task.abort();
    }

    surface.clear();
}

/// Routes gateway room events into the roster. Join/leave/publish
/// notices and the poll replies reconcile through the same function.
async fn event_pump(handle: Arc<PluginHandle>, poller: Arc<RosterPoller>) {
    while let Some(event) = handle.next_event().await {
        match event {
            HandleEvent::Room { event, .. } => poller.apply_room_event(&event),
            HandleEvent::Hangup { reason } => {
                debug!(?reason, "publisher handle hung up");
            }
            HandleEvent::WebRtcUp => debug!("media path established"),
            HandleEvent::Detached => break,
        }
    }
    debug!("gateway event pump terminated");
}

/// Waits for the remote-termination push event, fetches the recording
/// result once (best-effort), and triggers local teardown.
async fn termination_listener(
    controller: Arc<SessionController>,
    mut push_sub: PushSubscription,
    session_id: String,
) {
    while let Some(event) = push_sub.next().await {
        match event {
            PushEvent::SessionEnded => {
                info!(session = %session_id, "remote termination received");
                let recording = match controller.api.recording(&session_id).await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        debug!("recording fetch failed: {e}");
                        None
                    }
                };
                emit(
                    &controller.events,
                    SessionEvent::SessionEnded { recording },
                );
                // leave() aborts this very task; run it on its own
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.leave().await });
                break;
            }
            // heartbeats keep the stream alive, nothing more
            PushEvent::Ping => {}
            PushEvent::Chat(_) | PushEvent::Other { .. } => {}
        }
    }
}

/// Mentee feed selection: re-resolve whenever the roster changes, but
/// only while no still-present feed is bound.
async fn subscribe_driver(
    poller: Arc<RosterPoller>,
    subscriber: Arc<SubscriberSession>,
    info: SessionInfo,
    events: EventSender,
) {
    let self_display = info.tagged_display();
    let hint = info.mentor_tagged_display();
    let mut changes = poller.changes();

    loop {
        let roster = poller.roster();
        match subscriber.current_feed().await {
            // bound feed still present: nothing to resolve
            Some(feed) if roster.contains(feed) => {}
            Some(stale) => {
                debug!(feed = %stale, "subscribed feed disappeared");
                subscriber.unsubscribe().await;
                try_subscribe(&subscriber, &roster, &self_display, hint.as_deref(), &events)
                    .await;
            }
            None => {
                try_subscribe(&subscriber, &roster, &self_display, hint.as_deref(), &events)
                    .await;
            }
        }

        if changes.changed().await.is_err() {
            break;
        }
    }
    debug!("subscribe driver terminated");
}

async fn try_subscribe(
    subscriber: &Arc<SubscriberSession>,
    roster: &lectern_core::Roster,
    self_display: &str,
    hint: Option<&str>,
    events: &EventSender,
) {
    // null resolution means "not yet resolvable", retried on the next
    // roster update
    let Some(feed) = resolve(roster, self_display, hint) else {
        return;
    };
    if let Err(e) = subscriber.subscribe_to(feed).await {
        warn!(feed = %feed, "subscribe failed: {e}");
        emit(
            events,
            SessionEvent::Fault {
                message: e.user_message().to_string(),
            },
        );
    }
}
