//! In-process fakes for integration tests: a minimal video-room
//! gateway over a real WebSocket, plus channel-backed control-plane,
//! push, device, and surface implementations.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use lectern_core::{Role, SessionInfo};
use lectern_rtc::{
    ControlApi, Error, LocalStream, MediaDevices, MediaSurface, MediaTrack, PushChannel,
    PushEvent, PushSubscription, PushTopic, RecordingResult, RecordingStatus, RemoteStream,
    Result, SessionEvent,
};

/// Initialize tracing for tests (first caller wins).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,webrtc=warn")
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────
// Fake gateway
// ─────────────────────────────────────────────────────────────────────

/// Observable state of the fake gateway.
#[derive(Default)]
pub struct GatewayState {
    next_id: AtomicU64,
    /// (feed id, display) of joined publishers.
    pub participants: Mutex<Vec<(u64, String)>>,
    /// Handle ids in the order detach requests arrived.
    pub detach_order: Mutex<Vec<u64>>,
    /// Handle ids in the order attach requests were served.
    pub attach_order: Mutex<Vec<u64>>,
    /// Number of destroy requests seen.
    pub destroys: AtomicUsize,
    /// Number of keepalives seen.
    pub keepalives: AtomicUsize,
}

impl GatewayState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1000
    }
}

/// Minimal video-room gateway good enough to drive the engine through
/// join/publish/configure/listparticipants/detach/destroy.
pub struct FakeGateway {
    pub url: String,
    pub state: Arc<GatewayState>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeGateway {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let state = Arc::new(GatewayState::default());

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_connection(stream, Arc::clone(&accept_state)));
            }
        });

        Self { url, state, task }
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<GatewayState>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();

    // Peer connections are kept alive for the connection's lifetime so
    // in-flight DTLS/ICE work is not torn down under the engine's feet.
    let mut answerers: Vec<Arc<RTCPeerConnection>> = Vec::new();
    let mut offerers: HashMap<u64, Arc<RTCPeerConnection>> = HashMap::new();
    let mut own_feeds: HashMap<u64, u64> = HashMap::new();

    while let Some(Ok(msg)) = rx.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(v) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let txn = v["transaction"].clone();

        match v["janus"].as_str().unwrap_or_default() {
            "create" => {
                let id = state.next_id();
                send(&mut tx, json!({"janus": "success", "transaction": txn, "data": {"id": id}}))
                    .await;
            }
            "keepalive" => {
                state.keepalives.fetch_add(1, Ordering::SeqCst);
                send(&mut tx, json!({"janus": "ack", "transaction": txn})).await;
            }
            "attach" => {
                let id = state.next_id();
                state.attach_order.lock().push(id);
                send(&mut tx, json!({"janus": "success", "transaction": txn, "data": {"id": id}}))
                    .await;
            }
            "detach" => {
                let handle_id = v["handle_id"].as_u64().unwrap_or_default();
                state.detach_order.lock().push(handle_id);
                if let Some(feed) = own_feeds.remove(&handle_id) {
                    state.participants.lock().retain(|(id, _)| *id != feed);
                }
                send(&mut tx, json!({"janus": "success", "transaction": txn})).await;
            }
            "destroy" => {
                state.destroys.fetch_add(1, Ordering::SeqCst);
                send(&mut tx, json!({"janus": "success", "transaction": txn})).await;
            }
            "message" => {
                let handle_id = v["handle_id"].as_u64().unwrap_or_default();
                let body = &v["body"];
                match body["request"].as_str().unwrap_or_default() {
                    "join" if body["ptype"] == "subscriber" => {
                        let feed = body["feed"].as_u64().unwrap_or_default();
                        let (offer, pc) = make_offer().await;
                        offerers.insert(handle_id, pc);

                        send(&mut tx, json!({"janus": "ack", "transaction": txn})).await;
                        send(
                            &mut tx,
                            json!({
                                "janus": "event",
                                "transaction": txn,
                                "sender": handle_id,
                                "plugindata": {
                                    "plugin": "janus.plugin.videoroom",
                                    "data": {"videoroom": "attached", "id": feed}
                                },
                                "jsep": {"type": "offer", "sdp": offer}
                            }),
                        )
                        .await;
                    }
                    "start" => {
                        if let (Some(pc), Some(answer)) =
                            (offerers.get(&handle_id), v["jsep"]["sdp"].as_str())
                        {
                            pc.set_remote_description(
                                RTCSessionDescription::answer(answer.to_string()).unwrap(),
                            )
                            .await
                            .unwrap();
                        }
                        send(&mut tx, json!({"janus": "ack", "transaction": txn})).await;
                        send(
                            &mut tx,
                            json!({
                                "janus": "event",
                                "transaction": txn,
                                "sender": handle_id,
                                "plugindata": {
                                    "plugin": "janus.plugin.videoroom",
                                    "data": {"videoroom": "event", "started": "ok"}
                                }
                            }),
                        )
                        .await;
                    }
                    "join" => {
                        let feed = state.next_id();
                        let display =
                            body["display"].as_str().unwrap_or_default().to_string();
                        let others: Vec<Value> = state
                            .participants
                            .lock()
                            .iter()
                            .map(|(id, display)| json!({"id": id, "display": display}))
                            .collect();
                        state.participants.lock().push((feed, display));
                        own_feeds.insert(handle_id, feed);

                        send(&mut tx, json!({"janus": "ack", "transaction": txn})).await;
                        send(
                            &mut tx,
                            json!({
                                "janus": "event",
                                "transaction": txn,
                                "sender": handle_id,
                                "plugindata": {
                                    "plugin": "janus.plugin.videoroom",
                                    "data": {
                                        "videoroom": "joined",
                                        "id": feed,
                                        "room": body["room"],
                                        "publishers": others
                                    }
                                }
                            }),
                        )
                        .await;
                    }
                    "listparticipants" => {
                        let participants: Vec<Value> = state
                            .participants
                            .lock()
                            .iter()
                            .map(|(id, display)| {
                                json!({"id": id, "display": display, "publisher": true})
                            })
                            .collect();
                        send(
                            &mut tx,
                            json!({
                                "janus": "success",
                                "transaction": txn,
                                "sender": handle_id,
                                "plugindata": {
                                    "plugin": "janus.plugin.videoroom",
                                    "data": {
                                        "videoroom": "participants",
                                        "room": body["room"],
                                        "participants": participants
                                    }
                                }
                            }),
                        )
                        .await;
                    }
                    "configure" | "publish" => {
                        send(&mut tx, json!({"janus": "ack", "transaction": txn})).await;

                        let mut reply = json!({
                            "janus": "event",
                            "transaction": txn,
                            "sender": handle_id,
                            "plugindata": {
                                "plugin": "janus.plugin.videoroom",
                                "data": {"videoroom": "event", "configured": "ok"}
                            }
                        });
                        if let Some(offer) = v["jsep"]["sdp"].as_str() {
                            let (answer, pc) = answer_offer(offer.to_string()).await;
                            answerers.push(pc);
                            reply["jsep"] = json!({"type": "answer", "sdp": answer});
                        }
                        send(&mut tx, reply).await;
                    }
                    "unpublish" => {
                        send(&mut tx, json!({"janus": "ack", "transaction": txn})).await;
                        send(
                            &mut tx,
                            json!({
                                "janus": "event",
                                "transaction": txn,
                                "sender": handle_id,
                                "plugindata": {
                                    "plugin": "janus.plugin.videoroom",
                                    "data": {"videoroom": "event", "unpublished": "ok"}
                                }
                            }),
                        )
                        .await;
                    }
                    "leave" => {
                        send(&mut tx, json!({"janus": "ack", "transaction": txn})).await;
                        send(
                            &mut tx,
                            json!({
                                "janus": "event",
                                "transaction": txn,
                                "sender": handle_id,
                                "plugindata": {
                                    "plugin": "janus.plugin.videoroom",
                                    "data": {"videoroom": "event", "leaving": "ok"}
                                }
                            }),
                        )
                        .await;
                    }
                    other => panic!("fake gateway: unhandled request {other}"),
                }
            }
            other => panic!("fake gateway: unhandled message {other}"),
        }
    }
}

async fn send(
    tx: &mut (impl SinkExt<Message> + Unpin),
    value: Value,
) {
    let _ = tx.send(Message::Text(value.to_string())).await;
}

fn build_peer_api() -> webrtc::api::API {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();
    APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build()
}

/// Answer an SDP offer with a freshly built peer connection.
async fn answer_offer(offer_sdp: String) -> (String, Arc<RTCPeerConnection>) {
    let pc = Arc::new(
        build_peer_api()
            .new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );

    pc.set_remote_description(RTCSessionDescription::offer(offer_sdp).unwrap())
        .await
        .unwrap();
    let answer = pc.create_answer(None).await.unwrap();
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await.unwrap();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), gather_complete.recv()).await;

    let sdp = pc.local_description().await.unwrap().sdp;
    (sdp, pc)
}

/// Build a send-side offer the way the gateway does for subscribers.
async fn make_offer() -> (String, Arc<RTCPeerConnection>) {
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    let pc = Arc::new(
        build_peer_api()
            .new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );
    pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
        .await
        .unwrap();
    pc.add_transceiver_from_kind(RTPCodecType::Video, None)
        .await
        .unwrap();

    let offer = pc.create_offer(None).await.unwrap();
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.unwrap();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), gather_complete.recv()).await;

    let sdp = pc.local_description().await.unwrap().sdp;
    (sdp, pc)
}

// ─────────────────────────────────────────────────────────────────────
// Fake control plane
// ─────────────────────────────────────────────────────────────────────

pub struct FakeControl {
    pub gateway_url: String,
    pub role: Role,
    pub fail_bootstrap: AtomicBool,
    pub fail_join: AtomicBool,
    pub recording_calls: AtomicUsize,
    pub end_calls: AtomicUsize,
}

impl FakeControl {
    pub fn new(gateway_url: impl Into<String>, role: Role) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            role,
            fail_bootstrap: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            recording_calls: AtomicUsize::new(0),
            end_calls: AtomicUsize::new(0),
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: "s-1".to_string(),
            room_id: 42,
            gateway_url: self.gateway_url.clone(),
            role: self.role,
            display_name: match self.role {
                Role::Mentor => "Kim".to_string(),
                Role::Mentee => "Lee".to_string(),
            },
            mentor_display_name: Some("Kim".to_string()),
        }
    }
}

#[async_trait]
impl ControlApi for FakeControl {
    async fn bootstrap(&self, _lecture_id: &str) -> Result<SessionInfo> {
        if self.fail_bootstrap.load(Ordering::SeqCst) {
            return Err(Error::Bootstrap("HTTP 503 Service Unavailable".to_string()));
        }
        Ok(self.info())
    }

    async fn join(&self, _lecture_id: &str) -> Result<SessionInfo> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(Error::Bootstrap("HTTP 403 Forbidden".to_string()));
        }
        Ok(self.info())
    }

    async fn end(&self, _session_id: &str) -> Result<()> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recording(&self, _session_id: &str) -> Result<RecordingResult> {
        self.recording_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingResult {
            status: RecordingStatus::Ready,
            url: Some("https://cdn.example/rec/s-1.mp4".to_string()),
        })
    }

    async fn send_chat(&self, _room_id: u64, _sender: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Channel-backed push source
// ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ChannelPush {
    senders: Mutex<Vec<mpsc::UnboundedSender<PushEvent>>>,
}

impl ChannelPush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event to every open subscription.
    pub fn send(&self, event: PushEvent) {
        for tx in self.senders.lock().iter() {
            let _ = tx.send(event.clone());
        }
    }
}

#[async_trait]
impl PushChannel for ChannelPush {
    async fn subscribe(&self, _topic: PushTopic) -> Result<PushSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        Ok(PushSubscription::from_parts(rx, None))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Fake devices + recording surface
// ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDevices {
    pub deny_camera: AtomicBool,
    pub deny_screen: AtomicBool,
    pub camera_streams: Mutex<Vec<LocalStream>>,
    pub screen_streams: Mutex<Vec<LocalStream>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every track ever handed out.
    pub fn all_tracks(&self) -> Vec<Arc<MediaTrack>> {
        let mut tracks = Vec::new();
        for stream in self.camera_streams.lock().iter() {
            tracks.extend(stream.tracks().iter().cloned());
        }
        for stream in self.screen_streams.lock().iter() {
            tracks.extend(stream.tracks().iter().cloned());
        }
        tracks
    }

    pub fn last_screen(&self) -> Option<LocalStream> {
        self.screen_streams.lock().last().cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open_camera(&self) -> Result<LocalStream> {
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("camera".to_string()));
        }
        let stream = LocalStream::new(vec![
            Arc::new(MediaTrack::audio("fake-mic", "Fake Microphone", "camera")),
            Arc::new(MediaTrack::video("fake-cam", "Fake Camera", "camera")),
        ]);
        self.camera_streams.lock().push(stream.clone());
        Ok(stream)
    }

    async fn open_screen(&self) -> Result<LocalStream> {
        if self.deny_screen.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("screen".to_string()));
        }
        let stream = LocalStream::new(vec![Arc::new(MediaTrack::video(
            "fake-screen",
            "Fake Screen",
            "screen",
        ))]);
        self.screen_streams.lock().push(stream.clone());
        Ok(stream)
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub local: Mutex<Option<LocalStream>>,
    pub local_binds: AtomicUsize,
    pub remote_binds: AtomicUsize,
    pub clears: AtomicUsize,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_local(&self) -> Option<LocalStream> {
        self.local.lock().clone()
    }
}

impl MediaSurface for RecordingSurface {
    fn bind_local(&self, stream: &LocalStream) {
        self.local_binds.fetch_add(1, Ordering::SeqCst);
        *self.local.lock() = Some(stream.clone());
    }

    fn bind_remote(&self, _stream: &RemoteStream) {
        self.remote_binds.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.local.lock() = None;
    }
}

// ─────────────────────────────────────────────────────────────────────
// Event helpers
// ─────────────────────────────────────────────────────────────────────

/// Wait (bounded) for the first event matching `pred`.
pub async fn wait_for_event(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event stream closed while waiting");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
