//! Gateway connection: WebSocket transport, transaction correlation,
//! per-handle event routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::handle::{HandleEvent, PluginHandle};
use super::protocol::{Envelope, GATEWAY_SUBPROTOCOL};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Routing state shared between the connection, its reader task, and
/// every attached handle.
pub(crate) struct Shared {
    /// Reply slots keyed by transaction. A slot may receive several
    /// envelopes (an `ack` followed by the real reply).
    pending: Mutex<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
    /// Event channels keyed by handle id.
    handles: Mutex<HashMap<u64, mpsc::UnboundedSender<HandleEvent>>>,
    /// Handle ids in attach order; torn down back-to-front.
    attach_order: Mutex<Vec<u64>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            attach_order: Mutex::new(Vec::new()),
        }
    }

    fn register_pending(&self, transaction: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().insert(transaction.to_string(), tx);
        rx
    }

    fn unregister_pending(&self, transaction: &str) {
        self.pending.lock().remove(transaction);
    }

    pub(crate) fn register_handle(&self, handle_id: u64) -> mpsc::UnboundedReceiver<HandleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handles.lock().insert(handle_id, tx);
        self.attach_order.lock().push(handle_id);
        rx
    }

    pub(crate) fn unregister_handle(&self, handle_id: u64) {
        self.handles.lock().remove(&handle_id);
        self.attach_order.lock().retain(|id| *id != handle_id);
    }

    fn attached_lifo(&self) -> Vec<u64> {
        let mut ids = self.attach_order.lock().clone();
        ids.reverse();
        ids
    }

    /// Route one inbound envelope: transaction replies win, everything
    /// else goes to the owning handle's event stream.
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        if let Some(transaction) = envelope.transaction.as_deref() {
            let slot = self.pending.lock().get(transaction).cloned();
            if let Some(slot) = slot {
                if slot.send(envelope).is_err() {
                    trace!("reply arrived after requester gave up");
                }
                return;
            }
        }

        let Some(sender) = envelope.sender else {
            trace!(kind = %envelope.kind, "unroutable gateway message ignored");
            return;
        };

        let event = match envelope.kind.as_str() {
            "event" => match envelope.room_event() {
                Some(event) => HandleEvent::Room {
                    event,
                    jsep: envelope.jsep.clone(),
                },
                None => {
                    warn!(handle = sender, "unparseable plugin event dropped");
                    return;
                }
            },
            "webrtcup" => HandleEvent::WebRtcUp,
            "hangup" => HandleEvent::Hangup {
                reason: envelope.reason.clone(),
            },
            "detached" => HandleEvent::Detached,
            "media" | "slowlink" => return,
            other => {
                trace!(kind = other, "gateway notice ignored");
                return;
            }
        };

        let handle = self.handles.lock().get(&sender).cloned();
        match handle {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => trace!(handle = sender, "event for unknown handle dropped"),
        }
    }
}

/// Send a payload and await the envelope that completes the exchange.
///
/// `ack` envelopes are waypoints, not replies: the gateway acknowledges
/// asynchronous requests immediately and delivers the real reply later
/// under the same transaction, so the loop keeps waiting through acks.
pub(crate) async fn roundtrip(
    shared: &Shared,
    tx: &mpsc::UnboundedSender<Message>,
    payload: Value,
    transaction: String,
    timeout: Duration,
) -> Result<Envelope> {
    let mut rx = shared.register_pending(&transaction);

    let sent = tx.send(Message::Text(payload.to_string()));
    if sent.is_err() {
        shared.unregister_pending(&transaction);
        return Err(Error::Gateway("gateway connection closed".to_string()));
    }

    let result = async {
        loop {
            let envelope = tokio::time::timeout(timeout, rx.recv())
                .await
                .map_err(|_| Error::Gateway("gateway request timed out".to_string()))?
                .ok_or_else(|| Error::Gateway("gateway connection closed".to_string()))?;

            match envelope.kind.as_str() {
                "ack" => continue,
                "error" => {
                    let reason = envelope
                        .error
                        .map(|e| format!("{} (code {})", e.reason, e.code))
                        .unwrap_or_else(|| "unknown gateway error".to_string());
                    return Err(Error::Gateway(reason));
                }
                _ => return Ok(envelope),
            }
        }
    }
    .await;

    shared.unregister_pending(&transaction);
    result
}

/// One connection to the signaling gateway.
///
/// Wraps the gateway's message-oriented surface into awaitable
/// operations: `connect` establishes the WebSocket and the gateway
/// session, `attach` yields [`PluginHandle`]s, and `destroy` tears the
/// whole stack down exactly once, detaching still-attached handles in
/// reverse attach order first.
pub struct GatewayClient {
    session_id: u64,
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    destroyed: AtomicBool,
    timeout: Duration,
}

impl GatewayClient {
    /// Connect to the gateway and create a gateway session.
    ///
    /// Spawns the sender/receiver tasks and a keepalive timer (the
    /// gateway reaps sessions that stay silent).
    pub async fn connect(
        url: &str,
        request_timeout: Duration,
        keepalive_interval: Duration,
    ) -> Result<Self> {
        info!("connecting to gateway: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| Error::GatewayConnect(format!("invalid gateway URL: {e}")))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(GATEWAY_SUBPROTOCOL),
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| Error::GatewayConnect(format!("failed to connect: {e}")))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        let writer = tokio::spawn(Self::sender_task(write, rx));
        let reader = tokio::spawn(Self::receiver_task(read, Arc::clone(&shared)));

        // Gateway session create is the first exchange on the wire.
        let transaction = Uuid::new_v4().to_string();
        let reply = roundtrip(
            &shared,
            &tx,
            json!({"janus": "create", "transaction": transaction}),
            transaction,
            request_timeout,
        )
        .await
        .map_err(|e| Error::GatewayConnect(e.to_string()))?;

        let session_id = reply
            .data_id()
            .ok_or_else(|| Error::GatewayConnect("create reply carried no id".to_string()))?;

        info!(session = session_id, "gateway session established");

        let keepalive = tokio::spawn(Self::keepalive_task(
            tx.clone(),
            session_id,
            keepalive_interval,
        ));

        Ok(Self {
            session_id,
            tx,
            shared,
            tasks: Mutex::new(vec![writer, reader, keepalive]),
            destroyed: AtomicBool::new(false),
            timeout: request_timeout,
        })
    }

    /// Gateway-issued session id.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Attach a plugin and return its handle.
    pub async fn attach(&self, plugin: &str) -> Result<Arc<PluginHandle>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Gateway("gateway connection destroyed".to_string()));
        }

        let transaction = Uuid::new_v4().to_string();
        let reply = roundtrip(
            &self.shared,
            &self.tx,
            json!({
                "janus": "attach",
                "session_id": self.session_id,
                "plugin": plugin,
                "transaction": transaction,
            }),
            transaction,
            self.timeout,
        )
        .await?;

        let handle_id = reply
            .data_id()
            .ok_or_else(|| Error::Gateway("attach reply carried no id".to_string()))?;

        let events = self.shared.register_handle(handle_id);
        debug!(handle = handle_id, plugin, "plugin attached");

        Ok(Arc::new(PluginHandle::new(
            handle_id,
            self.session_id,
            plugin.to_string(),
            self.tx.clone(),
            Arc::clone(&self.shared),
            events,
            self.timeout,
        )))
    }

    /// Destroy the gateway session and close the transport.
    ///
    /// Idempotent: the first call detaches every still-attached handle
    /// (reverse attach order), destroys the gateway session, and stops
    /// the background tasks; later calls are no-ops.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        for handle_id in self.shared.attached_lifo() {
            self.shared.unregister_handle(handle_id);
            let transaction = Uuid::new_v4().to_string();
            let detach = roundtrip(
                &self.shared,
                &self.tx,
                json!({
                    "janus": "detach",
                    "session_id": self.session_id,
                    "handle_id": handle_id,
                    "transaction": transaction,
                }),
                transaction,
                self.timeout,
            )
            .await;
            if let Err(e) = detach {
                warn!(handle = handle_id, "detach during destroy failed: {e}");
            }
        }

        let transaction = Uuid::new_v4().to_string();
        let destroy = roundtrip(
            &self.shared,
            &self.tx,
            json!({
                "janus": "destroy",
                "session_id": self.session_id,
                "transaction": transaction,
            }),
            transaction,
            self.timeout,
        )
        .await;
        if let Err(e) = destroy {
            warn!("gateway destroy failed: {e}");
        }

        let _ = self.tx.send(Message::Close(None));
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        info!(session = self.session_id, "gateway connection destroyed");
    }

    /// Sender task: forwards queued messages to the WebSocket.
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("failed to send gateway message: {e}");
                break;
            }
            if closing {
                break;
            }
        }
        debug!("gateway sender task terminated");
    }

    /// Receiver task: parses inbound envelopes and routes them.
    async fn receiver_task(mut read: futures::stream::SplitStream<WsStream>, shared: Arc<Shared>) {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => shared.dispatch(envelope),
                    Err(e) => warn!("unparseable gateway message: {e}"),
                },
                Ok(Message::Close(_)) => {
                    info!("gateway closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("gateway transport error: {e}");
                    break;
                }
            }
        }
        debug!("gateway receiver task terminated");
    }

    /// Keepalive task: the gateway reaps silent sessions.
    async fn keepalive_task(
        tx: mpsc::UnboundedSender<Message>,
        session_id: u64,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let payload = json!({
                "janus": "keepalive",
                "session_id": session_id,
                "transaction": Uuid::new_v4().to_string(),
            });
            if tx.send(Message::Text(payload.to_string())).is_err() {
                break;
            }
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        // Destroy is the owning teardown path; this only stops the
        // background tasks if the owner never got there.
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
