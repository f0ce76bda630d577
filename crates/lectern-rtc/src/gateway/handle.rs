//! Plugin handles: the per-attachment request/event surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use uuid::Uuid;

use super::client::{roundtrip, Shared};
use super::protocol::{Envelope, Jsep, RoomEvent, RoomRequest};
use crate::{Error, Result};

/// Events delivered on a plugin handle's stream: everything the gateway
/// pushes that is not a direct reply to one of our transactions.
#[derive(Debug, Clone)]
pub enum HandleEvent {
    /// A video-room event, possibly carrying a session description.
    Room {
        /// Parsed plugin payload.
        event: RoomEvent,
        /// Attached offer/answer, when any.
        jsep: Option<Jsep>,
    },
    /// The PeerConnection behind this handle came up.
    WebRtcUp,
    /// The PeerConnection behind this handle was torn down gateway-side.
    Hangup {
        /// Gateway-supplied reason.
        reason: Option<String>,
    },
    /// The handle was detached gateway-side.
    Detached,
}

/// One attached gateway plugin handle.
///
/// A handle exposes awaitable request/reply exchanges plus a stream of
/// unsolicited events, replacing the gateway's callback surface. Handles
/// are registered with their owning connection and detached at most
/// once; the connection's `destroy` detaches whatever is still attached,
/// in reverse attach order.
pub struct PluginHandle {
    id: u64,
    session_id: u64,
    plugin: String,
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<HandleEvent>>,
    timeout: Duration,
    detached: AtomicBool,
}

impl PluginHandle {
    pub(crate) fn new(
        id: u64,
        session_id: u64,
        plugin: String,
        tx: mpsc::UnboundedSender<Message>,
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<HandleEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            session_id,
            plugin,
            tx,
            shared,
            events: tokio::sync::Mutex::new(events),
            timeout,
            detached: AtomicBool::new(false),
        }
    }

    /// Gateway-issued handle id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Plugin this handle is attached to.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Whether the handle has been detached.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Next unsolicited event for this handle. `None` once the
    /// connection is gone.
    pub async fn next_event(&self) -> Option<HandleEvent> {
        self.events.lock().await.recv().await
    }

    /// Send a plugin request and await the correlated reply.
    pub async fn request(&self, body: &RoomRequest) -> Result<Envelope> {
        self.message(body, None).await
    }

    /// Send a plugin request carrying a session description and await
    /// the correlated reply.
    pub async fn request_with_jsep(&self, body: &RoomRequest, jsep: Jsep) -> Result<Envelope> {
        self.message(body, Some(jsep)).await
    }

    async fn message(&self, body: &RoomRequest, jsep: Option<Jsep>) -> Result<Envelope> {
        if self.is_detached() {
            return Err(Error::Gateway("handle already detached".to_string()));
        }

        let transaction = Uuid::new_v4().to_string();
        let mut payload = json!({
            "janus": "message",
            "session_id": self.session_id,
            "handle_id": self.id,
            "transaction": transaction,
            "body": serde_json::to_value(body)?,
        });
        if let Some(jsep) = jsep {
            payload["jsep"] = serde_json::to_value(&jsep)?;
        }

        let reply = roundtrip(&self.shared, &self.tx, payload, transaction, self.timeout).await?;

        // Plugin-level rejections arrive as regular events.
        if let Some(event) = reply.room_event() {
            if let Some((code, reason)) = event.error() {
                return Err(Error::Gateway(format!("plugin error {code}: {reason}")));
            }
        }

        Ok(reply)
    }

    /// Detach this handle from the gateway. Idempotent; the handle is
    /// unregistered locally even when the gateway round trip fails.
    pub async fn detach(&self) -> Result<()> {
        if self.detached.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.unregister_handle(self.id);
        debug!(handle = self.id, "detaching plugin handle");

        let transaction = Uuid::new_v4().to_string();
        let payload = json!({
            "janus": "detach",
            "session_id": self.session_id,
            "handle_id": self.id,
            "transaction": transaction,
        });
        roundtrip(&self.shared, &self.tx, payload, transaction, self.timeout)
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .field("detached", &self.is_detached())
            .finish()
    }
}
