//! Room-scoped chat.
//!
//! Chat rides the same push-channel and room-id model as the session
//! itself: messages arrive on a per-room push stream, sends go through
//! the control plane. Nothing is persisted here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{ControlApi, PushChannel, PushEvent, PushSubscription, PushTopic};
use crate::Result;

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Room the message belongs to.
    pub room_id: u64,
    /// Sender display name (role marker included).
    pub sender: String,
    /// Message body.
    pub body: String,
    /// Server receive time, milliseconds since the epoch.
    #[serde(default)]
    pub sent_at: Option<u64>,
}

/// Send/receive access to one room's chat.
pub struct ChatChannel {
    room_id: u64,
    sender: String,
    api: Arc<dyn ControlApi>,
    subscription: PushSubscription,
}

impl ChatChannel {
    /// Open the chat stream for a room.
    pub async fn open(
        room_id: u64,
        sender: impl Into<String>,
        api: Arc<dyn ControlApi>,
        push: &dyn PushChannel,
    ) -> Result<Self> {
        let subscription = push.subscribe(PushTopic::Room(room_id)).await?;
        Ok(Self {
            room_id,
            sender: sender.into(),
            api,
            subscription,
        })
    }

    /// Room this channel is bound to.
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Send a message into the room.
    pub async fn send(&self, body: &str) -> Result<()> {
        self.api.send_chat(self.room_id, &self.sender, body).await
    }

    /// Next chat message. Heartbeats are skipped; `None` once the
    /// stream ends or the session is terminated.
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        loop {
            match self.subscription.next().await? {
                PushEvent::Chat(message) => return Some(message),
                PushEvent::SessionEnded => return None,
                PushEvent::Ping | PushEvent::Other { .. } => continue,
            }
        }
    }

    /// Close the chat stream. Idempotent.
    pub fn close(&mut self) {
        self.subscription.close();
    }
}
