//! Server-push channel: one SSE stream per topic.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chat::ChatMessage;
use crate::config::EngineConfig;
use crate::{Error, Result};

/// Named events delivered on a push stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The session was terminated server-side; the sole trigger for
    /// remote-initiated teardown.
    SessionEnded,
    /// Liveness heartbeat; must be ignored.
    Ping,
    /// A room chat message.
    Chat(ChatMessage),
    /// An event this engine version does not know.
    Other {
        /// Event name as sent by the server.
        event: String,
    },
}

/// A push-stream topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushTopic {
    /// Lifecycle events of one session.
    Session(String),
    /// Chat of one room.
    Room(u64),
}

impl PushTopic {
    /// Endpoint path for this topic.
    pub fn path(&self) -> String {
        match self {
            PushTopic::Session(id) => format!("/sessions/{id}/events"),
            PushTopic::Room(id) => format!("/rooms/{id}/chat/events"),
        }
    }
}

/// An open push subscription.
///
/// Holds the background reader task; `close` (or drop) cancels it.
/// This and the roster poll timer are the only persistent handles a
/// session needs to cancel explicitly.
pub struct PushSubscription {
    rx: mpsc::UnboundedReceiver<PushEvent>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PushSubscription {
    /// Assemble a subscription from its parts. `task` is the reader
    /// feeding `rx`, when one exists.
    pub fn from_parts(
        rx: mpsc::UnboundedReceiver<PushEvent>,
        task: Option<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self { rx, task }
    }

    /// Next event; `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    /// Cancel the subscription. Idempotent.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Source of push subscriptions.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a subscription for a topic.
    async fn subscribe(&self, topic: PushTopic) -> Result<PushSubscription>;
}

/// SSE implementation of [`PushChannel`] over the control plane.
pub struct SsePushChannel {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl SsePushChannel {
    /// Build a push channel from the engine configuration.
    ///
    /// The underlying client carries no overall timeout: SSE streams
    /// are expected to stay open for the whole session.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Bootstrap(format!("failed to create SSE client: {e}")))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }
}

#[async_trait]
impl PushChannel for SsePushChannel {
    async fn subscribe(&self, topic: PushTopic) -> Result<PushSubscription> {
        let url = format!("{}{}", self.base_url, topic.path());
        let mut request = self.client.get(&url).header("accept", "text/event-stream");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Bootstrap(format!("push subscribe failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Bootstrap(format!("push subscribe rejected: {e}")))?;

        debug!(%url, "push subscription open");

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut event_name: Option<String> = None;
            let mut data = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("push stream error: {e}");
                        break;
                    }
                };
                let Ok(text) = std::str::from_utf8(&chunk) else {
                    continue;
                };
                buffer.push_str(text);

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    if line.is_empty() {
                        if event_name.is_some() || !data.is_empty() {
                            let event =
                                parse_event(event_name.take(), std::mem::take(&mut data));
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                    } else if let Some(name) = line.strip_prefix("event:") {
                        event_name = Some(name.trim().to_string());
                    } else if let Some(payload) = line.strip_prefix("data:") {
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(payload.trim_start());
                    }
                    // comment lines (":...") and unknown fields are skipped
                }
            }
            debug!("push stream closed");
        });

        Ok(PushSubscription::from_parts(rx, Some(task)))
    }
}

fn parse_event(name: Option<String>, data: String) -> PushEvent {
    match name.as_deref() {
        Some("SESSION_ENDED") => PushEvent::SessionEnded,
        Some("ping") | None => PushEvent::Ping,
        Some("chat") => match serde_json::from_str::<ChatMessage>(&data) {
            Ok(message) => PushEvent::Chat(message),
            Err(e) => {
                warn!("unparseable chat payload: {e}");
                PushEvent::Other {
                    event: "chat".to_string(),
                }
            }
        },
        Some(other) => PushEvent::Other {
            event: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_paths() {
        assert_eq!(
            PushTopic::Session("s-1".into()).path(),
            "/sessions/s-1/events"
        );
        assert_eq!(PushTopic::Room(42).path(), "/rooms/42/chat/events");
    }

    #[test]
    fn test_event_parsing() {
        assert_eq!(
            parse_event(Some("SESSION_ENDED".into()), String::new()),
            PushEvent::SessionEnded
        );
        assert_eq!(parse_event(Some("ping".into()), String::new()), PushEvent::Ping);
        assert_eq!(
            parse_event(Some("resize".into()), String::new()),
            PushEvent::Other {
                event: "resize".to_string()
            }
        );
    }

    #[test]
    fn test_chat_event_parses_payload() {
        let data = r#"{"roomId": 42, "sender": "[MENTEE] Lee", "body": "hello"}"#;
        match parse_event(Some("chat".into()), data.to_string()) {
            PushEvent::Chat(message) => {
                assert_eq!(message.room_id, 42);
                assert_eq!(message.body, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subscription_close_is_idempotent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = PushSubscription::from_parts(rx, None);
        tx.send(PushEvent::Ping).unwrap();
        assert_eq!(sub.next().await, Some(PushEvent::Ping));
        sub.close();
        sub.close();
    }
}
