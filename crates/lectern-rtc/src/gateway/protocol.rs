//! Wire types for the signaling gateway.
//!
//! The gateway speaks a Janus-compatible dialect: a small envelope keyed
//! by `janus`, transaction-correlated replies, and a video-room plugin
//! whose bodies are tagged by `request`. These types are consumed, not
//! owned: field names and markers here must match the gateway verbatim.

use lectern_core::{FeedId, Participant, RosterUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebSocket subprotocol the gateway requires.
pub const GATEWAY_SUBPROTOCOL: &str = "janus-protocol";

/// Plugin identifier of the video room.
pub const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

/// An SDP offer or answer attached to a gateway message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    /// "offer" or "answer".
    #[serde(rename = "type")]
    pub kind: String,
    /// The session description.
    pub sdp: String,
}

impl Jsep {
    /// Wrap an SDP offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    /// Wrap an SDP answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }

    /// Whether this description is an offer.
    pub fn is_offer(&self) -> bool {
        self.kind == "offer"
    }
}

/// Role a handle joins the room under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantType {
    /// Sends media into the room.
    Publisher,
    /// Receives one publisher's media.
    Subscriber,
}

/// Requests understood by the video-room plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "request")]
pub enum RoomRequest {
    /// Join a room as publisher (with a display name) or as subscriber
    /// (against a specific feed).
    #[serde(rename = "join")]
    Join {
        /// Room to join.
        room: u64,
        /// Join role.
        ptype: ParticipantType,
        /// Display name, publisher joins only.
        #[serde(skip_serializing_if = "Option::is_none")]
        display: Option<String>,
        /// Target feed, subscriber joins only.
        #[serde(skip_serializing_if = "Option::is_none")]
        feed: Option<u64>,
    },

    /// Reconfigure what is being relayed; carries the offer on
    /// (re)negotiation.
    #[serde(rename = "configure")]
    Configure {
        /// Relay audio.
        audio: bool,
        /// Relay video.
        video: bool,
    },

    /// Publish media (first offer).
    #[serde(rename = "publish")]
    Publish {
        /// Relay audio.
        audio: bool,
        /// Relay video.
        video: bool,
    },

    /// Stop publishing while staying in the room.
    #[serde(rename = "unpublish")]
    Unpublish,

    /// Acknowledge a subscriber offer; carries the answer.
    #[serde(rename = "start")]
    Start,

    /// List current room participants.
    #[serde(rename = "listparticipants")]
    ListParticipants {
        /// Room to list.
        room: u64,
    },

    /// Leave the room.
    #[serde(rename = "leave")]
    Leave,
}

/// A publisher entry carried on join responses and room events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublisherEntry {
    /// Feed id of the publisher.
    pub id: u64,
    /// Display name, when announced.
    #[serde(default)]
    pub display: Option<String>,
}

/// A participant entry from a `listparticipants` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParticipantEntry {
    /// Feed id.
    pub id: u64,
    /// Display name, when announced.
    #[serde(default)]
    pub display: Option<String>,
    /// Whether the participant is actively publishing.
    #[serde(default)]
    pub publisher: Option<bool>,
}

/// `leaving`/`unpublished` fields carry either the feed id of another
/// participant or the literal `"ok"` when the notice is about ourselves.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeedNotice {
    /// Another participant's feed.
    Feed(u64),
    /// Acknowledgement of our own leave/unpublish ("ok").
    Ack(String),
}

impl FeedNotice {
    /// The remote feed id this notice refers to, if any.
    pub fn feed_id(&self) -> Option<FeedId> {
        match self {
            FeedNotice::Feed(id) => Some(FeedId(*id)),
            FeedNotice::Ack(_) => None,
        }
    }
}

/// Events and replies produced by the video-room plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "videoroom")]
pub enum RoomEvent {
    /// Publisher-side join succeeded.
    #[serde(rename = "joined")]
    Joined {
        /// Our own feed id in the room.
        id: u64,
        /// Room joined.
        room: u64,
        /// Publishers already active in the room.
        #[serde(default)]
        publishers: Vec<PublisherEntry>,
    },

    /// Subscriber-side join succeeded; the envelope carries the offer.
    #[serde(rename = "attached")]
    Attached {
        /// Feed subscribed to.
        id: u64,
        /// Publisher's display name.
        #[serde(default)]
        display: Option<String>,
    },

    /// `listparticipants` reply.
    #[serde(rename = "participants")]
    Participants {
        /// Room listed.
        room: u64,
        /// Current participants.
        participants: Vec<ParticipantEntry>,
    },

    /// Asynchronous room event: publish/leave/unpublish notices,
    /// configure/start confirmations.
    #[serde(rename = "event")]
    Event {
        /// Newly publishing participants.
        #[serde(default)]
        publishers: Vec<PublisherEntry>,
        /// A participant is leaving.
        #[serde(default)]
        leaving: Option<FeedNotice>,
        /// A feed stopped publishing.
        #[serde(default)]
        unpublished: Option<FeedNotice>,
        /// Configure confirmation ("ok").
        #[serde(default)]
        configured: Option<String>,
        /// Start confirmation ("ok").
        #[serde(default)]
        started: Option<String>,
        /// Plugin-level error description.
        #[serde(default)]
        error: Option<String>,
        /// Plugin-level error code.
        #[serde(default)]
        error_code: Option<i64>,
    },

    /// The room was destroyed on the gateway.
    #[serde(rename = "destroyed")]
    Destroyed {
        /// Room destroyed.
        room: u64,
    },
}

impl RoomEvent {
    /// The roster change this event implies, if any.
    pub fn as_roster_update(&self) -> Option<RosterUpdate> {
        match self {
            RoomEvent::Joined { publishers, .. } => {
                Some(RosterUpdate::Joined(entries_to_participants(publishers)))
            }
            RoomEvent::Participants { participants, .. } => Some(RosterUpdate::Snapshot(
                participants
                    .iter()
                    .map(|p| {
                        Participant::new(p.id, p.display.clone().unwrap_or_default())
                    })
                    .collect(),
            )),
            RoomEvent::Event {
                publishers,
                leaving,
                unpublished,
                ..
            } => {
                if let Some(feed) = leaving.as_ref().and_then(FeedNotice::feed_id) {
                    return Some(RosterUpdate::Left(feed));
                }
                if let Some(feed) = unpublished.as_ref().and_then(FeedNotice::feed_id) {
                    return Some(RosterUpdate::Unpublished(feed));
                }
                if !publishers.is_empty() {
                    return Some(RosterUpdate::Joined(entries_to_participants(publishers)));
                }
                None
            }
            _ => None,
        }
    }

    /// Plugin-level error carried by this event, if any.
    pub fn error(&self) -> Option<(i64, &str)> {
        match self {
            RoomEvent::Event {
                error: Some(reason),
                error_code,
                ..
            } => Some((error_code.unwrap_or(0), reason.as_str())),
            _ => None,
        }
    }
}

fn entries_to_participants(entries: &[PublisherEntry]) -> Vec<Participant> {
    entries
        .iter()
        .map(|p| Participant::new(p.id, p.display.clone().unwrap_or_default()))
        .collect()
}

/// Gateway-level error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable reason.
    pub reason: String,
}

/// Plugin data wrapper on event envelopes.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginData {
    /// Plugin that produced the data.
    pub plugin: String,
    /// Plugin-specific payload.
    pub data: Value,
}

/// Inbound gateway envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Message kind: success/ack/event/error, plus connection-level
    /// notices (webrtcup, hangup, detached, timeout).
    #[serde(rename = "janus")]
    pub kind: String,
    /// Transaction this message replies to, when any.
    #[serde(default)]
    pub transaction: Option<String>,
    /// Gateway session the message belongs to.
    #[serde(default)]
    pub session_id: Option<u64>,
    /// Handle that produced an event.
    #[serde(default)]
    pub sender: Option<u64>,
    /// Payload of `success` replies.
    #[serde(default)]
    pub data: Option<Value>,
    /// Plugin payload of events.
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    /// Attached session description.
    #[serde(default)]
    pub jsep: Option<Jsep>,
    /// Error payload of `error` replies.
    #[serde(default)]
    pub error: Option<GatewayError>,
    /// Reason attached to `hangup` notices.
    #[serde(default)]
    pub reason: Option<String>,
}

impl Envelope {
    /// The id carried in a `success` reply's `data` payload
    /// (session/handle creation).
    pub fn data_id(&self) -> Option<u64> {
        self.data.as_ref()?.get("id")?.as_u64()
    }

    /// Parse the plugin payload as a room event.
    pub fn room_event(&self) -> Option<RoomEvent> {
        let data = self.plugindata.as_ref()?.data.clone();
        serde_json::from_value(data).ok()
    }
}
