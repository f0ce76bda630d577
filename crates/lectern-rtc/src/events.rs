//! Engine events delivered to the embedding UI.
//!
//! The engine never calls back into the UI directly; every observable
//! change flows over one `mpsc` channel as a [`SessionEvent`], so the
//! UI layer consumes a single stream regardless of which component the
//! change originated in.

use lectern_core::{FeedId, Participant};
use tokio::sync::mpsc;
use tracing::warn;

use crate::api::RecordingResult;
use crate::publisher::PublisherState;

/// Events emitted by the session engine.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The room roster changed.
    RosterUpdated {
        /// Current participants in feed-id order.
        participants: Vec<Participant>,
    },

    /// The publisher state machine advanced.
    PublisherStateChanged {
        /// New state.
        state: PublisherState,
    },

    /// The mentee's subscription target changed.
    SubscriptionChanged {
        /// Feed now bound, or `None` after an unsubscribe.
        feed: Option<FeedId>,
    },

    /// Screen sharing stopped, either by request or by the platform's
    /// own stop control.
    ScreenShareEnded,

    /// Transport-level connection state of a peer connection changed.
    ConnectionStateChanged {
        /// State name as reported by the WebRTC stack.
        state: String,
    },

    /// The session was terminated remotely. Carries the recording
    /// lookup result when the fetch succeeded.
    SessionEnded {
        /// Recording status/url, if it could be fetched.
        recording: Option<RecordingResult>,
    },

    /// A recoverable fault translated to a user-facing message.
    Fault {
        /// Non-technical description for direct display.
        message: String,
    },
}

impl SessionEvent {
    /// Event name for logging/debugging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RosterUpdated { .. } => "roster_updated",
            Self::PublisherStateChanged { .. } => "publisher_state_changed",
            Self::SubscriptionChanged { .. } => "subscription_changed",
            Self::ScreenShareEnded => "screen_share_ended",
            Self::ConnectionStateChanged { .. } => "connection_state_changed",
            Self::SessionEnded { .. } => "session_ended",
            Self::Fault { .. } => "fault",
        }
    }
}

/// Sender half of the engine event stream.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Emit an event, tolerating a UI that has stopped listening.
pub(crate) fn emit(tx: &EventSender, event: SessionEvent) {
    if tx.send(event).is_err() {
        warn!("event receiver dropped; engine event discarded");
    }
}
