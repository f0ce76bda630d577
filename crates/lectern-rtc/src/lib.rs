//! Realtime lecture session engine.
//!
//! Client-side orchestration of a one-publisher/many-subscriber live
//! lecture between a mentor and mentees, on top of an external
//! selective-forwarding gateway. The UI above this crate is thin: it
//! provides device capture and a viewing surface, calls the controller,
//! and consumes one event stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  UI shell (capture + surfaces + event consumer)          │
//! │  ↓                                                       │
//! │  SessionController (lifecycle.rs)                        │
//! │  ├─ ControlApi / PushChannel   (api/: REST + SSE)        │
//! │  ├─ GatewayClient              (gateway/: WebSocket)     │
//! │  │   └─ PluginHandle per attach (LIFO teardown)          │
//! │  ├─ PublisherSession           (mentor: offer/configure) │
//! │  ├─ SubscriberSession          (mentee: answer/start)    │
//! │  ├─ RosterPoller + resolver    (poll ∪ events → roster)  │
//! │  └─ ChatChannel                (room-scoped push)        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lectern_core::LectureRef;
//! use lectern_rtc::{
//!     EngineConfig, RestApi, SessionController, SsePushChannel,
//! };
//!
//! let config = EngineConfig::new("https://api.example.com");
//! let api = Arc::new(RestApi::new(&config)?);
//! let push = Arc::new(SsePushChannel::new(&config)?);
//! let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! // `devices` and `surface` come from the platform shell
//! let controller = Arc::new(SessionController::new(
//!     config, api, push, devices, surface, events_tx,
//! ));
//!
//! let info = controller.start(LectureRef::mentor("lecture-1")).await?;
//! // ... consume events_rx, toggle media, eventually:
//! controller.leave().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod capture;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod lifecycle;
mod peer;
pub mod poller;
pub mod publisher;
pub mod subscriber;
pub mod surface;

pub use api::{
    ControlApi, PushChannel, PushEvent, PushSubscription, PushTopic, RecordingResult,
    RecordingStatus, RestApi, SsePushChannel,
};
pub use capture::{LocalStream, MediaDevices, MediaTrack, TrackKind};
pub use chat::{ChatChannel, ChatMessage};
pub use config::{EngineConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use events::{EventSender, SessionEvent};
pub use gateway::{GatewayClient, PluginHandle};
pub use lifecycle::SessionController;
pub use poller::RosterPoller;
pub use publisher::{PublisherSession, PublisherState};
pub use subscriber::SubscriberSession;
pub use surface::{MediaSurface, RemoteStream};

/// Version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
