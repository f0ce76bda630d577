//! Async client for the signaling gateway.
//!
//! The gateway exposes a callback-flavored, message-oriented surface
//! over one persistent WebSocket. This module normalizes it into
//! awaitable operations: transaction-correlated request/reply
//! exchanges, one event stream per attached plugin handle, and a
//! teardown path that is safe to run exactly once from any state.

pub mod client;
pub mod handle;
pub mod protocol;

pub use client::GatewayClient;
pub use handle::{HandleEvent, PluginHandle};
pub use protocol::{Jsep, ParticipantType, RoomEvent, RoomRequest, VIDEOROOM_PLUGIN};
