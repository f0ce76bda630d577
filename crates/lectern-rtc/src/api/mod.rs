//! Control plane and server-push interfaces.
//!
//! The REST side authorizes sessions and records lifecycle facts; the
//! push side is a one-way event stream per topic. Both sit behind
//! traits so the lifecycle controller can be exercised without a
//! network.

pub mod push;
pub mod rest;

pub use push::{PushChannel, PushEvent, PushSubscription, PushTopic, SsePushChannel};
pub use rest::{ControlApi, RecordingResult, RecordingStatus, RestApi};
