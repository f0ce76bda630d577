//! Domain model for Lectern live lecture sessions.
//!
//! This crate holds the pure, I/O-free parts of the session engine: who a
//! participant is, what the room roster looks like, and which remote feed
//! a subscriber should bind to. The orchestration engine (`lectern-rtc`)
//! builds on these types; nothing here touches the network.
//!
//! The display-name role convention ([`session::MENTOR_MARKER`]) is an
//! external gateway-protocol limitation kept explicit at this boundary:
//! the gateway has no role field, so both ends of a lecture embed the
//! role in the published display name.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod resolver;
pub mod roster;
pub mod session;

pub use resolver::resolve;
pub use roster::{FeedId, Participant, Roster, RosterUpdate};
pub use session::{LectureRef, Role, SessionInfo};
