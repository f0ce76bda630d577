//! Room roster and its reconciliation.
//!
//! Two producers feed the roster: the periodic participant-list poll and
//! the gateway's own join/leave/publish/unpublish notices. Both are
//! expressed as [`RosterUpdate`]s applied through one reconciliation
//! function, so there is a single source of truth for "current roster".

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stable feed identifier issued by the gateway for one participant's
/// published media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub u64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for FeedId {
    fn from(id: u64) -> Self {
        FeedId(id)
    }
}

/// One entry of the room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Gateway feed id.
    pub feed_id: FeedId,
    /// Display name as published to the gateway (role marker included).
    pub display: String,
}

impl Participant {
    /// Create a roster entry.
    pub fn new(feed_id: impl Into<FeedId>, display: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            display: display.into(),
        }
    }
}

/// A change observed by one of the two roster producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterUpdate {
    /// Full participant list from a poll tick. Applied as a replacement:
    /// entries not present in the snapshot are dropped.
    Snapshot(Vec<Participant>),
    /// Participants announced by a gateway event (join/publish notices).
    /// Applied as a set union.
    Joined(Vec<Participant>),
    /// A participant left the room.
    Left(FeedId),
    /// A participant stopped publishing; its feed id is no longer valid.
    Unpublished(FeedId),
}

/// Current set of known participants, keyed by feed id.
///
/// Backed by a `BTreeMap` so iteration order is deterministic, which the
/// feed resolver's "first differing entry" fallback depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    entries: BTreeMap<FeedId, Participant>,
}

impl Roster {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update. Returns `true` when the roster changed, so
    /// callers can suppress no-op notifications; applying the same
    /// update twice is always a no-op the second time.
    pub fn apply(&mut self, update: RosterUpdate) -> bool {
        match update {
            RosterUpdate::Snapshot(participants) => {
                let next: BTreeMap<FeedId, Participant> = participants
                    .into_iter()
                    .map(|p| (p.feed_id, p))
                    .collect();
                if next == self.entries {
                    return false;
                }
                debug!(count = next.len(), "roster snapshot applied");
                self.entries = next;
                true
            }
            RosterUpdate::Joined(participants) => {
                let mut changed = false;
                for p in participants {
                    let replaced = self.entries.insert(p.feed_id, p.clone());
                    if replaced.as_ref() != Some(&p) {
                        debug!(feed = %p.feed_id, display = %p.display, "roster add");
                        changed = true;
                    }
                }
                changed
            }
            RosterUpdate::Left(feed_id) | RosterUpdate::Unpublished(feed_id) => {
                let removed = self.entries.remove(&feed_id).is_some();
                if removed {
                    debug!(feed = %feed_id, "roster remove");
                }
                removed
            }
        }
    }

    /// Whether a feed is currently present.
    pub fn contains(&self, feed_id: FeedId) -> bool {
        self.entries.contains_key(&feed_id)
    }

    /// Look up a participant.
    pub fn get(&self, feed_id: FeedId) -> Option<&Participant> {
        self.entries.get(&feed_id)
    }

    /// Number of known participants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Participants in feed-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.entries.values()
    }

    /// Owned participant list in feed-id order.
    pub fn to_vec(&self) -> Vec<Participant> {
        self.entries.values().cloned().collect()
    }
}
