//! Roster synchronization: periodic polling plus gateway events.
//!
//! The gateway's event push is not guaranteed to deliver every roster
//! change promptly, so a periodic participant-list request runs next to
//! it. Both producers feed the same reconciliation function, and any
//! pushed change forces an immediate re-poll.

use std::sync::Arc;
use std::time::Duration;

use lectern_core::{Roster, RosterUpdate};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::events::{emit, EventSender, SessionEvent};
use crate::gateway::{PluginHandle, RoomEvent, RoomRequest};

struct PollerShared {
    room: u64,
    handle: Arc<PluginHandle>,
    roster: Mutex<Roster>,
    revision: watch::Sender<u64>,
    events: EventSender,
    poke: Notify,
}

impl PollerShared {
    /// The one reconciliation path for both producers. Holds the roster
    /// lock across the whole update so no two changes interleave.
    fn apply(&self, update: RosterUpdate) -> bool {
        let (changed, participants) = {
            let mut roster = self.roster.lock();
            let changed = roster.apply(update);
            (changed, roster.to_vec())
        };
        if changed {
            self.revision.send_modify(|rev| *rev += 1);
            emit(&self.events, SessionEvent::RosterUpdated { participants });
        }
        changed
    }

    async fn poll_once(&self) {
        let request = RoomRequest::ListParticipants { room: self.room };
        match self.handle.request(&request).await {
            Ok(reply) => {
                if let Some(update) = reply.room_event().and_then(|e| e.as_roster_update()) {
                    self.apply(update);
                } else {
                    warn!(room = self.room, "participant list reply had no roster");
                }
            }
            Err(e) => warn!(room = self.room, "roster poll failed: {e}"),
        }
    }
}

/// Keeps one room's roster in sync.
pub struct RosterPoller {
    shared: Arc<PollerShared>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RosterPoller {
    /// Poller for a room, using `handle` for the list requests.
    pub fn new(room: u64, handle: Arc<PluginHandle>, events: EventSender) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(PollerShared {
                room,
                handle,
                roster: Mutex::new(Roster::new()),
                revision,
                events,
                poke: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Snapshot of the current roster.
    pub fn roster(&self) -> Roster {
        self.shared.roster.lock().clone()
    }

    /// Watch that ticks on every roster change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Apply an update known before polling starts (join replies carry
    /// the initial publisher list).
    pub fn seed(&self, update: RosterUpdate) {
        self.shared.apply(update);
    }

    /// Fold a gateway room event into the roster. Pushed changes force
    /// an immediate re-poll: the push stream alone has been observed to
    /// lag behind publish/leave.
    pub fn apply_room_event(&self, event: &RoomEvent) {
        if let Some(update) = event.as_roster_update() {
            self.shared.apply(update);
            self.shared.poke.notify_one();
        }
    }

    /// Start periodic polling. A second call while running is a no-op.
    pub fn start(&self, interval: Duration) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(async move {
            debug!(room = shared.room, "roster poller started");
            loop {
                shared.poll_once().await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shared.poke.notified() => {}
                }
            }
        }));
    }

    /// Stop polling. Safe when polling was never started, and safe to
    /// call repeatedly.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!(room = self.shared.room, "roster poller stopped");
        }
    }
}

impl Drop for RosterPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
