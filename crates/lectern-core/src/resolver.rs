//! Deterministic selection of the feed a subscriber binds to.

use crate::roster::{FeedId, Roster};

/// Pick the feed a subscriber should bind to.
///
/// Preference order, which the remote side relies on and must not change:
///
/// 1. the roster entry whose display name equals `hint` (the mentor's
///    tagged display name, when the session context knows it);
/// 2. the first entry (lowest feed id) whose display name differs from
///    `self_display`;
/// 3. `None` when the roster is empty or only contains the caller.
///
/// `None` means "not yet resolvable": callers retry on the next roster
/// update rather than treating it as an error.
pub fn resolve(roster: &Roster, self_display: &str, hint: Option<&str>) -> Option<FeedId> {
    if let Some(hint) = hint {
        if let Some(p) = roster.iter().find(|p| p.display == hint) {
            return Some(p.feed_id);
        }
    }
    roster
        .iter()
        .find(|p| p.display != self_display)
        .map(|p| p.feed_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{Participant, RosterUpdate};

    fn roster_of(entries: &[(u64, &str)]) -> Roster {
        let mut roster = Roster::new();
        roster.apply(RosterUpdate::Snapshot(
            entries
                .iter()
                .map(|(id, d)| Participant::new(*id, *d))
                .collect(),
        ));
        roster
    }

    #[test]
    fn test_empty_roster_resolves_to_none() {
        let roster = Roster::new();
        assert_eq!(resolve(&roster, "[MENTEE] Park", None), None);
    }

    #[test]
    fn test_self_only_roster_resolves_to_none() {
        let roster = roster_of(&[(5, "[MENTEE] Park")]);
        assert_eq!(resolve(&roster, "[MENTEE] Park", None), None);
    }

    #[test]
    fn test_hint_takes_precedence() {
        let roster = roster_of(&[(3, "[MENTEE] Choi"), (7, "[MENTOR] Kim")]);
        assert_eq!(
            resolve(&roster, "[MENTEE] Park", Some("[MENTOR] Kim")),
            Some(FeedId(7))
        );
    }

    #[test]
    fn test_missing_hint_falls_back_to_first_other() {
        let roster = roster_of(&[(3, "[MENTEE] Choi"), (7, "[MENTOR] Kim")]);
        assert_eq!(
            resolve(&roster, "[MENTEE] Park", Some("[MENTOR] Gone")),
            Some(FeedId(3))
        );
    }

    #[test]
    fn test_fallback_skips_own_display() {
        let roster = roster_of(&[(2, "[MENTEE] Park"), (7, "[MENTOR] Kim")]);
        assert_eq!(resolve(&roster, "[MENTEE] Park", None), Some(FeedId(7)));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let roster = roster_of(&[(9, "[MENTEE] A"), (4, "[MENTEE] B"), (6, "[MENTEE] C")]);
        let first = resolve(&roster, "[MENTEE] Park", None);
        for _ in 0..10 {
            assert_eq!(resolve(&roster, "[MENTEE] Park", None), first);
        }
        assert_eq!(first, Some(FeedId(4)));
    }
}
