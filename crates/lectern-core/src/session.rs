//! Session identity: role, bootstrap result, display-name conventions.

use serde::{Deserialize, Serialize};

/// Marker prefixed to a mentor's display name on the gateway roster.
///
/// The gateway has no native role field, so the remote side infers roles
/// from this display-name convention. Both ends rely on it; changing the
/// marker is a protocol break.
pub const MENTOR_MARKER: &str = "[MENTOR]";

/// Marker prefixed to a mentee's display name on the gateway roster.
pub const MENTEE_MARKER: &str = "[MENTEE]";

/// Participant role within a lecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Publishes camera/screen media into the room.
    Mentor,
    /// Receives the mentor's media; publishes nothing.
    Mentee,
}

impl Role {
    /// The display-name marker for this role.
    pub fn marker(&self) -> &'static str {
        match self {
            Role::Mentor => MENTOR_MARKER,
            Role::Mentee => MENTEE_MARKER,
        }
    }

    /// Build the roster display name for `name` under this role.
    pub fn tag_display(&self, name: &str) -> String {
        format!("{} {}", self.marker(), name)
    }

    /// Infer the role encoded in a roster display name, if any.
    pub fn from_display(display: &str) -> Option<Role> {
        let display = display.trim_start();
        if display.starts_with(MENTOR_MARKER) {
            Some(Role::Mentor)
        } else if display.starts_with(MENTEE_MARKER) {
            Some(Role::Mentee)
        } else {
            None
        }
    }

    /// Strip a leading role marker from a display name.
    pub fn strip_marker(display: &str) -> &str {
        let display = display.trim_start();
        for marker in [MENTOR_MARKER, MENTEE_MARKER] {
            if let Some(rest) = display.strip_prefix(marker) {
                return rest.trim_start();
            }
        }
        display
    }
}

/// Identifier of the lecture being joined, as known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureRef {
    /// Control-plane lecture id.
    pub lecture_id: String,
    /// Role the caller expects to hold. The bootstrap response is
    /// authoritative; this only decides whether local media is acquired
    /// before bootstrap.
    pub role: Role,
}

impl LectureRef {
    /// Reference a lecture as its mentor.
    pub fn mentor(lecture_id: impl Into<String>) -> Self {
        Self {
            lecture_id: lecture_id.into(),
            role: Role::Mentor,
        }
    }

    /// Reference a lecture as a mentee.
    pub fn mentee(lecture_id: impl Into<String>) -> Self {
        Self {
            lecture_id: lecture_id.into(),
            role: Role::Mentee,
        }
    }
}

/// Everything the control plane hands back when a session is authorized.
///
/// Immutable for the lifetime of the session; dropped on leave/end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Control-plane session id, also the push-channel topic key.
    pub session_id: String,
    /// Gateway room this session takes place in.
    pub room_id: u64,
    /// WebSocket URL of the media gateway.
    pub gateway_url: String,
    /// Authoritative role for this participant.
    pub role: Role,
    /// Untagged display name of this participant.
    pub display_name: String,
    /// Display name of the lecture's mentor, when known. Used as the
    /// resolution hint for mentee subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentor_display_name: Option<String>,
}

impl SessionInfo {
    /// Roster display name for this participant (role marker applied).
    pub fn tagged_display(&self) -> String {
        self.role.tag_display(&self.display_name)
    }

    /// Roster display name the mentor is expected to appear under.
    pub fn mentor_tagged_display(&self) -> Option<String> {
        self.mentor_display_name
            .as_deref()
            .map(|name| Role::Mentor.tag_display(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_through_display() {
        let display = Role::Mentor.tag_display("Kim");
        assert_eq!(display, "[MENTOR] Kim");
        assert_eq!(Role::from_display(&display), Some(Role::Mentor));
        assert_eq!(Role::strip_marker(&display), "Kim");
    }

    #[test]
    fn test_unmarked_display_has_no_role() {
        assert_eq!(Role::from_display("Kim"), None);
        assert_eq!(Role::strip_marker("Kim"), "Kim");
    }

    #[test]
    fn test_session_info_deserializes_camel_case() {
        let info: SessionInfo = serde_json::from_str(
            r#"{
                "sessionId": "s-1",
                "roomId": 42,
                "gatewayUrl": "wss://gw.example/ws",
                "role": "MENTOR",
                "displayName": "Kim"
            }"#,
        )
        .unwrap();
        assert_eq!(info.room_id, 42);
        assert_eq!(info.role, Role::Mentor);
        assert_eq!(info.mentor_display_name, None);
        assert_eq!(info.tagged_display(), "[MENTOR] Kim");
    }
}
