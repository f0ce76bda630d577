//! Error types for the lecture session engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the lecture session engine.
///
/// The variants follow the failure taxonomy of the session lifecycle:
/// the first two are fatal to `start` and roll back every partially
/// acquired resource, the rest abort only the transition that raised
/// them and leave the session in its last good state.
#[derive(Debug, Error)]
pub enum Error {
    /// Control-plane bootstrap/join failed before a session existed.
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    /// The signaling gateway could not be reached.
    #[error("Gateway connection failed: {0}")]
    GatewayConnect(String),

    /// The gateway rejected a request or returned a protocol error.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Device or screen capture refused by the user/OS.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An offer/answer exchange was rejected.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Local capture failed for a reason other than permissions.
    #[error("Capture error: {0}")]
    Capture(String),

    /// An operation was invoked in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An in-flight start sequence was interrupted by teardown.
    #[error("Session torn down while the operation was in flight")]
    Cancelled,

    /// HTTP transport error from the control plane.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebRTC stack error.
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Non-technical message suitable for direct display to the user.
    ///
    /// Transport- and negotiation-level details stay in the `Display`
    /// impl and the logs; this is what the UI shows.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::Bootstrap(_) | Error::Http(_) => {
                "Could not join the lecture. Please check your connection and try again."
            }
            Error::GatewayConnect(_) => {
                "Could not reach the video service. Please try again in a moment."
            }
            Error::Gateway(_) | Error::Negotiation(_) | Error::WebRtc(_) => {
                "The video connection ran into a problem. Your session is still active."
            }
            Error::PermissionDenied(_) => {
                "Camera, microphone, or screen access was denied."
            }
            Error::Capture(_) => "The selected device could not be opened.",
            Error::InvalidState(_) | Error::Cancelled | Error::Serialization(_) => {
                "The requested action is not available right now."
            }
        }
    }

    /// Whether this error aborts session startup entirely (as opposed to
    /// a single transition).
    pub fn is_fatal_to_start(&self) -> bool {
        matches!(
            self,
            Error::Bootstrap(_) | Error::GatewayConnect(_) | Error::Http(_) | Error::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_are_non_technical() {
        let err = Error::Negotiation("SDP m-line mismatch in answer".into());
        assert!(!err.user_message().contains("SDP"));
        let err = Error::Bootstrap("HTTP 503 Service Unavailable".into());
        assert!(!err.user_message().contains("503"));
    }

    #[test]
    fn test_fatality_classification() {
        assert!(Error::Bootstrap("x".into()).is_fatal_to_start());
        assert!(Error::GatewayConnect("x".into()).is_fatal_to_start());
        assert!(!Error::PermissionDenied("x".into()).is_fatal_to_start());
        assert!(!Error::Negotiation("x".into()).is_fatal_to_start());
    }
}
