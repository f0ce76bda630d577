//! REST control-plane client.

use async_trait::async_trait;
use lectern_core::SessionInfo;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::{Error, Result};

/// Recording pipeline status at session end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    /// Still being assembled.
    Pending,
    /// Playable; `url` is set.
    Ready,
}

/// Result of the recording lookup performed on termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    /// Pipeline status.
    pub status: RecordingStatus,
    /// Playback URL once ready.
    #[serde(default)]
    pub url: Option<String>,
}

/// Operations the session engine needs from the control plane.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Authorize and bootstrap a session for a lecture.
    async fn bootstrap(&self, lecture_id: &str) -> Result<SessionInfo>;

    /// Fallback join request, same response shape as bootstrap.
    async fn join(&self, lecture_id: &str) -> Result<SessionInfo>;

    /// Authoritatively end a session (mentor only).
    async fn end(&self, session_id: &str) -> Result<()>;

    /// Fetch the recording status/url for a session.
    async fn recording(&self, session_id: &str) -> Result<RecordingResult>;

    /// Send a chat message into a room.
    async fn send_chat(&self, room_id: u64, sender: &str, body: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LectureRequest<'a> {
    lecture_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatSendRequest<'a> {
    sender: &'a str,
    body: &'a str,
}

/// HTTP implementation of [`ControlApi`].
pub struct RestApi {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl RestApi {
    /// Build a client from the engine configuration.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let base_url = config.api_base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Bootstrap(format!(
                "api_base_url must start with http:// or https://, got: {base_url}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Error::Bootstrap(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.post(format!("{}{path}", self.base_url));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(format!("{}{path}", self.base_url));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    /// POST that maps any non-2xx onto a bootstrap failure with the
    /// status line, so the caller can decide on the join fallback.
    async fn session_request(&self, path: &str, lecture_id: &str) -> Result<SessionInfo> {
        let response = self
            .post(path)
            .json(&LectureRequest { lecture_id })
            .send()
            .await
            .map_err(|e| Error::Bootstrap(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Bootstrap(format!(
                "HTTP {} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                body
            )));
        }

        let info: SessionInfo = response
            .json()
            .await
            .map_err(|e| Error::Bootstrap(format!("invalid bootstrap response: {e}")))?;

        debug!(session = %info.session_id, room = info.room_id, "session bootstrapped");
        Ok(info)
    }
}

#[async_trait]
impl ControlApi for RestApi {
    async fn bootstrap(&self, lecture_id: &str) -> Result<SessionInfo> {
        self.session_request("/lectures/bootstrap", lecture_id).await
    }

    async fn join(&self, lecture_id: &str) -> Result<SessionInfo> {
        self.session_request("/lectures/join", lecture_id).await
    }

    async fn end(&self, session_id: &str) -> Result<()> {
        self.post("/lectures/end")
            .json(&EndRequest { session_id })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn recording(&self, session_id: &str) -> Result<RecordingResult> {
        let result = self
            .get("/lectures/recording")
            .query(&[("sessionId", session_id)])
            .send()
            .await?
            .error_for_status()?
            .json::<RecordingResult>()
            .await?;
        Ok(result)
    }

    async fn send_chat(&self, room_id: u64, sender: &str, body: &str) -> Result<()> {
        self.post(&format!("/rooms/{room_id}/chat"))
            .json(&ChatSendRequest { sender, body })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
