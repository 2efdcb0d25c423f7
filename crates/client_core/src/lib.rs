use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Project, ProjectId, Topic, TopicId, UserId},
    error::{ApiError, ApiException},
    protocol::{LiveSessionView, SessionAction, SessionCommandRequest},
};

mod poller;

pub use poller::{run_poller, should_advance, Countdown, PhaseBaseline, PollControl, PollerOptions};

/// HTTP client for the session endpoints of a presentation server.
///
/// Read-only calls work anonymously. Session commands need a controlling
/// user, set with [`SessionClient::with_user`].
#[derive(Debug, Clone)]
pub struct SessionClient {
    http: Client,
    server_url: String,
    user_id: Option<UserId>,
}

impl SessionClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url: String = server_url.into();
        Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn live(&self, topic_id: TopicId) -> Result<LiveSessionView> {
        let res = self
            .http
            .get(format!("{}/topics/{topic_id}/live", self.server_url))
            .send()
            .await?;
        decode(res).await
    }

    pub async fn list_projects(&self, topic_id: TopicId) -> Result<Vec<Project>> {
        let res = self
            .http
            .get(format!("{}/topics/{topic_id}/projects", self.server_url))
            .send()
            .await?;
        decode(res).await
    }

    pub async fn send_command(
        &self,
        topic_id: TopicId,
        request: &SessionCommandRequest,
    ) -> Result<Topic> {
        let user_id = self
            .user_id
            .ok_or_else(|| anyhow!("session commands need a controlling user_id"))?;
        let res = self
            .http
            .post(format!("{}/topics/{topic_id}/session", self.server_url))
            .query(&[("user_id", user_id.0)])
            .json(request)
            .send()
            .await?;
        decode(res).await
    }

    /// Ends the current phase. `project_hint` only matters when leaving a
    /// break; the server still decides whether the session is over.
    pub async fn next_phase(
        &self,
        topic_id: TopicId,
        project_hint: Option<ProjectId>,
    ) -> Result<Topic> {
        let mut request = SessionCommandRequest::new(SessionAction::NextPhase);
        if let Some(project_id) = project_hint {
            request = request.with_project(project_id);
        }
        self.send_command(topic_id, &request).await
    }
}

/// Rejections carrying an `ApiError` body surface as [`ApiException`] so
/// callers can match on the code.
async fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status();
    if status.is_success() {
        return Ok(res.json().await?);
    }
    let body = res.bytes().await?;
    match serde_json::from_slice::<ApiError>(&body) {
        Ok(err) => Err(ApiException::from(err).into()),
        Err(_) => Err(anyhow!(
            "server returned {status}: {}",
            String::from_utf8_lossy(&body)
        )),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
