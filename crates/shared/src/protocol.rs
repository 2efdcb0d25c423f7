use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ActiveSession, Phase, Project, ProjectId, Role, TopicId, TopicSettings, UnknownVariant, UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTopicRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: TopicSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitProjectRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_number: Option<i64>,
}

/// Actions accepted by `POST /topics/{id}/session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    NextPhase,
    SetPhase,
    Next,
    Pause,
    Resume,
    Stop,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::NextPhase => "nextPhase",
            Self::SetPhase => "setPhase",
            Self::Next => "next",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionAction {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "start" => Ok(Self::Start),
            "nextPhase" => Ok(Self::NextPhase),
            "setPhase" => Ok(Self::SetPhase),
            "next" => Ok(Self::Next),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            other => Err(UnknownVariant {
                kind: "action",
                value: other.to_string(),
            }),
        }
    }
}

/// Raw command body. `action` and `phase` stay strings on the wire so that
/// unknown values surface as `InvalidCommand` instead of a decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommandRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl SessionCommandRequest {
    pub fn new(action: SessionAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            project_id: None,
            phase: None,
        }
    }

    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase.as_str().to_string());
        self
    }
}

/// Countdown state derived from `start_time` at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub phase: Phase,
    pub duration_ms: i64,
    pub elapsed_ms: i64,
    pub remaining_ms: i64,
    pub expired: bool,
}

/// Payload of the live poll endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSessionView {
    pub topic_id: TopicId,
    pub title: String,
    pub session: ActiveSession,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_project: Option<Project>,
    pub settings: TopicSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerSnapshot>,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionUpdated {
        topic_id: TopicId,
        session: ActiveSession,
    },
}
