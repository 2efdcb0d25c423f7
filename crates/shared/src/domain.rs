use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(TopicId);
id_newtype!(ProjectId);

/// Returned by the `FromStr` impls below for values outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

string_enum!(Role, "role", {
    Admin => "admin",
    Teacher => "teacher",
    Student => "student",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Active,
    Paused,
    Completed,
}

string_enum!(SessionStatus, "session status", {
    Idle => "idle",
    Active => "active",
    Paused => "paused",
    Completed => "completed",
});

impl SessionStatus {
    /// `Completed` carries no current project either, so it counts as idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle | Self::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Presentation,
    Qa,
    Break,
}

string_enum!(Phase, "phase", {
    Presentation => "presentation",
    Qa => "qa",
    Break => "break",
});

/// Live session sub-record embedded in every topic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveSession {
    pub status: SessionStatus,
    pub current_phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_time: Option<DateTime<Utc>>,
}

impl ActiveSession {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Fresh timer baseline for `phase` of `project_id`.
    pub fn running(project_id: ProjectId, phase: Phase, now: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Active,
            current_phase: phase,
            current_project_id: Some(project_id),
            start_time: Some(now),
            pause_time: None,
        }
    }
}

pub const DEFAULT_PRESENTATION_MINUTES: u32 = 10;
pub const DEFAULT_QUESTION_MINUTES: u32 = 5;
pub const DEFAULT_BREAK_MINUTES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_per_project: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_duration: Option<u32>,
    #[serde(default)]
    pub feedback_visible: bool,
}

impl TopicSettings {
    pub fn presentation_minutes(&self) -> u32 {
        self.duration_per_project
            .unwrap_or(DEFAULT_PRESENTATION_MINUTES)
    }

    pub fn question_minutes(&self) -> u32 {
        self.question_duration.unwrap_or(DEFAULT_QUESTION_MINUTES)
    }

    pub fn break_minutes(&self) -> u32 {
        self.break_duration.unwrap_or(DEFAULT_BREAK_MINUTES)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: TopicId,
    pub owner_user_id: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub settings: TopicSettings,
    pub active_session: ActiveSession,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub topic_id: TopicId,
    pub title: String,
    pub submitted_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_number: Option<i64>,
    pub submitted_at: DateTime<Utc>,
}
