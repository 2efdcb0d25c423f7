use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ActiveSession, Phase, Project, ProjectId, TopicId, TopicSettings},
    protocol::{SessionAction, SessionCommandRequest},
};
use thiserror::Error;
use tracing::{info, warn};

pub mod clock;
pub mod ordering;
pub mod timer;
mod transition;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ordering::{order_projects, ordered_project_ids};
pub use timer::{timer_snapshot, PhaseDurations};
pub use transition::transition;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("topic {0} not found")]
    TopicNotFound(TopicId),
    #[error("project {0} does not belong to this topic")]
    ProjectNotFound(ProjectId),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("inconsistent session state: {0}")]
    InconsistentState(String),
    #[error("session for topic {0} was changed by another request")]
    Conflict(TopicId),
    #[error("session store failure: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start { project_id: Option<ProjectId> },
    SetPhase { phase: Phase },
    NextPhase { project_id: Option<ProjectId> },
    Next { project_id: ProjectId },
    Pause,
    Resume,
    Stop,
}

impl SessionCommand {
    pub fn action(&self) -> SessionAction {
        match self {
            Self::Start { .. } => SessionAction::Start,
            Self::SetPhase { .. } => SessionAction::SetPhase,
            Self::NextPhase { .. } => SessionAction::NextPhase,
            Self::Next { .. } => SessionAction::Next,
            Self::Pause => SessionAction::Pause,
            Self::Resume => SessionAction::Resume,
            Self::Stop => SessionAction::Stop,
        }
    }
}

impl TryFrom<&SessionCommandRequest> for SessionCommand {
    type Error = SessionError;

    fn try_from(request: &SessionCommandRequest) -> Result<Self, Self::Error> {
        let action: SessionAction = request
            .action
            .parse()
            .map_err(|err| SessionError::InvalidCommand(format!("{err}")))?;
        Ok(match action {
            SessionAction::Start => Self::Start {
                project_id: request.project_id,
            },
            SessionAction::SetPhase => {
                let phase = match request.phase.as_deref() {
                    None => Phase::Presentation,
                    Some(raw) => raw
                        .parse()
                        .map_err(|err| SessionError::InvalidCommand(format!("{err}")))?,
                };
                Self::SetPhase { phase }
            }
            SessionAction::NextPhase => Self::NextPhase {
                project_id: request.project_id,
            },
            SessionAction::Next => Self::Next {
                project_id: request.project_id.ok_or_else(|| {
                    SessionError::InvalidCommand("next requires a project_id".into())
                })?,
            },
            SessionAction::Pause => Self::Pause,
            SessionAction::Resume => Self::Resume,
            SessionAction::Stop => Self::Stop,
        })
    }
}

/// Everything a command needs, read in one go from the store.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: ActiveSession,
    pub version: u64,
    pub settings: TopicSettings,
    pub projects: Vec<Project>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, topic_id: TopicId) -> Result<Option<SessionSnapshot>>;
    /// Writes `session` only if the stored version still equals
    /// `expected_version`. Returns `false` when another write got there first.
    async fn store_session(
        &self,
        topic_id: TopicId,
        expected_version: u64,
        session: &ActiveSession,
    ) -> Result<bool>;
}

pub struct SessionController<S: SessionStore, C: Clock> {
    store: S,
    clock: C,
}

impl<S: SessionStore, C: Clock> SessionController<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    pub async fn apply_command(
        &self,
        topic_id: TopicId,
        command: &SessionCommand,
    ) -> Result<ActiveSession, SessionError> {
        let snapshot = self
            .store
            .load_session(topic_id)
            .await?
            .ok_or(SessionError::TopicNotFound(topic_id))?;
        let ordered = ordered_project_ids(&snapshot.projects);
        let now = self.clock.now();

        let next = transition(&snapshot.session, command, &ordered, now).inspect_err(|error| {
            warn!(%topic_id, action = %command.action(), %error, "session command rejected");
        })?;

        if !self
            .store
            .store_session(topic_id, snapshot.version, &next)
            .await?
        {
            warn!(%topic_id, action = %command.action(), "session changed during command");
            return Err(SessionError::Conflict(topic_id));
        }

        info!(
            %topic_id,
            action = %command.action(),
            from_status = %snapshot.session.status,
            to_status = %next.status,
            phase = %next.current_phase,
            project_id = ?next.current_project_id.map(|id| id.0),
            "session updated"
        );
        Ok(next)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
