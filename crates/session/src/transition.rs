use chrono::{DateTime, Utc};
use shared::domain::{ActiveSession, Phase, ProjectId, SessionStatus};

use crate::{ordering::following_project, SessionCommand, SessionError};

/// Computes the session that results from applying `command` to `current`.
///
/// `ordered` must already be in presentation order. Every transition that
/// moves to a new phase or project restarts the timer at `now`.
pub fn transition(
    current: &ActiveSession,
    command: &SessionCommand,
    ordered: &[ProjectId],
    now: DateTime<Utc>,
) -> Result<ActiveSession, SessionError> {
    match *command {
        SessionCommand::Start { project_id } => {
            if !current.status.is_idle() {
                return Err(SessionError::InconsistentState(
                    "a session is already running; resume or stop it first".into(),
                ));
            }
            let project_id = match project_id {
                Some(project_id) => listed(project_id, ordered)?,
                None => *ordered.first().ok_or_else(|| {
                    SessionError::InconsistentState("topic has no projects to present".into())
                })?,
            };
            Ok(ActiveSession::running(project_id, Phase::Presentation, now))
        }
        SessionCommand::SetPhase { phase } => {
            let project_id = current_project(current)?;
            Ok(ActiveSession::running(project_id, phase, now))
        }
        SessionCommand::NextPhase { project_id: hint } => {
            let project_id = current_project(current)?;
            match current.current_phase {
                Phase::Presentation => Ok(ActiveSession::running(project_id, Phase::Qa, now)),
                Phase::Qa => Ok(ActiveSession::running(project_id, Phase::Break, now)),
                Phase::Break => {
                    if !ordered.contains(&project_id) {
                        return Err(SessionError::InconsistentState(format!(
                            "current project {project_id} is no longer part of the topic"
                        )));
                    }
                    let Some(following) = following_project(ordered, project_id) else {
                        return Ok(ActiveSession::idle());
                    };
                    let next = match hint {
                        Some(hint) => listed(hint, ordered)?,
                        None => following,
                    };
                    Ok(ActiveSession::running(next, Phase::Presentation, now))
                }
            }
        }
        SessionCommand::Next { project_id } => {
            current_project(current)?;
            let project_id = listed(project_id, ordered)?;
            Ok(ActiveSession::running(project_id, Phase::Presentation, now))
        }
        SessionCommand::Pause => {
            current_project(current)?;
            if current.status != SessionStatus::Active {
                return Err(SessionError::InconsistentState(
                    "only an active session can be paused".into(),
                ));
            }
            Ok(ActiveSession {
                status: SessionStatus::Paused,
                pause_time: Some(now),
                ..current.clone()
            })
        }
        SessionCommand::Resume => {
            current_project(current)?;
            if current.status != SessionStatus::Paused {
                return Err(SessionError::InconsistentState(
                    "only a paused session can be resumed".into(),
                ));
            }
            let start_time = match (current.start_time, current.pause_time) {
                (Some(start), Some(paused)) => now - (paused - start),
                _ => now,
            };
            Ok(ActiveSession {
                status: SessionStatus::Active,
                start_time: Some(start_time),
                pause_time: None,
                ..current.clone()
            })
        }
        SessionCommand::Stop => Ok(ActiveSession::idle()),
    }
}

fn listed(project_id: ProjectId, ordered: &[ProjectId]) -> Result<ProjectId, SessionError> {
    if ordered.contains(&project_id) {
        Ok(project_id)
    } else {
        Err(SessionError::ProjectNotFound(project_id))
    }
}

fn current_project(current: &ActiveSession) -> Result<ProjectId, SessionError> {
    if current.status.is_idle() {
        return Err(SessionError::InconsistentState("no session is running".into()));
    }
    current.current_project_id.ok_or_else(|| {
        SessionError::InconsistentState("running session has no current project".into())
    })
}

#[cfg(test)]
#[path = "tests/transition_tests.rs"]
mod tests;
