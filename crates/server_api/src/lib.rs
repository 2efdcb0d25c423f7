use std::sync::Arc;

use session::{
    order_projects, timer_snapshot, Clock, PhaseDurations, SessionCommand, SessionController,
    SessionError,
};
use shared::{
    domain::{Project, Role, Topic, TopicId, TopicSettings, User, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateUserRequest, CreateUserResponse, LiveSessionView, NewTopicRequest,
        SessionCommandRequest, SubmitProjectRequest,
    },
};
use storage::Storage;
use tracing::{error, info};

const MAX_USERNAME_CHARS: usize = 64;
const MAX_TITLE_CHARS: usize = 200;
const MAX_PHASE_MINUTES: u32 = 24 * 60;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub clock: Arc<dyn Clock>,
}

impl ApiContext {
    fn session_controller(&self) -> SessionController<Storage, Arc<dyn Clock>> {
        SessionController::new(self.storage.clone(), self.clock.clone())
    }
}

pub async fn create_user(
    ctx: &ApiContext,
    req: &CreateUserRequest,
) -> Result<CreateUserResponse, ApiError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "username is required"));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::new(ErrorCode::Validation, "username is too long"));
    }
    let user_id = ctx
        .storage
        .create_user(username, req.role)
        .await
        .map_err(internal)?;
    Ok(CreateUserResponse { user_id })
}

pub async fn create_topic(
    ctx: &ApiContext,
    actor: UserId,
    req: &NewTopicRequest,
) -> Result<Topic, ApiError> {
    let user = require_user(ctx, actor).await?;
    if user.role == Role::Student {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "only teachers can create topics",
        ));
    }
    let title = validate_title(&req.title)?;
    validate_settings(&req.settings)?;

    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let topic_id = ctx
        .storage
        .create_topic(actor, title, description, &req.settings, ctx.clock.now())
        .await
        .map_err(internal)?;
    info!(%topic_id, owner = %actor, "topic created");
    get_topic(ctx, topic_id).await
}

pub async fn get_topic(ctx: &ApiContext, topic_id: TopicId) -> Result<Topic, ApiError> {
    ctx.storage
        .topic(topic_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "topic not found"))
}

pub async fn list_topics(ctx: &ApiContext, actor: UserId) -> Result<Vec<Topic>, ApiError> {
    require_user(ctx, actor).await?;
    ctx.storage
        .list_topics_for_owner(actor)
        .await
        .map_err(internal)
}

pub async fn update_topic_settings(
    ctx: &ApiContext,
    actor: UserId,
    topic_id: TopicId,
    settings: &TopicSettings,
) -> Result<Topic, ApiError> {
    ensure_topic_controller(ctx, actor, topic_id).await?;
    validate_settings(settings)?;
    let updated = ctx
        .storage
        .update_topic_settings(topic_id, settings)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "topic not found"));
    }
    get_topic(ctx, topic_id).await
}

pub async fn submit_project(
    ctx: &ApiContext,
    actor: UserId,
    topic_id: TopicId,
    req: &SubmitProjectRequest,
) -> Result<Project, ApiError> {
    require_user(ctx, actor).await?;
    get_topic(ctx, topic_id).await?;
    let title = validate_title(&req.title)?;
    if req.group_number.is_some_and(|group| group < 0) {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "group number cannot be negative",
        ));
    }

    let project_id = ctx
        .storage
        .submit_project(topic_id, actor, title, req.group_number, ctx.clock.now())
        .await
        .map_err(internal)?;
    ctx.storage
        .project(project_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "project vanished after insert"))
}

/// Projects of a topic in presentation order.
pub async fn list_projects(ctx: &ApiContext, topic_id: TopicId) -> Result<Vec<Project>, ApiError> {
    get_topic(ctx, topic_id).await?;
    let mut projects = ctx
        .storage
        .list_projects(topic_id)
        .await
        .map_err(internal)?;
    order_projects(&mut projects);
    Ok(projects)
}

/// The returned topic carries the session written by this command, even if
/// another command has replaced it since.
pub async fn apply_session_command(
    ctx: &ApiContext,
    actor: UserId,
    topic_id: TopicId,
    req: &SessionCommandRequest,
) -> Result<Topic, ApiError> {
    let mut topic = ensure_topic_controller(ctx, actor, topic_id).await?;
    let command = SessionCommand::try_from(req).map_err(session_error)?;
    topic.active_session = ctx
        .session_controller()
        .apply_command(topic_id, &command)
        .await
        .map_err(session_error)?;
    Ok(topic)
}

pub async fn live_session(ctx: &ApiContext, topic_id: TopicId) -> Result<LiveSessionView, ApiError> {
    let topic = get_topic(ctx, topic_id).await?;
    let current_project = match topic.active_session.current_project_id {
        Some(project_id) => ctx
            .storage
            .project(project_id)
            .await
            .map_err(internal)?
            .filter(|project| project.topic_id == topic_id),
        None => None,
    };

    let now = ctx.clock.now();
    let durations = PhaseDurations::from_settings(&topic.settings);
    Ok(LiveSessionView {
        topic_id,
        title: topic.title,
        timer: timer_snapshot(&topic.active_session, &durations, now),
        session: topic.active_session,
        current_project,
        settings: topic.settings,
        server_time: now,
    })
}

async fn require_user(ctx: &ApiContext, user_id: UserId) -> Result<User, ApiError> {
    ctx.storage
        .user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))
}

/// Owner of the topic, or any admin.
async fn ensure_topic_controller(
    ctx: &ApiContext,
    actor: UserId,
    topic_id: TopicId,
) -> Result<Topic, ApiError> {
    let user = require_user(ctx, actor).await?;
    let topic = get_topic(ctx, topic_id).await?;
    if topic.owner_user_id != actor && user.role != Role::Admin {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "only the topic owner can control this topic",
        ));
    }
    Ok(topic)
}

fn validate_title(raw: &str) -> Result<&str, ApiError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title is required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::new(ErrorCode::Validation, "title is too long"));
    }
    Ok(title)
}

fn validate_settings(settings: &TopicSettings) -> Result<(), ApiError> {
    let durations = [
        ("duration_per_project", settings.duration_per_project),
        ("question_duration", settings.question_duration),
        ("break_duration", settings.break_duration),
    ];
    for (name, minutes) in durations {
        if let Some(minutes) = minutes {
            if minutes == 0 || minutes > MAX_PHASE_MINUTES {
                return Err(ApiError::new(
                    ErrorCode::Validation,
                    format!("{name} must be between 1 and {MAX_PHASE_MINUTES} minutes"),
                ));
            }
        }
    }
    Ok(())
}

fn session_error(err: SessionError) -> ApiError {
    let code = match &err {
        SessionError::TopicNotFound(_) | SessionError::ProjectNotFound(_) => ErrorCode::NotFound,
        SessionError::InvalidCommand(_) => ErrorCode::InvalidCommand,
        SessionError::InconsistentState(_) => ErrorCode::InconsistentState,
        SessionError::Conflict(_) => ErrorCode::Conflict,
        SessionError::Store(_) => {
            error!(error = %err, "session store failure");
            ErrorCode::Internal
        }
    };
    ApiError::new(code, err.to_string())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
