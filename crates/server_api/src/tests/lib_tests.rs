use super::*;
use chrono::{Duration, TimeZone, Utc};
use session::ManualClock;
use shared::{
    domain::{ActiveSession, Phase, ProjectId, SessionStatus},
    protocol::SessionAction,
};

struct Fixture {
    ctx: ApiContext,
    clock: ManualClock,
    teacher: UserId,
    student: UserId,
    topic: TopicId,
    projects: Vec<ProjectId>,
}

async fn setup() -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 19, 10, 0, 0).unwrap());
    let ctx = ApiContext {
        storage,
        clock: Arc::new(clock.clone()),
    };

    let teacher = create_user(
        &ctx,
        &CreateUserRequest {
            username: "ms-ng".into(),
            role: Role::Teacher,
        },
    )
    .await
    .expect("teacher")
    .user_id;
    let student = create_user(
        &ctx,
        &CreateUserRequest {
            username: "leo".into(),
            role: Role::Student,
        },
    )
    .await
    .expect("student")
    .user_id;

    let topic = create_topic(
        &ctx,
        teacher,
        &NewTopicRequest {
            title: "Ecosystems".into(),
            description: None,
            settings: TopicSettings {
                duration_per_project: Some(10),
                question_duration: Some(5),
                break_duration: Some(2),
                feedback_visible: true,
            },
        },
    )
    .await
    .expect("topic")
    .topic_id;

    let mut projects = Vec::new();
    for (title, group) in [("Wetlands", Some(2)), ("Coral reefs", Some(1))] {
        clock.advance(Duration::seconds(5));
        let project = submit_project(
            &ctx,
            student,
            topic,
            &SubmitProjectRequest {
                title: title.into(),
                group_number: group,
            },
        )
        .await
        .expect("project");
        projects.push(project.project_id);
    }

    Fixture {
        ctx,
        clock,
        teacher,
        student,
        topic,
        projects,
    }
}

async fn command(fx: &Fixture, req: SessionCommandRequest) -> Result<Topic, ApiError> {
    apply_session_command(&fx.ctx, fx.teacher, fx.topic, &req).await
}

#[tokio::test]
async fn list_projects_uses_presentation_order() {
    let fx = setup().await;
    let projects = list_projects(&fx.ctx, fx.topic).await.expect("projects");
    let titles: Vec<&str> = projects.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Coral reefs", "Wetlands"]);
}

#[tokio::test]
async fn students_cannot_create_topics() {
    let fx = setup().await;
    let err = create_topic(
        &fx.ctx,
        fx.student,
        &NewTopicRequest {
            title: "Mine".into(),
            description: None,
            settings: TopicSettings::default(),
        },
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn zero_minute_phase_is_rejected() {
    let fx = setup().await;
    let err = update_topic_settings(
        &fx.ctx,
        fx.teacher,
        fx.topic,
        &TopicSettings {
            break_duration: Some(0),
            ..TopicSettings::default()
        },
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn non_owner_cannot_control_session() {
    let fx = setup().await;
    let other_teacher = create_user(
        &fx.ctx,
        &CreateUserRequest {
            username: "mr-diaz".into(),
            role: Role::Teacher,
        },
    )
    .await
    .expect("teacher")
    .user_id;

    for actor in [fx.student, other_teacher] {
        let err = apply_session_command(
            &fx.ctx,
            actor,
            fx.topic,
            &SessionCommandRequest::new(SessionAction::Start),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    let topic = get_topic(&fx.ctx, fx.topic).await.expect("topic");
    assert_eq!(topic.active_session, ActiveSession::idle());
}

#[tokio::test]
async fn admin_can_control_any_topic() {
    let fx = setup().await;
    let admin = create_user(
        &fx.ctx,
        &CreateUserRequest {
            username: "root".into(),
            role: Role::Admin,
        },
    )
    .await
    .expect("admin")
    .user_id;

    let topic = apply_session_command(
        &fx.ctx,
        admin,
        fx.topic,
        &SessionCommandRequest::new(SessionAction::Start),
    )
    .await
    .expect("start");
    assert_eq!(topic.active_session.status, SessionStatus::Active);
}

#[tokio::test]
async fn unknown_user_is_unauthorized() {
    let fx = setup().await;
    let err = apply_session_command(
        &fx.ctx,
        UserId(9_999),
        fx.topic,
        &SessionCommandRequest::new(SessionAction::Stop),
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn garbage_action_and_phase_are_invalid_commands() {
    let fx = setup().await;
    let err = command(
        &fx,
        SessionCommandRequest {
            action: "fastForward".into(),
            project_id: None,
            phase: None,
        },
    )
    .await
    .expect_err("bad action");
    assert_eq!(err.code, ErrorCode::InvalidCommand);

    command(&fx, SessionCommandRequest::new(SessionAction::Start))
        .await
        .expect("start");
    let err = command(
        &fx,
        SessionCommandRequest {
            action: "setPhase".into(),
            project_id: None,
            phase: Some("recess".into()),
        },
    )
    .await
    .expect_err("bad phase");
    assert_eq!(err.code, ErrorCode::InvalidCommand);
}

#[tokio::test]
async fn stale_project_reference_is_not_found() {
    let fx = setup().await;
    let err = command(
        &fx,
        SessionCommandRequest::new(SessionAction::Start).with_project(ProjectId(31_337)),
    )
    .await
    .expect_err("stale project");
    assert_eq!(err.code, ErrorCode::NotFound);

    let topic = get_topic(&fx.ctx, fx.topic).await.expect("topic");
    assert_eq!(topic.active_session, ActiveSession::idle());
}

#[tokio::test]
async fn next_phase_while_idle_is_inconsistent() {
    let fx = setup().await;
    let err = command(&fx, SessionCommandRequest::new(SessionAction::NextPhase))
        .await
        .expect_err("idle");
    assert_eq!(err.code, ErrorCode::InconsistentState);
}

#[tokio::test]
async fn live_view_reports_countdown_and_current_project() {
    let fx = setup().await;
    let first = fx.projects[1];
    command(
        &fx,
        SessionCommandRequest::new(SessionAction::Start).with_project(first),
    )
    .await
    .expect("start");

    fx.clock.advance(Duration::minutes(3));
    let view = live_session(&fx.ctx, fx.topic).await.expect("live");
    assert_eq!(view.session.current_project_id, Some(first));
    assert_eq!(
        view.current_project.as_ref().map(|p| p.title.as_str()),
        Some("Coral reefs")
    );
    assert!(view.settings.feedback_visible);
    let timer = view.timer.expect("timer");
    assert_eq!(timer.phase, Phase::Presentation);
    assert_eq!(timer.remaining_ms, Duration::minutes(7).num_milliseconds());
    assert!(!timer.expired);

    command(&fx, SessionCommandRequest::new(SessionAction::Pause))
        .await
        .expect("pause");
    fx.clock.advance(Duration::minutes(30));
    let paused = live_session(&fx.ctx, fx.topic).await.expect("live");
    assert_eq!(
        paused.timer.expect("timer").elapsed_ms,
        Duration::minutes(3).num_milliseconds()
    );
}

#[tokio::test]
async fn full_session_ends_idle_after_last_break() {
    let fx = setup().await;
    command(&fx, SessionCommandRequest::new(SessionAction::Start))
        .await
        .expect("start");
    for _ in 0..5 {
        fx.clock.advance(Duration::minutes(1));
        let topic = command(&fx, SessionCommandRequest::new(SessionAction::NextPhase))
            .await
            .expect("next phase");
        assert_eq!(topic.active_session.status, SessionStatus::Active);
    }
    let topic = command(&fx, SessionCommandRequest::new(SessionAction::NextPhase))
        .await
        .expect("end");
    assert_eq!(topic.active_session, ActiveSession::idle());

    let view = live_session(&fx.ctx, fx.topic).await.expect("live");
    assert!(view.timer.is_none());
    assert!(view.current_project.is_none());
}

#[tokio::test]
async fn command_returns_the_session_it_wrote() {
    let fx = setup().await;
    let first = fx.projects[1];
    command(&fx, SessionCommandRequest::new(SessionAction::Start))
        .await
        .expect("start");

    fx.clock.advance(Duration::minutes(4));
    let before = get_topic(&fx.ctx, fx.topic).await.expect("topic");
    let expected = session::transition(
        &before.active_session,
        &SessionCommand::Pause,
        &[fx.projects[1], fx.projects[0]],
        fx.clock.now(),
    )
    .expect("pause is valid");

    let topic = command(&fx, SessionCommandRequest::new(SessionAction::Pause))
        .await
        .expect("pause");
    assert_eq!(topic.active_session, expected);
    assert_eq!(topic.active_session.current_project_id, Some(first));
    assert_eq!(topic.title, before.title);

    // A later command does not rewrite what the earlier response reported.
    let resumed = command(&fx, SessionCommandRequest::new(SessionAction::Resume))
        .await
        .expect("resume");
    assert_eq!(resumed.active_session.status, SessionStatus::Active);
    assert_eq!(topic.active_session.status, SessionStatus::Paused);
    assert_eq!(topic.active_session.pause_time, Some(fx.clock.now()));
}
