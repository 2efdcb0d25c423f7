use chrono::{Duration, TimeZone, Utc};
use session::{Clock, ManualClock, SessionCommand, SessionController};
use shared::domain::{ActiveSession, Phase, ProjectId, Role, SessionStatus, TopicSettings};
use storage::Storage;

#[tokio::test]
async fn controller_drives_a_full_session_against_sqlite() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();

    let teacher = storage
        .create_user("mr-okafor", Role::Teacher)
        .await
        .expect("teacher");
    let student = storage
        .create_user("priya", Role::Student)
        .await
        .expect("student");
    let topic = storage
        .create_topic(teacher, "Bridges", None, &TopicSettings::default(), start)
        .await
        .expect("topic");
    let second = storage
        .submit_project(topic, student, "Suspension", Some(2), start)
        .await
        .expect("project");
    let first = storage
        .submit_project(topic, student, "Truss", Some(1), start)
        .await
        .expect("project");

    let clock = ManualClock::new(start);
    let controller = SessionController::new(storage.clone(), clock.clone());

    let session = controller
        .apply_command(topic, &SessionCommand::Start { project_id: None })
        .await
        .expect("start");
    assert_eq!(session.current_project_id, Some(first));

    clock.advance(Duration::minutes(4));
    controller
        .apply_command(topic, &SessionCommand::Pause)
        .await
        .expect("pause");
    clock.advance(Duration::minutes(20));
    let resumed = controller
        .apply_command(topic, &SessionCommand::Resume)
        .await
        .expect("resume");
    assert_eq!(resumed.start_time, Some(clock.now() - Duration::minutes(4)));

    let mut visited: Vec<(Phase, Option<ProjectId>)> = Vec::new();
    for _ in 0..5 {
        clock.advance(Duration::minutes(1));
        let session = controller
            .apply_command(topic, &SessionCommand::NextPhase { project_id: None })
            .await
            .expect("next phase");
        assert_eq!(session.status, SessionStatus::Active);
        visited.push((session.current_phase, session.current_project_id));
    }
    assert_eq!(
        visited,
        vec![
            (Phase::Qa, Some(first)),
            (Phase::Break, Some(first)),
            (Phase::Presentation, Some(second)),
            (Phase::Qa, Some(second)),
            (Phase::Break, Some(second)),
        ]
    );

    let ended = controller
        .apply_command(
            topic,
            &SessionCommand::NextPhase {
                project_id: Some(first),
            },
        )
        .await
        .expect("end of list");
    assert_eq!(ended, ActiveSession::idle());

    let stored = storage.topic(topic).await.expect("load").expect("topic");
    assert_eq!(stored.active_session, ActiveSession::idle());
}
