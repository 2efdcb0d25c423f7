use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use server_api::{
    apply_session_command, create_topic, create_user, list_projects, submit_project, ApiContext,
};
use session::SystemClock;
use shared::{
    domain::{ProjectId, Role, TopicId, TopicSettings, UserId},
    error::{ApiError, ApiException},
    protocol::{CreateUserRequest, NewTopicRequest, SessionCommandRequest, SubmitProjectRequest},
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://presentations.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
        /// admin, teacher or student
        #[arg(default_value = "student")]
        role: String,
    },
    CreateTopic {
        owner_user_id: i64,
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        presentation_minutes: Option<u32>,
        #[arg(long)]
        question_minutes: Option<u32>,
        #[arg(long)]
        break_minutes: Option<u32>,
    },
    SubmitProject {
        topic_id: i64,
        student_user_id: i64,
        title: String,
        #[arg(long)]
        group: Option<i64>,
    },
    ListProjects {
        topic_id: i64,
    },
    /// Apply one session command (start, nextPhase, setPhase, next, pause, resume, stop).
    Session {
        topic_id: i64,
        action: String,
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        project_id: Option<i64>,
        #[arg(long)]
        phase: Option<String>,
    },
}

fn rejected(err: ApiError) -> anyhow::Error {
    ApiException::from(err).into()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let ctx = ApiContext {
        storage,
        clock: Arc::new(SystemClock),
    };

    match cli.command {
        Command::CreateUser { username, role } => {
            let role: Role = role.parse()?;
            let created = create_user(&ctx, &CreateUserRequest { username, role })
                .await
                .map_err(rejected)?;
            println!("created user_id={}", created.user_id);
        }
        Command::CreateTopic {
            owner_user_id,
            title,
            description,
            presentation_minutes,
            question_minutes,
            break_minutes,
        } => {
            let req = NewTopicRequest {
                title,
                description,
                settings: TopicSettings {
                    duration_per_project: presentation_minutes,
                    question_duration: question_minutes,
                    break_duration: break_minutes,
                    ..TopicSettings::default()
                },
            };
            let topic = create_topic(&ctx, UserId(owner_user_id), &req)
                .await
                .map_err(rejected)?;
            println!("created topic_id={}", topic.topic_id);
        }
        Command::SubmitProject {
            topic_id,
            student_user_id,
            title,
            group,
        } => {
            let req = SubmitProjectRequest {
                title,
                group_number: group,
            };
            let project = submit_project(&ctx, UserId(student_user_id), TopicId(topic_id), &req)
                .await
                .map_err(rejected)?;
            println!("created project_id={}", project.project_id);
        }
        Command::ListProjects { topic_id } => {
            let projects = list_projects(&ctx, TopicId(topic_id))
                .await
                .map_err(rejected)?;
            for (position, project) in projects.iter().enumerate() {
                let group = project
                    .group_number
                    .map(|g| g.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:>3}. project_id={} group={group} {}",
                    position + 1,
                    project.project_id,
                    project.title
                );
            }
        }
        Command::Session {
            topic_id,
            action,
            user_id,
            project_id,
            phase,
        } => {
            let req = SessionCommandRequest {
                action,
                project_id: project_id.map(ProjectId),
                phase,
            };
            let topic = apply_session_command(&ctx, UserId(user_id), TopicId(topic_id), &req)
                .await
                .map_err(rejected)?;
            let session = &topic.active_session;
            match session.current_project_id {
                Some(project_id) => println!(
                    "topic_id={} status={} phase={} project_id={project_id}",
                    topic.topic_id, session.status, session.current_phase
                ),
                None => println!("topic_id={} status={}", topic.topic_id, session.status),
            }
        }
    }

    Ok(())
}
