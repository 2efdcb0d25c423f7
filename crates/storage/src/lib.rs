use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use session::{SessionSnapshot, SessionStore};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    ActiveSession, Project, ProjectId, Role, Topic, TopicId, TopicSettings, User, UserId,
};

const TOPIC_COLUMNS: &str = "id, owner_user_id, title, description, duration_per_project, \
     question_duration, break_duration, feedback_visible, session_status, session_phase, \
     session_project_id, session_start_time, session_pause_time, session_version, created_at";

const PROJECT_COLUMNS: &str = "id, topic_id, title, submitted_by, group_number, submitted_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts the user, or updates the role of an existing username.
    pub async fn create_user(&self, username: &str, role: Role) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username, role) VALUES (?, ?)
             ON CONFLICT(username) DO UPDATE SET role=excluded.role
             RETURNING id",
        )
        .bind(username)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, role FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> Result<User> {
            Ok(User {
                user_id: UserId(r.try_get::<i64, _>(0)?),
                username: r.try_get::<String, _>(1)?,
                role: r.try_get::<String, _>(2)?.parse()?,
            })
        })
        .transpose()
    }

    pub async fn create_topic(
        &self,
        owner_user_id: UserId,
        title: &str,
        description: Option<&str>,
        settings: &TopicSettings,
        created_at: DateTime<Utc>,
    ) -> Result<TopicId> {
        let rec = sqlx::query(
            "INSERT INTO topics (owner_user_id, title, description, duration_per_project, question_duration, break_duration, feedback_visible, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(owner_user_id.0)
        .bind(title)
        .bind(description)
        .bind(settings.duration_per_project.map(i64::from))
        .bind(settings.question_duration.map(i64::from))
        .bind(settings.break_duration.map(i64::from))
        .bind(settings.feedback_visible)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(TopicId(rec.get::<i64, _>(0)))
    }

    pub async fn topic(&self, topic_id: TopicId) -> Result<Option<Topic>> {
        let row = sqlx::query(&format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?"))
            .bind(topic_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(|r| topic_from_row(r).map(|(topic, _)| topic))
            .transpose()
    }

    pub async fn list_topics_for_owner(&self, owner_user_id: UserId) -> Result<Vec<Topic>> {
        let rows = sqlx::query(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE owner_user_id = ? ORDER BY id ASC"
        ))
        .bind(owner_user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| topic_from_row(r).map(|(topic, _)| topic))
            .collect()
    }

    /// Returns `false` when the topic does not exist.
    pub async fn update_topic_settings(
        &self,
        topic_id: TopicId,
        settings: &TopicSettings,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE topics
             SET duration_per_project = ?, question_duration = ?, break_duration = ?, feedback_visible = ?
             WHERE id = ?",
        )
        .bind(settings.duration_per_project.map(i64::from))
        .bind(settings.question_duration.map(i64::from))
        .bind(settings.break_duration.map(i64::from))
        .bind(settings.feedback_visible)
        .bind(topic_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn submit_project(
        &self,
        topic_id: TopicId,
        submitted_by: UserId,
        title: &str,
        group_number: Option<i64>,
        submitted_at: DateTime<Utc>,
    ) -> Result<ProjectId> {
        let rec = sqlx::query(
            "INSERT INTO projects (topic_id, title, submitted_by, group_number, submitted_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(topic_id.0)
        .bind(title)
        .bind(submitted_by.0)
        .bind(group_number)
        .bind(submitted_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProjectId(rec.get::<i64, _>(0)))
    }

    pub async fn project(&self, project_id: ProjectId) -> Result<Option<Project>> {
        let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"))
            .bind(project_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    /// Projects in submission (row id) order. Presentation order is applied
    /// by `session::order_projects`.
    pub async fn list_projects(&self, topic_id: TopicId) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE topic_id = ? ORDER BY id ASC"
        ))
        .bind(topic_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }
}

fn topic_from_row(r: &SqliteRow) -> Result<(Topic, u64)> {
    let minutes = |column: &str| -> Result<Option<u32>> {
        r.try_get::<Option<i64>, _>(column)?
            .map(u32::try_from)
            .transpose()
            .with_context(|| format!("{column} out of range"))
    };

    let settings = TopicSettings {
        duration_per_project: minutes("duration_per_project")?,
        question_duration: minutes("question_duration")?,
        break_duration: minutes("break_duration")?,
        feedback_visible: r.try_get::<bool, _>("feedback_visible")?,
    };
    let active_session = ActiveSession {
        status: r.try_get::<String, _>("session_status")?.parse()?,
        current_phase: r.try_get::<String, _>("session_phase")?.parse()?,
        current_project_id: r
            .try_get::<Option<i64>, _>("session_project_id")?
            .map(ProjectId),
        start_time: r.try_get::<Option<DateTime<Utc>>, _>("session_start_time")?,
        pause_time: r.try_get::<Option<DateTime<Utc>>, _>("session_pause_time")?,
    };
    let version = u64::try_from(r.try_get::<i64, _>("session_version")?)
        .context("negative session version")?;

    Ok((
        Topic {
            topic_id: TopicId(r.try_get::<i64, _>("id")?),
            owner_user_id: UserId(r.try_get::<i64, _>("owner_user_id")?),
            title: r.try_get::<String, _>("title")?,
            description: r.try_get::<Option<String>, _>("description")?,
            settings,
            active_session,
            created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
        },
        version,
    ))
}

fn project_from_row(r: &SqliteRow) -> Result<Project> {
    Ok(Project {
        project_id: ProjectId(r.try_get::<i64, _>("id")?),
        topic_id: TopicId(r.try_get::<i64, _>("topic_id")?),
        title: r.try_get::<String, _>("title")?,
        submitted_by: UserId(r.try_get::<i64, _>("submitted_by")?),
        group_number: r.try_get::<Option<i64>, _>("group_number")?,
        submitted_at: r.try_get::<DateTime<Utc>, _>("submitted_at")?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[async_trait]
impl SessionStore for Storage {
    async fn load_session(&self, topic_id: TopicId) -> Result<Option<SessionSnapshot>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?"))
            .bind(topic_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let (topic, version) = topic_from_row(&row)?;

        let project_rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE topic_id = ? ORDER BY id ASC"
        ))
        .bind(topic_id.0)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let projects = project_rows
            .iter()
            .map(project_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(SessionSnapshot {
            session: topic.active_session,
            version,
            settings: topic.settings,
            projects,
        }))
    }

    async fn store_session(
        &self,
        topic_id: TopicId,
        expected_version: u64,
        session: &ActiveSession,
    ) -> Result<bool> {
        let expected_version =
            i64::try_from(expected_version).context("session version out of range")?;
        let result = sqlx::query(
            "UPDATE topics
             SET session_status = ?, session_phase = ?, session_project_id = ?,
                 session_start_time = ?, session_pause_time = ?,
                 session_version = session_version + 1
             WHERE id = ? AND session_version = ?",
        )
        .bind(session.status.as_str())
        .bind(session.current_phase.as_str())
        .bind(session.current_project_id.map(|id| id.0))
        .bind(session.start_time)
        .bind(session.pause_time)
        .bind(topic_id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .context("failed to store session state")?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
