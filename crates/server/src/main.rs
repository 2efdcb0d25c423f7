use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    apply_session_command, create_topic, create_user, get_topic, list_projects, list_topics,
    live_session, submit_project, update_topic_settings, ApiContext,
};
use session::SystemClock;
use shared::{
    domain::{Project, Topic, TopicId, TopicSettings, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateUserRequest, CreateUserResponse, LiveSessionView, NewTopicRequest, ServerEvent,
        SessionCommandRequest, SubmitProjectRequest,
    },
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    topic_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        clock: Arc::new(SystemClock),
    };
    let (events, _) = broadcast::channel(settings.event_buffer.max(1));

    let state = AppState { api, events };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users", post(http_create_user))
        .route("/topics", post(http_create_topic).get(http_list_topics))
        .route("/topics/:topic_id", get(http_get_topic))
        .route("/topics/:topic_id/settings", put(http_update_settings))
        .route(
            "/topics/:topic_id/projects",
            post(http_submit_project).get(http_list_projects),
        )
        .route("/topics/:topic_id/session", post(http_session_command))
        .route("/topics/:topic_id/live", get(http_live_session))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation | ErrorCode::InvalidCommand => StatusCode::BAD_REQUEST,
        ErrorCode::InconsistentState | ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(err.code);
    if status.is_server_error() {
        error!(code = ?err.code, message = %err.message, "request failed");
    }
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

async fn http_create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<Json<CreateUserResponse>> {
    let created = create_user(&state.api, &req).await.map_err(reject)?;
    Ok(Json(created))
}

async fn http_create_topic(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<NewTopicRequest>,
) -> ApiResult<Json<Topic>> {
    let topic = create_topic(&state.api, UserId(q.user_id), &req)
        .await
        .map_err(reject)?;
    Ok(Json(topic))
}

async fn http_list_topics(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<Vec<Topic>>> {
    let topics = list_topics(&state.api, UserId(q.user_id))
        .await
        .map_err(reject)?;
    Ok(Json(topics))
}

async fn http_get_topic(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<i64>,
) -> ApiResult<Json<Topic>> {
    let topic = get_topic(&state.api, TopicId(topic_id))
        .await
        .map_err(reject)?;
    Ok(Json(topic))
}

async fn http_update_settings(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(settings): Json<TopicSettings>,
) -> ApiResult<Json<Topic>> {
    let topic = update_topic_settings(&state.api, UserId(q.user_id), TopicId(topic_id), &settings)
        .await
        .map_err(reject)?;
    Ok(Json(topic))
}

async fn http_submit_project(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SubmitProjectRequest>,
) -> ApiResult<Json<Project>> {
    let project = submit_project(&state.api, UserId(q.user_id), TopicId(topic_id), &req)
        .await
        .map_err(reject)?;
    Ok(Json(project))
}

async fn http_list_projects(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<i64>,
) -> ApiResult<Json<Vec<Project>>> {
    let projects = list_projects(&state.api, TopicId(topic_id))
        .await
        .map_err(reject)?;
    Ok(Json(projects))
}

async fn http_session_command(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SessionCommandRequest>,
) -> ApiResult<Json<Topic>> {
    let topic = apply_session_command(&state.api, UserId(q.user_id), TopicId(topic_id), &req)
        .await
        .map_err(reject)?;
    let _ = state.events.send(ServerEvent::SessionUpdated {
        topic_id: topic.topic_id,
        session: topic.active_session.clone(),
    });
    Ok(Json(topic))
}

async fn http_live_session(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<i64>,
) -> ApiResult<Json<LiveSessionView>> {
    let view = live_session(&state.api, TopicId(topic_id))
        .await
        .map_err(reject)?;
    Ok(Json(view))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    let topic_filter = q.topic_id.map(TopicId);
    ws.on_upgrade(move |socket| ws_connection(state, socket, topic_filter))
}

fn event_matches(event: &ServerEvent, topic_filter: Option<TopicId>) -> bool {
    let ServerEvent::SessionUpdated { topic_id, .. } = event;
    topic_filter.map_or(true, |wanted| *topic_id == wanted)
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: axum::extract::ws::WebSocket,
    topic_filter: Option<TopicId>,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagged behind session events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !event_matches(&event, topic_filter) {
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
