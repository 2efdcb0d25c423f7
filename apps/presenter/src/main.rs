use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use client_core::{run_poller, PollControl, PollerOptions, SessionClient};
use shared::{
    domain::{TopicId, UserId},
    protocol::LiveSessionView,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Follows a topic's live session and, with `--user-id`, advances phases
/// when their time runs out.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long)]
    topic_id: i64,
    /// Controlling teacher. Without it the presenter only watches.
    #[arg(long)]
    user_id: Option<i64>,
    #[arg(long, default_value_t = 5)]
    poll_seconds: u64,
    /// Watch and never send `nextPhase`, even with a user id.
    #[arg(long)]
    no_advance: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut client = SessionClient::new(args.server_url);
    if let Some(user_id) = args.user_id {
        client = client.with_user(UserId(user_id));
    }
    let topic_id = TopicId(args.topic_id);
    let options = PollerOptions {
        poll_interval: Duration::from_secs(args.poll_seconds.max(1)),
        auto_advance: !args.no_advance,
        ..PollerOptions::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(true);
            }
            Err(error) => warn!(%error, "ctrl-c handler unavailable"),
        }
    });

    info!(%topic_id, server_url = client.server_url(), "following live session");
    run_poller(&client, topic_id, options, shutdown_rx, |view| {
        println!("{}", render(view));
        PollControl::Continue
    })
    .await
}

fn render(view: &LiveSessionView) -> String {
    let project = view
        .current_project
        .as_ref()
        .map(|p| p.title.as_str())
        .unwrap_or("-");
    match &view.timer {
        Some(timer) => {
            let secs = timer.remaining_ms.max(0) / 1000;
            format!(
                "[{}] {} | {} | {} {:02}:{:02}",
                view.title,
                view.session.status,
                project,
                timer.phase,
                secs / 60,
                secs % 60
            )
        }
        None => format!("[{}] {}", view.title, view.session.status),
    }
}
