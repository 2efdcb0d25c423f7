use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ActiveSession, Phase, ProjectId, SessionStatus, TopicId},
    error::{ApiException, ErrorCode},
    protocol::LiveSessionView,
};
use tokio::{
    sync::watch,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::SessionClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerOptions {
    /// How stale the last fetched view may get before it is refreshed.
    pub poll_interval: Duration,
    /// Resolution of the local countdown between fetches.
    pub tick_interval: Duration,
    /// Send `nextPhase` when a phase runs out. Ignored without a user id.
    pub auto_advance: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            auto_advance: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
}

/// The server's timer projected onto the local monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    phase: Phase,
    running: bool,
    remaining_at_fetch: Duration,
    fetched_at: Instant,
}

impl Countdown {
    /// `None` when the view has no timer (idle session).
    pub fn from_view(view: &LiveSessionView, fetched_at: Instant) -> Option<Self> {
        let timer = view.timer.as_ref()?;
        let remaining_ms = u64::try_from(timer.remaining_ms).unwrap_or(0);
        Some(Self {
            phase: timer.phase,
            running: view.session.status == SessionStatus::Active,
            remaining_at_fetch: Duration::from_millis(remaining_ms),
            fetched_at,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Frozen while the session is paused.
    pub fn remaining(&self, now: Instant) -> Duration {
        if !self.running {
            return self.remaining_at_fetch;
        }
        self.remaining_at_fetch
            .saturating_sub(now.saturating_duration_since(self.fetched_at))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.running && self.remaining(now).is_zero()
    }

    /// Expired now, but not yet when the view was fetched. Only this case
    /// warrants refetching before `poll_interval` is up.
    pub fn ran_out_locally(&self, now: Instant) -> bool {
        self.is_expired(now) && !self.remaining_at_fetch.is_zero()
    }
}

/// Whether the server reports the running phase as used up.
pub fn should_advance(view: &LiveSessionView) -> bool {
    view.session.status == SessionStatus::Active
        && view.timer.as_ref().is_some_and(|timer| timer.expired)
}

/// Identifies one run of a phase. Any command that touches the timer
/// produces a new baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBaseline {
    pub project_id: Option<ProjectId>,
    pub phase: Phase,
    pub start_time: Option<DateTime<Utc>>,
}

impl PhaseBaseline {
    pub fn of(session: &ActiveSession) -> Self {
        Self {
            project_id: session.current_project_id,
            phase: session.current_phase,
            start_time: session.start_time,
        }
    }
}

/// Follows the live session of `topic_id` until `on_view` returns
/// [`PollControl::Stop`] or `shutdown` flips to `true`.
///
/// When the client has a user id and `auto_advance` is set, the poller asks
/// the server for `nextPhase` once the server confirms the phase expired.
/// Each [`PhaseBaseline`] is advanced at most once. A baseline the server
/// refused (4xx) is left alone; a transport or server failure is retried
/// with the next fetch, one `poll_interval` later.
pub async fn run_poller<F>(
    client: &SessionClient,
    topic_id: TopicId,
    options: PollerOptions,
    mut shutdown: watch::Receiver<bool>,
    mut on_view: F,
) -> Result<()>
where
    F: FnMut(&LiveSessionView) -> PollControl,
{
    let controlling = options.auto_advance && client.user_id().is_some();
    let mut ticker = time::interval(options.tick_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut countdown: Option<Countdown> = None;
    let mut last_fetch: Option<Instant> = None;
    let mut advanced: Option<PhaseBaseline> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(%topic_id, "session poller shutting down");
                    return Ok(());
                }
                continue;
            }
        }

        let now = Instant::now();
        let due = match last_fetch {
            None => true,
            Some(at) => {
                now.saturating_duration_since(at) >= options.poll_interval
                    || countdown.is_some_and(|c| c.ran_out_locally(now))
            }
        };
        if !due {
            continue;
        }

        let view = match client.live(topic_id).await {
            Ok(view) => view,
            Err(error) => {
                warn!(%topic_id, %error, "failed to fetch live session");
                last_fetch = Some(Instant::now());
                continue;
            }
        };
        let fetched_at = Instant::now();
        last_fetch = Some(fetched_at);
        countdown = Countdown::from_view(&view, fetched_at);

        if on_view(&view) == PollControl::Stop {
            return Ok(());
        }

        if !controlling || !should_advance(&view) {
            continue;
        }
        let baseline = PhaseBaseline::of(&view.session);
        if advanced == Some(baseline) {
            continue;
        }

        match client.next_phase(topic_id, None).await {
            Ok(topic) => {
                advanced = Some(baseline);
                info!(
                    %topic_id,
                    from_phase = %baseline.phase,
                    to_phase = %topic.active_session.current_phase,
                    status = %topic.active_session.status,
                    "advanced expired phase"
                );
                // Refresh on the next tick so the new baseline shows up promptly.
                last_fetch = None;
            }
            Err(error) if is_refusal(&error) => {
                advanced = Some(baseline);
                warn!(%topic_id, %error, "nextPhase refused; waiting for a new baseline");
            }
            Err(error) => {
                warn!(%topic_id, %error, "nextPhase failed; retrying after the next poll");
            }
        }
    }
}

/// The server answered and said no. Retrying the same baseline cannot help.
fn is_refusal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ApiException>()
        .is_some_and(|api| api.code != ErrorCode::Internal)
}
