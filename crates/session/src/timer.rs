//! Phase timers are never ticked. Every reader derives elapsed and remaining
//! time from the stored `start_time` and its own notion of now.

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{ActiveSession, Phase, SessionStatus, TopicSettings},
    protocol::TimerSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    pub presentation: Duration,
    pub qa: Duration,
    pub break_time: Duration,
}

impl PhaseDurations {
    pub fn from_settings(settings: &TopicSettings) -> Self {
        Self {
            presentation: Duration::minutes(i64::from(settings.presentation_minutes())),
            qa: Duration::minutes(i64::from(settings.question_minutes())),
            break_time: Duration::minutes(i64::from(settings.break_minutes())),
        }
    }

    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Presentation => self.presentation,
            Phase::Qa => self.qa,
            Phase::Break => self.break_time,
        }
    }
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self::from_settings(&TopicSettings::default())
    }
}

/// Time spent in the current phase; frozen at `pause_time` while paused.
pub fn elapsed(session: &ActiveSession, now: DateTime<Utc>) -> Option<Duration> {
    let start = session.start_time?;
    let until = match session.status {
        SessionStatus::Active => now,
        SessionStatus::Paused => session.pause_time.unwrap_or(now),
        SessionStatus::Idle | SessionStatus::Completed => return None,
    };
    Some((until - start).max(Duration::zero()))
}

pub fn timer_snapshot(
    session: &ActiveSession,
    durations: &PhaseDurations,
    now: DateTime<Utc>,
) -> Option<TimerSnapshot> {
    let elapsed = elapsed(session, now)?;
    let duration = durations.for_phase(session.current_phase);
    let remaining = duration - elapsed;
    Some(TimerSnapshot {
        phase: session.current_phase,
        duration_ms: duration.num_milliseconds(),
        elapsed_ms: elapsed.num_milliseconds(),
        remaining_ms: remaining.num_milliseconds().max(0),
        expired: remaining <= Duration::zero(),
    })
}
