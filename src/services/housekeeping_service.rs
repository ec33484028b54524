use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::app::AppState;

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sessions: usize,
    pub buckets: usize,
}

/// Drop expired sessions and rate-limit buckets that have refilled
pub async fn sweep_once(state: &AppState, now: DateTime<Utc>) -> SweepReport {
    let report = SweepReport {
        sessions: state.sessions.purge_expired(now).await,
        buckets: state.rate_limiter.prune().await,
    };
    if report.sessions > 0 || report.buckets > 0 {
        tracing::debug!("Housekeeping purged {} sessions and {} rate-limit buckets", report.sessions, report.buckets);
    }
    report
}

/// Sweep in-memory state on an interval until the process exits.
///
/// Runs regardless of the automation settings; the session store and the
/// limiter only shrink here.
pub fn spawn_housekeeping(state: AppState) -> tokio::task::JoinHandle<()> {
    let every = Duration::from_secs(state.config.security.housekeeping_interval_secs.max(1));
    tracing::info!("Housekeeping every {:?}", every);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep_once(&state, Utc::now()).await;
        }
    })
}
