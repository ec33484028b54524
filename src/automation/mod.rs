//! Scheduled follow-up work for catering quotes.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Days before the event that the balance reminder goes out
pub const BALANCE_REMINDER_LEAD_DAYS: i64 = 7;
/// Days after approval before nudging a customer who hasn't paid the deposit
pub const FOLLOW_UP_DELAY_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    BalanceReminder,
    QuoteFollowUp,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::BalanceReminder => "balance_reminder",
            TaskKind::QuoteFollowUp => "quote_follow_up",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance_reminder" => Ok(TaskKind::BalanceReminder),
            "quote_follow_up" => Ok(TaskKind::QuoteFollowUp),
            other => Err(format!("unknown task kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// Claimed by a runner that is sending it now
    Running,
    Done,
    Failed,
    /// The quote moved on and the task no longer applies
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub kind: String,
    pub quote_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Summary of one automation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub picked: usize,
    pub completed: usize,
    pub skipped: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Morning of the day a week before the event, or `now` if that is already past
pub fn balance_reminder_at(event_date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
    let day = event_date - Duration::days(BALANCE_REMINDER_LEAD_DAYS);
    let at = Utc.from_utc_datetime(&day.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)));
    at.max(now)
}

pub fn follow_up_at(approved_at: DateTime<Utc>) -> DateTime<Utc> {
    approved_at + Duration::days(FOLLOW_UP_DELAY_DAYS)
}

/// Delay before the next attempt: 5, 10, 20, 40 ... minutes, capped at 6 hours
pub fn retry_delay(attempts: i32) -> Duration {
    let exp = attempts.clamp(1, 10) as u32 - 1;
    Duration::minutes((5i64 << exp).min(360))
}

/// Status a task takes after a failed attempt
pub fn status_after_failure(attempts: i32, max_attempts: i32) -> TaskStatus {
    if attempts >= max_attempts {
        TaskStatus::Failed
    } else {
        TaskStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_is_a_week_before_the_event() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let event = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        assert_eq!(balance_reminder_at(event, now), Utc.with_ymd_and_hms(2026, 3, 13, 9, 0, 0).unwrap());
    }

    #[test]
    fn reminder_for_a_close_event_runs_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 18, 12, 0, 0).unwrap();
        let event = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        assert_eq!(balance_reminder_at(event, now), now);
    }

    #[test]
    fn follow_up_is_three_days_after_approval() {
        let approved = Utc.with_ymd_and_hms(2026, 5, 1, 8, 30, 0).unwrap();
        assert_eq!(follow_up_at(approved), Utc.with_ymd_and_hms(2026, 5, 4, 8, 30, 0).unwrap());
    }

    #[test]
    fn retry_delay_backs_off_and_caps() {
        assert_eq!(retry_delay(1), Duration::minutes(5));
        assert_eq!(retry_delay(2), Duration::minutes(10));
        assert_eq!(retry_delay(4), Duration::minutes(40));
        assert_eq!(retry_delay(9), Duration::minutes(360));
    }

    #[test]
    fn fails_after_max_attempts() {
        assert_eq!(status_after_failure(4, 5), TaskStatus::Pending);
        assert_eq!(status_after_failure(5, 5), TaskStatus::Failed);
    }

    #[test]
    fn kinds_parse() {
        assert_eq!("balance_reminder".parse::<TaskKind>().unwrap(), TaskKind::BalanceReminder);
        assert_eq!(TaskKind::QuoteFollowUp.to_string(), "quote_follow_up");
        assert!("cleanup".parse::<TaskKind>().is_err());
    }
}
