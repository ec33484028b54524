use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::app::AppState;
use crate::automation::{retry_delay, status_after_failure, RunReport, ScheduledTask, TaskKind, TaskStatus};
use crate::database::DatabaseError;
use crate::notifications::DeliveryStatus;
use crate::services::quote_service::QuoteService;

pub async fn schedule_task<'e, E>(
    executor: E,
    kind: TaskKind,
    quote_id: Uuid,
    run_at: DateTime<Utc>,
) -> Result<Uuid, DatabaseError>
where
    E: PgExecutor<'e>,
{
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO scheduled_tasks (id, kind, quote_id, run_at) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(kind.as_str())
        .bind(quote_id)
        .bind(run_at)
        .execute(executor)
        .await?;
    tracing::debug!("Scheduled {} for quote {} at {}", kind, quote_id, run_at);
    Ok(id)
}

/// Retire a quote's pending tasks, optionally of a single kind
pub async fn skip_pending_tasks<'e, E>(executor: E, quote_id: Uuid, kind: Option<TaskKind>) -> Result<u64, DatabaseError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_tasks SET status = $3, updated_at = now()
        WHERE quote_id = $1 AND status = 'pending' AND ($2::text IS NULL OR kind = $2)
        "#,
    )
    .bind(quote_id)
    .bind(kind.map(|k| k.as_str()))
    .bind(TaskStatus::Skipped.as_str())
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// A `running` claim older than this belongs to a runner that died
const STALE_CLAIM_MINUTES: i64 = 15;

/// Executes due scheduled tasks
pub struct AutomationService {
    pool: PgPool,
    quotes: QuoteService,
    batch_size: i64,
    max_attempts: i32,
}

impl AutomationService {
    pub fn new(pool: PgPool, quotes: QuoteService, batch_size: i64, max_attempts: i32) -> Self {
        Self {
            pool,
            quotes,
            batch_size,
            max_attempts,
        }
    }

    /// One pass over due tasks.
    ///
    /// Tasks are claimed by flipping them to `running` in a single statement
    /// (`SKIP LOCKED`, so concurrent runners never pick the same one). Each
    /// task's result is written as soon as its email goes out, so a failure
    /// later in the batch cannot resend earlier ones.
    pub async fn run_once(&self) -> Result<RunReport, DatabaseError> {
        let reclaimed = self.reclaim_stale().await?;
        if reclaimed > 0 {
            tracing::warn!("Returned {} stale running tasks to the queue", reclaimed);
        }

        let tasks = sqlx::query_as::<_, ScheduledTask>(
            r#"
            UPDATE scheduled_tasks SET status = 'running', updated_at = now()
            WHERE id IN (
                SELECT id FROM scheduled_tasks
                WHERE status = 'pending' AND run_at <= now()
                ORDER BY run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, kind, quote_id, run_at, status, attempts, last_error
            "#,
        )
        .bind(self.batch_size.max(1))
        .fetch_all(&self.pool)
        .await?;

        let mut report = RunReport {
            picked: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            let outcome = match task.kind.parse::<TaskKind>() {
                Ok(kind) => match self.quotes.send_scheduled(kind, task.quote_id).await {
                    Ok(Some(DeliveryStatus::Failed)) => Err("email delivery failed".to_string()),
                    Ok(Some(_)) => Ok(true),
                    Ok(None) => Ok(false),
                    Err(e) => Err(e.to_string()),
                },
                Err(e) => Err(e),
            };

            let written = match outcome {
                Ok(true) => self.finish(task.id, TaskStatus::Done).await.map(|_| report.completed += 1),
                Ok(false) => self.finish(task.id, TaskStatus::Skipped).await.map(|_| report.skipped += 1),
                Err(message) => self.reschedule(&task, &message).await.map(|status| {
                    if status == TaskStatus::Failed {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                }),
            };
            // The email is out either way; keep going so the rest of the batch is not held up
            if let Err(e) = written {
                tracing::error!("Could not record result of task {}: {}", task.id, e);
            }
        }

        if report.picked > 0 {
            tracing::info!(
                "Automation pass: {} picked, {} done, {} skipped, {} retrying, {} failed",
                report.picked,
                report.completed,
                report.skipped,
                report.retried,
                report.failed
            );
        }
        Ok(report)
    }

    /// Put back tasks whose runner died mid-send
    async fn reclaim_stale(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET status = 'pending', updated_at = now() \
             WHERE status = 'running' AND updated_at < $1",
        )
        .bind(Utc::now() - chrono::Duration::minutes(STALE_CLAIM_MINUTES))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn finish(&self, id: Uuid, status: TaskStatus) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE scheduled_tasks SET status = $2, attempts = attempts + 1, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reschedule(&self, task: &ScheduledTask, message: &str) -> Result<TaskStatus, DatabaseError> {
        let attempts = task.attempts + 1;
        let status = status_after_failure(attempts, self.max_attempts);
        tracing::warn!("Task {} ({}) attempt {} failed: {}", task.id, task.kind, attempts, message);
        sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = $2, attempts = $3, last_error = $4, run_at = $5, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(status.as_str())
        .bind(attempts)
        .bind(message)
        .bind(Utc::now() + retry_delay(attempts))
        .execute(&self.pool)
        .await?;
        if status == TaskStatus::Failed {
            tracing::error!("Task {} gave up after {} attempts", task.id, attempts);
        }
        Ok(status)
    }
}

/// Poll for due tasks on an interval until the process exits
pub fn spawn_background(state: AppState) -> tokio::task::JoinHandle<()> {
    let every = Duration::from_secs(state.config.automation.poll_interval_secs.max(1));
    tracing::info!("Automation runner polling every {:?}", every);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = state.automation().run_once().await {
                tracing::error!("Automation pass failed: {}", e);
            }
        }
    })
}
