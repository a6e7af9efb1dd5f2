//! RetryManager (§4.6): fixed/exponential backoff scheduling and attempt
//! history bookkeeping.

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;

use crate::database::Store;
use crate::error::RetryError;
use crate::models::{AttemptRecord, RetryBackoff, TaskRunRow, TaskRunStatus};
use crate::schema::task_runs;

#[derive(Clone)]
pub struct RetryManager {
    store: Store,
}

#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub run_id: String,
    pub attempt: i32,
    pub max_retries: i32,
    pub retry_backoff: RetryBackoff,
    pub retry_delay_ms: i64,
    pub max_retry_delay_ms: i64,
    pub error: String,
    pub error_code: Option<String>,
}

impl RetryManager {
    pub fn new(store: Store) -> Self {
        RetryManager { store }
    }

    /// `fixed` uses a flat delay; `exponential` doubles per attempt,
    /// capped at `max_retry_delay_ms`.
    pub fn compute_delay_ms(backoff: RetryBackoff, attempt: i32, retry_delay_ms: i64, max_retry_delay_ms: i64) -> i64 {
        match backoff {
            RetryBackoff::Fixed => retry_delay_ms,
            RetryBackoff::Exponential => {
                let factor = 2i64.saturating_pow((attempt - 1).max(0) as u32);
                retry_delay_ms.saturating_mul(factor).min(max_retry_delay_ms)
            }
        }
    }

    /// Returns `Ok(true)` if a retry was scheduled, `Ok(false)` if
    /// attempts are exhausted and the caller must DLQ the run instead.
    pub async fn schedule_retry(&self, req: RetryRequest) -> Result<bool, RetryError> {
        if req.attempt > req.max_retries {
            return Ok(false);
        }

        let delay_ms =
            Self::compute_delay_ms(req.retry_backoff, req.attempt, req.retry_delay_ms, req.max_retry_delay_ms);
        let now = Utc::now().naive_utc();
        let scheduled_for = now + ChronoDuration::milliseconds(delay_ms);
        let next_attempt = req.attempt + 1;

        let run_id = req.run_id.clone();
        let run_id_for_error = run_id.clone();
        let affected = self
            .store
            .interact(move |conn| -> diesel::QueryResult<usize> {
                let row: TaskRunRow = task_runs::table.find(&run_id).first(conn)?;
                let mut history: Vec<AttemptRecord> = crate::models::json_or_default(&row.previous_attempts);
                history.push(AttemptRecord {
                    attempt: req.attempt,
                    error: req.error.clone(),
                    error_code: req.error_code.clone(),
                    timestamp: now,
                });

                diesel::update(task_runs::table.find(&run_id))
                    .set((
                        task_runs::status.eq(TaskRunStatus::Pending.as_str()),
                        task_runs::attempt.eq(next_attempt),
                        task_runs::scheduled_for.eq(scheduled_for),
                        task_runs::error.eq(Option::<String>::None),
                        task_runs::error_code.eq(Option::<String>::None),
                        task_runs::previous_attempts.eq(serde_json::to_string(&history).unwrap_or_default()),
                    ))
                    .execute(conn)
            })
            .await?;

        if affected == 0 {
            return Err(RetryError::RunNotFound(run_id_for_error));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_never_scales() {
        let d = RetryManager::compute_delay_ms(RetryBackoff::Fixed, 5, 100, 10_000);
        assert_eq!(d, 100);
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        assert_eq!(RetryManager::compute_delay_ms(RetryBackoff::Exponential, 1, 100, 10_000), 100);
        assert_eq!(RetryManager::compute_delay_ms(RetryBackoff::Exponential, 2, 100, 10_000), 200);
        assert_eq!(RetryManager::compute_delay_ms(RetryBackoff::Exponential, 3, 100, 10_000), 400);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let d = RetryManager::compute_delay_ms(RetryBackoff::Exponential, 20, 100, 10_000);
        assert_eq!(d, 10_000);
    }
}
