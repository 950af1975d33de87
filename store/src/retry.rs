//! Retry policy for transient database errors: exponential backoff with
//! jitter, SQLSTATE-aware on Postgres, keyword-matched on SQLite.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

const SQLITE_RETRYABLE_KEYWORDS: &[&str] = &[
    "database is locked",
    "database disk image is malformed",
    "database table is locked",
];

const POSTGRESQL_RETRYABLE_KEYWORDS: &[&str] = &[
    "serialization failure",
    "deadlock detected",
    "could not obtain lock",
    "too many connections",
    "could not connect",
    "connection refused",
    "server closed the connection",
    "connection timed out",
    "connection reset",
];

const COMMON_RETRYABLE_KEYWORDS: &[&str] = &[
    "connection timeout",
    "connection pool",
    "connection closed",
];

const POSTGRESQL_RETRYABLE_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "53300", "57014"];
const POSTGRESQL_RETRYABLE_SQLSTATE_CLASS: &str = "08";

/// Policy shared across all store operations; construct once per
/// `InteractionStore`/`EventBus` and clone cheaply (it's plain data).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Run `op` with exponential backoff, retrying only sqlx errors this
    /// policy judges transient. Returns the last error once retries are
    /// exhausted or the error is non-retryable.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut op: F) -> Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let retryable = is_retryable_error(&e);
                    if !retryable || attempt == self.max_retries {
                        if log::log_enabled!(log::Level::Error) {
                            log::error!(
                                "database operation '{operation_name}' failed after {} attempts: {e}",
                                attempt + 1
                            );
                        }
                        return Err(e);
                    }

                    let backoff = self.base_delay * 2u32.pow(attempt);
                    let backoff = backoff.min(self.max_delay);
                    let jitter_ms = rand::thread_rng().gen_range(0..=(backoff.as_millis() as u64 / 10).max(1));
                    let total = backoff + Duration::from_millis(jitter_ms);

                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!(
                            "database operation '{operation_name}' failed on attempt {}, retrying in {:?}: {e}",
                            attempt + 1,
                            total
                        );
                    }
                    tokio::time::sleep(total).await;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("loop always runs at least once"))
    }
}

fn is_retryable_error(err: &sqlx::Error) -> bool {
    let msg = err.to_string().to_lowercase();

    if COMMON_RETRYABLE_KEYWORDS.iter().any(|k| msg.contains(k)) {
        return true;
    }

    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            let code = code.as_ref();
            if POSTGRESQL_RETRYABLE_SQLSTATES.contains(&code) {
                return true;
            }
            if code.starts_with(POSTGRESQL_RETRYABLE_SQLSTATE_CLASS) {
                return true;
            }
        }
    }

    if POSTGRESQL_RETRYABLE_KEYWORDS.iter().any(|k| msg.contains(k)) {
        return true;
    }
    if SQLITE_RETRYABLE_KEYWORDS.iter().any(|k| msg.contains(k)) {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_without_retry_on_ok() {
        let policy = RetryPolicy::default();
        let result: Result<i32, sqlx::Error> =
            policy.run("noop", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn gives_up_immediately_on_non_retryable_error() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<i32, sqlx::Error> = policy
            .run("fails", || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(sqlx::Error::RowNotFound) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
