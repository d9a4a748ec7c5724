//! Bounded-retry bootstrap for the parts of startup that depend on a
//! network-reachable secret store.
//!
//! §7 of the issuance design calls for `TransientIoFailure` during startup
//! to retry with exponential backoff up to a fixed ceiling, then refuse to
//! start rather than serve with a half-initialized keyring. This is the one
//! place that ceiling is enforced; everywhere else a secret-store error is
//! just propagated to the caller.

use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
#[error("startup step did not succeed after {attempts} attempts: {last_error}")]
pub struct StartupRetriesExhausted<E: std::fmt::Display + std::fmt::Debug> {
    attempts: u32,
    last_error: E,
}

/// Retries `f` with exponential backoff (250ms, 500ms, 1s, 2s, 4s) up to
/// [`MAX_ATTEMPTS`] times. Returns the last error if the ceiling is hit.
pub async fn with_backoff<T, E, F, Fut>(
    mut f: F,
) -> Result<T, StartupRetriesExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + std::fmt::Debug,
{
    let mut delay = BASE_DELAY;
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(attempt, max = MAX_ATTEMPTS, %err, "startup step failed, retrying");
                last_err = Some(err);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(StartupRetriesExhausted {
        attempts: MAX_ATTEMPTS,
        last_error: last_err.expect("loop ran at least once"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_the_underlying_call_does() {
        let attempts = AtomicU32::new(0);
        let result: Result<&str, _> = with_backoff(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok("ready")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ready");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_ceiling() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("always fails") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
