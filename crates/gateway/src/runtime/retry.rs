//! Backoff policy for transient provider failures.
//!
//! Exponential with jitter, capped per sleep, bounded by a wall-clock
//! budget across the whole step, and overridden by any server-supplied
//! retry-after. Sleeps are cancellable: an abort during backoff raises
//! `Aborted` instead of finishing the wait.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sy_domain::config::RetryConfig;
use sy_domain::error::Error;

/// Compute the bounded delay before attempt `attempt` (1-based).
/// Returns `None` when the wall-clock budget is exhausted.
pub fn bounded_delay(
    config: &RetryConfig,
    error: &Error,
    attempt: u32,
    started: Instant,
) -> Option<Duration> {
    let elapsed = started.elapsed();
    let budget = Duration::from_millis(config.budget_ms);
    if elapsed >= budget {
        return None;
    }
    let remaining = budget - elapsed;

    // Server hint wins over the exponential schedule, but still respects
    // the remaining budget.
    if let Some(secs) = error.retry_after() {
        let hinted = Duration::from_secs(secs);
        return Some(hinted.min(remaining));
    }

    let exp = config
        .base_delay_ms
        .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let capped = exp.min(config.max_delay_ms);
    // Full jitter: anywhere in (capped/2, capped].
    let jittered = rand::thread_rng().gen_range((capped / 2).max(1)..=capped.max(1));
    Some(Duration::from_millis(jittered).min(remaining))
}

/// Sleep under the turn's cancellation token.
pub async fn sleep_cancellable(
    delay: Duration,
    abort: &CancellationToken,
) -> Result<(), Error> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = abort.cancelled() => Err(Error::Aborted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            chat_max_retries: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            budget_ms: 300_000,
        }
    }

    fn transient(retry_after: Option<u64>) -> Error {
        Error::Provider {
            provider: "test".into(),
            message: "overloaded".into(),
            retryable: true,
            retry_after,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delay_grows_and_caps() {
        let config = config();
        let started = Instant::now();
        let d1 = bounded_delay(&config, &transient(None), 1, started).unwrap();
        assert!(d1 <= Duration::from_millis(1_000));

        let d8 = bounded_delay(&config, &transient(None), 8, started).unwrap();
        assert!(d8 <= Duration::from_millis(30_000));
        assert!(d8 >= Duration::from_millis(15_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_wins() {
        let config = config();
        let started = Instant::now();
        let d = bounded_delay(&config, &transient(Some(7)), 1, started).unwrap();
        assert_eq!(d, Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_stops_retrying() {
        let config = RetryConfig {
            budget_ms: 50,
            ..config()
        };
        let started = Instant::now();
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(bounded_delay(&config, &transient(None), 2, started).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_clamped_to_remaining_budget() {
        let config = RetryConfig {
            budget_ms: 5_000,
            ..config()
        };
        let started = Instant::now();
        tokio::time::advance(Duration::from_millis(4_500)).await;
        let d = bounded_delay(&config, &transient(Some(60)), 1, started).unwrap();
        assert!(d <= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_sleep_raises_aborted() {
        let abort = CancellationToken::new();
        let sleeper = {
            let abort = abort.clone();
            tokio::spawn(async move {
                sleep_cancellable(Duration::from_secs(60), &abort).await
            })
        };
        tokio::time::advance(Duration::from_secs(1)).await;
        abort.cancel();
        let result = sleeper.await.unwrap();
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancel() {
        let abort = CancellationToken::new();
        let wait = sleep_cancellable(Duration::from_millis(10), &abort);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(wait.await.is_ok());
    }
}
