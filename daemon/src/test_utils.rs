//! Polling helpers for async tests
//!
//! Background work in the daemon (sidecar writes, eviction sweeps, session
//! teardown) finishes on its own schedule. These helpers wait for its effect
//! with a deadline instead of sleeping for a guessed amount of time.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry `f` every `interval` until it returns `Ok`, panicking after `timeout`.
///
/// Returns the `Ok` value. The panic message includes `desc`, the attempt
/// count and the last error.
///
/// ```rust,ignore
/// let records = assert_eventually(
///     "sidecar to hold one annotation",
///     Duration::from_secs(2),
///     Duration::from_millis(20),
///     || async {
///         match sidecar::load(&path) {
///             Ok(records) if records.len() == 1 => Ok(records),
///             Ok(records) => Err(format!("{} records", records.len())),
///             Err(e) => Err(e.to_string()),
///         }
///     },
/// )
/// .await;
/// ```
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let last_error = match f().await {
            Ok(value) => return value,
            Err(e) => e.to_string(),
        };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            panic!(
                "Timeout waiting for {}\n\
                 Duration: {:?}\n\
                 Attempts: {}\n\
                 Last error: {}",
                desc, elapsed, attempt, last_error
            );
        }

        tokio::time::sleep(interval).await;
    }
}

/// `assert_eventually` for a plain boolean condition.
pub async fn assert_eventually_bool<F, Fut>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert_eventually(desc, timeout, interval, || {
        let fut = f();
        async move {
            if fut.await {
                Ok(())
            } else {
                Err("condition never became true")
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_assert_eventually_returns_value() {
        let value = assert_eventually(
            "immediate success",
            Duration::from_secs(1),
            Duration::from_millis(10),
            || async { Ok::<_, &str>(42) },
        )
        .await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_assert_eventually_retries_until_ok() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let seen = assert_eventually(
            "third attempt",
            Duration::from_secs(2),
            Duration::from_millis(10),
            move || {
                let c = Arc::clone(&counter);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n >= 2 {
                        Ok(n)
                    } else {
                        Err(format!("attempt {}", n))
                    }
                }
            },
        )
        .await;

        assert_eq!(seen, 2);
    }

    #[tokio::test]
    #[should_panic(expected = "Timeout waiting for sidecar that never appears")]
    async fn test_assert_eventually_times_out() {
        assert_eventually(
            "sidecar that never appears",
            Duration::from_millis(100),
            Duration::from_millis(20),
            || async { Err::<(), _>("missing") },
        )
        .await;
    }

    #[tokio::test]
    async fn test_assert_eventually_bool_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        assert_eventually_bool(
            "counter reaches 2",
            Duration::from_secs(2),
            Duration::from_millis(10),
            move || {
                let c = Arc::clone(&counter);
                async move { c.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
        )
        .await;

        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    #[should_panic(expected = "condition never became true")]
    async fn test_assert_eventually_bool_times_out() {
        assert_eventually_bool(
            "never true",
            Duration::from_millis(100),
            Duration::from_millis(20),
            || async { false },
        )
        .await;
    }
}
