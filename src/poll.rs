use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Default interval between two consecutive reads of a polled resource.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed-interval schedule bounded by a deadline.
///
/// The caller performs its check first and then calls [PollSchedule::wait_next], which sleeps
/// until the next attempt or returns `false` once the deadline has been reached. The sleep is
/// cut short at the deadline, so a last check always happens right at the end of the window.
pub struct PollSchedule {
    deadline: Instant,
    interval: Duration,
}

impl PollSchedule {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            interval,
        }
    }

    pub async fn wait_next(&self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        tokio::time::sleep(self.interval.min(self.deadline - now)).await;
        true
    }
}

#[derive(Debug, PartialEq)]
pub enum PollError<E> {
    Timeout(Duration),
    Failed(E),
}

/// Calls `condition` every `interval` until it returns `Ok(true)`, fails or `timeout` elapses.
/// Errors returned by `condition` stop the polling right away.
pub async fn poll_until<F, Fut, E>(
    timeout: Duration,
    interval: Duration,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let schedule = PollSchedule::new(timeout, interval);
    loop {
        if condition().await.map_err(PollError::Failed)? {
            return Ok(());
        }
        if !schedule.wait_next().await {
            return Err(PollError::Timeout(timeout));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_until_succeeds_after_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), PollError<String>> =
            poll_until(Duration::from_secs(5), Duration::from_millis(1), || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(attempt == 3) }
            })
            .await;
        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let timeout = Duration::from_millis(20);
        let result: Result<(), PollError<String>> =
            poll_until(timeout, Duration::from_millis(5), || async { Ok(false) }).await;
        assert_eq!(result, Err(PollError::Timeout(timeout)));
    }

    #[tokio::test]
    async fn test_poll_until_does_not_retry_errors() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(Duration::from_secs(5), Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<bool, _>("api unavailable".to_string()) }
        })
        .await;
        assert_eq!(result, Err(PollError::Failed("api unavailable".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_checks_once() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), PollError<String>> =
            poll_until(Duration::ZERO, Duration::from_secs(10), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            })
            .await;
        assert_eq!(result, Err(PollError::Timeout(Duration::ZERO)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
