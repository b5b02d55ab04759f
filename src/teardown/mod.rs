//! Deletion that first lets controllers finish their cleanup and then forces it once.
//!
//! A [ForcedTeardown] target goes through [TeardownState::Cooperative], where deletion is
//! requested and awaited, and on timeout through [TeardownState::Escalating], where the
//! finalizers blocking the deletion are removed and the deletion is awaited a last time with a
//! shorter bound. Escalation happens at most once.
use crate::k8s::Error as K8sError;
use crate::poll::{poll_until, PollError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum TeardownError {
    #[error("k8s error: `{0}`")]
    K8s(#[from] K8sError),

    #[error("{target} still present after removing {stripped} finalizer lists and waiting {retry_timeout:?}")]
    StillPresent {
        target: String,
        stripped: usize,
        retry_timeout: Duration,
    },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForcedTeardown: Send + Sync {
    /// Human readable description of what is being deleted.
    fn target(&self) -> String;

    async fn request_deletion(&self) -> Result<(), TeardownError>;

    async fn is_gone(&self) -> Result<bool, TeardownError>;

    /// Removes the finalizers of every related object, returning how many objects were patched.
    async fn strip_finalizers(&self) -> Result<usize, TeardownError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownPolicy {
    pub graceful_timeout: Duration,
    pub retry_timeout: Duration,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Graceful,
    Forced { stripped: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownState {
    Cooperative,
    Escalating,
    Done(TeardownOutcome),
    Failed { stripped: usize },
}

async fn wait_gone(
    target: &dyn ForcedTeardown,
    timeout: Duration,
    interval: Duration,
) -> Result<bool, TeardownError> {
    match poll_until(timeout, interval, || target.is_gone()).await {
        Ok(()) => Ok(true),
        Err(PollError::Timeout(_)) => Ok(false),
        Err(PollError::Failed(err)) => Err(err),
    }
}

/// Runs the teardown state machine until it reaches `Done` or `Failed`.
pub async fn teardown(
    target: &dyn ForcedTeardown,
    policy: &TeardownPolicy,
) -> Result<TeardownOutcome, TeardownError> {
    let mut state = TeardownState::Cooperative;
    loop {
        state = match state {
            TeardownState::Cooperative => {
                target.request_deletion().await?;
                if wait_gone(target, policy.graceful_timeout, policy.interval).await? {
                    TeardownState::Done(TeardownOutcome::Graceful)
                } else {
                    warn!(
                        resource = target.target(),
                        timeout = ?policy.graceful_timeout,
                        "graceful deletion timed out, removing finalizers"
                    );
                    TeardownState::Escalating
                }
            }
            TeardownState::Escalating => {
                let stripped = target.strip_finalizers().await?;
                if wait_gone(target, policy.retry_timeout, policy.interval).await? {
                    TeardownState::Done(TeardownOutcome::Forced { stripped })
                } else {
                    TeardownState::Failed { stripped }
                }
            }
            TeardownState::Done(outcome) => {
                info!(resource = target.target(), ?outcome, "deleted");
                return Ok(outcome);
            }
            TeardownState::Failed { stripped } => {
                return Err(TeardownError::StillPresent {
                    target: target.target(),
                    stripped,
                    retry_timeout: policy.retry_timeout,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn policy() -> TeardownPolicy {
        TeardownPolicy {
            graceful_timeout: Duration::from_millis(20),
            retry_timeout: Duration::from_millis(10),
            interval: Duration::from_millis(2),
        }
    }

    fn target() -> MockForcedTeardown {
        let mut target = MockForcedTeardown::new();
        target
            .expect_target()
            .returning(|| "HostedCluster clusters/guest".to_string());
        target
    }

    #[tokio::test]
    async fn test_graceful_deletion_does_not_escalate() {
        let mut target = target();
        target.expect_request_deletion().times(1).returning(|| Ok(()));
        let calls = AtomicUsize::new(0);
        target.expect_is_gone().returning(move || {
            Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2)
        });
        target.expect_strip_finalizers().never();

        let outcome = teardown(&target, &policy()).await.unwrap();
        assert_eq!(outcome, TeardownOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_escalation_deletes_after_stripping() {
        let stripped = Arc::new(AtomicBool::new(false));
        let mut target = target();
        target.expect_request_deletion().times(1).returning(|| Ok(()));
        let flag = stripped.clone();
        target
            .expect_is_gone()
            .returning(move || Ok(flag.load(Ordering::SeqCst)));
        let flag = stripped.clone();
        target.expect_strip_finalizers().times(1).returning(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(5)
        });

        let outcome = teardown(&target, &policy()).await.unwrap();
        assert_eq!(outcome, TeardownOutcome::Forced { stripped: 5 });
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stuck_deletion_escalates_exactly_once() {
        let stripped = Arc::new(AtomicBool::new(false));
        let checks_after_strip = Arc::new(AtomicUsize::new(0));

        let mut target = target();
        target.expect_request_deletion().times(1).returning(|| Ok(()));
        let (flag, counter) = (stripped.clone(), checks_after_strip.clone());
        target.expect_is_gone().returning(move || {
            if flag.load(Ordering::SeqCst) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(false)
        });
        let flag = stripped.clone();
        target.expect_strip_finalizers().times(1).returning(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(3)
        });

        let started = tokio::time::Instant::now();
        let err = teardown(&target, &policy()).await.unwrap_err();
        assert_matches!(err, TeardownError::StillPresent { stripped: 3, .. });
        // a single bounded retry wait followed the strip
        let checks = checks_after_strip.load(Ordering::SeqCst);
        assert!(checks >= 1);
        assert!(checks <= 10);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(logs_contain("graceful deletion timed out"));
    }

    #[tokio::test]
    async fn test_errors_abort_the_teardown() {
        let mut target = target();
        target.expect_request_deletion().times(1).returning(|| Ok(()));
        target
            .expect_is_gone()
            .times(1)
            .returning(|| Err(TeardownError::K8s(K8sError::MissingField("metadata.name".to_string()))));
        target.expect_strip_finalizers().never();

        let err = teardown(&target, &policy()).await.unwrap_err();
        assert_matches!(err, TeardownError::K8s(_));
    }
}
