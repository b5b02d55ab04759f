use super::error::LifecycleError;
use super::log_filter::LogFilter;
use super::phase::Phase;
use crate::driver::{OperationDriver, OperationRef};
use crate::poll::PollSchedule;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Returns true once `phase` is no longer one of the in-progress phases.
pub fn is_done(phase: &Phase) -> bool {
    phase.is_done()
}

/// Polls the phase of `op` every `interval` until it is done, for at most `timeout`.
///
/// Returns the phase that ended the wait. Errors reading the phase are not retried.
pub async fn wait_until_done(
    driver: &dyn OperationDriver,
    op: &OperationRef,
    timeout: Duration,
    interval: Duration,
) -> Result<Phase, LifecycleError> {
    let schedule = PollSchedule::new(timeout, interval);
    loop {
        let phase = driver.phase(op).await?;
        if is_done(&phase) {
            info!(operation = %op, %phase, "operation done");
            return Ok(phase);
        }
        debug!(operation = %op, %phase, "operation still running");
        if !schedule.wait_next().await {
            warn!(operation = %op, %phase, ?timeout, "timed out waiting for operation");
            return Err(LifecycleError::WaitTimeout {
                op: op.clone(),
                timeout,
                last_phase: phase,
            });
        }
    }
}

/// Reads the phase of `op` once more and succeeds only if it is `Completed`.
///
/// On any other phase the failure carries the filtered error lines of the operation logs.
pub async fn verify_completed(
    driver: &dyn OperationDriver,
    op: &OperationRef,
    log_filter: &LogFilter,
) -> Result<(), LifecycleError> {
    let observed = driver.phase(op).await?;
    if observed.is_completed() {
        info!(operation = %op, "operation completed");
        return Ok(());
    }

    let logs = match driver.logs(op).await {
        Ok(lines) => log_filter.filter(&lines),
        Err(err) => {
            warn!(operation = %op, %err, "could not read operation logs");
            vec![format!("logs unavailable: {err}")]
        }
    };
    Err(LifecycleError::NotCompleted {
        op: op.clone(),
        observed,
        expected: Phase::Completed,
        logs,
    })
}

/// Waits for `op` to be done and then verifies it completed.
pub async fn wait_and_verify(
    driver: &dyn OperationDriver,
    op: &OperationRef,
    timeout: Duration,
    interval: Duration,
    log_filter: &LogFilter,
) -> Result<(), LifecycleError> {
    wait_until_done(driver, op, timeout, interval).await?;
    verify_completed(driver, op, log_filter).await
}
