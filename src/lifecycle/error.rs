use super::phase::Phase;
use crate::driver::{DriverError, OperationRef};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("{op} not done after {timeout:?}, last observed phase: `{last_phase}`")]
    WaitTimeout {
        op: OperationRef,
        timeout: Duration,
        last_phase: Phase,
    },

    #[error("{op} finished with phase `{observed}`, expected `{expected}`\nerror logs:\n{}", .logs.join("\n"))]
    NotCompleted {
        op: OperationRef,
        observed: Phase,
        expected: Phase,
        logs: Vec<String>,
    },

    #[error("{0}")]
    Driver(#[from] DriverError),
}
