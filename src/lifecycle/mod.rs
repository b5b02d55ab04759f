//! Waiting for Backup and Restore operations to finish and checking how they ended.
pub mod error;
pub mod log_filter;
pub mod phase;
pub mod waiter;

pub use error::LifecycleError;
pub use log_filter::LogFilter;
pub use phase::Phase;
