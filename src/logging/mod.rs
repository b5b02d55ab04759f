use std::fmt::Debug;
use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),

    #[error("invalid log level `{0}`")]
    InvalidLevel(String),
}

pub struct Logging;

impl Logging {
    /// Installs the global subscriber. `RUST_LOG` directives take precedence over `level`.
    pub fn try_init(level: &str) -> Result<(), LoggingError> {
        let default_level: LevelFilter = level
            .parse()
            .map_err(|_| LoggingError::InvalidLevel(level.to_string()))?;

        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(default_level.into())
                    .from_env_lossy(),
            )
            .fmt_fields(PrettyFields::new())
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError("unable to set the global logging subscriber".to_string())
            })
    }
}
