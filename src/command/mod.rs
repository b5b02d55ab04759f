use async_trait::async_trait;
use std::fmt;
use tokio::process::Command;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("failed to execute `{command}`: `{source}`")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code:?}\nStdout: {stdout}\nStderr: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl CommandError {
    /// Returns true when the command failed reporting that the target object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            CommandError::Failed { stdout, stderr, .. } => {
                let output = format!("{stdout}\n{stderr}").to_lowercase();
                output.contains("not found")
            }
            CommandError::Spawn { .. } => false,
        }
    }
}

/// Captured output of a successful command.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Executes `program` with `args` and returns its output, a non-zero exit code is an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        let command = CommandLine(program, args).to_string();
        debug!(%command, "executing command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(CommandError::Failed {
                command,
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

struct CommandLine<'a>(&'a str, &'a [String]);

impl fmt::Display for CommandLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)?;
        for arg in self.1 {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
