use std::fmt;

/// Lifecycle phase of a Backup or Restore as reported by Velero in `status.phase`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    /// No phase reported yet.
    #[default]
    Unknown,
    New,
    FailedValidation,
    InProgress,
    WaitingForPluginOperations,
    WaitingForPluginOperationsPartiallyFailed,
    Finalizing,
    FinalizingPartiallyFailed,
    Completed,
    PartiallyFailed,
    Failed,
    Deleting,
    Other(String),
}

impl Phase {
    /// Returns true once the operation has left every in-progress phase.
    ///
    /// Finished does not mean succeeded: `Failed` and `PartiallyFailed` are done too.
    pub fn is_done(&self) -> bool {
        !matches!(
            self,
            Phase::Unknown
                | Phase::New
                | Phase::InProgress
                | Phase::WaitingForPluginOperations
                | Phase::WaitingForPluginOperationsPartiallyFailed
                | Phase::Finalizing
                | Phase::FinalizingPartiallyFailed
        )
    }

    /// Returns true only for the single successful terminal phase.
    pub fn is_completed(&self) -> bool {
        matches!(self, Phase::Completed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Phase::Unknown => "",
            Phase::New => "New",
            Phase::FailedValidation => "FailedValidation",
            Phase::InProgress => "InProgress",
            Phase::WaitingForPluginOperations => "WaitingForPluginOperations",
            Phase::WaitingForPluginOperationsPartiallyFailed => {
                "WaitingForPluginOperationsPartiallyFailed"
            }
            Phase::Finalizing => "Finalizing",
            Phase::FinalizingPartiallyFailed => "FinalizingPartiallyFailed",
            Phase::Completed => "Completed",
            Phase::PartiallyFailed => "PartiallyFailed",
            Phase::Failed => "Failed",
            Phase::Deleting => "Deleting",
            Phase::Other(other) => other.as_str(),
        }
    }
}

impl From<&str> for Phase {
    fn from(value: &str) -> Self {
        match value.trim() {
            "" => Phase::Unknown,
            "New" => Phase::New,
            "FailedValidation" => Phase::FailedValidation,
            "InProgress" => Phase::InProgress,
            "WaitingForPluginOperations" => Phase::WaitingForPluginOperations,
            "WaitingForPluginOperationsPartiallyFailed" => {
                Phase::WaitingForPluginOperationsPartiallyFailed
            }
            "Finalizing" => Phase::Finalizing,
            "FinalizingPartiallyFailed" => Phase::FinalizingPartiallyFailed,
            "Completed" => Phase::Completed,
            "PartiallyFailed" => Phase::PartiallyFailed,
            "Failed" => Phase::Failed,
            "Deleting" => Phase::Deleting,
            other => Phase::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts the phase from the textual `describe` output of an operation.
///
/// Returns the value of the first line whose trimmed form starts with `phase:`, or an empty string
/// when there is none. Nesting is not taken into account, the first match wins, so this must only
/// be used on output that has no structured alternative.
pub fn parse_phase(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("phase:"))
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}
