//! Surfaces through which Backup and Restore operations are created and observed.
//!
//! [api::ApiDriver] talks to the Kubernetes API with typed resources and [cli::CliDriver] goes
//! through the `kubectl oadp` plugin. Both implement [OperationDriver] so every orchestrator can
//! run over either of them.
pub mod api;
pub mod cli;
pub mod error;

pub use error::DriverError;

use crate::config::BackupType;
use crate::lifecycle::phase::Phase;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Backup,
    Restore,
}

impl OperationKind {
    /// Name of the resource as used by the `kubectl oadp` subcommands.
    pub fn command(&self) -> &'static str {
        match self {
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Backup => f.write_str("Backup"),
            OperationKind::Restore => f.write_str("Restore"),
        }
    }
}

/// Identifies an operation in the OADP namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRef {
    pub kind: OperationKind,
    pub name: String,
}

impl OperationRef {
    pub fn backup(name: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Backup,
            name: name.into(),
        }
    }

    pub fn restore(name: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Restore,
            name: name.into(),
        }
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupRequest {
    pub name: String,
    pub included_namespaces: Vec<String>,
    pub included_resources: Vec<String>,
    pub storage_location: Option<String>,
    pub backup_type: BackupType,
    pub ttl: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRequest {
    pub name: String,
    pub backup_name: String,
    pub included_namespaces: Vec<String>,
    pub restore_pvs: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationRequest {
    Backup(BackupRequest),
    Restore(RestoreRequest),
}

impl OperationRequest {
    pub fn operation(&self) -> OperationRef {
        match self {
            OperationRequest::Backup(b) => OperationRef::backup(b.name.clone()),
            OperationRequest::Restore(r) => OperationRef::restore(r.name.clone()),
        }
    }
}

/// Volume handling flags applied to a Backup for each backup type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VolumeFlags {
    pub snapshot_volumes: Option<bool>,
    pub default_volumes_to_fs_backup: Option<bool>,
    pub snapshot_move_data: Option<bool>,
}

impl From<BackupType> for VolumeFlags {
    fn from(backup_type: BackupType) -> Self {
        match backup_type {
            BackupType::Csi | BackupType::Native => VolumeFlags {
                snapshot_volumes: Some(true),
                default_volumes_to_fs_backup: Some(false),
                snapshot_move_data: None,
            },
            BackupType::Filesystem => VolumeFlags {
                snapshot_volumes: None,
                default_volumes_to_fs_backup: Some(true),
                snapshot_move_data: None,
            },
            BackupType::Datamover => VolumeFlags {
                snapshot_volumes: Some(true),
                default_volumes_to_fs_backup: Some(false),
                snapshot_move_data: Some(true),
            },
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OperationDriver: Send + Sync {
    /// Creates the Backup or Restore. Any failure is fatal for the calling test case.
    async fn create(&self, request: &OperationRequest) -> Result<(), DriverError>;

    /// Reads the current phase of the operation.
    async fn phase(&self, op: &OperationRef) -> Result<Phase, DriverError>;

    /// Returns the log lines related to the operation.
    async fn logs(&self, op: &OperationRef) -> Result<Vec<String>, DriverError>;

    /// Returns a human readable description of the operation, used for diagnostics.
    async fn describe(&self, op: &OperationRef) -> Result<String, DriverError>;

    /// Deletes the operation resource. Deleting a missing operation is not an error.
    async fn delete(&self, op: &OperationRef) -> Result<(), DriverError>;
}
