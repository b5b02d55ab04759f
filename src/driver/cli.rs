use super::{
    BackupRequest, DriverError, OperationDriver, OperationKind, OperationRef, OperationRequest,
    RestoreRequest, VolumeFlags,
};
use crate::command::{CommandRunner, ProcessRunner};
use crate::k8s::crd::{Backup, Restore};
use crate::lifecycle::phase::Phase;
use async_trait::async_trait;
use tracing::{debug, info};

/// Drives operations through the `kubectl oadp` plugin.
///
/// Structured output (`-o json`) is decoded into the same typed resources the API driver uses.
pub struct CliDriver<R = ProcessRunner> {
    runner: R,
    kubectl: String,
    namespace: String,
}

impl CliDriver<ProcessRunner> {
    pub fn new(kubectl: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_runner(ProcessRunner, kubectl, namespace)
    }
}

impl<R: CommandRunner> CliDriver<R> {
    pub fn with_runner(runner: R, kubectl: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
            namespace: namespace.into(),
        }
    }

    async fn oadp(&self, args: Vec<String>) -> Result<String, DriverError> {
        let mut full_args = vec!["oadp".to_string()];
        full_args.extend(args);
        full_args.extend(["--namespace".to_string(), self.namespace.clone()]);
        let output = self.runner.run(&self.kubectl, &full_args).await?;
        Ok(output.stdout)
    }
}

fn backup_create_args(request: &BackupRequest) -> Vec<String> {
    let mut args = vec![
        "backup".to_string(),
        "create".to_string(),
        request.name.clone(),
    ];
    if !request.included_namespaces.is_empty() {
        args.push(format!(
            "--include-namespaces={}",
            request.included_namespaces.join(",")
        ));
    }
    if !request.included_resources.is_empty() {
        args.push(format!(
            "--include-resources={}",
            request.included_resources.join(",")
        ));
    }
    if let Some(location) = &request.storage_location {
        args.push(format!("--storage-location={location}"));
    }
    if let Some(ttl) = &request.ttl {
        args.push(format!("--ttl={ttl}"));
    }
    let flags = VolumeFlags::from(request.backup_type);
    if let Some(v) = flags.snapshot_volumes {
        args.push(format!("--snapshot-volumes={v}"));
    }
    if let Some(v) = flags.default_volumes_to_fs_backup {
        args.push(format!("--default-volumes-to-fs-backup={v}"));
    }
    if let Some(v) = flags.snapshot_move_data {
        args.push(format!("--snapshot-move-data={v}"));
    }
    args
}

fn restore_create_args(request: &RestoreRequest) -> Vec<String> {
    let mut args = vec![
        "restore".to_string(),
        "create".to_string(),
        request.name.clone(),
        format!("--from-backup={}", request.backup_name),
    ];
    if !request.included_namespaces.is_empty() {
        args.push(format!(
            "--include-namespaces={}",
            request.included_namespaces.join(",")
        ));
    }
    if let Some(v) = request.restore_pvs {
        args.push(format!("--restore-volumes={v}"));
    }
    args
}

fn decode_phase(op: &OperationRef, json: &str) -> Result<Phase, DriverError> {
    let decoded = match op.kind {
        OperationKind::Backup => serde_json::from_str::<Backup>(json).map(|b| b.phase()),
        OperationKind::Restore => serde_json::from_str::<Restore>(json).map(|r| r.phase()),
    };
    decoded.map_err(|err| DriverError::Decode(op.clone(), err))
}

#[async_trait]
impl<R: CommandRunner> OperationDriver for CliDriver<R> {
    async fn create(&self, request: &OperationRequest) -> Result<(), DriverError> {
        let args = match request {
            OperationRequest::Backup(b) => backup_create_args(b),
            OperationRequest::Restore(r) => restore_create_args(r),
        };
        self.oadp(args).await?;
        info!(operation = %request.operation(), "operation created with kubectl oadp");
        Ok(())
    }

    async fn phase(&self, op: &OperationRef) -> Result<Phase, DriverError> {
        let args = vec![
            op.kind.command().to_string(),
            "get".to_string(),
            op.name.clone(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let json = self.oadp(args).await.map_err(|err| match err {
            DriverError::Command(e) if e.is_not_found() => DriverError::NotFound(op.clone()),
            other => other,
        })?;
        let phase = decode_phase(op, &json)?;
        debug!(operation = %op, %phase, "phase read with kubectl oadp");
        Ok(phase)
    }

    async fn logs(&self, op: &OperationRef) -> Result<Vec<String>, DriverError> {
        let args = vec![
            op.kind.command().to_string(),
            "logs".to_string(),
            op.name.clone(),
        ];
        let output = self.oadp(args).await?;
        Ok(output.lines().map(str::to_string).collect())
    }

    async fn describe(&self, op: &OperationRef) -> Result<String, DriverError> {
        let args = vec![
            op.kind.command().to_string(),
            "describe".to_string(),
            op.name.clone(),
            "--details".to_string(),
        ];
        self.oadp(args).await
    }

    async fn delete(&self, op: &OperationRef) -> Result<(), DriverError> {
        let args = vec![
            op.kind.command().to_string(),
            "delete".to_string(),
            op.name.clone(),
            "--confirm".to_string(),
        ];
        match self.oadp(args).await {
            Ok(_) => Ok(()),
            Err(DriverError::Command(e)) if e.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}
