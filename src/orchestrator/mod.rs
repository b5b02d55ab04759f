//! Backup and restore of a single application test case.
//!
//! [CaseRunner::run] walks the case through a fixed sequence of stages: the workloads are
//! deployed and checked, a Backup is created, awaited and verified, the namespaces are deleted,
//! a Restore is created, awaited and verified and the workloads are checked again. Whatever the
//! outcome, diagnostics are gathered on failure and everything the case created is removed.
use crate::config::{BackupType, CaseConfig, Verification};
use crate::driver::{
    BackupRequest, DriverError, OperationDriver, OperationKind, OperationRef, OperationRequest,
    RestoreRequest,
};
use crate::lifecycle::phase::parse_phase;
use crate::lifecycle::waiter::{verify_completed, wait_until_done};
use crate::lifecycle::{LifecycleError, LogFilter};
use crate::run_log::RunLog;
use crate::workload::{WorkloadError, Workloads};
use std::time::Duration;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum CaseError {
    #[error("case `{0}` has no namespaces")]
    NoNamespace(String),

    #[error("creating {0}: {1}")]
    Create(OperationRef, DriverError),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("{0}")]
    Workload(#[from] WorkloadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Idle,
    WorkloadsReady { deployment_configs: bool },
    ResourceCreated(OperationRef),
    Polling(OperationRef),
    Verified { op: OperationRef, success: bool },
    NamespacesDeleted,
    PostRestoreScript,
    WorkloadsRestored,
    LogsCollected,
    TornDown,
}

#[derive(Debug)]
pub struct CaseReport {
    pub stages: Vec<Stage>,
    pub result: Result<(), CaseError>,
    /// Cleanup failures, they never change the result of the case.
    pub teardown_errors: Vec<String>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Name of the operation of `kind` for an attempt of `case`.
pub fn operation_name(case: &str, kind: OperationKind, suffix: &str) -> String {
    format!("{case}-{}-{suffix}", kind.command())
}

#[derive(Debug, Clone)]
pub struct CaseSettings {
    pub storage_location: String,
    pub verification_timeout: Duration,
    pub poll_interval: Duration,
    pub log_filter: LogFilter,
}

pub struct CaseRunner<'a> {
    driver: &'a dyn OperationDriver,
    workloads: &'a dyn Workloads,
    settings: &'a CaseSettings,
}

struct Attempt<'c> {
    case: &'c CaseConfig,
    backup: OperationRef,
    restore: OperationRef,
    created: Vec<OperationRef>,
    stages: Vec<Stage>,
}

impl<'a> CaseRunner<'a> {
    pub fn new(
        driver: &'a dyn OperationDriver,
        workloads: &'a dyn Workloads,
        settings: &'a CaseSettings,
    ) -> Self {
        Self {
            driver,
            workloads,
            settings,
        }
    }

    /// Runs the case. `suffix` makes the operation names unique per attempt.
    pub async fn run(&self, case: &CaseConfig, suffix: &str, log: &mut RunLog) -> CaseReport {
        let mut attempt = Attempt {
            case,
            backup: OperationRef::backup(operation_name(&case.name, OperationKind::Backup, suffix)),
            restore: OperationRef::restore(operation_name(
                &case.name,
                OperationKind::Restore,
                suffix,
            )),
            created: Vec::new(),
            stages: vec![Stage::Idle],
        };

        let result = self.execute(&mut attempt).await;
        if let Err(err) = &result {
            warn!(case = case.name, %err, "case failed, collecting logs");
            log.push(err.to_string());
            self.collect_logs(&attempt, log).await;
            attempt.stages.push(Stage::LogsCollected);
        }
        let teardown_errors = self.teardown(&attempt).await;
        attempt.stages.push(Stage::TornDown);

        CaseReport {
            stages: attempt.stages,
            result,
            teardown_errors,
        }
    }

    async fn execute(&self, attempt: &mut Attempt<'_>) -> Result<(), CaseError> {
        let case = attempt.case;
        let namespace = case
            .primary_namespace()
            .ok_or_else(|| CaseError::NoNamespace(case.name.clone()))?;

        for ns in &case.namespaces {
            self.workloads.ensure_namespace(ns, &case.name).await?;
        }
        self.workloads
            .apply_manifests(namespace, &case.manifests)
            .await?;
        self.run_verifications(namespace, &case.pre_backup).await?;
        // Evaluated once before the backup, the restored namespace is not inspected again.
        let deployment_configs = self.workloads.has_deployment_configs(namespace).await?;
        attempt
            .stages
            .push(Stage::WorkloadsReady { deployment_configs });

        let backup = OperationRequest::Backup(BackupRequest {
            name: attempt.backup.name.clone(),
            included_namespaces: case.namespaces.clone(),
            included_resources: Vec::new(),
            storage_location: Some(self.settings.storage_location.clone()),
            backup_type: case.backup_type,
            ttl: None,
        });
        self.run_operation(attempt, backup).await?;

        for ns in &case.namespaces {
            self.workloads.delete_namespace(ns).await?;
        }
        attempt.stages.push(Stage::NamespacesDeleted);

        let restore = OperationRequest::Restore(RestoreRequest {
            name: attempt.restore.name.clone(),
            backup_name: attempt.backup.name.clone(),
            included_namespaces: Vec::new(),
            restore_pvs: Some(restores_volumes(case.backup_type)),
        });
        self.run_operation(attempt, restore).await?;

        if deployment_configs {
            self.workloads
                .run_post_restore_script(&attempt.restore.name)
                .await?;
            attempt.stages.push(Stage::PostRestoreScript);
        }
        self.run_verifications(namespace, &case.post_restore).await?;
        attempt.stages.push(Stage::WorkloadsRestored);
        info!(case = case.name, "case passed");
        Ok(())
    }

    async fn run_operation(
        &self,
        attempt: &mut Attempt<'_>,
        request: OperationRequest,
    ) -> Result<(), CaseError> {
        let op = request.operation();
        self.driver
            .create(&request)
            .await
            .map_err(|err| CaseError::Create(op.clone(), err))?;
        attempt.created.push(op.clone());
        attempt.stages.push(Stage::ResourceCreated(op.clone()));

        attempt.stages.push(Stage::Polling(op.clone()));
        wait_until_done(
            self.driver,
            &op,
            attempt.case.timeout,
            self.settings.poll_interval,
        )
        .await?;

        let verified = verify_completed(self.driver, &op, &self.settings.log_filter).await;
        attempt.stages.push(Stage::Verified {
            op,
            success: verified.is_ok(),
        });
        verified.map_err(CaseError::from)
    }

    async fn run_verifications(
        &self,
        namespace: &str,
        verifications: &[Verification],
    ) -> Result<(), CaseError> {
        for verification in verifications {
            self.workloads
                .verify(namespace, verification, self.settings.verification_timeout)
                .await?;
        }
        Ok(())
    }

    async fn collect_logs(&self, attempt: &Attempt<'_>, log: &mut RunLog) {
        collect_operation_diagnostics(self.driver, &attempt.created, log).await;
        for ns in &attempt.case.namespaces {
            match self.workloads.pod_summary(ns).await {
                Ok(lines) => log.section(&format!("pods {ns}"), lines),
                Err(err) => log.push(format!("pods {ns} failed: {err}")),
            }
        }
    }

    async fn teardown(&self, attempt: &Attempt<'_>) -> Vec<String> {
        let mut errors = Vec::new();
        for op in [&attempt.restore, &attempt.backup] {
            if let Err(err) = self.driver.delete(op).await {
                warn!(operation = %op, %err, "cleanup failed");
                errors.push(err.to_string());
            }
        }
        for ns in &attempt.case.namespaces {
            if let Err(err) = self.workloads.delete_namespace(ns).await {
                warn!(namespace = ns, %err, "cleanup failed");
                errors.push(err.to_string());
            }
        }
        errors
    }
}

/// Appends the description and the logs of each operation to `log`.
///
/// Only operations that were actually created should be passed, a missing one only adds noise.
pub async fn collect_operation_diagnostics(
    driver: &dyn OperationDriver,
    ops: &[OperationRef],
    log: &mut RunLog,
) {
    for op in ops {
        match driver.describe(op).await {
            Ok(text) => {
                let phase = parse_phase(&text);
                if !phase.is_empty() {
                    log.push(format!("{op} described with phase `{phase}`"));
                }
                log.section(&format!("describe {op}"), text.lines());
            }
            Err(err) => log.push(format!("describe {op} failed: {err}")),
        }
        match driver.logs(op).await {
            Ok(lines) => log.section(&format!("logs {op}"), lines),
            Err(err) => log.push(format!("logs {op} failed: {err}")),
        }
    }
}

/// File system and data mover backups hold the volume data, snapshots are restored by Velero.
fn restores_volumes(backup_type: BackupType) -> bool {
    !matches!(backup_type, BackupType::Native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockOperationDriver;
    use crate::lifecycle::Phase;
    use crate::workload::MockWorkloads;
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    fn case() -> CaseConfig {
        CaseConfig {
            name: "mysql".to_string(),
            namespaces: vec!["mysql-persistent".to_string()],
            backup_type: BackupType::Csi,
            manifests: vec![PathBuf::from("fixtures/mysql.yaml")],
            pre_backup: vec![Verification::DeploymentsAvailable],
            post_restore: vec![Verification::DeploymentsAvailable],
            timeout: Duration::from_secs(5),
        }
    }

    fn settings() -> CaseSettings {
        CaseSettings {
            storage_location: "ts-dpa-1".to_string(),
            verification_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
            log_filter: LogFilter::default(),
        }
    }

    fn workloads(deployment_configs: bool) -> MockWorkloads {
        let mut w = MockWorkloads::new();
        w.expect_ensure_namespace().returning(|_, _| Ok(()));
        w.expect_apply_manifests().returning(|_, _| Ok(3));
        w.expect_verify().returning(|_, _, _| Ok(()));
        w.expect_has_deployment_configs()
            .times(1)
            .returning(move |_| Ok(deployment_configs));
        w.expect_delete_namespace().returning(|_| Ok(()));
        w.expect_pod_summary()
            .returning(|_| Ok(vec!["mysql-0 Running".to_string()]));
        w
    }

    fn driver(backup_phase: Phase, restore_phase: Phase) -> MockOperationDriver {
        let mut d = MockOperationDriver::new();
        d.expect_create().returning(|_| Ok(()));
        d.expect_phase().returning(move |op| match op.kind {
            OperationKind::Backup => Ok(backup_phase.clone()),
            OperationKind::Restore => Ok(restore_phase.clone()),
        });
        d.expect_delete().times(2).returning(|_| Ok(()));
        d.expect_describe()
            .returning(|_| Ok("phase: PartiallyFailed".to_string()));
        d.expect_logs()
            .returning(|_| Ok(vec!["level=error msg=\"volume failed\"".to_string()]));
        d
    }

    #[test]
    fn test_operation_name() {
        assert_eq!(
            operation_name("mysql", OperationKind::Restore, "1a2b"),
            "mysql-restore-1a2b"
        );
    }

    #[tokio::test]
    async fn test_successful_case_stages() {
        let d = driver(Phase::Completed, Phase::Completed);
        let mut w = workloads(false);
        w.expect_run_post_restore_script().never();
        let settings = settings();
        let mut log = RunLog::new();

        let report = CaseRunner::new(&d, &w, &settings)
            .run(&case(), "x1", &mut log)
            .await;

        assert!(report.passed());
        assert!(log.is_empty());
        let backup = OperationRef::backup("mysql-backup-x1");
        let restore = OperationRef::restore("mysql-restore-x1");
        assert_eq!(
            report.stages,
            vec![
                Stage::Idle,
                Stage::WorkloadsReady {
                    deployment_configs: false
                },
                Stage::ResourceCreated(backup.clone()),
                Stage::Polling(backup.clone()),
                Stage::Verified {
                    op: backup,
                    success: true
                },
                Stage::NamespacesDeleted,
                Stage::ResourceCreated(restore.clone()),
                Stage::Polling(restore.clone()),
                Stage::Verified {
                    op: restore,
                    success: true
                },
                Stage::WorkloadsRestored,
                Stage::TornDown,
            ]
        );
    }

    #[tokio::test]
    async fn test_deployment_config_flag_runs_post_restore_script() {
        let d = driver(Phase::Completed, Phase::Completed);
        let mut w = workloads(true);
        w.expect_run_post_restore_script()
            .withf(|name| name.to_string() == "mysql-restore-x1")
            .times(1)
            .returning(|_| Ok(()));
        let settings = settings();
        let mut log = RunLog::new();

        let report = CaseRunner::new(&d, &w, &settings)
            .run(&case(), "x1", &mut log)
            .await;

        assert!(report.passed());
        assert!(report.stages.contains(&Stage::PostRestoreScript));
    }

    #[tokio::test]
    async fn test_partially_failed_backup_collects_logs_and_tears_down() {
        let d = driver(Phase::PartiallyFailed, Phase::Completed);
        let mut w = workloads(true);
        w.expect_run_post_restore_script().never();
        let settings = settings();
        let mut log = RunLog::new();

        let report = CaseRunner::new(&d, &w, &settings)
            .run(&case(), "x1", &mut log)
            .await;

        assert_matches!(
            report.result,
            Err(CaseError::Lifecycle(LifecycleError::NotCompleted { observed: Phase::PartiallyFailed, .. }))
        );
        let stages = &report.stages;
        assert_eq!(
            &stages[stages.len() - 3..],
            &[
                Stage::Verified {
                    op: OperationRef::backup("mysql-backup-x1"),
                    success: false
                },
                Stage::LogsCollected,
                Stage::TornDown
            ]
        );
        let lines = log.drain();
        assert!(lines[0].contains("PartiallyFailed"));
        assert!(lines.iter().any(|l| l == "--- pods mysql-persistent ---"));
        assert!(lines.iter().any(|l| l.contains("volume failed")));
        assert!(lines
            .iter()
            .any(|l| l == "Backup `mysql-backup-x1` described with phase `PartiallyFailed`"));
        assert!(!lines.iter().any(|l| l.contains("Restore `mysql-restore-x1`")));
    }

    #[tokio::test]
    async fn test_creation_failure_aborts_but_teardown_runs() {
        let mut d = MockOperationDriver::new();
        d.expect_create()
            .times(1)
            .returning(|r| Err(DriverError::NotFound(r.operation())));
        d.expect_phase().never();
        d.expect_describe().never();
        d.expect_logs().never();
        d.expect_delete().times(2).returning(|_| Ok(()));
        let w = workloads(false);
        let settings = settings();
        let mut log = RunLog::new();

        let report = CaseRunner::new(&d, &w, &settings)
            .run(&case(), "x1", &mut log)
            .await;

        assert_matches!(report.result, Err(CaseError::Create(op, _)) if op.kind == OperationKind::Backup);
        assert_eq!(report.stages.last(), Some(&Stage::TornDown));
        assert!(!report.stages.iter().any(|s| matches!(s, Stage::ResourceCreated(_))));
    }

    #[tokio::test]
    async fn test_teardown_errors_do_not_change_the_result() {
        let mut d = MockOperationDriver::new();
        d.expect_create().returning(|_| Ok(()));
        d.expect_phase().returning(|_| Ok(Phase::Completed));
        d.expect_delete()
            .returning(|op| Err(DriverError::NotFound(op.clone())));
        let w = workloads(false);
        let settings = settings();
        let mut log = RunLog::new();

        let report = CaseRunner::new(&d, &w, &settings)
            .run(&case(), "x1", &mut log)
            .await;

        assert!(report.passed());
        assert_eq!(report.teardown_errors.len(), 2);
    }

    #[test]
    fn test_restores_volumes() {
        assert!(restores_volumes(BackupType::Filesystem));
        assert!(!restores_volumes(BackupType::Native));
    }
}
