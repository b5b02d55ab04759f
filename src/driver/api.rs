use super::{
    DriverError, OperationDriver, OperationKind, OperationRef, OperationRequest, VolumeFlags,
};
use crate::k8s::client::AsyncK8sClient;
use crate::k8s::crd::{Backup, BackupSpec, Restore, RestoreSpec};
use crate::k8s::labels::DefaultLabels;
use crate::lifecycle::phase::Phase;
use async_trait::async_trait;
use kube::core::ObjectMeta;
use tracing::{debug, info};

/// Lines of the Velero server log inspected when looking for the logs of an operation.
const VELERO_LOG_TAIL_LINES: i64 = 5000;

/// Creates and observes operations through the Kubernetes API.
pub struct ApiDriver {
    client: AsyncK8sClient,
    namespace: String,
    velero_label_selector: String,
}

impl ApiDriver {
    pub fn new(
        client: AsyncK8sClient,
        namespace: impl Into<String>,
        velero_label_selector: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            velero_label_selector: velero_label_selector.into(),
        }
    }

    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(DefaultLabels::new().get()),
            ..Default::default()
        }
    }

    fn backup(&self, request: &super::BackupRequest) -> Backup {
        let flags = VolumeFlags::from(request.backup_type);
        let mut backup = Backup::new(
            &request.name,
            BackupSpec {
                included_namespaces: request.included_namespaces.clone(),
                included_resources: request.included_resources.clone(),
                storage_location: request.storage_location.clone(),
                snapshot_volumes: flags.snapshot_volumes,
                default_volumes_to_fs_backup: flags.default_volumes_to_fs_backup,
                snapshot_move_data: flags.snapshot_move_data,
                ttl: request.ttl.clone(),
            },
        );
        backup.metadata = self.metadata(&request.name);
        backup
    }

    fn restore(&self, request: &super::RestoreRequest) -> Restore {
        let mut restore = Restore::new(
            &request.name,
            RestoreSpec {
                backup_name: request.backup_name.clone(),
                included_namespaces: request.included_namespaces.clone(),
                restore_pvs: request.restore_pvs,
                existing_resource_policy: None,
            },
        );
        restore.metadata = self.metadata(&request.name);
        restore
    }
}

#[async_trait]
impl OperationDriver for ApiDriver {
    async fn create(&self, request: &OperationRequest) -> Result<(), DriverError> {
        match request {
            OperationRequest::Backup(b) => {
                self.client.create(&self.namespace, &self.backup(b)).await?;
            }
            OperationRequest::Restore(r) => {
                self.client.create(&self.namespace, &self.restore(r)).await?;
            }
        }
        info!(operation = %request.operation(), namespace = self.namespace, "operation created");
        Ok(())
    }

    async fn phase(&self, op: &OperationRef) -> Result<Phase, DriverError> {
        let phase = match op.kind {
            OperationKind::Backup => self
                .client
                .get_opt::<Backup>(&self.namespace, &op.name)
                .await?
                .map(|b| b.phase()),
            OperationKind::Restore => self
                .client
                .get_opt::<Restore>(&self.namespace, &op.name)
                .await?
                .map(|r| r.phase()),
        };
        let phase = phase.ok_or_else(|| DriverError::NotFound(op.clone()))?;
        debug!(operation = %op, %phase, "phase read");
        Ok(phase)
    }

    async fn logs(&self, op: &OperationRef) -> Result<Vec<String>, DriverError> {
        let pod_logs = self
            .client
            .pod_logs(
                &self.namespace,
                &self.velero_label_selector,
                Some("velero".to_string()),
                VELERO_LOG_TAIL_LINES,
            )
            .await?;
        Ok(lines_mentioning(pod_logs.values().map(String::as_str), &op.name))
    }

    async fn describe(&self, op: &OperationRef) -> Result<String, DriverError> {
        let rendered = match op.kind {
            OperationKind::Backup => self
                .client
                .get_opt::<Backup>(&self.namespace, &op.name)
                .await?
                .map(|b| serde_yaml::to_string(&b)),
            OperationKind::Restore => self
                .client
                .get_opt::<Restore>(&self.namespace, &op.name)
                .await?
                .map(|r| serde_yaml::to_string(&r)),
        };
        match rendered {
            Some(yaml) => Ok(yaml.map_err(crate::k8s::Error::from)?),
            None => Err(DriverError::NotFound(op.clone())),
        }
    }

    async fn delete(&self, op: &OperationRef) -> Result<(), DriverError> {
        let deleted = match op.kind {
            OperationKind::Backup => {
                self.client
                    .delete_if_exists::<Backup>(&self.namespace, &op.name)
                    .await?
            }
            OperationKind::Restore => {
                self.client
                    .delete_if_exists::<Restore>(&self.namespace, &op.name)
                    .await?
            }
        };
        debug!(operation = %op, deleted, "operation deletion requested");
        Ok(())
    }
}

/// Keeps the log lines that mention the operation name.
fn lines_mentioning<'a>(logs: impl Iterator<Item = &'a str>, name: &str) -> Vec<String> {
    logs.flat_map(str::lines)
        .filter(|line| line.contains(name))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupType;
    use crate::driver::{BackupRequest, RestoreRequest};
    use crate::k8s::client::tests::{mocked_client, Response};
    use assert_matches::assert_matches;

    fn driver(responses: Vec<Response>) -> ApiDriver {
        ApiDriver::new(mocked_client(responses), "openshift-adp", "deploy=velero")
    }

    fn backup_json(phase: Option<&str>) -> serde_json::Value {
        let mut backup = serde_json::json!({
            "apiVersion": "velero.io/v1",
            "kind": "Backup",
            "metadata": {"name": "mysql-backup", "namespace": "openshift-adp"},
            "spec": {"includedNamespaces": ["mysql"]},
        });
        if let Some(phase) = phase {
            backup["status"] = serde_json::json!({ "phase": phase });
        }
        backup
    }

    #[tokio::test]
    async fn test_backup_phase() {
        let d = driver(vec![Response::Ok(backup_json(Some("InProgress")))]);
        let phase = d.phase(&OperationRef::backup("mysql-backup")).await.unwrap();
        assert_eq!(phase, Phase::InProgress);
    }

    #[tokio::test]
    async fn test_backup_without_status_is_unknown() {
        let d = driver(vec![Response::Ok(backup_json(None))]);
        let phase = d.phase(&OperationRef::backup("mysql-backup")).await.unwrap();
        assert_eq!(phase, Phase::Unknown);
    }

    #[tokio::test]
    async fn test_missing_operation_is_not_found() {
        let d = driver(vec![Response::NotFound]);
        let err = d.phase(&OperationRef::restore("missing")).await.unwrap_err();
        assert_matches!(err, DriverError::NotFound(op) if op == OperationRef::restore("missing"));
    }

    #[tokio::test]
    async fn test_delete_missing_operation_is_ok() {
        let d = driver(vec![Response::NotFound]);
        d.delete(&OperationRef::backup("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_backup_resource_from_request() {
        let d = driver(vec![]);
        let backup = d.backup(&BackupRequest {
            name: "b".to_string(),
            included_namespaces: vec!["mysql".to_string()],
            included_resources: vec![],
            storage_location: Some("ts-dpa-1".to_string()),
            backup_type: BackupType::Filesystem,
            ttl: None,
        });
        assert_eq!(backup.metadata.namespace.as_deref(), Some("openshift-adp"));
        assert_eq!(backup.spec.default_volumes_to_fs_backup, Some(true));
        assert_eq!(backup.spec.storage_location.as_deref(), Some("ts-dpa-1"));
        assert!(backup.metadata.labels.unwrap().contains_key(crate::k8s::labels::MANAGED_BY_KEY));
    }

    #[tokio::test]
    async fn test_restore_resource_from_request() {
        let d = driver(vec![]);
        let restore = d.restore(&RestoreRequest {
            name: "r".to_string(),
            backup_name: "b".to_string(),
            included_namespaces: vec![],
            restore_pvs: Some(true),
        });
        assert_eq!(restore.spec.backup_name, "b");
        assert_eq!(restore.spec.restore_pvs, Some(true));
    }

    #[test]
    fn test_lines_mentioning() {
        let logs = [
            "level=info msg=\"starting\"\nlevel=error msg=\"fail\" backup=openshift-adp/b-1",
            "level=info msg=\"done\" backup=openshift-adp/b-2",
        ];
        let lines = lines_mentioning(logs.into_iter(), "b-1");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("level=error"));
    }
}
