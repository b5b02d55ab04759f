//! Backup and restore of a HostedCluster together with its control plane namespace.
use crate::config::HcpCaseConfig;
use crate::driver::{
    BackupRequest, DriverError, OperationDriver, OperationKind, OperationRef, OperationRequest,
    RestoreRequest,
};
use crate::k8s::client::AsyncK8sClient;
use crate::k8s::utils::condition_status;
use crate::k8s::Error as K8sError;
use crate::lifecycle::waiter::wait_and_verify;
use crate::lifecycle::{LifecycleError, LogFilter};
use crate::orchestrator::{collect_operation_diagnostics, operation_name};
use crate::poll::{poll_until, PollError};
use crate::run_log::RunLog;
use crate::teardown::{
    teardown, ForcedTeardown, TeardownError, TeardownOutcome, TeardownPolicy,
};
use async_trait::async_trait;
use kube::core::GroupVersionKind;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info, warn};

const HYPERSHIFT_GROUP: &str = "hypershift.openshift.io";
const CAPI_GROUP: &str = "cluster.x-k8s.io";
const CAPI_INFRA_GROUP: &str = "infrastructure.cluster.x-k8s.io";
const AGENT_GROUP: &str = "capi-provider.agent-install.openshift.io";

pub fn hosted_cluster_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(HYPERSHIFT_GROUP, "v1beta1", "HostedCluster")
}

/// Kinds whose finalizers can keep a HostedCluster deletion from completing.
pub fn related_kinds() -> Vec<GroupVersionKind> {
    vec![
        hosted_cluster_gvk(),
        GroupVersionKind::gvk(HYPERSHIFT_GROUP, "v1beta1", "NodePool"),
        GroupVersionKind::gvk(HYPERSHIFT_GROUP, "v1beta1", "HostedControlPlane"),
        GroupVersionKind::gvk(CAPI_GROUP, "v1beta1", "Cluster"),
        GroupVersionKind::gvk(CAPI_GROUP, "v1beta1", "Machine"),
        GroupVersionKind::gvk(CAPI_GROUP, "v1beta1", "MachineSet"),
        GroupVersionKind::gvk(CAPI_GROUP, "v1beta1", "MachineDeployment"),
        GroupVersionKind::gvk(CAPI_INFRA_GROUP, "v1beta2", "AWSCluster"),
        GroupVersionKind::gvk(CAPI_INFRA_GROUP, "v1beta2", "AWSMachine"),
        GroupVersionKind::gvk(AGENT_GROUP, "v1beta1", "AgentCluster"),
        GroupVersionKind::gvk(AGENT_GROUP, "v1beta1", "AgentMachine"),
        GroupVersionKind::gvk(CAPI_INFRA_GROUP, "v1alpha1", "KubevirtCluster"),
        GroupVersionKind::gvk(CAPI_INFRA_GROUP, "v1alpha1", "KubevirtMachine"),
    ]
}

#[derive(thiserror::Error, Debug)]
pub enum HcpError {
    #[error("k8s error: `{0}`")]
    K8s(#[from] K8sError),

    #[error("creating {0}: {1}")]
    Create(OperationRef, DriverError),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("{0}")]
    Teardown(#[from] TeardownError),

    #[error("HostedCluster `{namespace}/{name}` not available after {timeout:?}")]
    NotAvailable {
        namespace: String,
        name: String,
        timeout: Duration,
    },
}

/// Forced deletion target for one HostedCluster.
pub struct HostedClusterTeardown<'a> {
    client: &'a AsyncK8sClient,
    namespace: String,
    name: String,
    control_plane_namespace: String,
}

impl<'a> HostedClusterTeardown<'a> {
    pub fn new(client: &'a AsyncK8sClient, case: &HcpCaseConfig) -> Self {
        Self {
            client,
            namespace: case.namespace.clone(),
            name: case.hosted_cluster.clone(),
            control_plane_namespace: case.control_plane_namespace(),
        }
    }
}

#[async_trait]
impl ForcedTeardown for HostedClusterTeardown<'_> {
    fn target(&self) -> String {
        format!("HostedCluster `{}/{}`", self.namespace, self.name)
    }

    async fn request_deletion(&self) -> Result<(), TeardownError> {
        let deleted = self
            .client
            .delete_dynamic_object(&hosted_cluster_gvk(), &self.namespace, &self.name)
            .await?;
        debug!(resource = self.target(), deleted, "deletion requested");
        Ok(())
    }

    async fn is_gone(&self) -> Result<bool, TeardownError> {
        Ok(self
            .client
            .get_dynamic_object(&hosted_cluster_gvk(), &self.namespace, &self.name)
            .await?
            .is_none())
    }

    async fn strip_finalizers(&self) -> Result<usize, TeardownError> {
        let mut stripped = 0;
        for namespace in [&self.namespace, &self.control_plane_namespace] {
            for gvk in related_kinds() {
                let objects = match self.client.list_dynamic_objects(&gvk, namespace).await {
                    Ok(objects) => objects,
                    Err(K8sError::MissingKind(_, kind)) => {
                        debug!(kind, "kind not served, skipping");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                for obj in objects.iter().filter(|o| !o.finalizers().is_empty()) {
                    let name = obj.name_any();
                    if self.client.strip_finalizers(&gvk, namespace, &name).await? {
                        info!(kind = gvk.kind, namespace, name, "finalizers removed");
                        stripped += 1;
                    }
                }
            }
        }
        Ok(stripped)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostedClusterOps: Send + Sync {
    async fn wait_available(&self, case: &HcpCaseConfig, timeout: Duration) -> Result<(), HcpError>;

    /// Deletes the HostedCluster, escalating to finalizer removal once if it hangs.
    async fn nuke(&self, case: &HcpCaseConfig) -> Result<TeardownOutcome, HcpError>;

    async fn delete_namespace(&self, namespace: &str) -> Result<(), HcpError>;
}

pub struct ClusterHostedClusters {
    client: AsyncK8sClient,
    policy: TeardownPolicy,
    namespace_deletion_timeout: Duration,
}

impl ClusterHostedClusters {
    pub fn new(
        client: AsyncK8sClient,
        policy: TeardownPolicy,
        namespace_deletion_timeout: Duration,
    ) -> Self {
        Self {
            client,
            policy,
            namespace_deletion_timeout,
        }
    }
}

#[async_trait]
impl HostedClusterOps for ClusterHostedClusters {
    async fn wait_available(&self, case: &HcpCaseConfig, timeout: Duration) -> Result<(), HcpError> {
        let gvk = hosted_cluster_gvk();
        let result = poll_until(timeout, self.policy.interval, || async {
            let hc = self
                .client
                .get_dynamic_object(&gvk, &case.namespace, &case.hosted_cluster)
                .await?;
            Ok::<_, K8sError>(
                hc.and_then(|hc| condition_status(&hc, "Available"))
                    .is_some_and(|status| status == "True"),
            )
        })
        .await;
        match result {
            Ok(()) => {
                info!(hosted_cluster = case.hosted_cluster, "HostedCluster available");
                Ok(())
            }
            Err(PollError::Timeout(timeout)) => Err(HcpError::NotAvailable {
                namespace: case.namespace.clone(),
                name: case.hosted_cluster.clone(),
                timeout,
            }),
            Err(PollError::Failed(err)) => Err(err.into()),
        }
    }

    async fn nuke(&self, case: &HcpCaseConfig) -> Result<TeardownOutcome, HcpError> {
        let target = HostedClusterTeardown::new(&self.client, case);
        Ok(teardown(&target, &self.policy).await?)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), HcpError> {
        Ok(self
            .client
            .delete_namespace_and_wait(namespace, self.namespace_deletion_timeout, self.policy.interval)
            .await?)
    }
}

#[derive(Debug, Clone)]
pub struct HcpSettings {
    pub storage_location: String,
    pub available_timeout: Duration,
    pub poll_interval: Duration,
    pub log_filter: LogFilter,
}

/// Runs the backup, forced deletion and restore of a HostedCluster.
pub struct HcpRunner<'a> {
    driver: &'a dyn OperationDriver,
    clusters: &'a dyn HostedClusterOps,
    settings: &'a HcpSettings,
}

impl<'a> HcpRunner<'a> {
    pub fn new(
        driver: &'a dyn OperationDriver,
        clusters: &'a dyn HostedClusterOps,
        settings: &'a HcpSettings,
    ) -> Self {
        Self {
            driver,
            clusters,
            settings,
        }
    }

    pub async fn run(
        &self,
        case: &HcpCaseConfig,
        suffix: &str,
        log: &mut RunLog,
    ) -> Result<TeardownOutcome, HcpError> {
        let backup = OperationRef::backup(operation_name(&case.name, OperationKind::Backup, suffix));
        let restore =
            OperationRef::restore(operation_name(&case.name, OperationKind::Restore, suffix));

        let mut created = Vec::new();
        let result = self.execute(case, &backup, &restore, &mut created).await;
        if let Err(err) = &result {
            warn!(case = case.name, %err, "hosted cluster case failed, collecting logs");
            log.push(err.to_string());
            collect_operation_diagnostics(self.driver, &created, log).await;
        }
        for op in [&restore, &backup] {
            if let Err(err) = self.driver.delete(op).await {
                warn!(operation = %op, %err, "cleanup failed");
            }
        }
        result
    }

    async fn execute(
        &self,
        case: &HcpCaseConfig,
        backup: &OperationRef,
        restore: &OperationRef,
        created: &mut Vec<OperationRef>,
    ) -> Result<TeardownOutcome, HcpError> {
        let control_plane_namespace = case.control_plane_namespace();
        self.clusters
            .wait_available(case, self.settings.available_timeout)
            .await?;

        let backup_request = OperationRequest::Backup(BackupRequest {
            name: backup.name.clone(),
            included_namespaces: vec![case.namespace.clone(), control_plane_namespace.clone()],
            included_resources: Vec::new(),
            storage_location: Some(self.settings.storage_location.clone()),
            backup_type: case.backup_type,
            ttl: None,
        });
        self.create(backup_request, created).await?;
        wait_and_verify(
            self.driver,
            backup,
            case.timeout,
            self.settings.poll_interval,
            &self.settings.log_filter,
        )
        .await?;

        let outcome = self.clusters.nuke(case).await?;
        info!(case = case.name, ?outcome, "HostedCluster deleted");
        self.clusters.delete_namespace(&control_plane_namespace).await?;

        let restore_request = OperationRequest::Restore(RestoreRequest {
            name: restore.name.clone(),
            backup_name: backup.name.clone(),
            included_namespaces: Vec::new(),
            restore_pvs: Some(true),
        });
        self.create(restore_request, created).await?;
        wait_and_verify(
            self.driver,
            restore,
            case.timeout,
            self.settings.poll_interval,
            &self.settings.log_filter,
        )
        .await?;

        self.clusters
            .wait_available(case, self.settings.available_timeout)
            .await?;
        Ok(outcome)
    }

    async fn create(
        &self,
        request: OperationRequest,
        created: &mut Vec<OperationRef>,
    ) -> Result<(), HcpError> {
        let op = request.operation();
        self.driver
            .create(&request)
            .await
            .map_err(|err| HcpError::Create(op.clone(), err))?;
        created.push(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupType;
    use crate::driver::MockOperationDriver;
    use crate::k8s::client::tests::{mocked_client, Response};
    use crate::lifecycle::Phase;
    use assert_matches::assert_matches;

    fn case() -> HcpCaseConfig {
        HcpCaseConfig {
            name: "hcp-none".to_string(),
            hosted_cluster: "guest".to_string(),
            namespace: "clusters".to_string(),
            backup_type: BackupType::Csi,
            timeout: Duration::from_secs(5),
        }
    }

    fn settings() -> HcpSettings {
        HcpSettings {
            storage_location: "ts-dpa-1".to_string(),
            available_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
            log_filter: LogFilter::default(),
        }
    }

    #[test]
    fn test_related_kinds_start_with_hosted_cluster() {
        let kinds = related_kinds();
        assert_eq!(kinds.len(), 13);
        assert_eq!(kinds[0], hosted_cluster_gvk());
        assert!(kinds.iter().any(|k| k.kind == "KubevirtMachine"));
    }

    #[tokio::test]
    async fn test_backup_nuke_restore_sequence() {
        let mut clusters = MockHostedClusterOps::new();
        clusters
            .expect_wait_available()
            .times(2)
            .returning(|_, _| Ok(()));
        clusters
            .expect_nuke()
            .times(1)
            .returning(|_| Ok(TeardownOutcome::Forced { stripped: 4 }));
        clusters
            .expect_delete_namespace()
            .withf(|ns| ns.to_string() == "clusters-guest")
            .times(1)
            .returning(|_| Ok(()));

        let mut driver = MockOperationDriver::new();
        driver
            .expect_create()
            .withf(|r| match r {
                OperationRequest::Backup(b) => {
                    b.included_namespaces == vec!["clusters", "clusters-guest"]
                }
                OperationRequest::Restore(r) => r.backup_name == "hcp-none-backup-s",
            })
            .times(2)
            .returning(|_| Ok(()));
        driver.expect_phase().returning(|_| Ok(Phase::Completed));
        driver.expect_delete().times(2).returning(|_| Ok(()));
        let settings = settings();
        let mut log = RunLog::new();

        let outcome = HcpRunner::new(&driver, &clusters, &settings)
            .run(&case(), "s", &mut log)
            .await
            .unwrap();
        assert_eq!(outcome, TeardownOutcome::Forced { stripped: 4 });
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_failed_nuke_stops_before_restore() {
        let mut clusters = MockHostedClusterOps::new();
        clusters.expect_wait_available().times(1).returning(|_, _| Ok(()));
        clusters.expect_nuke().times(1).returning(|_| {
            Err(HcpError::Teardown(TeardownError::StillPresent {
                target: "HostedCluster `clusters/guest`".to_string(),
                stripped: 2,
                retry_timeout: Duration::from_secs(1),
            }))
        });
        clusters.expect_delete_namespace().never();

        let mut driver = MockOperationDriver::new();
        driver.expect_create().times(1).returning(|_| Ok(()));
        driver.expect_phase().returning(|_| Ok(Phase::Completed));
        driver
            .expect_describe()
            .withf(|op| op.kind == OperationKind::Backup)
            .times(1)
            .returning(|_| Ok("status:\n  phase: Completed".to_string()));
        driver
            .expect_logs()
            .withf(|op| op.kind == OperationKind::Backup)
            .times(1)
            .returning(|_| Ok(vec!["level=info msg=\"backup completed\"".to_string()]));
        driver.expect_delete().times(2).returning(|_| Ok(()));
        let settings = settings();
        let mut log = RunLog::new();

        let err = HcpRunner::new(&driver, &clusters, &settings)
            .run(&case(), "s", &mut log)
            .await
            .unwrap_err();
        assert_matches!(err, HcpError::Teardown(TeardownError::StillPresent { stripped: 2, .. }));
        let lines = log.lines();
        assert!(lines[0].contains("still present"));
        assert!(lines.iter().any(|l| l == "--- logs Backup `hcp-none-backup-s` ---"));
        assert!(lines.iter().any(|l| l.contains("backup completed")));
        assert!(!lines.iter().any(|l| l.contains("Restore `hcp-none-restore-s`")));
    }

    fn hosted_cluster(finalizers: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "hypershift.openshift.io/v1beta1",
            "kind": "HostedCluster",
            "metadata": {"name": "guest", "namespace": "clusters", "finalizers": finalizers},
        })
    }

    #[tokio::test]
    async fn test_hosted_cluster_teardown_is_gone() {
        let resources = serde_json::json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": "hypershift.openshift.io/v1beta1",
            "resources": [{
                "name": "hostedclusters",
                "singularName": "hostedcluster",
                "namespaced": true,
                "kind": "HostedCluster",
                "verbs": ["get", "list", "delete", "patch"],
            }]
        });
        let client = mocked_client(vec![
            Response::Ok(resources.clone()),
            Response::Ok(hosted_cluster(&["hypershift.openshift.io/finalizer"])),
            Response::Ok(resources),
            Response::NotFound,
        ]);
        let target = HostedClusterTeardown::new(&client, &case());
        assert_eq!(target.target(), "HostedCluster `clusters/guest`");
        assert!(!target.is_gone().await.unwrap());
        assert!(target.is_gone().await.unwrap());
    }
}
