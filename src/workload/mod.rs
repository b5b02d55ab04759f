//! Application workloads deployed by each test case and the checks run against them.
use crate::command::{CommandError, CommandRunner, ProcessRunner};
use crate::config::Verification;
use crate::k8s::client::AsyncK8sClient;
use crate::k8s::labels::DefaultLabels;
use crate::k8s::Error as K8sError;
use crate::poll::{poll_until, PollError};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::core::GroupVersionKind;
use kube::ResourceExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum WorkloadError {
    #[error("k8s error: `{0}`")]
    K8s(#[from] K8sError),

    #[error("post restore script: {0}")]
    Script(#[from] CommandError),

    #[error("`{verification:?}` not satisfied in namespace `{namespace}` after {timeout:?}")]
    VerificationTimeout {
        verification: Verification,
        namespace: String,
        timeout: Duration,
    },
}

/// Kind of the OpenShift resource that needs the post restore script.
pub fn deployment_config_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("apps.openshift.io", "v1", "DeploymentConfig")
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Workloads: Send + Sync {
    /// Creates the namespace labeled for the case if it does not exist.
    async fn ensure_namespace(&self, namespace: &str, case: &str) -> Result<(), WorkloadError>;

    /// Deletes the namespace and waits for it to be gone. A missing namespace is not an error.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), WorkloadError>;

    /// Applies the manifests into the namespace, returning the number of objects applied.
    async fn apply_manifests(
        &self,
        namespace: &str,
        manifests: &[PathBuf],
    ) -> Result<usize, WorkloadError>;

    /// Polls until the verification is satisfied or `timeout` elapses.
    async fn verify(
        &self,
        namespace: &str,
        verification: &Verification,
        timeout: Duration,
    ) -> Result<(), WorkloadError>;

    async fn has_deployment_configs(&self, namespace: &str) -> Result<bool, WorkloadError>;

    /// Runs the DeploymentConfig remediation script for the restore.
    async fn run_post_restore_script(&self, restore_name: &str) -> Result<(), WorkloadError>;

    /// One line per pod with its phase, used in diagnostics.
    async fn pod_summary(&self, namespace: &str) -> Result<Vec<String>, WorkloadError>;
}

pub struct ClusterWorkloads<R = ProcessRunner> {
    client: AsyncK8sClient,
    runner: R,
    post_restore_script: PathBuf,
    namespace_deletion_timeout: Duration,
    poll_interval: Duration,
}

impl ClusterWorkloads<ProcessRunner> {
    pub fn new(
        client: AsyncK8sClient,
        post_restore_script: impl Into<PathBuf>,
        namespace_deletion_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self::with_runner(
            client,
            ProcessRunner,
            post_restore_script,
            namespace_deletion_timeout,
            poll_interval,
        )
    }
}

impl<R: CommandRunner> ClusterWorkloads<R> {
    pub fn with_runner(
        client: AsyncK8sClient,
        runner: R,
        post_restore_script: impl Into<PathBuf>,
        namespace_deletion_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            runner,
            post_restore_script: post_restore_script.into(),
            namespace_deletion_timeout,
            poll_interval,
        }
    }

    async fn is_satisfied(
        &self,
        namespace: &str,
        verification: &Verification,
    ) -> Result<bool, K8sError> {
        match verification {
            Verification::DeploymentsAvailable => Ok(deployments_available(
                &self.client.list::<Deployment>(namespace, "").await?,
            )),
            Verification::StatefulSetsReady => Ok(statefulsets_ready(
                &self.client.list::<StatefulSet>(namespace, "").await?,
            )),
            Verification::PodsRunning { label_selector } => Ok(pods_running(
                &self.client.list::<Pod>(namespace, label_selector).await?,
            )),
            Verification::ConfigMapExists { name } => {
                Ok(self.client.get_configmap(namespace, name).await?.is_some())
            }
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Workloads for ClusterWorkloads<R> {
    async fn ensure_namespace(&self, namespace: &str, case: &str) -> Result<(), WorkloadError> {
        let labels = DefaultLabels::new().with_case(case).get();
        Ok(self.client.ensure_namespace(namespace, labels).await?)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), WorkloadError> {
        Ok(self
            .client
            .delete_namespace_and_wait(namespace, self.namespace_deletion_timeout, self.poll_interval)
            .await?)
    }

    async fn apply_manifests(
        &self,
        namespace: &str,
        manifests: &[PathBuf],
    ) -> Result<usize, WorkloadError> {
        let mut applied = 0;
        for manifest in manifests {
            applied += self.client.apply_manifest_file(manifest, namespace).await?;
        }
        Ok(applied)
    }

    async fn verify(
        &self,
        namespace: &str,
        verification: &Verification,
        timeout: Duration,
    ) -> Result<(), WorkloadError> {
        let result = poll_until(timeout, self.poll_interval, || {
            self.is_satisfied(namespace, verification)
        })
        .await;
        match result {
            Ok(()) => {
                info!(namespace, ?verification, "verification satisfied");
                Ok(())
            }
            Err(PollError::Timeout(timeout)) => Err(WorkloadError::VerificationTimeout {
                verification: verification.clone(),
                namespace: namespace.to_string(),
                timeout,
            }),
            Err(PollError::Failed(err)) => Err(err.into()),
        }
    }

    async fn has_deployment_configs(&self, namespace: &str) -> Result<bool, WorkloadError> {
        match self
            .client
            .list_dynamic_objects(&deployment_config_gvk(), namespace)
            .await
        {
            Ok(objects) => Ok(!objects.is_empty()),
            Err(K8sError::MissingKind(_, _)) => {
                warn!("DeploymentConfig is not served by this cluster");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn run_post_restore_script(&self, restore_name: &str) -> Result<(), WorkloadError> {
        let program = script_program(&self.post_restore_script);
        let output = self
            .runner
            .run(&program, &[restore_name.to_string()])
            .await?;
        info!(restore = restore_name, stdout = output.stdout, "post restore script finished");
        Ok(())
    }

    async fn pod_summary(&self, namespace: &str) -> Result<Vec<String>, WorkloadError> {
        let pods = self.client.list::<Pod>(namespace, "").await?;
        Ok(pods.iter().map(pod_line).collect())
    }
}

fn script_program(path: &Path) -> String {
    path.display().to_string()
}

fn deployments_available(deployments: &[Deployment]) -> bool {
    !deployments.is_empty()
        && deployments.iter().all(|d| {
            let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let available = d
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or(0);
            available >= desired
        })
}

fn statefulsets_ready(statefulsets: &[StatefulSet]) -> bool {
    !statefulsets.is_empty()
        && statefulsets.iter().all(|s| {
            let desired = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let ready = s
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            ready >= desired
        })
}

fn pods_running(pods: &[Pod]) -> bool {
    !pods.is_empty() && pods.iter().all(|p| pod_phase(p) == "Running")
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn pod_line(pod: &Pod) -> String {
    format!("{} {}", pod.name_any(), pod_phase(pod))
}
