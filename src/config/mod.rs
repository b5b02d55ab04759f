//! Suite configuration read from a YAML file.
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::k8s::client::ClientConfig;
use crate::poll::DEFAULT_POLL_INTERVAL;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading config file `{0}`: `{1}`")]
    Read(PathBuf, std::io::Error),

    #[error("invalid config: `{0}`")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How the volumes of a case are backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    /// CSI volume snapshots.
    Csi,
    /// File system backup through the node agent.
    Filesystem,
    /// CSI snapshots moved to the object storage by the data mover.
    Datamover,
    /// Native cloud provider snapshots.
    Native,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verification {
    /// Every Deployment in the namespace has all its replicas available.
    DeploymentsAvailable,
    /// Every StatefulSet in the namespace has all its replicas ready.
    StatefulSetsReady,
    /// At least one pod matches the selector and all the matching pods are running.
    PodsRunning { label_selector: String },
    ConfigMapExists { name: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackupLocationSettings {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub bucket: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_credential_secret")]
    pub credential_secret: String,
    #[serde(default = "default_credential_key")]
    pub credential_key: String,
    /// Base64 encoded CA certificate for the object storage endpoint.
    #[serde(default)]
    pub ca_cert: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Timeouts {
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(
        default = "default_namespace_deletion",
        deserialize_with = "deserialize_duration"
    )]
    pub namespace_deletion: Duration,
    #[serde(
        default = "default_dpa_reconcile",
        deserialize_with = "deserialize_duration"
    )]
    pub dpa_reconcile: Duration,
    #[serde(
        default = "default_verification",
        deserialize_with = "deserialize_duration"
    )]
    pub verification: Duration,
    #[serde(
        default = "default_hosted_cluster_available",
        deserialize_with = "deserialize_duration"
    )]
    pub hosted_cluster_available: Duration,
    #[serde(
        default = "default_hosted_cluster_deletion",
        deserialize_with = "deserialize_duration"
    )]
    pub hosted_cluster_deletion: Duration,
    /// Bound of the single wait that follows stripping the finalizers.
    #[serde(
        default = "default_hosted_cluster_deletion_retry",
        deserialize_with = "deserialize_duration"
    )]
    pub hosted_cluster_deletion_retry: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            namespace_deletion: default_namespace_deletion(),
            dpa_reconcile: default_dpa_reconcile(),
            verification: default_verification(),
            hosted_cluster_available: default_hosted_cluster_available(),
            hosted_cluster_deletion: default_hosted_cluster_deletion(),
            hosted_cluster_deletion_retry: default_hosted_cluster_deletion_retry(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseConfig {
    pub name: String,
    pub namespaces: Vec<String>,
    pub backup_type: BackupType,
    #[serde(default)]
    pub manifests: Vec<PathBuf>,
    #[serde(default)]
    pub pre_backup: Vec<Verification>,
    #[serde(default)]
    pub post_restore: Vec<Verification>,
    #[serde(default = "default_case_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl CaseConfig {
    /// Namespace the manifests are applied to and checks run against.
    pub fn primary_namespace(&self) -> Option<&str> {
        self.namespaces.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HcpCaseConfig {
    pub name: String,
    pub hosted_cluster: String,
    /// Namespace holding the HostedCluster and NodePool resources.
    #[serde(default = "default_hosted_cluster_namespace")]
    pub namespace: String,
    #[serde(default = "default_hcp_backup_type")]
    pub backup_type: BackupType,
    #[serde(default = "default_case_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl HcpCaseConfig {
    /// Namespace of the hosted control plane, `<namespace>-<name>` by HyperShift convention.
    pub fn control_plane_namespace(&self) -> String {
        format!("{}-{}", self.namespace, self.hosted_cluster)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SuiteConfig {
    #[serde(default = "default_oadp_namespace")]
    pub oadp_namespace: String,
    #[serde(default = "default_dpa_name")]
    pub dpa_name: String,
    pub backup_location: BackupLocationSettings,
    #[serde(default)]
    pub backup_images: bool,
    #[serde(default = "default_velero_label_selector")]
    pub velero_label_selector: String,
    #[serde(default = "default_ca_bundle_configmap")]
    pub ca_bundle_configmap: String,
    #[serde(default = "default_dc_post_restore_script")]
    pub dc_post_restore_script: PathBuf,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    /// Error log substrings that never make a verification fail.
    #[serde(default)]
    pub known_benign_errors: Vec<String>,
    /// Regular expressions matching failures caused by the environment.
    #[serde(default)]
    pub known_flakes: Vec<String>,
    #[serde(default = "default_flake_attempts")]
    pub flake_attempts: u32,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub cases: Vec<CaseConfig>,
    #[serde(default)]
    pub hcp_cases: Vec<HcpCaseConfig>,
}

impl SuiteConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        content.parse()
    }

    /// Name of the BackupStorageLocation the operator creates for the first DPA location.
    pub fn storage_location(&self) -> String {
        format!("{}-1", self.dpa_name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.flake_attempts == 0 {
            return Err(ConfigError::Invalid(
                "flake_attempts must be at least 1".to_string(),
            ));
        }
        let timeouts = &self.timeouts;
        if timeouts.hosted_cluster_deletion_retry >= timeouts.hosted_cluster_deletion {
            return Err(ConfigError::Invalid(format!(
                "hosted_cluster_deletion_retry ({:?}) must be shorter than hosted_cluster_deletion ({:?})",
                timeouts.hosted_cluster_deletion_retry, timeouts.hosted_cluster_deletion
            )));
        }
        if let Some(case) = self.cases.iter().find(|c| c.namespaces.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "case `{}` has no namespaces",
                case.name
            )));
        }
        let mut names: Vec<&str> = self
            .cases
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.hcp_cases.iter().map(|c| c.name.as_str()))
            .collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!(
                "duplicated case name `{}`",
                dup[0]
            )));
        }
        Ok(())
    }
}

impl std::str::FromStr for SuiteConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: SuiteConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

fn default_oadp_namespace() -> String {
    "openshift-adp".to_string()
}

fn default_dpa_name() -> String {
    "ts-dpa".to_string()
}

fn default_provider() -> String {
    "aws".to_string()
}

fn default_prefix() -> String {
    "velero-e2e".to_string()
}

fn default_credential_secret() -> String {
    "cloud-credentials".to_string()
}

fn default_credential_key() -> String {
    "cloud".to_string()
}

fn default_velero_label_selector() -> String {
    "deploy=velero".to_string()
}

fn default_ca_bundle_configmap() -> String {
    "velero-ca-bundle".to_string()
}

fn default_dc_post_restore_script() -> PathBuf {
    PathBuf::from("dc-post-restore.sh")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_flake_attempts() -> u32 {
    1
}

fn default_hosted_cluster_namespace() -> String {
    "clusters".to_string()
}

fn default_hcp_backup_type() -> BackupType {
    BackupType::Csi
}

fn default_case_timeout() -> Duration {
    Duration::from_secs(20 * 60)
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_namespace_deletion() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_dpa_reconcile() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_verification() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_hosted_cluster_available() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_hosted_cluster_deletion() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_hosted_cluster_deletion_retry() -> Duration {
    Duration::from_secs(5 * 60)
}
