//! DataProtectionApplication setup before each test case.
use crate::config::{BackupLocationSettings, BackupType, SuiteConfig};
use crate::k8s::client::AsyncK8sClient;
use crate::k8s::crd::{
    ApplicationConfig, BackupLocation, BackupStorageLocation, DataProtectionApplication,
    DataProtectionApplicationSpec, NodeAgentConfig, ObjectStorage, SecretKeyRef,
    VeleroBackupLocation, VeleroConfig,
};
use crate::k8s::labels::DefaultLabels;
use crate::k8s::Error as K8sError;
use crate::poll::PollSchedule;
use async_trait::async_trait;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub const RECONCILED_CONDITION: &str = "Reconciled";
pub const BSL_AVAILABLE_PHASE: &str = "Available";
const KOPIA_UPLOADER: &str = "kopia";

#[derive(thiserror::Error, Debug)]
pub enum DpaError {
    #[error("k8s error: `{0}`")]
    K8s(#[from] K8sError),

    #[error("DataProtectionApplication `{name}` not reconciled after {timeout:?}: {last_state}")]
    NotReconciled {
        name: String,
        timeout: Duration,
        last_state: String,
    },

    #[error("BackupStorageLocation `{name}` not available after {timeout:?}, last phase: `{phase}`")]
    StorageUnavailable {
        name: String,
        timeout: Duration,
        phase: String,
    },
}

/// Everything needed to render the DataProtectionApplication of the suite.
#[derive(Debug, Clone, PartialEq)]
pub struct DpaSettings {
    pub name: String,
    pub namespace: String,
    pub location: BackupLocationSettings,
    pub backup_images: bool,
}

impl From<&SuiteConfig> for DpaSettings {
    fn from(config: &SuiteConfig) -> Self {
        Self {
            name: config.dpa_name.clone(),
            namespace: config.oadp_namespace.clone(),
            location: config.backup_location.clone(),
            backup_images: config.backup_images,
        }
    }
}

impl DpaSettings {
    pub fn storage_location(&self) -> String {
        format!("{}-1", self.name)
    }
}

/// Velero plugins required by a case.
pub fn default_plugins(provider: &str, backup_type: BackupType, hypershift: bool) -> Vec<String> {
    let mut plugins = vec!["openshift".to_string(), provider.to_string()];
    if matches!(backup_type, BackupType::Csi | BackupType::Datamover) {
        plugins.push("csi".to_string());
    }
    if hypershift {
        plugins.push("hypershift".to_string());
    }
    plugins
}

pub fn build_spec(
    settings: &DpaSettings,
    backup_type: BackupType,
    hypershift: bool,
) -> DataProtectionApplicationSpec {
    let location = &settings.location;
    let config: BTreeMap<String, String> = location
        .region
        .iter()
        .map(|region| ("region".to_string(), region.clone()))
        .collect();

    let node_agent = matches!(backup_type, BackupType::Filesystem | BackupType::Datamover).then(|| {
        NodeAgentConfig {
            enable: true,
            uploader_type: KOPIA_UPLOADER.to_string(),
        }
    });

    DataProtectionApplicationSpec {
        backup_locations: vec![BackupLocation {
            velero: Some(VeleroBackupLocation {
                provider: location.provider.clone(),
                default: true,
                object_storage: ObjectStorage {
                    bucket: location.bucket.clone(),
                    prefix: Some(location.prefix.clone()),
                    ca_cert: location.ca_cert.clone(),
                },
                config,
                credential: Some(SecretKeyRef {
                    name: location.credential_secret.clone(),
                    key: location.credential_key.clone(),
                }),
            }),
        }],
        configuration: ApplicationConfig {
            velero: VeleroConfig {
                default_plugins: default_plugins(&location.provider, backup_type, hypershift),
            },
            node_agent,
        },
        backup_images: Some(settings.backup_images),
    }
}

/// Describes the Reconciled condition of the DPA, `None` when it is `True`.
fn reconcile_state(dpa: Option<&DataProtectionApplication>) -> Option<String> {
    let Some(dpa) = dpa else {
        return Some("not found".to_string());
    };
    match dpa.condition(RECONCILED_CONDITION) {
        Some(c) if c.status == "True" => None,
        Some(c) => Some(format!(
            "{}={} reason={} message={}",
            c.type_,
            c.status,
            c.reason.as_deref().unwrap_or_default(),
            c.message.as_deref().unwrap_or_default()
        )),
        None => Some("no Reconciled condition".to_string()),
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DpaOps: Send + Sync {
    /// Applies the DPA for the backup type and waits until Velero can use the storage location.
    async fn configure(&self, backup_type: BackupType, hypershift: bool) -> Result<(), DpaError>;

    async fn backup_images_enabled(&self) -> Result<bool, DpaError>;
}

pub struct DpaManager {
    client: AsyncK8sClient,
    settings: DpaSettings,
    reconcile_timeout: Duration,
    poll_interval: Duration,
}

impl DpaManager {
    pub fn new(
        client: AsyncK8sClient,
        settings: DpaSettings,
        reconcile_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            settings,
            reconcile_timeout,
            poll_interval,
        }
    }

    fn resource(&self, backup_type: BackupType, hypershift: bool) -> DataProtectionApplication {
        let mut dpa = DataProtectionApplication::new(
            &self.settings.name,
            build_spec(&self.settings, backup_type, hypershift),
        );
        dpa.metadata = ObjectMeta {
            name: Some(self.settings.name.clone()),
            namespace: Some(self.settings.namespace.clone()),
            labels: Some(DefaultLabels::new().get()),
            ..Default::default()
        };
        dpa
    }

    async fn wait_reconciled(&self) -> Result<(), DpaError> {
        let schedule = PollSchedule::new(self.reconcile_timeout, self.poll_interval);
        loop {
            let dpa = self
                .client
                .get_opt::<DataProtectionApplication>(&self.settings.namespace, &self.settings.name)
                .await?;
            let Some(last_state) = reconcile_state(dpa.as_ref()) else {
                info!(dpa = self.settings.name, "DataProtectionApplication reconciled");
                return Ok(());
            };
            debug!(dpa = self.settings.name, state = last_state, "waiting for reconciliation");
            if !schedule.wait_next().await {
                return Err(DpaError::NotReconciled {
                    name: self.settings.name.clone(),
                    timeout: self.reconcile_timeout,
                    last_state,
                });
            }
        }
    }

    async fn wait_storage_available(&self) -> Result<(), DpaError> {
        let name = self.settings.storage_location();
        let schedule = PollSchedule::new(self.reconcile_timeout, self.poll_interval);
        loop {
            let phase = self
                .client
                .get_opt::<BackupStorageLocation>(&self.settings.namespace, &name)
                .await?
                .and_then(|bsl| bsl.status)
                .and_then(|status| status.phase)
                .unwrap_or_default();
            if phase == BSL_AVAILABLE_PHASE {
                info!(bsl = name, "BackupStorageLocation available");
                return Ok(());
            }
            if !schedule.wait_next().await {
                return Err(DpaError::StorageUnavailable {
                    name,
                    timeout: self.reconcile_timeout,
                    phase,
                });
            }
        }
    }
}

#[async_trait]
impl DpaOps for DpaManager {
    async fn configure(&self, backup_type: BackupType, hypershift: bool) -> Result<(), DpaError> {
        let dpa = self.resource(backup_type, hypershift);
        self.client
            .create_or_replace(&self.settings.namespace, &dpa)
            .await?;
        info!(dpa = self.settings.name, ?backup_type, hypershift, "DataProtectionApplication applied");
        self.wait_reconciled().await?;
        self.wait_storage_available().await
    }

    async fn backup_images_enabled(&self) -> Result<bool, DpaError> {
        let dpa = self
            .client
            .get_opt::<DataProtectionApplication>(&self.settings.namespace, &self.settings.name)
            .await?;
        // The operator backs up images unless the flag is explicitly false.
        Ok(dpa
            .map(|d| d.spec.backup_images.unwrap_or(true))
            .unwrap_or(self.settings.backup_images))
    }
}
