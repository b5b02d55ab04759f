//! Checks on the CA bundle ConfigMap the operator builds when image backup is enabled.
use crate::k8s::client::AsyncK8sClient;
use crate::k8s::Error as K8sError;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::info;

/// Certificates that must have been merged into the bundle.
pub const REQUIRED_MARKERS: [&str; 2] = ["SECOND-CERT-CONTENT", "THIRD-CERT-CONTENT"];
/// The bundle includes the system trust store, so it is always larger than this.
pub const MIN_BUNDLE_BYTES: usize = 50_000;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CaBundleError {
    #[error("CA bundle ConfigMap `{0}` not found while image backup is enabled")]
    Missing(String),

    #[error("CA bundle ConfigMap `{0}` exists while image backup is disabled")]
    Unexpected(String),

    #[error("CA bundle ConfigMap `{name}` does not contain `{marker}`")]
    MissingCertificate { name: String, marker: String },

    #[error("CA bundle ConfigMap `{name}` holds {size} bytes, expected more than {MIN_BUNDLE_BYTES}")]
    TooSmall { name: String, size: usize },

    #[error("k8s error: `{0}`")]
    K8s(String),
}

impl From<K8sError> for CaBundleError {
    fn from(err: K8sError) -> Self {
        CaBundleError::K8s(err.to_string())
    }
}

fn data_size(cm: &ConfigMap) -> usize {
    let text: usize = cm
        .data
        .iter()
        .flatten()
        .map(|(k, v)| k.len() + v.len())
        .sum();
    let binary: usize = cm
        .binary_data
        .iter()
        .flatten()
        .map(|(k, v)| k.len() + v.0.len())
        .sum();
    text + binary
}

/// Validates the looked up ConfigMap against the image backup setting.
pub fn check_bundle(
    name: &str,
    configmap: Option<&ConfigMap>,
    backup_images: bool,
) -> Result<(), CaBundleError> {
    match (configmap, backup_images) {
        (None, false) => Ok(()),
        (Some(_), false) => Err(CaBundleError::Unexpected(name.to_string())),
        (None, true) => Err(CaBundleError::Missing(name.to_string())),
        (Some(cm), true) => {
            let values: Vec<&String> = cm.data.iter().flat_map(|d| d.values()).collect();
            for marker in REQUIRED_MARKERS {
                if !values.iter().any(|v| v.contains(marker)) {
                    return Err(CaBundleError::MissingCertificate {
                        name: name.to_string(),
                        marker: marker.to_string(),
                    });
                }
            }
            let size = data_size(cm);
            if size <= MIN_BUNDLE_BYTES {
                return Err(CaBundleError::TooSmall {
                    name: name.to_string(),
                    size,
                });
            }
            Ok(())
        }
    }
}

pub async fn verify_ca_bundle(
    client: &AsyncK8sClient,
    namespace: &str,
    name: &str,
    backup_images: bool,
) -> Result<(), CaBundleError> {
    let configmap = client.get_configmap(namespace, name).await?;
    check_bundle(name, configmap.as_ref(), backup_images)?;
    info!(configmap = name, backup_images, "CA bundle verified");
    Ok(())
}
