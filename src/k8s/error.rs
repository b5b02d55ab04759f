use kube::config::KubeconfigError;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum K8sError {
    #[error("the kube client returned an error: `{0}`")]
    Generic(#[from] kube::Error),

    #[error("it is not possible to read kubeconfig: `{0}`")]
    UnableToSetupClientKubeconfig(#[from] KubeconfigError),

    #[error("missing resource definition: api_version: {0}, kind: {1}")]
    MissingKind(String, String),

    #[error("error serializing/deserializing yaml: `{0}`")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("object is missing the `{0}` field")]
    MissingField(String),

    #[error("reading manifest `{0}`: `{1}`")]
    ManifestRead(String, std::io::Error),

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
}
