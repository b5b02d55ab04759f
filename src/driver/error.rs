use super::OperationRef;
use crate::command::CommandError;
use crate::k8s::Error as K8sError;

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("{0} not found")]
    NotFound(OperationRef),

    #[error("k8s error: `{0}`")]
    K8s(#[from] K8sError),

    #[error("kubectl oadp: {0}")]
    Command(#[from] CommandError),

    #[error("decoding `kubectl oadp` output for {0}: `{1}`")]
    Decode(OperationRef, serde_json::Error),
}

impl From<kube::Error> for DriverError {
    fn from(err: kube::Error) -> Self {
        DriverError::K8s(K8sError::Generic(err))
    }
}
