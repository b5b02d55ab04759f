use super::runtime::tokio_runtime;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use oadp_e2e::k8s::client::AsyncK8sClient;
use oadp_e2e::k8s::labels::DefaultLabels;
use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = oadp_e2e::logging::Logging::try_init("debug");
    });
}

/// A live cluster reachable through the current kubeconfig. Namespaces created through
/// [K8sEnv::test_namespace] are removed when the value is dropped.
pub struct K8sEnv {
    pub client: Client,
    generated_namespaces: Vec<String>,
}

impl K8sEnv {
    pub async fn new() -> Self {
        init_logger();
        let client = Client::try_default().await.expect("fail to create client");
        K8sEnv {
            client,
            generated_namespaces: Vec::new(),
        }
    }

    pub fn async_client(&self) -> AsyncK8sClient {
        AsyncK8sClient::new(self.client.clone())
    }

    /// Creates a namespace with a generated name that is deleted on drop.
    pub async fn test_namespace(&mut self) -> String {
        let mut test_namespace = Namespace::default();
        test_namespace.metadata.generate_name = Some("oadp-e2e-test-".to_string());
        test_namespace.metadata.labels = Some(DefaultLabels::new().get());

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let created_namespace = namespaces
            .create(&PostParams::default(), &test_namespace)
            .await
            .expect("fail to create test namespace");

        let ns = created_namespace
            .metadata
            .name
            .expect("generated namespace without name");
        self.generated_namespaces.push(ns.clone());
        ns
    }
}

impl Drop for K8sEnv {
    fn drop(&mut self) {
        // There is no async drop: the cleanup runs on a separate runtime and `block_on` waits for it,
        // so tests holding a K8sEnv must use `#[tokio::test(flavor = "multi_thread")]`.
        let ns_api: Api<Namespace> = Api::all(self.client.clone());
        let generated_namespaces = std::mem::take(&mut self.generated_namespaces);
        futures::executor::block_on(async move {
            tokio_runtime()
                .spawn(async move {
                    for ns in generated_namespaces {
                        // already deleted by the test is fine
                        let _ = ns_api.delete(ns.as_str(), &DeleteParams::default()).await;
                    }
                })
                .await
                .unwrap();
        })
    }
}
