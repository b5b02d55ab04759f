use crate::tools::k8s_env::K8sEnv;
use oadp_e2e::config::Verification;
use oadp_e2e::workload::{ClusterWorkloads, Workloads};
use std::path::PathBuf;
use std::time::Duration;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/k8s/fixtures")
        .join(name)
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs k8s cluster"]
async fn k8s_apply_and_verify_workload() {
    let mut env = K8sEnv::new().await;
    let namespace = env.test_namespace().await;
    let workloads = ClusterWorkloads::new(
        env.async_client(),
        "dc-post-restore.sh",
        Duration::from_secs(120),
        Duration::from_secs(2),
    );

    let applied = workloads
        .apply_manifests(&namespace, &[fixture("nginx.yaml")])
        .await
        .unwrap();
    assert_eq!(applied, 2);

    for verification in [
        Verification::ConfigMapExists {
            name: "nginx-settings".to_string(),
        },
        Verification::DeploymentsAvailable,
        Verification::PodsRunning {
            label_selector: "app=nginx".to_string(),
        },
    ] {
        workloads
            .verify(&namespace, &verification, Duration::from_secs(180))
            .await
            .unwrap();
    }

    assert!(!workloads.has_deployment_configs(&namespace).await.unwrap());
    assert!(!workloads.pod_summary(&namespace).await.unwrap().is_empty());

    workloads.delete_namespace(&namespace).await.unwrap();
    // a second deletion finds nothing and succeeds
    workloads.delete_namespace(&namespace).await.unwrap();
}
