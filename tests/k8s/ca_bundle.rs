use crate::tools::k8s_env::K8sEnv;
use oadp_e2e::ca_bundle::{verify_ca_bundle, CaBundleError};

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs k8s cluster"]
async fn k8s_ca_bundle_absent_when_image_backup_disabled() {
    let mut env = K8sEnv::new().await;
    let namespace = env.test_namespace().await;
    let client = env.async_client();

    verify_ca_bundle(&client, &namespace, "velero-ca-bundle", false)
        .await
        .unwrap();
    assert_eq!(
        verify_ca_bundle(&client, &namespace, "velero-ca-bundle", true).await,
        Err(CaBundleError::Missing("velero-ca-bundle".to_string()))
    );
}
