use crate::tools::k8s_env::K8sEnv;
use oadp_e2e::config::{BackupType, CaseConfig, SuiteConfig, Verification};
use oadp_e2e::dpa::{DpaManager, DpaOps, DpaSettings};
use oadp_e2e::driver::api::ApiDriver;
use oadp_e2e::lifecycle::LogFilter;
use oadp_e2e::orchestrator::{CaseRunner, CaseSettings, Stage};
use oadp_e2e::run_log::RunLog;
use oadp_e2e::workload::ClusterWorkloads;
use std::path::PathBuf;
use std::time::Duration;

/// Reads the suite configuration pointed by `OADP_E2E_CONFIG`.
fn suite_config() -> SuiteConfig {
    let path = std::env::var("OADP_E2E_CONFIG").expect("OADP_E2E_CONFIG not set");
    SuiteConfig::load(&PathBuf::from(path)).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs k8s cluster with OADP installed"]
async fn k8s_backup_and_restore_nginx() {
    let mut env = K8sEnv::new().await;
    let namespace = env.test_namespace().await;
    let config = suite_config();
    let client = env.async_client();

    let dpa = DpaManager::new(
        client.clone(),
        DpaSettings::from(&config),
        config.timeouts.dpa_reconcile,
        config.timeouts.poll_interval,
    );
    dpa.configure(BackupType::Filesystem, false).await.unwrap();

    let driver = ApiDriver::new(
        client.clone(),
        &config.oadp_namespace,
        &config.velero_label_selector,
    );
    let workloads = ClusterWorkloads::new(
        client,
        &config.dc_post_restore_script,
        config.timeouts.namespace_deletion,
        config.timeouts.poll_interval,
    );
    let settings = CaseSettings {
        storage_location: config.storage_location(),
        verification_timeout: config.timeouts.verification,
        poll_interval: config.timeouts.poll_interval,
        log_filter: LogFilter::new(config.known_benign_errors.clone()),
    };
    let case = CaseConfig {
        name: "nginx-fs".to_string(),
        namespaces: vec![namespace],
        backup_type: BackupType::Filesystem,
        manifests: vec![PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/k8s/fixtures/nginx.yaml")],
        pre_backup: vec![Verification::DeploymentsAvailable],
        post_restore: vec![
            Verification::DeploymentsAvailable,
            Verification::ConfigMapExists {
                name: "nginx-settings".to_string(),
            },
        ],
        timeout: Duration::from_secs(20 * 60),
    };

    let mut log = RunLog::new();
    let report = CaseRunner::new(&driver, &workloads, &settings)
        .run(&case, "it", &mut log)
        .await;

    assert!(report.passed(), "{:?}\n{}", report.result, log.lines().join("\n"));
    assert_eq!(report.stages.last(), Some(&Stage::TornDown));
}
