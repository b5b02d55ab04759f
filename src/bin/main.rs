use clap::Parser;
use std::error::Error;
use std::process;
use tracing::{error, info};

use oadp_e2e::artifacts::ArtifactWriter;
use oadp_e2e::ca_bundle::verify_ca_bundle;
use oadp_e2e::cli::{Cli, Command, RunArgs};
use oadp_e2e::config::SuiteConfig;
use oadp_e2e::dpa::{DpaManager, DpaOps, DpaSettings};
use oadp_e2e::driver::api::ApiDriver;
use oadp_e2e::driver::cli::CliDriver;
use oadp_e2e::driver::OperationDriver;
use oadp_e2e::flake::FlakeDetector;
use oadp_e2e::hcp::{ClusterHostedClusters, HcpRunner, HcpSettings};
use oadp_e2e::k8s::client::AsyncK8sClient;
use oadp_e2e::lifecycle::LogFilter;
use oadp_e2e::logging::Logging;
use oadp_e2e::orchestrator::{CaseRunner, CaseSettings};
use oadp_e2e::suite::{AppCase, HcpCase, SuiteCase, SuiteRunner};
use oadp_e2e::teardown::TeardownPolicy;
use oadp_e2e::workload::ClusterWorkloads;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    Logging::try_init(&cli.log_level)?;

    let config = SuiteConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), "suite configuration loaded");

    let client = AsyncK8sClient::try_new(&config.client).await?;
    let dpa = DpaManager::new(
        client.clone(),
        DpaSettings::from(&config),
        config.timeouts.dpa_reconcile,
        config.timeouts.poll_interval,
    );

    let driver: Box<dyn OperationDriver> = if cli.cli {
        Box::new(CliDriver::new(&config.kubectl, &config.oadp_namespace))
    } else {
        Box::new(ApiDriver::new(
            client.clone(),
            &config.oadp_namespace,
            &config.velero_label_selector,
        ))
    };

    let passed = match cli.command {
        Command::VerifyCaBundle => {
            let backup_images = dpa.backup_images_enabled().await?;
            verify_ca_bundle(
                &client,
                &config.oadp_namespace,
                &config.ca_bundle_configmap,
                backup_images,
            )
            .await?;
            true
        }
        Command::Run(args) => run_cases(&config, &args, &client, &dpa, driver.as_ref()).await?,
        Command::Hcp(args) => run_hcp_cases(&config, &args, &client, &dpa, driver.as_ref()).await?,
    };

    if !passed {
        process::exit(1);
    }
    Ok(())
}

fn selected<'c, T>(items: &'c [T], name: impl Fn(&T) -> &str, args: &RunArgs) -> Vec<&'c T> {
    items
        .iter()
        .filter(|item| args.cases.is_empty() || args.cases.iter().any(|c| c == name(item)))
        .collect()
}

fn suite_runner<'a>(
    config: &SuiteConfig,
    args: &RunArgs,
    dpa: &'a dyn DpaOps,
    flakes: &'a FlakeDetector,
    artifacts: &'a ArtifactWriter,
) -> SuiteRunner<'a> {
    let attempts = args.flake_attempts.unwrap_or(config.flake_attempts);
    SuiteRunner::new(dpa, flakes, artifacts, attempts)
}

async fn run_cases(
    config: &SuiteConfig,
    args: &RunArgs,
    client: &AsyncK8sClient,
    dpa: &dyn DpaOps,
    driver: &dyn OperationDriver,
) -> Result<bool, Box<dyn Error>> {
    let workloads = ClusterWorkloads::new(
        client.clone(),
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
    let cases: Vec<AppCase> = selected(&config.cases, |c| c.name.as_str(), args)
        .into_iter()
        .map(|c| AppCase::new(c, CaseRunner::new(driver, &workloads, &settings)))
        .collect();

    let flakes = FlakeDetector::new(&config.known_flakes)?;
    let artifacts = ArtifactWriter::new(&config.artifact_dir);
    let cases: Vec<&dyn SuiteCase> = cases.iter().map(|c| c as &dyn SuiteCase).collect();
    let report = suite_runner(config, args, dpa, &flakes, &artifacts)
        .run(&cases)
        .await;
    print_summary(&report);
    Ok(report.passed())
}

async fn run_hcp_cases(
    config: &SuiteConfig,
    args: &RunArgs,
    client: &AsyncK8sClient,
    dpa: &dyn DpaOps,
    driver: &dyn OperationDriver,
) -> Result<bool, Box<dyn Error>> {
    let clusters = ClusterHostedClusters::new(
        client.clone(),
        TeardownPolicy {
            graceful_timeout: config.timeouts.hosted_cluster_deletion,
            retry_timeout: config.timeouts.hosted_cluster_deletion_retry,
            interval: config.timeouts.poll_interval,
        },
        config.timeouts.namespace_deletion,
    );
    let settings = HcpSettings {
        storage_location: config.storage_location(),
        available_timeout: config.timeouts.hosted_cluster_available,
        poll_interval: config.timeouts.poll_interval,
        log_filter: LogFilter::new(config.known_benign_errors.clone()),
    };
    let cases: Vec<HcpCase> = selected(&config.hcp_cases, |c| c.name.as_str(), args)
        .into_iter()
        .map(|c| HcpCase::new(c, HcpRunner::new(driver, &clusters, &settings)))
        .collect();

    let flakes = FlakeDetector::new(&config.known_flakes)?;
    let artifacts = ArtifactWriter::new(&config.artifact_dir);
    let cases: Vec<&dyn SuiteCase> = cases.iter().map(|c| c as &dyn SuiteCase).collect();
    let report = suite_runner(config, args, dpa, &flakes, &artifacts)
        .run(&cases)
        .await;
    print_summary(&report);
    Ok(report.passed())
}

fn print_summary(report: &oadp_e2e::suite::SuiteReport) {
    if report.passed() {
        info!("all cases passed");
    } else {
        error!(failed = report.failed(), "some cases failed");
    }
    println!("{report}");
}
