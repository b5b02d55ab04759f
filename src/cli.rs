use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "oadp-e2e",
    about = "End-to-end tests for the OADP operator",
    long_about = "Runs backup and restore test cases against a live OpenShift cluster with OADP installed.\n
PREREQUISITES:
- KUBECONFIG pointing to the cluster, or running in-cluster
- The `kubectl oadp` plugin when --cli is set"
)]
pub struct Cli {
    /// Path to the suite configuration file
    #[arg(short, long, default_value = "oadp-e2e.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Create and observe operations through `kubectl oadp` instead of the API
    #[arg(long)]
    pub cli: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Backs up and restores the application test cases.
    Run(RunArgs),
    /// Backs up, force deletes and restores the HostedCluster test cases.
    Hcp(RunArgs),
    /// Checks the CA bundle ConfigMap against the image backup setting of the DPA.
    VerifyCaBundle,
}

#[derive(clap::Args, Debug, Default, PartialEq)]
pub struct RunArgs {
    /// Only run the cases with these names (repeatable)
    #[arg(long = "case")]
    pub cases: Vec<String>,

    /// Attempts granted to a case whose failures look like known flakes, overrides the config
    #[arg(long)]
    pub flake_attempts: Option<u32>,
}
