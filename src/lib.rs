//! End-to-end suite for the OADP backup/restore operator and Hosted Control Planes.
//!
//! The crate drives a real cluster: it configures the DataProtectionApplication, deploys the
//! workloads of each test case, creates Backup and Restore resources, waits for them to finish
//! and checks the result. The `oadp-e2e` binary iterates the configured cases.

pub mod artifacts;
pub mod ca_bundle;
pub mod cli;
pub mod command;
pub mod config;
pub mod dpa;
pub mod driver;
pub mod flake;
pub mod hcp;
pub mod k8s;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod poll;
pub mod run_log;
pub mod suite;
pub mod teardown;
pub mod workload;
