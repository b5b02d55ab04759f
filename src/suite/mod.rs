//! Sequential execution of the configured test cases.
use crate::artifacts::ArtifactWriter;
use crate::config::{BackupType, CaseConfig, HcpCaseConfig};
use crate::dpa::DpaOps;
use crate::flake::{FailureClass, FlakeDetector};
use crate::hcp::HcpRunner;
use crate::orchestrator::CaseRunner;
use crate::run_log::RunLog;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// A test case the suite can attempt several times.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SuiteCase: Send + Sync {
    fn name(&self) -> String;

    fn backup_type(&self) -> BackupType;

    /// Whether the DPA needs the HyperShift plugin.
    fn hypershift(&self) -> bool;

    /// Runs one attempt, diagnostics go to `log`.
    async fn attempt(&self, suffix: &str, log: &mut RunLog) -> Result<(), String>;
}

pub struct AppCase<'a> {
    config: &'a CaseConfig,
    runner: CaseRunner<'a>,
}

impl<'a> AppCase<'a> {
    pub fn new(config: &'a CaseConfig, runner: CaseRunner<'a>) -> Self {
        Self { config, runner }
    }
}

#[async_trait]
impl SuiteCase for AppCase<'_> {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn backup_type(&self) -> BackupType {
        self.config.backup_type
    }

    fn hypershift(&self) -> bool {
        false
    }

    async fn attempt(&self, suffix: &str, log: &mut RunLog) -> Result<(), String> {
        let report = self.runner.run(self.config, suffix, log).await;
        if !report.teardown_errors.is_empty() {
            log.section("teardown errors", report.teardown_errors);
        }
        report.result.map_err(|err| err.to_string())
    }
}

pub struct HcpCase<'a> {
    config: &'a HcpCaseConfig,
    runner: HcpRunner<'a>,
}

impl<'a> HcpCase<'a> {
    pub fn new(config: &'a HcpCaseConfig, runner: HcpRunner<'a>) -> Self {
        Self { config, runner }
    }
}

#[async_trait]
impl SuiteCase for HcpCase<'_> {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn backup_type(&self) -> BackupType {
        self.config.backup_type
    }

    fn hypershift(&self) -> bool {
        true
    }

    async fn attempt(&self, suffix: &str, log: &mut RunLog) -> Result<(), String> {
        self.runner
            .run(self.config, suffix, log)
            .await
            .map(|outcome| info!(case = self.config.name, ?outcome, "hosted cluster restored"))
            .map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Passed,
    Failed {
        class: FailureClass,
        message: String,
        artifact: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub name: String,
    pub attempts: u32,
    pub verdict: Verdict,
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<CaseOutcome>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.verdict, Verdict::Passed))
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.verdict, Verdict::Passed))
            .count()
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} cases, {} passed, {} failed",
            self.outcomes.len(),
            self.outcomes.len() - self.failed(),
            self.failed()
        )?;
        for outcome in &self.outcomes {
            match &outcome.verdict {
                Verdict::Passed => writeln!(
                    f,
                    "PASS {} (attempts: {})",
                    outcome.name, outcome.attempts
                )?,
                Verdict::Failed { class, message, .. } => writeln!(
                    f,
                    "FAIL {} [{class}] (attempts: {}): {}",
                    outcome.name,
                    outcome.attempts,
                    message.lines().next().unwrap_or_default()
                )?,
            }
        }
        Ok(())
    }
}

/// Suffix making the resources of an attempt unique across runs.
pub fn attempt_suffix(attempt: u32) -> String {
    format!("{}-{attempt}", Utc::now().format("%m%d%H%M%S"))
}

pub struct SuiteRunner<'a> {
    dpa: &'a dyn DpaOps,
    flakes: &'a FlakeDetector,
    artifacts: &'a ArtifactWriter,
    flake_attempts: u32,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(
        dpa: &'a dyn DpaOps,
        flakes: &'a FlakeDetector,
        artifacts: &'a ArtifactWriter,
        flake_attempts: u32,
    ) -> Self {
        Self {
            dpa,
            flakes,
            artifacts,
            flake_attempts: flake_attempts.max(1),
        }
    }

    /// Runs the cases in order, one at a time.
    pub async fn run(&self, cases: &[&dyn SuiteCase]) -> SuiteReport {
        let mut report = SuiteReport::default();
        for case in cases {
            report.outcomes.push(self.run_case(*case).await);
        }
        report
    }

    async fn run_case(&self, case: &dyn SuiteCase) -> CaseOutcome {
        let name = case.name();
        let mut attempt = 1;
        loop {
            info!(case = name, attempt, "running case");
            let mut log = RunLog::new();
            let result = match self.dpa.configure(case.backup_type(), case.hypershift()).await {
                Ok(()) => case.attempt(&attempt_suffix(attempt), &mut log).await,
                Err(err) => Err(err.to_string()),
            };

            let message = match result {
                Ok(()) => {
                    info!(case = name, attempt, "case passed");
                    return CaseOutcome {
                        name,
                        attempts: attempt,
                        verdict: Verdict::Passed,
                    };
                }
                Err(message) => message,
            };

            let lines = log.drain();
            let class = self.flakes.classify(&message, &lines);
            let artifact = match self.artifacts.write(&name, attempt, &lines_with(&message, lines)) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(case = name, %err, "could not write diagnostics");
                    None
                }
            };

            if class == FailureClass::Flake && attempt < self.flake_attempts {
                warn!(case = name, attempt, %message, "known flake, retrying");
                attempt += 1;
                continue;
            }
            error!(case = name, attempt, %class, %message, "case failed");
            return CaseOutcome {
                name,
                attempts: attempt,
                verdict: Verdict::Failed {
                    class,
                    message,
                    artifact,
                },
            };
        }
    }
}

fn lines_with(message: &str, mut lines: Vec<String>) -> Vec<String> {
    lines.insert(0, message.to_string());
    lines
}
