use regex::RegexSet;
use std::fmt;

#[derive(thiserror::Error, Debug)]
#[error("invalid flake signature: `{0}`")]
pub struct FlakeError(#[from] regex::Error);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The failure matches a known environmental signature.
    Flake,
    Regression,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Flake => f.write_str("flake"),
            FailureClass::Regression => f.write_str("regression"),
        }
    }
}

/// Classifies failures by matching their message and diagnostics against known flake signatures.
///
/// The classification only decides whether another attempt is granted, a case never passes
/// because its failure looks like a flake.
#[derive(Debug, Clone)]
pub struct FlakeDetector {
    signatures: RegexSet,
}

impl FlakeDetector {
    pub fn new<I, S>(signatures: I) -> Result<Self, FlakeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            signatures: RegexSet::new(signatures)?,
        })
    }

    pub fn classify(&self, message: &str, logs: &[String]) -> FailureClass {
        let matched = self.signatures.is_match(message)
            || logs.iter().any(|line| self.signatures.is_match(line));
        if matched {
            FailureClass::Flake
        } else {
            FailureClass::Regression
        }
    }
}
