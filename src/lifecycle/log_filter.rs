/// Default number of error lines kept when reporting a failed operation.
pub const DEFAULT_LOG_TAIL: usize = 50;

/// Selects the error lines of an operation log that are worth reporting.
///
/// Lines are kept when they carry an error level, in logfmt or JSON, and contain none of the
/// configured benign substrings. Only the last `tail` of them are returned.
#[derive(Debug, Clone)]
pub struct LogFilter {
    benign: Vec<String>,
    tail: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl LogFilter {
    pub fn new(benign: Vec<String>) -> Self {
        Self {
            benign,
            tail: DEFAULT_LOG_TAIL,
        }
    }

    pub fn with_tail(self, tail: usize) -> Self {
        Self { tail, ..self }
    }

    pub fn is_relevant(&self, line: &str) -> bool {
        is_error_line(line) && !self.benign.iter().any(|b| line.contains(b.as_str()))
    }

    pub fn filter(&self, lines: &[String]) -> Vec<String> {
        let relevant: Vec<&String> = lines.iter().filter(|l| self.is_relevant(l)).collect();
        let skip = relevant.len().saturating_sub(self.tail);
        relevant.into_iter().skip(skip).cloned().collect()
    }
}

fn is_error_line(line: &str) -> bool {
    line.contains("level=error") || line.contains("\"level\":\"error\"")
}
