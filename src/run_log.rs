/// Diagnostic lines collected while a single case attempt runs.
///
/// Each attempt owns its log, which is appended to while the case runs and drained once when the
/// failure is triaged.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Appends a titled section.
    pub fn section<I, S>(&mut self, title: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.push(format!("--- {title} ---"));
        self.lines.extend(lines.into_iter().map(Into::into));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_the_log() {
        let mut log = RunLog::new();
        log.push("first");
        log.section("velero", ["a", "b"]);
        assert_eq!(log.lines().len(), 4);

        let drained = log.drain();
        assert_eq!(drained, vec!["first", "--- velero ---", "a", "b"]);
        assert!(log.is_empty());
        assert!(log.drain().is_empty());
    }
}
