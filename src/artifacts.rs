use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Writes the diagnostics of failed case attempts to disk.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stores `lines` in `<dir>/<case>-attempt<n>-<timestamp>.log` and returns the file path.
    pub fn write(&self, case: &str, attempt: u32, lines: &[String]) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = self
            .dir
            .join(format!("{}-attempt{attempt}-{timestamp}.log", sanitize(case)));
        fs::write(&path, lines.join("\n"))?;
        info!(case, path = %path.display(), "diagnostics written");
        Ok(path)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
