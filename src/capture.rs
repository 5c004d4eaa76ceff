use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

/// Writes each captured page to `<root>/<job>/<label>.html` and `.png`.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: &Path, job_title: &str) -> Self {
        Self {
            dir: root.join(slug(job_title)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a capture. Returns the screenshot path when one was written.
    pub fn save(&self, label: &str, html: &str, png: Option<&[u8]>) -> Result<Option<PathBuf>> {
        std::fs::create_dir_all(&self.dir)?;
        let html_path = self.dir.join(format!("{label}.html"));
        std::fs::write(&html_path, html)?;
        debug!(path = %html_path.display(), "saved page html");

        let Some(png) = png else {
            return Ok(None);
        };
        let png_path = self.dir.join(format!("{label}.png"));
        match std::fs::write(&png_path, png) {
            Ok(()) => Ok(Some(png_path)),
            Err(e) => {
                warn!(path = %png_path.display(), error = %e, "could not save screenshot");
                Ok(None)
            }
        }
    }
}

/// File-system friendly form of a job title: lowercase ASCII words joined by `_`.
pub fn slug(title: &str) -> String {
    let words: Vec<String> = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect();
    if words.is_empty() {
        "job".to_string()
    } else {
        words.join("_").chars().take(80).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_keeps_ascii_words() {
        assert_eq!(slug("Senior Rust Engineer (Remote) – AU"), "senior_rust_engineer_remote_au");
        assert_eq!(slug("  !!! "), "job");
    }

    #[test]
    fn save_writes_html_and_png() {
        let root = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(root.path(), "Rust Engineer");

        let png = writer.save("step_1", "<html></html>", Some(b"\x89PNG")).unwrap();

        assert_eq!(png, Some(root.path().join("rust_engineer/step_1.png")));
        let html = std::fs::read_to_string(root.path().join("rust_engineer/step_1.html")).unwrap();
        assert_eq!(html, "<html></html>");
        assert_eq!(writer.save("step_2", "<p>", None).unwrap(), None);
    }
}
