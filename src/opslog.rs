use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::dispatch::one_line;
use crate::fsio::ensure_dir;
use crate::queue::JobStatus;

/// Append-only audit trail, one line per terminal transition.
///
/// Writes are best effort: a failed append is retried once and then only
/// reported through `tracing`. Job state never depends on this file.
#[derive(Debug, Clone)]
pub struct OpsLog {
    path: PathBuf,
}

impl OpsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Formats one ops log line (without the trailing newline).
    pub fn format_line(
        at: DateTime<Utc>,
        job_type: &str,
        status: JobStatus,
        note: &str,
        terminal_file: &str,
    ) -> String {
        format!(
            "[{}] {job_type} -> {status} ({}) ({terminal_file})",
            at.format("%Y-%m-%dT%H:%M:%SZ"),
            one_line(note, 160)
        )
    }

    /// Appends a transition. Returns whether the line reached the file.
    pub fn record(&self, job_type: &str, status: JobStatus, note: &str, terminal_file: &Path) -> bool {
        let name = terminal_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let line = Self::format_line(Utc::now(), job_type, status, note, &name);

        for attempt in 1..=2 {
            match self.append(&line) {
                Ok(()) => return true,
                Err(e) => warn!(
                    path = %self.path.display(),
                    attempt,
                    error = %e,
                    "ops log append failed"
                ),
            }
        }
        false
    }

    /// Lines currently in the log. Missing file reads as empty.
    pub fn lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.path)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn line_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        let line = OpsLog::format_line(
            at,
            "ROI_SCAN",
            JobStatus::NeedsInput,
            "missing:\n goal",
            "a.NEEDS_INPUT.20260301T123005Z.json",
        );
        assert_eq!(
            line,
            "[2026-03-01T12:30:05Z] ROI_SCAN -> NEEDS_INPUT (missing: goal) (a.NEEDS_INPUT.20260301T123005Z.json)"
        );
    }

    #[test]
    fn record_appends_and_creates_parent() {
        let tmp = TempDir::new().unwrap();
        let log = OpsLog::new(tmp.path().join("ops/logs/outbox.log"));
        assert!(log.record("ROI_SCAN", JobStatus::Done, "ok", Path::new("/x/a.DONE.1.json")));
        assert!(log.record("FOO", JobStatus::Failed, "no", Path::new("b.FAILED.1.json")));

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("ROI_SCAN -> DONE (ok) (a.DONE.1.json)"));
        assert!(lines[1].contains("FOO -> FAILED"));
    }

    #[test]
    fn unwritable_log_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        // A directory where the log file should be.
        let path = tmp.path().join("ops.log");
        std::fs::create_dir(&path).unwrap();
        let log = OpsLog::new(&path);
        assert!(!log.record("ROI_SCAN", JobStatus::Done, "ok", Path::new("a.json")));
        assert!(log.lines().is_empty());
    }
}
