//! Persists what a job execution produced.
//!
//! Layout under the results directory:
//!
//! ```text
//! agent_results/
//!   ROI_PLAN.md                          primary artifacts, latest run wins
//!   records/{job_id}.{ts}.result.json    one per attempt, never overwritten
//!   diagnostics/{STATUS}_{job_id}_{ts}.md
//!   RUNNER_HEARTBEAT.md
//!   DAILY_YYYY-MM-DD.md
//! ops/needs/{job_id}.needs.json
//! ```
//!
//! Every write except the daily digest goes through
//! [`atomic_write`](crate::fsio::atomic_write).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{Artifact, NeedsDescriptor, Outcome, one_line};
use crate::error::{FailureKind, OutboxError};
use crate::fsio::{atomic_write, compact_stamp, ensure_dir, sanitize, unique_path};
use crate::queue::JobStatus;

pub const RECORDS_DIR: &str = "records";
pub const DIAGNOSTICS_DIR: &str = "diagnostics";
pub const HEARTBEAT_FILE: &str = "RUNNER_HEARTBEAT.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Machine-readable record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub job_type: String,
    pub status: ResultStatus,
    pub generated_at: DateTime<Utc>,
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs: Option<NeedsDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Text-generation tokens spent, when the handler reported any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl JobResult {
    pub fn from_outcome(
        job_id: &str,
        job_type: &str,
        outcome: &Outcome,
        artifacts: &[PathBuf],
    ) -> Self {
        let mut record = JobResult {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            status: ResultStatus::Failed,
            generated_at: Utc::now(),
            artifacts: artifacts.iter().map(|p| p.display().to_string()).collect(),
            error: None,
            error_kind: outcome.failure_kind(),
            needs: None,
            details: None,
            note: None,
            tokens: outcome.tokens(),
        };
        match outcome {
            Outcome::Success { note, .. } => {
                record.status = ResultStatus::Success;
                record.note = Some(note.clone()).filter(|n| !n.is_empty());
            }
            Outcome::NeedsInput { needs, details } => {
                record.error = Some(format!("missing input: {}", needs.missing.join(", ")));
                record.needs = Some(needs.clone());
                record.details = details.clone();
            }
            Outcome::Failed { error, details, .. } => {
                record.error = Some(error.clone());
                record.details = details.clone();
            }
        }
        record
    }
}

/// Writes artifacts, result records, needs descriptors and diagnostics.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    results_dir: PathBuf,
    needs_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(results_dir: impl Into<PathBuf>, needs_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            needs_dir: needs_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn needs_dir(&self) -> &Path {
        &self.needs_dir
    }

    /// Writes handler artifacts at their stable paths, overwriting the
    /// previous run's version.
    pub fn write_artifacts(&self, artifacts: &[Artifact]) -> Result<Vec<PathBuf>, OutboxError> {
        artifacts
            .iter()
            .map(|artifact| {
                let path = self.resolve(&artifact.path)?;
                atomic_write(&path, artifact.content.as_bytes())?;
                Ok(path)
            })
            .collect()
    }

    /// Writes a new result record. Existing records are never replaced.
    pub fn write_record(&self, record: &JobResult) -> Result<PathBuf, OutboxError> {
        let dir = self.results_dir.join(RECORDS_DIR);
        ensure_dir(&dir)?;
        let stem = format!(
            "{}.{}",
            sanitize(&record.job_id),
            compact_stamp(record.generated_at)
        );
        let path = unique_path(&dir, &stem, ".result.json");
        atomic_write(&path, &serde_json::to_vec_pretty(record)?)?;
        Ok(path)
    }

    /// Writes the needs descriptor for `job_id`, replacing an older one.
    pub fn write_needs(&self, job_id: &str, needs: &NeedsDescriptor) -> Result<PathBuf, OutboxError> {
        let path = self.needs_dir.join(format!("{}.needs.json", sanitize(job_id)));
        atomic_write(&path, &serde_json::to_vec_pretty(needs)?)?;
        Ok(path)
    }

    /// Writes a human-readable explanation of a FAILED or NEEDS_INPUT job.
    pub fn write_diagnostic(
        &self,
        job_id: &str,
        job_type: &str,
        status: JobStatus,
        message: &str,
        details: Option<&Value>,
        raw_job: &str,
    ) -> Result<PathBuf, OutboxError> {
        let now = Utc::now();
        let dir = self.results_dir.join(DIAGNOSTICS_DIR);
        ensure_dir(&dir)?;
        let stem = format!("{}_{}_{}", status.as_str(), sanitize(job_id), compact_stamp(now));
        let path = unique_path(&dir, &stem, ".md");

        let mut body = format!(
            "# JOB {status}\n\n- time: {}\n- job: `{job_id}`\n- type: `{job_type}`\n\n## Message\n\n{message}\n",
            now.to_rfc3339()
        );
        if let Some(details) = details {
            let pretty = serde_json::to_string_pretty(details).unwrap_or_default();
            body.push_str(&format!("\n## Details\n\n```json\n{pretty}\n```\n"));
        }
        body.push_str(&format!("\n## Raw job\n\n```json\n{}\n```\n", raw_job.trim_end()));

        atomic_write(&path, body.as_bytes())?;
        Ok(path)
    }

    /// Proof that the runner was alive at `at`.
    pub fn write_heartbeat(&self, at: DateTime<Utc>, pending: usize) -> Result<PathBuf, OutboxError> {
        let path = self.results_dir.join(HEARTBEAT_FILE);
        let body = format!(
            "# Runner heartbeat\n\nLast run: {}\nPending jobs at start: {pending}\n",
            at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        atomic_write(&path, body.as_bytes())?;
        Ok(path)
    }

    /// Appends one line to `DAILY_YYYY-MM-DD.md`.
    pub fn append_daily(
        &self,
        at: DateTime<Utc>,
        job_id: &str,
        status: JobStatus,
        reason: Option<&str>,
        tokens: Option<u64>,
    ) -> Result<PathBuf, OutboxError> {
        ensure_dir(&self.results_dir)?;
        let path = self
            .results_dir
            .join(format!("DAILY_{}.md", at.format("%Y-%m-%d")));
        let mut line = format!("[{}] job={job_id}  status={status}", at.format("%H:%M"));
        if let Some(reason) = reason.filter(|_| status != JobStatus::Done) {
            line.push_str(&format!("  reason={}", one_line(reason, 160)));
        }
        if let Some(tokens) = tokens {
            line.push_str(&format!("  tokens={tokens}"));
        }
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| OutboxError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| OutboxError::io(&path, e))?;
        Ok(path)
    }

    /// Joins a handler-supplied relative path onto the results directory,
    /// refusing anything that would escape it.
    fn resolve(&self, rel: &Path) -> Result<PathBuf, OutboxError> {
        let safe = rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || rel.as_os_str().is_empty() {
            return Err(OutboxError::UnsafePath(rel.to_path_buf()));
        }
        Ok(self.results_dir.join(rel))
    }
}
