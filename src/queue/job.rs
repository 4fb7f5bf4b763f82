use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::OutboxError;
use crate::router::TypeNormalizer;

/// Keys that identify a job rather than feed its handler.
const ID_KEYS: &[&str] = &["job_id", "id"];

/// Nested objects that handlers may also read their fields from.
const NESTED_PAYLOAD_KEYS: &[&str] = &["payload", "input"];

/// Lifecycle status of a job. Terminal values are encoded in the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
    NeedsInput,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::NeedsInput => "NEEDS_INPUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of work read from the outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub payload: Map<String, Value>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// File the job was read from.
    pub source: PathBuf,
}

impl Job {
    /// Parses and validates the raw bytes of a job file.
    ///
    /// Only the top-level shape is checked: the document must be a JSON
    /// object, identifier fields must be strings and nested payload objects
    /// must be objects. A job with no recognizable type is still valid and
    /// resolves to `UNKNOWN`.
    pub fn parse(
        source: &Path,
        bytes: &[u8],
        modified: Option<DateTime<Utc>>,
    ) -> Result<Job, OutboxError> {
        let malformed = |reason: String| OutboxError::MalformedJob {
            path: source.to_path_buf(),
            reason,
        };

        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
        let Value::Object(payload) = value else {
            return Err(malformed("job must be a JSON object".to_string()));
        };

        for key in ID_KEYS {
            if let Some(v) = payload.get(*key)
                && !v.is_string()
                && !v.is_null()
            {
                return Err(malformed(format!("`{key}` must be a string")));
            }
        }
        for key in NESTED_PAYLOAD_KEYS {
            if let Some(v) = payload.get(*key)
                && !v.is_object()
                && !v.is_null()
            {
                return Err(malformed(format!("`{key}` must be an object")));
            }
        }

        let stem = file_stem(source);
        let id = ID_KEYS
            .iter()
            .filter_map(|k| payload.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| stem.clone());

        let (job_type, type_source) = TypeNormalizer::resolve(&payload, &stem);
        tracing::debug!(job_type = %job_type, source = ?type_source, "type resolved");

        let now = Utc::now();
        let created_at = payload
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .or(modified)
            .unwrap_or(now);

        Ok(Job {
            id,
            job_type,
            payload,
            status: JobStatus::Pending,
            created_at,
            updated_at: now,
            source: source.to_path_buf(),
        })
    }

    /// Looks a field up at the top level, then inside `payload` / `input`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.payload.get(key) {
            return Some(v);
        }
        NESTED_PAYLOAD_KEYS
            .iter()
            .filter_map(|k| self.payload.get(*k).and_then(Value::as_object))
            .find_map(|nested| nested.get(key))
    }

    /// First non-empty string among `keys`, searched with [`Job::field`].
    pub fn text(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.field(k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Top-level keys the job author actually provided, sorted.
    pub fn provided_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.payload.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Records a status transition.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// The job document as it was read.
    pub fn document(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

/// File stem of a job path, used as the fallback id and for terminal names.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string())
}
