use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FailureKind;
use crate::queue::JobStatus;

/// A file a handler wants written under the results directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the results directory.
    pub path: PathBuf,
    pub content: String,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Structured description of input a job is missing, so whoever authored it
/// can fix and resubmit it without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedsDescriptor {
    pub missing: Vec<String>,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_job: Option<Value>,
    /// Raw upstream error, kept for diagnosis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NeedsDescriptor {
    pub fn new(missing: &[&str], hint: impl Into<String>) -> Self {
        Self {
            missing: missing.iter().map(|s| s.to_string()).collect(),
            hint: hint.into(),
            example_job: None,
            error: None,
        }
    }

    pub fn with_example(mut self, example: Value) -> Self {
        self.example_job = Some(example);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// What one execution attempt produced. Every handler returns exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        artifacts: Vec<Artifact>,
        note: String,
        /// Job documents to enqueue once this job has terminated.
        follow_ups: Vec<Value>,
        /// Text-generation tokens spent producing the result.
        tokens: u64,
    },
    NeedsInput {
        needs: NeedsDescriptor,
        details: Option<Value>,
    },
    Failed {
        kind: FailureKind,
        error: String,
        details: Option<Value>,
    },
}

impl Outcome {
    pub fn success(note: impl Into<String>) -> Self {
        Outcome::Success {
            artifacts: Vec::new(),
            note: note.into(),
            follow_ups: Vec::new(),
            tokens: 0,
        }
    }

    pub fn needs(needs: NeedsDescriptor) -> Self {
        Outcome::NeedsInput {
            needs,
            details: None,
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Outcome::Failed {
            kind,
            error: error.into(),
            details: None,
        }
    }

    /// Adds an artifact to a success outcome; no-op on other variants.
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        if let Outcome::Success { artifacts, .. } = &mut self {
            artifacts.push(artifact);
        }
        self
    }

    /// Adds follow-up jobs to a success outcome; no-op on other variants.
    pub fn with_follow_ups(mut self, jobs: Vec<Value>) -> Self {
        if let Outcome::Success { follow_ups, .. } = &mut self {
            follow_ups.extend(jobs);
        }
        self
    }

    /// Adds spent tokens to a success outcome; no-op on other variants.
    pub fn with_tokens(mut self, spent: u64) -> Self {
        if let Outcome::Success { tokens, .. } = &mut self {
            *tokens += spent;
        }
        self
    }

    /// Tokens spent, if any were reported.
    pub fn tokens(&self) -> Option<u64> {
        match self {
            Outcome::Success { tokens, .. } if *tokens > 0 => Some(*tokens),
            _ => None,
        }
    }

    /// Attaches structured details to a failed or needs-input outcome.
    pub fn with_details(mut self, value: Value) -> Self {
        match &mut self {
            Outcome::NeedsInput { details, .. } | Outcome::Failed { details, .. } => {
                *details = Some(value);
            }
            Outcome::Success { .. } => {}
        }
        self
    }

    /// Terminal job status this outcome maps to.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            Outcome::Success { .. } => JobStatus::Done,
            Outcome::NeedsInput { .. } => JobStatus::NeedsInput,
            Outcome::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::NeedsInput { .. } => Some(FailureKind::MissingInput),
            Outcome::Failed { kind, .. } => Some(*kind),
        }
    }

    /// One-line summary for the ops log.
    pub fn note(&self) -> String {
        let note = match self {
            Outcome::Success { note, .. } => note.clone(),
            Outcome::NeedsInput { needs, .. } => format!("missing: {}", needs.missing.join(", ")),
            Outcome::Failed { kind, error, .. } => format!("{kind}: {error}"),
        };
        one_line(&note, 160)
    }
}

/// Collapses whitespace and truncates to `max` characters.
pub fn one_line(s: &str, max: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
