use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::dispatch::{Artifact, JobHandler, NeedsDescriptor, Outcome};
use crate::queue::Job;

const DEFAULT_OUT_PATH: &str = "output.txt";

/// Writes `out_content` verbatim to `out_path` inside the results directory.
pub struct WriteResult {
    results_dir_name: String,
}

impl WriteResult {
    pub fn new(results_dir_name: &str) -> Self {
        Self {
            results_dir_name: results_dir_name.to_string(),
        }
    }

    /// Relative path under the results directory, or `None` when `raw`
    /// tries to leave it. A leading results directory name is dropped so
    /// `agent_results/a.txt` and `a.txt` land in the same place.
    fn target(&self, raw: &str) -> Option<PathBuf> {
        let trimmed = raw.trim().trim_start_matches('/');
        let rel = Path::new(trimmed);
        let rel = if !self.results_dir_name.is_empty() {
            rel.strip_prefix(&self.results_dir_name).unwrap_or(rel)
        } else {
            rel
        };
        if rel.as_os_str().is_empty()
            || rel.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(rel.to_path_buf())
    }
}

#[async_trait]
impl JobHandler for WriteResult {
    async fn handle(&self, job: &Job) -> anyhow::Result<Outcome> {
        let content = match job.field("out_content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Ok(Outcome::needs(
                    NeedsDescriptor::new(&["out_content"], "WRITE_RESULT needs `out_content`.")
                        .with_example(json!({
                            "action": "write_result",
                            "out_path": "hello.txt",
                            "out_content": "Hello"
                        })),
                ));
            }
            Some(other) => other.to_string(),
        };
        let raw_path = job.text(&["out_path"]).unwrap_or(DEFAULT_OUT_PATH);

        let Some(path) = self.target(raw_path) else {
            return Ok(Outcome::needs(NeedsDescriptor::new(
                &["out_path"],
                format!("`{raw_path}` is outside the results directory; use a relative path without `..`."),
            )));
        };

        Ok(Outcome::success(format!("wrote {}", path.display())).with_artifact(Artifact::new(path, content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_job;

    async fn run(doc: Value) -> Outcome {
        WriteResult::new("agent_results").handle(&test_job(doc)).await.unwrap()
    }

    fn written(outcome: Outcome) -> (PathBuf, String) {
        match outcome {
            Outcome::Success { mut artifacts, .. } => {
                let a = artifacts.remove(0);
                (a.path, a.content)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn writes_content_at_relative_path() {
        let (path, content) = written(run(json!({"out_path": "notes/a.txt", "out_content": "hi"})).await);
        assert_eq!(path, PathBuf::from("notes/a.txt"));
        assert_eq!(content, "hi");
    }

    #[tokio::test]
    async fn results_prefix_and_leading_slash_are_dropped() {
        let (path, _) = written(run(json!({"out_path": "/agent_results/a.txt", "out_content": "x"})).await);
        assert_eq!(path, PathBuf::from("a.txt"));
    }

    #[tokio::test]
    async fn default_path_when_missing() {
        let (path, _) = written(run(json!({"action": "write_result", "out_content": "x"})).await);
        assert_eq!(path, PathBuf::from(DEFAULT_OUT_PATH));
    }

    #[tokio::test]
    async fn non_string_content_is_serialized() {
        let (_, content) = written(run(json!({"out_path": "n.json", "out_content": {"a": 1}})).await);
        assert_eq!(content, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        for bad in ["../escape.txt", "a/../../b", "agent_results/../x"] {
            match run(json!({"out_path": bad, "out_content": "x"})).await {
                Outcome::NeedsInput { needs, .. } => assert_eq!(needs.missing, vec!["out_path"]),
                other => panic!("{bad}: unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn missing_content_needs_input() {
        match run(json!({"out_path": "a.txt"})).await {
            Outcome::NeedsInput { needs, .. } => assert_eq!(needs.missing, vec!["out_content"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
