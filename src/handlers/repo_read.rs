use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{Artifact, JobHandler, NeedsDescriptor, Outcome};
use crate::error::FailureKind;
use crate::fsio::sanitize;
use crate::queue::Job;
use crate::remote::{RepoClient, RepoError};

/// Fetches one file from a remote repository into the results directory.
pub struct RepoRead {
    client: Option<Arc<dyn RepoClient>>,
}

impl RepoRead {
    pub fn new(client: Option<Arc<dyn RepoClient>>) -> Self {
        Self { client }
    }

    fn artifact_path(job: &Job, path: &str) -> PathBuf {
        PathBuf::from("repo_reads").join(format!("{}__{}", sanitize(&job.id), sanitize(path)))
    }
}

#[async_trait]
impl JobHandler for RepoRead {
    async fn handle(&self, job: &Job) -> anyhow::Result<Outcome> {
        let repo = job.text(&["repo"]);
        let path = job.text(&["path"]);
        let (Some(repo), Some(path)) = (repo, path) else {
            let missing: Vec<&str> = [("repo", repo.is_some()), ("path", path.is_some())]
                .into_iter()
                .filter(|(_, present)| !present)
                .map(|(key, _)| key)
                .collect();
            return Ok(Outcome::needs(
                NeedsDescriptor::new(&missing, "REPO_READ needs `repo` (owner/name) and `path`.")
                    .with_example(json!({
                        "job_type": "REPO_READ",
                        "repo": "owner/name",
                        "path": "README.md",
                        "ref": "main"
                    })),
            ));
        };

        let Some(client) = &self.client else {
            return Ok(Outcome::needs(NeedsDescriptor::new(
                &["repo_token"],
                "No repository client configured. Set GITHUB_TOKEN.",
            )));
        };

        let reference = job.text(&["ref", "branch"]).unwrap_or("main");
        match client.read_file(repo, path, reference).await {
            Ok(text) => Ok(Outcome::success(format!("read {repo}/{path}@{reference} ({} bytes)", text.len()))
                .with_artifact(Artifact::new(Self::artifact_path(job, path), text))),
            Err(e @ RepoError::NotFound { .. }) => Ok(Outcome::needs(
                NeedsDescriptor::new(&["path"], format!("`{path}` does not exist in {repo}@{reference}."))
                    .with_error(e.to_string()),
            )),
            Err(e) => Ok(Outcome::failed(FailureKind::HandlerError, e.to_string())
                .with_details(json!({ "repo": repo, "path": path, "ref": reference }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_job;
    use crate::remote::testing::MemoryRepo;

    #[tokio::test]
    async fn reads_into_artifact() {
        let repo = Arc::new(MemoryRepo::default());
        repo.write_file("acme/site", "docs/a.md", "# A", "seed", "main").await.unwrap();
        let handler = RepoRead::new(Some(repo));

        let job = test_job(json!({"repo": "acme/site", "path": "docs/a.md"}));
        match handler.handle(&job).await.unwrap() {
            Outcome::Success { artifacts, .. } => {
                assert_eq!(artifacts[0].path, PathBuf::from("repo_reads/job_1__docs_a.md"));
                assert_eq!(artifacts[0].content, "# A");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_file_asks_for_path() {
        let handler = RepoRead::new(Some(Arc::new(MemoryRepo::default())));
        let job = test_job(json!({"repo": "acme/site", "path": "nope.md"}));
        match handler.handle(&job).await.unwrap() {
            Outcome::NeedsInput { needs, .. } => {
                assert_eq!(needs.missing, vec!["path"]);
                assert!(needs.error.unwrap().contains("not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_fields_and_client() {
        let handler = RepoRead::new(None);
        match handler.handle(&test_job(json!({"path": "a.md"}))).await.unwrap() {
            Outcome::NeedsInput { needs, .. } => assert_eq!(needs.missing, vec!["repo"]),
            other => panic!("unexpected {other:?}"),
        }
        match handler.handle(&test_job(json!({"repo": "acme/site", "path": "a.md"}))).await.unwrap() {
            Outcome::NeedsInput { needs, .. } => assert_eq!(needs.missing, vec!["repo_token"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
