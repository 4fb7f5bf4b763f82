use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{JobHandler, NeedsDescriptor, Outcome};
use crate::error::FailureKind;
use crate::queue::Job;
use crate::remote::RepoClient;

/// Creates or updates one file in a remote repository.
pub struct RepoWrite {
    client: Option<Arc<dyn RepoClient>>,
}

impl RepoWrite {
    pub fn new(client: Option<Arc<dyn RepoClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobHandler for RepoWrite {
    async fn handle(&self, job: &Job) -> anyhow::Result<Outcome> {
        let repo = job.text(&["repo"]);
        let path = job.text(&["path"]);
        let content = job.field("content").and_then(|v| v.as_str());

        let missing: Vec<&str> = [("repo", repo.is_some()), ("path", path.is_some()), ("content", content.is_some())]
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(key, _)| key)
            .collect();
        let (Some(repo), Some(path), Some(content)) = (repo, path, content) else {
            return Ok(Outcome::needs(
                NeedsDescriptor::new(&missing, "REPO_WRITE needs `repo` (owner/name), `path` and `content`.")
                    .with_example(json!({
                        "job_type": "REPO_WRITE",
                        "repo": "owner/name",
                        "path": "docs/STATUS.md",
                        "content": "# Status",
                        "message": "update status",
                        "branch": "main"
                    })),
            ));
        };

        let Some(client) = &self.client else {
            return Ok(Outcome::needs(NeedsDescriptor::new(
                &["repo_token"],
                "No repository client configured. Set GITHUB_TOKEN.",
            )));
        };

        let branch = job.text(&["branch"]).unwrap_or("main");
        let default_message = format!("outbox: update {path}");
        let message = job.text(&["message"]).unwrap_or(&default_message);

        match client.write_file(repo, path, content, message, branch).await {
            Ok(commit) => Ok(Outcome::success(format!("committed {commit} to {repo}/{path}@{branch}"))),
            Err(e) => Ok(Outcome::failed(FailureKind::HandlerError, e.to_string())
                .with_details(json!({ "repo": repo, "path": path, "branch": branch }))),
        }
    }
}
