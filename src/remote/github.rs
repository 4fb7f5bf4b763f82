use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RepoClient, RepoError, split_repo};

const API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("outbox/", env!("CARGO_PKG_VERSION"));

/// GitHub contents API client.
pub struct GitHubClient {
    token: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    sha: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self, RepoError> {
        Self::with_base_url(token, API_URL)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, RepoError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            token: token.trim().to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn contents_url(&self, repo: &str, path: &str) -> Result<String, RepoError> {
        let (owner, name) = split_repo(repo)?;
        Ok(format!(
            "{}/repos/{owner}/{name}/contents/{}",
            self.base_url,
            path.trim_start_matches('/')
        ))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28")
    }

    /// Current entry for `path`, or `None` when it does not exist yet.
    async fn entry(&self, url: &str, reference: &str) -> Result<Option<ContentsEntry>, RepoError> {
        let response = self
            .authorized(self.client.get(url))
            .query(&[("ref", reference)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        let entry = response
            .json::<ContentsEntry>()
            .await
            .map_err(|e| RepoError::Decode(e.to_string()))?;
        Ok(Some(entry))
    }
}

async fn check(response: Response) -> Result<Response, RepoError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RepoError::Api {
        status: status.as_u16(),
        message: message.chars().take(500).collect(),
    })
}

#[async_trait]
impl RepoClient for GitHubClient {
    async fn read_file(&self, repo: &str, path: &str, reference: &str) -> Result<String, RepoError> {
        let url = self.contents_url(repo, path)?;
        let entry = self.entry(&url, reference).await?.ok_or_else(|| RepoError::NotFound {
            repo: repo.to_string(),
            path: path.to_string(),
            reference: reference.to_string(),
        })?;

        // The API wraps base64 at 60 columns.
        let encoded: String = entry
            .content
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| RepoError::Decode(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| RepoError::Decode(e.to_string()))
    }

    async fn write_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<String, RepoError> {
        let url = self.contents_url(repo, path)?;
        let existing = self.entry(&url, branch).await?;

        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(entry) = existing {
            body["sha"] = json!(entry.sha);
        }

        let response = self.authorized(self.client.put(&url)).json(&body).send().await?;
        let put = check(response)
            .await?
            .json::<PutResponse>()
            .await
            .map_err(|e| RepoError::Decode(e.to_string()))?;

        debug!(repo, path, branch, commit = %put.commit.sha, "file written");
        Ok(put.commit.sha)
    }
}
