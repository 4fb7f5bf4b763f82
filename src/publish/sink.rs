use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::error::OutboxError;
use crate::fsio::atomic_write;
use crate::git::GitManager;
use crate::remote::{RepoClient, RepoError, split_repo};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Store(#[from] OutboxError),

    #[error("repository: {0}")]
    Repo(#[from] RepoError),

    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("{0} is not UTF-8 text")]
    NotText(String),
}

/// Destination that mirrors published files.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable target, for logs.
    fn describe(&self) -> String;

    /// Writes one file under `key` (a `/`-separated relative path).
    async fn put(&self, key: &str, content: &[u8]) -> Result<(), SinkError>;

    /// Called once after a batch with the keys written in it. Returns a
    /// commit reference when the sink produces one.
    async fn finish(&self, _keys: &[String]) -> Result<Option<String>, SinkError> {
        Ok(None)
    }
}

/// Parsed `publish_sink` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    None,
    Dir(PathBuf),
    Git(PathBuf),
    GitHub { repo: String, branch: String },
}

impl SinkTarget {
    /// Parses `none`, `dir:<path>`, `git:<path>` or `github:<owner/repo>[@branch]`.
    pub fn parse(raw: &str) -> Result<Self, OutboxError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            return Ok(SinkTarget::None);
        }
        let invalid = || OutboxError::Config(format!("invalid publish sink `{raw}`"));
        let (scheme, rest) = raw.split_once(':').ok_or_else(invalid)?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(invalid());
        }
        match scheme {
            "dir" => Ok(SinkTarget::Dir(PathBuf::from(rest))),
            "git" => Ok(SinkTarget::Git(PathBuf::from(rest))),
            "github" => {
                let (repo, branch) = rest.split_once('@').unwrap_or((rest, "main"));
                split_repo(repo).map_err(|_| invalid())?;
                Ok(SinkTarget::GitHub {
                    repo: repo.to_string(),
                    branch: if branch.is_empty() { "main" } else { branch }.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// Mirrors files into a local directory.
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Sink for DirSink {
    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }

    async fn put(&self, key: &str, content: &[u8]) -> Result<(), SinkError> {
        atomic_write(&self.root.join(key), content)?;
        Ok(())
    }
}

/// Writes files into a git work tree and commits each batch.
pub struct GitSink {
    workdir: PathBuf,
}

impl GitSink {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self { workdir: workdir.into() }
    }
}

#[async_trait]
impl Sink for GitSink {
    fn describe(&self) -> String {
        format!("git:{}", self.workdir.display())
    }

    async fn put(&self, key: &str, content: &[u8]) -> Result<(), SinkError> {
        atomic_write(&self.workdir.join(key), content)?;
        Ok(())
    }

    async fn finish(&self, keys: &[String]) -> Result<Option<String>, SinkError> {
        if keys.is_empty() {
            return Ok(None);
        }
        let git = GitManager::open_or_init(&self.workdir)?;
        let message = format!("outbox: publish {} file(s)", keys.len());
        let commit = git.commit_paths(keys, &message)?;
        if let Some(hash) = &commit {
            let branch = git.current_branch().unwrap_or_else(|_| "HEAD".to_string());
            info!(branch = %branch, commit = %hash, files = keys.len(), "publish batch committed");
        }
        Ok(commit)
    }
}

/// Pushes files to a hosted repository, one commit per file.
pub struct RepoSink {
    client: Arc<dyn RepoClient>,
    repo: String,
    branch: String,
}

impl RepoSink {
    pub fn new(client: Arc<dyn RepoClient>, repo: &str, branch: &str) -> Self {
        Self {
            client,
            repo: repo.to_string(),
            branch: branch.to_string(),
        }
    }
}

#[async_trait]
impl Sink for RepoSink {
    fn describe(&self) -> String {
        format!("github:{}@{}", self.repo, self.branch)
    }

    async fn put(&self, key: &str, content: &[u8]) -> Result<(), SinkError> {
        let text = std::str::from_utf8(content).map_err(|_| SinkError::NotText(key.to_string()))?;
        self.client
            .write_file(&self.repo, key, text, &format!("outbox: publish {key}"), &self.branch)
            .await?;
        Ok(())
    }
}
