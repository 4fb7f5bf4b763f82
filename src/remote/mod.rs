//! Remote repository access for handlers and the publisher.

mod github;

use async_trait::async_trait;
use thiserror::Error;

pub use github::GitHubClient;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("invalid repository `{0}`, expected owner/name")]
    InvalidRepo(String),

    #[error("{path} not found in {repo}@{reference}")]
    NotFound {
        repo: String,
        path: String,
        reference: String,
    },

    #[error("repository API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected repository response: {0}")]
    Decode(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Reads and writes single files in a hosted repository.
#[async_trait]
pub trait RepoClient: Send + Sync {
    async fn read_file(&self, repo: &str, path: &str, reference: &str) -> Result<String, RepoError>;

    /// Creates or updates `path` on `branch` and returns the commit sha.
    async fn write_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<String, RepoError>;
}

/// Splits `owner/name`, rejecting anything else.
pub fn split_repo(repo: &str) -> Result<(&str, &str), RepoError> {
    match repo.trim().split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(RepoError::InvalidRepo(repo.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory repository that records every write.
    #[derive(Default)]
    pub struct MemoryRepo {
        pub writes: Mutex<Vec<(String, String, String, String)>>,
        pub fail_paths: Vec<String>,
    }

    impl MemoryRepo {
        pub fn failing_on(paths: &[&str]) -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                fail_paths: paths.iter().map(|p| p.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl RepoClient for MemoryRepo {
        async fn read_file(&self, repo: &str, path: &str, reference: &str) -> Result<String, RepoError> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(r, p, _, _)| r == repo && p == path)
                .map(|(_, _, content, _)| content.clone())
                .ok_or_else(|| RepoError::NotFound {
                    repo: repo.into(),
                    path: path.into(),
                    reference: reference.into(),
                })
        }

        async fn write_file(
            &self,
            repo: &str,
            path: &str,
            content: &str,
            _message: &str,
            branch: &str,
        ) -> Result<String, RepoError> {
            if self.fail_paths.iter().any(|p| p == path) {
                return Err(RepoError::Api {
                    status: 409,
                    message: "conflict".into(),
                });
            }
            let mut writes = self.writes.lock().unwrap();
            writes.push((repo.into(), path.into(), content.into(), branch.into()));
            Ok(format!("sha{}", writes.len()))
        }
    }
}
