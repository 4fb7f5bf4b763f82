//! Idempotent mirroring of result artifacts to an external sink.
//!
//! Every file under the publish roots gets a key `{root name}/{relative
//! path}` and a SHA-256 fingerprint. A file is sent to the sink only when its
//! fingerprint differs from the one recorded after its last successful
//! publish, so running the publisher twice on unchanged artifacts writes
//! nothing the second time.

mod sink;
mod state;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use sink::{DirSink, GitSink, RepoSink, Sink, SinkTarget};
pub use state::{PublishState, fingerprint};

use crate::error::{FailureKind, OutboxError};
use crate::fsio::is_hidden;

/// One file the sink did not accept.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishFailure {
    pub key: String,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub published: Vec<String>,
    pub skipped: usize,
    pub failures: Vec<PublishFailure>,
    pub commit: Option<String>,
}

pub struct Publisher {
    /// `(key prefix, root)`; prefixes are unique.
    roots: Vec<(String, PathBuf)>,
    state_path: PathBuf,
    sink: Box<dyn Sink>,
}

impl Publisher {
    /// Every root must end in a named directory (not `.` or `..`) and no two
    /// roots may share that name, since it becomes the key prefix.
    pub fn new(
        roots: Vec<PathBuf>,
        state_path: impl Into<PathBuf>,
        sink: Box<dyn Sink>,
    ) -> Result<Self, OutboxError> {
        let mut named: Vec<(String, PathBuf)> = Vec::with_capacity(roots.len());
        for root in roots {
            let prefix = root_name(&root).ok_or_else(|| {
                OutboxError::Config(format!(
                    "publish root `{}` must name a directory",
                    root.display()
                ))
            })?;
            if let Some((_, other)) = named.iter().find(|(p, _)| *p == prefix) {
                return Err(OutboxError::Config(format!(
                    "publish roots `{}` and `{}` share the key prefix `{prefix}`",
                    other.display(),
                    root.display()
                )));
            }
            named.push((prefix, root));
        }
        Ok(Self {
            roots: named,
            state_path: state_path.into(),
            sink,
        })
    }

    /// Publishes new and changed files.
    ///
    /// A failing file is recorded in the report and the batch continues. The
    /// fingerprint of a file is only updated once the sink accepted it, and
    /// the state is saved once at the end.
    pub async fn publish(&self) -> Result<PublishReport, OutboxError> {
        let mut state = PublishState::load(&self.state_path)?;
        let mut report = PublishReport::default();
        let mut written: Vec<(String, String)> = Vec::new();

        for (key, path) in self.collect() {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    report.fail(key, e.to_string());
                    continue;
                }
            };
            let print = fingerprint(&bytes);
            if state.is_current(&key, &print) {
                report.skipped += 1;
                continue;
            }
            match self.sink.put(&key, &bytes).await {
                Ok(()) => {
                    debug!(key = %key, "published");
                    written.push((key, print));
                }
                Err(e) => report.fail(key, e.to_string()),
            }
        }

        let keys: Vec<String> = written.iter().map(|(k, _)| k.clone()).collect();
        match self.sink.finish(&keys).await {
            Ok(commit) => {
                report.commit = commit;
                for (key, print) in written {
                    report.published.push(key.clone());
                    state.record(key, print);
                }
            }
            // Nothing in this batch reached the sink durably.
            Err(e) => {
                for key in keys {
                    report.fail(key, format!("batch finish failed: {e}"));
                }
            }
        }

        state.save(&self.state_path)?;
        info!(
            sink = %self.sink.describe(),
            published = report.published.len(),
            skipped = report.skipped,
            failed = report.failures.len(),
            "publish finished"
        );
        Ok(report)
    }

    /// `(key, path)` for every publishable file, in stable order.
    fn collect(&self) -> Vec<(String, PathBuf)> {
        let mut files = Vec::new();
        for (prefix, root) in &self.roots {
            if !root.is_dir() {
                debug!(root = %root.display(), "publish root missing, skipped");
                continue;
            }
            let walker = WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(root = %root.display(), error = %e, "walk error");
                        continue;
                    }
                };
                if !entry.file_type().is_file() || entry.path() == self.state_path {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push((format!("{prefix}/{}", rel.join("/")), entry.path().to_path_buf()));
            }
        }
        files
    }
}

impl PublishReport {
    fn fail(&mut self, key: String, error: String) {
        warn!(key = %key, kind = %FailureKind::PublishFailure, error = %error, "publish failed");
        self.failures.push(PublishFailure {
            key,
            kind: FailureKind::PublishFailure,
            error,
        });
    }
}

fn root_name(root: &Path) -> Option<String> {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}
