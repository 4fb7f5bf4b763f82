//! Filesystem-backed job store.
//!
//! A pending job is one `*.json` file in the outbox directory. The only state
//! transition is a move into the terminal directory, renamed to
//! `{stem}.{STATUS}.{timestamp}.json`. The terminal name is claimed with a
//! hard link, so an existing terminal file is never replaced, and the pending
//! file is unlinked right after. A crash between the two steps leaves the job
//! pending as well, which the next tick re-executes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::job::{Job, JobStatus, file_stem};
use crate::error::OutboxError;
use crate::fsio::{self, atomic_write, compact_stamp, ensure_dir, is_hidden};

static ENQUEUE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Durable holding area for pending jobs plus the terminal archive.
#[derive(Debug, Clone)]
pub struct JobStore {
    pending_dir: PathBuf,
    terminal_dir: PathBuf,
}

impl JobStore {
    pub fn new(pending_dir: impl Into<PathBuf>, terminal_dir: impl Into<PathBuf>) -> Self {
        Self {
            pending_dir: pending_dir.into(),
            terminal_dir: terminal_dir.into(),
        }
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    pub fn terminal_dir(&self) -> &Path {
        &self.terminal_dir
    }

    /// Creates both directories. Failure here is the one condition that
    /// should make a tick fail loudly.
    pub fn ensure_dirs(&self) -> Result<(), OutboxError> {
        ensure_dir(&self.pending_dir)?;
        ensure_dir(&self.terminal_dir)
    }

    /// Writes a new pending job and returns its path.
    ///
    /// Names are `{timestamp}-{seq}-{rand}.json`, so lexical order follows
    /// enqueue order. The file only becomes visible once fully written.
    pub fn enqueue(&self, doc: &Value) -> Result<PathBuf, OutboxError> {
        if !doc.is_object() {
            return Err(OutboxError::MalformedJob {
                path: self.pending_dir.clone(),
                reason: "job must be a JSON object".to_string(),
            });
        }
        ensure_dir(&self.pending_dir)?;

        let seq = ENQUEUE_SEQ.fetch_add(1, Ordering::SeqCst) % 10_000;
        let name = format!(
            "{}-{seq:04}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
            fsio::short_id()
        );
        let path = self.pending_dir.join(name);
        let bytes = serde_json::to_vec_pretty(doc)?;
        atomic_write(&path, &bytes)?;

        debug!(path = %path.display(), "enqueued job");
        Ok(path)
    }

    /// Pending job files in FIFO order: modification time, then name.
    ///
    /// A missing outbox directory is an empty queue.
    pub fn list_pending(&self) -> Result<Vec<PathBuf>, OutboxError> {
        list_json_files(&self.pending_dir)
    }

    /// Terminal job files, oldest first.
    pub fn list_terminal(&self) -> Result<Vec<PathBuf>, OutboxError> {
        list_json_files(&self.terminal_dir)
    }

    /// Validates the already-read bytes of the pending job at `path`. Only
    /// the file's metadata is consulted, for its modification time.
    pub fn decode(&self, path: &Path, bytes: &[u8]) -> Result<Job, OutboxError> {
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Job::parse(path, bytes, modified)
    }

    /// Moves a pending job into the terminal directory.
    ///
    /// Never overwrites an existing terminal file. On error the job is left
    /// where it was, so the next tick picks it up again.
    pub fn mark_terminal(
        &self,
        path: &Path,
        status: JobStatus,
        note: &str,
    ) -> Result<PathBuf, OutboxError> {
        if !status.is_terminal() {
            return Err(OutboxError::InvalidTransition(format!(
                "{} is not a terminal status",
                status
            )));
        }
        ensure_dir(&self.terminal_dir)?;

        let base = format!(
            "{}.{}.{}",
            file_stem(path),
            status.as_str(),
            compact_stamp(Utc::now())
        );
        let dest = move_no_clobber(path, &self.terminal_dir, &base)?;

        debug!(
            from = %path.display(),
            to = %dest.display(),
            status = %status,
            note,
            "job moved to terminal"
        );
        Ok(dest)
    }
}

fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, OutboxError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(OutboxError::io(dir, e)),
    };

    let mut files: Vec<(std::time::SystemTime, String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| OutboxError::io(dir, e))?;
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json || is_hidden(&path) {
            continue;
        }
        // A file can vanish between read_dir and stat when another runner wins it.
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((mtime, name, path));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(files.into_iter().map(|(_, _, p)| p).collect())
}

/// How a candidate terminal name gets claimed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Claim {
    HardLink,
    Copy,
}

/// Moves `src` to the first free `{base}.json` / `{base}-{n}.json` in `dir`.
///
/// A name is claimed with `hard_link`, which fails instead of replacing an
/// existing file. Where links are impossible (another device, a filesystem
/// without them) the content is copied into a file opened with
/// `create_new`. The source is removed only once the destination exists; if
/// that removal fails the destination is removed again.
fn move_no_clobber(src: &Path, dir: &Path, base: &str) -> Result<PathBuf, OutboxError> {
    let mut claim = Claim::HardLink;
    let mut n = 0u32;
    let dest = loop {
        let candidate = if n == 0 {
            dir.join(format!("{base}.json"))
        } else {
            dir.join(format!("{base}-{n}.json"))
        };
        let res = match claim {
            Claim::HardLink => fs::hard_link(src, &candidate),
            Claim::Copy => copy_new(src, &candidate),
        };
        match res {
            Ok(()) => break candidate,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) if claim == Claim::HardLink && e.kind() != io::ErrorKind::NotFound => {
                warn!(from = %src.display(), error = %e, "hard link unavailable, copying");
                claim = Claim::Copy;
            }
            Err(e) => return Err(OutboxError::io(src, e)),
        }
    };

    if let Err(e) = fs::remove_file(src) {
        let _ = fs::remove_file(&dest);
        return Err(OutboxError::io(src, e));
    }
    Ok(dest)
}

/// Copies `src` into a new file at `dest`; fails with `AlreadyExists` rather
/// than truncating an existing one. A partial copy is removed.
fn copy_new(src: &Path, dest: &Path) -> io::Result<()> {
    let mut input = fs::File::open(src)?;
    let mut output = fs::OpenOptions::new().write(true).create_new(true).open(dest)?;
    let copied = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
    if let Err(e) = copied {
        let _ = fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}
