use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::artifacts::{ArtifactWriter, JobResult};
use crate::dispatch::{Outcome, Registry};
use crate::error::{FailureKind, OutboxError};
use crate::opslog::OpsLog;
use crate::queue::{JobStatus, JobStore, file_stem};
use crate::router::UNKNOWN_TYPE;

/// Upper bound on the time kept in reserve at the end of a tick.
const MAX_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Receives progress while a tick runs. All methods default to no-ops.
pub trait TickObserver {
    fn tick_started(&mut self, _pending: usize) {}
    fn job_started(&mut self, _index: usize, _path: &Path) {}
    fn job_finished(&mut self, _report: &JobReport) {}
    fn tick_finished(&mut self, _summary: &TickSummary) {}
}

impl TickObserver for () {}

/// What happened to one job during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub note: String,
    /// Where the job file ended up. `None` means the move failed and the job
    /// is still pending.
    pub terminal_path: Option<PathBuf>,
    pub follow_ups: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Drained,
    MaxJobs,
    Deadline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub pending_at_start: usize,
    pub attempted: usize,
    pub done: usize,
    pub failed: usize,
    pub needs_input: usize,
    /// Jobs processed whose move to the terminal directory failed.
    pub stuck: usize,
    pub follow_ups: usize,
    pub stop: StopReason,
    pub elapsed: Duration,
}

impl TickSummary {
    fn new(pending_at_start: usize) -> Self {
        Self {
            pending_at_start,
            attempted: 0,
            done: 0,
            failed: 0,
            needs_input: 0,
            stuck: 0,
            follow_ups: 0,
            stop: StopReason::Drained,
            elapsed: Duration::ZERO,
        }
    }

    /// Jobs that are still pending after the tick, not counting follow-ups.
    pub fn left_pending(&self) -> usize {
        self.pending_at_start - self.attempted + self.stuck
    }

    fn count(&mut self, report: &JobReport) {
        self.attempted += 1;
        self.follow_ups += report.follow_ups;
        if report.terminal_path.is_none() {
            self.stuck += 1;
            return;
        }
        match report.status {
            JobStatus::Done => self.done += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::NeedsInput => self.needs_input += 1,
            JobStatus::Pending => {}
        }
    }
}

/// Drives pending jobs through dispatch to a terminal state.
pub struct Engine {
    store: JobStore,
    registry: Registry,
    writer: ArtifactWriter,
    ops_log: OpsLog,
    heartbeat: bool,
}

impl Engine {
    pub fn new(store: JobStore, registry: Registry, writer: ArtifactWriter, ops_log: OpsLog) -> Self {
        Self {
            store,
            registry,
            writer,
            ops_log,
            heartbeat: false,
        }
    }

    pub fn with_heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat = enabled;
        self
    }

    /// Processes pending jobs in FIFO order.
    ///
    /// Stops after `max_jobs` attempts or once `max_duration` minus a safety
    /// margin has elapsed; the job in progress always finishes. Returns `Err`
    /// only when the store directories cannot be used at all.
    pub async fn run_tick(
        &self,
        max_jobs: usize,
        max_duration: Duration,
        observer: &mut dyn TickObserver,
    ) -> Result<TickSummary, OutboxError> {
        let started = Instant::now();
        let deadline = started + max_duration.saturating_sub(safety_margin(max_duration));

        self.store.ensure_dirs()?;
        let pending = self.store.list_pending()?;
        let mut summary = TickSummary::new(pending.len());
        info!(
            pending = pending.len(),
            max_jobs,
            outbox = %self.store.pending_dir().display(),
            done = %self.store.terminal_dir().display(),
            "tick started"
        );
        observer.tick_started(pending.len());

        if self.heartbeat
            && let Err(e) = self.writer.write_heartbeat(Utc::now(), pending.len())
        {
            warn!(error = %e, "heartbeat write failed");
        }

        for (index, path) in pending.iter().enumerate() {
            if summary.attempted >= max_jobs {
                summary.stop = StopReason::MaxJobs;
                break;
            }
            if Instant::now() >= deadline {
                summary.stop = StopReason::Deadline;
                break;
            }

            observer.job_started(index, path);
            let span = info_span!("job", file = %path.display());
            let Some(report) = self.process(path).instrument(span).await else {
                continue;
            };
            summary.count(&report);
            observer.job_finished(&report);
        }

        summary.elapsed = started.elapsed();
        info!(
            attempted = summary.attempted,
            done = summary.done,
            failed = summary.failed,
            needs_input = summary.needs_input,
            left_pending = summary.left_pending(),
            stop = ?summary.stop,
            "tick finished"
        );
        observer.tick_finished(&summary);
        Ok(summary)
    }

    /// Runs one job to a terminal state. `None` when the file disappeared
    /// before it could be read.
    async fn process(&self, path: &Path) -> Option<JobReport> {
        let bytes = match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("job vanished before it was read");
                return None;
            }
            Err(e) => Err(OutboxError::io(path, e)),
        };
        let raw = bytes
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();

        let parsed = bytes.and_then(|b| self.store.decode(path, &b));
        let (job_id, job_type, outcome) = match parsed {
            Ok(mut job) => {
                debug!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    created_at = %job.created_at,
                    source = %job.source.display(),
                    "dispatching"
                );
                let outcome = self.registry.dispatch(&job).await;
                job.transition(outcome.terminal_status());
                debug!(status = %job.status, at = %job.updated_at, "handler returned");
                (job.id, job.job_type, outcome)
            }
            Err(OutboxError::MalformedJob { reason, .. }) => (
                file_stem(path),
                UNKNOWN_TYPE.to_string(),
                Outcome::failed(FailureKind::MalformedJob, reason),
            ),
            Err(e) => (
                file_stem(path),
                UNKNOWN_TYPE.to_string(),
                Outcome::failed(FailureKind::IoFailure, e.to_string()),
            ),
        };

        Some(self.finish(path, &job_id, &job_type, outcome, &raw))
    }

    /// Persists the outcome, moves the job and records the transition.
    fn finish(
        &self,
        path: &Path,
        job_id: &str,
        job_type: &str,
        outcome: Outcome,
        raw: &str,
    ) -> JobReport {
        let (outcome, written) = self.write_artifacts(outcome);
        let status = outcome.terminal_status();
        let note = outcome.note();

        let record = JobResult::from_outcome(job_id, job_type, &outcome, &written);
        if let Err(e) = retry_once(|| self.writer.write_record(&record)) {
            warn!(job_id, error = %e, "result record write failed");
        }

        match &outcome {
            Outcome::NeedsInput { needs, details } => {
                if let Err(e) = retry_once(|| self.writer.write_needs(job_id, needs)) {
                    warn!(job_id, error = %e, "needs write failed");
                }
                let message = format!("{}\n\nMissing: {}", needs.hint, needs.missing.join(", "));
                self.diagnose(job_id, job_type, status, &message, details.as_ref(), raw);
            }
            Outcome::Failed { kind, error, details } => {
                let message = format!("{kind}: {error}");
                self.diagnose(job_id, job_type, status, &message, details.as_ref(), raw);
            }
            Outcome::Success { .. } => {}
        }

        let terminal_path = match retry_once(|| self.store.mark_terminal(path, status, &note)) {
            Ok(dest) => dest,
            Err(e) => {
                warn!(job_id, error = %e, "move to terminal failed, job stays pending");
                return JobReport {
                    job_id: job_id.to_string(),
                    job_type: job_type.to_string(),
                    status,
                    note,
                    terminal_path: None,
                    follow_ups: 0,
                };
            }
        };

        self.ops_log.record(job_type, status, &note, &terminal_path);
        let reason = (status != JobStatus::Done).then_some(note.as_str());
        if let Err(e) = self
            .writer
            .append_daily(Utc::now(), job_id, status, reason, outcome.tokens())
        {
            debug!(error = %e, "daily digest append failed");
        }
        info!(job_id, job_type, status = %status, note = %note, "job terminated");

        let follow_ups = match outcome {
            Outcome::Success { follow_ups, .. } => self.enqueue_follow_ups(job_id, job_type, follow_ups),
            _ => 0,
        };

        JobReport {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            status,
            note,
            terminal_path: Some(terminal_path),
            follow_ups,
        }
    }

    /// Writes primary artifacts of a success. A write failure turns the
    /// outcome into an `IoFailure`.
    fn write_artifacts(&self, outcome: Outcome) -> (Outcome, Vec<PathBuf>) {
        let Outcome::Success { artifacts, .. } = &outcome else {
            return (outcome, Vec::new());
        };
        if artifacts.is_empty() {
            return (outcome, Vec::new());
        }
        match retry_once(|| self.writer.write_artifacts(artifacts)) {
            Ok(paths) => (outcome, paths),
            Err(e) => (
                Outcome::failed(FailureKind::IoFailure, format!("artifact write failed: {e}")),
                Vec::new(),
            ),
        }
    }

    fn diagnose(
        &self,
        job_id: &str,
        job_type: &str,
        status: JobStatus,
        message: &str,
        details: Option<&Value>,
        raw: &str,
    ) {
        let write = || self.writer.write_diagnostic(job_id, job_type, status, message, details, raw);
        if let Err(e) = retry_once(write) {
            warn!(job_id, error = %e, "diagnostic write failed");
        }
    }

    fn enqueue_follow_ups(&self, parent_id: &str, parent_type: &str, jobs: Vec<Value>) -> usize {
        let mut enqueued = 0;
        for job in jobs {
            let Value::Object(mut doc) = job else {
                warn!(parent_id, "follow-up job is not an object, skipped");
                continue;
            };
            doc.insert("origin".into(), json!(parent_type));
            doc.insert("parent_job_id".into(), json!(parent_id));
            match self.store.enqueue(&Value::Object(doc)) {
                Ok(path) => {
                    debug!(parent_id, path = %path.display(), "follow-up enqueued");
                    enqueued += 1;
                }
                Err(e) => warn!(parent_id, error = %e, "follow-up enqueue failed"),
            }
        }
        enqueued
    }
}

fn safety_margin(max_duration: Duration) -> Duration {
    (max_duration / 10).min(MAX_SAFETY_MARGIN)
}

fn retry_once<T>(mut op: impl FnMut() -> Result<T, OutboxError>) -> Result<T, OutboxError> {
    op().or_else(|e| {
        debug!(error = %e, "retrying once");
        op()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Artifact, JobHandler, NeedsDescriptor};
    use crate::queue::Job;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Minimal ROI-like handler: needs a goal, writes a plan.
    struct Planner;

    #[async_trait]
    impl JobHandler for Planner {
        async fn handle(&self, job: &Job) -> anyhow::Result<Outcome> {
            match job.text(&["goal"]) {
                Some(goal) => Ok(Outcome::success(format!("planned {goal}"))
                    .with_artifact(Artifact::new("ROI_PLAN.md", format!("# {goal}")))),
                None => Ok(Outcome::needs(NeedsDescriptor::new(&["goal"], "add a goal"))),
            }
        }
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job) -> anyhow::Result<Outcome> {
            self.0.lock().unwrap().push(job.id.clone());
            Ok(Outcome::success("seen"))
        }
    }

    /// Replaces the terminal directory with a plain file mid-tick.
    struct Sabotage(PathBuf);

    #[async_trait]
    impl JobHandler for Sabotage {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            std::fs::remove_dir_all(&self.0)?;
            std::fs::write(&self.0, "not a directory")?;
            Ok(Outcome::success("done"))
        }
    }

    struct Spawner;

    #[async_trait]
    impl JobHandler for Spawner {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            Ok(Outcome::success("spawned")
                .with_follow_ups(vec![json!({"job_type": "ROI_SCAN", "goal": "next"}), json!(3)]))
        }
    }

    struct Metered;

    #[async_trait]
    impl JobHandler for Metered {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            Ok(Outcome::success("generated").with_tokens(321))
        }
    }

    struct Boom;

    #[async_trait]
    impl JobHandler for Boom {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            panic!("handler exploded")
        }
    }

    struct Fixture {
        tmp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self { tmp: TempDir::new().unwrap() }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.tmp.path().join(rel)
        }

        fn store(&self) -> JobStore {
            JobStore::new(self.path("outbox"), self.path("done"))
        }

        fn engine(&self, registry: Registry) -> Engine {
            Engine::new(
                self.store(),
                registry,
                ArtifactWriter::new(self.path("results"), self.path("needs")),
                OpsLog::new(self.path("ops/outbox.log")),
            )
        }

        fn terminal_names(&self) -> Vec<String> {
            self.store()
                .list_terminal()
                .unwrap()
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        }

        fn count_files(&self, rel: &str) -> usize {
            std::fs::read_dir(self.path(rel)).map(|d| d.count()).unwrap_or(0)
        }
    }

    fn registry_with<H: JobHandler + 'static>(tag: &str, handler: H) -> Registry {
        let mut r = Registry::new(Duration::from_secs(5));
        r.register(tag, handler);
        r
    }

    const LONG: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn scenario_done_needs_input_and_unknown_type() {
        let fx = Fixture::new();
        let store = fx.store();
        store
            .enqueue(&json!({"job_id": "A", "job_type": "ROI_SCAN", "goal": "grow revenue"}))
            .unwrap();
        store.enqueue(&json!({"job_id": "B", "job_type": "ROI_SCAN"})).unwrap();
        store.enqueue(&json!({"job_id": "C", "job_type": "FOO_BAR"})).unwrap();

        let engine = fx.engine(registry_with("ROI_SCAN", Planner));
        let summary = engine.run_tick(3, LONG, &mut ()).await.unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!((summary.done, summary.needs_input, summary.failed), (1, 1, 1));
        assert!(store.list_pending().unwrap().is_empty());

        // A: primary artifact plus a SUCCESS record.
        assert_eq!(
            std::fs::read_to_string(fx.path("results/ROI_PLAN.md")).unwrap(),
            "# grow revenue"
        );
        let records: Vec<JobResult> = std::fs::read_dir(fx.path("results/records"))
            .unwrap()
            .map(|e| serde_json::from_slice(&std::fs::read(e.unwrap().path()).unwrap()).unwrap())
            .collect();
        let a = records.iter().find(|r| r.job_id == "A").unwrap();
        assert_eq!(a.status, crate::artifacts::ResultStatus::Success);

        // B: needs descriptor.
        let needs: NeedsDescriptor =
            serde_json::from_slice(&std::fs::read(fx.path("needs/B.needs.json")).unwrap()).unwrap();
        assert_eq!(needs.missing, vec!["goal"]);

        // C: failed with the supported list.
        let c = records.iter().find(|r| r.job_id == "C").unwrap();
        let supported = c.details.as_ref().unwrap()["supported"].as_array().unwrap();
        assert!(supported.contains(&json!("ROI_SCAN")));
        assert!(!supported.contains(&json!("FOO_BAR")));

        // Terminal names and ops log order.
        let names = fx.terminal_names();
        assert_eq!(names.len(), 3);
        let lines = OpsLog::new(fx.path("ops/outbox.log")).lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("ROI_SCAN -> DONE"));
        assert!(lines[1].contains("ROI_SCAN -> NEEDS_INPUT"));
        assert!(lines[2].contains("FOO_BAR -> FAILED"));

        // Diagnostics only for B and C.
        assert_eq!(fx.count_files("results/diagnostics"), 2);
    }

    #[tokio::test]
    async fn jobs_run_in_fifo_order() {
        let fx = Fixture::new();
        let store = fx.store();
        for i in 0..5 {
            store.enqueue(&json!({"job_id": format!("j{i}"), "job_type": "ROI_SCAN"})).unwrap();
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let engine = fx.engine(registry_with("ROI_SCAN", Recorder(seen.clone())));

        engine.run_tick(usize::MAX, LONG, &mut ()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["j0", "j1", "j2", "j3", "j4"]);
    }

    #[tokio::test]
    async fn max_jobs_leaves_the_rest_pending() {
        let fx = Fixture::new();
        let store = fx.store();
        for i in 0..5 {
            store.enqueue(&json!({"job_id": format!("j{i}"), "job_type": "ROI_SCAN"})).unwrap();
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let engine = fx.engine(registry_with("ROI_SCAN", Recorder(seen.clone())));

        let summary = engine.run_tick(2, LONG, &mut ()).await.unwrap();

        assert_eq!(summary.stop, StopReason::MaxJobs);
        assert_eq!(summary.left_pending(), 3);
        assert_eq!(store.list_pending().unwrap().len(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["j0", "j1"]);
    }

    #[tokio::test]
    async fn exhausted_duration_processes_nothing() {
        let fx = Fixture::new();
        fx.store().enqueue(&json!({"job_type": "ROI_SCAN"})).unwrap();
        let engine = fx.engine(registry_with("ROI_SCAN", Planner));

        let summary = engine.run_tick(10, Duration::ZERO, &mut ()).await.unwrap();

        assert_eq!(summary.stop, StopReason::Deadline);
        assert_eq!(summary.attempted, 0);
        assert_eq!(fx.store().list_pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_job_terminates_failed_with_diagnostic() {
        let fx = Fixture::new();
        let store = fx.store();
        store.ensure_dirs().unwrap();
        std::fs::write(store.pending_dir().join("broken.json"), "{not json").unwrap();

        let engine = fx.engine(registry_with("ROI_SCAN", Planner));
        let summary = engine.run_tick(10, LONG, &mut ()).await.unwrap();

        assert_eq!(summary.failed, 1);
        let names = fx.terminal_names();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("broken.FAILED."));

        let diagnostics: Vec<_> = std::fs::read_dir(fx.path("results/diagnostics"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(diagnostics.len(), 1);
        let text = std::fs::read_to_string(&diagnostics[0]).unwrap();
        assert!(text.contains("MalformedJob"));
        assert!(text.contains("{not json"));
    }

    #[tokio::test]
    async fn failed_move_keeps_job_pending_without_ops_line() {
        let fx = Fixture::new();
        let store = fx.store();
        store.enqueue(&json!({"job_type": "ROI_SCAN"})).unwrap();
        let engine = fx.engine(registry_with("ROI_SCAN", Sabotage(fx.path("done"))));

        let summary = engine.run_tick(10, LONG, &mut ()).await.unwrap();

        assert_eq!(summary.stuck, 1);
        assert_eq!(summary.left_pending(), 1);
        assert_eq!(store.list_pending().unwrap().len(), 1);
        assert!(OpsLog::new(fx.path("ops/outbox.log")).lines().is_empty());
    }

    #[tokio::test]
    async fn inaccessible_store_fails_the_tick() {
        let fx = Fixture::new();
        std::fs::write(fx.path("outbox"), "file, not dir").unwrap();
        let engine = fx.engine(registry_with("ROI_SCAN", Planner));

        assert!(engine.run_tick(10, LONG, &mut ()).await.is_err());
    }

    #[tokio::test]
    async fn panic_fails_one_job_and_tick_continues() {
        let fx = Fixture::new();
        let store = fx.store();
        store.enqueue(&json!({"job_type": "BOOM"})).unwrap();
        store.enqueue(&json!({"job_type": "ROI_SCAN", "goal": "x"})).unwrap();

        let mut registry = registry_with("ROI_SCAN", Planner);
        registry.register("BOOM", Boom);
        let summary = fx.engine(registry).run_tick(10, LONG, &mut ()).await.unwrap();

        assert_eq!((summary.failed, summary.done), (1, 1));
        let lines = OpsLog::new(fx.path("ops/outbox.log")).lines();
        assert!(lines[0].contains("handler panicked"));
    }

    #[tokio::test]
    async fn follow_ups_are_enqueued_after_parent() {
        let fx = Fixture::new();
        let store = fx.store();
        store.enqueue(&json!({"job_id": "parent", "job_type": "SPAWN"})).unwrap();
        let engine = fx.engine(registry_with("SPAWN", Spawner));

        let summary = engine.run_tick(10, LONG, &mut ()).await.unwrap();

        assert_eq!(summary.follow_ups, 1);
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        let child = store
            .decode(&pending[0], &std::fs::read(&pending[0]).unwrap())
            .unwrap();
        assert_eq!(child.job_type, "ROI_SCAN");
        assert_eq!(child.payload["parent_job_id"], "parent");
        assert_eq!(child.payload["origin"], "SPAWN");
    }

    #[tokio::test]
    async fn observer_sees_every_job() {
        #[derive(Default)]
        struct Collect {
            started: usize,
            finished: Vec<JobStatus>,
            total: Option<usize>,
        }
        impl TickObserver for Collect {
            fn job_started(&mut self, _index: usize, _path: &Path) {
                self.started += 1;
            }
            fn job_finished(&mut self, report: &JobReport) {
                self.finished.push(report.status);
            }
            fn tick_finished(&mut self, summary: &TickSummary) {
                self.total = Some(summary.attempted);
            }
        }

        let fx = Fixture::new();
        let store = fx.store();
        store.enqueue(&json!({"job_type": "ROI_SCAN", "goal": "x"})).unwrap();
        store.enqueue(&json!({"hello": "world"})).unwrap();

        let mut observer = Collect::default();
        fx.engine(registry_with("ROI_SCAN", Planner))
            .run_tick(10, LONG, &mut observer)
            .await
            .unwrap();

        assert_eq!(observer.started, 2);
        assert_eq!(observer.finished, vec![JobStatus::Done, JobStatus::NeedsInput]);
        assert_eq!(observer.total, Some(2));
    }

    #[tokio::test]
    async fn spent_tokens_reach_daily_digest_and_record() {
        let fx = Fixture::new();
        fx.store().enqueue(&json!({"job_id": "m", "job_type": "METERED"})).unwrap();
        fx.engine(registry_with("METERED", Metered))
            .run_tick(10, LONG, &mut ())
            .await
            .unwrap();

        let daily = std::fs::read_dir(fx.path("results"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("DAILY_"))
            .unwrap();
        let text = std::fs::read_to_string(daily).unwrap();
        assert!(text.contains("job=m  status=DONE  tokens=321"), "{text}");

        let record = std::fs::read_dir(fx.path("results/records")).unwrap().next().unwrap().unwrap();
        let record: JobResult = serde_json::from_slice(&std::fs::read(record.path()).unwrap()).unwrap();
        assert_eq!(record.tokens, Some(321));
    }

    #[tokio::test]
    async fn heartbeat_written_when_enabled() {
        let fx = Fixture::new();
        let engine = fx.engine(registry_with("ROI_SCAN", Planner)).with_heartbeat(true);
        engine.run_tick(10, LONG, &mut ()).await.unwrap();
        assert!(fx.path("results/RUNNER_HEARTBEAT.md").exists());
    }

    #[test]
    fn safety_margin_is_capped() {
        assert_eq!(safety_margin(Duration::from_secs(60)), Duration::from_secs(6));
        assert_eq!(safety_margin(Duration::from_secs(3600)), MAX_SAFETY_MARGIN);
    }
}
