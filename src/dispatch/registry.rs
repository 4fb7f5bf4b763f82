use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::outcome::{NeedsDescriptor, Outcome};
use crate::error::FailureKind;
use crate::queue::Job;
use crate::router::{TypeNormalizer, UNKNOWN_TYPE};

/// Executes one kind of job.
///
/// Returning `Err` is the same as returning [`Outcome::Failed`] with
/// [`FailureKind::HandlerError`]; handlers are free to use `?`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<Outcome>;
}

/// Maps canonical type tags to handlers. Built once at start-up and handed to
/// the engine, so tests can register fakes.
pub struct Registry {
    handlers: BTreeMap<String, Arc<dyn JobHandler>>,
    timeout: Duration,
}

impl Registry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: BTreeMap::new(),
            timeout,
        }
    }

    /// Registers `handler` for `tag`. The tag is normalized first, so
    /// `"roi-scan"` and `"ROI_SCAN"` register the same slot.
    pub fn register<H>(&mut self, tag: &str, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        let tag = TypeNormalizer::normalize(tag);
        if self.handlers.insert(tag.clone(), Arc::new(handler)).is_some() {
            warn!(tag = %tag, "handler replaced");
        }
        self
    }

    /// Registered tags, sorted.
    pub fn supported(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Runs the handler for `job.job_type`.
    ///
    /// Never fails: a missing handler, a handler error, a panic or a timeout
    /// all come back as a structured [`Outcome`].
    pub async fn dispatch(&self, job: &Job) -> Outcome {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            return self.no_executor(job);
        };

        let handler = Arc::clone(handler);
        let owned = job.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => Outcome::failed(FailureKind::HandlerError, format!("{e:#}"))
                .with_details(json!({ "trace": format!("{e:?}") })),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                Outcome::failed(
                    FailureKind::HandlerError,
                    format!("handler panicked: {message}"),
                )
            }
            Ok(Err(join_err)) => Outcome::failed(
                FailureKind::HandlerError,
                format!("handler task cancelled: {join_err}"),
            ),
            Err(_) => {
                abort.abort();
                Outcome::failed(
                    FailureKind::HandlerError,
                    format!("handler timed out after {}s", self.timeout.as_secs_f64()),
                )
            }
        }
    }

    fn no_executor(&self, job: &Job) -> Outcome {
        let supported = self.supported();
        let details = json!({
            "resolved_type": job.job_type,
            "supported": supported,
            "provided_keys": job.provided_keys(),
        });
        debug!(job_id = %job.id, job_type = %job.job_type, "no executor registered");

        if job.job_type == UNKNOWN_TYPE {
            // Nothing in the job names a type: the author can fix that.
            let example = supported
                .first()
                .map(|tag| json!({ "job_type": tag }))
                .unwrap_or_else(|| json!({ "job_type": "<TYPE>" }));
            let needs = NeedsDescriptor::new(
                &["job_type"],
                format!(
                    "Set `job_type` (or `task`/`type`/`action`) to one of: {}",
                    supported.join(", ")
                ),
            )
            .with_example(example);
            return Outcome::needs(needs).with_details(details);
        }

        Outcome::failed(
            FailureKind::UnknownType,
            format!("no executor registered for type `{}`", job.job_type),
        )
        .with_details(details)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Artifact;
    use serde_json::Value;
    use std::path::Path;

    struct Fixed(Outcome);

    #[async_trait]
    impl JobHandler for Fixed {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            Ok(self.0.clone())
        }
    }

    struct Erroring;

    #[async_trait]
    impl JobHandler for Erroring {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            anyhow::bail!("upstream returned 502")
        }
    }

    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            panic!("index out of bounds")
        }
    }

    struct Slow;

    #[async_trait]
    impl JobHandler for Slow {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Outcome> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Outcome::success("late"))
        }
    }

    fn job(doc: Value) -> Job {
        let bytes = serde_json::to_vec(&doc).unwrap();
        Job::parse(Path::new("job_1.json"), &bytes, None).unwrap()
    }

    fn registry() -> Registry {
        let mut r = Registry::new(Duration::from_secs(5));
        r.register(
            "roi-scan",
            Fixed(Outcome::success("planned").with_artifact(Artifact::new("ROI_PLAN.md", "# plan"))),
        );
        r
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let outcome = registry().dispatch(&job(json!({"job_type": "ROI_SCAN"}))).await;
        assert!(matches!(outcome, Outcome::Success { ref note, .. } if note == "planned"));
    }

    #[test]
    fn register_normalizes_tag() {
        assert_eq!(registry().supported(), vec!["ROI_SCAN".to_string()]);
    }

    #[tokio::test]
    async fn unregistered_type_is_failed_with_supported_list() {
        let outcome = registry().dispatch(&job(json!({"job_type": "foo-bar", "x": 1}))).await;
        match outcome {
            Outcome::Failed { kind, details, .. } => {
                assert_eq!(kind, FailureKind::UnknownType);
                let details = details.unwrap();
                let supported: Vec<&str> = details["supported"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter_map(Value::as_str)
                    .collect();
                assert!(supported.contains(&"ROI_SCAN"));
                assert!(!supported.contains(&"FOO_BAR"));
                assert_eq!(details["resolved_type"], "FOO_BAR");
                assert_eq!(details["provided_keys"], json!(["job_type", "x"]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_type_asks_for_input() {
        let outcome = registry().dispatch(&job(json!({"hello": "world"}))).await;
        match outcome {
            Outcome::NeedsInput { needs, details } => {
                assert_eq!(needs.missing, vec!["job_type"]);
                assert!(needs.hint.contains("ROI_SCAN"));
                assert_eq!(needs.example_job, Some(json!({"job_type": "ROI_SCAN"})));
                assert!(details.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbled_types_never_panic() {
        let r = registry();
        for garbage in ["", "   ", "💥", "--", "roi scan scan", "\u{0}"] {
            let outcome = r.dispatch(&job(json!({"job_type": garbage}))).await;
            assert_ne!(outcome.terminal_status(), crate::queue::JobStatus::Done);
        }
    }

    #[tokio::test]
    async fn handler_error_is_captured() {
        let mut r = Registry::new(Duration::from_secs(5));
        r.register("ROI_SCAN", Erroring);
        let outcome = r.dispatch(&job(json!({"job_type": "ROI_SCAN"}))).await;
        match outcome {
            Outcome::Failed { kind, error, .. } => {
                assert_eq!(kind, FailureKind::HandlerError);
                assert!(error.contains("502"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_panic_is_captured() {
        let mut r = Registry::new(Duration::from_secs(5));
        r.register("ROI_SCAN", Panicking);
        let outcome = r.dispatch(&job(json!({"job_type": "ROI_SCAN"}))).await;
        match outcome {
            Outcome::Failed { error, .. } => assert!(error.contains("index out of bounds")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let mut r = Registry::new(Duration::from_millis(100));
        r.register("ROI_SCAN", Slow);
        let outcome = r.dispatch(&job(json!({"job_type": "ROI_SCAN"}))).await;
        match outcome {
            Outcome::Failed { error, .. } => assert!(error.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
