mod artifacts;
mod cli;
mod config;
mod dispatch;
mod engine;
mod error;
mod fsio;
mod git;
mod handlers;
mod logging;
mod opslog;
mod publish;
mod queue;
mod remote;
mod router;
mod textgen;
mod ui;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use artifacts::ArtifactWriter;
use cli::{Cli, Command};
use config::OutboxConfig;
use dispatch::Registry;
use engine::Engine;
use error::OutboxError;
use handlers::HandlerDeps;
use opslog::OpsLog;
use publish::{DirSink, GitSink, Publisher, RepoSink, Sink, SinkTarget};
use queue::JobStore;
use remote::{GitHubClient, RepoClient};
use textgen::{AnthropicClient, TextGenerator};
use ui::{QueueStatus, TickProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let config = OutboxConfig::load(cli.config.as_deref())?;
    let store = JobStore::new(&config.outbox_dir, &config.done_dir);
    let writer = ArtifactWriter::new(&config.results_dir, &config.needs_dir);

    match cli.command {
        Command::Tick {
            max_jobs,
            max_duration_secs,
        } => {
            let deps = handler_deps(&config, &writer);
            let mut registry = Registry::new(config.handler_timeout());
            handlers::register_defaults(&mut registry, &deps);

            let engine = Engine::new(store, registry, writer, OpsLog::new(&config.ops_log))
                .with_heartbeat(config.write_heartbeat);
            let max_jobs = max_jobs.unwrap_or(config.max_jobs_per_tick);
            let max_duration = max_duration_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.max_tick_duration());

            let mut progress = TickProgress::new();
            let summary = engine
                .run_tick(max_jobs, max_duration, &mut progress)
                .await
                .context("tick aborted")?;
            ui::print_tick_summary(&summary);
        }

        Command::Enqueue {
            job_type,
            payload,
            file,
            id,
        } => {
            let raw = match (payload, file) {
                (Some(inline), _) => Some(inline),
                (None, Some(path)) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                (None, None) => None,
            };
            let doc = job_document(job_type.as_deref(), raw.as_deref(), id.as_deref())?;
            let path = store.enqueue(&doc)?;
            println!("{}", path.display());
        }

        Command::Publish => {
            let Some(sink) = build_sink(&config)? else {
                println!("publishing disabled (publish_sink = none)");
                return Ok(());
            };
            let publisher = Publisher::new(config.publish_roots.clone(), &config.publish_state, sink)?;
            let report = publisher.publish().await?;
            ui::print_publish_report(&report);
        }

        Command::Status => {
            let mut status = QueueStatus {
                pending: store.list_pending()?.len(),
                needs_files: count_files(writer.needs_dir()),
                last_log_line: OpsLog::new(&config.ops_log).lines().pop(),
                ..QueueStatus::default()
            };
            for path in store.list_terminal()? {
                if let Some(name) = path.file_name() {
                    status.count_terminal(&name.to_string_lossy());
                }
            }
            ui::print_status(&status);
        }
    }

    Ok(())
}

/// Builds the optional collaborators from configured credentials.
///
/// A client that cannot be built is logged and left out; handlers that need
/// it report NEEDS_INPUT instead of the whole tick failing.
fn handler_deps(config: &OutboxConfig, writer: &ArtifactWriter) -> HandlerDeps {
    let generator: Option<Arc<dyn TextGenerator>> = if config.api_key.is_empty() {
        warn!("no API key configured, text generation disabled");
        None
    } else {
        match AnthropicClient::new(&config.api_key, &config.model) {
            Ok(client) => {
                info!(model = client.model(), "text generation enabled");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!(error = %e, "text generation client unavailable");
                None
            }
        }
    };

    let repo: Option<Arc<dyn RepoClient>> = if config.github_token.is_empty() {
        None
    } else {
        match GitHubClient::new(&config.github_token) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "repository client unavailable");
                None
            }
        }
    };

    let results_dir_name = writer
        .results_dir()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    HandlerDeps {
        generator,
        repo,
        results_dir_name,
    }
}

fn build_sink(config: &OutboxConfig) -> Result<Option<Box<dyn Sink>>> {
    let sink: Box<dyn Sink> = match SinkTarget::parse(&config.publish_sink)? {
        SinkTarget::None => return Ok(None),
        SinkTarget::Dir(path) => Box::new(DirSink::new(path)),
        SinkTarget::Git(path) => Box::new(GitSink::new(path)),
        SinkTarget::GitHub { repo, branch } => {
            if config.github_token.is_empty() {
                return Err(OutboxError::Config(
                    "github publish sink requires GITHUB_TOKEN".to_string(),
                )
                .into());
            }
            let client = Arc::new(GitHubClient::new(&config.github_token)?);
            Box::new(RepoSink::new(client, &repo, &branch))
        }
    };
    Ok(Some(sink))
}

/// Assembles a job document from CLI arguments.
///
/// `raw` must be a JSON object when given. `--type` and `--id` override the
/// matching keys of the payload.
fn job_document(job_type: Option<&str>, raw: Option<&str>, id: Option<&str>) -> Result<Value, OutboxError> {
    let mut doc = match raw {
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => map,
            _ => {
                return Err(OutboxError::MalformedJob {
                    path: PathBuf::from("<payload>"),
                    reason: "payload must be a JSON object".to_string(),
                });
            }
        },
        None => Map::new(),
    };
    if let Some(job_type) = job_type {
        doc.insert("job_type".into(), json!(job_type));
    }
    if let Some(id) = id {
        doc.insert("job_id".into(), json!(id));
    }
    Ok(Value::Object(doc))
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0)
}
