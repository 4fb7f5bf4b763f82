use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::dispatch::{Artifact, JobHandler, NeedsDescriptor, Outcome};
use crate::error::FailureKind;
use crate::fsio::sanitize;
use crate::queue::Job;
use crate::textgen::{Generation, TextGenError, TextGenerator, extract_json_array, generate_json};

const INSTRUCTION_KEYS: &[&str] = &["instructions", "instruction", "prompt", "description"];
const MAX_FOLLOW_UPS: usize = 8;
/// Follow-up chains stop spawning once this many generations deep.
const MAX_GENERATION: u64 = 3;

/// Free-form analysis of a job's instructions, optionally proposing next jobs.
pub struct GeneralInsight {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl GeneralInsight {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    fn prompt(job: &Job, title: &str, instructions: &str, json_reply: bool) -> String {
        let raw = serde_json::to_string_pretty(&job.document()).unwrap_or_default();
        let format = if json_reply {
            "Reply with a single JSON object and nothing else."
        } else {
            "OUTPUT FORMAT:\n\
             1) One-line verdict (max 20 words)\n\
             2) 5-10 actionable bullet insights\n\
             3) \"Next jobs\" as a JSON array of 3-8 items, each with type, title, instructions\n\
             4) Risks and unknowns\n\
             5) End with DONE"
        };
        format!(
            "TASK TYPE: {}\nTITLE: {title}\n\nINSTRUCTIONS:\n{instructions}\n\nJOB JSON:\n{raw}\n\n{format}\n\n\
             Do not claim to have executed external actions. If information is missing, propose next jobs to fetch it.",
            job.job_type
        )
    }

    fn artifact_path(job: &Job, ext: &str) -> PathBuf {
        PathBuf::from("insights").join(format!("{}.{ext}", sanitize(&job.id)))
    }

    fn provider_needs(e: &TextGenError) -> Outcome {
        Outcome::needs(
            NeedsDescriptor::new(
                &["text_generation"],
                "The text-generation call failed. Check ANTHROPIC_API_KEY and ANTHROPIC_MODEL.",
            )
            .with_error(e.to_string()),
        )
    }
}

/// Turns one proposed item into a job document, or `None` if it is unusable.
fn next_job(item: &Value, generation: u64) -> Option<Value> {
    let obj = item.as_object()?;
    let text = |keys: &[&str], default: &str| -> Option<String> {
        match keys.iter().find_map(|k| obj.get(*k)) {
            None => Some(default.to_string()),
            Some(Value::String(s)) if s.trim().is_empty() => Some(default.to_string()),
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(_) => None,
        }
    };
    let job_type = text(&["type", "job_type"], "GENERAL_INSIGHT")?;
    let title = text(&["title"], "Next job")?;
    let instructions = text(&["instructions", "instruction", "prompt"], "Do the task.")?;
    Some(json!({
        "job_type": job_type,
        "title": title,
        "instructions": instructions,
        "created_at": Utc::now().to_rfc3339(),
        "generation": generation,
    }))
}

#[async_trait]
impl JobHandler for GeneralInsight {
    async fn handle(&self, job: &Job) -> anyhow::Result<Outcome> {
        let Some(instructions) = job.text(INSTRUCTION_KEYS) else {
            return Ok(Outcome::needs(
                NeedsDescriptor::new(&["instructions"], "Describe the analysis in `instructions`.")
                    .with_example(json!({
                        "job_type": "GENERAL_INSIGHT",
                        "title": "Pricing review",
                        "instructions": "Review our pricing page and list the three biggest conversion risks."
                    })),
            ));
        };
        let Some(generator) = &self.generator else {
            return Ok(Outcome::needs(NeedsDescriptor::new(
                &["text_generation"],
                "GENERAL_INSIGHT needs a text generator. Set ANTHROPIC_API_KEY.",
            )));
        };

        let title = job.text(&["title"]).unwrap_or("Untitled");
        let json_reply = job
            .text(&["response_format"])
            .is_some_and(|f| f.eq_ignore_ascii_case("json"));
        let prompt = Self::prompt(job, title, instructions, json_reply);

        if json_reply {
            return Ok(match generate_json(generator.as_ref(), &prompt).await {
                Ok((value, tokens)) => Outcome::success(format!("JSON insight: {title}"))
                    .with_artifact(Artifact::new(
                        Self::artifact_path(job, "json"),
                        serde_json::to_string_pretty(&value)?,
                    ))
                    .with_tokens(tokens),
                Err(e @ TextGenError::InvalidJson { .. }) => {
                    let raw = e.raw_output().unwrap_or_default().to_string();
                    Outcome::failed(FailureKind::HandlerError, e.to_string()).with_details(json!({ "raw": raw }))
                }
                Err(e) => Self::provider_needs(&e),
            });
        }

        let Generation { text: answer, tokens } = match generator.generate(&prompt).await {
            Ok(generation) => generation,
            Err(e) => return Ok(Self::provider_needs(&e)),
        };

        let generation = job.field("generation").and_then(Value::as_u64).unwrap_or(0) + 1;
        let follow_ups: Vec<Value> = if generation <= MAX_GENERATION {
            extract_json_array(&answer)
                .unwrap_or_default()
                .iter()
                .filter_map(|item| next_job(item, generation))
                .take(MAX_FOLLOW_UPS)
                .collect()
        } else {
            Vec::new()
        };

        let body = format!(
            "# Insight: {title}\n\n- Job: {}\n- Type: {}\n- Time (UTC): {}\n- Next jobs: {}\n\n---\n\n{}\n",
            job.id,
            job.job_type,
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            follow_ups.len(),
            answer.trim_end()
        );
        Ok(Outcome::success(format!("insight: {title}"))
            .with_artifact(Artifact::new(Self::artifact_path(job, "md"), body))
            .with_follow_ups(follow_ups)
            .with_tokens(tokens))
    }
}
