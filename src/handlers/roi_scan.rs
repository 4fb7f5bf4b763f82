use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::dispatch::{Artifact, JobHandler, NeedsDescriptor, Outcome};
use crate::queue::Job;
use crate::textgen::TextGenerator;

pub const PLAN_FILE: &str = "ROI_PLAN.md";
const PLAN_HEADING: &str = "## ROI PLAN";

/// Produces an actionable return-on-investment plan for a goal.
pub struct RoiScan {
    generator: Option<Arc<dyn TextGenerator>>,
}

struct Brief<'a> {
    goal: &'a str,
    timeframe: &'a str,
    context: &'a str,
    constraints: &'a str,
}

impl RoiScan {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    fn prompt(brief: &Brief<'_>) -> String {
        format!(
            "Write an ROI plan that is action-oriented and short.\n\
             Goal: {goal}\nTimeframe: {timeframe}\n\nContext:\n{context}\n\nConstraints:\n{constraints}\n\n\
             Requirements:\n\
             - At most one page of Markdown.\n\
             - Start with \"{PLAN_HEADING}\".\n\
             - Sections: what we build (one sentence), first revenue path, timeboxed plan, \
             daily metrics, risks and kill criteria, next automation step.\n\
             - No theory, no long explanations.",
            goal = brief.goal,
            timeframe = brief.timeframe,
            context = or_none(brief.context),
            constraints = or_none(brief.constraints),
        )
    }

    /// Deterministic plan used when no text generator is configured.
    fn template(job_id: &str, brief: &Brief<'_>) -> String {
        format!(
            "{PLAN_HEADING}\n\n\
             Job ID: {job_id}\n\n\
             ## Input\n- Goal: {goal}\n- Timeframe: {timeframe}\n- Context: {context}\n- Constraints: {constraints}\n\n\
             ## 1) What we build\nThe smallest deliverable that moves \"{goal}\" forward.\n\n\
             ## 2) First revenue path\nOne paying pilot before any scaling work.\n\n\
             ## 3) Plan\n- Day 1: pick one use case and ship a working endpoint.\n\
             - Day 2: landing page plus 20-30 targeted outreach messages.\n\
             - Day 3: book two calls and offer a paid setup.\n\n\
             ## 4) Metrics\n- Contacts made, replies, calls booked, paid pilots.\n\n\
             ## 5) Risks and kill criteria\n- No replies after 30 contacts: change channel or offer.\n\n\
             ## 6) Next automation\n- Generate the outreach list as a follow-up job.\n",
            goal = brief.goal,
            timeframe = brief.timeframe,
            context = or_none(brief.context),
            constraints = or_none(brief.constraints),
        )
    }

    fn missing_goal() -> Outcome {
        Outcome::needs(
            NeedsDescriptor::new(&["goal"], "Add `goal` to the ROI_SCAN job: what should the plan achieve.")
                .with_example(json!({
                    "job_type": "ROI_SCAN",
                    "goal": "ROI plan for an API resale bootstrap that earns revenue quickly",
                    "timeframe": "48 hours",
                    "constraints": "max 2 hours of manual work per day"
                })),
        )
    }
}

fn or_none(s: &str) -> &str {
    if s.is_empty() { "(none)" } else { s }
}

#[async_trait]
impl JobHandler for RoiScan {
    async fn handle(&self, job: &Job) -> anyhow::Result<Outcome> {
        let Some(goal) = job.text(&["goal", "objective", "mål"]) else {
            return Ok(Self::missing_goal());
        };
        let brief = Brief {
            goal,
            timeframe: job.text(&["timeframe"]).unwrap_or("48 hours"),
            context: job.text(&["context"]).unwrap_or(""),
            constraints: job.text(&["constraints"]).unwrap_or(""),
        };

        let (plan, tokens) = match &self.generator {
            Some(generator) => match generator.generate(&Self::prompt(&brief)).await {
                Ok(g) if g.text.contains(PLAN_HEADING) => (g.text, g.tokens),
                Ok(g) => (format!("{PLAN_HEADING}\n\n{}", g.text), g.tokens),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "ROI plan generation failed");
                    let needs = NeedsDescriptor::new(
                        &["text_generation"],
                        "The text-generation call failed. Check ANTHROPIC_API_KEY and ANTHROPIC_MODEL.",
                    )
                    .with_error(e.to_string());
                    return Ok(Outcome::needs(needs));
                }
            },
            None => {
                debug!(job_id = %job.id, "no generator configured, using template plan");
                (Self::template(&job.id, &brief), 0)
            }
        };

        let plan = format!(
            "{}\n\n---\nGenerated: {} (UTC)\nJob: ROI_SCAN {}\n",
            plan.trim_end(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            job.id
        );
        Ok(Outcome::success(format!("ROI plan for: {goal}"))
            .with_artifact(Artifact::new(PLAN_FILE, plan))
            .with_tokens(tokens))
    }
}
