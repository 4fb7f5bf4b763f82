//! Built-in job handlers.

mod insight;
mod repo_read;
mod repo_write;
mod roi_scan;
mod write_result;

use std::sync::Arc;

pub use insight::GeneralInsight;
pub use repo_read::RepoRead;
pub use repo_write::RepoWrite;
pub use roi_scan::RoiScan;
pub use write_result::WriteResult;

use crate::dispatch::Registry;
use crate::remote::RepoClient;
use crate::textgen::TextGenerator;

/// External collaborators the built-in handlers may use. Either can be
/// absent; handlers that need one report NEEDS_INPUT instead of failing.
#[derive(Clone, Default)]
pub struct HandlerDeps {
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub repo: Option<Arc<dyn RepoClient>>,
    /// Name of the results directory, stripped from `out_path` prefixes.
    pub results_dir_name: String,
}

/// Registers every built-in handler under its canonical tag.
pub fn register_defaults(registry: &mut Registry, deps: &HandlerDeps) {
    registry
        .register("ROI_SCAN", RoiScan::new(deps.generator.clone()))
        .register("GENERAL_INSIGHT", GeneralInsight::new(deps.generator.clone()))
        .register("WRITE_RESULT", WriteResult::new(&deps.results_dir_name))
        .register("REPO_WRITE", RepoWrite::new(deps.repo.clone()))
        .register("REPO_READ", RepoRead::new(deps.repo.clone()));
}

#[cfg(test)]
pub(crate) fn test_job(doc: serde_json::Value) -> crate::queue::Job {
    let bytes = serde_json::to_vec(&doc).unwrap();
    crate::queue::Job::parse(std::path::Path::new("job_1.json"), &bytes, None).unwrap()
}
