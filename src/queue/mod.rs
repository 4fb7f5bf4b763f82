mod job;
mod store;

pub use job::{Job, JobStatus, file_stem};
pub use store::JobStore;
