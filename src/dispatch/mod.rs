mod outcome;
mod registry;

pub use outcome::{Artifact, NeedsDescriptor, Outcome, one_line};
pub use registry::{JobHandler, Registry};
