//! Scan pipeline orchestration

mod guard;
mod orchestrator;

pub use guard::{ScanRegistry, SessionGuard};
pub use orchestrator::{PipelineError, ScanPipeline};
