//! Progress tracking for scan sessions
//!
//! A `ProgressTracker` owns the user-facing progress state for one scan:
//! monotonic 0-100 progress, forward-only macro phases, real checkpoints
//! published by the pipeline, and a simulated micro-step progression that
//! keeps the bar moving during long waits. All observation happens through
//! `snapshot()` or the event bus; all mutation goes through tracker methods.

mod checkpoints;
mod micro_steps;
mod simulation;
mod tracker;

pub use checkpoints::{capture_checkpoint, phase_floor, StageCheckpoint};
pub use simulation::SimulationConfig;
pub use tracker::{ProgressRecord, ProgressSnapshot, ProgressTracker, PROGRESS_HISTORY_CAP};
