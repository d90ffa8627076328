//! Remote analysis stages
//!
//! The pipeline's five processing stages (estimate, semantic, match,
//! refine, commit) run on the remote analysis service. `AnalysisStages` is
//! the seam the pipeline calls through; `HttpAnalysisClient` is the real
//! implementation, tests substitute scripted fakes.

mod client;
mod types;

pub use client::{AnalysisError, AnalysisStages, HttpAnalysisClient};
pub use types::{
    ArchetypeCandidate, BlendedParams, CommitReceipt, CommitRequest, EstimateRequest,
    ExtractedData, MatchOutcome, MatchRequest, RefineRequest, RefinementData, SemanticProfile,
};
