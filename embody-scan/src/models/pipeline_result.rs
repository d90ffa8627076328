//! Final pipeline output

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::extraction::{CanonicalSkinTone, Gender};

/// Avatar parameter format version written alongside every result
pub const AVATAR_VERSION: &str = "2";

/// Everything a completed scan hands to persistence and the client.
///
/// Parameter maps use BTreeMap so their JSON serialization is key-ordered
/// and stable; the persistence reconciler compares serialized forms during
/// read-back verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Client-assigned scan identifier
    pub scan_id: String,
    /// Server-assigned identifier from the commit receipt
    pub server_scan_id: String,
    pub user_id: Uuid,
    /// Avatar rig selection
    pub gender: Gender,
    /// Morph parameters, allow-listed and clamped
    pub shape_params: BTreeMap<String, f64>,
    /// Per-segment mass multipliers, allow-listed and clamped to [0.6, 1.6]
    pub limb_masses: BTreeMap<String, f64>,
    pub skin_tone: CanonicalSkinTone,
    /// 3D model selected by the match stage
    pub gltf_model_id: String,
    pub avatar_version: String,
    /// Archetype mapping table version from the match stage
    pub mapping_version: String,
    /// True when the refine stage failed and fallback parameters were used
    pub fallback_used: bool,
    /// Human-readable observations from the semantic and refine stages
    pub insights: Vec<String>,
    pub duration_seconds: f64,
}
