//! Analysis stage request and response payloads
//!
//! Response schemas drift as the analysis service evolves, so every
//! sub-field is optional with a serde default and unknown fields are
//! ignored. Each stage has one required sub-field; its absence in a 2xx
//! response is an `AnalysisError::MissingField`, never a panic. The raw
//! skin-tone candidate stays a `serde_json::Value` and is interpreted by
//! the extraction layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::client::AnalysisError;
use crate::extraction::{CanonicalSkinTone, Gender};
use crate::models::DeclaredSex;
use crate::storage::PhotoReference;

// ----------------------------------------------------------------------------
// Requests
// ----------------------------------------------------------------------------

/// Estimate stage input: declared biometrics plus the stored photo references
#[derive(Debug, Clone, Serialize)]
pub struct EstimateRequest {
    pub user_id: Uuid,
    pub sex: DeclaredSex,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub age_years: Option<u32>,
    pub photos: Vec<PhotoReference>,
}

/// Match stage input: the estimate and semantic outputs together
#[derive(Debug, Clone, Serialize)]
pub struct MatchRequest {
    pub extracted: ExtractedData,
    pub semantic_profile: SemanticProfile,
    pub declared_sex: DeclaredSex,
    pub height_cm: f64,
}

/// Refine stage input: the matched parameters, the raw measurements, and the
/// stored photos for the refinement model to look at again
#[derive(Debug, Clone, Serialize)]
pub struct RefineRequest {
    pub shape_params: BTreeMap<String, f64>,
    pub limb_masses: BTreeMap<String, f64>,
    pub measurements: BTreeMap<String, f64>,
    pub photos: Vec<PhotoReference>,
}

/// Commit stage input: the final parameter set
#[derive(Debug, Clone, Serialize)]
pub struct CommitRequest {
    pub user_id: Uuid,
    pub client_scan_id: String,
    pub gender: Gender,
    pub shape_params: BTreeMap<String, f64>,
    pub limb_masses: BTreeMap<String, f64>,
    pub skin_tone: CanonicalSkinTone,
    pub gltf_model_id: String,
    pub avatar_version: String,
    pub mapping_version: String,
    pub fallback_used: bool,
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

/// Estimate stage envelope; `extracted_data` is the required sub-field
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstimateResponse {
    #[serde(default)]
    pub extracted_data: Option<ExtractedData>,
}

impl EstimateResponse {
    pub(crate) fn into_extracted(self) -> Result<ExtractedData, AnalysisError> {
        self.extracted_data
            .ok_or(AnalysisError::MissingField("extracted_data"))
    }
}

/// Measurements and raw observations from the photos
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedData {
    /// Named measurements in centimeters/kilograms (e.g. "chest_cm",
    /// "waist_cm", "bmi", "body_fat_pct")
    #[serde(default)]
    pub measurements: BTreeMap<String, f64>,
    /// Overall extraction confidence, 0-1
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Raw skin-tone candidate; schema varies, interpreted by extraction
    #[serde(default)]
    pub skin_tone: Option<serde_json::Value>,
}

/// Semantic stage envelope; `semantic_profile` is the required sub-field
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SemanticResponse {
    #[serde(default)]
    pub semantic_profile: Option<SemanticProfile>,
}

impl SemanticResponse {
    pub(crate) fn into_profile(self) -> Result<SemanticProfile, AnalysisError> {
        self.semantic_profile
            .ok_or(AnalysisError::MissingField("semantic_profile"))
    }
}

/// Semantic body characterization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticProfile {
    /// Build classification (e.g. "mesomorph_athletic")
    #[serde(default)]
    pub build_class: Option<String>,
    /// Named body indices (e.g. "torso_index", "limb_index"), 0-1
    #[serde(default)]
    pub indices: BTreeMap<String, f64>,
    /// Human-readable observations for the user
    #[serde(default)]
    pub insights: Vec<String>,
}

/// Match stage envelope; a non-empty `selected_archetypes` list is required
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchResponse {
    #[serde(default)]
    pub selected_archetypes: Vec<ArchetypeCandidate>,
    #[serde(default)]
    pub blended: Option<BlendedParams>,
    #[serde(default)]
    pub mapping_version: Option<String>,
}

impl MatchResponse {
    pub(crate) fn into_outcome(self) -> Result<MatchOutcome, AnalysisError> {
        if self.selected_archetypes.is_empty() {
            return Err(AnalysisError::MissingField("selected_archetypes"));
        }
        Ok(MatchOutcome {
            candidates: self.selected_archetypes,
            blended: self.blended,
            mapping_version: self
                .mapping_version
                .unwrap_or_else(|| "unversioned".to_string()),
        })
    }
}

/// One archetype the match stage considered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchetypeCandidate {
    #[serde(default)]
    pub archetype_id: Option<String>,
    /// 3D model backing this archetype
    #[serde(default)]
    pub gltf_model_id: Option<String>,
    /// Match score, higher is better
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub shape_params: BTreeMap<String, f64>,
    #[serde(default)]
    pub limb_masses: BTreeMap<String, f64>,
}

/// Parameters pre-blended across the selected archetypes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlendedParams {
    #[serde(default)]
    pub shape_params: BTreeMap<String, f64>,
    #[serde(default)]
    pub limb_masses: BTreeMap<String, f64>,
}

/// Validated match stage output
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Never empty
    pub candidates: Vec<ArchetypeCandidate>,
    pub blended: Option<BlendedParams>,
    pub mapping_version: String,
}

impl MatchOutcome {
    /// Best candidate by score; the list is never empty so this always
    /// yields one
    pub fn best_candidate(&self) -> &ArchetypeCandidate {
        self.candidates
            .iter()
            .max_by(|a, b| {
                let sa = a.score.unwrap_or(0.0);
                let sb = b.score.unwrap_or(0.0);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(&self.candidates[0])
    }

    /// The 3D model to load: the highest-scored candidate that actually
    /// carries one. `None` when no candidate has a model id.
    pub fn selected_model(&self) -> Option<&str> {
        let mut with_models: Vec<&ArchetypeCandidate> = self
            .candidates
            .iter()
            .filter(|c| c.gltf_model_id.is_some())
            .collect();
        with_models.sort_by(|a, b| {
            let sa = a.score.unwrap_or(0.0);
            let sb = b.score.unwrap_or(0.0);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        with_models.first().and_then(|c| c.gltf_model_id.as_deref())
    }
}

/// Refine stage envelope; `ai_refinement` is the required sub-field
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefineResponse {
    #[serde(default)]
    pub ai_refinement: Option<RefinementData>,
}

impl RefineResponse {
    pub(crate) fn into_refinement(self) -> Result<RefinementData, AnalysisError> {
        self.ai_refinement
            .ok_or(AnalysisError::MissingField("ai_refinement"))
    }
}

/// AI-refined parameters layered over the match result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinementData {
    #[serde(default)]
    pub shape_params: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub limb_masses: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub insights: Vec<String>,
}

/// Commit stage envelope; a non-empty `scan_id` is required
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitResponse {
    #[serde(default)]
    pub scan_id: Option<String>,
    #[serde(default)]
    pub persisted: Option<bool>,
}

impl CommitResponse {
    pub(crate) fn into_receipt(self) -> Result<CommitReceipt, AnalysisError> {
        match self.scan_id {
            Some(scan_id) if !scan_id.is_empty() => Ok(CommitReceipt {
                scan_id,
                persisted: self.persisted.unwrap_or(true),
            }),
            _ => Err(AnalysisError::MissingField("scan_id")),
        }
    }
}

/// Server acknowledgment of the committed scan
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// Server-assigned scan identifier
    pub scan_id: String,
    pub persisted: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Unknown fields and missing optionals decode without error
    #[test]
    fn test_estimate_decode_is_defensive() {
        let json = r#"{
            "extracted_data": {
                "measurements": {"chest_cm": 96.5, "bmi": 22.1},
                "confidence": 0.87,
                "brand_new_field": {"nested": true}
            },
            "api_version": "2025-08"
        }"#;
        let resp: EstimateResponse = serde_json::from_str(json).unwrap();
        let extracted = resp.into_extracted().unwrap();
        assert_eq!(extracted.measurements["chest_cm"], 96.5);
        assert_eq!(extracted.confidence, Some(0.87));
        assert!(extracted.skin_tone.is_none());
    }

    /// A 2xx body without the required sub-field maps to MissingField
    #[test]
    fn test_estimate_missing_required_field() {
        let resp: EstimateResponse = serde_json::from_str("{}").unwrap();
        let err = resp.into_extracted().unwrap_err();
        assert!(matches!(err, AnalysisError::MissingField("extracted_data")));
    }

    #[test]
    fn test_semantic_missing_required_field() {
        let resp: SemanticResponse = serde_json::from_str(r#"{"other": 1}"#).unwrap();
        assert!(matches!(
            resp.into_profile(),
            Err(AnalysisError::MissingField("semantic_profile"))
        ));
    }

    /// An empty archetype list counts as missing
    #[test]
    fn test_match_requires_candidates() {
        let resp: MatchResponse =
            serde_json::from_str(r#"{"selected_archetypes": []}"#).unwrap();
        assert!(matches!(
            resp.into_outcome(),
            Err(AnalysisError::MissingField("selected_archetypes"))
        ));
    }

    #[test]
    fn test_match_outcome_best_candidate() {
        let json = r#"{
            "selected_archetypes": [
                {"archetype_id": "a", "gltf_model_id": "model-a", "score": 0.71},
                {"archetype_id": "b", "gltf_model_id": "model-b", "score": 0.88},
                {"archetype_id": "c", "score": 0.12}
            ],
            "mapping_version": "m7"
        }"#;
        let outcome: MatchOutcome = serde_json::from_str::<MatchResponse>(json)
            .unwrap()
            .into_outcome()
            .unwrap();
        assert_eq!(outcome.mapping_version, "m7");
        assert_eq!(outcome.best_candidate().archetype_id.as_deref(), Some("b"));
        assert_eq!(outcome.selected_model(), Some("model-b"));
    }

    /// A top-scored candidate without a model id is skipped for model
    /// selection; a candidate list with no model ids yields None
    #[test]
    fn test_selected_model_skips_modelless_candidates() {
        let json = r#"{
            "selected_archetypes": [
                {"archetype_id": "a", "score": 0.95},
                {"archetype_id": "b", "gltf_model_id": "model-b", "score": 0.60}
            ]
        }"#;
        let outcome: MatchOutcome = serde_json::from_str::<MatchResponse>(json)
            .unwrap()
            .into_outcome()
            .unwrap();
        assert_eq!(outcome.best_candidate().archetype_id.as_deref(), Some("a"));
        assert_eq!(outcome.selected_model(), Some("model-b"));

        let bare: MatchOutcome =
            serde_json::from_str::<MatchResponse>(r#"{"selected_archetypes": [{"score": 1.0}]}"#)
                .unwrap()
                .into_outcome()
                .unwrap();
        assert_eq!(bare.selected_model(), None);
    }

    /// Missing mapping_version falls back to a marker value
    #[test]
    fn test_match_mapping_version_default() {
        let json = r#"{"selected_archetypes": [{"archetype_id": "a"}]}"#;
        let outcome: MatchOutcome = serde_json::from_str::<MatchResponse>(json)
            .unwrap()
            .into_outcome()
            .unwrap();
        assert_eq!(outcome.mapping_version, "unversioned");
    }

    /// Empty server scan id is treated as missing
    #[test]
    fn test_commit_requires_scan_id() {
        let empty: CommitResponse = serde_json::from_str(r#"{"scan_id": ""}"#).unwrap();
        assert!(matches!(
            empty.into_receipt(),
            Err(AnalysisError::MissingField("scan_id"))
        ));

        let ok: CommitResponse =
            serde_json::from_str(r#"{"scan_id": "srv-42", "persisted": true}"#).unwrap();
        let receipt = ok.into_receipt().unwrap();
        assert_eq!(receipt.scan_id, "srv-42");
        assert!(receipt.persisted);
    }

    /// Refinement with partial content still decodes
    #[test]
    fn test_refinement_partial() {
        let json = r#"{"ai_refinement": {"limb_masses": {"thigh": 1.12}}}"#;
        let refinement = serde_json::from_str::<RefineResponse>(json)
            .unwrap()
            .into_refinement()
            .unwrap();
        assert!(refinement.shape_params.is_none());
        assert_eq!(refinement.limb_masses.unwrap()["thigh"], 1.12);
        assert!(refinement.insights.is_empty());
    }
}
