//! Scripted doubles for the analysis service and photo storage gateway
//!
//! `ScriptedAnalysis` returns a fixed plausible payload per stage, with
//! switches to fail a chosen stage, delay every stage, or vary the estimate
//! output. Call counts are recorded so tests can assert how often the
//! pipeline reached each stage.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use embody_scan::models::CapturedPhoto;
use embody_scan::stages::{
    AnalysisError, AnalysisStages, ArchetypeCandidate, BlendedParams, CommitReceipt,
    CommitRequest, EstimateRequest, ExtractedData, MatchOutcome, MatchRequest, RefineRequest,
    RefinementData, SemanticProfile,
};
use embody_scan::storage::{PhotoReference, PhotoStore, StorageError};

fn btree(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect()
}

/// Per-stage call counters
#[derive(Debug, Default)]
pub struct StageCalls {
    pub estimate: AtomicUsize,
    pub semantic: AtomicUsize,
    pub matching: AtomicUsize,
    pub refine: AtomicUsize,
    pub commit: AtomicUsize,
}

/// Scripted analysis-stage double
pub struct ScriptedAnalysis {
    pub calls: StageCalls,
    fail_stage: Option<&'static str>,
    stage_delay: Duration,
    skin_tone: Option<serde_json::Value>,
    omit_model_ids: bool,
    server_scan_id: String,
}

impl ScriptedAnalysis {
    /// Every stage succeeds with a plausible payload
    pub fn happy() -> Self {
        Self {
            calls: StageCalls::default(),
            fail_stage: None,
            stage_delay: Duration::ZERO,
            // Legacy flat-RGB shape, the common case from the live service
            skin_tone: Some(json!({"r": 172, "g": 128, "b": 104})),
            omit_model_ids: false,
            server_scan_id: "srv-1".to_string(),
        }
    }

    /// Like `happy`, but the named stage returns a 500
    pub fn failing(stage: &'static str) -> Self {
        let mut this = Self::happy();
        this.fail_stage = Some(stage);
        this
    }

    /// Hold every stage call for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    /// Override the estimate stage's raw skin-tone candidate
    pub fn with_skin_tone(mut self, value: serde_json::Value) -> Self {
        self.skin_tone = Some(value);
        self
    }

    /// Estimate returns no skin-tone candidate at all
    pub fn without_skin_tone(mut self) -> Self {
        self.skin_tone = None;
        self
    }

    /// No match candidate carries a gltf model id
    pub fn without_model_ids(mut self) -> Self {
        self.omit_model_ids = true;
        self
    }

    pub fn with_server_scan_id(mut self, id: &str) -> Self {
        self.server_scan_id = id.to_string();
        self
    }

    async fn enter(&self, stage: &'static str) -> Result<(), AnalysisError> {
        if !self.stage_delay.is_zero() {
            tokio::time::sleep(self.stage_delay).await;
        }
        if self.fail_stage == Some(stage) {
            return Err(AnalysisError::Api(
                500,
                format!("{} stage unavailable", stage),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AnalysisStages for ScriptedAnalysis {
    async fn estimate(&self, _request: &EstimateRequest) -> Result<ExtractedData, AnalysisError> {
        self.calls.estimate.fetch_add(1, Ordering::SeqCst);
        self.enter("estimate").await?;
        Ok(ExtractedData {
            measurements: btree(&[
                ("chest_cm", 96.5),
                ("waist_cm", 81.0),
                ("hips_cm", 99.0),
                ("bmi", 23.4),
                ("body_fat_pct", 21.0),
            ]),
            confidence: Some(0.9),
            skin_tone: self.skin_tone.clone(),
        })
    }

    async fn semantic(&self, _extracted: &ExtractedData) -> Result<SemanticProfile, AnalysisError> {
        self.calls.semantic.fetch_add(1, Ordering::SeqCst);
        self.enter("semantic").await?;
        Ok(SemanticProfile {
            build_class: Some("mesomorph_athletic".to_string()),
            indices: btree(&[("torso_index", 0.52), ("limb_index", 0.47)]),
            insights: vec!["Broad shoulders relative to hips".to_string()],
        })
    }

    async fn match_archetypes(
        &self,
        _request: &MatchRequest,
    ) -> Result<MatchOutcome, AnalysisError> {
        self.calls.matching.fetch_add(1, Ordering::SeqCst);
        self.enter("match").await?;
        let model = |id: &str| {
            if self.omit_model_ids {
                None
            } else {
                Some(id.to_string())
            }
        };
        Ok(MatchOutcome {
            candidates: vec![
                ArchetypeCandidate {
                    archetype_id: Some("ath-04".to_string()),
                    gltf_model_id: model("model-ath-04"),
                    score: Some(0.88),
                    shape_params: btree(&[("muscle", 0.40), ("waist_girth", -0.20)]),
                    limb_masses: btree(&[("thigh", 1.06), ("calf", 1.01)]),
                },
                ArchetypeCandidate {
                    archetype_id: Some("std-11".to_string()),
                    gltf_model_id: model("model-std-11"),
                    score: Some(0.74),
                    shape_params: btree(&[("muscle", 0.22)]),
                    limb_masses: btree(&[("thigh", 1.00)]),
                },
            ],
            blended: Some(BlendedParams {
                shape_params: btree(&[
                    ("muscle", 0.42),
                    ("waist_girth", -0.18),
                    ("shoulder_width", 0.31),
                ]),
                limb_masses: btree(&[("thigh", 1.08), ("calf", 1.02), ("arm", 1.04)]),
            }),
            mapping_version: "m7".to_string(),
        })
    }

    async fn refine(&self, _request: &RefineRequest) -> Result<RefinementData, AnalysisError> {
        self.calls.refine.fetch_add(1, Ordering::SeqCst);
        self.enter("refine").await?;
        Ok(RefinementData {
            shape_params: Some(btree(&[("muscle", 0.45), ("waist_girth", -0.25)])),
            limb_masses: Some(btree(&[("thigh", 1.11), ("calf", 1.03)])),
            insights: vec!["Slightly longer legs than average".to_string()],
        })
    }

    async fn commit(&self, _request: &CommitRequest) -> Result<CommitReceipt, AnalysisError> {
        self.calls.commit.fetch_add(1, Ordering::SeqCst);
        self.enter("commit").await?;
        Ok(CommitReceipt {
            scan_id: self.server_scan_id.clone(),
            persisted: true,
        })
    }
}

/// Photo storage double: hands out deterministic references and records
/// deletions
pub struct FakePhotoStore {
    pub uploads: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    fail_from: Option<usize>,
}

impl FakePhotoStore {
    pub fn happy() -> Self {
        Self {
            uploads: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            fail_from: None,
        }
    }

    /// Uploads succeed `successes` times, then fail
    pub fn failing_after(successes: usize) -> Self {
        let mut this = Self::happy();
        this.fail_from = Some(successes);
        this
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PhotoStore for FakePhotoStore {
    async fn upload(
        &self,
        _user_id: Uuid,
        photo: &CapturedPhoto,
    ) -> Result<PhotoReference, StorageError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_from {
            if n >= limit {
                return Err(StorageError::Api(503, "gateway unavailable".to_string()));
            }
        }
        Ok(PhotoReference {
            reference_id: format!("ph-{}-{}", photo.view.as_str(), n),
            view: photo.view,
        })
    }

    async fn delete(&self, reference: &PhotoReference) -> Result<(), StorageError> {
        self.deleted
            .lock()
            .unwrap()
            .push(reference.reference_id.clone());
        Ok(())
    }
}
