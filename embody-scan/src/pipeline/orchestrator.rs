//! Scan pipeline orchestrator
//!
//! One `run()` per scan session: validate, upload photos, call the analysis
//! stages in order, canonicalize the outputs, commit to the analysis service,
//! persist locally, and drive the progress tracker the whole way. Estimate,
//! semantic, match, and commit failures are fatal; refine is the only stage
//! the pipeline recovers from (with `fallback_used = true`).

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use embody_common::events::{EventBus, ScanEvent, ScanPhase};

use crate::db;
use crate::extraction::{resolve_gender, resolve_limb_masses, resolve_shape_params, resolve_skin_tone};
use crate::models::{PhotoView, PipelineResult, ScanRecord, ScanRequest, AVATAR_VERSION};
use crate::persist::{canonicalize_result, persist_scan_outcome};
use crate::pipeline::guard::{ScanRegistry, SessionGuard};
use crate::progress::{ProgressTracker, SimulationConfig, StageCheckpoint};
use crate::stages::{
    AnalysisError, AnalysisStages, CommitRequest, EstimateRequest, MatchRequest, RefineRequest,
};
use crate::storage::{PhotoReference, PhotoStore, StorageError};

/// Pipeline failure modes, in roughly the order they can occur
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A scan is already running for this session")]
    AlreadyRunning,

    #[error("Both a front and a profile photo are required")]
    MissingPhotos,

    #[error("Biometric profile is incomplete: positive height and weight are required")]
    IncompleteProfile,

    #[error("Photo upload failed: {0}")]
    Upload(#[source] StorageError),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: AnalysisError,
    },

    #[error("Commit failed: {0}")]
    Commit(#[source] AnalysisError),

    #[error("Persistence failed: {0}")]
    Persist(#[source] embody_common::Error),
}

impl PipelineError {
    /// Stage name for failure events, when the failure is stage-scoped
    pub fn stage_name(&self) -> Option<&'static str> {
        match self {
            PipelineError::Upload(_) => Some("upload"),
            PipelineError::Stage { stage, .. } => Some(stage),
            PipelineError::Commit(_) => Some("commit"),
            _ => None,
        }
    }
}

/// The scan pipeline. One instance serves the whole process; per-session
/// single-flight is enforced through the registry.
pub struct ScanPipeline {
    db: SqlitePool,
    event_bus: EventBus,
    analysis: Arc<dyn AnalysisStages>,
    photos: Arc<dyn PhotoStore>,
    registry: Arc<ScanRegistry>,
    sim_config: SimulationConfig,
}

impl ScanPipeline {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        analysis: Arc<dyn AnalysisStages>,
        photos: Arc<dyn PhotoStore>,
    ) -> Self {
        Self {
            db,
            event_bus,
            analysis,
            photos,
            registry: Arc::new(ScanRegistry::new()),
            sim_config: SimulationConfig::default(),
        }
    }

    /// Override the simulated progression timing, used by tests
    pub fn with_sim_config(mut self, sim_config: SimulationConfig) -> Self {
        self.sim_config = sim_config;
        self
    }

    pub fn registry(&self) -> &Arc<ScanRegistry> {
        &self.registry
    }

    /// Build a tracker for a session using this pipeline's simulation timing
    pub fn tracker_for(&self, scan_id: &str) -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::with_config(
            scan_id,
            self.event_bus.clone(),
            self.sim_config.clone(),
        ))
    }

    /// Run one scan session end to end.
    ///
    /// Claims the session first: a second concurrent run for the same scan_id
    /// gets `AlreadyRunning` with no side effects. On any fatal error the
    /// simulation is stopped, the tracker fails, the scan row records the
    /// failure, and a `ScanFailed` event goes out. The claim is released on
    /// every exit path.
    pub async fn run(
        &self,
        request: ScanRequest,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<PipelineResult, PipelineError> {
        let guard = self
            .registry
            .claim(&request.scan_id)
            .ok_or(PipelineError::AlreadyRunning)?;
        self.run_with_guard(guard, request, tracker).await
    }

    /// Run with a claim taken by the caller (the start handler claims before
    /// acknowledging, so a duplicate request gets its 409 atomically).
    pub async fn run_with_guard(
        &self,
        _guard: SessionGuard,
        request: ScanRequest,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<PipelineResult, PipelineError> {
        // A retry of a failed session reuses the scan_id; start clean
        tracker.reset().await;

        let scan_id = request.scan_id.clone();
        let user_id = request.user_id;
        let flavor = request.flavor;
        let span = info_span!("scan_pipeline", scan_id = %scan_id);
        match self.run_claimed(request, tracker).instrument(span).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.handle_failure(&scan_id, user_id, flavor, tracker, &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn run_claimed(
        &self,
        request: ScanRequest,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<PipelineResult, PipelineError> {
        if !request.has_photos() {
            return Err(PipelineError::MissingPhotos);
        }
        if !request.profile.is_complete() {
            return Err(PipelineError::IncompleteProfile);
        }

        let started = Instant::now();
        info!(
            user_id = %request.user_id,
            flavor = request.flavor.as_str(),
            "scan pipeline started"
        );
        self.event_bus.emit_lossy(ScanEvent::ScanSessionStarted {
            scan_id: request.scan_id.clone(),
            user_id: request.user_id,
            flavor: request.flavor,
            timestamp: Utc::now(),
        });

        let mut record = ScanRecord::new(request.scan_id.clone(), request.user_id, request.flavor);
        db::scans::save_scan(&self.db, &record)
            .await
            .map_err(PipelineError::Persist)?;

        // Both photos are in hand, so the capture checkpoints land back to back
        tracker.apply_capture(PhotoView::Front).await;
        tracker.apply_capture(PhotoView::Profile).await;
        tracker.set_phase(ScanPhase::Processing).await;

        let references = self.upload_photos(&request).await?;
        tracker.apply_checkpoint(StageCheckpoint::Upload).await;

        // Simulated progression covers the long analysis wait; the real
        // checkpoints in that span are absorbed by it
        tracker
            .start_simulation(
                StageCheckpoint::Upload.target(),
                StageCheckpoint::Commit.target(),
                request.flavor,
            )
            .await;

        // -- Estimate ---------------------------------------------------------
        let estimate_request = EstimateRequest {
            user_id: request.user_id,
            sex: request.profile.sex,
            height_cm: request.profile.height_cm,
            weight_kg: request.profile.weight_kg,
            age_years: request.profile.age_years,
            photos: references.clone(),
        };
        self.emit_stage_started(&request.scan_id, "estimate");
        let stage_start = Instant::now();
        let extracted = match self.analysis.estimate(&estimate_request).await {
            Ok(data) => {
                self.emit_stage_completed(&request.scan_id, "estimate", stage_start);
                data
            }
            Err(source) => {
                self.emit_stage_failed(&request.scan_id, "estimate", &source.to_string(), false);
                return Err(PipelineError::Stage {
                    stage: "estimate",
                    source,
                });
            }
        };
        tracker.apply_checkpoint(StageCheckpoint::Estimate).await;

        // -- Semantic ---------------------------------------------------------
        self.emit_stage_started(&request.scan_id, "semantic");
        let stage_start = Instant::now();
        let semantic = match self.analysis.semantic(&extracted).await {
            Ok(profile) => {
                self.emit_stage_completed(&request.scan_id, "semantic", stage_start);
                profile
            }
            Err(source) => {
                self.emit_stage_failed(&request.scan_id, "semantic", &source.to_string(), false);
                return Err(PipelineError::Stage {
                    stage: "semantic",
                    source,
                });
            }
        };
        tracker.apply_checkpoint(StageCheckpoint::Semantic).await;

        // -- Match ------------------------------------------------------------
        let match_request = MatchRequest {
            extracted: extracted.clone(),
            semantic_profile: semantic.clone(),
            declared_sex: request.profile.sex,
            height_cm: request.profile.height_cm,
        };
        self.emit_stage_started(&request.scan_id, "match");
        let stage_start = Instant::now();
        let outcome = match self.analysis.match_archetypes(&match_request).await {
            Ok(outcome) => {
                self.emit_stage_completed(&request.scan_id, "match", stage_start);
                outcome
            }
            Err(source) => {
                self.emit_stage_failed(&request.scan_id, "match", &source.to_string(), false);
                return Err(PipelineError::Stage {
                    stage: "match",
                    source,
                });
            }
        };
        tracker.apply_checkpoint(StageCheckpoint::Match).await;

        let gltf_model_id = match outcome.selected_model() {
            Some(model_id) => model_id.to_string(),
            None => {
                self.emit_stage_failed(
                    &request.scan_id,
                    "match",
                    "no archetype carries a gltf_model_id",
                    false,
                );
                return Err(PipelineError::Stage {
                    stage: "match",
                    source: AnalysisError::MissingField("gltf_model_id"),
                });
            }
        };
        let (match_shape, match_masses) = match &outcome.blended {
            Some(blended) => (blended.shape_params.clone(), blended.limb_masses.clone()),
            None => {
                let best = outcome.best_candidate();
                (best.shape_params.clone(), best.limb_masses.clone())
            }
        };

        // -- Refine (resilient) -----------------------------------------------
        let refine_request = RefineRequest {
            shape_params: match_shape.clone(),
            limb_masses: match_masses.clone(),
            measurements: extracted.measurements.clone(),
            photos: references.clone(),
        };
        self.emit_stage_started(&request.scan_id, "refine");
        let stage_start = Instant::now();
        let (refinement, fallback_used) = match self.analysis.refine(&refine_request).await {
            Ok(data) => {
                self.emit_stage_completed(&request.scan_id, "refine", stage_start);
                (Some(data), false)
            }
            Err(err) => {
                warn!(
                    scan_id = %request.scan_id,
                    "refine failed, continuing with match parameters: {}",
                    err
                );
                self.emit_stage_failed(&request.scan_id, "refine", &err.to_string(), true);
                (None, true)
            }
        };

        // -- Canonicalization --------------------------------------------------
        let gender = resolve_gender(request.profile.sex);
        let skin_tone = resolve_skin_tone(extracted.skin_tone.as_ref());
        let shape_params = resolve_shape_params(
            refinement.as_ref().and_then(|r| r.shape_params.as_ref()),
            Some(&match_shape),
        );
        let limb_masses = resolve_limb_masses(
            refinement.as_ref().and_then(|r| r.limb_masses.as_ref()),
            Some(&match_masses),
            &extracted.measurements,
            &request.profile,
        );
        let mut insights = semantic.insights.clone();
        if let Some(refinement) = &refinement {
            insights.extend(refinement.insights.iter().cloned());
        }

        // Real checkpoints resume after this point
        tracker.stop_simulation().await;

        // -- Commit (fatal) ----------------------------------------------------
        let commit_request = CommitRequest {
            user_id: request.user_id,
            client_scan_id: request.scan_id.clone(),
            gender,
            shape_params: shape_params.clone(),
            limb_masses: limb_masses.clone(),
            skin_tone: skin_tone.clone(),
            gltf_model_id: gltf_model_id.clone(),
            avatar_version: AVATAR_VERSION.to_string(),
            mapping_version: outcome.mapping_version.clone(),
            fallback_used,
        };
        self.emit_stage_started(&request.scan_id, "commit");
        let stage_start = Instant::now();
        let receipt = match self.analysis.commit(&commit_request).await {
            Ok(receipt) => {
                self.emit_stage_completed(&request.scan_id, "commit", stage_start);
                receipt
            }
            Err(source) => {
                self.emit_stage_failed(&request.scan_id, "commit", &source.to_string(), false);
                return Err(PipelineError::Commit(source));
            }
        };
        tracker.apply_checkpoint(StageCheckpoint::Commit).await;

        tracker.set_phase(ScanPhase::Celebration).await;

        // -- Persist -----------------------------------------------------------
        let result = canonicalize_result(PipelineResult {
            scan_id: request.scan_id.clone(),
            server_scan_id: receipt.scan_id,
            user_id: request.user_id,
            gender,
            shape_params,
            limb_masses,
            skin_tone,
            gltf_model_id,
            avatar_version: AVATAR_VERSION.to_string(),
            mapping_version: outcome.mapping_version,
            fallback_used,
            insights,
            duration_seconds: started.elapsed().as_secs_f64(),
        });
        record.complete_with(&result);
        persist_scan_outcome(&self.db, &self.event_bus, &record, &result)
            .await
            .map_err(PipelineError::Persist)?;

        // -- Model handoff -----------------------------------------------------
        tracker.apply_checkpoint(StageCheckpoint::ModelLoading).await;
        tracker.set_phase(ScanPhase::AvatarReady).await;
        tracker.apply_checkpoint(StageCheckpoint::ModelLoaded).await;
        tracker.set_phase(ScanPhase::Complete).await;

        info!(
            server_scan_id = %result.server_scan_id,
            fallback_used,
            duration_seconds = result.duration_seconds,
            "scan pipeline completed"
        );
        self.event_bus.emit_lossy(ScanEvent::ScanCompleted {
            scan_id: result.scan_id.clone(),
            server_scan_id: result.server_scan_id.clone(),
            fallback_used: result.fallback_used,
            duration_seconds: result.duration_seconds,
            timestamp: Utc::now(),
        });

        Ok(result)
    }

    /// Upload both photos concurrently; the next stage waits for both. When
    /// one side fails, the other side's reference is deleted best-effort
    /// before the error is returned.
    async fn upload_photos(
        &self,
        request: &ScanRequest,
    ) -> Result<Vec<PhotoReference>, PipelineError> {
        self.emit_stage_started(&request.scan_id, "upload");
        let stage_start = Instant::now();

        let (front, profile) = tokio::join!(
            self.photos.upload(request.user_id, &request.front_photo),
            self.photos.upload(request.user_id, &request.profile_photo),
        );

        let err = match (front, profile) {
            (Ok(front), Ok(profile)) => {
                self.emit_stage_completed(&request.scan_id, "upload", stage_start);
                return Ok(vec![front, profile]);
            }
            (Ok(orphan), Err(err)) | (Err(err), Ok(orphan)) => {
                if let Err(cleanup_err) = self.photos.delete(&orphan).await {
                    warn!(
                        scan_id = %request.scan_id,
                        "failed to delete orphaned photo {}: {}",
                        orphan.reference_id, cleanup_err
                    );
                }
                err
            }
            (Err(err), Err(_)) => err,
        };

        self.emit_stage_failed(&request.scan_id, "upload", &err.to_string(), false);
        Err(PipelineError::Upload(err))
    }

    /// Common fatal-error path: freeze progress, record the failure, tell
    /// subscribers. `AlreadyRunning` never reaches here.
    async fn handle_failure(
        &self,
        scan_id: &str,
        user_id: uuid::Uuid,
        flavor: embody_common::events::ScanFlavor,
        tracker: &Arc<ProgressTracker>,
        err: &PipelineError,
    ) {
        tracker.stop_simulation().await;
        tracker.fail(&err.to_string()).await;

        let mut record = match db::scans::load_scan(&self.db, scan_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                // Validation failures can precede the row insert
                ScanRecord::new(scan_id.to_string(), user_id, flavor)
            }
            Err(db_err) => {
                warn!(scan_id = %scan_id, "could not load scan row for failure update: {}", db_err);
                return;
            }
        };
        record.fail_with(err.to_string());
        if let Err(db_err) = db::scans::save_scan(&self.db, &record).await {
            warn!(scan_id = %scan_id, "could not record scan failure: {}", db_err);
        }

        self.event_bus.emit_lossy(ScanEvent::ScanFailed {
            scan_id: scan_id.to_string(),
            stage: err.stage_name().map(String::from),
            error: err.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit_stage_started(&self, scan_id: &str, stage: &str) {
        self.event_bus.emit_lossy(ScanEvent::StageStarted {
            scan_id: scan_id.to_string(),
            stage: stage.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit_stage_completed(&self, scan_id: &str, stage: &str, stage_start: Instant) {
        let elapsed_ms = stage_start.elapsed().as_millis() as u64;
        info!(scan_id = %scan_id, stage, elapsed_ms, "stage completed");
        self.event_bus.emit_lossy(ScanEvent::StageCompleted {
            scan_id: scan_id.to_string(),
            stage: stage.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
        });
    }

    fn emit_stage_failed(&self, scan_id: &str, stage: &str, error: &str, recovered: bool) {
        self.event_bus.emit_lossy(ScanEvent::StageFailed {
            scan_id: scan_id.to_string(),
            stage: stage.to_string(),
            error: error.to_string(),
            recovered,
            timestamp: Utc::now(),
        });
    }
}
