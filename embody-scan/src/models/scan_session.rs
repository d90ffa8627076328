//! Scan session domain types
//!
//! A scan session is identified by a client-assigned `scan_id` that stays
//! stable across the whole capture-to-avatar flow. The session record moves
//! through three statuses: PROCESSING → COMPLETE or FAILED.

use chrono::{DateTime, Utc};
use embody_common::events::ScanFlavor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extraction::{CanonicalSkinTone, Gender};
use crate::models::PipelineResult;
use std::collections::BTreeMap;

/// Which of the two required photos this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoView {
    Front,
    Profile,
}

impl PhotoView {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoView::Front => "front",
            PhotoView::Profile => "profile",
        }
    }
}

/// A captured photo: raw bytes, opaque to this service.
///
/// The pipeline never decodes or inspects photo content; bytes travel to the
/// storage gateway as-is. Debug output deliberately shows only the length.
#[derive(Clone)]
pub struct CapturedPhoto {
    pub view: PhotoView,
    pub data: Vec<u8>,
}

impl CapturedPhoto {
    pub fn new(view: PhotoView, data: Vec<u8>) -> Self {
        Self { view, data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for CapturedPhoto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedPhoto")
            .field("view", &self.view)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Sex as declared by the user during onboarding.
///
/// Strictly two-valued: rig gender derives from this field and nothing
/// else, so a request carrying anything other than these values is
/// rejected at deserialization, before any remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredSex {
    Male,
    Female,
}

/// User-declared biometrics sent alongside the photos
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricProfile {
    pub sex: DeclaredSex,
    /// Height in centimeters
    pub height_cm: f64,
    /// Weight in kilograms
    pub weight_kg: f64,
    /// Age in years, optional
    pub age_years: Option<u32>,
}

impl BiometricProfile {
    /// Complete means the pipeline can run: positive height and weight.
    /// Declared sex needs no check here, the type admits only usable values.
    pub fn is_complete(&self) -> bool {
        self.height_cm > 0.0
            && self.height_cm.is_finite()
            && self.weight_kg > 0.0
            && self.weight_kg.is_finite()
    }

    /// Body mass index from the declared values
    pub fn bmi(&self) -> f64 {
        let height_m = self.height_cm / 100.0;
        self.weight_kg / (height_m * height_m)
    }
}

/// Everything the pipeline needs to run one scan
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Client-assigned identifier, stable for the session
    pub scan_id: String,
    pub user_id: Uuid,
    pub profile: BiometricProfile,
    pub front_photo: CapturedPhoto,
    pub profile_photo: CapturedPhoto,
    pub flavor: ScanFlavor,
}

impl ScanRequest {
    /// Both photos present with non-empty content
    pub fn has_photos(&self) -> bool {
        !self.front_photo.is_empty() && !self.profile_photo.is_empty()
    }
}

/// Lifecycle status of a scan record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    /// Pipeline running
    Processing,
    /// Avatar parameters committed and persisted
    Complete,
    /// Pipeline failed
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Processing => "PROCESSING",
            ScanStatus::Complete => "COMPLETE",
            ScanStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSING" => Some(ScanStatus::Processing),
            "COMPLETE" => Some(ScanStatus::Complete),
            "FAILED" => Some(ScanStatus::Failed),
            _ => None,
        }
    }
}

/// Persisted scan record (one row in the `scans` table)
///
/// Result fields are None until the pipeline completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: String,
    pub user_id: Uuid,
    pub status: ScanStatus,
    pub flavor: ScanFlavor,
    pub server_scan_id: Option<String>,
    pub gender: Option<Gender>,
    pub shape_params: Option<BTreeMap<String, f64>>,
    pub limb_masses: Option<BTreeMap<String, f64>>,
    pub skin_tone: Option<CanonicalSkinTone>,
    pub avatar_version: Option<String>,
    pub mapping_version: Option<String>,
    pub gltf_model_id: Option<String>,
    pub fallback_used: bool,
    pub insights: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanRecord {
    /// Fresh record at pipeline entry
    pub fn new(scan_id: String, user_id: Uuid, flavor: ScanFlavor) -> Self {
        Self {
            scan_id,
            user_id,
            status: ScanStatus::Processing,
            flavor,
            server_scan_id: None,
            gender: None,
            shape_params: None,
            limb_masses: None,
            skin_tone: None,
            avatar_version: None,
            mapping_version: None,
            gltf_model_id: None,
            fallback_used: false,
            insights: Vec::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Fill in the result fields and mark the record complete
    pub fn complete_with(&mut self, result: &PipelineResult) {
        self.status = ScanStatus::Complete;
        self.server_scan_id = Some(result.server_scan_id.clone());
        self.gender = Some(result.gender);
        self.shape_params = Some(result.shape_params.clone());
        self.limb_masses = Some(result.limb_masses.clone());
        self.skin_tone = Some(result.skin_tone.clone());
        self.avatar_version = Some(result.avatar_version.clone());
        self.mapping_version = Some(result.mapping_version.clone());
        self.gltf_model_id = Some(result.gltf_model_id.clone());
        self.fallback_used = result.fallback_used;
        self.insights = result.insights.clone();
        self.error = None;
        self.ended_at = Some(Utc::now());
    }

    /// Mark the record failed
    pub fn fail_with(&mut self, error: impl Into<String>) {
        self.status = ScanStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ScanStatus::Complete | ScanStatus::Failed)
    }
}

// ============================================================================
// Tests
// ============================================================================
