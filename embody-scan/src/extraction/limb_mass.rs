//! Limb mass and shape parameter resolution
//!
//! Limb masses are per-segment multipliers applied to the avatar rig. Only
//! allow-listed segments exist, every value lands in [0.6, 1.6], and the
//! `gate` control sentinel is always exactly 1.0. Sources are tried in
//! priority order and the chain bottoms out in a neutral map, so the
//! resolver is total.

use std::collections::BTreeMap;

use tracing::debug;

use crate::models::BiometricProfile;

/// Allowed limb segment keys. `gate` is a control sentinel, not a segment.
pub const LIMB_SEGMENT_KEYS: &[&str] = &[
    "gate", "arm", "forearm", "hand", "shoulder", "neck", "torso", "hip", "thigh", "calf", "foot",
];

/// The control sentinel key, always 1.0
pub const GATE_KEY: &str = "gate";

pub const LIMB_MASS_MIN: f64 = 0.6;
pub const LIMB_MASS_MAX: f64 = 1.6;

/// Allowed morph parameter keys
pub const SHAPE_PARAM_KEYS: &[&str] = &[
    "height",
    "weight",
    "muscle",
    "proportions",
    "chest_girth",
    "waist_girth",
    "hip_girth",
    "shoulder_width",
    "neck_girth",
    "inseam",
    "belly_shape",
    "posture",
];

const SHAPE_PARAM_MIN: f64 = -1.0;
const SHAPE_PARAM_MAX: f64 = 1.0;

/// How strongly each segment responds to overall mass changes in the
/// measurement heuristic. Trunk segments track closely, extremities barely.
const SEGMENT_RESPONSE: &[(&str, f64)] = &[
    ("gate", 0.0),
    ("arm", 0.8),
    ("forearm", 0.55),
    ("hand", 0.25),
    ("shoulder", 0.75),
    ("neck", 0.6),
    ("torso", 1.0),
    ("hip", 0.95),
    ("thigh", 0.9),
    ("calf", 0.7),
    ("foot", 0.25),
];

/// Body fat assumed when the estimate did not include one
const DEFAULT_BODY_FAT_PCT: f64 = 22.0;

/// Resolve the final limb mass map.
///
/// Priority chain: AI-refined map, blended match map, measurement
/// heuristic, neutral. Whatever wins is normalized: filtered to the
/// allow-list, clamped to [0.6, 1.6], missing segments filled with 1.0
/// and `gate` forced to exactly 1.0.
pub fn resolve_limb_masses(
    refined: Option<&BTreeMap<String, f64>>,
    blended: Option<&BTreeMap<String, f64>>,
    measurements: &BTreeMap<String, f64>,
    profile: &BiometricProfile,
) -> BTreeMap<String, f64> {
    if let Some(map) = refined.filter(|m| !m.is_empty()) {
        debug!("limb masses from refine stage");
        return normalize_limb_masses(map);
    }
    if let Some(map) = blended.filter(|m| !m.is_empty()) {
        debug!("limb masses from blended match parameters");
        return normalize_limb_masses(map);
    }
    debug!("limb masses from measurement heuristic");
    normalize_limb_masses(&heuristic_masses(measurements, profile))
}

/// Filter to the allow-list, clamp, fill gaps, pin the gate sentinel.
///
/// Non-finite inputs are dropped before clamping so they fall back to the
/// neutral 1.0 fill.
pub fn normalize_limb_masses(source: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let mut normalized = BTreeMap::new();
    for &key in LIMB_SEGMENT_KEYS {
        let value = source
            .get(key)
            .copied()
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(LIMB_MASS_MIN, LIMB_MASS_MAX))
            .unwrap_or(1.0);
        normalized.insert(key.to_string(), value);
    }
    normalized.insert(GATE_KEY.to_string(), 1.0);
    normalized
}

/// Estimate limb masses from body composition when no stage produced any.
///
/// Two bounded multiplicative factors (BMI relative to 22, body fat
/// relative to a neutral 22%) drive a per-segment response weight.
fn heuristic_masses(
    measurements: &BTreeMap<String, f64>,
    profile: &BiometricProfile,
) -> BTreeMap<String, f64> {
    let bmi = measurements
        .get("bmi")
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or_else(|| profile.bmi());
    let body_fat = measurements
        .get("body_fat_pct")
        .copied()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(DEFAULT_BODY_FAT_PCT);

    let mass_factor = (bmi / 22.0).clamp(0.8, 1.35);
    let fat_factor = (0.85 + body_fat / 150.0).clamp(0.85, 1.2);
    let drive = mass_factor * fat_factor - 1.0;

    SEGMENT_RESPONSE
        .iter()
        .map(|&(key, response)| (key.to_string(), 1.0 + drive * response))
        .collect()
}

/// Resolve the final shape parameter map: refined wins over blended; both
/// are filtered to the allow-list and clamped to [-1, 1]. No fill: morphs
/// the stages did not produce stay absent.
pub fn resolve_shape_params(
    refined: Option<&BTreeMap<String, f64>>,
    blended: Option<&BTreeMap<String, f64>>,
) -> BTreeMap<String, f64> {
    let source = match (refined.filter(|m| !m.is_empty()), blended) {
        (Some(map), _) => map,
        (None, Some(map)) => map,
        (None, None) => return BTreeMap::new(),
    };

    source
        .iter()
        .filter(|(key, value)| SHAPE_PARAM_KEYS.contains(&key.as_str()) && value.is_finite())
        .map(|(key, value)| (key.clone(), value.clamp(SHAPE_PARAM_MIN, SHAPE_PARAM_MAX)))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
