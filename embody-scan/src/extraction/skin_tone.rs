//! Canonical skin tone resolution
//!
//! A canonical tone carries the same color in four representations (integer
//! RGB, hex string, sRGB floats, linear floats) so downstream consumers
//! never re-derive one from another. The resolver accepts the current
//! canonical record, upgrades the legacy flat-RGB shape, and otherwise falls
//! back to a neutral emergency tone, so it always produces a value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Canonical skin tone schema tag
pub const SKIN_TONE_SCHEMA: &str = "v2";

/// Confidence assigned to legacy records after upgrade
const LEGACY_UPGRADE_CONFIDENCE: f64 = 0.6;

/// Neutral medium tone used when no candidate survives validation
const EMERGENCY_RGB: [u8; 3] = [172, 128, 100];
const EMERGENCY_CONFIDENCE: f64 = 0.1;

/// Tolerance for cross-representation consistency checks
const FLOAT_TOLERANCE: f64 = 1e-3;

/// Where a canonical tone came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkinToneSource {
    /// Produced by the analysis service
    Analysis,
    /// Upgraded from a legacy flat-RGB record
    LegacyUpgrade,
    /// Explicit user adjustment
    UserAdjusted,
    /// Nothing usable was found
    EmergencyFallback,
}

/// One skin tone in four consistent representations.
///
/// Constructors derive everything from the integer RGB, so a value built
/// through them always validates. Values arriving from outside (stage
/// payloads, stored JSON) go through `validate` before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSkinTone {
    /// Schema tag, currently "v2"
    pub schema: String,
    /// Integer RGB, 0-255 per channel
    pub rgb: [u8; 3],
    /// "#RRGGBB", uppercase
    pub hex: String,
    /// sRGB floats, 0-1 per channel
    pub srgb: [f64; 3],
    /// Linear-light floats, 0-1 per channel
    pub linear: [f64; 3],
    pub source: SkinToneSource,
    /// 0-1
    pub confidence: f64,
}

impl CanonicalSkinTone {
    /// Build a full canonical record from integer RGB
    pub fn from_rgb(rgb: [u8; 3], source: SkinToneSource, confidence: f64) -> Self {
        let srgb = [
            rgb[0] as f64 / 255.0,
            rgb[1] as f64 / 255.0,
            rgb[2] as f64 / 255.0,
        ];
        let linear = [
            srgb_to_linear(srgb[0]),
            srgb_to_linear(srgb[1]),
            srgb_to_linear(srgb[2]),
        ];
        Self {
            schema: SKIN_TONE_SCHEMA.to_string(),
            rgb,
            hex: format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2]),
            srgb,
            linear,
            source,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// The fixed tone used when resolution finds nothing usable
    pub fn emergency_fallback() -> Self {
        Self::from_rgb(
            EMERGENCY_RGB,
            SkinToneSource::EmergencyFallback,
            EMERGENCY_CONFIDENCE,
        )
    }

    /// Full re-canonicalization for an explicit user adjustment
    pub fn user_adjusted(rgb: [u8; 3]) -> Self {
        Self::from_rgb(rgb, SkinToneSource::UserAdjusted, 1.0)
    }

    /// Field-by-field consistency check.
    ///
    /// All four representations must describe the same color: the hex
    /// string must parse back to `rgb`, `srgb` must equal `rgb / 255`
    /// within tolerance, and `linear` must match the sRGB transfer function
    /// applied to `srgb`.
    pub fn validate(&self) -> bool {
        if self.schema != SKIN_TONE_SCHEMA {
            return false;
        }
        if !(0.0..=1.0).contains(&self.confidence) || !self.confidence.is_finite() {
            return false;
        }
        match parse_hex(&self.hex) {
            Some(parsed) if parsed == self.rgb => {}
            _ => return false,
        }
        for channel in 0..3 {
            let expected_srgb = self.rgb[channel] as f64 / 255.0;
            if !self.srgb[channel].is_finite()
                || (self.srgb[channel] - expected_srgb).abs() > FLOAT_TOLERANCE
            {
                return false;
            }
            let expected_linear = srgb_to_linear(self.srgb[channel]);
            if !self.linear[channel].is_finite()
                || (self.linear[channel] - expected_linear).abs() > FLOAT_TOLERANCE
            {
                return false;
            }
        }
        true
    }
}

/// Standard sRGB to linear-light transfer
fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Parse "#RRGGBB" (case-insensitive)
fn parse_hex(hex: &str) -> Option<[u8; 3]> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
    let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
    let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
    Some([r, g, b])
}

/// A candidate matching the canonical schema, if it validates
fn parse_canonical(value: &Value) -> Option<CanonicalSkinTone> {
    let tone: CanonicalSkinTone = serde_json::from_value(value.clone()).ok()?;
    if tone.validate() {
        Some(tone)
    } else {
        debug!("canonical skin tone candidate failed validation");
        None
    }
}

/// A legacy flat `{"r": .., "g": .., "b": ..}` record with channels 0-255
fn parse_legacy_rgb(value: &Value) -> Option<[u8; 3]> {
    let object = value.as_object()?;
    let channel = |key: &str| -> Option<u8> {
        let number = object.get(key)?.as_i64()?;
        u8::try_from(number).ok()
    };
    Some([channel("r")?, channel("g")?, channel("b")?])
}

/// Resolve a raw skin-tone candidate to a canonical tone.
///
/// Priority chain, first success wins:
/// 1. canonical v2 record, field-by-field valid (source and confidence kept)
/// 2. legacy flat RGB, fully upgraded with damped confidence
/// 3. emergency fallback tone
///
/// Total by construction; the emergency arm logs the anomaly.
pub fn resolve_skin_tone(candidate: Option<&Value>) -> CanonicalSkinTone {
    if let Some(value) = candidate {
        if let Some(tone) = parse_canonical(value) {
            return tone;
        }
        if let Some(rgb) = parse_legacy_rgb(value) {
            debug!("upgrading legacy flat-RGB skin tone");
            return CanonicalSkinTone::from_rgb(
                rgb,
                SkinToneSource::LegacyUpgrade,
                LEGACY_UPGRADE_CONFIDENCE,
            );
        }
        warn!("skin tone candidate unusable, applying emergency fallback");
    } else {
        warn!("no skin tone candidate in payload, applying emergency fallback");
    }
    CanonicalSkinTone::emergency_fallback()
}

// ============================================================================
// Tests
// ============================================================================
