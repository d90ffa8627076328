//! Canonicalization layer between stage payloads and persisted values
//!
//! Stage payloads are loosely typed and drift over time; nothing from them
//! reaches the result or storage without passing through these resolvers.
//! Every resolver is a priority chain ending in a fallback, so each one is
//! total: the pipeline always gets a usable, validated, clamped value.

mod gender;
mod limb_mass;
mod skin_tone;

pub use gender::{resolve_gender, Gender};
pub use limb_mass::{
    normalize_limb_masses, resolve_limb_masses, resolve_shape_params, LIMB_MASS_MAX,
    LIMB_MASS_MIN, LIMB_SEGMENT_KEYS, SHAPE_PARAM_KEYS,
};
pub use skin_tone::{resolve_skin_tone, CanonicalSkinTone, SkinToneSource, SKIN_TONE_SCHEMA};
