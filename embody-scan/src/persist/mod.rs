//! Persistence reconciliation for completed scans

mod reconciler;

pub use reconciler::{
    apply_user_skin_tone, canonicalize_result, persist_scan_outcome, LEGACY_PREF_KEYS,
    PREF_GENDER, PREF_GLTF_MODEL_ID, PREF_LIMB_MASSES, PREF_MAPPING_VERSION, PREF_SHAPE_PARAMS,
    PREF_SKIN_TONE, PREF_VERSION,
};
