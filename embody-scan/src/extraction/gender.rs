//! Avatar rig gender resolution

use serde::{Deserialize, Serialize};

use crate::models::DeclaredSex;

/// Which avatar rig family to build on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Masculine,
    Feminine,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Masculine => "masculine",
            Gender::Feminine => "feminine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "masculine" => Some(Gender::Masculine),
            "feminine" => Some(Gender::Feminine),
            _ => None,
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolve the rig gender from the declared sex alone.
///
/// There is no inference and no fallback source: a request without a usable
/// declared sex never reaches the pipeline (it is rejected at the request
/// boundary), so the mapping here is total by construction.
pub fn resolve_gender(declared: DeclaredSex) -> Gender {
    match declared {
        DeclaredSex::Male => Gender::Masculine,
        DeclaredSex::Female => Gender::Feminine,
    }
}

// ============================================================================
// Tests
// ============================================================================
