//! Real progress checkpoints
//!
//! Checkpoints are the fixed progress targets the pipeline publishes as
//! stages actually complete, as opposed to the simulated in-between motion.
//! Processing checkpoints all live in [55, 100]; capture checkpoints cover
//! the photo-taking phase below that.

use embody_common::events::ScanPhase;

use crate::models::PhotoView;

/// Named checkpoint published when a pipeline stage completes.
///
/// Values are fixed by the UX design: the processing band runs from 55
/// (photos uploaded) to 100 (model loaded), leaving 0-50 for capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCheckpoint {
    /// Both photos stored
    Upload,
    /// Measurement estimation done
    Estimate,
    /// Semantic body profile done
    Semantic,
    /// Archetype match done
    Match,
    /// Server accepted the final parameters
    Commit,
    /// 3D model download started
    ModelLoading,
    /// 3D model ready to render
    ModelLoaded,
}

impl StageCheckpoint {
    /// Progress target for this checkpoint
    pub fn target(&self) -> f64 {
        match self {
            StageCheckpoint::Upload => 55.0,
            StageCheckpoint::Estimate => 62.0,
            StageCheckpoint::Semantic => 70.0,
            StageCheckpoint::Match => 78.0,
            StageCheckpoint::Commit => 93.0,
            StageCheckpoint::ModelLoading => 97.0,
            StageCheckpoint::ModelLoaded => 100.0,
        }
    }

    /// Headline and hint copy shown when this checkpoint applies
    pub fn messages(&self) -> (&'static str, &'static str) {
        match self {
            StageCheckpoint::Upload => ("Securing your photos", "Encrypted transfer in progress"),
            StageCheckpoint::Estimate => ("Reading your proportions", "Measuring from your photos"),
            StageCheckpoint::Semantic => ("Understanding your build", "Mapping body characteristics"),
            StageCheckpoint::Match => ("Finding your match", "Comparing against body archetypes"),
            StageCheckpoint::Commit => ("Saving your avatar", "Writing your results"),
            StageCheckpoint::ModelLoading => ("Preparing your avatar", "Loading the 3D model"),
            StageCheckpoint::ModelLoaded => ("Avatar ready", "Say hello to your digital self"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageCheckpoint::Upload => "upload",
            StageCheckpoint::Estimate => "estimate",
            StageCheckpoint::Semantic => "semantic",
            StageCheckpoint::Match => "match",
            StageCheckpoint::Commit => "commit",
            StageCheckpoint::ModelLoading => "model_loading",
            StageCheckpoint::ModelLoaded => "model_loaded",
        }
    }
}

/// Capture-phase checkpoint: (target, headline, hint)
pub fn capture_checkpoint(view: PhotoView) -> (f64, &'static str, &'static str) {
    match view {
        PhotoView::Front => (25.0, "Front photo captured", "One more to go"),
        PhotoView::Profile => (50.0, "Profile photo captured", "That's everything we need"),
    }
}

/// Minimum progress pinned when a phase is entered, if any
pub fn phase_floor(phase: ScanPhase) -> Option<f64> {
    match phase {
        ScanPhase::Celebration => Some(95.0),
        ScanPhase::AvatarReady => Some(98.0),
        ScanPhase::Complete => Some(100.0),
        _ => None,
    }
}

/// Default copy shown when a phase is entered without an explicit message
pub fn phase_messages(phase: ScanPhase) -> (&'static str, &'static str) {
    match phase {
        ScanPhase::Capture => ("Let's get you scanned", "Two photos is all it takes"),
        ScanPhase::Processing => ("Processing your scan", "This usually takes under a minute"),
        ScanPhase::Celebration => ("Scan complete!", "Crunching the final numbers"),
        ScanPhase::AvatarReady => ("Your avatar is ready", "Bringing it to life"),
        ScanPhase::Complete => ("All done", "Enjoy your avatar"),
        ScanPhase::Failed => ("Scan failed", "Let's try that again"),
    }
}

// ============================================================================
// Tests
// ============================================================================
