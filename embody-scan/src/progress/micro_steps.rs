//! Micro-step scripts for the simulated progression
//!
//! While the pipeline waits on the analysis service the progress bar walks
//! one of these scripts, one step per interval. The copy differs by flavor:
//! first scans get the full explanatory tour, rescans a shorter familiar one.

use embody_common::events::ScanFlavor;

/// Step messages for a user's first scan
pub(crate) const FIRST_SCAN_STEPS: &[&str] = &[
    "Warming up the scanner",
    "Reading your photos",
    "Finding your outline",
    "Tracing your silhouette",
    "Locating key landmarks",
    "Mapping your shoulders",
    "Mapping your torso",
    "Measuring arm lengths",
    "Measuring leg proportions",
    "Estimating your height profile",
    "Balancing front and side views",
    "Aligning the two views",
    "Checking symmetry",
    "Studying your posture",
    "Building a rough model",
    "Sculpting the base mesh",
    "Refining body contours",
    "Smoothing surface details",
    "Matching skin tones",
    "Blending color samples",
    "Comparing body archetypes",
    "Selecting the closest match",
    "Tuning limb proportions",
    "Adjusting muscle definition",
    "Polishing the details",
    "Running quality checks",
    "Double-checking measurements",
    "Assembling your avatar",
    "Adding finishing touches",
    "Almost there",
];

/// Step messages for repeat scans
pub(crate) const RESCAN_STEPS: &[&str] = &[
    "Warming up",
    "Reading your new photos",
    "Finding your outline",
    "Spotting what changed",
    "Re-measuring key points",
    "Updating your proportions",
    "Comparing with your last scan",
    "Refreshing your measurements",
    "Checking alignment",
    "Rebalancing the views",
    "Updating your base model",
    "Reshaping contours",
    "Adjusting for changes",
    "Refreshing skin tones",
    "Rematching archetypes",
    "Tuning the updates",
    "Carrying over your tweaks",
    "Merging old and new",
    "Validating the update",
    "Re-running quality checks",
    "Confirming measurements",
    "Updating muscle tone",
    "Refreshing limb masses",
    "Rebuilding fine details",
    "Syncing your profile",
    "Wrapping up the update",
    "Finalizing changes",
    "Putting it all together",
    "Almost done",
    "One last look",
];

/// Hint lines rotated underneath the step messages
pub(crate) const STEP_HINTS: &[&str] = &[
    "This usually takes under a minute",
    "Hold tight",
    "Your photos stay private",
    "Working at full speed",
    "Nearly ready",
];

/// Script for a flavor
pub(crate) fn script(flavor: ScanFlavor) -> &'static [&'static str] {
    match flavor {
        ScanFlavor::FirstScan => FIRST_SCAN_STEPS,
        ScanFlavor::Rescan => RESCAN_STEPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Both scripts are full-length and non-empty per step
    #[test]
    fn test_scripts_are_complete() {
        for flavor in [ScanFlavor::FirstScan, ScanFlavor::Rescan] {
            let steps = script(flavor);
            assert_eq!(steps.len(), 30);
            assert!(steps.iter().all(|s| !s.is_empty()));
        }
        assert!(!STEP_HINTS.is_empty());
    }
}
