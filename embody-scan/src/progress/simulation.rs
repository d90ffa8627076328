//! Simulated micro-step progression
//!
//! While the pipeline waits on remote stages, a driver task walks the
//! flavor's step script and feeds interpolated progress into the tracker.
//! The driver is deliberately incapable of finishing anything: it caps at a
//! hold point short of the range end and never touches the phase. Real
//! checkpoints take over once the pipeline stops it.

use std::sync::Arc;
use std::time::Duration;

use embody_common::events::ScanFlavor;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::micro_steps::{script, STEP_HINTS};
use super::tracker::ProgressTracker;

/// Timing knobs for the simulated driver
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Wall time per script step
    pub step_interval: Duration,
    /// Sub-tick interval for smooth interpolation within a step
    pub tick_interval: Duration,
    /// Fraction of the range span the driver will cover before holding
    pub hold_fraction: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_interval: Duration::from_secs(2),
            tick_interval: Duration::from_millis(500),
            hold_fraction: 0.95,
        }
    }
}

/// Spawn the driver task for one simulated progression.
///
/// `epoch` ties every update this driver makes to the simulation slot it was
/// started for; the tracker drops updates from replaced drivers.
pub(crate) fn spawn_driver(
    tracker: Arc<ProgressTracker>,
    start: f64,
    end: f64,
    flavor: ScanFlavor,
    config: SimulationConfig,
    token: CancellationToken,
    epoch: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let steps = script(flavor);
        if steps.is_empty() {
            return;
        }

        let span = end - start;
        let hold = start + span * config.hold_fraction;
        let ticks_per_step = (config.step_interval.as_millis()
            / config.tick_interval.as_millis().max(1))
        .max(1) as u32;

        let hint = |i: usize| STEP_HINTS[i % STEP_HINTS.len()];

        // Seed the range start with the opening message right away
        tracker.apply_simulated(epoch, start, steps[0], hint(0)).await;

        let mut value = start;
        'steps: for (i, step_message) in steps.iter().enumerate() {
            let step_target = (start + span * ((i + 1) as f64 / steps.len() as f64)).min(hold);
            for tick in 1..=ticks_per_step {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(scan_id = %tracker.scan_id(), "simulated driver cancelled");
                        break 'steps;
                    }
                    _ = tokio::time::sleep(config.tick_interval) => {}
                }
                let fraction = tick as f64 / ticks_per_step as f64;
                let tick_value = value + (step_target - value) * fraction;
                tracker
                    .apply_simulated(epoch, tick_value, step_message, hint(i))
                    .await;
            }
            value = step_target;
        }

        debug!(
            scan_id = %tracker.scan_id(),
            "simulated driver finished, holding at {:.1}", value
        );
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::StageCheckpoint;
    use embody_common::events::{EventBus, ScanPhase};

    fn tracker() -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::new("scan-sim", EventBus::new(100)))
    }

    /// A [52, 92] progression over the standard script holds at 90 and
    /// never reaches the range end
    #[tokio::test(start_paused = true)]
    async fn test_driver_holds_short_of_range_end() {
        let t = tracker();
        t.set_phase(ScanPhase::Processing).await;
        t.set_progress(52.0, "seed", "").await;
        t.start_simulation(52.0, 92.0, ScanFlavor::FirstScan).await;

        // 30 steps at 2s each; give it plenty of virtual time
        tokio::time::sleep(Duration::from_secs(120)).await;

        let snap = t.snapshot().await;
        assert!(snap.progress < 92.0, "must hold short of the end");
        assert!(
            (snap.progress - 90.0).abs() < 1e-9,
            "holds at start + span * 0.95, got {}",
            snap.progress
        );
        // The driver never completes the phase or deactivates itself
        assert_eq!(snap.phase, ScanPhase::Processing);
        assert!(snap.simulation_active);
    }

    /// Simulated motion is monotonic and carries script messages
    #[tokio::test(start_paused = true)]
    async fn test_driver_walks_monotonically() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let t = Arc::new(ProgressTracker::new("scan-sim", bus));
        t.set_phase(ScanPhase::Processing).await;
        t.start_simulation(55.0, 93.0, ScanFlavor::FirstScan).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        t.stop_simulation().await;

        let mut last = 0.0;
        let mut simulated_updates = 0;
        while let Ok(event) = rx.try_recv() {
            if let embody_common::events::ScanEvent::ScanProgressUpdate {
                progress,
                simulated,
                message,
                ..
            } = event
            {
                assert!(progress >= last, "progress went backward");
                last = progress;
                if simulated {
                    simulated_updates += 1;
                    assert!(!message.is_empty());
                }
            }
        }
        assert!(simulated_updates > 5, "driver should have ticked");
    }

    /// Starting a new simulation replaces the old driver; the replaced one
    /// cannot move progress anymore
    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_driver() {
        let t = tracker();
        t.set_phase(ScanPhase::Processing).await;
        t.start_simulation(55.0, 93.0, ScanFlavor::FirstScan).await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        let mid = t.snapshot().await.progress;

        t.start_simulation(55.0, 93.0, ScanFlavor::Rescan).await;
        tokio::time::sleep(Duration::from_secs(300)).await;

        let snap = t.snapshot().await;
        let hold = 55.0 + (93.0 - 55.0) * 0.95;
        assert!(snap.progress >= mid);
        assert!((snap.progress - hold).abs() < 1e-9);
        assert!(snap.simulation_active);
    }

    /// Real checkpoints are skipped while the simulation is active and work
    /// again after stop_simulation
    #[tokio::test(start_paused = true)]
    async fn test_checkpoints_skipped_until_stopped() {
        let t = tracker();
        t.set_phase(ScanPhase::Processing).await;
        t.apply_checkpoint(StageCheckpoint::Upload).await;
        assert_eq!(t.snapshot().await.progress, 55.0);

        t.start_simulation(55.0, 93.0, ScanFlavor::FirstScan).await;

        // Skipped: simulation owns the bar now
        t.apply_checkpoint(StageCheckpoint::Estimate).await;
        assert_eq!(t.snapshot().await.progress, 55.0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(t.snapshot().await.progress > 55.0);

        t.stop_simulation().await;
        t.apply_checkpoint(StageCheckpoint::Commit).await;
        assert_eq!(t.snapshot().await.progress, 93.0);
        assert!(!t.snapshot().await.simulation_active);

        // stop_simulation is idempotent
        t.stop_simulation().await;
    }

    /// reset() cancels the driver and restores the initial state
    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_driver() {
        let t = tracker();
        t.set_phase(ScanPhase::Processing).await;
        t.start_simulation(55.0, 93.0, ScanFlavor::FirstScan).await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(t.snapshot().await.progress > 0.0);

        t.reset().await;
        let snap = t.snapshot().await;
        assert_eq!(snap.progress, 0.0);
        assert_eq!(snap.phase, ScanPhase::Capture);
        assert!(!snap.simulation_active);

        // Any straggling driver ticks are stale and must not land
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(t.snapshot().await.progress, 0.0);
    }
}
