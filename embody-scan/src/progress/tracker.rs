//! Monotonic progress state for one scan session

use chrono::{DateTime, Utc};
use embody_common::events::{EventBus, ScanEvent, ScanPhase};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checkpoints::{capture_checkpoint, phase_floor, phase_messages, StageCheckpoint};
use super::simulation::{self, SimulationConfig};
use crate::models::PhotoView;

/// Audio pulse band width: one chime per 4 points of progress
const CHIME_BAND_WIDTH: f64 = 4.0;

/// History ring buffer capacity
pub const PROGRESS_HISTORY_CAP: usize = 64;

/// One accepted progress update, kept in the history ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub progress: f64,
    pub phase: ScanPhase,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of the tracker, served by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub scan_id: String,
    pub phase: ScanPhase,
    /// Overall progress in [0, 100], monotonic for the scan attempt
    pub progress: f64,
    pub message: String,
    pub sub_message: String,
    pub simulation_active: bool,
    pub updated_at: DateTime<Utc>,
}

struct SimulationHandle {
    token: CancellationToken,
    epoch: u64,
}

struct TrackerState {
    phase: ScanPhase,
    progress: f64,
    message: String,
    sub_message: String,
    /// Last chime band emitted, floor(progress / 4)
    last_band: u32,
    history: VecDeque<ProgressRecord>,
    simulation: Option<SimulationHandle>,
    /// Bumped on every simulation start; stale drivers are ignored
    sim_epoch: u64,
    updated_at: DateTime<Utc>,
}

impl TrackerState {
    fn fresh() -> Self {
        let (message, sub_message) = phase_messages(ScanPhase::Capture);
        Self {
            phase: ScanPhase::Capture,
            progress: 0.0,
            message: message.to_string(),
            sub_message: sub_message.to_string(),
            last_band: 0,
            history: VecDeque::new(),
            simulation: None,
            sim_epoch: 0,
            updated_at: Utc::now(),
        }
    }

    /// True when the state is indistinguishable from a just-constructed one
    fn is_fresh(&self) -> bool {
        self.phase == ScanPhase::Capture
            && self.progress == 0.0
            && self.history.is_empty()
            && self.simulation.is_none()
    }
}

/// Progress state machine for one scan session.
///
/// Progress only ever moves forward (the sole exception is `reset`), phases
/// advance along the fixed sequence, and every accepted update lands on the
/// event bus. Safe to share via `Arc` between the pipeline, the simulated
/// driver task and API handlers.
pub struct ProgressTracker {
    scan_id: String,
    events: EventBus,
    sim_config: SimulationConfig,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(scan_id: impl Into<String>, events: EventBus) -> Self {
        Self::with_config(scan_id, events, SimulationConfig::default())
    }

    /// Constructor with explicit simulation timing, used by tests
    pub fn with_config(
        scan_id: impl Into<String>,
        events: EventBus,
        sim_config: SimulationConfig,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            events,
            sim_config,
            state: Mutex::new(TrackerState::fresh()),
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Current state as one consistent view
    pub async fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().await;
        ProgressSnapshot {
            scan_id: self.scan_id.clone(),
            phase: state.phase,
            progress: state.progress,
            message: state.message.clone(),
            sub_message: state.sub_message.clone(),
            simulation_active: state.simulation.is_some(),
            updated_at: state.updated_at,
        }
    }

    /// Copy of the history ring, oldest first
    pub async fn history(&self) -> Vec<ProgressRecord> {
        let state = self.state.lock().await;
        state.history.iter().cloned().collect()
    }

    pub async fn simulation_active(&self) -> bool {
        let state = self.state.lock().await;
        state.simulation.is_some()
    }

    /// Direct progress update with explicit copy.
    ///
    /// Clamped to [0, 100] and floored at the current value (monotonic).
    /// Non-finite values are rejected.
    pub async fn set_progress(&self, value: f64, message: &str, sub_message: &str) {
        let events = {
            let mut state = self.state.lock().await;
            Self::apply_locked(&self.scan_id, &mut state, value, message, sub_message, false)
        };
        self.emit_all(events);
    }

    /// Forward-only phase transition.
    ///
    /// Applies the phase's progress floor and default copy. Backward or
    /// terminal-escaping requests are ignored.
    pub async fn set_phase(&self, phase: ScanPhase) {
        let events = {
            let mut state = self.state.lock().await;
            if state.phase == phase {
                return;
            }
            if state.phase.is_terminal() {
                warn!(
                    scan_id = %self.scan_id,
                    "ignoring phase transition {} -> {} from terminal state",
                    state.phase, phase
                );
                return;
            }
            if phase != ScanPhase::Failed && phase.rank() <= state.phase.rank() {
                debug!(
                    scan_id = %self.scan_id,
                    "ignoring backward phase transition {} -> {}",
                    state.phase, phase
                );
                return;
            }

            let old_phase = state.phase;
            state.phase = phase;
            state.updated_at = Utc::now();

            let (message, sub_message) = phase_messages(phase);
            let target = phase_floor(phase).unwrap_or(state.progress);
            let mut events =
                Self::apply_locked(&self.scan_id, &mut state, target, message, sub_message, false);
            events.insert(
                0,
                ScanEvent::ScanPhaseChanged {
                    scan_id: self.scan_id.clone(),
                    old_phase,
                    new_phase: phase,
                    progress: state.progress,
                    timestamp: Utc::now(),
                },
            );
            events
        };
        info!(scan_id = %self.scan_id, "phase -> {}", phase);
        self.emit_all(events);
    }

    /// Apply a real pipeline checkpoint.
    ///
    /// Skipped entirely while the simulated driver is active; the pipeline
    /// stops the simulation before publishing checkpoints it wants seen.
    pub async fn apply_checkpoint(&self, checkpoint: StageCheckpoint) {
        let events = {
            let mut state = self.state.lock().await;
            if state.simulation.is_some() {
                debug!(
                    scan_id = %self.scan_id,
                    "checkpoint {} skipped, simulation active",
                    checkpoint.as_str()
                );
                return;
            }
            let (message, sub_message) = checkpoint.messages();
            Self::apply_locked(
                &self.scan_id,
                &mut state,
                checkpoint.target(),
                message,
                sub_message,
                false,
            )
        };
        self.emit_all(events);
    }

    /// Capture-phase checkpoint (front 25, profile 50)
    pub async fn apply_capture(&self, view: PhotoView) {
        let events = {
            let mut state = self.state.lock().await;
            if state.simulation.is_some() {
                debug!(scan_id = %self.scan_id, "capture checkpoint skipped, simulation active");
                return;
            }
            let (target, message, sub_message) = capture_checkpoint(view);
            Self::apply_locked(&self.scan_id, &mut state, target, message, sub_message, false)
        };
        self.emit_all(events);
    }

    /// Start the simulated micro-step progression over `[start, end]`.
    ///
    /// Cancels any driver already running; real checkpoints are skipped
    /// until `stop_simulation`. The driver holds short of `end` and never
    /// advances the phase.
    pub async fn start_simulation(
        self: &Arc<Self>,
        start: f64,
        end: f64,
        flavor: embody_common::events::ScanFlavor,
    ) {
        if !start.is_finite() || !end.is_finite() || end <= start {
            warn!(
                scan_id = %self.scan_id,
                "rejecting simulated range [{}, {}]", start, end
            );
            return;
        }
        let start = start.clamp(0.0, 100.0);
        let end = end.clamp(0.0, 100.0);

        let (token, epoch) = {
            let mut state = self.state.lock().await;
            if state.phase.is_terminal() {
                warn!(scan_id = %self.scan_id, "not starting simulation in terminal phase");
                return;
            }
            if let Some(previous) = state.simulation.take() {
                previous.token.cancel();
                debug!(scan_id = %self.scan_id, "cancelled previous simulated driver");
            }
            state.sim_epoch += 1;
            let epoch = state.sim_epoch;
            let token = CancellationToken::new();
            state.simulation = Some(SimulationHandle {
                token: token.clone(),
                epoch,
            });
            (token, epoch)
        };

        info!(
            scan_id = %self.scan_id,
            "simulated progression started over [{}, {}]", start, end
        );
        simulation::spawn_driver(
            Arc::clone(self),
            start,
            end,
            flavor,
            self.sim_config.clone(),
            token,
            epoch,
        );
    }

    /// Stop the simulated driver, if one is running. Idempotent.
    pub async fn stop_simulation(&self) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.simulation.take() {
            handle.token.cancel();
            debug!(scan_id = %self.scan_id, "simulated progression stopped");
        }
    }

    /// Progress update from the simulated driver. Ignored when the epoch is
    /// stale (a newer driver replaced this one) or simulation was stopped.
    pub(crate) async fn apply_simulated(
        &self,
        epoch: u64,
        value: f64,
        message: &str,
        sub_message: &str,
    ) {
        let events = {
            let mut state = self.state.lock().await;
            match &state.simulation {
                Some(handle) if handle.epoch == epoch => {}
                _ => return,
            }
            Self::apply_locked(&self.scan_id, &mut state, value, message, sub_message, true)
        };
        self.emit_all(events);
    }

    /// Transition to Failed from any non-terminal phase.
    ///
    /// Progress freezes where it is; the error becomes the sub-message.
    pub async fn fail(&self, error: &str) {
        let events = {
            let mut state = self.state.lock().await;
            if state.phase.is_terminal() {
                warn!(scan_id = %self.scan_id, "fail() ignored in terminal phase");
                return;
            }
            if let Some(handle) = state.simulation.take() {
                handle.token.cancel();
            }
            let old_phase = state.phase;
            state.phase = ScanPhase::Failed;
            let (message, _) = phase_messages(ScanPhase::Failed);
            state.message = message.to_string();
            state.sub_message = error.to_string();
            state.updated_at = Utc::now();
            let record = ProgressRecord {
                progress: state.progress,
                phase: state.phase,
                message: state.message.clone(),
                at: state.updated_at,
            };
            state.history.push_back(record);
            if state.history.len() > PROGRESS_HISTORY_CAP {
                state.history.pop_front();
            }
            vec![ScanEvent::ScanPhaseChanged {
                scan_id: self.scan_id.clone(),
                old_phase,
                new_phase: ScanPhase::Failed,
                progress: state.progress,
                timestamp: state.updated_at,
            }]
        };
        self.emit_all(events);
    }

    /// Return to the initial capture state. Idempotent: resetting a fresh
    /// tracker changes nothing and emits nothing.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if state.is_fresh() {
            debug!(scan_id = %self.scan_id, "reset of fresh tracker is a no-op");
            return;
        }
        if let Some(handle) = state.simulation.take() {
            handle.token.cancel();
        }
        let sim_epoch = state.sim_epoch;
        *state = TrackerState::fresh();
        // Epoch keeps counting up so drivers from before the reset stay stale
        state.sim_epoch = sim_epoch;
        info!(scan_id = %self.scan_id, "progress tracker reset");
    }

    /// Core update rule. Caller holds the state lock; returned events are
    /// emitted after the lock is released.
    fn apply_locked(
        scan_id: &str,
        state: &mut TrackerState,
        value: f64,
        message: &str,
        sub_message: &str,
        simulated: bool,
    ) -> Vec<ScanEvent> {
        if !value.is_finite() {
            warn!(scan_id = %scan_id, "rejecting non-finite progress value");
            return Vec::new();
        }

        let next = value.clamp(0.0, 100.0).max(state.progress);
        let moved = next > state.progress;
        let copy_changed = message != state.message || sub_message != state.sub_message;
        if !moved && !copy_changed {
            return Vec::new();
        }

        state.progress = next;
        state.message = message.to_string();
        state.sub_message = sub_message.to_string();
        state.updated_at = Utc::now();

        state.history.push_back(ProgressRecord {
            progress: state.progress,
            phase: state.phase,
            message: state.message.clone(),
            at: state.updated_at,
        });
        if state.history.len() > PROGRESS_HISTORY_CAP {
            state.history.pop_front();
        }

        let mut events = vec![ScanEvent::ScanProgressUpdate {
            scan_id: scan_id.to_string(),
            phase: state.phase,
            progress: state.progress,
            message: state.message.clone(),
            sub_message: state.sub_message.clone(),
            simulated,
            timestamp: state.updated_at,
        }];

        // One chime per 4-point band crossing, even when a jump crosses
        // several bands at once
        let band = (state.progress / CHIME_BAND_WIDTH).floor() as u32;
        if band > state.last_band {
            state.last_band = band;
            events.push(ScanEvent::ProgressChime {
                scan_id: scan_id.to_string(),
                band,
                progress: state.progress,
                timestamp: state.updated_at,
            });
        }

        events
    }

    fn emit_all(&self, events: Vec<ScanEvent>) {
        for event in events {
            self.events.emit_lossy(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
