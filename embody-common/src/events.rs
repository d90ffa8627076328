//! Event types for the Embody event system
//!
//! Provides shared event definitions and the EventBus used by the scan
//! service to fan progress and lifecycle updates out to observers (SSE
//! clients, the persistence layer, tests).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Macro phase of a scan session, as surfaced to the user experience.
///
/// Phases advance strictly forward: Capture → Processing → Celebration →
/// AvatarReady → Complete. Failed is reachable from any non-terminal phase.
/// Complete and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Collecting the two photos (front + profile)
    Capture,
    /// Pipeline stages running against the analysis service
    Processing,
    /// Results are in, short celebratory beat before the reveal
    Celebration,
    /// Avatar parameters persisted, 3D model loading
    AvatarReady,
    /// Scan finished successfully
    Complete,
    /// Scan failed
    Failed,
}

impl ScanPhase {
    /// Position in the forward-only phase sequence
    pub fn rank(&self) -> u8 {
        match self {
            ScanPhase::Capture => 0,
            ScanPhase::Processing => 1,
            ScanPhase::Celebration => 2,
            ScanPhase::AvatarReady => 3,
            ScanPhase::Complete => 4,
            ScanPhase::Failed => 5,
        }
    }

    /// Terminal phases accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanPhase::Complete | ScanPhase::Failed)
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanPhase::Capture => "capture",
            ScanPhase::Processing => "processing",
            ScanPhase::Celebration => "celebration",
            ScanPhase::AvatarReady => "avatar_ready",
            ScanPhase::Complete => "complete",
            ScanPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Which micro-step script the simulated progression plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanFlavor {
    /// User's first scan: longer, more explanatory step messages
    FirstScan,
    /// Repeat scan: shorter, familiar step messages
    Rescan,
}

impl ScanFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanFlavor::FirstScan => "first_scan",
            ScanFlavor::Rescan => "rescan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first_scan" => Some(ScanFlavor::FirstScan),
            "rescan" => Some(ScanFlavor::Rescan),
            _ => None,
        }
    }
}

/// Embody scan event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// All events carry the client-assigned scan identifier and a UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// A scan session entered the pipeline
    ///
    /// Triggers:
    /// - SSE: Switch UI into processing view
    /// - Scan record: Row inserted with status "processing"
    ScanSessionStarted {
        /// Client-assigned scan identifier
        scan_id: String,
        /// Owning user
        user_id: Uuid,
        /// Micro-step script selection
        flavor: ScanFlavor,
        /// When the session started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Macro phase advanced (forward-only)
    ///
    /// Triggers:
    /// - SSE: Swap the phase-specific UI treatment
    ScanPhaseChanged {
        scan_id: String,
        /// Phase before the transition
        old_phase: ScanPhase,
        /// Phase after the transition
        new_phase: ScanPhase,
        /// Overall progress after any phase floor was applied
        progress: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Overall progress moved (monotonic, 0-100)
    ///
    /// Emitted for every accepted progress update, simulated or real.
    ///
    /// Triggers:
    /// - SSE: Update progress bar and status copy
    ScanProgressUpdate {
        scan_id: String,
        phase: ScanPhase,
        /// Overall progress in [0, 100]
        progress: f64,
        /// Headline status message
        message: String,
        /// Secondary hint line
        sub_message: String,
        /// True when produced by the simulated driver
        simulated: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Audio-feedback pulse: fired once per 4-point progress band crossing
    ///
    /// Triggers:
    /// - SSE: Client plays the progress chime
    ProgressChime {
        scan_id: String,
        /// Band index, floor(progress / 4)
        band: u32,
        /// Progress value that crossed into the band
        progress: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline stage entry telemetry
    StageStarted {
        scan_id: String,
        /// Stage name: upload, estimate, semantic, match, refine, commit
        stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline stage exit telemetry
    StageCompleted {
        scan_id: String,
        stage: String,
        /// Wall-clock stage duration
        elapsed_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline stage failed
    ///
    /// `recovered` is true when the pipeline substituted a fallback and
    /// continued (only the refine stage does this).
    StageFailed {
        scan_id: String,
        stage: String,
        error: String,
        /// True when the pipeline continued via fallback
        recovered: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Scan session finished successfully
    ///
    /// Triggers:
    /// - SSE: Reveal the avatar
    ScanCompleted {
        scan_id: String,
        /// Server-assigned scan identifier from the commit receipt
        server_scan_id: String,
        /// True when refine results were replaced by fallback parameters
        fallback_used: bool,
        /// End-to-end pipeline duration
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Scan session failed
    ///
    /// Triggers:
    /// - SSE: Show the retry affordance
    /// - Scan record: Row updated with status "failed"
    ScanFailed {
        scan_id: String,
        /// Stage that failed, when the failure is stage-scoped
        stage: Option<String>,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Persistence read-back verification found a mismatch
    ///
    /// The write is NOT rolled back; this event exists so the anomaly is
    /// observable beyond the log stream.
    PersistenceAnomaly {
        scan_id: String,
        /// Which storage location mismatched: "profile_prefs" or "scans"
        location: String,
        detail: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ScanEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ScanEvent::ScanSessionStarted { .. } => "ScanSessionStarted",
            ScanEvent::ScanPhaseChanged { .. } => "ScanPhaseChanged",
            ScanEvent::ScanProgressUpdate { .. } => "ScanProgressUpdate",
            ScanEvent::ProgressChime { .. } => "ProgressChime",
            ScanEvent::StageStarted { .. } => "StageStarted",
            ScanEvent::StageCompleted { .. } => "StageCompleted",
            ScanEvent::StageFailed { .. } => "StageFailed",
            ScanEvent::ScanCompleted { .. } => "ScanCompleted",
            ScanEvent::ScanFailed { .. } => "ScanFailed",
            ScanEvent::PersistenceAnomaly { .. } => "PersistenceAnomaly",
        }
    }

    /// Scan identifier carried by every event
    pub fn scan_id(&self) -> &str {
        match self {
            ScanEvent::ScanSessionStarted { scan_id, .. } => scan_id,
            ScanEvent::ScanPhaseChanged { scan_id, .. } => scan_id,
            ScanEvent::ScanProgressUpdate { scan_id, .. } => scan_id,
            ScanEvent::ProgressChime { scan_id, .. } => scan_id,
            ScanEvent::StageStarted { scan_id, .. } => scan_id,
            ScanEvent::StageCompleted { scan_id, .. } => scan_id,
            ScanEvent::StageFailed { scan_id, .. } => scan_id,
            ScanEvent::ScanCompleted { scan_id, .. } => scan_id,
            ScanEvent::ScanFailed { scan_id, .. } => scan_id,
            ScanEvent::PersistenceAnomaly { scan_id, .. } => scan_id,
        }
    }
}

/// Broadcast bus for scan events
///
/// Wraps a `tokio::sync::broadcast` channel. Slow subscribers that fall more
/// than `capacity` events behind lose the oldest events (broadcast lag), they
/// are never blocked on.
///
/// # Examples
///
/// ```
/// use embody_common::events::{EventBus, ScanEvent, ScanPhase};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ScanEvent::ProgressChime {
///     scan_id: "scan-1".to_string(),
///     band: 14,
///     progress: 56.0,
///     timestamp: chrono::Utc::now(),
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// The scan service uses 100; tests typically use 10.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening. Use for events a component
    /// must not silently lose.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScanEvent,
    ) -> Result<usize, broadcast::error::SendError<ScanEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Progress updates and chimes are emitted this way: it is acceptable
    /// for no one to be watching.
    pub fn emit_lossy(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Tests
// ============================================================================
