//! Single-flight claim per scan session
//!
//! At most one pipeline run may be in flight for a given scan_id. The claim
//! is an RAII guard: dropping it (normal return, error return, panic unwind)
//! releases the session.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process registry of scan sessions with a running pipeline
pub struct ScanRegistry {
    active: Mutex<HashSet<String>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Atomically claim a session for one pipeline run.
    ///
    /// Returns `None` when a run is already in flight for this scan_id.
    pub fn claim(self: &Arc<Self>, scan_id: &str) -> Option<SessionGuard> {
        let mut active = lock_active(&self.active);
        if !active.insert(scan_id.to_string()) {
            return None;
        }
        Some(SessionGuard {
            registry: Arc::clone(self),
            scan_id: scan_id.to_string(),
        })
    }

    /// Whether a pipeline run currently holds this session
    pub fn is_running(&self, scan_id: &str) -> bool {
        lock_active(&self.active).contains(scan_id)
    }
}

impl Default for ScanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A panicked holder may leave the mutex poisoned; the set itself is still
/// consistent (String insert/remove cannot be observed mid-write).
fn lock_active(active: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// RAII claim on one scan session, released on drop
pub struct SessionGuard {
    registry: Arc<ScanRegistry>,
    scan_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        lock_active(&self.registry.active).remove(&self.scan_id);
    }
}

// ============================================================================
// Tests
// ============================================================================
