//! Adaptive input probe sizing.
//!
//! Some sources need a larger analysis window before ffmpeg can identify
//! codec parameters; symptoms are probe-shortfall exits at startup. The
//! sizer keeps a per-camera override that doubles on each shortfall and
//! expires after ten minutes, so a one-off glitch does not tax every
//! later stream with extra startup latency. A camera that keeps hitting
//! the shortfall earns a permanent override instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Conservative default analysis window.
pub const DEFAULT_PROBE_SIZE: u64 = 32 * 1024;
/// Hard ceiling for the override.
pub const MAX_PROBE_SIZE: u64 = 5 * 1024 * 1024;
/// How long a non-permanent override lives.
const OVERRIDE_TTL: Duration = Duration::from_secs(600);
/// Consecutive shortfalls after which the override stops expiring.
const PERMANENT_AFTER: u32 = 10;

struct ProbeState {
    override_size: Option<u64>,
    /// Consecutive shortfall count; reset when an override expires.
    occurrences: u32,
}

/// Per-camera probe-size state.
pub struct ProbeSizer {
    state: Mutex<ProbeState>,
    /// Invalidates stale expiry tasks after a newer bump.
    generation: AtomicU64,
}

impl ProbeSizer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProbeState {
                override_size: None,
                occurrences: 0,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// The probe size to use for the next spawn.
    pub fn current(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.override_size.unwrap_or(DEFAULT_PROBE_SIZE)
    }

    /// Record a probe shortfall and raise the override.
    ///
    /// Doubles the active size up to [`MAX_PROBE_SIZE`] and schedules the
    /// override to lapse, unless this camera has hit the shortfall often
    /// enough that the override is made permanent. Returns the new size.
    pub fn bump(self: &Arc<Self>, camera_id: &str) -> u64 {
        let (new_size, occurrences, generation) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let active = state.override_size.unwrap_or(DEFAULT_PROBE_SIZE);
            let new_size = (active * 2).min(MAX_PROBE_SIZE);
            state.override_size = Some(new_size);
            state.occurrences += 1;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            (new_size, state.occurrences, generation)
        };

        if occurrences >= PERMANENT_AFTER {
            tracing::warn!(
                camera_id = %camera_id,
                probe_size = new_size,
                occurrences = occurrences,
                "Probe size override made permanent"
            );
            return new_size;
        }

        tracing::info!(
            camera_id = %camera_id,
            probe_size = new_size,
            ttl_secs = OVERRIDE_TTL.as_secs(),
            "Probe size increased after shortfall"
        );

        let sizer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(OVERRIDE_TTL).await;
            // A later bump supersedes this expiry.
            if sizer.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let mut state = sizer.state.lock().unwrap_or_else(|e| e.into_inner());
            state.override_size = None;
            state.occurrences = 0;
        });

        new_size
    }
}

impl Default for ProbeSizer {
    fn default() -> Self {
        Self::new()
    }
}
