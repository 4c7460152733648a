use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use uuid::Uuid;

/// Identifier of one upload unit (one network operation)
pub type UnitId = Uuid;

/// Heartbeat ceiling, in hundredths
const SIMULATED_CEILING_STEPS: u8 = 80;

/// Progress reported while the transport cannot say how much it expects to send
pub const UNKNOWN_LENGTH_PROGRESS: f64 = 0.5;

/// Progress of a single upload unit.
///
/// `reported` is whatever either source wrote last. The heartbeat counts in
/// hundredths so that repeated increments land exactly on the 0.8 ceiling.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressState {
    simulated_steps: u8,
    pub real: Option<f64>,
    pub reported: f64,
}

impl ProgressState {
    pub fn simulated(&self) -> f64 {
        f64::from(self.simulated_steps) / 100.0
    }

    fn heartbeat(&mut self) {
        if self.simulated_steps < SIMULATED_CEILING_STEPS {
            self.simulated_steps += 1;
            self.reported = self.simulated();
        }
    }

    fn telemetry(&mut self, bytes_written: u64, bytes_expected: u64) {
        let ratio = if bytes_expected > 0 {
            (bytes_written as f64 / bytes_expected as f64).clamp(0.0, 1.0)
        } else {
            UNKNOWN_LENGTH_PROGRESS
        };
        self.real = Some(ratio);
        self.reported = ratio;
    }
}

struct TrackerInner {
    states: Mutex<HashMap<UnitId, ProgressState>>,
    heartbeats: Mutex<HashMap<UnitId, JoinHandle<()>>>,
    interval: Duration,
}

/// Per-unit progress shared between the orchestrator, heartbeat tasks and
/// transport telemetry callbacks
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                states: Mutex::new(HashMap::new()),
                heartbeats: Mutex::new(HashMap::new()),
                interval: heartbeat_interval,
            }),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn register(&self, unit_id: UnitId) {
        self.update(unit_id, "register", |states| {
            states.insert(unit_id, ProgressState::default());
        });
    }

    /// Heartbeat: advance the simulated value and report it
    pub fn tick(&self, unit_id: UnitId) -> Option<f64> {
        self.update(unit_id, "heartbeat tick", |states| {
            states.get_mut(&unit_id).map(|state| {
                state.heartbeat();
                state.reported
            })
        })
        .flatten()
    }

    /// Real transfer telemetry from the transport
    pub fn observe(&self, unit_id: UnitId, bytes_written: u64, bytes_expected: u64) -> Option<f64> {
        self.update(unit_id, "telemetry", |states| {
            states.get_mut(&unit_id).map(|state| {
                state.telemetry(bytes_written, bytes_expected);
                state.reported
            })
        })
        .flatten()
    }

    /// Force the unit to 100% on the happy path
    pub fn complete(&self, unit_id: UnitId) {
        self.update(unit_id, "complete", |states| {
            if let Some(state) = states.get_mut(&unit_id) {
                state.reported = 1.0;
            }
        });
    }

    pub fn reported(&self, unit_id: UnitId) -> Option<f64> {
        self.state(unit_id).map(|state| state.reported)
    }

    pub fn state(&self, unit_id: UnitId) -> Option<ProgressState> {
        match self.inner.states.lock() {
            Ok(states) => states.get(&unit_id).cloned(),
            Err(e) => {
                log::error!("Failed to read progress for unit {} (non-critical): {}", unit_id, e);
                None
            }
        }
    }

    pub fn snapshot(&self) -> HashMap<UnitId, ProgressState> {
        self.inner
            .states
            .lock()
            .map(|states| states.clone())
            .unwrap_or_default()
    }

    pub fn discard(&self, unit_id: UnitId) {
        self.update(unit_id, "discard", |states| {
            states.remove(&unit_id);
        });
    }

    /// Start the heartbeat for a unit. A unit has at most one heartbeat; a
    /// previous one for the same id is stopped first.
    pub fn start_heartbeat(&self, unit_id: UnitId) -> HeartbeatGuard {
        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        let period = self.inner.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        ProgressTracker { inner }.tick(unit_id);
                    }
                    None => break,
                }
            }
        });

        match self.inner.heartbeats.lock() {
            Ok(mut heartbeats) => {
                if let Some(previous) = heartbeats.insert(unit_id, handle) {
                    log::warn!("Replacing existing heartbeat for unit {}", unit_id);
                    previous.abort();
                }
            }
            Err(e) => {
                log::error!("Failed to register heartbeat for unit {}: {}", unit_id, e);
                handle.abort();
            }
        }

        HeartbeatGuard {
            tracker: self.clone(),
            unit_id,
            cleared: false,
        }
    }

    /// Stop a unit's heartbeat. Returns `false` when there was nothing to stop.
    pub fn clear_heartbeat(&self, unit_id: UnitId) -> bool {
        let handle = match self.inner.heartbeats.lock() {
            Ok(mut heartbeats) => heartbeats.remove(&unit_id),
            Err(e) => {
                log::error!("Failed to clear heartbeat for unit {}: {}", unit_id, e);
                None
            }
        };

        match handle {
            Some(handle) => {
                handle.abort();
                log::debug!("Cleared heartbeat for unit {}", unit_id);
                true
            }
            None => false,
        }
    }

    pub fn active_heartbeats(&self) -> usize {
        self.inner
            .heartbeats
            .lock()
            .map(|heartbeats| heartbeats.len())
            .unwrap_or(0)
    }

    /// Teardown: stop every heartbeat and forget all progress
    pub fn clear_all(&self) {
        let handles: Vec<JoinHandle<()>> = match self.inner.heartbeats.lock() {
            Ok(mut heartbeats) => heartbeats.drain().map(|(_, handle)| handle).collect(),
            Err(e) => {
                log::error!("Failed to clear heartbeats on teardown: {}", e);
                Vec::new()
            }
        };
        for handle in &handles {
            handle.abort();
        }
        if let Ok(mut states) = self.inner.states.lock() {
            states.clear();
        }
        log::debug!("Progress tracker cleared ({} heartbeats stopped)", handles.len());
    }

    fn update<F, R>(&self, unit_id: UnitId, operation: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut HashMap<UnitId, ProgressState>) -> R,
    {
        match self.inner.states.lock() {
            Ok(mut states) => Some(f(&mut states)),
            Err(e) => {
                log::error!(
                    "Failed to acquire progress lock for {} on unit {} (non-critical): {}",
                    operation,
                    unit_id,
                    e
                );
                None
            }
        }
    }
}

/// Owns a unit's heartbeat until it is cleared. Clearing is idempotent and
/// also happens on drop, so every exit path of an upload stops the timer.
pub struct HeartbeatGuard {
    tracker: ProgressTracker,
    unit_id: UnitId,
    cleared: bool,
}

impl HeartbeatGuard {
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn clear(&mut self) {
        if !self.cleared {
            self.cleared = true;
            self.tracker.clear_heartbeat(self.unit_id);
        }
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.clear();
    }
}
