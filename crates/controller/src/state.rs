use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{Config, ConfigError, ConfigPatch, Mode};

/// Entries retained in each history ring buffer.
pub const HISTORY_CAPACITY: usize = 10;

/// Minimum seconds between automatically triggered pump runs.
pub const PUMP_COOLDOWN_SEC: i64 = 3600;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<DeviceState>>;

/// Wrap a fresh `DeviceState` for sharing between tasks.
pub fn shared(config: Config) -> SharedState {
    Arc::new(RwLock::new(DeviceState::new(config)))
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// One soil moisture measurement. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct MoistureSample {
    pub percent: f64,
    pub voltage: f64,
    pub ts: i64,
}

/// One pump activation. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct PumpRun {
    pub started_at: i64,
}

/// Everything both tasks read and write: live config, bounded histories,
/// and the pump cooldown guard. All access goes through the `SharedState`
/// lock; mutations complete under a single write guard so readers never
/// observe a half-applied patch or a torn ring-buffer append.
pub struct DeviceState {
    config: Config,
    history: VecDeque<MoistureSample>,
    pump_history: VecDeque<PumpRun>,
    last_pump: Option<i64>,
}

/// A consistent point-in-time copy of the whole store, taken under one
/// read guard.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub config: Config,
    pub history: Vec<MoistureSample>,
    pub pump_history: Vec<PumpRun>,
    pub last_pump: Option<i64>,
}

// ---------------------------------------------------------------------------
// JSON response (what `GET /data` returns)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub history: Vec<MoistureSample>,
    pub pump_history: Vec<PumpRun>,
    pub last_pump: Option<i64>,
    pub mode: Mode,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl DeviceState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            pump_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            last_pump: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Record a measurement, evicting the oldest once at capacity.
    pub fn push_sample(&mut self, sample: MoistureSample) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    /// Most recent measurement, if any cycle has completed yet.
    pub fn latest_sample(&self) -> Option<&MoistureSample> {
        self.history.back()
    }

    /// Record a pump run unconditionally and re-arm the cooldown guard.
    /// The manual `/pump` route calls this directly: the operator override
    /// deliberately skips the auto-trigger cooldown.
    pub fn record_pump_run(&mut self, now: i64) {
        if self.pump_history.len() >= HISTORY_CAPACITY {
            self.pump_history.pop_front();
        }
        self.pump_history.push_back(PumpRun { started_at: now });
        self.last_pump = Some(now);
    }

    /// Auto-trigger guard: refuse when the last run was under
    /// [`PUMP_COOLDOWN_SEC`] ago, otherwise record the run and permit it.
    /// Check and record happen under one write guard, so two concurrent
    /// triggers cannot both pass.
    pub fn try_start_pump(&mut self, now: i64) -> bool {
        if let Some(last) = self.last_pump {
            if now - last < PUMP_COOLDOWN_SEC {
                return false;
            }
        }
        self.record_pump_run(now);
        true
    }

    pub fn last_pump(&self) -> Option<i64> {
        self.last_pump
    }

    /// Merge a patch into a candidate config and validate it. The live
    /// config is swapped only on success; a rejected patch leaves the
    /// store untouched. Returns the new config so the caller can persist
    /// it outside the lock (best-effort, not atomic with this update).
    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<Config, ConfigError> {
        let mut candidate = self.config.clone();
        patch.apply(&mut candidate);
        candidate.validate()?;
        self.config = candidate.clone();
        Ok(candidate)
    }

    /// Copy everything at once. Callers hold only the read guard, which a
    /// pump run never blocks (actuation waits happen outside this lock).
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            config: self.config.clone(),
            history: self.history.iter().cloned().collect(),
            pump_history: self.pump_history.iter().cloned().collect(),
            last_pump: self.last_pump,
        }
    }

    /// Build the JSON-serialisable status snapshot: the subset of
    /// [`snapshot`](Self::snapshot) that `GET /data` exposes.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            history: self.history.iter().cloned().collect(),
            pump_history: self.pump_history.iter().cloned().collect(),
            last_pump: self.last_pump,
            mode: self.config.mode,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
