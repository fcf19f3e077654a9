//! Measurement scheduler: decides on a fixed tick whether a measurement
//! cycle is due (per the configured mode), then runs it: read the probe,
//! record the sample, report it, and water if the soil is too dry.
//!
//! The tick loop is one task; the web server runs beside it. Everything
//! they both touch lives in the shared state store, and the pump sits
//! behind its own mutex so a watering run never holds the state lock.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, Mode};
use crate::led::StatusLed;
use crate::notify::RemoteApi;
use crate::pump::Pump;
use crate::sensor::MoistureSensor;
use crate::state::{MoistureSample, SharedState};

/// How often the decision function is evaluated.
pub const TICK_INTERVAL_SEC: u64 = 5;

/// Cycle period in test mode.
const TEST_PERIOD_SEC: i64 = 10;

/// Daily mode re-arm guard: without it a cycle would fire on every tick
/// of the matching minute.
const DAILY_REARM_SEC: i64 = 60;

// ---------------------------------------------------------------------------
// Pump actuation primitive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpTrigger {
    /// Scheduler-initiated; subject to the cooldown guard.
    Auto,
    /// Operator-initiated via `POST /pump`; bypasses the cooldown.
    Manual,
}

/// Record and run one pump activation. Returns false when an auto trigger
/// is suppressed by the cooldown. The pump mutex is held across the
/// duration wait so overlapping activations serialize; the state lock is
/// released before the wait so readers are never stuck behind it.
pub async fn activate_pump<P: Pump>(
    trigger: PumpTrigger,
    shared: &SharedState,
    pump: &Mutex<P>,
    api: Option<&RemoteApi>,
) -> bool {
    let now = now_unix();
    let (permitted, duration, name) = {
        let mut st = shared.write().await;
        let permitted = match trigger {
            PumpTrigger::Manual => {
                st.record_pump_run(now);
                true
            }
            PumpTrigger::Auto => st.try_start_pump(now),
        };
        (permitted, st.config().pump_duration, st.config().name.clone())
    };

    if !permitted {
        debug!("auto pump trigger suppressed by cooldown");
        return false;
    }

    info!(?trigger, duration, "activating pump");
    {
        let mut pump = pump.lock().await;
        pump.set_state(true);
        tokio::time::sleep(Duration::from_secs(duration)).await;
        pump.set_state(false);
    }

    if let Some(api) = api {
        api.post_pump(&name).await;
    }
    true
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler<S, P, L> {
    shared: SharedState,
    sensor: S,
    pump: Arc<Mutex<P>>,
    led: L,
    api: Option<RemoteApi>,
    last_cycle: Option<i64>,
}

impl<S, P, L> Scheduler<S, P, L>
where
    S: MoistureSensor,
    P: Pump,
    L: StatusLed,
{
    pub fn new(
        shared: SharedState,
        sensor: S,
        pump: Arc<Mutex<P>>,
        led: L,
        api: Option<RemoteApi>,
    ) -> Self {
        Self {
            shared,
            sensor,
            pump,
            led,
            api,
            last_cycle: None,
        }
    }

    /// Run the tick loop forever. Intended to be the main task.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SEC));
        info!(tick_sec = TICK_INTERVAL_SEC, "scheduler started");
        loop {
            ticker.tick().await;
            self.tick(now_unix()).await;
        }
    }

    /// Evaluate the decision for `now` and run a measurement cycle if due.
    /// The cycle completes before this returns, so a long pump run cannot
    /// be re-entered by the next tick.
    pub async fn tick(&mut self, now: i64) {
        let due = {
            let st = self.shared.read().await;
            self.cycle_due(now, st.config())
        };
        if due {
            self.run_cycle(now).await;
        }
    }

    fn cycle_due(&self, now: i64, config: &Config) -> bool {
        let elapsed = match self.last_cycle {
            Some(t) => now - t,
            None => i64::MAX, // never ran, so any period has elapsed
        };

        match config.mode {
            Mode::Test => elapsed >= TEST_PERIOD_SEC,
            Mode::Interval => elapsed >= (config.interval_hours * 3600.0) as i64,
            Mode::Daily => {
                let hhmm = local_hhmm(now, config.utc_offset_hours);
                config.daily_times.iter().any(|t| *t == hhmm) && elapsed >= DAILY_REARM_SEC
            }
        }
    }

    /// One measurement cycle: read → record → report → maybe water.
    /// A failed probe read aborts before any state changes, so the next
    /// matching tick retries.
    async fn run_cycle(&mut self, now: i64) {
        let config = { self.shared.read().await.snapshot().config };

        let reading = match self.sensor.read(config.min_voltage, config.max_voltage) {
            Ok(r) => r,
            Err(e) => {
                warn!("measurement cycle aborted: {e}");
                return;
            }
        };
        info!(
            percent = reading.percent,
            voltage = reading.voltage,
            "moisture measured"
        );

        {
            let mut st = self.shared.write().await;
            st.push_sample(MoistureSample {
                percent: reading.percent,
                voltage: reading.voltage,
                ts: now,
            });
        }

        self.led.render(reading.percent, &config);

        if let Some(api) = &self.api {
            api.post_measurement(&config.name, reading.percent, reading.voltage)
                .await;
        }

        if reading.percent < config.moisture_threshold {
            activate_pump(
                PumpTrigger::Auto,
                &self.shared,
                &self.pump,
                self.api.as_ref(),
            )
            .await;
        }

        self.last_cycle = Some(now);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Zero-padded `HH:MM` for `now` shifted by the configured fixed offset.
/// Compared exact-string against `daily_times`.
fn local_hhmm(now: i64, utc_offset_hours: i8) -> String {
    let shifted = now + i64::from(utc_offset_hours) * 3600;
    match OffsetDateTime::from_unix_timestamp(shifted) {
        Ok(t) => format!("{:02}:{:02}", t.hour(), t.minute()),
        Err(_) => String::new(), // out-of-range timestamp matches no schedule
    }
}

// ===========================================================================
// Tests
// ===========================================================================
