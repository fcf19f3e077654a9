//! Pump control via a relay GPIO. The `hw` feature gates the real rppal
//! driver; without it, a mock implementation logs state changes.
//!
//! Actuation is fire-and-forget: the relay gives no completion or failure
//! signal back, so `set_state` has no result type. Known hardware gap.

/// The actuation seam shared by the scheduler and the manual `/pump` route.
pub trait Pump: Send {
    fn set_state(&mut self, on: bool);
}

// ---------------------------------------------------------------------------
// Real GPIO pump (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "hw")]
pub struct GpioPump {
    pin: rppal::gpio::OutputPin,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "hw")]
impl GpioPump {
    pub fn new(pin_num: u8, active_low: bool) -> anyhow::Result<Self> {
        let gpio = rppal::gpio::Gpio::new()?;
        let mut pin = gpio.get(pin_num)?.into_output();

        // Fail-safe: ensure OFF at startup.
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }

        tracing::info!(pin = pin_num, active_low, "pump relay initialised");
        Ok(Self { pin, active_low })
    }
}

#[cfg(feature = "hw")]
impl Pump for GpioPump {
    fn set_state(&mut self, on: bool) {
        if on == self.active_low {
            self.pin.set_low();
        } else {
            self.pin.set_high();
        }
        tracing::info!(state = if on { "ON" } else { "OFF" }, "pump relay set");
    }
}

// ---------------------------------------------------------------------------
// Mock pump (development — no hardware, logs state changes)
// ---------------------------------------------------------------------------

pub struct MockPump {
    pub(crate) on: bool,
    pub(crate) transitions: Vec<bool>,
}

impl MockPump {
    pub fn new() -> Self {
        tracing::info!("[mock-gpio] pump initialised (no hardware)");
        Self {
            on: false,
            transitions: Vec::new(),
        }
    }
}

impl Default for MockPump {
    fn default() -> Self {
        Self::new()
    }
}

impl Pump for MockPump {
    fn set_state(&mut self, on: bool) {
        self.on = on;
        self.transitions.push(on);
        tracing::info!(state = if on { "ON" } else { "OFF" }, "[mock-gpio] pump set");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
