//! Soil moisture sensing: calibration math, the sensor seam, and the two
//! backends (fastrand simulator for development, ADS1115 over I2C for the
//! real probe).

use thiserror::Error;

#[derive(Debug, Error)]
#[error("sensor read failed: {0}")]
pub struct SensorError(pub String);

/// One converted probe reading.
#[derive(Debug, Clone, Copy)]
pub struct MoistureReading {
    /// 0.0..=100.0, one decimal.
    pub percent: f64,
    pub voltage: f64,
}

/// The scheduler's view of the probe. Synchronous and fallible; a failed
/// read aborts the current cycle and is retried on the next matching tick.
pub trait MoistureSensor: Send {
    fn read(&mut self, min_voltage: f64, max_voltage: f64) -> Result<MoistureReading, SensorError>;
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Convert a probe voltage to a moisture percentage using the configured
/// wet/dry endpoints. Higher voltage means drier soil. Clamped so
/// out-of-range readings don't produce nonsensical values, rounded to one
/// decimal.
pub fn percent_from_voltage(voltage: f64, min_voltage: f64, max_voltage: f64) -> f64 {
    let range = max_voltage - min_voltage;
    if range <= 0.0 {
        return 0.0; // degenerate calibration — avoid div-by-zero
    }
    let percent = (100.0 * (max_voltage - voltage) / range).clamp(0.0, 100.0);
    (percent * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Simulated probe (development — no hardware)
// ---------------------------------------------------------------------------

/// Random-walk probe voltage with mean reversion and a slow drying drift,
/// so the dashboard moves like a real plant instead of white noise.
#[cfg(feature = "sim")]
pub struct SimSensor {
    voltage: f64,
}

#[cfg(feature = "sim")]
impl SimSensor {
    const DRIFT_PER_READ: f64 = 0.004; // toward dry
    const WALK_SIGMA: f64 = 0.02;
    const MEAN_REVERSION: f64 = 0.01;
    const CENTER: f64 = 1.5;

    pub fn new() -> Self {
        tracing::info!("simulated moisture probe (no hardware)");
        Self { voltage: Self::CENTER }
    }
}

#[cfg(feature = "sim")]
impl Default for SimSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "sim")]
impl MoistureSensor for SimSensor {
    fn read(&mut self, min_voltage: f64, max_voltage: f64) -> Result<MoistureReading, SensorError> {
        let walk = (fastrand::f64() - 0.5) * 2.0 * Self::WALK_SIGMA;
        let pull = Self::MEAN_REVERSION * (Self::CENTER - self.voltage);
        self.voltage = (self.voltage + Self::DRIFT_PER_READ + walk + pull).clamp(0.0, 3.3);

        let voltage = (self.voltage * 100.0).round() / 100.0;
        Ok(MoistureReading {
            percent: percent_from_voltage(voltage, min_voltage, max_voltage),
            voltage,
        })
    }
}

// ---------------------------------------------------------------------------
// ADS1115 probe (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "hw")]
mod ads1115 {
    use super::{percent_from_voltage, MoistureReading, MoistureSensor, SensorError};
    use rppal::i2c::I2c;
    use std::time::Duration;

    /// Conversion result register (read-only, 16-bit signed).
    const REG_CONVERSION: u8 = 0x00;
    /// Configuration register (read/write).
    const REG_CONFIG: u8 = 0x01;

    /// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
    /// DR=100 (128 SPS), comparator disabled. MUX for the channel is
    /// OR-ed in at bits [14:12].
    const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;
    const MUX_SHIFT: u8 = 12;
    const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

    /// Full-scale voltage at PGA ±4.096 V over the 15-bit positive range.
    const VOLTS_PER_COUNT: f64 = 4.096 / 32767.0;

    /// Conversion time at 128 SPS is ~7.8 ms; wait 9 ms for margin.
    const CONVERSION_WAIT: Duration = Duration::from_millis(9);

    pub struct Ads1115Sensor {
        i2c: I2c,
        channel: usize,
    }

    impl Ads1115Sensor {
        /// Open I2C bus 1 for an ADS1115 at `addr`, reading the given
        /// single-ended channel (0–3).
        pub fn new(addr: u16, channel: usize) -> anyhow::Result<Self> {
            anyhow::ensure!(channel <= 3, "ADS1115 channel {channel} out of range (0–3)");
            let mut i2c = I2c::new()?;
            i2c.set_slave_address(addr)?;
            tracing::info!(
                addr = format_args!("0x{addr:02x}"),
                channel,
                "ads1115 initialised"
            );
            Ok(Self { i2c, channel })
        }

        fn read_raw(&mut self) -> Result<i16, SensorError> {
            let config = CONFIG_BASE | (MUX_SINGLE_ENDED[self.channel] << MUX_SHIFT);
            self.i2c
                .block_write(REG_CONFIG, &config.to_be_bytes())
                .map_err(|e| SensorError(format!("i2c config write: {e}")))?;

            std::thread::sleep(CONVERSION_WAIT);

            let mut buf = [0u8; 2];
            self.i2c
                .block_read(REG_CONVERSION, &mut buf)
                .map_err(|e| SensorError(format!("i2c conversion read: {e}")))?;
            Ok(i16::from_be_bytes(buf))
        }
    }

    impl MoistureSensor for Ads1115Sensor {
        fn read(
            &mut self,
            min_voltage: f64,
            max_voltage: f64,
        ) -> Result<MoistureReading, SensorError> {
            // Single-ended reads are non-negative; bus corruption can
            // still produce garbage, so clamp.
            let raw = self.read_raw()?.max(0);
            let voltage = ((raw as f64 * VOLTS_PER_COUNT) * 100.0).round() / 100.0;
            Ok(MoistureReading {
                percent: percent_from_voltage(voltage, min_voltage, max_voltage),
                voltage,
            })
        }
    }
}

#[cfg(feature = "hw")]
pub use ads1115::Ads1115Sensor;

// ===========================================================================
// Tests
// ===========================================================================
