//! Moisture status bar: ten segments lit in proportion to the reading,
//! coloured by the configured threshold zones. The NeoPixel strip itself
//! lives behind the [`StatusLed`] seam; the default implementation just
//! logs what the bar would show.

use crate::config::Config;

/// Segments on the bar.
pub const NUM_SEGMENTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Red,
    Amber,
    Green,
}

/// Colour zone for a reading given the configured bounds.
pub fn zone(percent: f64, low: f64, medium: f64) -> Zone {
    if percent < low {
        Zone::Red
    } else if percent < medium {
        Zone::Amber
    } else {
        Zone::Green
    }
}

/// Number of segments lit for a reading, rounded to nearest.
pub fn lit_segments(percent: f64) -> usize {
    ((NUM_SEGMENTS as f64 * percent / 100.0).round() as usize).min(NUM_SEGMENTS)
}

pub trait StatusLed: Send {
    fn render(&mut self, percent: f64, config: &Config);
}

/// Logs the would-be bar instead of driving a strip.
pub struct LogLed;

impl StatusLed for LogLed {
    fn render(&mut self, percent: f64, config: &Config) {
        let lit = lit_segments(percent);
        let zone = zone(percent, config.low_threshold, config.medium_threshold);
        tracing::debug!(percent, lit, ?zone, "status bar");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
