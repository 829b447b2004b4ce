//! Run configuration and the lenient parsers behind the command line.
//!
//! Bad values never abort a run: the `*_or_default` helpers log what was
//! wrong and keep the documented default.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layer::{Level, DEFAULT_MARKER_PORT};
use crate::precise::Real;

pub const DEFAULT_SAMPLE_FREQUENCY: f64 = 1.0;
pub const DEFAULT_LINK_CAPACITY: u64 = 100_000_000;
pub const DEFAULT_TIMESCALE: u32 = 10;
pub const DEFAULT_MOMENTS: usize = 3;

/// Settings for one [`Sampler`](crate::sampler::Sampler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Windows per second.
    pub sample_frequency: f64,
    /// Bits per second used to derive each packet's transfer time.
    pub link_capacity: u64,
    pub level: Level,
    /// Stop a stream after this many packets have been read.
    pub max_packets: Option<u64>,
    /// Report window starts relative to the reference packet.
    pub relative_time: bool,
    /// Report times in window units, `time * sample_frequency`.
    pub time_in_windows: bool,
    /// Emit windows whose value is zero.
    pub show_zero: bool,
    /// Skip leading marker packets before latching the reference time.
    pub ignore_marker: bool,
    pub marker_port: u16,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_frequency: DEFAULT_SAMPLE_FREQUENCY,
            link_capacity: DEFAULT_LINK_CAPACITY,
            level: Level::Link,
            max_packets: None,
            relative_time: false,
            time_in_windows: false,
            show_zero: false,
            ignore_marker: false,
            marker_port: DEFAULT_MARKER_PORT,
        }
    }
}

impl SamplerConfig {
    /// Window length `1 / sample_frequency` in extended precision.
    pub fn t_sample(&self) -> Real {
        Real::ONE / Real::from_f64(self.sample_frequency)
    }
}

/// Shape of the multi-resolution cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeConfig {
    pub timescale: u32,
    pub moments: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            timescale: DEFAULT_TIMESCALE,
            moments: DEFAULT_MOMENTS,
        }
    }
}

impl CascadeConfig {
    /// Command-line shape: a timescale below 2 is reported and replaced.
    pub fn lenient(timescale: i64, moments: usize) -> Self {
        Self { timescale: timescale_or_default(timescale), moments }
    }
}

fn prefix_multiplier(prefix: char) -> Option<f64> {
    match prefix.to_ascii_lowercase() {
        'k' => Some(1e3),
        'm' => Some(1e6),
        'g' => Some(1e9),
        _ => None,
    }
}

/// Parse `"100"`, `"2.5k"`, `"100M"`, `"1g"`.
///
/// On an unknown prefix the error carries the prefix; [`parse_prefixed_lenient`]
/// reports it and continues with multiplier 1.
pub fn parse_prefixed(input: &str) -> Result<f64, ConfigError> {
    let input = input.trim();
    let (number, multiplier) = match input.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let multiplier = prefix_multiplier(c).ok_or(ConfigError::UnknownPrefix(c))?;
            (&input[..input.len() - 1], multiplier)
        }
        _ => (input, 1.0),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::InvalidNumber(input.to_string()))?;
    Ok(value * multiplier)
}

/// Like [`parse_prefixed`] but an unknown prefix is reported and ignored.
pub fn parse_prefixed_lenient(input: &str, what: &str) -> Result<f64, ConfigError> {
    match parse_prefixed(input) {
        Err(ConfigError::UnknownPrefix(c)) => {
            warn!("unknown prefix '{c}' for {what}, ignored");
            let trimmed = input.trim();
            parse_prefixed(&trimmed[..trimmed.len() - c.len_utf8()])
        }
        other => other,
    }
}

fn positive(value: f64) -> Result<f64, ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::NotPositive(value))
    }
}

/// Sampling frequency in Hz; falls back to 1 Hz.
pub fn sample_frequency_or_default(input: &str) -> f64 {
    match parse_prefixed_lenient(input, "sample frequency").and_then(positive) {
        Ok(hz) => hz,
        Err(e) => {
            warn!("sample frequency \"{input}\": {e}, using {DEFAULT_SAMPLE_FREQUENCY} Hz");
            DEFAULT_SAMPLE_FREQUENCY
        }
    }
}

/// Link capacity in bits per second; falls back to 100 Mbit/s.
pub fn link_capacity_or_default(input: &str) -> u64 {
    match parse_prefixed_lenient(input, "link capacity").and_then(positive) {
        Ok(bps) if bps.round() >= 1.0 => bps.round() as u64,
        Ok(bps) => {
            warn!("link capacity \"{input}\": {bps} bps rounds to 0, using {DEFAULT_LINK_CAPACITY} bps");
            DEFAULT_LINK_CAPACITY
        }
        Err(e) => {
            warn!("link capacity \"{input}\": {e}, using {DEFAULT_LINK_CAPACITY} bps");
            DEFAULT_LINK_CAPACITY
        }
    }
}

/// Extraction level; falls back to `link`.
pub fn level_or_default(input: &str) -> Level {
    input.parse().unwrap_or_else(|e| {
        warn!("{e}, defaulting to \"link\"");
        Level::Link
    })
}

/// Cascade branching factor; anything below 2 falls back to the default.
pub fn timescale_or_default(timescale: i64) -> u32 {
    match u32::try_from(timescale) {
        Ok(timescale) if timescale >= 2 => timescale,
        _ => {
            warn!("{}, got {timescale}, using {DEFAULT_TIMESCALE}", ConfigError::InvalidTimescale);
            DEFAULT_TIMESCALE
        }
    }
}
