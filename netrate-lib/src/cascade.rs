//! Multi-resolution cascade of moment accumulators.
//!
//! Level 0 sees every window value. Each time a level has seen another
//! `timescale` values it hands their mean to the next level, which is created
//! on first use. Level `n` therefore summarises blocks of `timescale^n`
//! windows.

use serde::Serialize;

use crate::config::CascadeConfig;
use crate::error::ConfigError;
use crate::precise::Real;

/// One resolution level.
#[derive(Debug, Clone)]
struct Bin {
    /// `sums[i]` is the running sum of `value^(i+1)`.
    sums: Vec<Real>,
    /// Running sum of the values themselves, kept even when no moments are
    /// requested so block means can still be formed.
    total: Real,
    /// `total` at the last block boundary.
    previous: Real,
    count: u64,
}

impl Bin {
    fn new(moments: usize) -> Self {
        Self {
            sums: vec![Real::ZERO; moments],
            total: Real::ZERO,
            previous: Real::ZERO,
            count: 0,
        }
    }

    /// Returns the block mean when this value completes a block.
    fn feed(&mut self, value: Real, timescale: u32) -> Option<Real> {
        let mut power = value;
        for sum in self.sums.iter_mut() {
            *sum += power;
            power = power * value;
        }
        self.total += value;
        self.count += 1;

        if self.count % u64::from(timescale) == 0 {
            let mean = (self.total - self.previous) / Real::from(timescale);
            self.previous = self.total;
            Some(mean)
        } else {
            None
        }
    }
}

/// Summary of one level, produced after the data has been consumed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub level: usize,
    /// Seconds covered by one input of this level.
    pub resolution: f64,
    /// `moments[i]` is the mean of `value^(i+1)`; `NaN` while `samples == 0`.
    pub moments: Vec<f64>,
    pub samples: u64,
}

/// Everything a presenter needs to render a finished cascade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeReport {
    pub timescale: u32,
    pub moments: usize,
    pub sample_frequency: f64,
    pub t_sample: f64,
    pub levels: Vec<LevelSummary>,
}

#[derive(Debug, Clone)]
pub struct Cascade {
    timescale: u32,
    moments: usize,
    levels: Vec<Bin>,
}

impl Cascade {
    pub fn new(timescale: u32, moments: usize) -> Result<Self, ConfigError> {
        if timescale < 2 {
            return Err(ConfigError::InvalidTimescale);
        }
        Ok(Self {
            timescale,
            moments,
            levels: vec![Bin::new(moments)],
        })
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn moments(&self) -> usize {
        self.moments
    }

    /// Number of levels grown so far, at least one.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn feed(&mut self, value: f64) {
        let mut carry = Some(Real::from_f64(value));
        let mut level = 0;
        while let Some(value) = carry {
            if level == self.levels.len() {
                self.levels.push(Bin::new(self.moments));
            }
            carry = self.levels[level].feed(value, self.timescale);
            level += 1;
        }
    }

    /// Per-level statistics from the finest level outward.
    pub fn summary(&self, t_sample: f64) -> Vec<LevelSummary> {
        let mut resolution = t_sample;
        self.levels
            .iter()
            .enumerate()
            .map(|(level, bin)| {
                let count = Real::from_u64(bin.count);
                let moments = bin
                    .sums
                    .iter()
                    .map(|&sum| {
                        if bin.count == 0 {
                            f64::NAN
                        } else {
                            (sum / count).to_f64()
                        }
                    })
                    .collect();
                let summary = LevelSummary {
                    level,
                    resolution,
                    moments,
                    samples: bin.count,
                };
                resolution *= f64::from(self.timescale);
                summary
            })
            .collect()
    }

    pub fn report(&self, sample_frequency: f64, t_sample: f64) -> CascadeReport {
        CascadeReport {
            timescale: self.timescale,
            moments: self.moments,
            sample_frequency,
            t_sample,
            levels: self.summary(t_sample),
        }
    }
}

impl TryFrom<CascadeConfig> for Cascade {
    type Error = ConfigError;

    fn try_from(config: CascadeConfig) -> Result<Self, Self::Error> {
        Cascade::new(config.timescale, config.moments)
    }
}
