use serde::{Deserialize, Serialize};

use crate::cascade::LevelSummary;
use crate::sampler::{Sample, StreamInfo};
use crate::wavelet::SpectrumBand;

/// One line of `json` output.
///
/// - `Stream` opens a stream
/// - `Sample` for each emitted window
/// - `Level`  for each cascade level once input is exhausted
/// - `Band`   for each octave of a wavelet spectrum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Record {
    Stream { index: usize, sample_frequency: f64, t_sample: f64, measure: String },
    Sample { stream: usize, index: u64, time: f64, value: f64 },
    Level { level: usize, resolution: f64, moments: Vec<Option<f64>>, samples: u64 },
    Band { scale: f64, band: u32, detail: Option<f64>, approximation: Option<f64> },
}

/// JSON has no NaN or infinities; those become `null`.
fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl From<&StreamInfo> for Record {
    fn from(info: &StreamInfo) -> Self {
        Record::Stream {
            index: info.index,
            sample_frequency: info.sample_frequency,
            t_sample: info.t_sample,
            measure: info.measure.key().to_string(),
        }
    }
}

impl Record {
    pub fn sample(stream: usize, sample: &Sample) -> Self {
        Record::Sample { stream, index: sample.index, time: sample.time, value: sample.value }
    }
}

impl From<&LevelSummary> for Record {
    fn from(level: &LevelSummary) -> Self {
        Record::Level {
            level: level.level,
            resolution: level.resolution,
            moments: level.moments.iter().copied().map(finite).collect(),
            samples: level.samples,
        }
    }
}

impl From<&SpectrumBand> for Record {
    fn from(band: &SpectrumBand) -> Self {
        Record::Band {
            scale: band.scale,
            band: band.band,
            detail: finite(band.detail),
            approximation: finite(band.approximation),
        }
    }
}
