//! Haar energy spectrum over a per-window series.

use serde::Serialize;
use std::f64::consts::SQRT_2;

/// Energy of one octave.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectrumBand {
    /// Seconds spanned by one input of this octave.
    pub scale: f64,
    /// Counts down from `octaves - 1` at the finest scale to 0 at the coarsest.
    pub band: u32,
    /// `log2` of the mean squared detail coefficient.
    pub detail: f64,
    /// `log2` of the mean squared approximation coefficient.
    pub approximation: f64,
}

/// Decompose `series` octave by octave.
///
/// Only the first `2^floor(log2(len))` values are used; fewer than two values
/// give an empty spectrum.
pub fn haar_spectrum(series: &[f64], t_sample: f64) -> Vec<SpectrumBand> {
    if series.len() < 2 {
        return Vec::new();
    }
    let octaves = series.len().ilog2();
    let mut coarse: Vec<f64> = series[..1 << octaves].to_vec();
    let mut bands = Vec::with_capacity(octaves as usize);
    let mut scale = t_sample;

    for octave in 0..octaves {
        let mut detail_energy = 0.0;
        let mut approx_energy = 0.0;
        let next: Vec<f64> = coarse
            .chunks_exact(2)
            .map(|pair| {
                let approx = (pair[0] + pair[1]) / SQRT_2;
                let detail = (pair[0] - pair[1]) / SQRT_2;
                detail_energy += detail * detail;
                approx_energy += approx * approx;
                approx
            })
            .collect();
        let n = next.len() as f64;
        bands.push(SpectrumBand {
            scale,
            band: octaves - 1 - octave,
            detail: (detail_energy / n).log2(),
            approximation: (approx_energy / n).log2(),
        });
        coarse = next;
        scale *= 2.0;
    }
    bands
}
