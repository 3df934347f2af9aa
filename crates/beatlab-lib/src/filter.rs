//! Zero-phase Butterworth bandpass.
//!
//! Sections come from `sci-rs`'s Butterworth design and are run forward and
//! backward with odd-extension padding so that R-peak timing is not shifted.

use crate::error::{PipelineError, PipelineResult};
use log::debug;
use sci_rs::signal::filter::{
    design::{butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos},
    sosfiltfilt_dyn,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::panic::{self, AssertUnwindSafe};

/// Passband edges and order of the bandpass stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandpassConfig {
    /// Lower cutoff (Hz).
    pub low_hz: f64,
    /// Upper cutoff (Hz).
    pub high_hz: f64,
    /// Butterworth prototype order; the bandpass has twice as many poles.
    pub order: usize,
}

impl Default for BandpassConfig {
    fn default() -> Self {
        Self {
            low_hz: 0.5,
            high_hz: 40.0,
            order: 4,
        }
    }
}

/// Both poles of a biquad strictly inside the unit circle (Jury conditions,
/// denominator normalised by `a[0]`).
pub fn is_stable(section: &Sos<f64>) -> bool {
    let a0 = section.a[0];
    if a0 == 0.0 {
        return false;
    }
    let a1 = section.a[1] / a0;
    let a2 = section.a[2] / a0;
    a2.abs() < 1.0 && a1.abs() < 1.0 + a2
}

fn is_finite(section: &Sos<f64>) -> bool {
    section.b.iter().chain(section.a.iter()).all(|c| c.is_finite())
}

/// `|H(e^jw)|` of one biquad, as (real, imaginary) of numerator and
/// denominator evaluated at `z^-1 = e^-jw`.
fn section_gain(coeffs: &[f64; 3], w: f64) -> f64 {
    let re = coeffs[0] + coeffs[1] * w.cos() + coeffs[2] * (2.0 * w).cos();
    let im = -(coeffs[1] * w.sin() + coeffs[2] * (2.0 * w).sin());
    re.hypot(im)
}

/// Magnitude response of a section cascade at `freq_hz`.
pub fn magnitude_at(sections: &[Sos<f64>], freq_hz: f64, fs: f64) -> f64 {
    let w = 2.0 * PI * freq_hz / fs;
    sections
        .iter()
        .map(|s| section_gain(&s.b, w) / section_gain(&s.a, w))
        .product()
}

fn validate(order: usize, low_hz: f64, high_hz: f64, fs: f64) -> PipelineResult<()> {
    if order == 0 {
        return Err(PipelineError::InvalidFilterParameters(
            "order must be at least 1".into(),
        ));
    }
    if !(fs.is_finite() && fs > 0.0) {
        return Err(PipelineError::InvalidFilterParameters(format!(
            "sampling rate must be positive, got {}",
            fs
        )));
    }
    let nyquist = 0.5 * fs;
    let ordered = low_hz.is_finite() && high_hz.is_finite() && 0.0 < low_hz && low_hz < high_hz;
    if !ordered || high_hz >= nyquist {
        return Err(PipelineError::InvalidFilterParameters(format!(
            "need 0 < low < high < fs/2, got low={} high={} fs/2={}",
            low_hz, high_hz, nyquist
        )));
    }
    Ok(())
}

/// Reject a designed cascade that is empty, non-finite or has a pole on or
/// outside the unit circle.
fn check_sections(sections: &[Sos<f64>]) -> PipelineResult<()> {
    if sections.is_empty() {
        return Err(PipelineError::FilterInstability(
            "design produced no sections".into(),
        ));
    }
    if let Some((i, bad)) = sections
        .iter()
        .enumerate()
        .find(|(_, s)| !is_finite(s) || !is_stable(s))
    {
        return Err(PipelineError::FilterInstability(format!(
            "section {} is unstable or non-finite: b={:?} a={:?}",
            i, bad.b, bad.a
        )));
    }
    Ok(())
}

/// Design a digital Butterworth bandpass as second-order sections.
pub fn butterworth_bandpass(
    order: usize,
    low_hz: f64,
    high_hz: f64,
    fs: f64,
) -> PipelineResult<Vec<Sos<f64>>> {
    validate(order, low_hz, high_hz, fs)?;

    // sci-rs panics instead of returning errors on degenerate designs.
    let designed = panic::catch_unwind(AssertUnwindSafe(|| {
        butter_dyn(
            order,
            vec![low_hz, high_hz],
            Some(FilterBandType::Bandpass),
            Some(false),
            Some(FilterOutputType::Sos),
            Some(fs),
        )
    }));
    let sections = match designed {
        Ok(DigitalFilter::Sos(sos)) => sos.sos,
        Ok(_) => {
            return Err(PipelineError::FilterInstability(
                "design did not return second-order sections".into(),
            ))
        }
        Err(_) => {
            return Err(PipelineError::FilterInstability(format!(
                "butterworth design failed for order {} {}-{} Hz @ {} Hz",
                order, low_hz, high_hz, fs
            )))
        }
    };
    check_sections(&sections)?;
    debug!(
        "butterworth bandpass order={} {}-{} Hz @ {} Hz -> {} sections",
        order,
        low_hz,
        high_hz,
        fs,
        sections.len()
    );
    Ok(sections)
}

/// Samples consumed on each side by the odd-extension padding.
pub fn edge_padding(sections: usize) -> usize {
    3 * (2 * sections + 1)
}

/// Run a section cascade forward and backward over `signal`.
pub fn filtfilt(signal: &[f64], sections: &[Sos<f64>]) -> PipelineResult<Vec<f64>> {
    let padlen = edge_padding(sections.len());
    if signal.len() <= padlen {
        return Err(PipelineError::FilterInstability(format!(
            "signal has {} samples, needs more than {} for edge padding",
            signal.len(),
            padlen
        )));
    }
    if let Some(pos) = signal.iter().position(|x| !x.is_finite()) {
        return Err(PipelineError::FilterInstability(format!(
            "non-finite input sample at {}",
            pos
        )));
    }
    let out: Vec<f64> = sosfiltfilt_dyn(signal.iter(), sections);
    if out.len() != signal.len() {
        return Err(PipelineError::FilterInstability(format!(
            "filter returned {} samples for {} inputs",
            out.len(),
            signal.len()
        )));
    }
    if let Some(pos) = out.iter().position(|x| !x.is_finite()) {
        return Err(PipelineError::FilterInstability(format!(
            "non-finite output sample at {}",
            pos
        )));
    }
    Ok(out)
}

/// Zero-phase Butterworth bandpass of `signal`; output has the same length.
pub fn bandpass(
    signal: &[f64],
    low_hz: f64,
    high_hz: f64,
    fs: f64,
    order: usize,
) -> PipelineResult<Vec<f64>> {
    let sections = butterworth_bandpass(order, low_hz, high_hz, fs)?;
    filtfilt(signal, &sections)
}

/// [`bandpass`] driven by a [`BandpassConfig`].
pub fn bandpass_with_config(
    signal: &[f64],
    fs: f64,
    cfg: &BandpassConfig,
) -> PipelineResult<Vec<f64>> {
    bandpass(signal, cfg.low_hz, cfg.high_hz, fs, cfg.order)
}
