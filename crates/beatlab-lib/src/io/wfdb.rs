use crate::{
    error::{PipelineError, PipelineResult},
    io::RecordSource,
    signal::{Events, TimeSeries},
};
use anyhow::{Context, Result};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Simple WFDB annotation entry.
#[derive(Debug, Clone)]
pub struct WfdbAnnotation {
    pub sample: usize,
    pub code: u8,
}

impl WfdbAnnotation {
    pub fn is_beat(&self) -> bool {
        self.code > 0 && self.code < 59
    }
}

/// Load the specified signal (lead) from a WFDB header/data pair into a
/// TimeSeries, in physical units.
pub fn load_wfdb_lead(header_path: &Path, lead: usize) -> Result<TimeSeries> {
    // wfdb-rust panics on missing or malformed data files.
    let parsed = panic::catch_unwind(AssertUnwindSafe(|| wfdb_rust::parse_wfdb(header_path)));
    let (header, signals) = match parsed {
        Ok(parsed) => parsed,
        Err(_) => anyhow::bail!("failed to parse WFDB record {}", header_path.display()),
    };
    if lead >= signals.len() || lead >= header.signal_specs.len() {
        anyhow::bail!(
            "WFDB record contains {} signals, but lead {} was requested",
            signals.len(),
            lead
        );
    }
    let spec = &header.signal_specs[lead];
    let raw = &signals[lead];
    let gain = spec.adc_gain.unwrap_or(1.0) as f64;
    let baseline = spec.baseline.or(spec.adc_zero).unwrap_or(0) as f64;
    let fs = header
        .record
        .sampling_frequency
        .map(|f| f as f64)
        .unwrap_or(250.0);
    if gain == 0.0 {
        anyhow::bail!("WFDB lead {} has zero ADC gain", lead);
    }
    let data = raw
        .iter()
        .map(|&sample| (sample as f64 - baseline) / gain)
        .collect();
    Ok(TimeSeries { fs, data })
}

/// Parse MIT annotation binary stream into samples & codes.
pub fn parse_wfdb_annotations(buf: &[u8]) -> Vec<WfdbAnnotation> {
    let mut out = Vec::new();
    let mut idx = 0;
    let mut sample: usize = 0;
    while idx + 2 <= buf.len() {
        let word = u16::from_le_bytes([buf[idx], buf[idx + 1]]);
        idx += 2;
        let code = (word >> 10) as u8;
        let diff = (word & 0x03FF) as usize;
        if code == 0 && diff == 0 {
            break;
        }
        match code {
            59 => {
                if idx + 4 > buf.len() {
                    break;
                }
                let high = u16::from_le_bytes([buf[idx], buf[idx + 1]]) as u32;
                let low = u16::from_le_bytes([buf[idx + 2], buf[idx + 3]]) as u32;
                idx += 4;
                let skip = (high << 16) | low;
                sample = sample.wrapping_add(skip as usize);
            }
            60..=62 => {
                // NUM/SUB/CHN carry no sample of their own
                sample = sample.wrapping_add(diff);
            }
            63 => {
                idx += diff;
                if diff % 2 != 0 && idx < buf.len() {
                    idx += 1;
                }
            }
            _ => {
                sample = sample.wrapping_add(diff);
                out.push(WfdbAnnotation { sample, code });
            }
        }
    }
    out
}

/// Read WFDB annotation file (ATR) and convert to beat events.
pub fn load_wfdb_events(path: &Path) -> Result<Events> {
    let buf = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let beat_samples: Vec<usize> = parse_wfdb_annotations(&buf)
        .into_iter()
        .filter(WfdbAnnotation::is_beat)
        .map(|ann| ann.sample)
        .collect();
    Ok(Events::from_indices(beat_samples))
}

/// Directory of WFDB records addressed by record name (`<dir>/<id>.hea`).
#[derive(Debug, Clone)]
pub struct WfdbDirectory {
    dir: PathBuf,
    lead: usize,
}

impl WfdbDirectory {
    pub fn new(dir: impl Into<PathBuf>, lead: usize) -> Self {
        Self {
            dir: dir.into(),
            lead,
        }
    }

    pub fn header_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.hea", id))
    }
}

impl RecordSource for WfdbDirectory {
    fn load(&self, id: &str) -> PipelineResult<TimeSeries> {
        let header = self.header_for(id);
        if !header.is_file() {
            return Err(PipelineError::RecordNotFound(header.display().to_string()));
        }
        let ts = load_wfdb_lead(&header, self.lead)
            .map_err(|e| PipelineError::RecordUnreadable(format!("{:#}", e)))?;
        if !(ts.fs.is_finite() && ts.fs > 0.0) {
            return Err(PipelineError::RecordUnreadable(format!(
                "{} declares sampling rate {}",
                header.display(),
                ts.fs
            )));
        }
        Ok(ts)
    }
}
