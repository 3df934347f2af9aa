use crate::{
    error::{PipelineError, PipelineResult},
    io::RecordSource,
    signal::TimeSeries,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Parse newline-delimited floating point series, ignoring blank/comment lines.
pub fn parse_f64_series(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {} is not f64: {}", idx + 1, trimmed))?;
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no numeric samples found");
    }
    Ok(out)
}

/// Read a newline-delimited floating point series from disk.
pub fn read_f64_series(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_f64_series(&text)
}

/// Render samples one per line, the inverse of [`parse_f64_series`].
pub fn format_f64_series(data: &[f64]) -> String {
    let mut out = String::with_capacity(data.len() * 12);
    for value in data {
        out.push_str(&value.to_string());
        out.push('\n');
    }
    out
}

/// Parse newline-delimited sample indices (usize) into an Events-friendly list.
pub fn parse_event_indices(text: &str) -> Result<Vec<usize>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: usize = trimmed
            .parse()
            .with_context(|| format!("line {} is not an integer index: {}", idx + 1, trimmed))?;
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no annotation indices found");
    }
    Ok(out)
}

/// Read event indices from a file.
pub fn read_event_indices(path: &Path) -> Result<Vec<usize>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_event_indices(&text)
}

/// Directory of `<id>.txt` sample files sharing one sampling rate.
#[derive(Debug, Clone)]
pub struct TextDirectory {
    dir: PathBuf,
    fs: f64,
}

impl TextDirectory {
    pub fn new(dir: impl Into<PathBuf>, fs: f64) -> Self {
        Self {
            dir: dir.into(),
            fs,
        }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", id))
    }
}

impl RecordSource for TextDirectory {
    fn load(&self, id: &str) -> PipelineResult<TimeSeries> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Err(PipelineError::RecordNotFound(path.display().to_string()));
        }
        let data = read_f64_series(&path)
            .map_err(|e| PipelineError::RecordUnreadable(format!("{:#}", e)))?;
        Ok(TimeSeries { fs: self.fs, data })
    }
}
