pub mod features;
pub mod text;
pub mod wfdb;

use crate::{
    error::{PipelineError, PipelineResult},
    signal::TimeSeries,
};
use std::collections::HashMap;

/// Supplies one raw recording per identifier.
pub trait RecordSource {
    /// Load a record. Fails with `RecordNotFound` or `RecordUnreadable` only.
    fn load(&self, id: &str) -> PipelineResult<TimeSeries>;
}

impl<S: RecordSource + ?Sized> RecordSource for &S {
    fn load(&self, id: &str) -> PipelineResult<TimeSeries> {
        (**self).load(id)
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn load(&self, id: &str) -> PipelineResult<TimeSeries> {
        (**self).load(id)
    }
}

/// Records held in memory, keyed by identifier. Entries may also hold a
/// preset failure, which is returned as-is on load.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    records: HashMap<String, PipelineResult<TimeSeries>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, ts: TimeSeries) {
        self.records.insert(id.into(), Ok(ts));
    }

    /// Register an identifier that fails to load as `RecordUnreadable`.
    pub fn insert_unreadable(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.records
            .insert(id.into(), Err(PipelineError::RecordUnreadable(reason.into())));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSource for MemorySource {
    fn load(&self, id: &str) -> PipelineResult<TimeSeries> {
        match self.records.get(id) {
            Some(entry) => entry.clone(),
            None => Err(PipelineError::RecordNotFound(id.to_string())),
        }
    }
}

/// Parse a record selection such as `100,101,108-112` into identifiers, in
/// the given order. Ranges are inclusive.
pub fn parse_record_ids(selection: &str) -> anyhow::Result<Vec<String>> {
    let mut ids = Vec::new();
    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u64 = start
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid range start in '{}'", part))?;
                let end: u64 = end
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid range end in '{}'", part))?;
                if end < start {
                    anyhow::bail!("range '{}' is descending", part);
                }
                ids.extend((start..=end).map(|n| n.to_string()));
            }
            None => ids.push(part.to_string()),
        }
    }
    if ids.is_empty() {
        anyhow::bail!("no record identifiers in '{}'", selection);
    }
    Ok(ids)
}
