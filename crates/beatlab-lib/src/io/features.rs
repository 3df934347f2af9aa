//! Feature-table output.

use crate::{
    classify::Label,
    error::SinkError,
    metrics::rate::{FeatureVector, FEATURE_COLUMNS},
};
use csv::{Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Column name of the record identifier (first column).
pub const RECORD_COLUMN: &str = "Record";
/// Column name of the numeric label (last column).
pub const LABEL_COLUMN: &str = "Label";

/// Full header: identifier, the eight features, label.
pub fn header() -> Vec<&'static str> {
    let mut cols = Vec::with_capacity(FEATURE_COLUMNS.len() + 2);
    cols.push(RECORD_COLUMN);
    cols.extend(FEATURE_COLUMNS);
    cols.push(LABEL_COLUMN);
    cols
}

/// Accepts one row per successfully processed record.
pub trait FeatureSink {
    fn write(&mut self, id: &str, features: &FeatureVector, label: Label) -> Result<(), SinkError>;

    /// Flush anything buffered. Called once, after the last row.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// CSV feature table with a stable column order.
pub struct CsvFeatureSink<W: Write> {
    writer: Writer<W>,
    rows: usize,
}

impl CsvFeatureSink<File> {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|source| SinkError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_writer(file, true)
    }

    /// Append to `path`; the header is written only when the file is new or
    /// empty.
    pub fn append(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let empty = file.metadata()?.len() == 0;
        Self::from_writer(file, empty)
    }
}

impl<W: Write> CsvFeatureSink<W> {
    pub fn from_writer(inner: W, write_header: bool) -> Result<Self, SinkError> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(inner);
        if write_header {
            writer.write_record(header())?;
        }
        Ok(Self { writer, rows: 0 })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> FeatureSink for CsvFeatureSink<W> {
    fn write(&mut self, id: &str, features: &FeatureVector, label: Label) -> Result<(), SinkError> {
        let mut record = Vec::with_capacity(FEATURE_COLUMNS.len() + 2);
        record.push(id.to_string());
        record.extend(features.to_array().iter().map(|v| v.to_string()));
        record.push(label.code().to_string());
        self.writer.write_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Rows kept in memory, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub rows: Vec<(String, FeatureVector, Label)>,
}

impl FeatureSink for MemorySink {
    fn write(&mut self, id: &str, features: &FeatureVector, label: Label) -> Result<(), SinkError> {
        self.rows.push((id.to_string(), *features, label));
        Ok(())
    }
}

impl<S: FeatureSink + ?Sized> FeatureSink for &mut S {
    fn write(&mut self, id: &str, features: &FeatureVector, label: Label) -> Result<(), SinkError> {
        (**self).write(id, features, label)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn features(mean_bpm: f64) -> FeatureVector {
        FeatureVector {
            mean_rr: 60.0 / mean_bpm,
            std_rr: 0.0,
            min_rr: 60.0 / mean_bpm,
            max_rr: 60.0 / mean_bpm,
            mean_bpm,
            std_bpm: 0.0,
            min_bpm: mean_bpm,
            max_bpm: mean_bpm,
        }
    }

    #[test]
    fn header_order_is_stable() {
        assert_eq!(
            header().join(","),
            "Record,Mean_RR,Std_RR,Min_RR,Max_RR,Mean_BPM,Std_BPM,Min_BPM,Max_BPM,Label"
        );
    }

    #[test]
    fn writes_rows_in_column_order() {
        let mut sink = CsvFeatureSink::from_writer(Vec::new(), true).unwrap();
        sink.write("100", &features(75.0), Label::Normal).unwrap();
        sink.write("101", &features(50.0), Label::Bradycardia).unwrap();
        assert_eq!(sink.rows(), 2);
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "100,0.8,0,0.8,0.8,75,0,75,75,0");
        assert!(lines[2].starts_with("101,1.2,"));
        assert!(lines[2].ends_with(",1"));
    }

    #[test]
    fn append_writes_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        for id in ["1", "2"] {
            let mut sink = CsvFeatureSink::append(&path).unwrap();
            sink.write(id, &features(120.0), Label::Tachycardia).unwrap();
            sink.finish().unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Mean_RR").count(), 1);
        assert_eq!(text.lines().count(), 3);

        let mut sink = CsvFeatureSink::create(&path).unwrap();
        sink.finish().unwrap();
        drop(sink);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn open_failure_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing/dir/features.csv");
        let err = CsvFeatureSink::create(&path).err().unwrap();
        assert!(err.to_string().contains("features.csv"));
    }
}
