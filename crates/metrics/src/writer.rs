//! CSV output of metric rows

use crate::evaluate::MetricResultRow;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use uq_common::Result;

/// Writes [`MetricResultRow`]s as CSV with a header line
pub struct MetricCsvWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl MetricCsvWriter<File> {
    /// Create (or truncate) a CSV file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<W: Write> MetricCsvWriter<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
            rows: 0,
        }
    }

    pub fn write_row(&mut self, row: &MetricResultRow) -> Result<()> {
        self.writer.serialize(row)?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_rows<'a>(&mut self, rows: impl IntoIterator<Item = &'a MetricResultRow>) -> Result<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    /// Rows written so far
    #[must_use]
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| uq_common::SegmentationError::Io(e.into_error()))
    }
}

/// Read rows previously written by [`MetricCsvWriter`]
pub fn read_metric_csv(path: impl AsRef<Path>) -> Result<Vec<MetricResultRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize()
        .map(|row| row.map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(metric: &str, value: f64) -> MetricResultRow {
        MetricResultRow {
            case_id: "case_001".to_string(),
            mode: "mcdo".to_string(),
            class_name: "liver".to_string(),
            metric: metric.to_string(),
            value,
        }
    }

    #[test]
    fn test_header_and_rows() {
        let mut writer = MetricCsvWriter::from_writer(Vec::new());
        writer.write_rows(&[row("dice", 0.75), row("hd95", 3.5)]).unwrap();
        assert_eq!(writer.rows_written(), 2);
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("case_id,mode,class_name,metric,value"));
        assert_eq!(lines.next(), Some("case_001,mcdo,liver,dice,0.75"));
        assert_eq!(lines.next(), Some("case_001,mcdo,liver,hd95,3.5"));
    }

    #[test]
    fn test_file_roundtrip_keeps_infinite_distances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let rows = vec![row("dice", 0.0), row("hd", f64::INFINITY)];
        let mut writer = MetricCsvWriter::create(&path).unwrap();
        writer.write_rows(&rows).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let read = read_metric_csv(&path).unwrap();
        assert_eq!(read, rows);
    }
}
