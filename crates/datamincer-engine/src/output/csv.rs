use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexSet;
use serde_json::Value;

/// Columns of a record set: keys in order of first appearance.
pub fn record_columns(records: &[Value]) -> Vec<String> {
    let mut columns = IndexSet::new();
    for record in records {
        if let Value::Object(map) = record {
            for key in map.keys() {
                columns.insert(key.clone());
            }
        }
    }
    columns.into_iter().collect()
}

/// Renders a value as one CSV cell; strings stay unquoted JSON-wise.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Writes mapping records as CSV with a header row, returning bytes written.
pub fn write_records_csv(path: &Path, records: &[Value]) -> Result<u64, csv::Error> {
    let writer = BufWriter::new(File::create(path).map_err(csv::Error::from)?);
    let counting = CountingWriter::new(writer);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(counting);

    let columns = record_columns(records);
    writer.write_record(&columns)?;

    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| record.get(column).map(cell).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
    }

    writer.flush()?;
    let counting = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(counting.bytes_written())
}

struct CountingWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.bytes = self.bytes.saturating_add(size as u64);
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
