//! Output sinks: streaming row writers and in-memory collectors

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use super::error::PipelineResult;
use super::signal::Signal;
use crate::models::{Row, RowSchema};

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes rows as they arrive and finalizes with the last-seen schema
///
/// Implementations must not assume the end of the output is known before
/// [`RowWriter::finish`] is called.
pub trait RowWriter: Send {
    fn write_row(&mut self, row: &Row, schema: &RowSchema) -> PipelineResult<()>;

    /// Close the output; called once, with the final schema
    fn finish(&mut self, schema: &RowSchema) -> PipelineResult<()>;

    fn rows_written(&self) -> u64;
}

/// Writes `{"records": [...], "metadata": {"columns": [...]}}` in a single pass
pub struct JsonRowWriter<W: Write + Send> {
    out: W,
    started: bool,
    finished: bool,
    rows: u64,
}

impl<W: Write + Send> JsonRowWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: false,
            finished: false,
            rows: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn start(&mut self) -> PipelineResult<()> {
        if !self.started {
            self.out.write_all(b"{\"records\":[")?;
            self.started = true;
        }
        Ok(())
    }
}

impl<W: Write + Send> RowWriter for JsonRowWriter<W> {
    fn write_row(&mut self, row: &Row, schema: &RowSchema) -> PipelineResult<()> {
        self.start()?;
        if self.rows > 0 {
            self.out.write_all(b",")?;
        }
        let mut record = Map::new();
        record.insert("tdpId".to_string(), Value::from(row.tdp_id));
        for (id, value) in schema.ids().zip(row.ordered_values(schema)) {
            let value = value.map_or(Value::Null, |v| Value::String(v.to_string()));
            record.insert(id.to_string(), value);
        }
        let invalid: Vec<&str> = schema.ids().filter(|id| row.is_invalid(id)).collect();
        if !invalid.is_empty() {
            record.insert("tdpInvalid".to_string(), Value::from(invalid));
        }
        serde_json::to_writer(&mut self.out, &record)?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self, schema: &RowSchema) -> PipelineResult<()> {
        if self.finished {
            return Ok(());
        }
        self.start()?;
        self.out.write_all(b"],\"metadata\":{\"columns\":")?;
        serde_json::to_writer(&mut self.out, schema.columns())?;
        self.out.write_all(b"}}")?;
        self.out.flush()?;
        self.finished = true;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows
    }
}

/// Cloneable in-memory byte sink
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.0).clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Shared handle on a writer; partitions of a distributed run write through the same one
#[derive(Clone)]
pub struct WriteHandle(Arc<Mutex<Box<dyn RowWriter>>>);

impl WriteHandle {
    pub fn new(writer: impl RowWriter + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    pub(crate) fn write_row(&self, row: &Row, schema: &RowSchema) -> PipelineResult<()> {
        lock(&self.0).write_row(row, schema)
    }

    pub(crate) fn finish(&self, schema: &RowSchema) -> PipelineResult<()> {
        lock(&self.0).finish(schema)
    }

    pub fn rows_written(&self) -> u64 {
        lock(&self.0).rows_written()
    }
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("rows_written", &self.rows_written())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Collected {
    rows: Vec<Row>,
    schema: Option<RowSchema>,
    signals: Vec<Signal>,
}

/// Materializes rows in memory; meant for small previews
#[derive(Debug, Clone, Default)]
pub struct CollectHandle(Arc<Mutex<Collected>>);

impl CollectHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Row> {
        lock(&self.0).rows.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.0).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schema seen at end of stream, `None` until then
    pub fn schema(&self) -> Option<RowSchema> {
        lock(&self.0).schema.clone()
    }

    /// Signals received, in order
    pub fn signals(&self) -> Vec<Signal> {
        lock(&self.0).signals.clone()
    }

    pub(crate) fn push(&self, row: Row) {
        lock(&self.0).rows.push(row);
    }

    pub(crate) fn record_signal(&self, signal: Signal) {
        lock(&self.0).signals.push(signal);
    }

    pub(crate) fn finish(&self, schema: &RowSchema) {
        lock(&self.0).schema = Some(schema.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_writer_streams_records_then_metadata() {
        let schema = RowSchema::from_names(["name", "city"]);
        let buffer = SharedBuffer::new();
        let mut writer = JsonRowWriter::new(buffer.clone());
        writer
            .write_row(&Row::from_values(0, [("0000", "ada"), ("0001", "london")]), &schema)
            .unwrap();
        let mut second = Row::new(1);
        second.set("0000", Some("alan".to_string()));
        writer.write_row(&second, &schema).unwrap();
        writer.finish(&schema).unwrap();
        writer.finish(&schema).unwrap();

        let json: Value = serde_json::from_slice(&buffer.contents()).unwrap();
        let records = json["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["0001"], "london");
        assert_eq!(records[1]["0001"], Value::Null);
        assert_eq!(json["metadata"]["columns"].as_array().unwrap().len(), 2);
        assert_eq!(writer.rows_written(), 2);
    }

    #[test]
    fn test_json_writer_without_rows() {
        let schema = RowSchema::from_names(["a"]);
        let mut writer = JsonRowWriter::new(Vec::new());
        writer.finish(&schema).unwrap();
        let json: Value = serde_json::from_slice(&writer.into_inner()).unwrap();
        assert!(json["records"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_collect_handle() {
        let handle = CollectHandle::new();
        handle.push(Row::new(3));
        handle.record_signal(Signal::EndOfStream);
        handle.finish(&RowSchema::from_names(["a"]));
        assert_eq!(handle.len(), 1);
        assert_eq!(handle.signals(), vec![Signal::EndOfStream]);
        assert!(handle.schema().is_some());
    }
}
