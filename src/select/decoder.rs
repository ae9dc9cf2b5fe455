//! Incremental select response decoder
//!
//! Record frames carry arbitrary slices of a delimiter-separated JSON
//! stream: one record may span several frames and one frame may hold many
//! records. The decoder keeps only the undelivered tail between frames.

use crate::error::{Result, TransferError};
use crate::storage::{ScanStats, SelectFrame};
use serde::Serialize;
use serde_json::{Map, Value};

/// One decoded row, fields in their original order
pub type QueryRecord = Map<String, Value>;

/// Push-style decoder fed one frame at a time
#[derive(Debug)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no delimiter
    scanned: usize,
    records: Vec<QueryRecord>,
    stats: Option<ScanStats>,
    delimiter: u8,
    ended: bool,
}

impl RecordDecoder {
    /// Create a decoder splitting records on `delimiter`
    pub fn new(delimiter: u8) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            records: Vec::new(),
            stats: None,
            delimiter,
            ended: false,
        }
    }

    /// Consume one frame, returning the number of records it completed
    pub fn feed(&mut self, frame: SelectFrame) -> Result<usize> {
        if self.ended {
            return Err(TransferError::DecodeError(
                "frame received after end of stream".to_string(),
            ));
        }
        match frame {
            SelectFrame::Records(chunk) => self.push(&chunk),
            SelectFrame::Stats(stats) => {
                self.stats = Some(stats);
                Ok(0)
            }
            SelectFrame::End => {
                self.finish()?;
                Ok(0)
            }
        }
    }

    /// Append raw bytes and decode every record they complete.
    ///
    /// On a malformed record the records before it stay decoded and the
    /// buffer resumes after it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<usize> {
        self.buffer.extend_from_slice(chunk);

        let before = self.records.len();
        let mut start = 0;
        let mut search = self.scanned;
        let mut failure = None;
        while let Some(offset) = self.buffer[search..].iter().position(|b| *b == self.delimiter) {
            let end = search + offset;
            let parsed = parse_record(&self.buffer[start..end]);
            start = end + 1;
            search = start;
            match parsed {
                Ok(Some(record)) => self.records.push(record),
                Ok(None) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.buffer.drain(..start);
        self.scanned = if failure.is_some() { 0 } else { self.buffer.len() };

        match failure {
            Some(e) => Err(e),
            None => Ok(self.records.len() - before),
        }
    }

    /// Mark the end of the stream.
    ///
    /// A leftover fragment without a delimiter is an error unless it is
    /// only whitespace.
    pub fn finish(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            self.scanned = 0;
            return Ok(());
        }
        Err(TransferError::DecodeError(format!(
            "truncated record at end of stream: {}",
            String::from_utf8_lossy(&self.buffer)
        )))
    }

    /// Records decoded so far
    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    /// Take the records decoded so far, leaving the tail buffered
    pub fn take_records(&mut self) -> Vec<QueryRecord> {
        std::mem::take(&mut self.records)
    }

    /// Bytes waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Statistics, once the stats frame has arrived
    pub fn stats(&self) -> Option<&ScanStats> {
        self.stats.as_ref()
    }

    /// Finish the stream and build the result
    pub fn into_result(mut self) -> Result<QueryResult> {
        self.finish()?;
        Ok(QueryResult {
            records: self.records,
            stats: self.stats,
        })
    }
}

fn parse_record(line: &[u8]) -> Result<Option<QueryRecord>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(line)? {
        Value::Object(map) => Ok(Some(map)),
        other => Err(TransferError::DecodeError(format!(
            "expected a JSON object record, got {other}"
        ))),
    }
}

/// Decoded rows of a select, with scan statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    records: Vec<QueryRecord>,
    stats: Option<ScanStats>,
}

impl QueryResult {
    /// Build a result from decoded rows
    pub fn new(records: Vec<QueryRecord>, stats: Option<ScanStats>) -> Self {
        Self { records, stats }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if there are no rows
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows in arrival order
    pub fn rows(&self) -> impl Iterator<Item = &QueryRecord> {
        self.records.iter()
    }

    /// Rows as a slice
    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    /// Scan statistics, when the store reported them
    pub fn stats(&self) -> Option<&ScanStats> {
        self.stats.as_ref()
    }

    /// Column names in first-seen order across all rows
    pub fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for record in &self.records {
            for name in record.keys() {
                if !columns.contains(&name.as_str()) {
                    columns.push(name);
                }
            }
        }
        columns
    }

    /// Values of one column, `None` for rows without it
    pub fn column(&self, name: &str) -> Vec<Option<&Value>> {
        self.records.iter().map(|record| record.get(name)).collect()
    }

    /// Consume into the rows
    pub fn into_records(self) -> Vec<QueryRecord> {
        self.records
    }
}
