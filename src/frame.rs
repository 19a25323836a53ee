// src/frame.rs

use csv::{ReaderBuilder, WriterBuilder};
use std::{io::Read, ops::Range};

use crate::error::{IngestError, Result};

/// A single table cell. `None` is a null and is written as an empty CSV field.
///
/// Frames never hold `Some("")`: an empty string is stored as `None`, so a
/// frame compares equal to itself after a CSV round trip.
pub type Cell = Option<String>;

fn normalize(cell: Cell) -> Cell {
    cell.filter(|c| !c.is_empty())
}

/// Ordered, string-celled table with named columns.
///
/// Column names are not required to be unique: column-wise concatenation can
/// produce duplicates, which callers collapse with
/// [`Frame::drop_duplicate_columns`]. Name lookups always resolve to the first
/// column carrying that name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    /// An empty frame with the given columns.
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Build a frame from `(name, values)` pairs. All columns must be the same length.
    pub fn from_columns(columns: Vec<(String, Vec<Cell>)>) -> Result<Self> {
        let expected = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((_, v)) = columns.iter().find(|(_, v)| v.len() != expected) {
            return Err(IngestError::RowCountMismatch {
                expected,
                found: v.len(),
            });
        }

        let headers = columns.iter().map(|(name, _)| name.clone()).collect();
        let mut rows = vec![Vec::with_capacity(columns.len()); expected];
        for (_, values) in columns {
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(normalize(value));
            }
        }
        Ok(Self { headers, rows })
    }

    /// Append one row. Panics if the row width does not match the header width.
    pub fn push_row(&mut self, row: Vec<Cell>) {
        assert_eq!(
            row.len(),
            self.headers.len(),
            "row width must match header width"
        );
        self.rows.push(row.into_iter().map(normalize).collect());
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Values of the first column named `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_deref()).collect())
    }

    /// Single cell lookup by row and column name.
    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    /// A copy of the rows in `range`, same columns.
    pub fn slice_rows(&self, range: Range<usize>) -> Frame {
        Frame {
            headers: self.headers.clone(),
            rows: self.rows[range].to_vec(),
        }
    }

    /// A copy holding only the rows for which `keep` returns true.
    pub fn filter_rows<F>(&self, mut keep: F) -> Frame
    where
        F: FnMut(&[Cell]) -> bool,
    {
        Frame {
            headers: self.headers.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Concatenate frames column-wise. Row `i` of every frame becomes row `i`
    /// of the result; no matching by value takes place.
    pub fn hconcat(frames: Vec<Frame>) -> Result<Frame> {
        let expected = frames.first().map(Frame::len).unwrap_or(0);
        if let Some(bad) = frames.iter().find(|f| f.len() != expected) {
            return Err(IngestError::RowCountMismatch {
                expected,
                found: bad.len(),
            });
        }

        let mut out = Frame {
            headers: Vec::new(),
            rows: vec![Vec::new(); expected],
        };
        for frame in frames {
            out.headers.extend(frame.headers);
            for (dst, src) in out.rows.iter_mut().zip(frame.rows) {
                dst.extend(src);
            }
        }
        Ok(out)
    }

    /// Drop every column named `name` except the first, leaving that first
    /// occurrence untouched.
    pub fn drop_duplicate_columns(self, name: &str) -> Frame {
        let mut seen = false;
        let keep: Vec<bool> = self
            .headers
            .iter()
            .map(|h| {
                if h != name {
                    return true;
                }
                let first = !seen;
                seen = true;
                first
            })
            .collect();

        let headers = self
            .headers
            .into_iter()
            .zip(&keep)
            .filter_map(|(h, k)| k.then_some(h))
            .collect();
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&keep)
                    .filter_map(|(c, k)| k.then_some(c))
                    .collect()
            })
            .collect();
        Frame { headers, rows }
    }

    /// Insert a column so that it ends up at position `idx`.
    pub fn insert_column(&mut self, idx: usize, name: String, values: Vec<Cell>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(IngestError::RowCountMismatch {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        self.headers.insert(idx, name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(idx, normalize(value));
        }
        Ok(())
    }

    /// Stack `top` above `bottom`, aligning columns by name.
    ///
    /// The result carries `top`'s columns followed by any columns only
    /// `bottom` has; cells a frame does not have become null.
    pub fn stack(top: &Frame, bottom: &Frame) -> Frame {
        let mut headers = top.headers.clone();
        for h in &bottom.headers {
            if !headers.contains(h) {
                headers.push(h.clone());
            }
        }

        let mut out = Frame::new(headers);
        for frame in [top, bottom] {
            let mapping: Vec<Option<usize>> =
                out.headers.iter().map(|h| frame.column_index(h)).collect();
            for row in &frame.rows {
                let aligned = mapping
                    .iter()
                    .map(|idx| idx.and_then(|i| row[i].clone()))
                    .collect();
                out.rows.push(aligned);
            }
        }
        out
    }

    /// Parse a headed CSV document. Empty fields become nulls.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Frame> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr.headers()?.iter().map(str::to_string).collect();
        let mut frame = Frame::new(headers);
        for record in rdr.records() {
            let record = record?;
            frame.rows.push(
                record
                    .iter()
                    .map(|f| normalize(Some(f.to_string())))
                    .collect(),
            );
        }
        Ok(frame)
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Frame> {
        Frame::from_csv_reader(bytes)
    }

    /// Encode as CSV with a header row; nulls are written as empty fields.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut wtr = WriterBuilder::new().from_writer(Vec::new());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        wtr.into_inner().map_err(|e| IngestError::Io(e.into_error()))
    }
}
