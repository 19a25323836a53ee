// src/flatten.rs

use serde::{Deserialize, Serialize};

use crate::extract::Section;
use crate::frame::Frame;

/// Column names of the flat table.
pub const FLAT_HEADERS: [&str; 3] = ["Header", "Rate", "Range"];

/// One key/value pair of a section's table, tagged with its heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRow {
    #[serde(rename = "Header")]
    pub header: String,
    #[serde(rename = "Rate")]
    pub rate: String,
    #[serde(rename = "Range")]
    pub range: String,
}

impl FlatRow {
    pub fn new(header: &str, rate: &str, range: &str) -> Self {
        Self {
            header: header.to_string(),
            rate: rate.to_string(),
            range: range.to_string(),
        }
    }
}

/// Flatten sections into rows, preserving section order and each table's
/// insertion order. The reshaper slices the result by position, so nothing
/// here may reorder or drop rows.
pub fn flatten(sections: &[Section]) -> Vec<FlatRow> {
    sections
        .iter()
        .flat_map(|section| {
            section
                .table
                .iter()
                .map(move |(rate, range)| FlatRow::new(&section.heading, rate, range))
        })
        .collect()
}

/// The flat rows as a `Header,Rate,Range` frame.
pub fn flat_frame(rows: &[FlatRow]) -> Frame {
    let mut frame = Frame::new(FLAT_HEADERS.iter().map(|h| h.to_string()).collect());
    for row in rows {
        frame.push_row(vec![
            Some(row.header.clone()),
            Some(row.rate.clone()),
            Some(row.range.clone()),
        ]);
    }
    frame
}

/// Read flat rows back out of a frame with `Header`, `Rate` and `Range`
/// columns. Returns `None` if any of those columns is missing.
pub fn rows_from_frame(frame: &Frame) -> Option<Vec<FlatRow>> {
    let idx: Vec<usize> = FLAT_HEADERS
        .iter()
        .map(|h| frame.column_index(h))
        .collect::<Option<_>>()?;
    let text = |row: &[Option<String>], i: usize| row[idx[i]].clone().unwrap_or_default();

    Some(
        frame
            .rows()
            .iter()
            .map(|row| FlatRow {
                header: text(row, 0),
                rate: text(row, 1),
                range: text(row, 2),
            })
            .collect(),
    )
}
