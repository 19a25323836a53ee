// src/reshape.rs

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::{FilingStatusWindow, ReshapeConfig};
use crate::error::{IngestError, Result};
use crate::flatten::FlatRow;
use crate::frame::{Cell, Frame};

pub const YEAR_COLUMN: &str = "Year";
const RANGE_START_SUFFIX: &str = "Range Start";

static NON_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\d.]").expect("currency pattern should compile"));

/// Where the reporting year of a reshaped table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum YearSource {
    /// `ReshapeConfig::year_override`.
    Override,
    /// Leading token of the first flat row's heading.
    Document,
    /// Nothing usable in the document; the run's calendar year was used.
    CalendarDefault,
}

/// A range-start value that carried text but no parseable number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub column: String,
    pub row: usize,
    pub value: String,
}

/// Output of [`reshape`]: one row per bracket plus how it was derived.
#[derive(Debug, Clone)]
pub struct Reshaped {
    pub frame: Frame,
    pub year: i32,
    pub year_source: YearSource,
    pub warnings: Vec<ParseWarning>,
}

/// Reshape the flat rows into one row per bracket, one column group per
/// filing status.
///
/// Row `i` of every window is bracket `i`; the windows are aligned purely by
/// position, so they must all hold the same number of rows and fit inside
/// `rows`. Anything else is a [`IngestError::StructuralMismatch`] and no
/// partial table is returned.
#[instrument(level = "info", skip_all, fields(rows = rows.len()))]
pub fn reshape(rows: &[FlatRow], config: &ReshapeConfig, today: NaiveDate) -> Result<Reshaped> {
    let brackets = validate_windows(rows.len(), &config.windows)?;
    let (year, year_source) = resolve_year(rows, config.year_override, today);

    // 1) one Year/rate/range-start block per filing status
    let blocks = config
        .windows
        .iter()
        .map(|w| status_block(rows, w, year))
        .collect::<Result<Vec<_>>>()?;

    // 2) glue side by side and keep only the first Year column
    let merged = Frame::hconcat(blocks)?.drop_duplicate_columns(YEAR_COLUMN);

    // 3) derive range ends from the next bracket's start
    let mut frame = merged;
    let warnings = populate_range_end(&mut frame)?;
    for w in &warnings {
        warn!(column = %w.column, row = w.row, value = %w.value, "unparseable range start");
    }
    if !warnings.is_empty() {
        warn!(
            count = warnings.len(),
            "range starts without a number; the source format may have changed"
        );
    }

    info!(year, ?year_source, brackets, "reshaped bracket table");
    Ok(Reshaped {
        frame,
        year,
        year_source,
        warnings,
    })
}

/// Check every window against the number of flattened rows and against each
/// other. Returns the shared per-window row count.
pub fn validate_windows(total_rows: usize, windows: &[FilingStatusWindow]) -> Result<usize> {
    let Some(first) = windows.first() else {
        return Err(IngestError::StructuralMismatch {
            status: "<none>".to_string(),
            detail: "no filing-status windows configured".to_string(),
        });
    };
    let expected = first.rows();

    for w in windows {
        let detail = if w.start >= w.end {
            Some(format!("empty window {}..{}", w.start, w.end))
        } else if w.end > total_rows {
            Some(format!(
                "window {}..{} needs {} rows but only {} were flattened",
                w.start, w.end, w.end, total_rows
            ))
        } else if w.rows() != expected {
            Some(format!(
                "window {}..{} holds {} rows, other statuses hold {}",
                w.start,
                w.end,
                w.rows(),
                expected
            ))
        } else {
            None
        };

        if let Some(detail) = detail {
            return Err(IngestError::StructuralMismatch {
                status: w.name.clone(),
                detail,
            });
        }
    }
    Ok(expected)
}

/// Pick the reporting year: override, then the document's label row, then
/// the calendar year of `today`.
pub fn resolve_year(
    rows: &[FlatRow],
    year_override: Option<i32>,
    today: NaiveDate,
) -> (i32, YearSource) {
    if let Some(year) = year_override {
        return (year, YearSource::Override);
    }
    if let Some(year) = rows.first().and_then(|r| year_from_label(&r.header)) {
        return (year, YearSource::Document);
    }
    let year = today.year();
    warn!(
        year,
        "no year in the document's label row; defaulting to the current calendar year"
    );
    (year, YearSource::CalendarDefault)
}

/// `"2024 tax rates for a single taxpayer"` → `2024`.
fn year_from_label(label: &str) -> Option<i32> {
    label.split_whitespace().next()?.parse().ok()
}

fn status_block(rows: &[FlatRow], window: &FilingStatusWindow, year: i32) -> Result<Frame> {
    let slice = &rows[window.start..window.end];
    Frame::from_columns(vec![
        (
            YEAR_COLUMN.to_string(),
            vec![Some(year.to_string()); slice.len()],
        ),
        (
            window.name.clone(),
            slice.iter().map(|r| Some(r.rate.clone())).collect(),
        ),
        (
            window.range_start_column(),
            slice.iter().map(|r| Some(r.range.clone())).collect(),
        ),
    ])
}

/// Strip everything except digits and `.` and parse what is left.
pub fn parse_currency(raw: &str) -> Option<f64> {
    let digits = NON_NUMERIC.replace_all(raw, "");
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// `$` followed by the comma-grouped integer.
pub fn format_currency(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("$-{}", grouped)
    } else {
        format!("${}", grouped)
    }
}

/// For every `… Range Start` column insert a `… Range End` column right after
/// it, holding the next row's start minus one. The last row has no end.
pub fn populate_range_end(frame: &mut Frame) -> Result<Vec<ParseWarning>> {
    let start_columns: Vec<String> = frame
        .headers()
        .iter()
        .filter(|h| h.ends_with(RANGE_START_SUFFIX))
        .cloned()
        .collect();

    let mut warnings = Vec::new();
    for column in start_columns {
        let Some(idx) = frame.column_index(&column) else {
            continue;
        };
        let raw: Vec<Option<String>> = frame
            .rows()
            .iter()
            .map(|row| row[idx].clone())
            .collect();

        let starts: Vec<Option<f64>> = raw
            .iter()
            .enumerate()
            .map(|(row, value)| {
                let value = value.as_deref().unwrap_or("");
                let parsed = parse_currency(value);
                if parsed.is_none() && !value.trim().is_empty() {
                    warnings.push(ParseWarning {
                        column: column.clone(),
                        row,
                        value: value.to_string(),
                    });
                }
                parsed
            })
            .collect();

        let ends: Vec<Cell> = (0..starts.len())
            .map(|i| {
                starts
                    .get(i + 1)
                    .copied()
                    .flatten()
                    .map(|next| format_currency((next - 1.0).trunc() as i64))
            })
            .collect();

        let end_column = format!(
            "{}Range End",
            column.strip_suffix(RANGE_START_SUFFIX).unwrap_or_default()
        );
        frame.insert_column(idx + 1, end_column, ends)?;
    }
    Ok(warnings)
}
