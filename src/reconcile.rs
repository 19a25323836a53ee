// src/reconcile.rs

use serde::Serialize;
use std::ops::Range;
use tracing::{info, warn};

use crate::frame::Frame;
use crate::reshape::YEAR_COLUMN;

/// How the most-recent block of the history was identified.
///
/// * `MaxYear` – every `Year` cell is an integer; the block is the run of
///   rows carrying the largest one that sits nearest the newest end. This is
///   authoritative whenever it applies.
/// * `LeadingBlock` – a `Year` column exists but some cell is not an integer;
///   the block is the leading run of rows sharing the first row's `Year` text.
///
/// A revised year sits next to the copy it revises, so a run is cut to the
/// size of the current period, counted from the newest end.
/// * `LeadingRows` – no `Year` column; the block is the first `n` rows, `n`
///   being the size of the current period.
/// * `NoPriorData` – the history has no rows at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Baseline {
    NoPriorData,
    MaxYear(i64),
    LeadingBlock(String),
    LeadingRows(usize),
}

/// Row order of a history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HistoryOrder {
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub table: Frame,
    pub changed: bool,
    pub baseline: Baseline,
    pub order: HistoryOrder,
}

/// Every `Year` cell as an integer, or `None` if the column is missing or any
/// cell does not parse.
fn integer_years(history: &Frame) -> Option<Vec<i64>> {
    history
        .column(YEAR_COLUMN)?
        .into_iter()
        .map(|cell| cell?.trim().parse::<i64>().ok())
        .collect()
}

/// Locate the rows the current period has to be compared against.
pub fn most_recent_block(history: &Frame, current_len: usize) -> (Frame, Baseline) {
    if history.is_empty() {
        return (Frame::new(history.headers().to_vec()), Baseline::NoPriorData);
    }

    let Some(idx) = history.column_index(YEAR_COLUMN) else {
        let n = current_len.min(history.len());
        return (history.slice_rows(0..n), Baseline::LeadingRows(n));
    };

    if let Some(years) = integer_years(history) {
        if let Some(&latest) = years.iter().max() {
            let rows = latest_run(&years, latest, detect_order(history), current_len);
            return (history.slice_rows(rows), Baseline::MaxYear(latest));
        }
    }

    let first = history.rows()[0][idx].clone();
    let run = history
        .rows()
        .iter()
        .take_while(|row| row[idx] == first)
        .count();
    (
        history.slice_rows(0..run.min(current_len)),
        Baseline::LeadingBlock(first.unwrap_or_default()),
    )
}

/// Rows of the contiguous `latest` run closest to the newest end, at most
/// `limit` of them, taken from the newest side.
fn latest_run(years: &[i64], latest: i64, order: HistoryOrder, limit: usize) -> Range<usize> {
    match order {
        HistoryOrder::NewestFirst => {
            let start = years.iter().position(|y| *y == latest).unwrap_or(0);
            let run = years[start..].iter().take_while(|y| **y == latest).count();
            start..start + run.min(limit)
        }
        HistoryOrder::OldestFirst => {
            let end = years.iter().rposition(|y| *y == latest).map_or(0, |i| i + 1);
            let run = years[..end].iter().rev().take_while(|y| **y == latest).count();
            end - run.min(limit)..end
        }
    }
}

/// Oldest-first only when the years are reliable and the first row is older
/// than the last; everything else is treated as newest-first.
pub fn detect_order(history: &Frame) -> HistoryOrder {
    match integer_years(history).as_deref() {
        Some([first, .., last]) if first < last => HistoryOrder::OldestFirst,
        _ => HistoryOrder::NewestFirst,
    }
}

/// Merge the current period into the history unless the history's most
/// recent block already equals it.
///
/// Equality is structural: same columns in the same order, same cells, same
/// row order. New rows go on the newest end of the history, whichever end
/// that is. Reconciling the same input twice never grows the table.
pub fn reconcile(current: &Frame, history: &Frame) -> Reconciliation {
    let order = detect_order(history);
    let (block, baseline) = most_recent_block(history, current.len());

    if baseline == Baseline::NoPriorData {
        warn!(
            rows = current.len(),
            "history has no identifiable most-recent block; starting it from the current period"
        );
        return Reconciliation {
            table: current.clone(),
            changed: true,
            baseline,
            order,
        };
    }

    if block == *current {
        info!(
            ?baseline,
            rows = current.len(),
            "no new data to append, skipping"
        );
        return Reconciliation {
            table: history.clone(),
            changed: false,
            baseline,
            order,
        };
    }

    let table = match order {
        HistoryOrder::NewestFirst => Frame::stack(current, history),
        HistoryOrder::OldestFirst => Frame::stack(history, current),
    };
    info!(
        ?baseline,
        ?order,
        rows_added = current.len(),
        total = table.len(),
        "appending new data to history"
    );
    Reconciliation {
        table,
        changed: true,
        baseline,
        order,
    }
}
