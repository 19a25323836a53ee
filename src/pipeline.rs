// src/pipeline.rs

use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use crate::config::{IngestConfig, ReshapeConfig};
use crate::error::{IngestError, Result};
use crate::extract::{extract_sections, non_empty};
use crate::flatten::flatten;
use crate::push::{push_current, PushOutcome};
use crate::reconcile::{reconcile, Baseline};
use crate::reshape::{reshape, Reshaped, YearSource};
use crate::store::{load_history, save_history, HistoryStore};

/// Extract → flatten → reshape. Pure; fails before anything is written.
pub fn compute_current(html: &str, config: &ReshapeConfig, today: NaiveDate) -> Result<Reshaped> {
    let sections = non_empty(extract_sections(html));
    if sections.is_empty() {
        return Err(IngestError::EmptyExtraction);
    }
    let rows = flatten(&sections);
    info!(sections = sections.len(), rows = rows.len(), "flattened source tables");
    reshape(&rows, config, today)
}

/// What a run did, logged as JSON at the end of the binary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub year: i32,
    pub year_source: YearSource,
    pub current_rows: usize,
    pub parse_warnings: usize,
    pub changed: bool,
    pub baseline: Option<Baseline>,
    pub history_rows: usize,
    pub history_written: bool,
    pub push: PushOutcome,
}

/// One ingest run over already-fetched page bytes.
///
/// The current period is computed in full before the store is touched. In
/// dry-run mode the store is neither read nor written and nothing is pushed.
/// Otherwise the history is reconciled, the current period pushed, and the
/// history written back only when it changed.
#[instrument(level = "info", skip_all, fields(dry_run = config.dry_run))]
pub async fn run<S: HistoryStore>(
    config: &IngestConfig,
    html: &[u8],
    store: &S,
    client: &Client,
    today: NaiveDate,
) -> Result<RunSummary> {
    let html = String::from_utf8_lossy(html);
    let current = compute_current(&html, &config.reshape, today)?;
    let key = config.history.key();

    let (table, changed, baseline) = if config.dry_run {
        info!(rows = current.frame.len(), "dry run: skipped fetching history");
        (current.frame.clone(), false, None)
    } else {
        let history = load_history(store, key).await?;
        let merged = reconcile(&current.frame, &history);
        (merged.table, merged.changed, Some(merged.baseline))
    };

    let push = push_current(
        client,
        config.backend_url.as_deref(),
        config.api_key.as_deref(),
        &current.frame,
        config.dry_run,
    )
    .await?;

    let history_written = !config.dry_run && changed;
    if history_written {
        save_history(store, key, &table).await?;
        info!(key, rows = table.len(), "updated historical CSV");
    } else {
        info!(key, dry_run = config.dry_run, "historical CSV left unchanged");
    }

    Ok(RunSummary {
        dry_run: config.dry_run,
        year: current.year,
        year_source: current.year_source,
        current_rows: current.frame.len(),
        parse_warnings: current.warnings.len(),
        changed,
        baseline,
        history_rows: table.len(),
        history_written,
        push,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryLocation;
    use crate::frame::Frame;
    use crate::store::MemoryStore;
    use std::path::PathBuf;

    const SAMPLE_PAGE: &str = include_str!("../testdata/irs_tax_rates_2024.html");
    const KEY: &str = "history.csv";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn config(dry_run: bool) -> IngestConfig {
        IngestConfig {
            source_url: "http://unused".to_string(),
            history: HistoryLocation::Local {
                dir: PathBuf::from("unused"),
                key: KEY.to_string(),
            },
            dry_run,
            backend_url: None,
            api_key: None,
            reshape: ReshapeConfig::default(),
        }
    }

    fn stored(store: &MemoryStore) -> Frame {
        Frame::from_csv_bytes(&store.get(KEY).unwrap()).unwrap()
    }

    #[test]
    fn test_compute_current_from_sample_page() {
        let current = compute_current(SAMPLE_PAGE, &ReshapeConfig::default(), today()).unwrap();
        assert_eq!(current.year, 2024);
        assert_eq!(current.frame.len(), 7);
        assert_eq!(current.frame.cell(0, "S Range End"), Some("$11,600"));

        let csv = String::from_utf8(current.frame.to_csv_bytes().unwrap()).unwrap();
        assert!(csv.starts_with("Year,Married Filing Jointly (Rates/Brackets),MFJ Range Start,MFJ Range End,"));
        assert_eq!(csv.lines().count(), 8);
    }

    #[test]
    fn test_page_without_tables_is_empty_extraction() {
        let html = "<h2>Rates</h2><p>Coming soon</p>";
        let err = compute_current(html, &ReshapeConfig::default(), today()).unwrap_err();
        assert!(matches!(err, IngestError::EmptyExtraction));
    }

    #[tokio::test]
    async fn test_run_twice_does_not_grow_history() {
        let store = MemoryStore::new();
        let client = Client::new();
        let cfg = config(false);

        let first = run(&cfg, SAMPLE_PAGE.as_bytes(), &store, &client, today())
            .await
            .unwrap();
        assert!(first.changed);
        assert!(first.history_written);
        assert_eq!(first.baseline, Some(Baseline::NoPriorData));
        assert_eq!(first.push, PushOutcome::NoBackendUrl);
        assert_eq!(stored(&store).len(), 7);

        let before = store.get(KEY).unwrap();
        let second = run(&cfg, SAMPLE_PAGE.as_bytes(), &store, &client, today())
            .await
            .unwrap();
        assert!(!second.changed);
        assert!(!second.history_written);
        assert_eq!(second.baseline, Some(Baseline::MaxYear(2024)));
        assert_eq!(store.get(KEY).unwrap(), before);
    }

    #[tokio::test]
    async fn test_blank_cell_does_not_grow_history_on_rerun() {
        // the single filer's 35% bracket loses its start
        let html = SAMPLE_PAGE.replacen("<td>$243,726</td>", "<td></td>", 1);
        let store = MemoryStore::new();
        let client = Client::new();
        let cfg = config(false);

        let first = run(&cfg, html.as_bytes(), &store, &client, today())
            .await
            .unwrap();
        assert!(first.changed);
        assert_eq!(stored(&store).cell(5, "S Range Start"), None);
        assert_eq!(stored(&store).cell(4, "S Range End"), None);

        let before = store.get(KEY).unwrap();
        let second = run(&cfg, html.as_bytes(), &store, &client, today())
            .await
            .unwrap();
        assert!(!second.changed);
        assert_eq!(second.history_rows, 7);
        assert_eq!(store.get(KEY).unwrap(), before);
    }

    #[tokio::test]
    async fn test_run_prepends_new_year_to_history() {
        let client = Client::new();
        let current = compute_current(SAMPLE_PAGE, &ReshapeConfig::default(), today()).unwrap();

        // last year's table: same shape, different year
        let last_year = compute_current(
            SAMPLE_PAGE,
            &ReshapeConfig::default().with_year_override(2023),
            today(),
        )
        .unwrap();
        let store = MemoryStore::new().with_object(KEY, last_year.frame.to_csv_bytes().unwrap());

        let summary = run(&config(false), SAMPLE_PAGE.as_bytes(), &store, &client, today())
            .await
            .unwrap();
        assert!(summary.changed);
        assert_eq!(summary.history_rows, 14);

        let history = stored(&store);
        assert_eq!(history.slice_rows(0..7), current.frame);
        assert_eq!(history.slice_rows(7..14), last_year.frame);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_alone() {
        let store = MemoryStore::new();
        let summary = run(&config(true), SAMPLE_PAGE.as_bytes(), &store, &Client::new(), today())
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert!(!summary.history_written);
        assert_eq!(summary.push, PushOutcome::DryRunSkipped);
        assert_eq!(summary.history_rows, 7);
        assert!(store.get(KEY).is_none());
    }

    #[tokio::test]
    async fn test_structural_mismatch_stops_before_store() {
        // drop the head of household table
        let cut = SAMPLE_PAGE.find("<h4>Head of household</h4>").unwrap();
        let html = format!("{}</main></body></html>", &SAMPLE_PAGE[..cut]);

        let store = MemoryStore::new().with_object(KEY, b"Year\n2023\n".to_vec());
        let err = run(&config(false), html.as_bytes(), &store, &Client::new(), today())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::StructuralMismatch { .. }));
        assert_eq!(store.get(KEY).unwrap(), b"Year\n2023\n");
    }
}
