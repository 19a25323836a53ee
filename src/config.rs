// src/config.rs

use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};
use tracing::{debug, error};

use crate::error::{IngestError, Result};

/// Page the brackets are scraped from unless `SOURCE_URL` says otherwise.
pub const DEFAULT_SOURCE_URL: &str =
    "https://www.irs.gov/filing/federal-income-tax-rates-and-brackets";

/// Values accepted as "true" for boolean environment flags.
const TRUTHY_ENV_VALUES: &[&str] = &["1", "true", "t", "yes", "y", "on"];

/// One filing status' slice of the flattened rows.
///
/// `start..end` is a half-open row range into the flat table. The label row
/// that precedes each block in the source document sits outside the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingStatusWindow {
    /// Column label for the rates, e.g. `Single Filer (Rates/Brackets)`.
    pub name: String,
    /// Short prefix for the range columns, e.g. `S` → `S Range Start`.
    pub abbrev: String,
    pub start: usize,
    pub end: usize,
}

impl FilingStatusWindow {
    pub fn new(name: &str, abbrev: &str, start: usize, end: usize) -> Self {
        Self {
            name: name.to_string(),
            abbrev: abbrev.to_string(),
            start,
            end,
        }
    }

    pub fn rows(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn range_start_column(&self) -> String {
        format!("{} Range Start", self.abbrev)
    }
}

/// Everything the reshaper needs to know about the source layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshapeConfig {
    /// Windows in output column order.
    pub windows: Vec<FilingStatusWindow>,
    /// Forces the reporting year instead of reading it from the document.
    pub year_override: Option<i32>,
}

impl Default for ReshapeConfig {
    /// The IRS page lists single, married filing jointly, married filing
    /// separately and head of household, each as a label row plus seven
    /// brackets. Output columns follow the historical CSV order instead.
    fn default() -> Self {
        Self {
            windows: vec![
                FilingStatusWindow::new("Married Filing Jointly (Rates/Brackets)", "MFJ", 9, 16),
                FilingStatusWindow::new(
                    "Married Filing Separately (Rates/Brackets)",
                    "MFS",
                    17,
                    24,
                ),
                FilingStatusWindow::new("Single Filer (Rates/Brackets)", "S", 1, 8),
                FilingStatusWindow::new("Head of Household (Rates/Brackets)", "HOH", 25, 32),
            ],
            year_override: None,
        }
    }
}

impl ReshapeConfig {
    #[must_use]
    pub fn with_year_override(mut self, year: i32) -> Self {
        self.year_override = Some(year);
        self
    }
}

/// Where the historical CSV lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLocation {
    S3 { bucket: String, key: String },
    Local { dir: PathBuf, key: String },
}

impl HistoryLocation {
    pub fn key(&self) -> &str {
        match self {
            HistoryLocation::S3 { key, .. } | HistoryLocation::Local { key, .. } => key,
        }
    }
}

/// Run configuration, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub source_url: String,
    pub history: HistoryLocation,
    pub dry_run: bool,
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub reshape: ReshapeConfig,
}

impl IngestConfig {
    /// Read the configuration from the process environment.
    ///
    /// `HISTORY_DIR` selects the local-directory store; otherwise `S3_BUCKET`
    /// is required. `S3_KEY` names the object in either store. All missing
    /// required variables are reported in one error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`IngestConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let key = get("S3_KEY");
        let history_dir = get("HISTORY_DIR");
        let bucket = get("S3_BUCKET");

        let mut missing = Vec::new();
        if key.is_none() {
            missing.push("S3_KEY");
        }
        if history_dir.is_none() && bucket.is_none() {
            missing.push("S3_BUCKET");
        }
        if !missing.is_empty() {
            error!(?missing, "required history configuration missing");
            return Err(IngestError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        let key = key.unwrap_or_default();

        let history = match (history_dir, bucket) {
            (Some(dir), _) => HistoryLocation::Local {
                dir: PathBuf::from(dir),
                key,
            },
            (None, Some(bucket)) => HistoryLocation::S3 { bucket, key },
            (None, None) => unreachable!("checked above"),
        };

        let year_override = match get("TAX_YEAR") {
            Some(raw) => Some(raw.trim().parse::<i32>().map_err(|e| {
                IngestError::Config(format!("TAX_YEAR `{}` is not a year: {}", raw, e))
            })?),
            None => None,
        };

        let config = Self {
            source_url: get("SOURCE_URL").unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            history,
            dry_run: flag(get("DRY_RUN").as_deref(), true),
            backend_url: get("BACKEND_URL"),
            api_key: get("INGEST_API_KEY"),
            reshape: ReshapeConfig {
                year_override,
                ..ReshapeConfig::default()
            },
        };
        debug!(
            history = ?config.history,
            dry_run = config.dry_run,
            source_url = %config.source_url,
            "loaded ingest configuration"
        );
        Ok(config)
    }
}

/// Interpret an optional flag value; unset falls back to `default`.
pub fn flag(raw: Option<&str>, default: bool) -> bool {
    match raw {
        Some(v) => TRUTHY_ENV_VALUES.contains(&v.trim().to_lowercase().as_str()),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_windows_cover_four_blocks_of_seven() {
        let cfg = ReshapeConfig::default();
        assert_eq!(cfg.windows.len(), 4);
        assert!(cfg.windows.iter().all(|w| w.rows() == 7));
        let mut starts: Vec<usize> = cfg.windows.iter().map(|w| w.start).collect();
        starts.sort();
        assert_eq!(starts, vec![1, 9, 17, 25]);
    }

    #[test]
    fn test_flag_values() {
        assert!(flag(Some(" Yes "), false));
        assert!(flag(Some("on"), false));
        assert!(!flag(Some("0"), true));
        assert!(!flag(Some("nope"), true));
        assert!(flag(None, true));
    }

    #[test]
    fn test_from_lookup_s3() {
        let cfg = IngestConfig::from_lookup(lookup(&[
            ("S3_BUCKET", "bucket"),
            ("S3_KEY", "history.csv"),
            ("DRY_RUN", "false"),
            ("TAX_YEAR", "2025"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.history,
            HistoryLocation::S3 {
                bucket: "bucket".into(),
                key: "history.csv".into()
            }
        );
        assert!(!cfg.dry_run);
        assert_eq!(cfg.reshape.year_override, Some(2025));
        assert_eq!(cfg.source_url, DEFAULT_SOURCE_URL);
        assert!(cfg.backend_url.is_none());
    }

    #[test]
    fn test_from_lookup_prefers_local_dir_and_defaults_to_dry_run() {
        let cfg = IngestConfig::from_lookup(lookup(&[
            ("HISTORY_DIR", "/tmp/hist"),
            ("S3_BUCKET", "ignored"),
            ("S3_KEY", "history.csv"),
        ]))
        .unwrap();
        assert!(matches!(cfg.history, HistoryLocation::Local { .. }));
        assert_eq!(cfg.history.key(), "history.csv");
        assert!(cfg.dry_run);
    }

    #[test]
    fn test_from_lookup_reports_all_missing() {
        let err = IngestConfig::from_lookup(lookup(&[])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("S3_KEY"));
        assert!(msg.contains("S3_BUCKET"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_year() {
        let err = IngestConfig::from_lookup(lookup(&[
            ("S3_BUCKET", "b"),
            ("S3_KEY", "k"),
            ("TAX_YEAR", "next year"),
        ]))
        .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
