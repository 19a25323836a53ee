// src/push.rs

use reqwest::{header::CONTENT_TYPE, Client};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::frame::Frame;

pub const UPLOAD_PATH: &str = "/api/v1/tax/upload";
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to the current-period upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PushOutcome {
    DryRunSkipped,
    NoBackendUrl,
    /// The request failed; the run carries on.
    Failed(String),
    /// Response body from the backend.
    Sent(String),
}

/// Where a backend base URL receives uploads.
pub fn upload_url(backend_url: &str) -> String {
    format!("{}{}", backend_url.trim_end_matches('/'), UPLOAD_PATH)
}

/// POST the current period as CSV, columns in reshaper order.
///
/// Only CSV encoding errors are returned; transport and status failures are
/// logged and reported as [`PushOutcome::Failed`].
pub async fn push_current(
    client: &Client,
    backend_url: Option<&str>,
    api_key: Option<&str>,
    current: &Frame,
    dry_run: bool,
) -> Result<PushOutcome> {
    if dry_run {
        info!(rows = current.len(), "dry run: skipped pushing current tax data to backend");
        return Ok(PushOutcome::DryRunSkipped);
    }
    let Some(base) = backend_url else {
        warn!(rows = current.len(), "BACKEND_URL unset: skipped pushing current tax data");
        return Ok(PushOutcome::NoBackendUrl);
    };

    let url = upload_url(base);
    let body = current.to_csv_bytes()?;
    let mut req = client
        .post(&url)
        .header(CONTENT_TYPE, "text/csv")
        .timeout(PUSH_TIMEOUT)
        .body(body);
    if let Some(key) = api_key {
        req = req.header("X-API-KEY", key);
    }

    let result: std::result::Result<String, reqwest::Error> = async {
        let resp = req.send().await?.error_for_status()?;
        resp.text().await
    }
    .await;
    match result {
        Ok(text) => {
            info!(rows = current.len(), backend_url = %url, "pushed current tax data to backend");
            Ok(PushOutcome::Sent(text))
        }
        Err(e) => {
            error!(rows = current.len(), backend_url = %url, error = %e, "failed to push current tax data to backend");
            Ok(PushOutcome::Failed(e.to_string()))
        }
    }
}
