// src/fetch.rs

use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::error::{IngestError, Result};

const USER_AGENT: &str = concat!("tax_bracket_ingest/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF_MS: u64 = 500;

/// HTTP client with the timeout and user agent every request should carry.
pub fn build_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

async fn get_bytes_core(client: &Client, url: &Url) -> Result<Vec<u8>> {
    debug!(%url, "fetching");
    let resp = client.get(url.clone()).send().await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// GET `url`, retrying with exponential backoff. Non-success statuses count
/// as failures.
#[instrument(level = "info", skip(client))]
pub async fn fetch_page(
    client: &Client,
    url: &str,
    max_retries: u32,
    initial_backoff_ms: u64,
) -> Result<Vec<u8>> {
    let url = Url::parse(url).map_err(|e| IngestError::Config(format!("bad source URL `{url}`: {e}")))?;
    let mut attempts = 0;
    loop {
        match get_bytes_core(client, &url).await {
            Ok(bytes) => {
                debug!(%url, size = bytes.len(), "fetched");
                return Ok(bytes);
            }
            Err(e) if attempts < max_retries => {
                attempts += 1;
                let backoff = initial_backoff_ms * 2u64.pow(attempts - 1);
                warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "Retrying");
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                error!(%url, error = %e, "Exhausted retries");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_url_is_config_error() {
        let client = build_client().unwrap();
        let err = fetch_page(&client, "not a url", 0, 1).await.unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_retries() {
        let client = build_client().unwrap();
        // port 9 on loopback is the discard service and is normally closed
        let err = fetch_page(&client, "http://127.0.0.1:9/", 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Http(_)));
    }
}
