// src/fetch/mod.rs
//! Blocking retrieval of the weekly export archive.

pub mod zips;

use crate::config::SourceConfig;
use crate::error::{LicsyncError, Result};
use reqwest::blocking::Client;
use std::{thread::sleep, time::Duration};
use tracing::{debug, error, warn};

pub use zips::{download_zip, extract_single_csv};

/// Timeout and retry settings for one fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl From<&SourceConfig> for FetchPolicy {
    fn from(cfg: &SourceConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            max_retries: cfg.max_retries,
            initial_backoff_ms: cfg.initial_backoff_ms,
        }
    }
}

impl FetchPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
        )
    }
}

pub fn build_client(policy: &FetchPolicy) -> Result<Client> {
    Client::builder()
        .timeout(policy.timeout)
        .build()
        .map_err(|e| LicsyncError::Fetch {
            url: String::new(),
            reason: format!("building HTTP client: {}", e),
        })
}

fn get_bytes_core(client: &Client, url: &str) -> Result<Vec<u8>> {
    debug!("Fetching {}", url);
    let fetch_err = |e: reqwest::Error| LicsyncError::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    };
    let resp = client
        .get(url)
        .send()
        .map_err(fetch_err)?
        .error_for_status()
        .map_err(fetch_err)?;
    Ok(resp.bytes().map_err(fetch_err)?.to_vec())
}

/// GET `url`, retrying with exponential backoff up to `policy.max_retries` times.
pub fn get_bytes_with_retry(client: &Client, url: &str, policy: &FetchPolicy) -> Result<Vec<u8>> {
    let mut attempts = 0;
    loop {
        match get_bytes_core(client, url) {
            Ok(b) => return Ok(b),
            Err(e) if attempts < policy.max_retries => {
                attempts += 1;
                let backoff = policy.backoff(attempts);
                warn!(%url, attempt = attempts, delay_ms = backoff.as_millis() as u64, error = %e, "Retrying");
                sleep(backoff);
            }
            Err(e) => {
                error!(%url, error = %e, "Exhausted retries");
                return Err(e);
            }
        }
    }
}
