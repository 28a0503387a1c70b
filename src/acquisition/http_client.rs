//! Shared HTTP plumbing for remote quote sources.

use std::time::Duration;

use anyhow::Context;
use rand::RngExt;
use serde::de::DeserializeOwned;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

use crate::config::AcquisitionConfig;
use crate::error::SourceError;

/// Thin wrapper around [`reqwest::Client`] adding a polite inter-request
/// delay, bounded retries on transient failures and a reachability probe.
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
    max_retries: u32,
    retry_base_ms: u64,
}

impl HttpClient {
    pub fn new(config: &AcquisitionConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true);
        if !config.respect_proxy_env {
            builder = builder.no_proxy();
        }
        let inner = builder.build().context("building http client")?;
        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        })
    }

    /// GET a page and return its body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self.get_with_retry(url).await?;
        response.text().await.map_err(SourceError::from)
    }

    /// GET a JSON endpoint and deserialize the body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.get_with_retry(url).await?;
        response.json::<T>().await.map_err(SourceError::from)
    }

    /// Single GET with a short override timeout, no delay, no retries.
    /// Tells the caller whether the network is worth trying at all.
    pub async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.inner.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("probe of {url} failed: {e}");
                false
            }
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, SourceError> {
        self.polite_delay().await;
        let strategy = ExponentialBackoff::from_millis(self.retry_base_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries as usize);
        RetryIf::spawn(
            strategy,
            || self.get_once(url),
            |e: &SourceError| e.retryable(),
        )
        .await
    }

    async fn get_once(&self, url: &str) -> Result<reqwest::Response, SourceError> {
        debug!("GET {url}");
        let response = self.inner.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("HTTP {status} for {url}");
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// Randomised pause before each request so concurrent scans do not
    /// hammer the upstream site.
    async fn polite_delay(&self) {
        if self.request_delay_ms == 0 && self.jitter_ms == 0 {
            return;
        }
        let jitter_ms = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        tokio::time::sleep(Duration::from_millis(self.request_delay_ms + jitter_ms)).await;
    }
}
