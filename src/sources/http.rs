//! Blocking HTTP client with retry and the https-to-http fallback.

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;

use crate::util::config::NetConfig;
use crate::util::RetryPolicy;

/// HTTP client shared by every network protocol.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
    offline: bool,
}

impl HttpClient {
    /// Create a client from the network configuration.
    pub fn new(config: &NetConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("pkgsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;

        Ok(HttpClient {
            client,
            retry: config.retry_policy(),
            offline: config.offline,
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// GET `url`, retrying with backoff.
    ///
    /// When an `https` request fails, the same request is tried once over
    /// plain `http` before the backoff loop continues.
    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if self.offline {
            bail!("offline mode: not fetching {}", url);
        }

        self.fetch_with_fallback(url, |target| self.fetch_once(target))
    }

    fn fetch_with_fallback(
        &self,
        url: &str,
        mut fetch: impl FnMut(&str) -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let mut fell_back = false;

        self.retry.run(url, |_| match fetch(url) {
            Ok(bytes) => Ok(bytes),
            Err(e) => match url.strip_prefix("https://") {
                Some(rest) if !fell_back => {
                    fell_back = true;
                    let fallback = format!("http://{}", rest);
                    tracing::debug!("{:#}; retrying over {}", e, fallback);
                    fetch(&fallback).with_context(|| format!("{:#}", e))
                }
                _ => Err(e),
            },
        })
    }

    /// GET `url` and decode the body as JSON.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_bytes(url)?;
        serde_json::from_slice(&bytes).with_context(|| format!("invalid JSON from {}", url))
    }

    fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request to {} failed", url))?;

        if !response.status().is_success() {
            bail!("request to {} failed: HTTP {}", url, response.status());
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read response body from {}", url))?;
        Ok(bytes.to_vec())
    }
}
