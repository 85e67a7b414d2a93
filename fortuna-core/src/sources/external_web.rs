// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! HTTP(S) randomness services as an entropy source
//!
//! Fetches a block of bytes from a remote service, rate limited per priority.
//! The time of the last fetch is persisted so a restart does not hit the
//! service again before its period has elapsed.

use crate::persist::PersistentItemCollection;
use crate::source::{AsyncHint, EntropySource, Priority};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

const LAST_FETCH_KEY: &str = "LastFetchUtc";

/// Body bytes scanned per wanted byte before a whitespace-padded body is cut off
const BODY_SCAN_FACTOR: usize = 4;

/// How the service encodes its response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Body is the random bytes
    #[default]
    Raw,
    /// Body is hex text, whitespace ignored
    Hex,
}

/// Configuration for one remote service
#[derive(Debug, Clone)]
pub struct ExternalWebConfig {
    /// Source name, unique within a generator
    pub name: String,
    pub url: Url,
    pub format: ResponseFormat,
    /// Request timeout
    pub timeout: Duration,
    /// Responses longer than this are truncated
    pub max_bytes: usize,
    pub period_low: Duration,
    pub period_normal: Duration,
    pub period_high: Duration,
    /// Permit plain HTTP (local services and tests)
    pub allow_http: bool,
}

impl ExternalWebConfig {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
            format: ResponseFormat::Raw,
            timeout: Duration::from_secs(30),
            max_bytes: 1024,
            period_low: Duration::from_secs(4 * 60 * 60),
            period_normal: Duration::from_secs(60 * 60),
            period_high: Duration::from_secs(5 * 60),
            allow_http: false,
        }
    }

    pub fn period(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Low => self.period_low,
            Priority::Normal => self.period_normal,
            Priority::High => self.period_high,
        }
    }
}

pub struct ExternalWebSource {
    client: Client,
    config: ExternalWebConfig,
    last_fetch: Mutex<Option<DateTime<Utc>>>,
}

impl ExternalWebSource {
    pub fn new(config: ExternalWebConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(Error::Config("External source name must not be empty".into()));
        }
        if config.max_bytes == 0 {
            return Err(Error::Config(format!(
                "{}: max_bytes must be greater than 0",
                config.name
            )));
        }
        if !config.allow_http && config.url.scheme() != "https" {
            return Err(Error::Config(format!(
                "{}: url must use https ({})",
                config.name, config.url
            )));
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .use_rustls_tls()
            .https_only(!config.allow_http)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            config,
            last_fetch: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ExternalWebConfig {
        &self.config
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        *self.last_fetch.lock()
    }

    /// Claim the next fetch slot, or report that the period has not elapsed
    fn claim_slot(&self, priority: Priority, now: DateTime<Utc>) -> bool {
        let mut last = self.last_fetch.lock();
        if let Some(previous) = *last {
            let next = chrono::Duration::from_std(self.config.period(priority))
                .ok()
                .and_then(|period| previous.checked_add_signed(period));
            match next {
                Some(next) if now >= next => {}
                _ => return false,
            }
        }
        *last = Some(now);
        true
    }

    #[instrument(skip(self), fields(source = %self.config.name))]
    async fn fetch(&self) -> Result<Vec<u8>> {
        debug!("Fetching entropy from {}", self.config.url);

        let response = self
            .client
            .get(self.config.url.clone())
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to fetch from {}: {}", self.config.url, e);
                Error::Network(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::source_failure(
                &self.config.name,
                format!("HTTP {}", status),
            ));
        }

        let body = self.read_body(response).await?;
        let mut data = self.decode_body(&body)?;
        self.validate_response(&data)?;
        data.truncate(self.config.max_bytes);

        debug!("Fetched {} bytes", data.len());
        Ok(data)
    }

    /// Stream the body, keeping only what `max_bytes` of output needs.
    /// Hex whitespace is dropped as it arrives.
    async fn read_body(&self, response: reqwest::Response) -> Result<Vec<u8>> {
        let wanted = match self.config.format {
            ResponseFormat::Raw => self.config.max_bytes,
            ResponseFormat::Hex => self.config.max_bytes.saturating_mul(2),
        };
        let scan_limit = wanted.saturating_mul(BODY_SCAN_FACTOR);

        let mut stream = response.bytes_stream();
        let mut body = Vec::with_capacity(wanted.min(64 * 1024));
        let mut scanned = 0usize;
        while body.len() < wanted && scanned < scan_limit {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk.map_err(Error::Network)?;
            scanned = scanned.saturating_add(chunk.len());
            let room = wanted - body.len();
            match self.config.format {
                ResponseFormat::Raw => body.extend_from_slice(&chunk[..room.min(chunk.len())]),
                ResponseFormat::Hex => body.extend(
                    chunk
                        .iter()
                        .copied()
                        .filter(|b| !b.is_ascii_whitespace())
                        .take(room),
                ),
            }
        }
        Ok(body)
    }

    fn decode_body(&self, body: &[u8]) -> Result<Vec<u8>> {
        match self.config.format {
            ResponseFormat::Raw => Ok(body.to_vec()),
            ResponseFormat::Hex => {
                let text: String = String::from_utf8_lossy(body)
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                hex::decode(text).map_err(|e| {
                    Error::source_failure(&self.config.name, format!("invalid hex body: {}", e))
                })
            }
        }
    }

    fn validate_response(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::source_failure(&self.config.name, "empty response"));
        }
        if data.len() > 1 && data.iter().all(|&b| b == data[0]) {
            warn!("All {} bytes have the same value ({})", data.len(), data[0]);
        }
        Ok(())
    }
}

impl EntropySource for ExternalWebSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn async_hint(&self) -> AsyncHint {
        AsyncHint::Rarely
    }

    fn min_interval(&self, priority: Priority) -> Duration {
        self.config.period(priority)
    }

    fn get_entropy(&self, priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            if !self.claim_slot(priority, Utc::now()) {
                return Ok(None);
            }
            self.fetch().await.map(Some)
        })
    }

    fn write_state(&self, namespace: &str, items: &mut PersistentItemCollection) -> Result<()> {
        if let Some(last) = self.last_fetch() {
            items.set_text(namespace, LAST_FETCH_KEY, &last.to_rfc3339())?;
        }
        Ok(())
    }

    fn read_state(&self, namespace: &str, items: &PersistentItemCollection) -> Result<()> {
        if let Some(text) = items.get_text(namespace, LAST_FETCH_KEY)? {
            let parsed = DateTime::parse_from_rfc3339(text.trim()).map_err(|e| {
                Error::InvalidData(format!("{}/{}: {}", namespace, LAST_FETCH_KEY, e))
            })?;
            // A timestamp in the future would suppress fetching indefinitely
            let parsed = parsed.with_timezone(&Utc).min(Utc::now());
            *self.last_fetch.lock() = Some(parsed);
        }
        Ok(())
    }
}
