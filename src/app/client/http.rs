//! reqwest-backed mirror probe with rate limiting
//!
//! Probes are single-shot: a failed probe is a miss for that candidate and the
//! caller moves on. Retrying is left to the next search or the next sweep.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::errors::{ConfigError, ConfigResult, ProbeError, ProbeResult, Result};

use super::config::ClientConfig;
use super::MirrorProbe;

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// HTTP probe shared by the resolver, the orchestrator and the health monitor
#[derive(Debug)]
pub struct HttpProbe {
    client: Client,
    rate_limiter: DirectRateLimiter,
    timeout: Duration,
}

impl HttpProbe {
    /// Creates a new probe from the client configuration
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the HTTP client cannot be built or the rate
    /// limit is zero
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = config.build_http_client()?;
        let rate_limiter = Self::build_rate_limiter(config.rate_limit_rps)?;
        Ok(Self {
            client,
            rate_limiter,
            timeout: config.probe_timeout,
        })
    }

    fn build_rate_limiter(rate_limit_rps: u32) -> ConfigResult<DirectRateLimiter> {
        let rate = NonZeroU32::new(rate_limit_rps).ok_or_else(|| ConfigError::InvalidValue {
            field: "client.rate_limit_rps".to_string(),
            value: rate_limit_rps.to_string(),
            reason: "Rate limit must be non-zero".to_string(),
        })?;
        Ok(RateLimiter::direct(Quota::per_second(rate)))
    }

    async fn throttle(&self) {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(20)))
            .await;
    }

    fn map_error(&self, error: reqwest::Error) -> ProbeError {
        if error.is_timeout() {
            ProbeError::Timeout {
                seconds: self.timeout.as_secs().max(1),
            }
        } else {
            ProbeError::Http(error)
        }
    }

    /// Get a reference to the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl MirrorProbe for HttpProbe {
    async fn head(&self, url: &Url) -> ProbeResult<u16> {
        self.throttle().await;
        let response = self
            .client
            .head(url.as_str())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        debug!("HEAD {} -> {}", url, status);
        Ok(status)
    }

    async fn fetch_text(&self, url: &Url) -> ProbeResult<String> {
        self.throttle().await;
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.map_error(e))?;
        debug!("GET {} -> {} ({} bytes)", url, status.as_u16(), body.len());
        Ok(body)
    }
}
