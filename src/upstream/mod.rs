//! Client for the upstream node's count.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;

use crate::config::UpstreamConfig;
use crate::contracts::{Upstream, UpstreamError};
use crate::metrics::UpstreamMetrics;
use crate::storage::parse_count;

/// Upstream aggregator speaking plain HTTP.
///
/// Issues one `GET` per call and expects a 2xx response whose body is
/// exactly a decimal `u64`.
pub struct HttpUpstream {
    client: Client,
    url: Url,
    endpoint: String,
    timeout: Duration,
    metrics: Arc<UpstreamMetrics>,
}

impl HttpUpstream {
    pub fn new(
        config: &UpstreamConfig,
        metrics: Arc<UpstreamMetrics>,
    ) -> Result<Self, UpstreamError> {
        let url = Url::parse(&config.url).map_err(|e| UpstreamError::InvalidAddress {
            addr: config.url.clone(),
            detail: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidAddress {
                addr: config.url.clone(),
                detail: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let client = Client::builder()
            .build()
            .map_err(|e| UpstreamError::InvalidAddress {
                addr: config.url.clone(),
                detail: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: url.to_string(),
            url,
            timeout: config.timeout,
            metrics,
        })
    }

    async fn request(&self) -> Result<u64, UpstreamError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::BadResponse(format!("status {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        parse_count(&body)
            .map_err(|e| UpstreamError::BadResponse(format!("body is not a count: {}", e)))
    }

    fn record_failure(&self, error: &UpstreamError) {
        let counter = match error {
            UpstreamError::Unreachable(_) => &self.metrics.unreachable_total,
            UpstreamError::BadResponse(_) => &self.metrics.bad_response_total,
            UpstreamError::Cancelled => &self.metrics.cancelled_total,
            UpstreamError::InvalidAddress { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Upstream for HttpUpstream {
    async fn fetch_count(&self, cancel: &CancellationToken) -> Result<u64, UpstreamError> {
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
            timed = tokio::time::timeout(self.timeout, self.request()) => match timed {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Unreachable(format!(
                    "no answer within {:?}",
                    self.timeout
                ))),
            },
        };

        self.metrics.record_call(start.elapsed());
        if let Err(ref e) = result {
            self.record_failure(e);
            tracing::debug!(upstream = %self.endpoint, error = %e, "Upstream call failed");
        }
        result
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
