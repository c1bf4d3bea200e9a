//! EDP events client
//!
//! Thin wrapper over the Event Data Platform ingestion endpoint. A request
//! is prepared per tenant and sent with bounded retry; each attempt
//! records its latency with the response status, using a placeholder for
//! the tenant in the URL label to bound metric cardinality.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::observability::KmcMetrics;

const USER_AGENT_KMC: &str = "kyma-metrics-collector";
const CONTENT_TYPE_JSON: &str = "application/json;charset=utf-8";
const TENANT_ID_PLACEHOLDER: &str = "<subAccountId>";
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Settings for the EDP client, bound from the environment. The token is
/// filled in from the mounted credentials file after binding.
#[derive(Debug, Clone, Deserialize)]
pub struct EdpConfig {
    pub url: String,
    pub namespace: String,
    pub data_stream_name: String,
    pub data_stream_version: String,
    pub data_stream_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of attempts per event before giving up.
    #[serde(default = "default_event_retry")]
    pub event_retry: usize,

    #[serde(default)]
    pub token: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_event_retry() -> usize {
    5
}

/// A prepared events request for one tenant.
pub struct EdpRequest {
    builder: reqwest::RequestBuilder,
    /// URL with the tenant replaced by a placeholder, for metric labels.
    metric_url: String,
}

/// HTTP client for the EDP events endpoint.
pub struct EdpClient {
    http: reqwest::Client,
    config: EdpConfig,
    metrics: KmcMetrics,
}

impl EdpClient {
    pub fn new(config: EdpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to create EDP HTTP client")?;

        Ok(Self {
            http,
            config,
            metrics: KmcMetrics::new(),
        })
    }

    fn events_url(&self, data_tenant: &str) -> String {
        format!(
            "{}/namespaces/{}/dataStreams/{}/{}/dataTenants/{}/{}/events",
            self.config.url,
            self.config.namespace,
            self.config.data_stream_name,
            self.config.data_stream_version,
            data_tenant,
            self.config.data_stream_env,
        )
    }

    /// Build the POST request for one tenant, headers included.
    pub fn new_request(&self, data_tenant: &str) -> EdpRequest {
        let builder = self
            .http
            .post(self.events_url(data_tenant))
            .header(USER_AGENT, USER_AGENT_KMC)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.token));

        EdpRequest {
            builder,
            metric_url: self.events_url(TENANT_ID_PLACEHOLDER),
        }
    }

    /// Send the payload, retrying up to the configured attempt count with
    /// a fixed delay. Anything other than `201 Created` counts as a failed
    /// attempt.
    pub async fn send(&self, request: EdpRequest, payload: &[u8]) -> Result<reqwest::Response> {
        let attempts = self.config.event_retry.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let builder = request
                .builder
                .try_clone()
                .context("EDP request cannot be cloned for retry")?
                .body(payload.to_vec());

            let started = Instant::now();
            let result = builder.send().await;
            let duration = started.elapsed().as_secs_f64();

            match result {
                Ok(response) => {
                    let status = response.status();
                    self.metrics
                        .record_edp_latency(duration, status.as_u16(), &request.metric_url);

                    if status == StatusCode::CREATED {
                        debug!(attempt, "sent event stream to EDP");
                        return Ok(response);
                    }

                    warn!(
                        attempt,
                        status = status.as_u16(),
                        "EDP rejected event stream, retrying"
                    );
                    last_error = Some(anyhow::anyhow!(
                        "failed to send event stream as EDP returned HTTP {status}"
                    ));
                }
                Err(err) => {
                    let status = if err.is_timeout() { 408 } else { 400 };
                    self.metrics
                        .record_edp_latency(duration, status, &request.metric_url);

                    warn!(attempt, error = %err, "failed to send event stream to EDP, retrying");
                    last_error = Some(anyhow::Error::new(err).context("failed to POST event to EDP"));
                }
            }

            if attempt < attempts {
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }

        Err(last_error.expect("at least one attempt was made"))
    }
}
