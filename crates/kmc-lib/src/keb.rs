//! KEB catalog client
//!
//! Fetches the full runtimes page from the environment broker. The
//! discovery loop consumes only the identifiers and the per-runtime
//! operation history; everything else on the page is ignored.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::observability::KmcMetrics;

/// Settings for the KEB client, bound from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct KebConfig {
    /// Full URL of the runtimes endpoint.
    pub url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Wait between two discovery passes, and after a failed fetch.
    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_poll_wait_secs() -> u64 {
    600
}

impl KebConfig {
    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }
}

/// One operation on a runtime, as reported by the broker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A group of operations of one kind, newest last.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationGroup {
    #[serde(default)]
    pub data: Vec<Operation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeStatus {
    #[serde(default)]
    pub provisioning: Option<Operation>,
    #[serde(default)]
    pub deprovisioning: Option<Operation>,
    #[serde(default, rename = "upgradingKyma")]
    pub upgrading_kyma: Option<OperationGroup>,
    #[serde(default, rename = "upgradingCluster")]
    pub upgrading_cluster: Option<OperationGroup>,
    #[serde(default)]
    pub update: Option<OperationGroup>,
    #[serde(default)]
    pub suspension: Option<OperationGroup>,
    #[serde(default)]
    pub unsuspension: Option<OperationGroup>,
}

/// One catalog entry. Only the fields the collector consumes are bound.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeDto {
    #[serde(default, rename = "instanceID")]
    pub instance_id: String,
    #[serde(default, rename = "runtimeID")]
    pub runtime_id: String,
    #[serde(default, rename = "subAccountID")]
    pub sub_account_id: String,
    #[serde(default, rename = "globalAccountID")]
    pub global_account_id: String,
    #[serde(default, rename = "shootName")]
    pub shoot_name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub status: RuntimeStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimesPage {
    #[serde(default)]
    pub data: Vec<RuntimeDto>,
    #[serde(default)]
    pub count: i64,
    #[serde(default, rename = "totalCount")]
    pub total_count: i64,
}

/// HTTP client for the runtimes endpoint.
pub struct KebClient {
    http: reqwest::Client,
    url: Url,
    poll_wait: Duration,
    metrics: KmcMetrics,
}

impl KebClient {
    pub fn new(config: &KebConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to create KEB HTTP client")?;

        let url = Url::parse(&config.url).context("invalid KEB runtimes URL")?;

        Ok(Self {
            http,
            url,
            poll_wait: config.poll_wait(),
            metrics: KmcMetrics::new(),
        })
    }

    pub fn poll_wait(&self) -> Duration {
        self.poll_wait
    }

    /// Fetch the complete catalog, walking pages until `totalCount`
    /// entries are accumulated.
    pub async fn get_all_runtimes(&self) -> Result<RuntimesPage> {
        let mut all = RuntimesPage::default();
        let mut page = 1u64;

        loop {
            let fetched = self.get_runtimes_page(page).await?;
            let page_len = fetched.data.len();

            all.total_count = fetched.total_count;
            all.data.extend(fetched.data);
            all.count = all.data.len() as i64;

            debug!(page, fetched = page_len, total = all.total_count, "fetched runtimes page");

            // an empty page means the broker is done regardless of totalCount
            if page_len == 0 || all.count >= all.total_count {
                return Ok(all);
            }

            page += 1;
        }
    }

    async fn get_runtimes_page(&self, page: u64) -> Result<RuntimesPage> {
        let started = Instant::now();

        let response = self
            .http
            .get(self.url.clone())
            .query(&[("page", page.to_string())])
            .send()
            .await;

        let duration = started.elapsed().as_secs_f64();

        let response = match response {
            Ok(response) => {
                self.metrics
                    .record_keb_latency(duration, response.status().as_u16(), self.url.as_str());
                response
            }
            Err(err) => {
                let status = if err.is_timeout() { 408 } else { 400 };
                self.metrics
                    .record_keb_latency(duration, status, self.url.as_str());
                return Err(err).context("failed to fetch runtimes from KEB");
            }
        };

        let response = response
            .error_for_status()
            .context("KEB returned an error status")?;

        response
            .json::<RuntimesPage>()
            .await
            .context("failed to decode KEB runtimes page")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtimes_page_deserializes_broker_shape() {
        let json = r#"{
            "data": [{
                "instanceID": "instance-1",
                "runtimeID": "runtime-1",
                "subAccountID": "sub-1",
                "globalAccountID": "global-1",
                "shootName": "shoot-a",
                "provider": "AWS",
                "status": {
                    "createdAt": "2024-01-01T10:00:00Z",
                    "provisioning": {
                        "state": "succeeded",
                        "createdAt": "2024-01-01T10:00:00Z"
                    },
                    "update": {
                        "data": [
                            {"state": "succeeded", "createdAt": "2024-01-02T10:00:00Z"}
                        ]
                    }
                }
            }],
            "count": 1,
            "totalCount": 1
        }"#;

        let page: RuntimesPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_count, 1);

        let runtime = &page.data[0];
        assert_eq!(runtime.sub_account_id, "sub-1");
        assert_eq!(runtime.provider, "AWS");
        assert_eq!(
            runtime.status.provisioning.as_ref().unwrap().state,
            "succeeded"
        );
        assert_eq!(runtime.status.update.as_ref().unwrap().data.len(), 1);
    }

    #[test]
    fn test_runtimes_page_tolerates_missing_fields() {
        let page: RuntimesPage = serde_json::from_str(r#"{"data": [{}]}"#).unwrap();

        assert_eq!(page.total_count, 0);
        assert_eq!(page.data[0].sub_account_id, "");
        assert!(page.data[0].status.provisioning.is_none());
    }

    #[tokio::test]
    async fn test_get_all_runtimes_walks_pages() {
        use axum::extract::Query;
        use axum::routing::get;
        use axum::{Json, Router};
        use std::collections::HashMap;

        async fn runtimes(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
            let page: u64 = params
                .get("page")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);

            let sub = format!("sub-{page}");
            Json(serde_json::json!({
                "data": [{"subAccountID": sub, "runtimeID": format!("runtime-{page}")}],
                "count": 1,
                "totalCount": 2
            }))
        }

        let app = Router::new().route("/runtimes", get(runtimes));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = KebClient::new(&KebConfig {
            url: format!("http://{addr}/runtimes"),
            timeout_secs: 5,
            poll_wait_secs: 1,
        })
        .unwrap();

        let page = client.get_all_runtimes().await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.data[0].sub_account_id, "sub-1");
        assert_eq!(page.data[1].sub_account_id, "sub-2");
    }
}
