//! Kubeconfig provider
//!
//! TTL cache mapping runtime IDs to kubeconfig bytes, populated on demand
//! from secrets in the control-plane cluster. Entry lifetimes carry jitter
//! so that cache expirations do not line up across the fleet. A `get`
//! never returns an expired entry; a miss always forces a fresh secret
//! read.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::observability::KmcMetrics;

/// Namespace where the kubeconfig secrets are stored.
const KCP_NAMESPACE: &str = "kcp-system";
/// Prefix of the kubeconfig secret names.
const KUBECONFIG_SECRET_PREFIX: &str = "kubeconfig-";
/// Secret key holding the kubeconfig.
const CONFIG_KEY: &str = "config";

#[derive(Debug, Error)]
pub enum KubeconfigError {
    #[error("kubeconfig secret for runtime {runtime_id} not found")]
    NotFound { runtime_id: String },

    #[error("not allowed to read kubeconfig secret {secret_name}: {source}")]
    Forbidden {
        secret_name: String,
        source: kube::Error,
    },

    #[error("kubeconfig secret {secret_name} does not include the data key 'config'")]
    MissingConfigKey { secret_name: String },

    #[error("kubeconfig secret {secret_name} includes an empty kubeconfig")]
    Empty { secret_name: String },

    #[error("failed to look up kubeconfig secret {secret_name}: {source}")]
    Api {
        secret_name: String,
        source: kube::Error,
    },
}

struct Entry {
    kubeconfig: Vec<u8>,
    expires_at: Instant,
}

/// TTL cache of per-runtime kubeconfigs backed by secret reads.
pub struct KubeconfigProvider {
    secrets: Api<Secret>,
    cache: tokio::sync::Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    name: String,
    metrics: KmcMetrics,
}

impl KubeconfigProvider {
    /// `client` must be able to read secrets in the control-plane
    /// namespace. `name` identifies this cache in metrics.
    pub fn new(client: kube::Client, ttl: Duration, name: impl Into<String>) -> Self {
        Self {
            secrets: Api::namespaced(client, KCP_NAMESPACE),
            cache: tokio::sync::Mutex::new(HashMap::new()),
            ttl,
            name: name.into(),
            metrics: KmcMetrics::new(),
        }
    }

    /// Fetch the kubeconfig for a runtime, reading the backing secret on a
    /// cache miss. Expired entries are pruned before the lookup.
    pub async fn get(&self, runtime_id: &str) -> Result<Vec<u8>, KubeconfigError> {
        let mut cache = self.cache.lock().await;

        let now = Instant::now();
        cache.retain(|_, entry| entry.expires_at > now);
        self.metrics
            .record_kubeconfig_cache_size(&self.name, cache.len() as i64);

        if let Some(entry) = cache.get(runtime_id) {
            return Ok(entry.kubeconfig.clone());
        }

        info!(runtime_id = %runtime_id, "loading kubeconfig from secret");
        let kubeconfig = self.load_from_secret(runtime_id).await?;

        cache.insert(
            runtime_id.to_string(),
            Entry {
                kubeconfig: kubeconfig.clone(),
                expires_at: Instant::now() + jittered_ttl(self.ttl),
            },
        );
        self.metrics
            .record_kubeconfig_cache_size(&self.name, cache.len() as i64);

        Ok(kubeconfig)
    }

    async fn load_from_secret(&self, runtime_id: &str) -> Result<Vec<u8>, KubeconfigError> {
        let secret_name = format!("{KUBECONFIG_SECRET_PREFIX}{runtime_id}");

        let secret = match self.secrets.get_opt(&secret_name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                debug!(
                    runtime_id = %runtime_id,
                    secret_name = %secret_name,
                    "no kubeconfig secret for runtime"
                );
                return Err(KubeconfigError::NotFound {
                    runtime_id: runtime_id.to_string(),
                });
            }
            Err(kube::Error::Api(response)) if response.code == 403 => {
                error!(
                    runtime_id = %runtime_id,
                    secret_name = %secret_name,
                    error = %response,
                    "not allowed to read kubeconfig secret"
                );
                return Err(KubeconfigError::Forbidden {
                    secret_name,
                    source: kube::Error::Api(response),
                });
            }
            Err(source) => {
                error!(
                    runtime_id = %runtime_id,
                    secret_name = %secret_name,
                    error = %source,
                    "failed to look up kubeconfig secret"
                );
                return Err(KubeconfigError::Api {
                    secret_name,
                    source,
                });
            }
        };

        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_KEY))
            .map(|bytes| bytes.0.clone())
            .ok_or(KubeconfigError::MissingConfigKey {
                secret_name: secret_name.clone(),
            })?;

        if kubeconfig.is_empty() {
            return Err(KubeconfigError::Empty { secret_name });
        }

        Ok(kubeconfig)
    }
}

/// TTLs of three minutes and above get a uniform jitter of up to one third
/// on top, in whole minutes; below that freshness wins over herd spread.
fn jittered_ttl(ttl: Duration) -> Duration {
    if ttl < Duration::from_secs(3 * 60) {
        return ttl;
    }

    let ttl_minutes = ttl.as_secs() / 60;
    let buffer = ttl_minutes / 3;
    let jitter = time_jitter(buffer);

    Duration::from_secs((ttl_minutes + jitter) * 60)
}

/// Pseudo-random value in [0, max) derived from the clock; good enough to
/// desynchronize cache expirations without a RNG dependency.
fn time_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    nanos % max
}
