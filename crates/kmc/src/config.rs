//! Collector configuration
//!
//! CLI flags for the process itself; KEB and EDP client settings come
//! from the environment. The EDP token is read from the mounted
//! credentials file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use kmc_lib::edp::EdpConfig;
use kmc_lib::keb::KebConfig;

const EDP_CREDENTIALS_FILE: &str = "/edp-credentials/token";

/// Kyma metrics collector
#[derive(Debug, Parser)]
#[command(name = "kmc", version, about = "Metering collector for managed Kyma runtimes")]
pub struct Options {
    /// Wait duration between two scrape cycles of one runtime
    #[arg(long, default_value = "3m", value_parser = humantime::parse_duration)]
    pub scrape_interval: Duration,

    /// Number of workers in the pool
    #[arg(long, default_value_t = 5)]
    pub worker_pool_size: usize,

    /// Port serving the metrics and healthz endpoints
    #[arg(long, default_value_t = 8080)]
    pub listen_addr: u16,

    /// Lifetime of cached kubeconfigs before the secret is read again
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    pub kubeconfig_cache_ttl: Duration,

    /// Log level of the application (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Settings controlled by plain environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvConfig {
    /// Path to the public cloud specs JSON.
    pub public_cloud_specs: PathBuf,

    /// Optional path to the global account filter YAML.
    #[serde(default)]
    pub filter_file: Option<PathBuf>,
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("failed to read environment")?
            .try_deserialize()
            .context("PUBLIC_CLOUD_SPECS is not configured")
    }
}

/// KEB client settings from `KEB_*` environment variables.
pub fn load_keb_config() -> Result<KebConfig> {
    config::Config::builder()
        .add_source(config::Environment::with_prefix("KEB").try_parsing(true))
        .build()
        .context("failed to read environment")?
        .try_deserialize()
        .context("failed to load KEB config")
}

/// EDP client settings from `EDP_*` environment variables, with the token
/// filled in from the mounted secret.
pub fn load_edp_config() -> Result<EdpConfig> {
    let mut edp_config: EdpConfig = config::Config::builder()
        .add_source(config::Environment::with_prefix("EDP").try_parsing(true))
        .build()
        .context("failed to read environment")?
        .try_deserialize()
        .context("failed to load EDP config")?;

    edp_config.token = load_edp_token()?;

    Ok(edp_config)
}

fn load_edp_token() -> Result<String> {
    let token = std::fs::read_to_string(EDP_CREDENTIALS_FILE)
        .with_context(|| format!("failed to read EDP token from {EDP_CREDENTIALS_FILE}"))?;

    let token = token.trim_end().to_string();
    if token.is_empty() {
        anyhow::bail!("EDP token file {EDP_CREDENTIALS_FILE} is empty");
    }

    Ok(token)
}
