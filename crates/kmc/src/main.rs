//! Kyma metrics collector
//!
//! Discovers billable runtimes from the environment broker, scrapes their
//! billable resources on an interval and publishes one consumption event
//! per runtime per cycle to the Event Data Platform.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kmc_lib::collector::Collector;
use kmc_lib::edp::EdpClient;
use kmc_lib::filter::FilterList;
use kmc_lib::keb::KebClient;
use kmc_lib::kubeconfig::KubeconfigProvider;
use kmc_lib::observability::KmcMetrics;
use kmc_lib::process::Process;
use kmc_lib::queue::DelayQueue;
use kmc_lib::registry::RuntimeRegistry;
use kmc_lib::scanner::{NodeScanner, PvcScanner, RedisScanner, Scanner, VscScanner};
use kmc_lib::specs::PublicCloudSpecs;

mod api;
mod config;

const KUBECONFIG_PROVIDER_NAME: &str = "kubeconfig";

#[tokio::main]
async fn main() -> Result<()> {
    let opts = config::Options::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(opts.log_level.clone())),
        )
        .with(fmt::layer().json())
        .init();

    info!(?opts, "starting kyma-metrics-collector");

    // register all collectors up front; they are never reconfigured
    let _metrics = KmcMetrics::new();

    let env = config::EnvConfig::load()?;

    let specs = Arc::new(
        PublicCloudSpecs::load(&env.public_cloud_specs).context("load public cloud specs")?,
    );

    let filter = match &env.filter_file {
        Some(path) => FilterList::load(path).context("load global account filter")?,
        None => FilterList::empty(),
    };
    info!(filtered_accounts = filter.len(), "loaded global account filter");

    let keb_config = config::load_keb_config()?;
    let keb_client = KebClient::new(&keb_config).context("create KEB client")?;

    let edp_config = config::load_edp_config()?;
    let edp_client = Arc::new(EdpClient::new(edp_config).context("create EDP client")?);

    let kcp_client = kube::Client::try_default()
        .await
        .context("load control-plane cluster config")?;
    let kubeconfig_provider = KubeconfigProvider::new(
        kcp_client,
        opts.kubeconfig_cache_ttl,
        KUBECONFIG_PROVIDER_NAME,
    );

    let scanners: Vec<Arc<dyn Scanner>> = vec![
        Arc::new(NodeScanner::new(specs.clone())),
        Arc::new(PvcScanner::new()),
        Arc::new(VscScanner::new()),
        Arc::new(RedisScanner::new(specs.clone())),
    ];
    let collector = Collector::new(edp_client, scanners);

    let registry = Arc::new(RuntimeRegistry::new());
    let queue = Arc::new(DelayQueue::new("kmc"));

    let process = Arc::new(Process::new(
        keb_client,
        collector,
        kubeconfig_provider,
        registry,
        queue,
        filter,
        opts.scrape_interval,
        opts.worker_pool_size,
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    let process_handle = tokio::spawn(process.start(shutdown_tx.clone()));
    let api_handle = tokio::spawn(api::serve(opts.listen_addr, shutdown_tx.subscribe()));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    let _ = process_handle.await;
    let _ = api_handle.await;

    info!("kyma-metrics-collector stopped");

    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
