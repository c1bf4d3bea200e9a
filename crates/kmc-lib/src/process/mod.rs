//! The collection process
//!
//! Wires discovery and the worker pool around the shared registry and
//! queue. Exactly one discovery task and `worker_pool_size` worker tasks
//! run until shutdown is signalled.

mod discovery;
mod tracking;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::collector::Collector;
use crate::filter::FilterList;
use crate::keb::KebClient;
use crate::kubeconfig::KubeconfigProvider;
use crate::observability::KmcMetrics;
use crate::queue::DelayQueue;
use crate::registry::RuntimeRegistry;

pub struct Process {
    pub(crate) keb_client: KebClient,
    pub(crate) collector: Collector,
    pub(crate) kubeconfig_provider: KubeconfigProvider,
    pub(crate) registry: Arc<RuntimeRegistry>,
    pub(crate) queue: Arc<DelayQueue>,
    pub(crate) filter: FilterList,
    pub(crate) scrape_interval: Duration,
    pub(crate) worker_pool_size: usize,
    pub(crate) metrics: KmcMetrics,
}

impl Process {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keb_client: KebClient,
        collector: Collector,
        kubeconfig_provider: KubeconfigProvider,
        registry: Arc<RuntimeRegistry>,
        queue: Arc<DelayQueue>,
        filter: FilterList,
        scrape_interval: Duration,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            keb_client,
            collector,
            kubeconfig_provider,
            registry,
            queue,
            filter,
            scrape_interval,
            worker_pool_size,
            metrics: KmcMetrics::new(),
        }
    }

    /// Run discovery and the worker pool until shutdown. Returns once
    /// every task has exited.
    pub async fn start(self: Arc<Self>, shutdown: broadcast::Sender<()>) {
        info!(
            workers = self.worker_pool_size,
            scrape_interval_secs = self.scrape_interval.as_secs(),
            "starting collection process"
        );

        let mut tasks = Vec::new();

        {
            let process = self.clone();
            let shutdown = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                process.run_discovery(shutdown).await;
            }));
        }

        for worker_id in 0..self.worker_pool_size {
            let process = self.clone();
            let shutdown = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                process.run_worker(worker_id, shutdown).await;
                debug!(worker_id, "worker exits");
            }));
        }

        for task in tasks {
            let _ = task.await;
        }

        info!("collection process stopped");
    }
}
