//! Worker pool
//!
//! Each worker drains the queue: resolve the runtime's kubeconfig, build
//! a client bundle for this cycle, run the collector, persist the scan
//! map and requeue after the scrape interval. A subaccount that left the
//! registry is dropped without requeueing; everything else is requeued so
//! the runtime is scraped again.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::Process;
use crate::clients::ClusterClients;
use crate::models::RuntimeInfo;

impl Process {
    pub(crate) async fn run_worker(&self, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let sub_account_id = tokio::select! {
                id = self.queue.get() => id,
                _ = shutdown.recv() => {
                    info!(worker_id, "shutting down worker");
                    return;
                }
            };

            let requeue = self.process_sub_account(&sub_account_id, worker_id).await;
            self.queue.done(&sub_account_id);

            if requeue {
                self.queue.add_after(&sub_account_id, self.scrape_interval);
                debug!(
                    worker_id,
                    sub_account_id = %sub_account_id,
                    requeue_secs = self.scrape_interval.as_secs(),
                    "requeued subaccount"
                );
            }
        }
    }

    /// One scrape cycle for one subaccount. Returns whether to requeue.
    pub(crate) async fn process_sub_account(&self, sub_account_id: &str, worker_id: usize) -> bool {
        if sub_account_id.trim().is_empty() {
            warn!(worker_id, "cannot work with an empty subaccount ID");
            return false;
        }

        debug!(worker_id, sub_account_id = %sub_account_id, "fetched subaccount from queue");

        // discovery removed the runtime: drop it without requeueing
        let Some(record) = self.registry.get(sub_account_id) else {
            info!(
                worker_id,
                sub_account_id = %sub_account_id,
                "subaccount is not trackable anymore, dropping it"
            );
            self.metrics.record_sub_account_processed(
                false,
                &RuntimeInfo {
                    sub_account_id: sub_account_id.to_string(),
                    ..Default::default()
                },
            );
            return false;
        };

        let info = record.info.clone();

        let kubeconfig = match self.kubeconfig_provider.get(&info.runtime_id).await {
            Ok(kubeconfig) => kubeconfig,
            Err(err) => {
                error!(
                    worker_id,
                    sub_account_id = %sub_account_id,
                    runtime_id = %info.runtime_id,
                    error = %err,
                    "failed to resolve kubeconfig"
                );
                self.metrics.record_sub_account_processed(false, &info);
                return true;
            }
        };

        let clients = match ClusterClients::new(&kubeconfig).await {
            Ok(clients) => clients,
            Err(err) => {
                error!(
                    worker_id,
                    sub_account_id = %sub_account_id,
                    error = %err,
                    "failed to build cluster clients from kubeconfig"
                );
                self.metrics.record_sub_account_processed(false, &info);
                return true;
            }
        };

        let (new_scans, result) = self
            .collector
            .collect_and_send(&info, &clients, &record.scan_map)
            .await;

        // the registry write is a no-op when discovery removed the record
        // mid-cycle
        self.registry.update_scan_map(sub_account_id, new_scans);

        // this cycle's transport is not reused
        clients.close_connections();

        match result {
            Ok(()) => {
                info!(
                    worker_id,
                    sub_account_id = %sub_account_id,
                    shoot_name = %info.shoot_name,
                    "sent event stream"
                );
                self.metrics.record_sub_account_processed(true, &info);
                self.metrics.record_sub_account_processed_timestamp(&info);
            }
            Err(err) => {
                error!(
                    worker_id,
                    sub_account_id = %sub_account_id,
                    error = %err,
                    "collection cycle finished with errors"
                );
                self.metrics.record_sub_account_processed(false, &info);
            }
        }

        true
    }
}
