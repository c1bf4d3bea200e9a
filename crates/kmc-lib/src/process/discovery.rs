//! Discovery loop
//!
//! Periodically ingests the runtime catalog from KEB, classifies every
//! entry as trackable or not, and reconciles the registry and queue.
//! Discovery is the only place where runtimes enter or leave the
//! registry; it runs forever and retries after the poll interval when the
//! broker is unreachable.

use std::collections::HashSet;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::tracking::is_runtime_trackable;
use super::Process;
use crate::keb::{RuntimeDto, RuntimesPage};
use crate::models::{ProviderType, RuntimeInfo};
use crate::registry::RuntimeRecord;

fn runtime_info(runtime: &RuntimeDto) -> RuntimeInfo {
    RuntimeInfo {
        instance_id: runtime.instance_id.clone(),
        runtime_id: runtime.runtime_id.clone(),
        sub_account_id: runtime.sub_account_id.clone(),
        global_account_id: runtime.global_account_id.clone(),
        shoot_name: runtime.shoot_name.clone(),
        provider_type: ProviderType::parse(&runtime.provider),
    }
}

impl Process {
    pub(crate) async fn run_discovery(&self, mut shutdown: broadcast::Receiver<()>) {
        let poll_wait = self.keb_client.poll_wait();

        loop {
            match self.keb_client.get_all_runtimes().await {
                Ok(page) => {
                    debug!(count = page.count, "fetched runtimes from KEB");
                    self.populate_registry_and_queue(&page);
                    self.metrics
                        .record_items_in_cache(self.registry.len() as i64);
                }
                Err(err) => {
                    error!(error = %err, "failed to get runtimes from KEB");
                }
            }

            info!(wait_secs = poll_wait.as_secs(), "waiting to poll KEB again");

            tokio::select! {
                _ = tokio::time::sleep(poll_wait) => {}
                _ = shutdown.recv() => {
                    info!("shutting down discovery loop");
                    return;
                }
            }
        }
    }

    /// Reconcile the registry and queue against one catalog snapshot.
    pub(crate) fn populate_registry_and_queue(&self, page: &RuntimesPage) {
        // refill the fetched-clusters series from scratch for this pass
        self.metrics.reset_fetched_clusters();

        let mut seen: HashSet<&str> = HashSet::new();

        for runtime in &page.data {
            if runtime.sub_account_id.is_empty() {
                continue;
            }

            if self.filter.contains(&runtime.global_account_id) {
                debug!(
                    sub_account_id = %runtime.sub_account_id,
                    global_account_id = %runtime.global_account_id,
                    "global account is filtered, skipping runtime"
                );
                continue;
            }

            seen.insert(&runtime.sub_account_id);

            let info = runtime_info(runtime);
            let trackable = is_runtime_trackable(runtime);
            self.metrics.record_fetched_cluster(trackable, &info);

            let existing = self.registry.get(&runtime.sub_account_id);

            if trackable {
                match existing {
                    None => {
                        self.registry.insert(RuntimeRecord::new(info));
                        self.queue.add(&runtime.sub_account_id);
                        debug!(
                            sub_account_id = %runtime.sub_account_id,
                            shoot_name = %runtime.shoot_name,
                            "queued and added to registry"
                        );
                    }
                    Some(record) if record.info.shoot_name == runtime.shoot_name => {}
                    Some(record) => {
                        // shoot was recreated under a new name: reset the
                        // record, keep the existing queue entry
                        self.registry.insert(RuntimeRecord::new(info));
                        debug!(
                            sub_account_id = %runtime.sub_account_id,
                            old_shoot = %record.info.shoot_name,
                            new_shoot = %runtime.shoot_name,
                            "shoot name changed, reset registry record"
                        );

                        if !self.metrics.delete_per_shoot(&record.info) {
                            info!(
                                sub_account_id = %record.info.sub_account_id,
                                "prometheus metrics were not removed for subaccount"
                            );
                        }
                    }
                }

                continue;
            }

            if let Some(record) = existing {
                self.registry.remove(&runtime.sub_account_id);
                debug!(
                    sub_account_id = %runtime.sub_account_id,
                    "runtime no longer trackable, deleted from registry"
                );

                if !self.metrics.delete_per_shoot(&record.info) {
                    info!(
                        sub_account_id = %record.info.sub_account_id,
                        "prometheus metrics were not removed for subaccount"
                    );
                }
            }
        }

        // reclaim subaccounts that disappeared from the catalog entirely
        for record in self.registry.snapshot() {
            if seen.contains(record.info.sub_account_id.as_str()) {
                continue;
            }

            self.registry.remove(&record.info.sub_account_id);
            info!(
                sub_account_id = %record.info.sub_account_id,
                "subaccount is not in the catalog anymore, deleting it from registry"
            );

            if !self.metrics.delete_per_shoot(&record.info) {
                info!(
                    sub_account_id = %record.info.sub_account_id,
                    "prometheus metrics were not removed for subaccount"
                );
            }
        }
    }
}
