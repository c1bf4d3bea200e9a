//! Cluster client bundle
//!
//! Every typed view handed to the scanners is an `Api` over the same
//! `kube::Client`, so one runtime cycle owns exactly one HTTP transport
//! and its TLS configuration. Separate clients per view would each cache
//! their own TLS state and leak connections across the fleet. Bundles are
//! built per cycle and never cached; dropping the bundle releases the
//! transport.

use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim};
use kube::api::{ApiResource, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Api;

use crate::observability::KmcMetrics;

/// Shared-transport client bundle for one runtime, for one scrape cycle.
pub struct ClusterClients {
    client: kube::Client,
    metrics: KmcMetrics,
}

impl ClusterClients {
    /// Build the bundle from raw kubeconfig bytes.
    pub async fn new(kubeconfig: &[u8]) -> anyhow::Result<Self> {
        let metrics = KmcMetrics::new();

        match Self::build_client(kubeconfig).await {
            Ok(client) => {
                metrics.record_tls_cache_create("ok");
                metrics.inc_tls_cache_entries();

                Ok(Self { client, metrics })
            }
            Err(err) => {
                metrics.record_tls_cache_create("error");
                Err(err)
            }
        }
    }

    async fn build_client(kubeconfig: &[u8]) -> anyhow::Result<kube::Client> {
        let raw = std::str::from_utf8(kubeconfig)?;
        let kubeconfig = Kubeconfig::from_yaml(raw)?;
        let config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;

        Ok(kube::Client::try_from(config)?)
    }

    pub fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    pub fn persistent_volume_claims(&self) -> Api<PersistentVolumeClaim> {
        Api::all(self.client.clone())
    }

    pub fn volume_snapshot_contents(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &volume_snapshot_content_resource())
    }

    /// Cluster-wide view over a custom resource.
    pub fn dynamic(&self, resource: &ApiResource) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), resource)
    }

    /// Release the transport after a scrape cycle. Dropping the bundle is
    /// what tears down the shared connection pool; this method only makes
    /// the hand-back explicit at the call site.
    pub fn close_connections(self) {
        drop(self);
    }
}

impl Drop for ClusterClients {
    fn drop(&mut self) {
        self.metrics.dec_tls_cache_entries();
    }
}

fn volume_snapshot_content_resource() -> ApiResource {
    ApiResource {
        group: "snapshot.storage.k8s.io".to_string(),
        version: "v1".to_string(),
        api_version: "snapshot.storage.k8s.io/v1".to_string(),
        kind: "VolumeSnapshotContent".to_string(),
        plural: "volumesnapshotcontents".to_string(),
    }
}
