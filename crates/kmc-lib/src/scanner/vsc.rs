//! Volume snapshot content scanner
//!
//! Bills every snapshot content that is ready to use by its restore size.
//! Contents without a restore size are a soft error: logged, skipped, and
//! the rest of the scan still counts.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{DynamicObject, ListParams};
use serde::Deserialize;
use tracing::warn;

use super::{round_to_storage_factor, Scan, ScanError, Scanner, ScannerId};
use crate::clients::ClusterClients;
use crate::models::{Measurement, RuntimeInfo};
use crate::quantity::gib_from_bytes;

pub struct VscScanner;

impl VscScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VscScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for VscScanner {
    fn id(&self) -> ScannerId {
        ScannerId("vsc")
    }

    async fn scan(
        &self,
        _runtime: &RuntimeInfo,
        clients: &ClusterClients,
    ) -> Result<Arc<dyn Scan>, ScanError> {
        let contents = clients
            .volume_snapshot_contents()
            .list(&ListParams::default())
            .await
            .map_err(|source| ScanError::List {
                resource: "volumesnapshotcontents",
                source,
            })?;

        let contents = contents.items.iter().map(SnapshotObservation::from_object).collect();

        Ok(Arc::new(VscScan { contents }))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotStatus {
    #[serde(default)]
    ready_to_use: Option<bool>,
    /// Restore size in bytes.
    #[serde(default)]
    restore_size: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct SnapshotObservation {
    name: String,
    ready_to_use: bool,
    restore_size: Option<i64>,
}

impl SnapshotObservation {
    fn from_object(object: &DynamicObject) -> Self {
        let status: SnapshotStatus = object
            .data
            .get("status")
            .cloned()
            .and_then(|status| serde_json::from_value(status).ok())
            .unwrap_or_default();

        Self {
            name: object.metadata.name.clone().unwrap_or_default(),
            ready_to_use: status.ready_to_use.unwrap_or(false),
            restore_size: status.restore_size,
        }
    }
}

/// All snapshot contents observed in one listing.
#[derive(Debug)]
pub struct VscScan {
    contents: Vec<SnapshotObservation>,
}

impl Scan for VscScan {
    fn to_edp_measurement(&self) -> anyhow::Result<Measurement> {
        let mut edp = Measurement::default();

        for content in &self.contents {
            if !content.ready_to_use {
                continue;
            }

            let Some(restore_size) = content.restore_size else {
                warn!(name = %content.name, "VolumeSnapshotContent: restoreSize not set");
                continue;
            };

            let size = gib_from_bytes(restore_size);
            edp.provisioned_volumes.size_gb_total += size;
            edp.provisioned_volumes.size_gb_rounded += round_to_storage_factor(size);
            edp.provisioned_volumes.count += 1;
        }

        Ok(edp)
    }
}
