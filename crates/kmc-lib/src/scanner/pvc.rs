//! Persistent volume claim scanner
//!
//! Lists claims cluster-wide and bills the bound ones. Claims managed by
//! the cloud-manager NFS backend are billed at three times their capacity
//! to compensate for the higher price, with an optional capacity override
//! label taking precedence over the reported status capacity.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::ListParams;
use kube::ResourceExt;

use super::{round_to_storage_factor, Scan, ScanError, Scanner, ScannerId};
use crate::clients::ClusterClients;
use crate::models::{Measurement, RuntimeInfo};
use crate::quantity::{gib_from_milli, parse_quantity_milli};

const NFS_LABELS: [(&str, &str); 3] = [
    ("app.kubernetes.io/component", "cloud-manager"),
    ("app.kubernetes.io/part-of", "kyma"),
    ("app.kubernetes.io/managed-by", "cloud-manager"),
];

const NFS_CAPACITY_LABEL: &str = "cloud-resources.kyma-project.io/nfsVolumeStorageCapacity";

/// NFS capacity is billed at three times the provisioned size.
const NFS_PRICE_MULTIPLIER: i64 = 3;

const PHASE_BOUND: &str = "Bound";

pub struct PvcScanner;

impl PvcScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PvcScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for PvcScanner {
    fn id(&self) -> ScannerId {
        ScannerId("pvc")
    }

    async fn scan(
        &self,
        _runtime: &RuntimeInfo,
        clients: &ClusterClients,
    ) -> Result<Arc<dyn Scan>, ScanError> {
        let pvcs = clients
            .persistent_volume_claims()
            .list(&ListParams::default())
            .await
            .map_err(|source| ScanError::List {
                resource: "persistentvolumeclaims",
                source,
            })?;

        let claims = pvcs.items.iter().map(ClaimObservation::from_pvc).collect();

        Ok(Arc::new(PvcScan { claims }))
    }
}

/// The billing-relevant slice of one claim.
#[derive(Debug, Clone)]
struct ClaimObservation {
    bound: bool,
    nfs: bool,
    /// From `.status.capacity.storage`, in milli-units.
    capacity_milli: Option<i64>,
    /// Raw value of the NFS capacity override label, if present.
    capacity_override: Option<String>,
}

impl ClaimObservation {
    fn from_pvc(pvc: &PersistentVolumeClaim) -> Self {
        let labels = pvc.labels();
        let nfs = NFS_LABELS
            .iter()
            .all(|(key, value)| labels.get(*key).map(String::as_str) == Some(*value));

        let status = pvc.status.as_ref();
        let bound = status.and_then(|s| s.phase.as_deref()) == Some(PHASE_BOUND);
        let capacity_milli = status
            .and_then(|s| s.capacity.as_ref())
            .and_then(|capacity: &BTreeMap<_, _>| capacity.get("storage"))
            .and_then(|quantity| parse_quantity_milli(&quantity.0));

        Self {
            bound,
            nfs,
            capacity_milli,
            capacity_override: labels.get(NFS_CAPACITY_LABEL).cloned(),
        }
    }

    fn size_gb(&self) -> i64 {
        let mut milli = self.capacity_milli.unwrap_or(0);

        // the override label is the primary source of truth, when parseable
        if self.nfs {
            if let Some(from_label) = self
                .capacity_override
                .as_deref()
                .and_then(parse_quantity_milli)
            {
                milli = from_label;
            }
        }

        gib_from_milli(milli)
    }
}

/// All claims observed in one listing.
#[derive(Debug)]
pub struct PvcScan {
    claims: Vec<ClaimObservation>,
}

impl Scan for PvcScan {
    fn to_edp_measurement(&self) -> anyhow::Result<Measurement> {
        let mut edp = Measurement::default();

        for claim in &self.claims {
            if !claim.bound {
                continue;
            }

            let mut size = claim.size_gb();
            if claim.nfs {
                size *= NFS_PRICE_MULTIPLIER;
            }

            edp.provisioned_volumes.size_gb_total += size;
            edp.provisioned_volumes.size_gb_rounded += round_to_storage_factor(size);
            edp.provisioned_volumes.count += 1;
        }

        Ok(edp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(
        bound: bool,
        nfs: bool,
        capacity: Option<&str>,
        capacity_override: Option<&str>,
    ) -> ClaimObservation {
        ClaimObservation {
            bound,
            nfs,
            capacity_milli: capacity.and_then(parse_quantity_milli),
            capacity_override: capacity_override.map(String::from),
        }
    }

    fn measure(claims: Vec<ClaimObservation>) -> Measurement {
        PvcScan { claims }.to_edp_measurement().unwrap()
    }

    #[test]
    fn test_plain_bound_claim() {
        let edp = measure(vec![claim(true, false, Some("20Gi"), None)]);

        assert_eq!(edp.provisioned_volumes.size_gb_total, 20);
        assert_eq!(edp.provisioned_volumes.size_gb_rounded, 32);
        assert_eq!(edp.provisioned_volumes.count, 1);
    }

    #[test]
    fn test_unbound_claims_are_ignored() {
        let edp = measure(vec![
            claim(false, false, Some("20Gi"), None),
            claim(false, true, Some("10Gi"), None),
        ]);

        assert_eq!(edp.provisioned_volumes, Default::default());
    }

    #[test]
    fn test_nfs_claim_is_tripled() {
        let edp = measure(vec![claim(true, true, Some("10Gi"), None)]);

        assert_eq!(edp.provisioned_volumes.size_gb_total, 30);
        assert_eq!(edp.provisioned_volumes.size_gb_rounded, 32);
        assert_eq!(edp.provisioned_volumes.count, 1);
    }

    #[test]
    fn test_nfs_override_label_wins() {
        let edp = measure(vec![claim(true, true, Some("10Gi"), Some("40Gi"))]);

        assert_eq!(edp.provisioned_volumes.size_gb_total, 120);
        assert_eq!(edp.provisioned_volumes.size_gb_rounded, 128);
        assert_eq!(edp.provisioned_volumes.count, 1);
    }

    #[test]
    fn test_unparseable_override_falls_back_to_status_capacity() {
        let edp = measure(vec![claim(true, true, Some("10Gi"), Some("not a quantity"))]);

        assert_eq!(edp.provisioned_volumes.size_gb_total, 30);
        assert_eq!(edp.provisioned_volumes.size_gb_rounded, 32);
        assert_eq!(edp.provisioned_volumes.count, 1);
    }

    #[test]
    fn test_override_label_is_ignored_for_non_nfs_claims() {
        let edp = measure(vec![claim(true, false, Some("10Gi"), Some("40Gi"))]);

        assert_eq!(edp.provisioned_volumes.size_gb_total, 10);
    }

    #[test]
    fn test_rounded_is_multiple_of_32_and_not_below_total() {
        let edp = measure(vec![
            claim(true, false, Some("20Gi"), None),
            claim(true, false, Some("33Gi"), None),
            claim(true, true, Some("5Gi"), None),
        ]);

        assert!(edp.provisioned_volumes.size_gb_rounded % 32 == 0);
        assert!(edp.provisioned_volumes.size_gb_rounded >= edp.provisioned_volumes.size_gb_total);
    }

    #[test]
    fn test_from_pvc_extracts_labels_and_capacity() {
        use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
        use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

        let mut pvc = PersistentVolumeClaim::default();
        pvc.metadata.labels = Some(
            [
                ("app.kubernetes.io/component", "cloud-manager"),
                ("app.kubernetes.io/part-of", "kyma"),
                ("app.kubernetes.io/managed-by", "cloud-manager"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        pvc.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            capacity: Some(
                [("storage".to_string(), Quantity("10Gi".to_string()))]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        });

        let observation = ClaimObservation::from_pvc(&pvc);
        assert!(observation.bound);
        assert!(observation.nfs);
        assert_eq!(observation.size_gb(), 10);
    }
}
