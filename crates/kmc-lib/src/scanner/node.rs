//! Node scanner
//!
//! Lists node metadata and prices each node by its instance-type label
//! against the public cloud spec table.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ListParams;
use tracing::warn;

use super::{Scan, ScanError, Scanner, ScannerId};
use crate::clients::ClusterClients;
use crate::models::{Measurement, ProviderType, RuntimeInfo, VmType};
use crate::specs::PublicCloudSpecs;

const NODE_INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

pub struct NodeScanner {
    specs: Arc<PublicCloudSpecs>,
}

impl NodeScanner {
    pub fn new(specs: Arc<PublicCloudSpecs>) -> Self {
        Self { specs }
    }
}

#[async_trait]
impl Scanner for NodeScanner {
    fn id(&self) -> ScannerId {
        ScannerId("node")
    }

    async fn scan(
        &self,
        runtime: &RuntimeInfo,
        clients: &ClusterClients,
    ) -> Result<Arc<dyn Scan>, ScanError> {
        let nodes = clients
            .nodes()
            .list_metadata(&ListParams::default())
            .await
            .map_err(|source| ScanError::List {
                resource: "nodes",
                source,
            })?;

        // a cluster with no nodes is not a valid cluster
        if nodes.items.is_empty() {
            return Err(ScanError::NoNodesFound);
        }

        let instance_types = nodes
            .items
            .iter()
            .map(|node| {
                node.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(NODE_INSTANCE_TYPE_LABEL))
                    .map(|t| t.to_lowercase())
                    .unwrap_or_default()
            })
            .collect();

        Ok(Arc::new(NodeScan {
            provider: runtime.provider_type,
            specs: self.specs.clone(),
            instance_types,
        }))
    }
}

/// Instance types of all nodes observed in one listing.
#[derive(Debug)]
pub struct NodeScan {
    provider: ProviderType,
    specs: Arc<PublicCloudSpecs>,
    instance_types: Vec<String>,
}

impl NodeScan {
    #[cfg(test)]
    pub(crate) fn for_test(
        provider: ProviderType,
        specs: Arc<PublicCloudSpecs>,
        instance_types: Vec<String>,
    ) -> Self {
        Self {
            provider,
            specs,
            instance_types,
        }
    }
}

impl Scan for NodeScan {
    fn to_edp_measurement(&self) -> anyhow::Result<Measurement> {
        let mut edp = Measurement::default();
        let mut vm_types: BTreeMap<&str, i64> = BTreeMap::new();

        for instance_type in &self.instance_types {
            let Some(feature) = self.specs.feature(self.provider, instance_type) else {
                warn!(
                    provider = %self.provider,
                    node_type = %instance_type,
                    "unknown provider and node type combination"
                );
                continue;
            };

            edp.provisioned_cpus += feature.cpu_cores;
            edp.provisioned_ram_gb += feature.memory;
            *vm_types.entry(instance_type.as_str()).or_insert(0) += 1;
        }

        for (name, count) in vm_types {
            edp.vm_types.push(VmType {
                name: name.to_string(),
                count,
            });
        }

        Ok(edp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Arc<PublicCloudSpecs> {
        Arc::new(
            PublicCloudSpecs::from_json(crate::specs::testdata::SPECS_JSON).unwrap(),
        )
    }

    #[test]
    fn test_sums_cpu_and_memory_per_node() {
        let scan = NodeScan::for_test(
            ProviderType::Aws,
            specs(),
            vec!["m5.large".into(), "m5.large".into(), "m5.2xlarge".into()],
        );

        let edp = scan.to_edp_measurement().unwrap();
        assert_eq!(edp.provisioned_cpus, 12.0);
        assert_eq!(edp.provisioned_ram_gb, 48.0);
    }

    #[test]
    fn test_vm_types_multiset_counts_known_nodes() {
        let scan = NodeScan::for_test(
            ProviderType::Aws,
            specs(),
            vec![
                "m5.large".into(),
                "m5.large".into(),
                "m5.2xlarge".into(),
                "mystery.vm".into(),
            ],
        );

        let edp = scan.to_edp_measurement().unwrap();
        let total: i64 = edp.vm_types.iter().map(|v| v.count).sum();
        assert_eq!(total, 3);

        let large = edp.vm_types.iter().find(|v| v.name == "m5.large").unwrap();
        assert_eq!(large.count, 2);
    }

    #[test]
    fn test_unknown_vm_is_soft_and_partial_result_stands() {
        let scan = NodeScan::for_test(
            ProviderType::Aws,
            specs(),
            vec!["m5.large".into(), "mystery.vm".into()],
        );

        let edp = scan.to_edp_measurement().unwrap();
        assert_eq!(edp.provisioned_cpus, 2.0);
        assert_eq!(edp.vm_types.len(), 1);
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let scan = NodeScan::for_test(
            ProviderType::Aws,
            specs(),
            vec!["m5.2xlarge".into(), "m5.large".into()],
        );

        let first = scan.to_edp_measurement().unwrap();
        let second = scan.to_edp_measurement().unwrap();
        assert_eq!(first, second);
    }
}
