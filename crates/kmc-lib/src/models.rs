//! Core data models shared across the collection pipeline

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hyperscaler backing a runtime.
///
/// The variant decides which table of the public cloud specs is consulted
/// when node instance types are priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Aws,
    Azure,
    Gcp,
    #[serde(rename = "sapconvergedcloud")]
    SapConvergedCloud,
    /// Provider string reported by KEB that this process does not know.
    /// Node lookups against it always miss; other scanners are unaffected.
    Unknown,
}

impl Default for ProviderType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ProviderType {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "aws" => Self::Aws,
            "azure" => Self::Azure,
            "gcp" => Self::Gcp,
            "sapconvergedcloud" => Self::SapConvergedCloud,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::SapConvergedCloud => "sapconvergedcloud",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one runtime for one processing cycle.
///
/// Doubles as the label set for all per-runtime metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub instance_id: String,
    pub runtime_id: String,
    pub sub_account_id: String,
    pub global_account_id: String,
    pub shoot_name: String,
    pub provider_type: ProviderType,
}

/// Multiset entry of node instance types observed in a runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmType {
    pub name: String,
    pub count: i64,
}

/// Volume capacity summed over all billable volume sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedVolumes {
    pub size_gb_total: i64,
    pub count: i64,
    pub size_gb_rounded: i64,
}

/// Normalized billing record derived from one or more scans.
///
/// This is the wire shape under the `compute` key of the EDP payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub vm_types: Vec<VmType>,
    pub provisioned_cpus: f64,
    pub provisioned_ram_gb: f64,
    pub provisioned_volumes: ProvisionedVolumes,
}

impl Measurement {
    /// Fold another measurement into this one. The operation is associative
    /// and commutative apart from `vm_types` ordering, which the receiver
    /// does not interpret.
    pub fn merge(&mut self, other: Measurement) {
        self.vm_types.extend(other.vm_types);
        self.provisioned_cpus += other.provisioned_cpus;
        self.provisioned_ram_gb += other.provisioned_ram_gb;
        self.provisioned_volumes.size_gb_total += other.provisioned_volumes.size_gb_total;
        self.provisioned_volumes.count += other.provisioned_volumes.count;
        self.provisioned_volumes.size_gb_rounded += other.provisioned_volumes.size_gb_rounded;
    }
}

/// Sum a sequence of measurements into the single aggregate that is published.
pub fn aggregate_measurements(measurements: Vec<Measurement>) -> Measurement {
    let mut aggregated = Measurement::default();
    for m in measurements {
        aggregated.merge(m);
    }

    aggregated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(cpus: f64, ram: f64, total: i64, rounded: i64, count: i64) -> Measurement {
        Measurement {
            vm_types: vec![VmType {
                name: format!("m5.large-{count}"),
                count,
            }],
            provisioned_cpus: cpus,
            provisioned_ram_gb: ram,
            provisioned_volumes: ProvisionedVolumes {
                size_gb_total: total,
                count,
                size_gb_rounded: rounded,
            },
        }
    }

    #[test]
    fn test_provider_type_parse() {
        assert_eq!(ProviderType::parse("aws"), ProviderType::Aws);
        assert_eq!(ProviderType::parse("AZURE"), ProviderType::Azure);
        assert_eq!(
            ProviderType::parse("sapconvergedcloud"),
            ProviderType::SapConvergedCloud
        );
        assert_eq!(ProviderType::parse("openstack"), ProviderType::Unknown);
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let a = measurement(4.0, 16.0, 30, 32, 1);
        let b = measurement(8.0, 32.0, 50, 64, 2);
        let c = measurement(0.0, 0.0, 70, 70, 3);

        let forward = aggregate_measurements(vec![a.clone(), b.clone(), c.clone()]);
        let backward = aggregate_measurements(vec![c, b, a]);

        assert_eq!(forward.provisioned_cpus, backward.provisioned_cpus);
        assert_eq!(forward.provisioned_ram_gb, backward.provisioned_ram_gb);
        assert_eq!(forward.provisioned_volumes, backward.provisioned_volumes);
        assert_eq!(forward.vm_types.len(), backward.vm_types.len());
    }

    #[test]
    fn test_aggregation_sums_volumes_additively() {
        let agg = aggregate_measurements(vec![
            measurement(0.0, 0.0, 30, 32, 1),
            measurement(0.0, 0.0, 70, 70, 3),
        ]);

        assert_eq!(agg.provisioned_volumes.size_gb_total, 100);
        assert_eq!(agg.provisioned_volumes.size_gb_rounded, 102);
        assert_eq!(agg.provisioned_volumes.count, 4);
    }

    #[test]
    fn test_measurement_wire_format() {
        let m = measurement(4.0, 16.0, 30, 32, 1);
        let value = serde_json::to_value(&m).unwrap();

        assert!(value.get("vm_types").is_some());
        assert!(value.get("provisioned_cpus").is_some());
        assert!(value.get("provisioned_ram_gb").is_some());
        let volumes = value.get("provisioned_volumes").unwrap();
        assert!(volumes.get("size_gb_total").is_some());
        assert!(volumes.get("size_gb_rounded").is_some());
        assert!(volumes.get("count").is_some());
    }
}
