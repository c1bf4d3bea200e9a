//! Public cloud specification table
//!
//! Read-only lookup from `(provider, vm_type)` to CPU/memory capacity and
//! from Redis tier to storage pricing units. Loaded once at startup from
//! the JSON file named by `PUBLIC_CLOUD_SPECS` and immutable afterwards.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::ProviderType;

/// CPU and memory capacity of one virtual machine type.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Feature {
    pub cpu_cores: f64,
    pub memory: f64,
}

/// Billing units of one managed Redis tier.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RedisInfo {
    pub price_storage_gb: f64,
    pub price_cu: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct Providers {
    #[serde(default)]
    azure: HashMap<String, Feature>,
    #[serde(default)]
    aws: HashMap<String, Feature>,
    #[serde(default)]
    gcp: HashMap<String, Feature>,
    #[serde(default)]
    sapconvergedcloud: HashMap<String, Feature>,
}

/// Immutable spec table for all supported hyperscalers.
#[derive(Debug, Clone, Deserialize)]
pub struct PublicCloudSpecs {
    providers: Providers,
    #[serde(default)]
    redis_tiers: HashMap<String, RedisInfo>,
}

impl PublicCloudSpecs {
    /// Load and validate the spec table. Any missing provider table or an
    /// empty Redis tier table is fatal at startup.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read public cloud specs file {}", path.display()))?;

        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let specs: PublicCloudSpecs =
            serde_json::from_str(data).context("failed to unmarshal public cloud specs")?;

        if specs.redis_tiers.is_empty() {
            anyhow::bail!("public cloud specs do not contain Redis tiers");
        }

        if specs.providers.aws.is_empty() {
            anyhow::bail!("public cloud specs do not contain AWS VM types");
        }

        if specs.providers.azure.is_empty() {
            anyhow::bail!("public cloud specs do not contain Azure VM types");
        }

        if specs.providers.gcp.is_empty() {
            anyhow::bail!("public cloud specs do not contain GCP VM types");
        }

        if specs.providers.sapconvergedcloud.is_empty() {
            anyhow::bail!("public cloud specs do not contain SapConvergedCloud VM types");
        }

        Ok(specs)
    }

    /// Look up the capacity of a VM type. The lookup is case-insensitive on
    /// the type name; an unknown `(provider, vm_type)` combination is absent.
    pub fn feature(&self, provider: ProviderType, vm_type: &str) -> Option<&Feature> {
        let vm_type = vm_type.to_lowercase();

        let table = match provider {
            ProviderType::Aws => &self.providers.aws,
            ProviderType::Azure => &self.providers.azure,
            ProviderType::Gcp => &self.providers.gcp,
            ProviderType::SapConvergedCloud => &self.providers.sapconvergedcloud,
            ProviderType::Unknown => return None,
        };

        table.get(&vm_type)
    }

    /// Look up the billing units of a Redis tier.
    pub fn redis_info(&self, tier: &str) -> Option<&RedisInfo> {
        self.redis_tiers.get(tier)
    }
}

#[cfg(test)]
pub(crate) mod testdata {
    pub(crate) const SPECS_JSON: &str = r#"{
        "providers": {
            "aws": {
                "m5.large": {"cpu_cores": 2, "memory": 8},
                "m5.2xlarge": {"cpu_cores": 8, "memory": 32}
            },
            "azure": {
                "standard_d8_v3": {"cpu_cores": 8, "memory": 32}
            },
            "gcp": {
                "n2-standard-4": {"cpu_cores": 4, "memory": 16}
            },
            "sapconvergedcloud": {
                "g_c2_m8": {"cpu_cores": 2, "memory": 8}
            }
        },
        "redis_tiers": {
            "S1": {"price_storage_gb": 12, "price_cu": 1},
            "P1": {"price_storage_gb": 50, "price_cu": 4}
        }
    }"#;
}
