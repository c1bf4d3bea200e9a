//! Managed Redis scanner
//!
//! Lists the AWS, Azure and GCP Redis instance custom resources and bills
//! each instance by its tier's storage units. Redis storage is not
//! rounded. An absent CRD means no such resource exists in the runtime,
//! not a failure.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, ListParams};
use tracing::warn;

use super::{Scan, ScanError, Scanner, ScannerId};
use crate::clients::ClusterClients;
use crate::models::{Measurement, RuntimeInfo};
use crate::specs::PublicCloudSpecs;

const CLOUD_RESOURCES_GROUP: &str = "cloud-resources.kyma-project.io";
const CLOUD_RESOURCES_VERSION: &str = "v1beta1";

fn redis_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: CLOUD_RESOURCES_GROUP.to_string(),
        version: CLOUD_RESOURCES_VERSION.to_string(),
        api_version: format!("{CLOUD_RESOURCES_GROUP}/{CLOUD_RESOURCES_VERSION}"),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

pub struct RedisScanner {
    specs: Arc<PublicCloudSpecs>,
}

impl RedisScanner {
    pub fn new(specs: Arc<PublicCloudSpecs>) -> Self {
        Self { specs }
    }

    /// List one Redis instance kind, treating an absent CRD as empty.
    async fn list_tiers(
        &self,
        clients: &ClusterClients,
        resource: &ApiResource,
    ) -> Result<Vec<String>, ScanError> {
        let list = match clients.dynamic(resource).list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(response)) if response.code == 404 => {
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(ScanError::List {
                    resource: "redisinstances",
                    source,
                });
            }
        };

        Ok(list.items.iter().map(redis_tier).collect())
    }
}

fn redis_tier(object: &DynamicObject) -> String {
    object
        .data
        .get("spec")
        .and_then(|spec| spec.get("redisTier"))
        .and_then(|tier| tier.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Scanner for RedisScanner {
    fn id(&self) -> ScannerId {
        ScannerId("redis")
    }

    async fn scan(
        &self,
        _runtime: &RuntimeInfo,
        clients: &ClusterClients,
    ) -> Result<Arc<dyn Scan>, ScanError> {
        let aws = redis_resource("AwsRedisInstance", "awsredisinstances");
        let azure = redis_resource("AzureRedisInstance", "azureredisinstances");
        let gcp = redis_resource("GcpRedisInstance", "gcpredisinstances");

        let mut tiers = Vec::new();
        tiers.extend(self.list_tiers(clients, &aws).await?);
        tiers.extend(self.list_tiers(clients, &azure).await?);
        tiers.extend(self.list_tiers(clients, &gcp).await?);

        Ok(Arc::new(RedisScan {
            specs: self.specs.clone(),
            tiers,
        }))
    }
}

/// Tiers of all Redis instances observed in one listing, across providers.
#[derive(Debug)]
pub struct RedisScan {
    specs: Arc<PublicCloudSpecs>,
    tiers: Vec<String>,
}

impl RedisScan {
    #[cfg(test)]
    pub(crate) fn for_test(specs: Arc<PublicCloudSpecs>, tiers: Vec<String>) -> Self {
        Self { specs, tiers }
    }
}

impl Scan for RedisScan {
    fn to_edp_measurement(&self) -> anyhow::Result<Measurement> {
        let mut edp = Measurement::default();

        for tier in &self.tiers {
            let Some(info) = self.specs.redis_info(tier) else {
                warn!(tier = %tier, "Redis tier not defined");
                continue;
            };

            // Redis storage is billed like PVC storage but without rounding
            edp.provisioned_volumes.size_gb_total += info.price_storage_gb as i64;
            edp.provisioned_volumes.size_gb_rounded += info.price_storage_gb as i64;
            edp.provisioned_volumes.count += 1;
        }

        Ok(edp)
    }
}
