//! Scanner abstraction for billable resources
//!
//! A scanner observes one resource class in one runtime at one point in
//! time. The observation (a [`Scan`]) is kept in the runtime registry and
//! converted to a normalized [`Measurement`] separately, so a failed
//! conversion can fall back to the previous observation.

mod node;
mod pvc;
mod redis;
mod vsc;

pub use node::NodeScanner;
pub use pvc::PvcScanner;
pub use redis::RedisScanner;
pub use vsc::VscScanner;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::clients::ClusterClients;
use crate::models::{Measurement, RuntimeInfo};

/// Stable identifier of a scanner, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScannerId(pub &'static str);

impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Last scan per scanner for one runtime. Scans are shared so that the
/// registry record and an in-flight cycle can hold the same observation.
pub type ScanMap = HashMap<ScannerId, Arc<dyn Scan>>;

#[derive(Debug, Error)]
pub enum ScanError {
    /// A cluster reporting zero nodes is not a valid cluster.
    #[error("no nodes found")]
    NoNodesFound,

    #[error("failed to list {resource}: {source}")]
    List {
        resource: &'static str,
        source: kube::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One observation of one resource class, convertible to a measurement.
pub trait Scan: fmt::Debug + Send + Sync {
    /// Convert the captured observation into a normalized measurement.
    /// Deterministic and pure given the observation and the spec table.
    /// Per-item oddities (unknown VM type, missing restore size, unknown
    /// Redis tier) are soft: logged, excluded from the result, and the
    /// remaining items still produce a partial measurement.
    fn to_edp_measurement(&self) -> anyhow::Result<Measurement>;
}

/// Observes one resource class in one runtime.
#[async_trait]
pub trait Scanner: Send + Sync {
    fn id(&self) -> ScannerId;

    /// Take one observation. Must not retry internally; an error means the
    /// observation failed (API error or invalid cluster), never a
    /// downstream conversion issue. Cancellation is propagated by dropping
    /// the returned future.
    async fn scan(
        &self,
        runtime: &RuntimeInfo,
        clients: &ClusterClients,
    ) -> Result<Arc<dyn Scan>, ScanError>;
}

/// Storage sizes are billed in steps of 32 GiB: 17 -> 32, 33 -> 64.
pub(crate) const STORAGE_ROUNDING_FACTOR: i64 = 32;

pub(crate) fn round_to_storage_factor(size: i64) -> i64 {
    ((size as f64 / STORAGE_ROUNDING_FACTOR as f64).ceil() * STORAGE_ROUNDING_FACTOR as f64) as i64
}
