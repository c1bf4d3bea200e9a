//! Core library for the Kyma metrics collector
//!
//! This crate provides the pieces of the metering pipeline:
//! - Discovery of billable runtimes from the environment broker
//! - A delay queue and worker pool for per-runtime scrape cycles
//! - Scanners for the billable resources of a runtime
//! - Conversion and aggregation of scans into EDP billing events
//! - Prometheus metrics and kubeconfig/transport handling

pub mod clients;
pub mod collector;
pub mod edp;
pub mod filter;
pub mod keb;
pub mod kubeconfig;
pub mod models;
pub mod observability;
pub mod process;
pub mod quantity;
pub mod queue;
pub mod registry;
pub mod scanner;
pub mod specs;

pub use collector::Collector;
pub use models::{Measurement, ProviderType, RuntimeInfo};
pub use observability::KmcMetrics;
pub use process::Process;
pub use registry::{RuntimeRecord, RuntimeRegistry};
pub use scanner::{Scan, ScanMap, Scanner, ScannerId};
