//! Collector
//!
//! Runs every registered scanner against one runtime, converts the scans
//! to measurements with last-known-good fallback per scanner, aggregates
//! them into a single event and publishes it to EDP. A cycle where some
//! scanners failed is still published from fallbacks; a cycle with no
//! convertible data at all is not.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

use crate::clients::ClusterClients;
use crate::edp::EdpClient;
use crate::models::{aggregate_measurements, Measurement, RuntimeInfo};
use crate::observability::{KmcMetrics, EDP_BACKEND};
use crate::scanner::{ScanMap, Scanner};

#[derive(Debug, Error)]
#[error("no measurements sent to EDP")]
pub struct NoMeasurementsSent;

/// The event published to EDP for one runtime and one cycle.
#[derive(Debug, Serialize)]
struct Payload<'a> {
    runtime_id: &'a str,
    sub_account_id: &'a str,
    shoot_name: &'a str,
    timestamp: &'a str,
    compute: Measurement,
}

pub struct Collector {
    edp_client: Arc<EdpClient>,
    scanners: Vec<Arc<dyn Scanner>>,
    metrics: KmcMetrics,
}

impl Collector {
    pub fn new(edp_client: Arc<EdpClient>, scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self {
            edp_client,
            scanners,
            metrics: KmcMetrics::new(),
        }
    }

    /// Run one full cycle for a runtime. Returns the scan map to persist
    /// as the new last-known-good state together with everything that went
    /// wrong during execute, convert or publish.
    pub async fn collect_and_send(
        &self,
        runtime: &RuntimeInfo,
        clients: &ClusterClients,
        previous_scans: &ScanMap,
    ) -> (ScanMap, anyhow::Result<()>) {
        let span = info_span!(
            "collect_scans_and_send_measurements",
            instance_id = %runtime.instance_id,
            runtime_id = %runtime.runtime_id,
            sub_account_id = %runtime.sub_account_id,
            global_account_id = %runtime.global_account_id,
            shoot_name = %runtime.shoot_name,
            provider = %runtime.provider_type,
        );

        self.run_cycle(runtime, clients, previous_scans)
            .instrument(span)
            .await
    }

    async fn run_cycle(
        &self,
        runtime: &RuntimeInfo,
        clients: &ClusterClients,
        previous_scans: &ScanMap,
    ) -> (ScanMap, anyhow::Result<()>) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let (mut scans, mut errs) = self.execute_scans(runtime, clients, previous_scans).await;

        let (measurements, mut conversion_errs) =
            self.convert_scans(&mut scans, previous_scans, runtime);
        errs.append(&mut conversion_errs);

        if measurements.is_empty() {
            errs.push(NoMeasurementsSent.into());
            return (scans, join_errors(errs));
        }

        let payload = Payload {
            runtime_id: &runtime.runtime_id,
            sub_account_id: &runtime.sub_account_id,
            shoot_name: &runtime.shoot_name,
            timestamp: &timestamp,
            compute: aggregate_measurements(measurements),
        };

        if let Err(err) = self.send_payload(&payload, &runtime.sub_account_id).await {
            errs.push(err.context("failed to send payload to EDP"));
        }

        (scans, join_errors(errs))
    }

    /// Execute phase: every scanner takes one observation. A failed scan
    /// falls back to the previous observation when one exists, otherwise
    /// the scanner is left out of the map.
    async fn execute_scans(
        &self,
        runtime: &RuntimeInfo,
        clients: &ClusterClients,
        previous_scans: &ScanMap,
    ) -> (ScanMap, Vec<anyhow::Error>) {
        let mut scans = ScanMap::new();
        let mut errs = Vec::new();

        for scanner in &self.scanners {
            let id = scanner.id();

            match scanner.scan(runtime, clients).await {
                Ok(scan) => {
                    self.metrics.record_scan(true, id.0, runtime);
                    scans.insert(id, scan);
                }
                Err(err) => {
                    self.metrics.record_scan(false, id.0, runtime);
                    errs.push(anyhow::anyhow!("scanner {id} failed during scanning: {err}"));

                    if let Some(previous) = previous_scans.get(&id) {
                        scans.insert(id, previous.clone());
                    }
                }
            }
        }

        (scans, errs)
    }

    /// Convert phase: turn each scan into a measurement. When a fresh scan
    /// does not convert, the previous scan is tried and, if it converts,
    /// overwrites the fresh one in the map so the persisted state stays
    /// convertible.
    fn convert_scans(
        &self,
        scans: &mut ScanMap,
        previous_scans: &ScanMap,
        runtime: &RuntimeInfo,
    ) -> (Vec<Measurement>, Vec<anyhow::Error>) {
        let mut measurements = Vec::new();
        let mut errs = Vec::new();

        for scanner in &self.scanners {
            let id = scanner.id();
            let Some(scan) = scans.get(&id) else {
                continue;
            };

            match scan.to_edp_measurement() {
                Ok(measurement) => {
                    self.metrics
                        .record_scan_conversion(true, id.0, EDP_BACKEND, runtime);
                    measurements.push(measurement);
                }
                Err(err) => {
                    self.metrics
                        .record_scan_conversion(false, id.0, EDP_BACKEND, runtime);
                    errs.push(anyhow::anyhow!(
                        "failed to convert scan to an EDP measurement for scanner {id}: {err}"
                    ));

                    let Some(previous) = previous_scans.get(&id) else {
                        warn!(scanner = %id, "no previous scan to fall back to");
                        continue;
                    };

                    match previous.to_edp_measurement() {
                        Ok(measurement) => {
                            measurements.push(measurement);
                            scans.insert(id, previous.clone());
                        }
                        Err(err) => {
                            errs.push(anyhow::anyhow!(
                                "failed to convert previous scan for scanner {id}: {err}"
                            ));
                        }
                    }
                }
            }
        }

        (measurements, errs)
    }

    async fn send_payload(
        &self,
        payload: &Payload<'_>,
        sub_account_id: &str,
    ) -> anyhow::Result<()> {
        let body = serde_json::to_vec(payload)?;

        let request = self.edp_client.new_request(sub_account_id);
        let response = self.edp_client.send(request, &body).await?;

        if !response.status().is_success() {
            anyhow::bail!(
                "failed to send payload to EDP as it returned HTTP status code {}",
                response.status()
            );
        }

        Ok(())
    }
}

fn join_errors(errs: Vec<anyhow::Error>) -> anyhow::Result<()> {
    if errs.is_empty() {
        return Ok(());
    }

    let joined = errs
        .iter()
        .map(|e| format!("{e:#}"))
        .collect::<Vec<_>>()
        .join("; ");

    Err(anyhow::anyhow!(joined))
}
