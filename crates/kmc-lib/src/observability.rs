//! Prometheus metrics for the collector process
//!
//! All series live under the `kmc` namespace and are registered once into
//! the default registry. Components hold a lightweight cloneable handle;
//! the underlying collectors are a process-wide singleton that is never
//! reconfigured after startup.

use std::sync::OnceLock;

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, GaugeVec, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
};

use crate::models::RuntimeInfo;

/// Histogram buckets for outbound HTTP request latencies (in seconds).
const REQUEST_LATENCY_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 7.5, 10.0];

/// Resource names of the built-in scanners; used to enumerate label values
/// when per-shoot series are deleted.
pub const SCANNER_RESOURCES: &[&str] = &["node", "pvc", "vsc", "redis"];

/// Backend name used on conversion metrics.
pub const EDP_BACKEND: &str = "edp";

static GLOBAL_METRICS: OnceLock<KmcMetricsInner> = OnceLock::new();

struct KmcMetricsInner {
    items_in_cache: IntGauge,
    fetched_clusters: IntCounterVec,
    sub_account_processed: IntCounterVec,
    sub_account_processed_timestamp: GaugeVec,
    scans_total: IntCounterVec,
    scans_converted_total: IntCounterVec,
    edp_request_duration: HistogramVec,
    keb_request_duration: HistogramVec,
    kubeconfig_cache_size: IntGaugeVec,
    tls_cache_creates: IntCounterVec,
    tls_cache_entries: IntGauge,
    queue_depth: IntGaugeVec,
    queue_adds: IntCounterVec,
    queue_latency: HistogramVec,
    queue_work_duration: HistogramVec,
    queue_unfinished_work: GaugeVec,
    queue_longest_running: GaugeVec,
    queue_retries: IntCounterVec,
}

impl KmcMetricsInner {
    fn new() -> Self {
        let shoot_labels = [
            "shoot_name",
            "instance_id",
            "runtime_id",
            "sub_account_id",
            "global_account_id",
        ];

        let queue_buckets = prometheus::exponential_buckets(1e-8, 10.0, 10)
            .expect("Failed to build workqueue buckets");

        Self {
            items_in_cache: register_int_gauge!(
                "kmc_process_items_in_cache",
                "Number of items in the runtime registry."
            )
            .expect("Failed to register items_in_cache"),

            fetched_clusters: register_int_counter_vec!(
                "kmc_process_fetched_clusters_total",
                "All clusters fetched from KEB, including trackable and not trackable.",
                &[
                    "trackable",
                    "shoot_name",
                    "instance_id",
                    "runtime_id",
                    "sub_account_id",
                    "global_account_id"
                ]
            )
            .expect("Failed to register fetched_clusters_total"),

            sub_account_processed: register_int_counter_vec!(
                "kmc_process_sub_account_total",
                "Number of processings per subaccount, including successful and failed.",
                &[
                    "success",
                    "shoot_name",
                    "instance_id",
                    "runtime_id",
                    "sub_account_id",
                    "global_account_id"
                ]
            )
            .expect("Failed to register sub_account_total"),

            sub_account_processed_timestamp: register_gauge_vec!(
                "kmc_process_sub_account_processed_timestamp_seconds",
                "Unix timestamp (in seconds) of last successful processing of subaccount.",
                &shoot_labels
            )
            .expect("Failed to register sub_account_processed_timestamp_seconds"),

            scans_total: register_int_counter_vec!(
                "kmc_collector_scans_total",
                "Total number of scans for each billable resource in a runtime.",
                &[
                    "success",
                    "resource_name",
                    "shoot_name",
                    "instance_id",
                    "runtime_id",
                    "sub_account_id",
                    "global_account_id"
                ]
            )
            .expect("Failed to register scans_total"),

            scans_converted_total: register_int_counter_vec!(
                "kmc_collector_scans_converted_total",
                "Total number of scans converted to the measurement required by the backend.",
                &[
                    "success",
                    "resource_name",
                    "backend_name",
                    "shoot_name",
                    "instance_id",
                    "runtime_id",
                    "sub_account_id",
                    "global_account_id"
                ]
            )
            .expect("Failed to register scans_converted_total"),

            edp_request_duration: register_histogram_vec!(
                "kmc_edp_request_duration_seconds",
                "Duration of HTTP request to EDP in seconds.",
                &["status", "request_url"],
                REQUEST_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register edp_request_duration_seconds"),

            keb_request_duration: register_histogram_vec!(
                "kmc_keb_request_duration_seconds",
                "Duration of HTTP request to KEB in seconds.",
                &["status", "request_url"],
                REQUEST_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register keb_request_duration_seconds"),

            kubeconfig_cache_size: register_int_gauge_vec!(
                "kmc_kubeconfig_cache_size",
                "Number of items in the kubeconfig cache.",
                &["name"]
            )
            .expect("Failed to register kubeconfig_cache_size"),

            tls_cache_creates: register_int_counter_vec!(
                "kmc_tls_cache_create_total",
                "Total number of cluster transport create calls.",
                &["result"]
            )
            .expect("Failed to register tls_cache_create_total"),

            tls_cache_entries: register_int_gauge!(
                "kmc_tls_cache_entries_total",
                "Number of live cluster transports."
            )
            .expect("Failed to register tls_cache_entries_total"),

            queue_depth: register_int_gauge_vec!(
                "kmc_workqueue_depth",
                "Current depth of workqueue.",
                &["name"]
            )
            .expect("Failed to register workqueue_depth"),

            queue_adds: register_int_counter_vec!(
                "kmc_workqueue_adds_total",
                "Total number of adds handled by workqueue.",
                &["name"]
            )
            .expect("Failed to register workqueue_adds_total"),

            queue_latency: register_histogram_vec!(
                "kmc_workqueue_queue_duration_seconds",
                "How long in seconds an item stays in workqueue before being requested.",
                &["name"],
                queue_buckets.clone()
            )
            .expect("Failed to register workqueue_queue_duration_seconds"),

            queue_work_duration: register_histogram_vec!(
                "kmc_workqueue_work_duration_seconds",
                "How long in seconds processing an item from workqueue takes.",
                &["name"],
                queue_buckets
            )
            .expect("Failed to register workqueue_work_duration_seconds"),

            queue_unfinished_work: register_gauge_vec!(
                "kmc_workqueue_unfinished_work_seconds",
                "How many seconds of work is in progress and has not been observed \
                 by work_duration. Large values indicate stuck threads.",
                &["name"]
            )
            .expect("Failed to register workqueue_unfinished_work_seconds"),

            queue_longest_running: register_gauge_vec!(
                "kmc_workqueue_longest_running_processor_seconds",
                "How many seconds the longest running processor has been running.",
                &["name"]
            )
            .expect("Failed to register workqueue_longest_running_processor_seconds"),

            queue_retries: register_int_counter_vec!(
                "kmc_workqueue_retries_total",
                "Total number of retries handled by workqueue.",
                &["name"]
            )
            .expect("Failed to register workqueue_retries_total"),
        }
    }
}

/// Handle to the global metrics. Cheap to clone; all clones share the same
/// underlying collectors.
#[derive(Clone, Default)]
pub struct KmcMetrics {
    _private: (),
}

impl KmcMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(KmcMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static KmcMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    fn shoot_values(info: &RuntimeInfo) -> [&str; 5] {
        [
            &info.shoot_name,
            &info.instance_id,
            &info.runtime_id,
            &info.sub_account_id,
            &info.global_account_id,
        ]
    }

    pub fn record_items_in_cache(&self, count: i64) {
        self.inner().items_in_cache.set(count);
    }

    /// Clear the fetched-clusters counter before a discovery pass refills it.
    pub fn reset_fetched_clusters(&self) {
        self.inner().fetched_clusters.reset();
    }

    pub fn record_fetched_cluster(&self, trackable: bool, info: &RuntimeInfo) {
        let trackable = if trackable { "true" } else { "false" };
        self.inner()
            .fetched_clusters
            .with_label_values(&[
                trackable,
                &info.shoot_name,
                &info.instance_id,
                &info.runtime_id,
                &info.sub_account_id,
                &info.global_account_id,
            ])
            .inc();
    }

    pub fn record_sub_account_processed(&self, success: bool, info: &RuntimeInfo) {
        let success = if success { "true" } else { "false" };
        let shoot = Self::shoot_values(info);
        self.inner()
            .sub_account_processed
            .with_label_values(&[
                success, shoot[0], shoot[1], shoot[2], shoot[3], shoot[4],
            ])
            .inc();
    }

    pub fn record_sub_account_processed_timestamp(&self, info: &RuntimeInfo) {
        let now = chrono::Utc::now().timestamp() as f64;
        self.inner()
            .sub_account_processed_timestamp
            .with_label_values(&Self::shoot_values(info))
            .set(now);
    }

    pub fn record_scan(&self, success: bool, resource: &str, info: &RuntimeInfo) {
        let success = if success { "true" } else { "false" };
        let shoot = Self::shoot_values(info);
        self.inner()
            .scans_total
            .with_label_values(&[
                success, resource, shoot[0], shoot[1], shoot[2], shoot[3], shoot[4],
            ])
            .inc();
    }

    pub fn record_scan_conversion(
        &self,
        success: bool,
        resource: &str,
        backend: &str,
        info: &RuntimeInfo,
    ) {
        let success = if success { "true" } else { "false" };
        let shoot = Self::shoot_values(info);
        self.inner()
            .scans_converted_total
            .with_label_values(&[
                success, resource, backend, shoot[0], shoot[1], shoot[2], shoot[3], shoot[4],
            ])
            .inc();
    }

    /// Delete every series carrying the given runtime's shoot label set.
    /// Rust's prometheus vectors remove by full label values, so the
    /// success/resource/backend dimensions are enumerated explicitly.
    /// Returns true if at least one series was removed.
    pub fn delete_per_shoot(&self, info: &RuntimeInfo) -> bool {
        let inner = self.inner();
        let shoot = Self::shoot_values(info);
        let mut removed = 0usize;

        for success in ["true", "false"] {
            if inner
                .sub_account_processed
                .remove_label_values(&[
                    success, shoot[0], shoot[1], shoot[2], shoot[3], shoot[4],
                ])
                .is_ok()
            {
                removed += 1;
            }

            for resource in SCANNER_RESOURCES {
                if inner
                    .scans_total
                    .remove_label_values(&[
                        success, resource, shoot[0], shoot[1], shoot[2], shoot[3], shoot[4],
                    ])
                    .is_ok()
                {
                    removed += 1;
                }

                if inner
                    .scans_converted_total
                    .remove_label_values(&[
                        success,
                        resource,
                        EDP_BACKEND,
                        shoot[0],
                        shoot[1],
                        shoot[2],
                        shoot[3],
                        shoot[4],
                    ])
                    .is_ok()
                {
                    removed += 1;
                }
            }
        }

        if inner
            .sub_account_processed_timestamp
            .remove_label_values(&shoot)
            .is_ok()
        {
            removed += 1;
        }

        removed > 0
    }

    pub fn record_edp_latency(&self, duration_secs: f64, status: u16, request_url: &str) {
        self.inner()
            .edp_request_duration
            .with_label_values(&[&status.to_string(), request_url])
            .observe(duration_secs);
    }

    pub fn record_keb_latency(&self, duration_secs: f64, status: u16, request_url: &str) {
        self.inner()
            .keb_request_duration
            .with_label_values(&[&status.to_string(), request_url])
            .observe(duration_secs);
    }

    pub fn record_kubeconfig_cache_size(&self, name: &str, size: i64) {
        self.inner()
            .kubeconfig_cache_size
            .with_label_values(&[name])
            .set(size);
    }

    pub fn record_tls_cache_create(&self, result: &str) {
        self.inner().tls_cache_creates.with_label_values(&[result]).inc();
    }

    pub fn inc_tls_cache_entries(&self) {
        self.inner().tls_cache_entries.inc();
    }

    pub fn dec_tls_cache_entries(&self) {
        self.inner().tls_cache_entries.dec();
    }

    pub fn set_queue_depth(&self, name: &str, depth: i64) {
        self.inner().queue_depth.with_label_values(&[name]).set(depth);
    }

    pub fn inc_queue_adds(&self, name: &str) {
        self.inner().queue_adds.with_label_values(&[name]).inc();
    }

    pub fn observe_queue_latency(&self, name: &str, duration_secs: f64) {
        self.inner()
            .queue_latency
            .with_label_values(&[name])
            .observe(duration_secs);
    }

    pub fn observe_queue_work_duration(&self, name: &str, duration_secs: f64) {
        self.inner()
            .queue_work_duration
            .with_label_values(&[name])
            .observe(duration_secs);
    }

    pub fn set_queue_unfinished_work(&self, name: &str, seconds: f64) {
        self.inner()
            .queue_unfinished_work
            .with_label_values(&[name])
            .set(seconds);
    }

    pub fn set_queue_longest_running(&self, name: &str, seconds: f64) {
        self.inner()
            .queue_longest_running
            .with_label_values(&[name])
            .set(seconds);
    }

    pub fn inc_queue_retries(&self, name: &str) {
        self.inner().queue_retries.with_label_values(&[name]).inc();
    }
}
