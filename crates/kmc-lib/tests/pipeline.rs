//! End-to-end pipeline test
//!
//! Spins up one HTTP server that plays the environment broker, the EDP
//! ingestion endpoint and the Kubernetes API of both the control plane
//! and the runtime, then runs the real process against it: discovery
//! registers the runtime, a worker resolves the kubeconfig from the fake
//! secret, the scanners list the fake resources and the aggregated event
//! lands on the fake EDP endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::broadcast;

use kmc_lib::collector::Collector;
use kmc_lib::edp::{EdpClient, EdpConfig};
use kmc_lib::filter::FilterList;
use kmc_lib::keb::{KebClient, KebConfig};
use kmc_lib::kubeconfig::KubeconfigProvider;
use kmc_lib::process::Process;
use kmc_lib::queue::DelayQueue;
use kmc_lib::registry::RuntimeRegistry;
use kmc_lib::scanner::{NodeScanner, PvcScanner, RedisScanner, Scanner, VscScanner};
use kmc_lib::specs::PublicCloudSpecs;

const SPECS_JSON: &str = r#"{
    "providers": {
        "aws": {"m5.large": {"cpu_cores": 2, "memory": 8}},
        "azure": {"standard_d8_v3": {"cpu_cores": 8, "memory": 32}},
        "gcp": {"n2-standard-4": {"cpu_cores": 4, "memory": 16}},
        "sapconvergedcloud": {"g_c2_m8": {"cpu_cores": 2, "memory": 8}}
    },
    "redis_tiers": {
        "S1": {"price_storage_gb": 12, "price_cu": 1}
    }
}"#;

const GIB: i64 = 1 << 30;

#[derive(Clone, Default)]
struct ServerState {
    /// Payloads received on the EDP events endpoint.
    published: Arc<Mutex<Vec<serde_json::Value>>>,
    /// Number of kubeconfig secret reads.
    secret_reads: Arc<AtomicUsize>,
    /// Kubeconfig served from the fake secret; filled in once the
    /// server address is known.
    kubeconfig: Arc<Mutex<String>>,
}

fn kubeconfig_for(addr: &str) -> String {
    format!(
        r"
apiVersion: v1
kind: Config
clusters:
- name: fake
  cluster:
    server: http://{addr}
contexts:
- name: fake
  context:
    cluster: fake
    user: fake
current-context: fake
users:
- name: fake
  user:
    token: fake-token
"
    )
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": "the server could not find the requested resource",
            "reason": "NotFound",
            "code": 404
        })),
    )
}

async fn keb_runtimes() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": [{
            "instanceID": "instance-1",
            "runtimeID": "runtime-1",
            "subAccountID": "sub-1",
            "globalAccountID": "global-1",
            "shootName": "shoot-a",
            "provider": "aws",
            "status": {
                "provisioning": {
                    "state": "succeeded",
                    "createdAt": "2024-01-01T10:00:00Z"
                }
            }
        }],
        "count": 1,
        "totalCount": 1
    }))
}

async fn edp_events(
    State(state): State<ServerState>,
    body: String,
) -> StatusCode {
    let payload: serde_json::Value = serde_json::from_str(&body).expect("EDP payload is JSON");
    state.published.lock().unwrap().push(payload);
    StatusCode::CREATED
}

async fn kubeconfig_secret(State(state): State<ServerState>) -> Json<serde_json::Value> {
    state.secret_reads.fetch_add(1, Ordering::SeqCst);
    let kubeconfig = state.kubeconfig.lock().unwrap().clone();

    Json(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": "kubeconfig-runtime-1", "namespace": "kcp-system"},
        "data": {"config": BASE64.encode(kubeconfig.as_bytes())}
    }))
}

async fn broken_secret() -> Json<serde_json::Value> {
    // a secret without the expected data key
    Json(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": "kubeconfig-runtime-broken", "namespace": "kcp-system"},
        "data": {"wrong-key": BASE64.encode(b"whatever")}
    }))
}

async fn list_nodes() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "kind": "NodeList",
        "apiVersion": "v1",
        "metadata": {},
        "items": [
            {"metadata": {"name": "node-1", "labels": {"node.kubernetes.io/instance-type": "m5.large"}}},
            {"metadata": {"name": "node-2", "labels": {"node.kubernetes.io/instance-type": "M5.Large"}}}
        ]
    }))
}

async fn list_pvcs() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "kind": "PersistentVolumeClaimList",
        "apiVersion": "v1",
        "metadata": {},
        "items": [
            {
                "metadata": {"name": "data-1", "namespace": "default"},
                "status": {"phase": "Bound", "capacity": {"storage": "20Gi"}}
            },
            {
                "metadata": {
                    "name": "nfs-1",
                    "namespace": "default",
                    "labels": {
                        "app.kubernetes.io/component": "cloud-manager",
                        "app.kubernetes.io/part-of": "kyma",
                        "app.kubernetes.io/managed-by": "cloud-manager"
                    }
                },
                "status": {"phase": "Bound", "capacity": {"storage": "10Gi"}}
            },
            {
                "metadata": {"name": "pending-1", "namespace": "default"},
                "status": {"phase": "Pending"}
            }
        ]
    }))
}

async fn list_vscs() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "kind": "VolumeSnapshotContentList",
        "apiVersion": "snapshot.storage.k8s.io/v1",
        "metadata": {},
        "items": [
            {
                "apiVersion": "snapshot.storage.k8s.io/v1",
                "kind": "VolumeSnapshotContent",
                "metadata": {"name": "snap-1"},
                "spec": {"driver": "fake"},
                "status": {"readyToUse": true, "restoreSize": 40 * GIB}
            },
            {
                "apiVersion": "snapshot.storage.k8s.io/v1",
                "kind": "VolumeSnapshotContent",
                "metadata": {"name": "snap-2"},
                "spec": {"driver": "fake"},
                "status": {"readyToUse": false, "restoreSize": 10 * GIB}
            }
        ]
    }))
}

async fn list_aws_redis() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "kind": "AwsRedisInstanceList",
        "apiVersion": "cloud-resources.kyma-project.io/v1beta1",
        "metadata": {},
        "items": [
            {
                "apiVersion": "cloud-resources.kyma-project.io/v1beta1",
                "kind": "AwsRedisInstance",
                "metadata": {"name": "redis-1", "namespace": "default"},
                "spec": {"redisTier": "S1"}
            }
        ]
    }))
}

/// One server playing every upstream: KEB, EDP, control plane and runtime.
async fn start_fake_upstreams() -> (String, ServerState) {
    let state = ServerState::default();

    let app = Router::new()
        .route("/runtimes", get(keb_runtimes))
        .route(
            "/namespaces/kyma/dataStreams/consumption/v1/dataTenants/:tenant/test/events",
            post(edp_events),
        )
        .route(
            "/api/v1/namespaces/kcp-system/secrets/kubeconfig-runtime-1",
            get(kubeconfig_secret),
        )
        .route(
            "/api/v1/namespaces/kcp-system/secrets/kubeconfig-runtime-broken",
            get(broken_secret),
        )
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/persistentvolumeclaims", get(list_pvcs))
        .route(
            "/apis/snapshot.storage.k8s.io/v1/volumesnapshotcontents",
            get(list_vscs),
        )
        .route(
            "/apis/cloud-resources.kyma-project.io/v1beta1/awsredisinstances",
            get(list_aws_redis),
        )
        // the azure/gcp Redis CRDs are not installed in this runtime
        .fallback(not_found)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    *state.kubeconfig.lock().unwrap() = kubeconfig_for(&addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn control_plane_client(addr: &str) -> kube::Client {
    let kubeconfig = kube::config::Kubeconfig::from_yaml(&kubeconfig_for(addr)).unwrap();
    let config = kube::Config::from_custom_kubeconfig(
        kubeconfig,
        &kube::config::KubeConfigOptions::default(),
    )
    .await
    .unwrap();

    kube::Client::try_from(config).unwrap()
}

fn build_process(addr: &str, kcp_client: kube::Client) -> (Arc<Process>, Arc<RuntimeRegistry>) {
    let specs = Arc::new(PublicCloudSpecs::from_json(SPECS_JSON).unwrap());

    let keb_client = KebClient::new(&KebConfig {
        url: format!("http://{addr}/runtimes"),
        timeout_secs: 5,
        poll_wait_secs: 3600,
    })
    .unwrap();

    let edp_client = Arc::new(
        EdpClient::new(EdpConfig {
            url: format!("http://{addr}"),
            namespace: "kyma".into(),
            data_stream_name: "consumption".into(),
            data_stream_version: "v1".into(),
            data_stream_env: "test".into(),
            timeout_secs: 5,
            event_retry: 1,
            token: "test-token".into(),
        })
        .unwrap(),
    );

    let scanners: Vec<Arc<dyn Scanner>> = vec![
        Arc::new(NodeScanner::new(specs.clone())),
        Arc::new(PvcScanner::new()),
        Arc::new(VscScanner::new()),
        Arc::new(RedisScanner::new(specs)),
    ];

    let registry = Arc::new(RuntimeRegistry::new());

    let process = Arc::new(Process::new(
        keb_client,
        Collector::new(edp_client, scanners),
        KubeconfigProvider::new(kcp_client, Duration::from_secs(600), "pipeline-test"),
        registry.clone(),
        Arc::new(DelayQueue::new("pipeline-test")),
        FilterList::empty(),
        Duration::from_secs(3600),
        1,
    ));

    (process, registry)
}

#[tokio::test]
async fn test_full_pipeline_publishes_aggregated_event() {
    let (addr, state) = start_fake_upstreams().await;
    let kcp_client = control_plane_client(&addr).await;

    let (process, registry) = build_process(&addr, kcp_client);
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(process.start(shutdown_tx.clone()));

    // wait for the first event to land on the fake EDP
    let mut published = None;
    for _ in 0..100 {
        {
            let events = state.published.lock().unwrap();
            if let Some(event) = events.first() {
                published = Some(event.clone());
            }
        }
        if published.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let event = published.expect("no event was published to EDP");

    assert_eq!(event["runtime_id"], "runtime-1");
    assert_eq!(event["sub_account_id"], "sub-1");
    assert_eq!(event["shoot_name"], "shoot-a");
    assert!(event["timestamp"].as_str().unwrap().contains('T'));

    let compute = &event["compute"];

    // two m5.large nodes (one label upper-cased by the cluster)
    assert_eq!(compute["provisioned_cpus"], 4.0);
    assert_eq!(compute["provisioned_ram_gb"], 16.0);

    let vm_types = compute["vm_types"].as_array().unwrap();
    assert_eq!(vm_types.len(), 1);
    assert_eq!(vm_types[0]["name"], "m5.large");
    assert_eq!(vm_types[0]["count"], 2);

    // volumes: plain PVC 20 (rounds 32), NFS PVC 10*3=30 (rounds 32),
    // ready snapshot 40 (rounds 64), Redis S1 12 (no rounding)
    let volumes = &compute["provisioned_volumes"];
    assert_eq!(volumes["size_gb_total"], 102);
    assert_eq!(volumes["size_gb_rounded"], 140);
    assert_eq!(volumes["count"], 4);

    // the runtime keeps its last-known-good scans in the registry; the
    // worker persists them right after the publish, so poll briefly
    let mut scan_map_len = 0;
    for _ in 0..50 {
        if let Some(record) = registry.get("sub-1") {
            scan_map_len = record.scan_map.len();
            if scan_map_len == 4 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(scan_map_len, 4);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn test_kubeconfig_cache_reads_secret_once_within_ttl() {
    let (addr, state) = start_fake_upstreams().await;
    let kcp_client = control_plane_client(&addr).await;

    let provider = KubeconfigProvider::new(kcp_client, Duration::from_secs(600), "cache-test");

    let first = provider.get("runtime-1").await.unwrap();
    let second = provider.get("runtime-1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(state.secret_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_kubeconfig_missing_secret_is_not_found() {
    let (addr, _state) = start_fake_upstreams().await;
    let kcp_client = control_plane_client(&addr).await;

    let provider = KubeconfigProvider::new(kcp_client, Duration::from_secs(600), "missing-test");

    let err = provider.get("runtime-unknown").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_kubeconfig_secret_without_config_key_fails() {
    let (addr, _state) = start_fake_upstreams().await;
    let kcp_client = control_plane_client(&addr).await;

    let provider = KubeconfigProvider::new(kcp_client, Duration::from_secs(600), "broken-test");

    let err = provider.get("runtime-broken").await.unwrap_err();
    assert!(err.to_string().contains("config"));
}
