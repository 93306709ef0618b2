//! Shared test rig: in-memory endpoints, policy gate, stores, and sinks.
//!
//! Each test binary pulls in what it needs; the rest stays unused.
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use portage::{
    EndpointDescriptor, EndpointRegistry, MemoryEndpoint, MemoryFileMetaStore, MemoryTaskStore,
    PolicyGate, QueueProcessor, RecordingAlerts, RecordingMetrics,
};

/// Logical endpoint names used throughout the tests.
pub const SRC: &str = "s1";
pub const DST: &str = "s2";
pub const PLAIN: &str = "plain";

/// Comfortably past the growing-file window.
pub const SETTLED: Duration = Duration::from_secs(600);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Three in-memory endpoints behind a registry (encrypted source and
/// destination, plus an unencrypted destination) and a fresh policy gate.
pub struct Cluster {
    pub src: MemoryEndpoint,
    pub dst: MemoryEndpoint,
    pub plain: MemoryEndpoint,
    pub endpoints: EndpointRegistry<MemoryEndpoint>,
    pub policy: PolicyGate,
}

pub fn cluster() -> Cluster {
    init_tracing();

    let src = MemoryEndpoint::new();
    let dst = MemoryEndpoint::new();
    let plain = MemoryEndpoint::new();

    let mut endpoints = EndpointRegistry::new();
    endpoints.register(EndpointDescriptor::new(SRC, true), src.clone());
    endpoints.register(EndpointDescriptor::new(DST, true), dst.clone());
    endpoints.register(EndpointDescriptor::new(PLAIN, false), plain.clone());

    Cluster {
        src,
        dst,
        plain,
        endpoints,
        policy: PolicyGate::in_memory(),
    }
}

/// Store `body` under `key` and backdate it past the growing-file window,
/// as a long-settled upload would look.
pub fn seed_settled(endpoint: &MemoryEndpoint, key: &str, body: &[u8]) {
    endpoint.put_bytes(key.to_string(), body.to_vec());
    endpoint.backdate(key, SETTLED);
}

/// Asserts the shape of a version token: 32 lowercase hex characters.
pub fn assert_version_token(token: &str) {
    assert_eq!(token.len(), 32, "version token length: {token:?}");
    assert!(
        token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
        "version token is not lowercase hex: {token:?}"
    );
}

/// The full processing rig around an in-memory cluster.
pub struct Rig {
    pub src: MemoryEndpoint,
    pub dst: MemoryEndpoint,
    pub plain: MemoryEndpoint,
    pub policy: PolicyGate,
    pub tasks: MemoryTaskStore,
    pub files: MemoryFileMetaStore,
    pub metrics: Arc<RecordingMetrics>,
    pub alerts: Arc<RecordingAlerts>,
    pub processor: QueueProcessor<MemoryEndpoint, MemoryTaskStore, MemoryFileMetaStore>,
}

pub fn rig() -> Rig {
    let cluster = cluster();
    let tasks = MemoryTaskStore::new();
    let files = MemoryFileMetaStore::new();
    let metrics = Arc::new(RecordingMetrics::new());
    let alerts = Arc::new(RecordingAlerts::new());

    let processor = QueueProcessor::new(
        cluster.endpoints,
        cluster.policy.clone(),
        tasks.clone(),
        files.clone(),
        metrics.clone(),
        alerts.clone(),
    );

    Rig {
        src: cluster.src,
        dst: cluster.dst,
        plain: cluster.plain,
        policy: cluster.policy,
        tasks,
        files,
        metrics,
        alerts,
        processor,
    }
}
