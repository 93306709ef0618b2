//! Operator policy: chaos toggles and encryption enforcement.
//!
//! All policy lives in a key-value settings store so it can be flipped at
//! runtime without redeploying workers. [`PolicyGate`] is the typed view the
//! engines consult; it is injected rather than ambient, and tests substitute
//! [`MemorySettings`].

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

/// Settings key holding the comma-joined, sorted set of endpoints currently
/// treated as failed.
pub const CHAOS_FAIL_ENDPOINTS_KEY: &str = "chaos_fail_endpoints";

/// Settings key holding the artificial copy latency in milliseconds.
pub const CHAOS_LATENCY_KEY: &str = "chaos_latency_ms";

/// Settings key holding the encryption enforcement flag.
pub const ENCRYPTION_ENFORCED_KEY: &str = "encryption_enforced";

/// Key-value settings backend the policy gate reads through.
///
/// Reads are point-in-time snapshots; the store provides its own locking.
pub trait SettingsStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

/// In-memory settings store for tests and embedders without a backend.
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.read().expect("poisoned lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.inner
            .write()
            .expect("poisoned lock")
            .insert(key.to_string(), value);
    }
}

/// Typed accessors over the policy settings keys.
///
/// Setters return the new value for echo-back to the operator; getters fall
/// back to safe defaults (empty set, zero latency, enforcement off) when a
/// key is unset or unparseable.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    settings: Arc<dyn SettingsStore>,
}

impl PolicyGate {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    /// A gate over a fresh [`MemorySettings`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySettings::new()))
    }

    // ── Endpoint failure injection ────────────────────────────────────────

    /// Endpoints currently treated as failed, sorted.
    pub fn failed_endpoints(&self) -> Vec<String> {
        self.failed_set().into_iter().collect()
    }

    pub fn is_endpoint_failed(&self, name: &str) -> bool {
        self.failed_set().contains(name)
    }

    /// Mark `name` as failed. Returns the new failure set.
    pub fn fail_endpoint(&self, name: &str) -> Vec<String> {
        let mut current = self.failed_set();
        current.insert(name.to_string());
        self.store_failed_set(&current);
        tracing::info!(endpoint = name, "chaos: endpoint marked failed");
        current.into_iter().collect()
    }

    /// Recover `name`. Returns the new failure set.
    pub fn recover_endpoint(&self, name: &str) -> Vec<String> {
        let mut current = self.failed_set();
        current.remove(name);
        self.store_failed_set(&current);
        tracing::info!(endpoint = name, "chaos: endpoint recovered");
        current.into_iter().collect()
    }

    /// Clear all failure injection. Returns the (empty) failure set.
    pub fn clear_failed_endpoints(&self) -> Vec<String> {
        self.settings.set(CHAOS_FAIL_ENDPOINTS_KEY, String::new());
        Vec::new()
    }

    fn failed_set(&self) -> BTreeSet<String> {
        self.settings
            .get(CHAOS_FAIL_ENDPOINTS_KEY)
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn store_failed_set(&self, set: &BTreeSet<String>) {
        // Sorted join keeps the serialized form stable across writers.
        let joined = set.iter().cloned().collect::<Vec<_>>().join(",");
        self.settings.set(CHAOS_FAIL_ENDPOINTS_KEY, joined);
    }

    // ── Latency injection ─────────────────────────────────────────────────

    /// Artificial latency applied before copy I/O, in milliseconds.
    pub fn latency_ms(&self) -> u64 {
        self.settings
            .get(CHAOS_LATENCY_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Set the artificial copy latency. Returns the new value.
    pub fn set_latency_ms(&self, ms: u64) -> u64 {
        self.settings.set(CHAOS_LATENCY_KEY, ms.to_string());
        tracing::info!(latency_ms = ms, "chaos: copy latency updated");
        ms
    }

    // ── Encryption enforcement ────────────────────────────────────────────

    /// Whether copies may only target encrypted destinations.
    pub fn encryption_enforced(&self) -> bool {
        self.settings
            .get(ENCRYPTION_ENFORCED_KEY)
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
    }

    /// Toggle encryption enforcement. Returns the new value.
    pub fn set_encryption_enforced(&self, enforced: bool) -> bool {
        self.settings
            .set(ENCRYPTION_ENFORCED_KEY, enforced.to_string());
        tracing::info!(enforced, "encryption enforcement updated");
        enforced
    }
}
