//! The endpoint contract and the registry that resolves logical names.
//!
//! An [`Endpoint`] is one side of a migration: a storage client bound to a
//! single bucket. The [`EndpointRegistry`] maps operator-facing endpoint
//! names to adapters plus their [`EndpointDescriptor`], and is immutable
//! after construction so it can be shared across workers without locking.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::SystemTime;

use bytes::Bytes;

use crate::{Error, Result};

/// Error codes that mean "the object does not exist".
pub const NOT_FOUND_CODES: &[&str] = &["404", "NoSuchKey", "NotFound"];

/// Error codes that signal transient endpoint-side pressure and are safe to
/// retry with backoff.
pub const THROTTLE_CODES: &[&str] = &["429", "503", "Throttling", "TooManyRequests", "SlowDown"];

/// Map a storage-side error code to the crate error taxonomy.
///
/// Shared by adapters so the copy engine can match on variants instead of
/// inspecting code strings itself.
pub fn classify_error_code(code: &str, key: &str) -> Error {
    if NOT_FOUND_CODES.contains(&code) {
        Error::NotFound(key.to_string())
    } else if THROTTLE_CODES.contains(&code) {
        Error::Throttled(code.to_string())
    } else if code == "AccessDenied" {
        Error::PermissionDenied(key.to_string())
    } else {
        Error::Generic(format!("storage error code {code} for {key}"))
    }
}

/// Transient metadata returned by a HEAD probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Endpoint-assigned object identifier, surrounding quotes stripped.
    pub etag: String,
    /// Object size in bytes.
    pub size: u64,
    /// When the endpoint last saw a write to this object.
    pub last_modified: SystemTime,
}

impl ObjectMeta {
    /// The idempotence predicate: two probes describe the same object when
    /// both ETag and size agree. ETags are only comparable like this because
    /// the copy engine never trusts them across unrelated writes.
    pub fn same_object(&self, other: &ObjectMeta) -> bool {
        self.etag == other.etag && self.size == other.size
    }
}

/// One side of a migration: a storage client bound to a bucket.
///
/// `head` must report absence (`Ok(None)`) for the 404 code family rather
/// than erroring; `delete` surfaces absence as [`Error::NotFound`] and leaves
/// the no-op decision to the caller. Adapters map throttling codes to
/// [`Error::Throttled`] so the copy engine can back off on them.
pub trait Endpoint: Send + Sync + Debug {
    /// Probe an object's metadata, or `None` if it does not exist.
    fn head(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<ObjectMeta>>> + Send;

    /// Fetch the whole object body, buffered.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Bytes>> + Send;

    /// Write the whole object body under `key`.
    fn put(&self, key: &str, body: Bytes) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete the object. Returns [`Error::NotFound`] when it was absent.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Create the backing bucket if missing; success if it already exists.
    fn ensure_bucket(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Operator-facing description of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Logical name producers use in task rows.
    pub name: String,
    /// Whether the endpoint stores objects encrypted at rest. Consulted by
    /// the copy engine when encryption enforcement is on.
    pub is_encrypted: bool,
}

impl EndpointDescriptor {
    pub fn new(name: impl Into<String>, is_encrypted: bool) -> Self {
        Self {
            name: name.into(),
            is_encrypted,
        }
    }
}

#[derive(Debug)]
struct EndpointEntry<E> {
    descriptor: EndpointDescriptor,
    endpoint: E,
}

/// Resolves logical endpoint names to adapters.
///
/// Built once at startup and then only read, so sharing a reference between
/// concurrent workers is safe without further synchronization.
#[derive(Debug, Default)]
pub struct EndpointRegistry<E> {
    entries: HashMap<String, EndpointEntry<E>>,
}

impl<E: Endpoint> EndpointRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register an endpoint under its descriptor's name. Replaces any
    /// previous registration for the same name.
    pub fn register(&mut self, descriptor: EndpointDescriptor, endpoint: E) {
        self.entries.insert(
            descriptor.name.clone(),
            EndpointEntry {
                descriptor,
                endpoint,
            },
        );
    }

    /// Resolve a logical name to its adapter.
    pub fn resolve(&self, name: &str) -> Result<&E> {
        self.entries
            .get(name)
            .map(|entry| &entry.endpoint)
            .ok_or_else(|| Error::UnknownEndpoint(name.to_string()))
    }

    /// Look up the descriptor registered under `name`.
    pub fn descriptor(&self, name: &str) -> Result<&EndpointDescriptor> {
        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| Error::UnknownEndpoint(name.to_string()))
    }

    /// Idempotently create the bucket behind `name`.
    pub async fn ensure_bucket(&self, name: &str) -> Result<()> {
        self.resolve(name)?.ensure_bucket().await
    }

    /// Registered endpoint names, for diagnostics.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
