use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::endpoint::{Endpoint, ObjectMeta, classify_error_code};
use crate::{Error, Result};

/// A simple in-memory [`Endpoint`].
///
/// - Objects are raw bytes keyed by string, with content-derived ETags.
/// - Intended for tests, local development, and ephemeral usage.
///
/// Beyond the `Endpoint` contract it offers test controls: metadata editing
/// ([`backdate`](Self::backdate), [`set_etag`](Self::set_etag)), a scripted
/// fault queue replaying storage error codes
/// ([`inject_fault`](Self::inject_fault)), and per-operation call counters
/// ([`op_count`](Self::op_count)).
#[derive(Clone, Default)]
pub struct MemoryEndpoint {
    inner: Arc<Mutex<Inner>>,
}

/// Endpoint operations, for fault scripting and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Head,
    Get,
    Put,
    Delete,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    faults: HashMap<Op, VecDeque<String>>,
    calls: HashMap<Op, u64>,
}

struct StoredObject {
    body: Bytes,
    etag: String,
    last_modified: SystemTime,
}

fn content_etag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl MemoryEndpoint {
    /// Create a new empty in-memory endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `body` under `key` with a content-derived ETag and
    /// `last_modified` of now.
    pub fn put_bytes(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        let body = body.into();
        let etag = content_etag(&body);
        self.inner.lock().expect("poisoned lock").objects.insert(
            key.into(),
            StoredObject {
                body,
                etag,
                last_modified: SystemTime::now(),
            },
        );
    }

    /// Get a copy of the bytes for `key` (useful for tests).
    pub fn get_bytes(&self, key: &str) -> Result<Bytes> {
        let inner = self.inner.lock().expect("poisoned lock");
        inner
            .objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Returns true if `key` is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .expect("poisoned lock")
            .objects
            .contains_key(key)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("poisoned lock").objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shift `key`'s `last_modified` into the past by `age`. Panics if the
    /// object is missing; test-only convenience.
    pub fn backdate(&self, key: &str, age: Duration) {
        let mut inner = self.inner.lock().expect("poisoned lock");
        let object = inner.objects.get_mut(key).expect("no such object");
        object.last_modified = SystemTime::now() - age;
    }

    /// Override `key`'s ETag. Panics if the object is missing; test-only
    /// convenience.
    pub fn set_etag(&self, key: &str, etag: impl Into<String>) {
        let mut inner = self.inner.lock().expect("poisoned lock");
        inner.objects.get_mut(key).expect("no such object").etag = etag.into();
    }

    /// Script the next call of `op` to fail with the storage error `code`.
    /// Repeated calls queue up; codes are consumed front-to-back.
    pub fn inject_fault(&self, op: Op, code: impl Into<String>) {
        self.inner
            .lock()
            .expect("poisoned lock")
            .faults
            .entry(op)
            .or_default()
            .push_back(code.into());
    }

    /// How many times `op` has been invoked, scripted failures included.
    pub fn op_count(&self, op: Op) -> u64 {
        self.inner
            .lock()
            .expect("poisoned lock")
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Count the call and replay a scripted fault, if one is queued.
    fn begin(&self, op: Op, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        *inner.calls.entry(op).or_insert(0) += 1;
        match inner.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(code) => Err(classify_error_code(&code, key)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MemoryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid dumping potentially large in-memory contents.
        f.debug_struct("MemoryEndpoint")
            .field("len", &self.len())
            .finish()
    }
}

impl Endpoint for MemoryEndpoint {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self.begin(Op::Head, key) {
            // A scripted 404 means "absent", same as a real endpoint.
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
            Ok(()) => {}
        }
        let inner = self.inner.lock().expect("poisoned lock");
        Ok(inner.objects.get(key).map(|o| ObjectMeta {
            etag: o.etag.clone(),
            size: o.body.len() as u64,
            last_modified: o.last_modified,
        }))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.begin(Op::Get, key)?;
        self.get_bytes(key)
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.begin(Op::Put, key)?;
        let etag = content_etag(&body);
        self.inner.lock().expect("poisoned lock").objects.insert(
            key.to_string(),
            StoredObject {
                body,
                etag,
                last_modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.begin(Op::Delete, key)?;
        match self
            .inner
            .lock()
            .expect("poisoned lock")
            .objects
            .remove(key)
        {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn ensure_bucket(&self) -> Result<()> {
        Ok(())
    }
}
