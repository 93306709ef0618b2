//! The copy and cleanup engines.
//!
//! [`copy_once`] drives a single migration attempt for one object: policy
//! gates first, then metadata probes that make the operation idempotent,
//! then a whole-object GET/PUT with bounded retries on throttling. It never
//! mutates task state; the queue processor maps its [`CopyOutcome`] onto the
//! task state machine. [`cleanup_once`] is the matching idempotent source
//! deletion.

use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::policy::PolicyGate;
use crate::{Error, Result};

/// Additional copy attempts after the first when the endpoint throttles
/// (four tries total).
pub const MAX_COPY_RETRIES: u32 = 3;

/// Objects modified more recently than this are assumed to still be written
/// to and are skipped until a later tick.
const GROWING_FILE_WINDOW: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Why a copy was skipped without touching the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source object has size zero, likely a placeholder or an upload
    /// that has not started.
    EmptySource,
    /// The source object was modified inside the growing-file window.
    FileGrowing,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EmptySource => "empty_source",
            SkipReason::FileGrowing => "file_growing",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why policy refused a copy outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Encryption enforcement is on and the destination is not encrypted.
    DestinationNotEncrypted,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::DestinationNotEncrypted => "destination_not_encrypted",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The discriminated outcome of one [`copy_once`] attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The object was transferred. `version_token` is a fresh random hex
    /// identifier, minted per copy so downstream readers can detect new
    /// versions without trusting endpoint-assigned ETags.
    Copied { size: u64, version_token: String },
    /// The destination already holds the object (or the source is gone and
    /// the destination copy survives from an earlier run).
    Noop,
    /// Neither side has the object.
    MissingSource,
    /// The source is not ready to copy; retry on a later tick.
    Skipped(SkipReason),
    /// Policy refused the copy.
    Blocked(BlockReason),
    /// Every try was throttled.
    Failed { error: String },
}

impl std::fmt::Display for CopyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyOutcome::Copied { size, .. } => write!(f, "copied ({size} bytes)"),
            CopyOutcome::Noop => f.write_str("noop"),
            CopyOutcome::MissingSource => f.write_str("missing_source"),
            CopyOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            CopyOutcome::Blocked(reason) => write!(f, "blocked ({reason})"),
            CopyOutcome::Failed { error } => write!(f, "failed ({error})"),
        }
    }
}

/// The outcome of one [`cleanup_once`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The source object was deleted.
    Deleted,
    /// The source object was already gone.
    Noop,
}

impl std::fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupOutcome::Deleted => f.write_str("deleted"),
            CleanupOutcome::Noop => f.write_str("noop"),
        }
    }
}

/// Attempt to copy `key` from endpoint `src` to endpoint `dst` once.
///
/// The operation is idempotent: when source and destination already agree on
/// `(etag, size)` it returns [`CopyOutcome::Noop`] without a PUT, so a crash
/// between a completed transfer and the task-state update is repaired by the
/// next attempt.
///
/// Transient throttling (`429`, `503`, `Throttling`, `TooManyRequests`,
/// `SlowDown`) is absorbed by up to [`MAX_COPY_RETRIES`] extra tries with
/// doubling backoff. Any other error propagates to the caller.
pub async fn copy_once<E: Endpoint>(
    endpoints: &EndpointRegistry<E>,
    policy: &PolicyGate,
    key: &str,
    src: &str,
    dst: &str,
) -> Result<CopyOutcome> {
    // ── Policy gates ──────────────────────────────────────────────────────
    if policy.encryption_enforced() && !endpoints.descriptor(dst)?.is_encrypted {
        tracing::warn!(key, dst, "copy blocked: destination not encrypted");
        return Ok(CopyOutcome::Blocked(BlockReason::DestinationNotEncrypted));
    }

    for name in [src, dst] {
        if policy.is_endpoint_failed(name) {
            return Err(Error::EndpointUnavailable(name.to_string()));
        }
    }

    let latency = policy.latency_ms();
    if latency > 0 {
        tokio::time::sleep(Duration::from_millis(latency)).await;
    }

    // ── Probe both sides ──────────────────────────────────────────────────
    let source = endpoints.resolve(src)?;
    let dest = endpoints.resolve(dst)?;

    futures::future::try_join(source.ensure_bucket(), dest.ensure_bucket()).await?;

    let (sm, dm) = futures::future::try_join(source.head(key), dest.head(key)).await?;

    if let (Some(sm), Some(dm)) = (&sm, &dm) {
        if sm.same_object(dm) {
            return Ok(CopyOutcome::Noop);
        }
    }

    let Some(sm) = sm else {
        // A destination copy with no source means an earlier run already
        // migrated and cleaned up.
        return Ok(if dm.is_some() {
            CopyOutcome::Noop
        } else {
            CopyOutcome::MissingSource
        });
    };

    // ── Incomplete-upload guards ──────────────────────────────────────────
    if sm.size == 0 {
        return Ok(CopyOutcome::Skipped(SkipReason::EmptySource));
    }

    // Wall clock versus the endpoint's LastModified; clock skew between host
    // and endpoint can mis-classify here. A timestamp in the future counts
    // as growing.
    let age = SystemTime::now()
        .duration_since(sm.last_modified)
        .unwrap_or(Duration::ZERO);
    if age < GROWING_FILE_WINDOW {
        tracing::debug!(key, src, "source modified recently; deferring copy");
        return Ok(CopyOutcome::Skipped(SkipReason::FileGrowing));
    }

    // ── Transfer with throttle retries ────────────────────────────────────
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0u32;
    loop {
        match transfer(source, dest, key).await {
            Ok(()) => {
                let version_token = Uuid::new_v4().simple().to_string();
                return Ok(CopyOutcome::Copied {
                    size: sm.size,
                    version_token,
                });
            }
            Err(Error::Throttled(code)) => {
                if attempt >= MAX_COPY_RETRIES {
                    tracing::warn!(key, src, dst, code = %code, "copy retries exhausted");
                    return Ok(CopyOutcome::Failed {
                        error: "max_retries_exceeded".to_string(),
                    });
                }
                tracing::debug!(key, code = %code, attempt, backoff_s = backoff.as_secs(), "throttled; backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn transfer<E: Endpoint>(source: &E, dest: &E, key: &str) -> Result<()> {
    let body = source.get(key).await?;
    dest.put(key, body).await
}

/// Delete `key` on endpoint `src`, treating an already-absent object as a
/// no-op. Any other error propagates.
pub async fn cleanup_once<E: Endpoint>(
    endpoints: &EndpointRegistry<E>,
    policy: &PolicyGate,
    key: &str,
    src: &str,
) -> Result<CleanupOutcome> {
    if policy.is_endpoint_failed(src) {
        return Err(Error::EndpointUnavailable(src.to_string()));
    }

    match endpoints.resolve(src)?.delete(key).await {
        Ok(()) => Ok(CleanupOutcome::Deleted),
        Err(Error::NotFound(_)) => Ok(CleanupOutcome::Noop),
        Err(e) => Err(e),
    }
}
