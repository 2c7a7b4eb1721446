//! Asynchronous completion channel
//!
//! An asynchronous call hands the host runtime a channel object carrying a
//! correlation token. The token is an id into a bridge-owned side table of
//! pending native callbacks, so no function pointer ever travels through
//! the host runtime. When the host later fires the success or failure
//! entrypoint, the callback is removed from the table and invoked once with
//! a caller-owned [`PayloadBuffer`].
//!
//! ```text
//! Issued --(success | failure)--> Completed(Ok | Error) --> Delivered
//! ```

use crate::error::BridgeResult;
use crate::host::{CopyMode, HostBytes, HostEnv, RawRef};
use crate::marshal::to_bridge;
use crate::payload::{PayloadBuffer, PayloadStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Native completion callback; receives ownership of the buffer
pub type NativeCallback = extern "C" fn(*mut PayloadBuffer);

/// Token value meaning "no callback"
pub const NULL_TOKEN: i64 = 0;

// ============================================================================
// Token table
// ============================================================================

/// Pending callbacks keyed by correlation token
pub struct CallbackTable {
    next: AtomicI64,
    pending: Mutex<HashMap<i64, NativeCallback>>,
}

impl CallbackTable {
    pub fn new() -> Self {
        CallbackTable {
            next: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a callback and return its token.
    ///
    /// A null callback is not stored and gets [`NULL_TOKEN`]; completing
    /// that token later is a silent no-op.
    pub fn issue(&self, callback: Option<NativeCallback>) -> i64 {
        let Some(callback) = callback else {
            return NULL_TOKEN;
        };
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(token, callback);
        token
    }

    /// Remove and return the callback for `token`
    pub fn take(&self, token: i64) -> Option<NativeCallback> {
        if token == NULL_TOKEN {
            return None;
        }
        self.pending.lock().remove(&token)
    }

    /// Drop a token whose call never reached the host
    pub fn withdraw(&self, token: i64) {
        if self.take(token).is_some() {
            tracing::debug!(target: "hostcall", token, "withdrew correlation token");
        }
    }

    /// Number of issued, undelivered calls
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Forget every pending callback; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let dropped = pending.len();
        pending.clear();
        dropped
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Which completion entrypoint the host invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    Failure,
}

impl Completion {
    pub fn status(self) -> PayloadStatus {
        match self {
            Completion::Success => PayloadStatus::Ok,
            Completion::Failure => PayloadStatus::Error,
        }
    }
}

/// Result of a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The callback was invoked
    Delivered,
    /// No pending callback for the token (null, unknown or already consumed)
    Dropped,
}

/// Resolve `token`, marshal the host byte array and invoke the callback.
///
/// The callback runs synchronously on the calling thread. If copying the
/// bytes fails, the callback still fires exactly once with an empty
/// `Error` buffer and the copy error is returned to the host.
pub fn deliver<E: HostEnv>(
    table: &CallbackTable,
    env: &E,
    token: i64,
    completion: Completion,
    bytes: RawRef,
    mode: CopyMode,
) -> BridgeResult<Delivery> {
    let Some(callback) = table.take(token) else {
        if token != NULL_TOKEN {
            tracing::warn!(target: "hostcall", token, ?completion, "dropping completion for unknown token");
        }
        return Ok(Delivery::Dropped);
    };

    let marshaled = if bytes.is_null() {
        PayloadBuffer::from_vec(completion.status(), Vec::new())
    } else {
        to_bridge(env, HostBytes::ByteArray(bytes), completion.status(), mode)
    };

    match marshaled {
        Ok(payload) => {
            tracing::debug!(target: "hostcall", token, ?completion, size = payload.len(), "delivering completion");
            callback(payload.into_raw());
            Ok(Delivery::Delivered)
        }
        Err(err) => {
            tracing::error!(target: "hostcall", token, %err, "failed to marshal completion payload");
            let empty = PayloadBuffer::from_vec(PayloadStatus::Error, Vec::new())?;
            callback(empty.into_raw());
            Err(err)
        }
    }
}
