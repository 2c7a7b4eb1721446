//! Moving bytes across the runtime boundary
//!
//! `to_bridge` copies a host byte sequence into a new caller-owned
//! [`PayloadBuffer`]. `from_bridge` exposes a caller buffer to the host as a
//! zero-copy direct buffer that is only valid while the returned view lives.

use crate::error::BridgeResult;
use crate::host::{CopyMode, HostBytes, HostEnv};
use crate::payload::{alloc_exact, PayloadBuffer, PayloadStatus};
use crate::reference::RefGuard;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Copy a host byte sequence into a caller-owned buffer tagged `status`.
///
/// The source reference is only read; releasing it stays with the caller.
pub fn to_bridge<E: HostEnv>(
    env: &E,
    bytes: HostBytes,
    status: PayloadStatus,
    mode: CopyMode,
) -> BridgeResult<PayloadBuffer> {
    let len = env.byte_len(bytes)?;
    let mut data = alloc_exact(len)?;
    if len > 0 {
        env.read_bytes(bytes, &mut data, mode)?;
    }
    PayloadBuffer::from_vec(status, data)
}

/// Host direct buffer viewing a caller buffer.
///
/// Borrows the payload so the view cannot outlive the bytes it points at.
/// Dropping the view releases the local reference; the bytes stay with the
/// caller.
pub struct HostView<'env, 'buf, E: HostEnv> {
    guard: RefGuard<'env, E>,
    _buf: PhantomData<&'buf PayloadBuffer>,
}

impl<E: HostEnv> HostView<'_, '_, E> {
    pub fn get(&self) -> crate::host::RawRef {
        self.guard.get()
    }
}

/// Wrap a caller buffer as a host direct buffer without copying
pub fn from_bridge<'env, 'buf, E: HostEnv>(
    env: &'env E,
    payload: &'buf PayloadBuffer,
) -> BridgeResult<HostView<'env, 'buf, E>> {
    let (data, len) = match payload.data_ptr() {
        // An empty view still needs a non-null address
        ptr if ptr.is_null() => (NonNull::<u8>::dangling().as_ptr(), 0),
        ptr => (ptr, payload.len()),
    };
    let raw = unsafe { env.new_direct_buffer(data, len)? };
    Ok(HostView {
        guard: RefGuard::local(env, raw),
        _buf: PhantomData,
    })
}
