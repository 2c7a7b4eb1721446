//! Caller-owned payload buffers
//!
//! A [`PayloadBuffer`] is the only value that crosses the bridge in either
//! direction. Buffers produced by the bridge are handed to the caller with
//! [`PayloadBuffer::into_raw`]; the caller gives each one back exactly once
//! through [`PayloadBuffer::free`], which releases both the header and the
//! bytes. Buffers provided by the caller as call arguments are only ever
//! borrowed.

use crate::error::{BridgeError, BridgeResult};
use std::ptr;

/// Outcome of the host method, carried as payload metadata
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStatus {
    Ok = 0,
    Error = 1,
}

impl PayloadStatus {
    /// Decode the wire value; anything but `0` reads as `Error`
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => PayloadStatus::Ok,
            _ => PayloadStatus::Error,
        }
    }
}

/// Wire shape: `{ status: int32, data: uint8_t*, size: int32 }`
#[repr(C)]
pub struct PayloadBuffer {
    status: i32,
    data: *mut u8,
    size: i32,
}

// The buffer exclusively owns (or exclusively borrows) its bytes.
unsafe impl Send for PayloadBuffer {}

impl PayloadBuffer {
    /// Take ownership of `bytes` as a bridge-owned buffer
    pub fn from_vec(status: PayloadStatus, bytes: Vec<u8>) -> BridgeResult<Self> {
        let len = bytes.len();
        let size = i32::try_from(len).map_err(|_| BridgeError::PayloadTooLarge(len))?;
        let data = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        Ok(PayloadBuffer {
            status: status as i32,
            data,
            size,
        })
    }

    /// Copy `bytes` into a new bridge-owned buffer
    pub fn copy_from_slice(status: PayloadStatus, bytes: &[u8]) -> BridgeResult<Self> {
        let mut data = alloc_exact(bytes.len())?;
        data.copy_from_slice(bytes);
        Self::from_vec(status, data)
    }

    pub fn status(&self) -> PayloadStatus {
        PayloadStatus::from_raw(self.status)
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        if self.size <= 0 {
            0
        } else {
            self.size as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.data.is_null() || self.size <= 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.size as usize) }
    }

    /// Raw data pointer, for building zero-copy host views
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    /// Hand the buffer to the caller.
    ///
    /// The returned pointer must be released with [`PayloadBuffer::free`]
    /// exactly once.
    pub fn into_raw(self) -> *mut PayloadBuffer {
        Box::into_raw(Box::new(self))
    }

    /// Reclaim a buffer previously returned by [`PayloadBuffer::into_raw`].
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` and must not be used afterwards.
    pub unsafe fn from_raw(ptr: *mut PayloadBuffer) -> Box<PayloadBuffer> {
        Box::from_raw(ptr)
    }

    /// Release a caller-owned buffer. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or come from [`PayloadBuffer::into_raw`], and must
    /// not have been freed already. The data pointer inside the buffer is
    /// released too and must not be freed separately.
    pub unsafe fn free(ptr: *mut PayloadBuffer) {
        if ptr.is_null() {
            return;
        }
        drop(Box::from_raw(ptr));
    }
}

impl Drop for PayloadBuffer {
    fn drop(&mut self) {
        if self.data.is_null() {
            return;
        }
        let len = self.len();
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.data, len)));
        }
        self.data = ptr::null_mut();
        self.size = 0;
    }
}

impl std::fmt::Debug for PayloadBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadBuffer")
            .field("status", &self.status())
            .field("size", &self.size)
            .finish()
    }
}

/// Allocate a zeroed buffer of exactly `len` bytes without aborting on OOM
pub(crate) fn alloc_exact(len: usize) -> BridgeResult<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| BridgeError::AllocationFailure(len))?;
    data.resize(len, 0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from_slice() {
        let buf = PayloadBuffer::copy_from_slice(PayloadStatus::Ok, b"hi").unwrap();
        assert_eq!(buf.status(), PayloadStatus::Ok);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.as_bytes(), b"hi");
    }

    #[test]
    fn test_empty_buffer() {
        let buf = PayloadBuffer::from_vec(PayloadStatus::Error, Vec::new()).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.as_bytes(), b"");
        assert_eq!(buf.status(), PayloadStatus::Error);
    }

    #[test]
    fn test_raw_round_trip_and_free() {
        let raw = PayloadBuffer::copy_from_slice(PayloadStatus::Ok, &[1, 2, 3])
            .unwrap()
            .into_raw();
        assert!(!raw.is_null());
        unsafe {
            assert_eq!((*raw).as_bytes(), &[1, 2, 3]);
            PayloadBuffer::free(raw);
        }
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { PayloadBuffer::free(ptr::null_mut()) };
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(PayloadStatus::Ok as i32, 0);
        assert_eq!(PayloadStatus::Error as i32, 1);
        assert_eq!(PayloadStatus::from_raw(0), PayloadStatus::Ok);
        assert_eq!(PayloadStatus::from_raw(1), PayloadStatus::Error);
        assert_eq!(PayloadStatus::from_raw(7), PayloadStatus::Error);
    }

    #[test]
    fn test_layout_matches_wire_shape() {
        assert_eq!(std::mem::offset_of!(PayloadBuffer, status), 0);
        assert_eq!(
            std::mem::offset_of!(PayloadBuffer, data),
            std::mem::align_of::<*mut u8>()
        );
    }
}
