//! Host-runtime seam
//!
//! Defines the interface the bridge needs from the object-oriented host
//! runtime. The bridge logic programs against these traits only; the JNI
//! implementation lives in `hostcall-jni`, and tests supply an in-process
//! fake.
//!
//! Handles are plain copyable values. Ownership of what they point at is
//! tracked by [`RefGuard`](crate::reference::RefGuard) and the class
//! registry, never by the handle itself.

use crate::error::BridgeResult;
use serde::Deserialize;

// ============================================================================
// Handles
// ============================================================================

/// Opaque host object handle (local or global reference)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawRef(usize);

impl RawRef {
    /// The null handle
    pub const NULL: RawRef = RawRef(0);

    /// Wrap a raw host pointer
    #[inline]
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        RawRef(ptr as usize)
    }

    /// Recover the raw host pointer
    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Wrap an address (used by in-process hosts that hand out ids)
    #[inline]
    pub fn from_addr(addr: usize) -> Self {
        RawRef(addr)
    }

    /// Underlying address
    #[inline]
    pub fn addr(self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(usize);

impl MethodId {
    #[inline]
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        MethodId(ptr as usize)
    }

    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    #[inline]
    pub fn from_addr(addr: usize) -> Self {
        MethodId(addr)
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0
    }
}

/// Argument passed to a host method invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostArg {
    /// Object reference
    Object(RawRef),
    /// 64-bit integer
    Long(i64),
}

/// A host-side byte sequence the bridge can copy out of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBytes {
    /// Direct byte buffer (returned by synchronous calls)
    DirectBuffer(RawRef),
    /// Byte array (handed to completion entrypoints)
    ByteArray(RawRef),
}

impl HostBytes {
    /// Reference to the underlying host object
    pub fn raw(self) -> RawRef {
        match self {
            HostBytes::DirectBuffer(r) | HostBytes::ByteArray(r) => r,
        }
    }
}

/// How bytes are copied out of a host byte array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    /// Pin the array and copy directly from host memory
    #[default]
    Critical,
    /// Region copy through the host API
    Region,
}

/// Outcome of querying the calling thread's execution context
pub enum EnvStatus<E> {
    /// Thread already has a context
    Attached(E),
    /// Thread is not attached to the host runtime
    Detached,
    /// The host runtime refused the query (unsupported version, etc.)
    Unavailable,
}

// ============================================================================
// Traits
// ============================================================================

/// A host runtime instance, shared across threads.
pub trait HostVm: Send + Sync {
    /// Per-thread execution context
    type Env: HostEnv;

    /// Context of the calling thread, if it has one
    fn get_env(&self) -> EnvStatus<Self::Env>;

    /// Attach the calling thread. `None` if the runtime refused.
    fn attach_current_thread(&self) -> Option<Self::Env>;

    /// Detach the calling thread
    fn detach_current_thread(&self);
}

/// Per-thread execution context.
///
/// Implementations clear any host exception raised by an operation and
/// report it as [`BridgeError::HostException`](crate::BridgeError::HostException).
/// Returned references are local references unless stated otherwise.
pub trait HostEnv {
    // ========================================================================
    // Classes and methods
    // ========================================================================

    /// Resolve a class by its slash-separated name
    fn find_class(&self, name: &str) -> BridgeResult<RawRef>;

    /// Resolve an instance method (constructors use `"<init>"`)
    fn method_id(&self, class: RawRef, name: &str, signature: &str) -> Option<MethodId>;

    /// Resolve a static method
    fn static_method_id(&self, class: RawRef, name: &str, signature: &str) -> Option<MethodId>;

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Create a host string
    fn new_string(&self, value: &str) -> BridgeResult<RawRef>;

    /// Invoke an instance method returning an object
    fn call_object_method(
        &self,
        receiver: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<RawRef>;

    /// Invoke a static method returning nothing
    fn call_static_void(&self, class: RawRef, method: MethodId, args: &[HostArg])
        -> BridgeResult<()>;

    /// Invoke a static method returning an object
    fn call_static_object(
        &self,
        class: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<RawRef>;

    /// Construct an object
    fn new_object(&self, class: RawRef, ctor: MethodId, args: &[HostArg]) -> BridgeResult<RawRef>;

    // ========================================================================
    // References
    // ========================================================================

    /// New local reference to the same object, scoped to the current call
    fn new_local_ref(&self, obj: RawRef) -> BridgeResult<RawRef>;

    /// Promote a reference to a global reference
    fn new_global_ref(&self, obj: RawRef) -> BridgeResult<RawRef>;

    fn delete_local_ref(&self, obj: RawRef);

    fn delete_global_ref(&self, obj: RawRef);

    // ========================================================================
    // Bytes
    // ========================================================================

    /// Wrap native memory as a host direct buffer without copying.
    ///
    /// # Safety
    /// `data` must be non-null and valid for reads and writes of `len` bytes
    /// for as long as the returned reference is in use.
    unsafe fn new_direct_buffer(&self, data: *mut u8, len: usize) -> BridgeResult<RawRef>;

    /// Length in bytes of a host byte sequence
    fn byte_len(&self, bytes: HostBytes) -> BridgeResult<usize>;

    /// Copy a host byte sequence into `dst`, which is exactly `byte_len` long
    fn read_bytes(&self, bytes: HostBytes, dst: &mut [u8], mode: CopyMode) -> BridgeResult<()>;
}
