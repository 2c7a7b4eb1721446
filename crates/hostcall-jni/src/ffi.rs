//! C ABI
//!
//! The native caller's entrypoints into the bridge. The API follows these
//! principles:
//! - ABI-stable (uses only C-compatible types)
//! - Error handling via an optional `HostcallError**` out-parameter
//! - Buffers returned to the caller are owned by the caller and released
//!   with `hostcall_free_pointer()`
//! - Argument buffers are only borrowed for the duration of the call
//! - No panic unwinds across the boundary

use crate::bridge;
use hostcall_core::{BridgeError, BridgeResult, NativeCallback, PayloadBuffer};
use std::any::Any;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

// ============================================================================
// Error Type
// ============================================================================

/// Error information
#[repr(C)]
pub struct HostcallError {
    code: c_int,
    message: *mut c_char,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert Rust string to C string (caller must free)
fn rust_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s.replace('\0', "\\0")) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn create_error(error: &BridgeError) -> *mut HostcallError {
    let message = rust_to_c_string(&error.to_string());
    Box::into_raw(Box::new(HostcallError {
        code: error.code(),
        message,
    }))
}

/// Set error out-parameter
unsafe fn set_error(error_out: *mut *mut HostcallError, error: &BridgeError) {
    if !error_out.is_null() {
        *error_out = create_error(error);
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f`, turning a panic into [`BridgeError::Panic`]
pub(crate) fn guarded<T>(f: impl FnOnce() -> BridgeResult<T>) -> BridgeResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(BridgeError::Panic(panic_message(payload.as_ref()))),
    }
}

/// Borrow a NUL-terminated UTF-8 argument
unsafe fn str_arg<'a>(value: *const c_char, what: &str) -> BridgeResult<&'a str> {
    if value.is_null() {
        return Err(BridgeError::InvalidArgument(format!("{} is null", what)));
    }
    CStr::from_ptr(value)
        .to_str()
        .map_err(|_| BridgeError::InvalidArgument(format!("{} is not valid UTF-8", what)))
}

unsafe fn payload_arg<'a>(args: *const PayloadBuffer) -> BridgeResult<&'a PayloadBuffer> {
    args.as_ref()
        .ok_or_else(|| BridgeError::InvalidArgument("argument buffer is null".to_string()))
}

/// 0 on success, -1 with the error reported otherwise
unsafe fn status_code(
    result: BridgeResult<()>,
    error: *mut *mut HostcallError,
    export: &str,
) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(target: "hostcall", export, code = err.code(), %err, "call failed");
            set_error(error, &err);
            -1
        }
    }
}

/// Buffer ownership to the caller, or NULL with the error reported
unsafe fn buffer_result(
    result: BridgeResult<PayloadBuffer>,
    error: *mut *mut HostcallError,
    export: &str,
) -> *mut PayloadBuffer {
    match result {
        Ok(buffer) => buffer.into_raw(),
        Err(err) => {
            tracing::error!(target: "hostcall", export, code = err.code(), %err, "call failed");
            set_error(error, &err);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Resolve a host class and cache it for later calls
///
/// # Arguments
/// * `name` - Null-terminated slash-separated class name (`"pkg/Util"`)
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * 0 on success (also when the class was already registered)
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `name` must be a valid null-terminated string
///
/// # Example (C)
/// ```c
/// HostcallError* error = NULL;
/// if (hostcall_register_class("com/example/Dialogs", &error) != 0) {
///     fprintf(stderr, "register failed: %s\n", hostcall_error_message(error));
///     hostcall_error_free(error);
/// }
/// ```
#[no_mangle]
pub unsafe extern "C" fn hostcall_register_class(
    name: *const c_char,
    error: *mut *mut HostcallError,
) -> c_int {
    let result = guarded(|| {
        let name = str_arg(name, "class name")?;
        bridge()?.register_class(name)
    });
    status_code(result, error, "hostcall_register_class")
}

// ============================================================================
// Synchronous Calls
// ============================================================================

/// Invoke `static void method()`
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `class_name` and `method` must be valid null-terminated strings
#[no_mangle]
pub unsafe extern "C" fn hostcall_call_static_void(
    class_name: *const c_char,
    method: *const c_char,
    error: *mut *mut HostcallError,
) -> c_int {
    let result = guarded(|| {
        let class_name = str_arg(class_name, "class name")?;
        let method = str_arg(method, "method name")?;
        bridge()?.call_void(class_name, method)
    });
    status_code(result, error, "hostcall_call_static_void")
}

/// Invoke `static void method(ByteBuffer)`
///
/// The host sees `args` as a direct buffer over the caller's bytes; the
/// caller keeps ownership and must not free it before the call returns.
///
/// # Safety
/// Strings must be valid null-terminated strings, `args` a valid buffer
#[no_mangle]
pub unsafe extern "C" fn hostcall_call_static_void_with_args(
    class_name: *const c_char,
    method: *const c_char,
    args: *const PayloadBuffer,
    error: *mut *mut HostcallError,
) -> c_int {
    let result = guarded(|| {
        let class_name = str_arg(class_name, "class name")?;
        let method = str_arg(method, "method name")?;
        let args = payload_arg(args)?;
        bridge()?.call_void_with_args(class_name, method, args)
    });
    status_code(result, error, "hostcall_call_static_void_with_args")
}

/// Invoke `static ByteBuffer method()`
///
/// # Returns
/// * A new buffer tagged OK on success; free it with `hostcall_free_pointer()`
/// * NULL on failure (check error parameter)
///
/// # Safety
/// `class_name` and `method` must be valid null-terminated strings
#[no_mangle]
pub unsafe extern "C" fn hostcall_call_static_return(
    class_name: *const c_char,
    method: *const c_char,
    error: *mut *mut HostcallError,
) -> *mut PayloadBuffer {
    let result = guarded(|| {
        let class_name = str_arg(class_name, "class name")?;
        let method = str_arg(method, "method name")?;
        bridge()?.call_return(class_name, method)
    });
    buffer_result(result, error, "hostcall_call_static_return")
}

/// Invoke `static ByteBuffer method(ByteBuffer)`
///
/// # Safety
/// Strings must be valid null-terminated strings, `args` a valid buffer
#[no_mangle]
pub unsafe extern "C" fn hostcall_call_static_return_with_args(
    class_name: *const c_char,
    method: *const c_char,
    args: *const PayloadBuffer,
    error: *mut *mut HostcallError,
) -> *mut PayloadBuffer {
    let result = guarded(|| {
        let class_name = str_arg(class_name, "class name")?;
        let method = str_arg(method, "method name")?;
        let args = payload_arg(args)?;
        bridge()?.call_return_with_args(class_name, method, args)
    });
    buffer_result(result, error, "hostcall_call_static_return_with_args")
}

// ============================================================================
// Asynchronous Calls
// ============================================================================

/// Invoke `static void method(ResultChannel)`
///
/// Returns once the host method returns. `callback` is invoked exactly once,
/// on whichever thread the host completes the channel from, and receives
/// ownership of the result buffer. A NULL callback discards the result.
///
/// # Returns
/// * 0 if the call was issued
/// * -1 on failure; the callback will never be invoked
///
/// # Safety
/// `class_name` and `method` must be valid null-terminated strings
///
/// # Example (C)
/// ```c
/// static void on_done(PayloadBuffer* result) {
///     if (result->status == 0) { /* use result->data, result->size */ }
///     hostcall_free_pointer(result);
/// }
///
/// hostcall_call_static_void_async("com/example/Dialogs", "confirm", on_done, NULL);
/// ```
#[no_mangle]
pub unsafe extern "C" fn hostcall_call_static_void_async(
    class_name: *const c_char,
    method: *const c_char,
    callback: Option<NativeCallback>,
    error: *mut *mut HostcallError,
) -> c_int {
    let result = guarded(|| {
        let class_name = str_arg(class_name, "class name")?;
        let method = str_arg(method, "method name")?;
        bridge()?.call_void_async(class_name, method, callback)
    });
    status_code(result, error, "hostcall_call_static_void_async")
}

/// Invoke `static void method(ResultChannel, ByteBuffer)`
///
/// # Safety
/// Strings must be valid null-terminated strings, `args` a valid buffer
#[no_mangle]
pub unsafe extern "C" fn hostcall_call_static_void_async_with_args(
    class_name: *const c_char,
    method: *const c_char,
    callback: Option<NativeCallback>,
    args: *const PayloadBuffer,
    error: *mut *mut HostcallError,
) -> c_int {
    let result = guarded(|| {
        let class_name = str_arg(class_name, "class name")?;
        let method = str_arg(method, "method name")?;
        let args = payload_arg(args)?;
        bridge()?.call_void_async_with_args(class_name, method, callback, args)
    });
    status_code(result, error, "hostcall_call_static_void_async_with_args")
}

// ============================================================================
// Memory
// ============================================================================

/// Free a buffer returned by a call or delivered to a callback
///
/// Releases both the buffer and its bytes. NULL is a no-op.
///
/// # Safety
/// `buffer` must come from this library and must not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn hostcall_free_pointer(buffer: *mut PayloadBuffer) {
    PayloadBuffer::free(buffer);
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get error message
///
/// # Returns
/// * Null-terminated error message, NULL if `error` is NULL
///
/// # Safety
/// - Error pointer must be valid (created by hostcall API)
/// - Returned string is valid until `hostcall_error_free()` is called
#[no_mangle]
pub unsafe extern "C" fn hostcall_error_message(error: *const HostcallError) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }

    (*error).message
}

/// Get the numeric error code (0 if `error` is NULL)
///
/// # Safety
/// Error pointer must be valid (created by hostcall API)
#[no_mangle]
pub unsafe extern "C" fn hostcall_error_code(error: *const HostcallError) -> c_int {
    if error.is_null() {
        return 0;
    }

    (*error).code
}

/// Free an error
///
/// # Safety
/// - Error pointer must be valid (created by hostcall API)
/// - Error must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn hostcall_error_free(error: *mut HostcallError) {
    if error.is_null() {
        return;
    }

    let err = Box::from_raw(error);
    if !err.message.is_null() {
        drop(CString::from_raw(err.message));
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Get library version string
///
/// # Returns
/// * Null-terminated version string (static, do not free)
#[no_mangle]
pub extern "C" fn hostcall_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}
