//! The JVM as a host runtime
//!
//! [`JniVm`] and [`JniEnv`] implement the bridge's host seam directly over
//! the JNI function tables. Every call that can leave a pending Java
//! exception checks for it, clears it, and reports it as
//! [`BridgeError::HostException`] carrying the throwable's `toString()`.

use hostcall_core::reference::RefGuard;
use hostcall_core::{
    BridgeError, BridgeResult, CopyMode, EnvStatus, HostArg, HostBytes, HostEnv, HostVm, MethodId,
    RawRef,
};
use jni::sys::{
    self, jbyte, jint, jlong, jobject, jsize, jvalue, JNI_ABORT, JNI_EDETACHED, JNI_FALSE, JNI_OK,
    JNI_VERSION_1_6,
};
use std::ffi::{c_void, CStr, CString};
use std::ptr;

/// JNI version the bridge requires
pub const JNI_VERSION: jint = JNI_VERSION_1_6;

/// Look up an entry of a JNI function table.
///
/// Must be used inside `unsafe`; `$table` is a `*mut JavaVM` or `*mut JNIEnv`.
macro_rules! jni_fn {
    ($table:expr, $name:ident) => {
        (**$table).$name.ok_or_else(|| {
            BridgeError::HostException(
                concat!("JNI function ", stringify!($name), " is unavailable").to_string(),
            )
        })
    };
}

fn c_string(value: &str) -> BridgeResult<CString> {
    CString::new(value)
        .map_err(|_| BridgeError::InvalidArgument(format!("interior NUL in {:?}", value)))
}

fn to_jvalues(args: &[HostArg]) -> Vec<jvalue> {
    args.iter()
        .map(|arg| match *arg {
            HostArg::Object(obj) => jvalue { l: obj.as_ptr() },
            HostArg::Long(j) => jvalue { j },
        })
        .collect()
}

fn to_jsize(len: usize) -> BridgeResult<jsize> {
    jsize::try_from(len).map_err(|_| BridgeError::PayloadTooLarge(len))
}

// ============================================================================
// JniVm
// ============================================================================

/// A running JVM
pub struct JniVm {
    raw: *mut sys::JavaVM,
    describe_exceptions: bool,
}

// The invocation interface may be used from any thread.
unsafe impl Send for JniVm {}
unsafe impl Sync for JniVm {}

impl JniVm {
    /// Wrap the `JavaVM` handed to `JNI_OnLoad`
    ///
    /// # Safety
    /// `raw` must point to a live `JavaVM` that outlives the returned value.
    pub unsafe fn from_raw(raw: *mut sys::JavaVM, describe_exceptions: bool) -> BridgeResult<Self> {
        if raw.is_null() {
            return Err(BridgeError::EnvironmentUnavailable);
        }
        Ok(JniVm {
            raw,
            describe_exceptions,
        })
    }

    fn wrap(&self, env: *mut c_void) -> JniEnv {
        JniEnv {
            raw: env as *mut sys::JNIEnv,
            describe_exceptions: self.describe_exceptions,
        }
    }
}

impl HostVm for JniVm {
    type Env = JniEnv;

    fn get_env(&self) -> EnvStatus<JniEnv> {
        let mut env: *mut c_void = ptr::null_mut();
        let status = unsafe {
            match jni_fn!(self.raw, GetEnv) {
                Ok(get_env) => get_env(self.raw, &mut env, JNI_VERSION),
                Err(_) => return EnvStatus::Unavailable,
            }
        };
        match status {
            JNI_OK if !env.is_null() => EnvStatus::Attached(self.wrap(env)),
            JNI_EDETACHED => EnvStatus::Detached,
            _ => EnvStatus::Unavailable,
        }
    }

    fn attach_current_thread(&self) -> Option<JniEnv> {
        let mut env: *mut c_void = ptr::null_mut();
        let status = unsafe {
            let attach = jni_fn!(self.raw, AttachCurrentThread).ok()?;
            attach(self.raw, &mut env, ptr::null_mut())
        };
        if status == JNI_OK && !env.is_null() {
            Some(self.wrap(env))
        } else {
            tracing::warn!(target: "hostcall", status, "AttachCurrentThread failed");
            None
        }
    }

    fn detach_current_thread(&self) {
        let status = unsafe {
            match jni_fn!(self.raw, DetachCurrentThread) {
                Ok(detach) => detach(self.raw),
                Err(_) => return,
            }
        };
        if status != JNI_OK {
            tracing::warn!(target: "hostcall", status, "DetachCurrentThread failed");
        }
    }
}

// ============================================================================
// JniEnv
// ============================================================================

/// The calling thread's `JNIEnv`
pub struct JniEnv {
    raw: *mut sys::JNIEnv,
    describe_exceptions: bool,
}

impl JniEnv {
    /// Wrap the `JNIEnv` the JVM passed to a native method
    ///
    /// # Safety
    /// `raw` must be the calling thread's live `JNIEnv`.
    pub unsafe fn from_raw(raw: *mut sys::JNIEnv, describe_exceptions: bool) -> Self {
        JniEnv {
            raw,
            describe_exceptions,
        }
    }

    /// Clear a pending exception, if any, and report it
    fn check_exception(&self) -> BridgeResult<()> {
        unsafe {
            let exception_check = jni_fn!(self.raw, ExceptionCheck)?;
            if exception_check(self.raw) == JNI_FALSE {
                return Ok(());
            }
            let throwable = (jni_fn!(self.raw, ExceptionOccurred)?)(self.raw);
            if self.describe_exceptions {
                // Prints and clears
                (jni_fn!(self.raw, ExceptionDescribe)?)(self.raw);
            }
            (jni_fn!(self.raw, ExceptionClear)?)(self.raw);

            let throwable = RefGuard::local(self, RawRef::from_ptr(throwable));
            let message = self
                .throwable_message(throwable.get())
                .unwrap_or_else(|| "unknown Java exception".to_string());
            Err(BridgeError::HostException(message))
        }
    }

    /// Drop a pending exception without reporting it
    fn clear_exception(&self) {
        unsafe {
            if let (Ok(check), Ok(clear)) = (
                jni_fn!(self.raw, ExceptionCheck),
                jni_fn!(self.raw, ExceptionClear),
            ) {
                if check(self.raw) != JNI_FALSE {
                    clear(self.raw);
                }
            }
        }
    }

    /// `throwable.toString()`, or `None` if that fails too
    fn throwable_message(&self, throwable: RawRef) -> Option<String> {
        if throwable.is_null() {
            return None;
        }
        unsafe {
            let get_class = jni_fn!(self.raw, GetObjectClass).ok()?;
            let class = get_class(self.raw, throwable.as_ptr());
            let class = RefGuard::local(self, RawRef::from_ptr(class));
            let to_string = self.method_id(class.get(), "toString", "()Ljava/lang/String;")?;

            let call = jni_fn!(self.raw, CallObjectMethodA).ok()?;
            let jstr = call(self.raw, throwable.as_ptr(), to_string.as_ptr(), ptr::null());
            let jstr = RefGuard::local(self, RawRef::from_ptr(jstr));
            if self.check_pending() || jstr.is_null() {
                self.clear_exception();
                return None;
            }
            self.read_string(jstr.get())
        }
    }

    fn check_pending(&self) -> bool {
        unsafe {
            match jni_fn!(self.raw, ExceptionCheck) {
                Ok(check) => check(self.raw) != JNI_FALSE,
                Err(_) => false,
            }
        }
    }

    /// Copy a Java string out as (lossy) UTF-8
    fn read_string(&self, jstr: RawRef) -> Option<String> {
        unsafe {
            let get = jni_fn!(self.raw, GetStringUTFChars).ok()?;
            let release = jni_fn!(self.raw, ReleaseStringUTFChars).ok()?;
            let chars = get(self.raw, jstr.as_ptr(), ptr::null_mut());
            if chars.is_null() {
                self.clear_exception();
                return None;
            }
            let value = CStr::from_ptr(chars).to_string_lossy().into_owned();
            release(self.raw, jstr.as_ptr(), chars);
            Some(value)
        }
    }

    /// Check for an exception after a call that returned a local reference.
    fn object_result(&self, obj: jobject, what: &str) -> BridgeResult<RawRef> {
        let raw = RawRef::from_ptr(obj);
        if let Err(err) = self.check_exception() {
            self.delete_local_ref(raw);
            return Err(err);
        }
        if raw.is_null() {
            tracing::trace!(target: "hostcall", what, "JNI call returned null");
        }
        Ok(raw)
    }

    fn direct_address(&self, buffer: RawRef) -> BridgeResult<(*mut u8, usize)> {
        unsafe {
            let address = (jni_fn!(self.raw, GetDirectBufferAddress)?)(self.raw, buffer.as_ptr());
            let capacity: jlong =
                (jni_fn!(self.raw, GetDirectBufferCapacity)?)(self.raw, buffer.as_ptr());
            if address.is_null() || capacity < 0 {
                self.clear_exception();
                return Err(BridgeError::NotDirectBuffer);
            }
            let len = usize::try_from(capacity).map_err(|_| BridgeError::NotDirectBuffer)?;
            Ok((address as *mut u8, len))
        }
    }
}

impl HostEnv for JniEnv {
    fn find_class(&self, name: &str) -> BridgeResult<RawRef> {
        let cname = c_string(name)?;
        let class = unsafe { (jni_fn!(self.raw, FindClass)?)(self.raw, cname.as_ptr()) };
        let class = self.object_result(class, "FindClass")?;
        if class.is_null() {
            return Err(BridgeError::HostException(format!(
                "java.lang.NoClassDefFoundError: {}",
                name
            )));
        }
        Ok(class)
    }

    fn method_id(&self, class: RawRef, name: &str, signature: &str) -> Option<MethodId> {
        let (cname, csig) = (c_string(name).ok()?, c_string(signature).ok()?);
        let id = unsafe {
            let get = jni_fn!(self.raw, GetMethodID).ok()?;
            get(self.raw, class.as_ptr(), cname.as_ptr(), csig.as_ptr())
        };
        if id.is_null() {
            // NoSuchMethodError
            self.clear_exception();
            return None;
        }
        Some(MethodId::from_ptr(id))
    }

    fn static_method_id(&self, class: RawRef, name: &str, signature: &str) -> Option<MethodId> {
        let (cname, csig) = (c_string(name).ok()?, c_string(signature).ok()?);
        let id = unsafe {
            let get = jni_fn!(self.raw, GetStaticMethodID).ok()?;
            get(self.raw, class.as_ptr(), cname.as_ptr(), csig.as_ptr())
        };
        if id.is_null() {
            self.clear_exception();
            return None;
        }
        Some(MethodId::from_ptr(id))
    }

    fn new_string(&self, value: &str) -> BridgeResult<RawRef> {
        let cvalue = c_string(value)?;
        let jstr = unsafe { (jni_fn!(self.raw, NewStringUTF)?)(self.raw, cvalue.as_ptr()) };
        let jstr = self.object_result(jstr, "NewStringUTF")?;
        if jstr.is_null() {
            return Err(BridgeError::AllocationFailure(value.len()));
        }
        Ok(jstr)
    }

    fn call_object_method(
        &self,
        receiver: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<RawRef> {
        let values = to_jvalues(args);
        let obj = unsafe {
            (jni_fn!(self.raw, CallObjectMethodA)?)(
                self.raw,
                receiver.as_ptr(),
                method.as_ptr(),
                values.as_ptr(),
            )
        };
        self.object_result(obj, "CallObjectMethodA")
    }

    fn call_static_void(
        &self,
        class: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<()> {
        let values = to_jvalues(args);
        unsafe {
            (jni_fn!(self.raw, CallStaticVoidMethodA)?)(
                self.raw,
                class.as_ptr(),
                method.as_ptr(),
                values.as_ptr(),
            );
        }
        self.check_exception()
    }

    fn call_static_object(
        &self,
        class: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<RawRef> {
        let values = to_jvalues(args);
        let obj = unsafe {
            (jni_fn!(self.raw, CallStaticObjectMethodA)?)(
                self.raw,
                class.as_ptr(),
                method.as_ptr(),
                values.as_ptr(),
            )
        };
        self.object_result(obj, "CallStaticObjectMethodA")
    }

    fn new_object(&self, class: RawRef, ctor: MethodId, args: &[HostArg]) -> BridgeResult<RawRef> {
        let values = to_jvalues(args);
        let obj = unsafe {
            let new_object = jni_fn!(self.raw, NewObjectA)?;
            new_object(self.raw, class.as_ptr(), ctor.as_ptr(), values.as_ptr())
        };
        let obj = self.object_result(obj, "NewObjectA")?;
        if obj.is_null() {
            return Err(BridgeError::AllocationFailure(0));
        }
        Ok(obj)
    }

    fn new_local_ref(&self, obj: RawRef) -> BridgeResult<RawRef> {
        if obj.is_null() {
            return Ok(RawRef::NULL);
        }
        let local = unsafe { (jni_fn!(self.raw, NewLocalRef)?)(self.raw, obj.as_ptr()) };
        let local = self.object_result(local, "NewLocalRef")?;
        if local.is_null() {
            return Err(BridgeError::AllocationFailure(0));
        }
        Ok(local)
    }

    fn new_global_ref(&self, obj: RawRef) -> BridgeResult<RawRef> {
        if obj.is_null() {
            return Ok(RawRef::NULL);
        }
        let global = unsafe { (jni_fn!(self.raw, NewGlobalRef)?)(self.raw, obj.as_ptr()) };
        let global = self.object_result(global, "NewGlobalRef")?;
        if global.is_null() {
            return Err(BridgeError::AllocationFailure(0));
        }
        Ok(global)
    }

    fn delete_local_ref(&self, obj: RawRef) {
        if obj.is_null() {
            return;
        }
        unsafe {
            if let Ok(delete) = jni_fn!(self.raw, DeleteLocalRef) {
                delete(self.raw, obj.as_ptr());
            }
        }
    }

    fn delete_global_ref(&self, obj: RawRef) {
        if obj.is_null() {
            return;
        }
        unsafe {
            if let Ok(delete) = jni_fn!(self.raw, DeleteGlobalRef) {
                delete(self.raw, obj.as_ptr());
            }
        }
    }

    unsafe fn new_direct_buffer(&self, data: *mut u8, len: usize) -> BridgeResult<RawRef> {
        let capacity = jlong::try_from(len).map_err(|_| BridgeError::PayloadTooLarge(len))?;
        let new_buffer = jni_fn!(self.raw, NewDirectByteBuffer)?;
        let buffer = new_buffer(self.raw, data as *mut c_void, capacity);
        let buffer = self.object_result(buffer, "NewDirectByteBuffer")?;
        if buffer.is_null() {
            return Err(BridgeError::HostException(
                "JVM does not support direct buffer access".to_string(),
            ));
        }
        Ok(buffer)
    }

    fn byte_len(&self, bytes: HostBytes) -> BridgeResult<usize> {
        match bytes {
            HostBytes::DirectBuffer(buffer) => self.direct_address(buffer).map(|(_, len)| len),
            HostBytes::ByteArray(array) => {
                let len = unsafe { (jni_fn!(self.raw, GetArrayLength)?)(self.raw, array.as_ptr()) };
                self.check_exception()?;
                usize::try_from(len).map_err(|_| {
                    BridgeError::InvalidArgument(format!("negative array length {}", len))
                })
            }
        }
    }

    fn read_bytes(&self, bytes: HostBytes, dst: &mut [u8], mode: CopyMode) -> BridgeResult<()> {
        match (bytes, mode) {
            (HostBytes::DirectBuffer(buffer), _) => {
                let (address, len) = self.direct_address(buffer)?;
                if len < dst.len() {
                    return Err(BridgeError::InvalidArgument(format!(
                        "direct buffer holds {} bytes, {} requested",
                        len,
                        dst.len()
                    )));
                }
                unsafe { ptr::copy_nonoverlapping(address, dst.as_mut_ptr(), dst.len()) };
                Ok(())
            }
            (HostBytes::ByteArray(array), CopyMode::Region) => {
                let len = to_jsize(dst.len())?;
                unsafe {
                    (jni_fn!(self.raw, GetByteArrayRegion)?)(
                        self.raw,
                        array.as_ptr(),
                        0,
                        len,
                        dst.as_mut_ptr() as *mut jbyte,
                    );
                }
                self.check_exception()
            }
            (HostBytes::ByteArray(array), CopyMode::Critical) => unsafe {
                let get = jni_fn!(self.raw, GetPrimitiveArrayCritical)?;
                let release = jni_fn!(self.raw, ReleasePrimitiveArrayCritical)?;
                // No other JNI call may happen between get and release
                let elements = get(self.raw, array.as_ptr(), ptr::null_mut());
                if elements.is_null() {
                    self.check_exception()?;
                    return Err(BridgeError::AllocationFailure(dst.len()));
                }
                ptr::copy_nonoverlapping(elements as *const u8, dst.as_mut_ptr(), dst.len());
                release(self.raw, array.as_ptr(), elements, JNI_ABORT);
                Ok(())
            },
        }
    }
}
