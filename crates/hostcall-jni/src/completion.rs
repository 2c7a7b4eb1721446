//! Native methods of `dev.hostcall.ResultChannel`
//!
//! The JVM calls these when Java code completes a channel, on whatever
//! thread that happens. The pending callback for the token fires before the
//! native method returns.

use crate::ffi::panic_message;
use crate::jvm::JniEnv;
use hostcall_core::{BridgeError, BridgeResult, Completion, Delivery, RawRef};
use jni::objects::{JByteArray, JClass};
use jni::sys::jlong;
use jni::JNIEnv;
use std::panic::{self, AssertUnwindSafe};

const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";

/// `static native void success(long token, byte[] value)`
#[no_mangle]
pub extern "system" fn Java_dev_hostcall_ResultChannel_success<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    token: jlong,
    value: JByteArray<'local>,
) {
    complete(&mut env, token, Completion::Success, &value);
}

/// `static native void failure(long token, byte[] value)`
#[no_mangle]
pub extern "system" fn Java_dev_hostcall_ResultChannel_failure<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    token: jlong,
    value: JByteArray<'local>,
) {
    complete(&mut env, token, Completion::Failure, &value);
}

fn complete(env: &mut JNIEnv<'_>, token: jlong, completion: Completion, value: &JByteArray<'_>) {
    let raw_env = env.get_raw();
    let result = panic::catch_unwind(AssertUnwindSafe(|| -> BridgeResult<Delivery> {
        let bridge = crate::bridge()?;
        let host = unsafe { JniEnv::from_raw(raw_env, bridge.config().describe_exceptions) };
        bridge.complete(&host, token, completion, RawRef::from_ptr(value.as_raw()))
    }))
    .unwrap_or_else(|payload| Err(BridgeError::Panic(panic_message(payload.as_ref()))));

    match result {
        Ok(_) => {}
        Err(BridgeError::NotInitialized) => {
            tracing::warn!(target: "hostcall", token, ?completion, "completion after bridge unload");
        }
        Err(err) => {
            tracing::error!(target: "hostcall", token, ?completion, %err, "completion failed");
            let _ = env.throw_new(ILLEGAL_STATE, err.to_string());
        }
    }
}
