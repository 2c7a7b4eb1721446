//! JNI binding of the hostcall bridge
//!
//! Loading this library into a JVM (`System.loadLibrary("hostcall")`) runs
//! `JNI_OnLoad`, which reads the configuration, installs logging and
//! initializes the process-wide [`Bridge`]. Native code then calls the C
//! exports in [`ffi`]; Java code completes asynchronous calls through the
//! native methods in [`completion`]. `JNI_OnUnload` tears the bridge down.
//!
//! The Java side of the channel ships with the crate as
//! `java/dev/hostcall/ResultChannel.java`.

pub mod completion;
pub mod ffi;
pub mod jvm;
pub mod logging;

use hostcall_core::{Bridge, BridgeConfig, BridgeError, BridgeResult};
use jni::sys::{self, jint, JNI_ERR};
use jvm::{JniVm, JNI_VERSION};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub use ffi::HostcallError;
pub use hostcall_core::{PayloadBuffer, PayloadStatus};

/// The bridge bound to the JVM that loaded this library
static BRIDGE: Lazy<RwLock<Option<Arc<Bridge<JniVm>>>>> = Lazy::new(|| RwLock::new(None));

/// Current bridge, kept alive for the duration of a call
pub(crate) fn bridge() -> BridgeResult<Arc<Bridge<JniVm>>> {
    BRIDGE.read().clone().ok_or(BridgeError::NotInitialized)
}

/// Called by the JVM when the library is loaded
///
/// # Safety
/// Must only be called by the JVM, with its own `JavaVM`
#[no_mangle]
pub unsafe extern "system" fn JNI_OnLoad(vm: *mut sys::JavaVM, _reserved: *mut c_void) -> jint {
    let (config, config_error) = match BridgeConfig::from_env() {
        Ok(config) => (config, None),
        Err(err) => (BridgeConfig::default(), Some(err)),
    };
    logging::init(&config.log_filter);
    if let Some(err) = config_error {
        tracing::warn!(target: "hostcall", %err, "using default configuration");
    }

    let loaded = panic::catch_unwind(AssertUnwindSafe(|| {
        let vm = JniVm::from_raw(vm, config.describe_exceptions)?;
        Bridge::init(vm, config)
    }))
    .unwrap_or_else(|payload| Err(BridgeError::Panic(ffi::panic_message(payload.as_ref()))));

    match loaded {
        Ok(bridge) => {
            let previous = BRIDGE.write().replace(Arc::new(bridge));
            if previous.is_some() {
                tracing::warn!(target: "hostcall", "replacing a bridge that was never unloaded");
            }
            tracing::info!(target: "hostcall", version = env!("CARGO_PKG_VERSION"), "bridge loaded");
            JNI_VERSION
        }
        Err(err) => {
            tracing::error!(target: "hostcall", %err, "bridge initialization failed");
            JNI_ERR
        }
    }
}

/// Called by the JVM when the library's class loader is collected
///
/// # Safety
/// Must only be called by the JVM
#[no_mangle]
pub unsafe extern "system" fn JNI_OnUnload(_vm: *mut sys::JavaVM, _reserved: *mut c_void) {
    let Some(bridge) = BRIDGE.write().take() else {
        return;
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| bridge.teardown()))
        .unwrap_or_else(|payload| Err(BridgeError::Panic(ffi::panic_message(payload.as_ref()))));
    if let Err(err) = result {
        tracing::error!(target: "hostcall", %err, "bridge teardown failed");
    }
}
