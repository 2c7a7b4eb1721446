//! Core of the hostcall bridge
//!
//! Lets a native caller invoke static methods of an object-oriented host
//! runtime, synchronously or asynchronously, exchanging opaque byte
//! buffers. The two sides keep separate memory managers and threading
//! models; this crate owns the discipline between them:
//!
//! - [`env`]: per-call thread attachment, detached only by whoever attached
//! - [`reference`]: move-only guards over host references
//! - [`registry`]: the class-handle cache
//! - [`payload`] / [`marshal`]: caller-owned buffers and the copies in and out
//! - [`dispatch`]: the fixed call shapes
//! - [`channel`]: correlation tokens and asynchronous completion
//!
//! The host runtime itself is abstracted by the traits in [`host`]; the JNI
//! implementation lives in `hostcall-jni`.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod host;
pub mod marshal;
pub mod payload;
pub mod reference;
pub mod registry;

pub use bridge::{Bridge, CHANNEL_CLASS, CHANNEL_CTOR_SIG};
pub use channel::{Completion, Delivery, NativeCallback, NULL_TOKEN};
pub use config::{BridgeConfig, ConfigError};
pub use dispatch::CallShape;
pub use error::{BridgeError, BridgeResult};
pub use host::{CopyMode, EnvStatus, HostArg, HostBytes, HostEnv, HostVm, MethodId, RawRef};
pub use payload::{PayloadBuffer, PayloadStatus};
