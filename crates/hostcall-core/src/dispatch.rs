//! Static method dispatch
//!
//! Every call names a registered class and a static method. The method is
//! resolved per call against one of six fixed signatures, chosen by the
//! entrypoint the caller used; there is no overload resolution beyond that.

use crate::bridge::{Bridge, Registry};
use crate::channel::NativeCallback;
use crate::env::EnvGuard;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostArg, HostBytes, HostEnv, HostVm, MethodId, RawRef};
use crate::marshal::{from_bridge, to_bridge};
use crate::payload::{PayloadBuffer, PayloadStatus};
use crate::reference::RefGuard;

/// The fixed signatures a static method may have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// `static void m()`
    Void,
    /// `static void m(ByteBuffer)`
    VoidWithArgs,
    /// `static ByteBuffer m()`
    Return,
    /// `static ByteBuffer m(ByteBuffer)`
    ReturnWithArgs,
    /// `static void m(ResultChannel)`
    Async,
    /// `static void m(ResultChannel, ByteBuffer)`
    AsyncWithArgs,
}

impl CallShape {
    /// Host method descriptor for this shape
    pub const fn signature(self) -> &'static str {
        match self {
            CallShape::Void => "()V",
            CallShape::VoidWithArgs => "(Ljava/nio/ByteBuffer;)V",
            CallShape::Return => "()Ljava/nio/ByteBuffer;",
            CallShape::ReturnWithArgs => "(Ljava/nio/ByteBuffer;)Ljava/nio/ByteBuffer;",
            CallShape::Async => "(Ldev/hostcall/ResultChannel;)V",
            CallShape::AsyncWithArgs => "(Ldev/hostcall/ResultChannel;Ljava/nio/ByteBuffer;)V",
        }
    }

    /// Whether the method receives a channel object
    pub const fn is_async(self) -> bool {
        matches!(self, CallShape::Async | CallShape::AsyncWithArgs)
    }
}

fn resolve<E: HostEnv>(
    env: &E,
    class: RawRef,
    class_name: &str,
    method: &str,
    shape: CallShape,
) -> BridgeResult<MethodId> {
    env.static_method_id(class, method, shape.signature())
        .ok_or_else(|| BridgeError::method_resolution(class_name, method, shape.signature()))
}

/// Per-call local references to the target class and, for asynchronous
/// shapes, the channel class. The registry lock is not held while they live.
struct CallTarget<'env, E: HostEnv> {
    class: RefGuard<'env, E>,
    channel: Option<(RefGuard<'env, E>, MethodId)>,
}

impl<V: HostVm> Bridge<V> {
    /// Run `f` with the class pinned by a local reference.
    ///
    /// The registry read lock only covers the lookup, so the host method may
    /// re-enter the bridge (register, call) and teardown may proceed on
    /// another thread while it runs.
    fn with_class<T>(
        &self,
        class_name: &str,
        shape: CallShape,
        f: impl FnOnce(&V::Env, &CallTarget<'_, V::Env>) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        // Unknown classes fail before the thread is attached
        self.lookup_class(class_name)?;
        let env = EnvGuard::acquire(&self.vm)?;
        let env = env.env();
        let target = {
            let registry = self.registry.read();
            let registry = registry.as_ref().ok_or(BridgeError::NotInitialized)?;
            pin_target(env, registry, class_name, shape)?
        };
        f(env, &target)
    }

    /// `static void method()`
    pub fn call_void(&self, class_name: &str, method: &str) -> BridgeResult<()> {
        tracing::debug!(target: "hostcall", class = class_name, method, "call_void");
        self.with_class(class_name, CallShape::Void, |env, target| {
            let class = target.class.get();
            let id = resolve(env, class, class_name, method, CallShape::Void)?;
            env.call_static_void(class, id, &[])
        })
    }

    /// `static void method(ByteBuffer)`; the buffer is a view of `args`
    pub fn call_void_with_args(
        &self,
        class_name: &str,
        method: &str,
        args: &PayloadBuffer,
    ) -> BridgeResult<()> {
        tracing::debug!(target: "hostcall", class = class_name, method, size = args.len(), "call_void_with_args");
        self.with_class(class_name, CallShape::VoidWithArgs, |env, target| {
            let class = target.class.get();
            let id = resolve(env, class, class_name, method, CallShape::VoidWithArgs)?;
            let view = from_bridge(env, args)?;
            env.call_static_void(class, id, &[HostArg::Object(view.get())])
        })
    }

    /// `static ByteBuffer method()`; the result is copied into a new buffer
    /// tagged `Ok`
    pub fn call_return(&self, class_name: &str, method: &str) -> BridgeResult<PayloadBuffer> {
        tracing::debug!(target: "hostcall", class = class_name, method, "call_return");
        self.with_class(class_name, CallShape::Return, |env, target| {
            let class = target.class.get();
            let id = resolve(env, class, class_name, method, CallShape::Return)?;
            let returned = RefGuard::local(env, env.call_static_object(class, id, &[])?);
            self.marshal_return(env, &returned)
        })
    }

    /// `static ByteBuffer method(ByteBuffer)`
    pub fn call_return_with_args(
        &self,
        class_name: &str,
        method: &str,
        args: &PayloadBuffer,
    ) -> BridgeResult<PayloadBuffer> {
        tracing::debug!(target: "hostcall", class = class_name, method, size = args.len(), "call_return_with_args");
        self.with_class(class_name, CallShape::ReturnWithArgs, |env, target| {
            let class = target.class.get();
            let id = resolve(env, class, class_name, method, CallShape::ReturnWithArgs)?;
            let returned = {
                let view = from_bridge(env, args)?;
                RefGuard::local(
                    env,
                    env.call_static_object(class, id, &[HostArg::Object(view.get())])?,
                )
            };
            self.marshal_return(env, &returned)
        })
    }

    /// `static void method(ResultChannel)`; returns once the host method
    /// returns, the result arrives later through `callback`
    pub fn call_void_async(
        &self,
        class_name: &str,
        method: &str,
        callback: Option<NativeCallback>,
    ) -> BridgeResult<()> {
        tracing::debug!(target: "hostcall", class = class_name, method, "call_void_async");
        self.issue_async(class_name, method, callback, None)
    }

    /// `static void method(ResultChannel, ByteBuffer)`
    pub fn call_void_async_with_args(
        &self,
        class_name: &str,
        method: &str,
        callback: Option<NativeCallback>,
        args: &PayloadBuffer,
    ) -> BridgeResult<()> {
        tracing::debug!(target: "hostcall", class = class_name, method, size = args.len(), "call_void_async_with_args");
        self.issue_async(class_name, method, callback, Some(args))
    }

    fn issue_async(
        &self,
        class_name: &str,
        method: &str,
        callback: Option<NativeCallback>,
        args: Option<&PayloadBuffer>,
    ) -> BridgeResult<()> {
        let shape = if args.is_some() {
            CallShape::AsyncWithArgs
        } else {
            CallShape::Async
        };
        self.with_class(class_name, shape, |env, target| {
            let id = resolve(env, target.class.get(), class_name, method, shape)?;
            let token = self.callbacks.issue(callback);
            let issued = invoke_with_channel(env, target, id, token, args);
            if issued.is_err() {
                self.callbacks.withdraw(token);
            }
            issued
        })
    }

    fn marshal_return(
        &self,
        env: &V::Env,
        returned: &RefGuard<'_, V::Env>,
    ) -> BridgeResult<PayloadBuffer> {
        if returned.is_null() {
            return PayloadBuffer::from_vec(PayloadStatus::Ok, Vec::new());
        }
        to_bridge(
            env,
            HostBytes::DirectBuffer(returned.get()),
            PayloadStatus::Ok,
            self.config.copy_mode,
        )
    }
}

/// Take local references to the class (and channel class) under the
/// registry lock
fn pin_target<'env, E: HostEnv>(
    env: &'env E,
    registry: &Registry,
    class_name: &str,
    shape: CallShape,
) -> BridgeResult<CallTarget<'env, E>> {
    let class = RefGuard::local(env, env.new_local_ref(registry.lookup(class_name)?)?);
    let channel = if shape.is_async() {
        let channel = RefGuard::local(env, env.new_local_ref(registry.channel.class)?);
        Some((channel, registry.channel.ctor))
    } else {
        None
    };
    Ok(CallTarget { class, channel })
}

/// Construct the channel object carrying `token` and invoke the method
fn invoke_with_channel<E: HostEnv>(
    env: &E,
    target: &CallTarget<'_, E>,
    method: MethodId,
    token: i64,
    args: Option<&PayloadBuffer>,
) -> BridgeResult<()> {
    let class = target.class.get();
    let (channel_class, ctor) = target
        .channel
        .as_ref()
        .map(|(channel, ctor)| (channel.get(), *ctor))
        .ok_or_else(|| BridgeError::InvalidArgument("channel class not pinned".to_string()))?;
    let channel = RefGuard::local(
        env,
        env.new_object(channel_class, ctor, &[HostArg::Long(token)])?,
    );
    match args {
        Some(args) => {
            let view = from_bridge(env, args)?;
            env.call_static_void(
                class,
                method,
                &[HostArg::Object(channel.get()), HostArg::Object(view.get())],
            )
        }
        None => env.call_static_void(class, method, &[HostArg::Object(channel.get())]),
    }
}
