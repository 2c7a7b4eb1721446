//! Bridge lifecycle and class registration
//!
//! A [`Bridge`] owns everything the host runtime must not outlive: the
//! pinned channel class, the application class loader, and the class cache.
//! [`Bridge::init`] runs when the host runtime loads the bridge and
//! [`Bridge::teardown`] when it unloads it; every global reference taken in
//! between is released exactly once by teardown.

use crate::channel::{deliver, CallbackTable, Completion, Delivery};
use crate::config::BridgeConfig;
use crate::env::EnvGuard;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostArg, HostEnv, HostVm, MethodId, RawRef};
use crate::reference::RefGuard;
use crate::registry::ClassRegistry;
use parking_lot::RwLock;

/// Host-side channel class, slash-separated
pub const CHANNEL_CLASS: &str = "dev/hostcall/ResultChannel";

/// Channel constructor signature: takes the correlation token
pub const CHANNEL_CTOR_SIG: &str = "(J)V";

const CLASS_CLASS: &str = "java/lang/Class";
const CLASS_LOADER_CLASS: &str = "java/lang/ClassLoader";
const GET_CLASS_LOADER: (&str, &str) = ("getClassLoader", "()Ljava/lang/ClassLoader;");
const LOAD_CLASS: (&str, &str) = ("loadClass", "(Ljava/lang/String;)Ljava/lang/Class;");

// ============================================================================
// Registry state
// ============================================================================

/// Pinned channel class and its constructor
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelClass {
    pub(crate) class: RawRef,
    pub(crate) ctor: MethodId,
}

/// Application class loader captured at init
#[derive(Debug, Clone, Copy)]
struct AppLoader {
    loader: RawRef,
    load_class: MethodId,
}

/// Process-wide state between init and teardown
pub(crate) struct Registry {
    pub(crate) classes: ClassRegistry<RawRef>,
    pub(crate) channel: ChannelClass,
    loader: Option<AppLoader>,
}

impl Registry {
    pub(crate) fn lookup(&self, name: &str) -> BridgeResult<RawRef> {
        self.classes
            .get(name)
            .ok_or_else(|| BridgeError::ClassNotRegistered(name.to_string()))
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// The static-method bridge over one host runtime
pub struct Bridge<V: HostVm> {
    pub(crate) vm: V,
    pub(crate) config: BridgeConfig,
    pub(crate) registry: RwLock<Option<Registry>>,
    pub(crate) callbacks: CallbackTable,
}

impl<V: HostVm> Bridge<V> {
    /// Pin the channel class, its constructor and (optionally) the
    /// application class loader.
    pub fn init(vm: V, config: BridgeConfig) -> BridgeResult<Self> {
        let registry = load_registry(&vm, &config)?;
        tracing::debug!(target: "hostcall", class_loader = registry.loader.is_some(), "bridge initialized");
        Ok(Bridge {
            vm,
            config,
            registry: RwLock::new(Some(registry)),
            callbacks: CallbackTable::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// False once torn down
    pub fn is_initialized(&self) -> bool {
        self.registry.read().is_some()
    }

    /// Number of cached classes
    pub fn registered_classes(&self) -> usize {
        self.registry
            .read()
            .as_ref()
            .map_or(0, |registry| registry.classes.len())
    }

    /// Issued asynchronous calls still waiting for completion
    pub fn pending_calls(&self) -> usize {
        self.callbacks.pending()
    }

    /// Resolve `name` in the host runtime and cache a global reference to it.
    ///
    /// Registering a cached name is a no-op, so the cached handle never
    /// changes once stored.
    pub fn register_class(&self, name: &str) -> BridgeResult<()> {
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument("empty class name".to_string()));
        }

        let env = EnvGuard::acquire(&self.vm)?;
        let env = env.env();
        // Not held across class loading: static initializers may re-enter
        let loader = {
            let registry = self.registry.read();
            let registry = registry.as_ref().ok_or(BridgeError::NotInitialized)?;
            if registry.classes.contains(name) {
                return Ok(());
            }
            match registry.loader {
                Some(app) => Some((
                    RefGuard::local(env, env.new_local_ref(app.loader)?),
                    app.load_class,
                )),
                None => None,
            }
        };
        let loader = loader.as_ref().map(|(guard, load_class)| AppLoader {
            loader: guard.get(),
            load_class: *load_class,
        });
        let local = RefGuard::local(env, load_class(env, loader, name)?);
        let global = RefGuard::global(env, env.new_global_ref(local.get())?);

        let mut registry = self.registry.write();
        let registry = registry.as_mut().ok_or(BridgeError::NotInitialized)?;
        if registry.classes.contains(name) {
            // Lost a registration race; our reference is released by the guard
            tracing::debug!(target: "hostcall", name, "class registered concurrently");
            return Ok(());
        }
        registry.classes.put(name, global.into_raw());
        tracing::debug!(target: "hostcall", name, cached = registry.classes.len(), "registered class");
        Ok(())
    }

    /// Cached handle for `name`
    pub fn lookup_class(&self, name: &str) -> BridgeResult<RawRef> {
        let registry = self.registry.read();
        registry
            .as_ref()
            .ok_or(BridgeError::NotInitialized)?
            .lookup(name)
    }

    /// Completion entrypoint: the host fired `success` or `failure` on a
    /// channel object.
    ///
    /// Runs on whichever thread the host chose, with that thread's context.
    pub fn complete(
        &self,
        env: &V::Env,
        token: i64,
        completion: Completion,
        bytes: RawRef,
    ) -> BridgeResult<Delivery> {
        deliver(
            &self.callbacks,
            env,
            token,
            completion,
            bytes,
            self.config.copy_mode,
        )
    }

    /// Release every global reference and forget pending callbacks.
    ///
    /// Idempotent. If the calling thread cannot obtain a context the state
    /// is left intact and the error returned.
    pub fn teardown(&self) -> BridgeResult<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        let env = EnvGuard::acquire(&self.vm)?;
        let Some(mut registry) = self.registry.write().take() else {
            return Ok(());
        };

        let classes = registry.classes.drain();
        let released = classes.len();
        for class in classes {
            env.delete_global_ref(class);
        }
        env.delete_global_ref(registry.channel.class);
        if let Some(loader) = registry.loader {
            env.delete_global_ref(loader.loader);
        }

        let dropped = self.callbacks.clear();
        if dropped > 0 {
            tracing::warn!(target: "hostcall", dropped, "teardown with asynchronous calls still pending");
        }
        tracing::debug!(target: "hostcall", released, "bridge torn down");
        Ok(())
    }
}

impl<V: HostVm> Drop for Bridge<V> {
    fn drop(&mut self) {
        if self.registry.get_mut().is_some() {
            if let Err(err) = self.teardown() {
                tracing::warn!(target: "hostcall", %err, "bridge dropped without teardown");
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load_registry<V: HostVm>(vm: &V, config: &BridgeConfig) -> BridgeResult<Registry> {
    let env = EnvGuard::acquire(vm)?;
    let env = env.env();

    let channel = RefGuard::local(env, env.find_class(CHANNEL_CLASS)?);
    let ctor = env
        .method_id(channel.get(), "<init>", CHANNEL_CTOR_SIG)
        .ok_or_else(|| BridgeError::method_resolution(CHANNEL_CLASS, "<init>", CHANNEL_CTOR_SIG))?;

    let loader = if config.class_loader {
        Some(capture_loader(env, channel.get())?)
    } else {
        None
    };
    let loader_guard = match loader {
        Some(l) => RefGuard::global(env, l.loader),
        None => RefGuard::empty(),
    };

    let class = env.new_global_ref(channel.get())?;
    loader_guard.into_raw();

    Ok(Registry {
        classes: ClassRegistry::new(),
        channel: ChannelClass { class, ctor },
        loader,
    })
}

/// Pin `channel_class.getClassLoader()` and resolve `ClassLoader.loadClass`
fn capture_loader<E: HostEnv>(env: &E, channel_class: RawRef) -> BridgeResult<AppLoader> {
    let class_class = RefGuard::local(env, env.find_class(CLASS_CLASS)?);
    let get_loader = env
        .method_id(class_class.get(), GET_CLASS_LOADER.0, GET_CLASS_LOADER.1)
        .ok_or_else(|| {
            BridgeError::method_resolution(CLASS_CLASS, GET_CLASS_LOADER.0, GET_CLASS_LOADER.1)
        })?;

    let loader_class = RefGuard::local(env, env.find_class(CLASS_LOADER_CLASS)?);
    let load_class = env
        .method_id(loader_class.get(), LOAD_CLASS.0, LOAD_CLASS.1)
        .ok_or_else(|| {
            BridgeError::method_resolution(CLASS_LOADER_CLASS, LOAD_CLASS.0, LOAD_CLASS.1)
        })?;

    let local = RefGuard::local(env, env.call_object_method(channel_class, get_loader, &[])?);
    if local.is_null() {
        return Err(BridgeError::ClassLoadFailed {
            name: CHANNEL_CLASS.to_string(),
            reason: "channel class has no class loader".to_string(),
        });
    }
    let loader = env.new_global_ref(local.get())?;
    Ok(AppLoader { loader, load_class })
}

/// Resolve a class as a local reference
fn load_class<E: HostEnv>(env: &E, loader: Option<AppLoader>, name: &str) -> BridgeResult<RawRef> {
    let loaded = match loader {
        Some(app) => {
            // ClassLoader expects binary names
            let binary = name.replace('/', ".");
            let jname = RefGuard::local(env, env.new_string(&binary)?);
            env.call_object_method(app.loader, app.load_class, &[HostArg::Object(jname.get())])
        }
        None => env.find_class(name),
    };

    match loaded {
        Ok(class) if !class.is_null() => Ok(class),
        Ok(_) => Err(BridgeError::ClassLoadFailed {
            name: name.to_string(),
            reason: "class not found".to_string(),
        }),
        Err(BridgeError::HostException(reason)) => Err(BridgeError::ClassLoadFailed {
            name: name.to_string(),
            reason,
        }),
        Err(err) => Err(err),
    }
}
