//! Thread attachment
//!
//! [`EnvGuard`] hands out the calling thread's execution context. If the
//! thread had none, it is attached for the lifetime of the guard and
//! detached when the guard drops. A thread that was already attached is
//! never detached by the bridge, since some other owner holds that
//! attachment.

use crate::error::{BridgeError, BridgeResult};
use crate::host::{EnvStatus, HostVm};
use std::ops::Deref;

/// Scoped execution context of the calling thread
pub struct EnvGuard<'vm, V: HostVm> {
    vm: &'vm V,
    env: V::Env,
    attached: bool,
}

impl<'vm, V: HostVm> EnvGuard<'vm, V> {
    /// Acquire the calling thread's context, attaching if necessary.
    ///
    /// Fails with [`BridgeError::EnvironmentUnavailable`] when the runtime
    /// rejects the query or the attach.
    pub fn acquire(vm: &'vm V) -> BridgeResult<Self> {
        match vm.get_env() {
            EnvStatus::Attached(env) => Ok(EnvGuard {
                vm,
                env,
                attached: false,
            }),
            EnvStatus::Detached => match vm.attach_current_thread() {
                Some(env) => {
                    tracing::trace!(target: "hostcall", "attached thread {:?}", std::thread::current().id());
                    Ok(EnvGuard {
                        vm,
                        env,
                        attached: true,
                    })
                }
                None => Err(BridgeError::EnvironmentUnavailable),
            },
            EnvStatus::Unavailable => Err(BridgeError::EnvironmentUnavailable),
        }
    }

    pub fn env(&self) -> &V::Env {
        &self.env
    }
}

impl<V: HostVm> Deref for EnvGuard<'_, V> {
    type Target = V::Env;

    fn deref(&self) -> &V::Env {
        &self.env
    }
}

impl<V: HostVm> Drop for EnvGuard<'_, V> {
    fn drop(&mut self) {
        if self.attached {
            self.attached = false;
            self.vm.detach_current_thread();
            tracing::trace!(target: "hostcall", "detached thread {:?}", std::thread::current().id());
        }
    }
}
