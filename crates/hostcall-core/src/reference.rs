//! Scoped ownership of host references

use crate::host::{HostEnv, RawRef};

/// Which host-side release a reference needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefScope {
    /// Scoped to the current native call
    Local,
    /// Lives until explicitly deleted, usable from any thread
    Global,
}

/// Owns a single host reference and releases it on drop.
///
/// The guard is move-only. [`RefGuard::get`] lends out the raw handle
/// without giving up ownership; [`RefGuard::into_raw`] is the only way to
/// take ownership back.
pub struct RefGuard<'env, E: HostEnv> {
    env: Option<&'env E>,
    raw: RawRef,
    scope: RefScope,
}

impl<'env, E: HostEnv> RefGuard<'env, E> {
    pub fn new(env: &'env E, raw: RawRef, scope: RefScope) -> Self {
        RefGuard {
            env: Some(env),
            raw,
            scope,
        }
    }

    pub fn local(env: &'env E, raw: RawRef) -> Self {
        Self::new(env, raw, RefScope::Local)
    }

    pub fn global(env: &'env E, raw: RawRef) -> Self {
        Self::new(env, raw, RefScope::Global)
    }

    /// A guard holding nothing; dropping it releases nothing
    pub fn empty() -> Self {
        RefGuard {
            env: None,
            raw: RawRef::NULL,
            scope: RefScope::Local,
        }
    }

    /// Borrow the raw handle. Ownership stays with the guard.
    #[inline]
    pub fn get(&self) -> RawRef {
        self.raw
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// Give up ownership; the caller becomes responsible for the release
    pub fn into_raw(mut self) -> RawRef {
        let raw = self.raw;
        self.raw = RawRef::NULL;
        raw
    }
}

impl<E: HostEnv> Drop for RefGuard<'_, E> {
    fn drop(&mut self) {
        let Some(env) = self.env else {
            return;
        };
        if self.raw.is_null() {
            return;
        }
        match self.scope {
            RefScope::Local => env.delete_local_ref(self.raw),
            RefScope::Global => env.delete_global_ref(self.raw),
        }
        self.raw = RawRef::NULL;
    }
}

impl<E: HostEnv> std::fmt::Debug for RefGuard<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefGuard")
            .field("raw", &self.raw)
            .field("scope", &self.scope)
            .finish()
    }
}
