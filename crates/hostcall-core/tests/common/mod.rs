//! In-process fake host runtime for bridge tests
//!
//! Models just enough of an object-oriented VM: classes with static methods
//! backed by closures, local/global reference tables with leak and
//! double-release accounting, per-thread attachment, an application class
//! loader, direct buffers and byte arrays.

#![allow(dead_code, unused_macros)]

use hostcall_core::{
    BridgeError, BridgeResult, CopyMode, EnvStatus, HostArg, HostBytes, HostEnv, HostVm,
    MethodId, PayloadBuffer, PayloadStatus, RawRef, CHANNEL_CLASS, CHANNEL_CTOR_SIG,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

// ============================================================================
// Values seen by fake static methods
// ============================================================================

/// Argument as the fake host method sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeValue {
    /// Contents of a direct buffer argument
    Bytes(Vec<u8>),
    /// Channel object carrying a correlation token
    Channel(i64),
    Other,
}

/// What a fake static method returns
pub enum FakeReturn {
    Void,
    Null,
    Bytes(Vec<u8>),
}

pub type StaticFn =
    Arc<dyn Fn(&FakeEnv, &[FakeValue]) -> Result<FakeReturn, String> + Send + Sync>;

/// Misuse of the fake host by the code under test
pub fn invalid(message: &str) -> BridgeError {
    BridgeError::InvalidArgument(message.to_string())
}

// ============================================================================
// Heap
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Local,
    Global,
}

enum Obj {
    Class(String),
    Str(String),
    /// Direct buffer over native memory
    View { ptr: usize, len: usize },
    /// Direct buffer allocated by the host
    Owned(Vec<u8>),
    Array(Vec<u8>),
    Channel(i64),
    Loader,
}

enum Method {
    Static {
        class: String,
        name: String,
        sig: String,
        body: StaticFn,
    },
    ChannelCtor,
    GetClassLoader,
    LoadClass,
}

#[derive(Default)]
struct State {
    next_id: usize,
    objects: HashMap<usize, Obj>,
    refs: HashMap<usize, (usize, Kind)>,
    /// Visible through `find_class`
    system_classes: HashMap<String, usize>,
    /// Visible only through the application loader
    app_classes: HashMap<String, usize>,
    methods: HashMap<usize, Method>,
}

impl State {
    fn alloc(&mut self, obj: Obj) -> usize {
        self.next_id += 1;
        self.objects.insert(self.next_id, obj);
        self.next_id
    }

    fn new_ref(&mut self, obj: usize, kind: Kind) -> RawRef {
        self.next_id += 1;
        self.refs.insert(self.next_id, (obj, kind));
        RawRef::from_addr(self.next_id)
    }

    fn resolve(&self, handle: RawRef) -> Result<&Obj, BridgeError> {
        let (obj, _) = self
            .refs
            .get(&handle.addr())
            .ok_or_else(|| BridgeError::InvalidArgument(format!("dead handle {:?}", handle)))?;
        self.objects
            .get(obj)
            .ok_or_else(|| BridgeError::InvalidArgument("dangling object".to_string()))
    }

    fn class_name(&self, handle: RawRef) -> Option<String> {
        match self.resolve(handle) {
            Ok(Obj::Class(name)) => Some(name.clone()),
            _ => None,
        }
    }

    fn add_method(&mut self, method: Method) -> usize {
        self.next_id += 1;
        self.methods.insert(self.next_id, method);
        self.next_id
    }
}

#[derive(Default)]
struct Heap {
    state: Mutex<State>,
    attached: Mutex<HashSet<ThreadId>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    refuse_attach: AtomicBool,
    double_releases: AtomicUsize,
    critical_copies: AtomicUsize,
    region_copies: AtomicUsize,
    loader_loads: AtomicUsize,
}

// ============================================================================
// FakeVm
// ============================================================================

/// Fake host runtime; clones share the same heap
#[derive(Clone)]
pub struct FakeVm {
    heap: Arc<Heap>,
}

impl FakeVm {
    /// A VM with the channel class and the reflection classes the bridge needs
    pub fn new() -> Self {
        let vm = FakeVm {
            heap: Arc::new(Heap::default()),
        };
        {
            let mut state = vm.heap.state.lock().unwrap();
            for name in [CHANNEL_CLASS, "java/lang/Class", "java/lang/ClassLoader"] {
                let id = state.alloc(Obj::Class(name.to_string()));
                state.system_classes.insert(name.to_string(), id);
            }
            state.add_method(Method::ChannelCtor);
            state.add_method(Method::GetClassLoader);
            state.add_method(Method::LoadClass);
            state.alloc(Obj::Loader);
        }
        vm
    }

    /// Define a static method on a class visible to every loader
    pub fn define_static<F>(&self, class: &str, name: &str, sig: &str, body: F)
    where
        F: Fn(&FakeEnv, &[FakeValue]) -> Result<FakeReturn, String> + Send + Sync + 'static,
    {
        self.define(class, name, sig, Arc::new(body), false);
    }

    /// Define a static method on a class only the application loader sees
    pub fn define_app_static<F>(&self, class: &str, name: &str, sig: &str, body: F)
    where
        F: Fn(&FakeEnv, &[FakeValue]) -> Result<FakeReturn, String> + Send + Sync + 'static,
    {
        self.define(class, name, sig, Arc::new(body), true);
    }

    /// Define a class with no methods
    pub fn define_class(&self, class: &str) {
        let mut state = self.heap.state.lock().unwrap();
        if !state.system_classes.contains_key(class) {
            let id = state.alloc(Obj::Class(class.to_string()));
            state.system_classes.insert(class.to_string(), id);
        }
    }

    fn define(&self, class: &str, name: &str, sig: &str, body: StaticFn, app_only: bool) {
        let mut state = self.heap.state.lock().unwrap();
        let known = state.system_classes.contains_key(class) || state.app_classes.contains_key(class);
        if !known {
            let id = state.alloc(Obj::Class(class.to_string()));
            if app_only {
                state.app_classes.insert(class.to_string(), id);
            } else {
                state.system_classes.insert(class.to_string(), id);
            }
        }
        state.add_method(Method::Static {
            class: class.to_string(),
            name: name.to_string(),
            sig: sig.to_string(),
            body,
        });
    }

    /// Mark the calling thread as attached by someone other than the bridge
    pub fn attach_externally(&self) {
        self.heap
            .attached
            .lock()
            .unwrap()
            .insert(std::thread::current().id());
    }

    pub fn detach_externally(&self) {
        self.heap
            .attached
            .lock()
            .unwrap()
            .remove(&std::thread::current().id());
    }

    pub fn is_current_thread_attached(&self) -> bool {
        self.heap
            .attached
            .lock()
            .unwrap()
            .contains(&std::thread::current().id())
    }

    pub fn refuse_attach(&self, refuse: bool) {
        self.heap.refuse_attach.store(refuse, Ordering::SeqCst);
    }

    /// A context for a thread the host itself runs (completion delivery)
    pub fn host_thread_env(&self) -> FakeEnv {
        self.attach_externally();
        FakeEnv {
            heap: self.heap.clone(),
        }
    }

    pub fn attaches(&self) -> usize {
        self.heap.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.heap.detaches.load(Ordering::SeqCst)
    }

    pub fn live_locals(&self) -> usize {
        self.count_refs(Kind::Local)
    }

    pub fn live_globals(&self) -> usize {
        self.count_refs(Kind::Global)
    }

    pub fn double_releases(&self) -> usize {
        self.heap.double_releases.load(Ordering::SeqCst)
    }

    pub fn critical_copies(&self) -> usize {
        self.heap.critical_copies.load(Ordering::SeqCst)
    }

    pub fn region_copies(&self) -> usize {
        self.heap.region_copies.load(Ordering::SeqCst)
    }

    pub fn loader_loads(&self) -> usize {
        self.heap.loader_loads.load(Ordering::SeqCst)
    }

    fn count_refs(&self, kind: Kind) -> usize {
        let state = self.heap.state.lock().unwrap();
        state.refs.values().filter(|(_, k)| *k == kind).count()
    }
}

impl HostVm for FakeVm {
    type Env = FakeEnv;

    fn get_env(&self) -> EnvStatus<FakeEnv> {
        if self.is_current_thread_attached() {
            EnvStatus::Attached(FakeEnv {
                heap: self.heap.clone(),
            })
        } else {
            EnvStatus::Detached
        }
    }

    fn attach_current_thread(&self) -> Option<FakeEnv> {
        if self.heap.refuse_attach.load(Ordering::SeqCst) {
            return None;
        }
        self.attach_externally();
        self.heap.attaches.fetch_add(1, Ordering::SeqCst);
        Some(FakeEnv {
            heap: self.heap.clone(),
        })
    }

    fn detach_current_thread(&self) {
        self.detach_externally();
        self.heap.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// FakeEnv
// ============================================================================

pub struct FakeEnv {
    heap: Arc<Heap>,
}

impl FakeEnv {
    /// Allocate a host byte array, returned as a local reference
    pub fn new_byte_array(&self, bytes: &[u8]) -> RawRef {
        let mut state = self.heap.state.lock().unwrap();
        let obj = state.alloc(Obj::Array(bytes.to_vec()));
        state.new_ref(obj, Kind::Local)
    }

    fn release(&self, handle: RawRef, expected: Kind) {
        if handle.is_null() {
            return;
        }
        let mut state = self.heap.state.lock().unwrap();
        match state.refs.remove(&handle.addr()) {
            Some((_, kind)) if kind == expected => {}
            Some(entry) => {
                // Wrong release kind: put it back and count it
                state.refs.insert(handle.addr(), entry);
                self.heap.double_releases.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                self.heap.double_releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn invoke_static(&self, method: MethodId, args: &[HostArg]) -> BridgeResult<FakeReturn> {
        let (body, values) = {
            let state = self.heap.state.lock().unwrap();
            let body = match state.methods.get(&method.addr()) {
                Some(Method::Static { body, .. }) => body.clone(),
                _ => return Err(invalid("not a static method")),
            };
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(match *arg {
                    HostArg::Object(handle) => match state.resolve(handle)? {
                        Obj::View { ptr, len } => {
                            let bytes = unsafe {
                                std::slice::from_raw_parts(*ptr as *const u8, *len)
                            };
                            FakeValue::Bytes(bytes.to_vec())
                        }
                        Obj::Owned(bytes) | Obj::Array(bytes) => FakeValue::Bytes(bytes.clone()),
                        Obj::Channel(token) => FakeValue::Channel(*token),
                        _ => FakeValue::Other,
                    },
                    HostArg::Long(_) => FakeValue::Other,
                });
            }
            (body, values)
        };
        body(self, &values).map_err(BridgeError::HostException)
    }
}

impl HostEnv for FakeEnv {
    fn find_class(&self, name: &str) -> BridgeResult<RawRef> {
        let mut state = self.heap.state.lock().unwrap();
        match state.system_classes.get(name).copied() {
            Some(obj) => Ok(state.new_ref(obj, Kind::Local)),
            None => Err(BridgeError::HostException(format!(
                "java.lang.NoClassDefFoundError: {}",
                name
            ))),
        }
    }

    fn method_id(&self, class: RawRef, name: &str, signature: &str) -> Option<MethodId> {
        let state = self.heap.state.lock().unwrap();
        let class = state.class_name(class)?;
        let wanted = match (class.as_str(), name, signature) {
            (CHANNEL_CLASS, "<init>", CHANNEL_CTOR_SIG) => 0,
            ("java/lang/Class", "getClassLoader", "()Ljava/lang/ClassLoader;") => 1,
            ("java/lang/ClassLoader", "loadClass", "(Ljava/lang/String;)Ljava/lang/Class;") => 2,
            _ => return None,
        };
        state
            .methods
            .iter()
            .find(|(_, m)| {
                matches!(
                    (wanted, m),
                    (0, Method::ChannelCtor) | (1, Method::GetClassLoader) | (2, Method::LoadClass)
                )
            })
            .map(|(id, _)| MethodId::from_addr(*id))
    }

    fn static_method_id(&self, class: RawRef, name: &str, signature: &str) -> Option<MethodId> {
        let state = self.heap.state.lock().unwrap();
        let class = state.class_name(class)?;
        state
            .methods
            .iter()
            .find(|(_, m)| match m {
                Method::Static {
                    class: c,
                    name: n,
                    sig: s,
                    ..
                } => *c == class && n == name && s == signature,
                _ => false,
            })
            .map(|(id, _)| MethodId::from_addr(*id))
    }

    fn new_string(&self, value: &str) -> BridgeResult<RawRef> {
        let mut state = self.heap.state.lock().unwrap();
        let obj = state.alloc(Obj::Str(value.to_string()));
        Ok(state.new_ref(obj, Kind::Local))
    }

    fn call_object_method(
        &self,
        receiver: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<RawRef> {
        let mut state = self.heap.state.lock().unwrap();
        match state.methods.get(&method.addr()) {
            Some(Method::GetClassLoader) => {
                state.class_name(receiver).ok_or_else(|| invalid("receiver is not a class"))?;
                let loader = state
                    .objects
                    .iter()
                    .find(|(_, o)| matches!(o, Obj::Loader))
                    .map(|(id, _)| *id)
                    .ok_or_else(|| invalid("no loader"))?;
                Ok(state.new_ref(loader, Kind::Local))
            }
            Some(Method::LoadClass) => {
                let binary = match args.first() {
                    Some(HostArg::Object(name)) => match state.resolve(*name)? {
                        Obj::Str(s) => s.clone(),
                        _ => return Err(invalid("loadClass expects a string")),
                    },
                    _ => return Err(invalid("loadClass expects a string")),
                };
                self.heap.loader_loads.fetch_add(1, Ordering::SeqCst);
                let name = binary.replace('.', "/");
                let found = state
                    .app_classes
                    .get(&name)
                    .or_else(|| state.system_classes.get(&name))
                    .copied();
                match found {
                    Some(obj) => Ok(state.new_ref(obj, Kind::Local)),
                    None => Err(BridgeError::HostException(format!(
                        "java.lang.ClassNotFoundException: {}",
                        binary
                    ))),
                }
            }
            _ => Err(invalid("unsupported instance method")),
        }
    }

    fn call_static_void(
        &self,
        _class: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<()> {
        self.invoke_static(method, args).map(|_| ())
    }

    fn call_static_object(
        &self,
        _class: RawRef,
        method: MethodId,
        args: &[HostArg],
    ) -> BridgeResult<RawRef> {
        match self.invoke_static(method, args)? {
            FakeReturn::Bytes(bytes) => {
                let mut state = self.heap.state.lock().unwrap();
                let obj = state.alloc(Obj::Owned(bytes));
                Ok(state.new_ref(obj, Kind::Local))
            }
            FakeReturn::Null | FakeReturn::Void => Ok(RawRef::NULL),
        }
    }

    fn new_object(&self, class: RawRef, ctor: MethodId, args: &[HostArg]) -> BridgeResult<RawRef> {
        let mut state = self.heap.state.lock().unwrap();
        if state.class_name(class).as_deref() != Some(CHANNEL_CLASS) {
            return Err(invalid("only channel objects can be constructed"));
        }
        if !matches!(state.methods.get(&ctor.addr()), Some(Method::ChannelCtor)) {
            return Err(invalid("not the channel constructor"));
        }
        let token = match args {
            [HostArg::Long(token)] => *token,
            _ => return Err(invalid("channel constructor takes a long")),
        };
        let obj = state.alloc(Obj::Channel(token));
        Ok(state.new_ref(obj, Kind::Local))
    }

    fn new_local_ref(&self, obj: RawRef) -> BridgeResult<RawRef> {
        if obj.is_null() {
            return Ok(RawRef::NULL);
        }
        let mut state = self.heap.state.lock().unwrap();
        let (target, _) = *state
            .refs
            .get(&obj.addr())
            .ok_or_else(|| invalid("new_local_ref on dead handle"))?;
        Ok(state.new_ref(target, Kind::Local))
    }

    fn new_global_ref(&self, obj: RawRef) -> BridgeResult<RawRef> {
        if obj.is_null() {
            return Ok(RawRef::NULL);
        }
        let mut state = self.heap.state.lock().unwrap();
        let (target, _) = *state
            .refs
            .get(&obj.addr())
            .ok_or_else(|| invalid("new_global_ref on dead handle"))?;
        Ok(state.new_ref(target, Kind::Global))
    }

    fn delete_local_ref(&self, obj: RawRef) {
        self.release(obj, Kind::Local);
    }

    fn delete_global_ref(&self, obj: RawRef) {
        self.release(obj, Kind::Global);
    }

    unsafe fn new_direct_buffer(&self, data: *mut u8, len: usize) -> BridgeResult<RawRef> {
        let mut state = self.heap.state.lock().unwrap();
        let obj = state.alloc(Obj::View {
            ptr: data as usize,
            len,
        });
        Ok(state.new_ref(obj, Kind::Local))
    }

    fn byte_len(&self, bytes: HostBytes) -> BridgeResult<usize> {
        let state = self.heap.state.lock().unwrap();
        match (bytes, state.resolve(bytes.raw())?) {
            (HostBytes::DirectBuffer(_), Obj::View { len, .. }) => Ok(*len),
            (HostBytes::DirectBuffer(_), Obj::Owned(v)) => Ok(v.len()),
            (HostBytes::ByteArray(_), Obj::Array(v)) => Ok(v.len()),
            (HostBytes::DirectBuffer(_), _) => Err(BridgeError::NotDirectBuffer),
            _ => Err(invalid("not a byte array")),
        }
    }

    fn read_bytes(&self, bytes: HostBytes, dst: &mut [u8], mode: CopyMode) -> BridgeResult<()> {
        let state = self.heap.state.lock().unwrap();
        let src: &[u8] = match state.resolve(bytes.raw())? {
            Obj::View { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr as *const u8, *len) },
            Obj::Owned(v) | Obj::Array(v) => v,
            _ => return Err(invalid("not a byte sequence")),
        };
        if let HostBytes::ByteArray(_) = bytes {
            match mode {
                CopyMode::Critical => self.heap.critical_copies.fetch_add(1, Ordering::SeqCst),
                CopyMode::Region => self.heap.region_copies.fetch_add(1, Ordering::SeqCst),
            };
        }
        dst.copy_from_slice(src);
        Ok(())
    }
}

// ============================================================================
// Callback inbox
// ============================================================================

/// Collects payloads delivered to a native callback
pub struct Inbox {
    received: Mutex<Vec<(PayloadStatus, Vec<u8>)>>,
    signal: Condvar,
}

impl Inbox {
    pub const fn new() -> Self {
        Inbox {
            received: Mutex::new(Vec::new()),
            signal: Condvar::new(),
        }
    }

    /// Take ownership of a delivered buffer, record it and free it
    pub fn receive(&self, ptr: *mut PayloadBuffer) {
        assert!(!ptr.is_null());
        let buffer = unsafe { PayloadBuffer::from_raw(ptr) };
        let entry = (buffer.status(), buffer.as_bytes().to_vec());
        drop(buffer);
        self.received.lock().unwrap().push(entry);
        self.signal.notify_all();
    }

    pub fn take(&self) -> Vec<(PayloadStatus, Vec<u8>)> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Block until at least `count` deliveries arrived or `timeout` passed
    pub fn wait_for(&self, count: usize, timeout: Duration) -> usize {
        let guard = self.received.lock().unwrap();
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |r| r.len() < count)
            .unwrap();
        guard.len()
    }
}

/// Declare a static inbox and an `extern "C"` callback feeding it
macro_rules! inbox {
    ($inbox:ident, $callback:ident) => {
        static $inbox: $crate::common::Inbox = $crate::common::Inbox::new();
        extern "C" fn $callback(ptr: *mut hostcall_core::PayloadBuffer) {
            $inbox.receive(ptr);
        }
    };
}

/// Signatures used by test classes
pub mod sig {
    pub const VOID: &str = "()V";
    pub const VOID_ARGS: &str = "(Ljava/nio/ByteBuffer;)V";
    pub const RETURN: &str = "()Ljava/nio/ByteBuffer;";
    pub const RETURN_ARGS: &str = "(Ljava/nio/ByteBuffer;)Ljava/nio/ByteBuffer;";
    pub const ASYNC: &str = "(Ldev/hostcall/ResultChannel;)V";
    pub const ASYNC_ARGS: &str = "(Ldev/hostcall/ResultChannel;Ljava/nio/ByteBuffer;)V";
}
