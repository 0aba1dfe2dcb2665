/*!
The native runtime boundary.

A [`Runtime`] is the C-style command queue API that **clbuf** drives: it
allocates memory objects, creates queues, and enqueues transfers and kernel
dispatches. Runtimes return raw native status codes, which are translated
into [`NativeError`](crate::error::NativeError)s by the caller.

Platform discovery, context creation and kernel compilation happen outside
of **clbuf**; their results enter as raw ids via [`Context::from_raw`],
[`Device::from_raw`] and [`Kernel::from_raw`].

[`HostRuntime`] implements the runtime in process, storing memory objects
as host bytes.
```
# use clbuf::{buffer::{Buffer, MemFlags}, device::HostRuntime, elem::ElementType};
# fn main() -> clbuf::result::Result<()> {
let runtime = HostRuntime::builder().build();
let context = runtime.context();
let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::F32, 1024)?;
assert_eq!(buffer.total_allocated_bytes(), 4096);
# Ok(())
# }
```
*/

use dry::macro_for;
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

mod host_engine;
pub use host_engine::{HostRuntime, HostRuntimeBuilder, KernelDispatch, NativeCalls};

/// A native status code, see [`status`](crate::error::status).
pub type NativeStatus = i32;

macro_for!($Id in [ContextId, DeviceId, MemId, QueueId, KernelId] {
    #[doc = concat!("A raw native ", stringify!($Id), ".")]
    #[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
    pub struct $Id(u64);

    impl $Id {
        /// Wraps a raw handle.
        pub const fn from_raw(raw: u64) -> Self {
            Self(raw)
        }
        /// The raw handle.
        pub const fn as_raw(&self) -> u64 {
            self.0
        }
    }

    impl Debug for $Id {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.debug_tuple(stringify!($Id))
                .field(&(self.0 as *const ()))
                .finish()
        }
    }
});

/** The native command queue API.

# Safety
Implementations must honor `blocking`: when it is true, the host memory
behind the pointer of a read or write is not accessed after the call returns.
When it is false, the memory may be accessed until [`finish`](Runtime::finish)
returns for that queue.
*/
pub unsafe trait Runtime: Send + Sync {
    /// Whether a memory object of 0 bytes can be allocated.
    fn accepts_zero_size(&self) -> bool {
        false
    }
    /// Allocates a memory object of `size` bytes with the `flags` permission word.
    fn allocate(&self, context: ContextId, flags: u64, size: u64) -> Result<MemId, NativeStatus>;
    /// Creates an in order queue for `device`.
    fn create_queue(&self, context: ContextId, device: DeviceId)
        -> Result<QueueId, NativeStatus>;
    /// Copies `len` bytes at `offset` of `mem` to `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for `len` bytes of writes, see [`Runtime`].
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_read(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: u64,
        len: u64,
        ptr: *mut u8,
    ) -> Result<(), NativeStatus>;
    /// Copies `len` bytes from `ptr` to `mem` at `offset`.
    ///
    /// # Safety
    /// `ptr` must be valid for `len` bytes of reads, see [`Runtime`].
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_write(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: u64,
        len: u64,
        ptr: *const u8,
    ) -> Result<(), NativeStatus>;
    /// Dispatches `kernel` over `global_work_sizes`.
    ///
    /// `global_work_sizes` has `work_dim` entries.
    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        work_dim: u32,
        global_work_sizes: &[u64],
    ) -> Result<(), NativeStatus>;
    /// Submits enqueued work.
    fn flush(&self, queue: QueueId);
    /// Waits for all enqueued work to complete.
    fn finish(&self, queue: QueueId);
    /// Releases a memory object.
    fn release_mem(&self, mem: MemId) -> Result<(), NativeStatus>;
    /// Releases a queue.
    fn release_queue(&self, queue: QueueId) -> Result<(), NativeStatus>;
}

/// A context of a [`Runtime`].
///
/// Contexts can be cloned, which is equivalent to [`Arc::clone()`] of the runtime.
#[derive(Clone)]
pub struct Context {
    runtime: Arc<dyn Runtime>,
    id: ContextId,
}

impl Context {
    /// Wraps a context created by `runtime`.
    pub fn from_raw(runtime: Arc<dyn Runtime>, id: ContextId) -> Self {
        Self { runtime, id }
    }
    /// The runtime.
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }
    /// The raw id.
    pub fn id(&self) -> ContextId {
        self.id
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Context").field(&self.id).finish()
    }
}

/// A device of a context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Device {
    id: DeviceId,
}

impl Device {
    /// Wraps a raw device id.
    pub const fn from_raw(id: DeviceId) -> Self {
        Self { id }
    }
    /// The raw id.
    pub fn id(&self) -> DeviceId {
        self.id
    }
}

/// A compiled kernel with its arguments bound.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Kernel {
    id: KernelId,
}

impl Kernel {
    /// Wraps a raw kernel id.
    pub const fn from_raw(id: KernelId) -> Self {
        Self { id }
    }
    /// The raw id.
    pub fn id(&self) -> KernelId {
        self.id
    }
}

pub(crate) fn same_runtime(a: &Arc<dyn Runtime>, b: &Arc<dyn Runtime>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

pub(crate) trait OwnedId: Copy + Debug {
    fn raw(&self) -> u64;
    fn release(self, runtime: &dyn Runtime) -> Result<(), NativeStatus>;
}

impl OwnedId for MemId {
    fn raw(&self) -> u64 {
        self.0
    }
    fn release(self, runtime: &dyn Runtime) -> Result<(), NativeStatus> {
        runtime.release_mem(self)
    }
}

impl OwnedId for QueueId {
    fn raw(&self) -> u64 {
        self.0
    }
    fn release(self, runtime: &dyn Runtime) -> Result<(), NativeStatus> {
        runtime.release_queue(self)
    }
}

/// Exclusive ownership of a native handle.
///
/// The handle is released once, by [`release`](Owned::release) or on drop.
pub(crate) struct Owned<I: OwnedId> {
    runtime: Arc<dyn Runtime>,
    id: Option<I>,
}

impl<I: OwnedId> Owned<I> {
    pub(crate) fn new(runtime: Arc<dyn Runtime>, id: I) -> Self {
        #[cfg(debug_assertions)]
        ledger::adopt(&runtime, id);
        Self {
            runtime,
            id: Some(id),
        }
    }
    pub(crate) fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }
    pub(crate) fn id(&self) -> I {
        match self.id {
            Some(id) => id,
            None => unreachable!("use after release"),
        }
    }
    pub(crate) fn release(&mut self) {
        if let Some(id) = self.id.take() {
            #[cfg(debug_assertions)]
            ledger::release(&self.runtime, id);
            if let Err(code) = id.release(self.runtime.as_ref()) {
                log::warn!("failed to release {id:?}: native status {code}");
            }
        }
    }
}

impl<I: OwnedId> Drop for Owned<I> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<I: OwnedId> Debug for Owned<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.id {
            Some(id) => id.fmt(f),
            None => f.write_str("Released"),
        }
    }
}

/// Live handles, tracked in debug builds to catch a handle being owned twice.
#[cfg(debug_assertions)]
mod ledger {
    use super::{OwnedId, Runtime};
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use std::{any::type_name, collections::HashSet, sync::Arc};

    type Key = (usize, &'static str, u64);

    static LIVE: Lazy<Mutex<HashSet<Key>>> = Lazy::new(Mutex::default);

    fn key<I: OwnedId>(runtime: &Arc<dyn Runtime>, id: I) -> Key {
        (
            Arc::as_ptr(runtime) as *const () as usize,
            type_name::<I>(),
            id.raw(),
        )
    }

    pub(super) fn adopt<I: OwnedId>(runtime: &Arc<dyn Runtime>, id: I) {
        let inserted = LIVE.lock().insert(key(runtime, id));
        assert!(inserted, "{id:?} is already owned");
    }

    pub(super) fn release<I: OwnedId>(runtime: &Arc<dyn Runtime>, id: I) {
        let removed = LIVE.lock().remove(&key(runtime, id));
        assert!(removed, "{id:?} released twice");
    }

    #[cfg(test)]
    pub(super) fn is_live<I: OwnedId>(runtime: &Arc<dyn Runtime>, id: I) -> bool {
        LIVE.lock().contains(&key(runtime, id))
    }
}
