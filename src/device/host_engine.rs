use super::{
    Context, ContextId, Device, DeviceId, Kernel, KernelId, MemId, NativeStatus, QueueId, Runtime,
};
use crate::{
    buffer::MemFlags,
    error::{status, NativeOp},
};
use parking_lot::Mutex;
use std::{collections::HashMap, ops::Range, sync::Arc};

const CONTEXT: ContextId = ContextId::from_raw(1);
const DEVICE: DeviceId = DeviceId::from_raw(1);

/// Builder for creating a [`HostRuntime`].
#[derive(Clone, Debug)]
pub struct HostRuntimeBuilder {
    zero_size_allocations: bool,
    max_allocation: u64,
    deferred: bool,
}

impl HostRuntimeBuilder {
    /// Whether memory objects of 0 bytes can be allocated, defaults to false.
    pub fn zero_size_allocations(mut self, zero_size_allocations: bool) -> Self {
        self.zero_size_allocations = zero_size_allocations;
        self
    }
    /// Largest allocation in bytes, defaults to 1 GiB.
    pub fn max_allocation(mut self, max_allocation: u64) -> Self {
        self.max_allocation = max_allocation;
        self
    }
    /// Whether non-blocking transfers are deferred until the queue is
    /// finished, defaults to false.
    ///
    /// Deferred copies run in submission order, when [`finish`](Runtime::finish)
    /// is called or before the next blocking transfer on the same queue.
    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }
    /// Creates the runtime.
    pub fn build(self) -> Arc<HostRuntime> {
        Arc::new(HostRuntime {
            options: self,
            state: Mutex::default(),
            calls: Mutex::default(),
            faults: Mutex::default(),
        })
    }
}

/// Native calls issued to a [`HostRuntime`], per entry point.
#[allow(missing_docs)]
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub struct NativeCalls {
    pub allocate: usize,
    pub create_queue: usize,
    pub enqueue_read: usize,
    pub enqueue_write: usize,
    pub enqueue_kernel: usize,
    pub flush: usize,
    pub finish: usize,
    pub release_mem: usize,
    pub release_queue: usize,
}

impl NativeCalls {
    /// All calls.
    pub fn total(&self) -> usize {
        self.allocate
            + self.create_queue
            + self.enqueue_read
            + self.enqueue_write
            + self.enqueue_kernel
            + self.flush
            + self.finish
            + self.release_mem
            + self.release_queue
    }
}

/// A kernel dispatch recorded by a [`HostRuntime`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelDispatch {
    /// The queue.
    pub queue: QueueId,
    /// The name the kernel was registered with.
    pub name: String,
    /// The global work sizes.
    pub global_work_sizes: Vec<u64>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    mems: HashMap<MemId, HostMem>,
    queues: HashMap<QueueId, HostQueue>,
    kernels: HashMap<KernelId, String>,
    dispatches: Vec<KernelDispatch>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        // Ids start above the context and device ids.
        self.next_id += 1;
        self.next_id + 1
    }
}

struct HostMem {
    flags: u64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct HostQueue {
    pending: usize,
    deferred: Vec<Deferred>,
}

// Host addresses are kept as integers so the state stays `Send`.
enum Deferred {
    Read {
        mem: MemId,
        range: Range<usize>,
        dst: usize,
    },
    Write {
        mem: MemId,
        range: Range<usize>,
        src: usize,
    },
}

/** A [`Runtime`] that executes in process.

Memory objects are host bytes and transfers are copies. By default they
complete before the enqueue call returns, see
[`deferred`](HostRuntimeBuilder::deferred) for completing non-blocking
transfers on [`finish`](Runtime::finish) instead. Kernels are recorded, not executed. Every entry point
is counted, see [`calls`](HostRuntime::calls), and can be made to fail with
[`fail_next`](HostRuntime::fail_next).
*/
pub struct HostRuntime {
    options: HostRuntimeBuilder,
    state: Mutex<State>,
    calls: Mutex<NativeCalls>,
    faults: Mutex<HashMap<NativeOp, NativeStatus>>,
}

impl HostRuntime {
    /// A builder with the default options.
    pub fn builder() -> HostRuntimeBuilder {
        HostRuntimeBuilder {
            zero_size_allocations: false,
            max_allocation: 1 << 30,
            deferred: false,
        }
    }
    /// The context.
    pub fn context(self: &Arc<Self>) -> Context {
        Context::from_raw(self.clone(), CONTEXT)
    }
    /// The device.
    pub fn device(&self) -> Device {
        Device::from_raw(DEVICE)
    }
    /// Registers a kernel named `name`.
    pub fn kernel(&self, name: impl Into<String>) -> Kernel {
        let mut state = self.state.lock();
        let id = KernelId::from_raw(state.next_id());
        state.kernels.insert(id, name.into());
        Kernel::from_raw(id)
    }
    /// Calls issued so far.
    pub fn calls(&self) -> NativeCalls {
        *self.calls.lock()
    }
    /// Fails the next call of `op` with `code`.
    pub fn fail_next(&self, op: NativeOp, code: NativeStatus) {
        self.faults.lock().insert(op, code);
    }
    /// Whether `mem` is allocated and not released.
    pub fn is_live(&self, mem: MemId) -> bool {
        self.state.lock().mems.contains_key(&mem)
    }
    /// The number of live memory objects.
    pub fn live_mems(&self) -> usize {
        self.state.lock().mems.len()
    }
    /// The number of live queues.
    pub fn live_queues(&self) -> usize {
        self.state.lock().queues.len()
    }
    /// The permission word `mem` was allocated with.
    pub fn mem_flags(&self, mem: MemId) -> Option<MemFlags> {
        self.state
            .lock()
            .mems
            .get(&mem)
            .map(|mem| MemFlags::from_bits(mem.flags))
    }
    /// A copy of the contents of `mem`.
    pub fn mem_bytes(&self, mem: MemId) -> Option<Vec<u8>> {
        self.state.lock().mems.get(&mem).map(|mem| mem.bytes.clone())
    }
    /// Non-blocking operations on `queue` since it was last finished.
    pub fn pending(&self, queue: QueueId) -> Option<usize> {
        self.state.lock().queues.get(&queue).map(|queue| queue.pending)
    }
    /// Kernel dispatches, in submission order.
    pub fn dispatches(&self) -> Vec<KernelDispatch> {
        self.state.lock().dispatches.clone()
    }
    fn call(&self, op: NativeOp) -> Result<(), NativeStatus> {
        {
            let mut calls = self.calls.lock();
            let count = match op {
                NativeOp::Allocate => &mut calls.allocate,
                NativeOp::CreateQueue => &mut calls.create_queue,
                NativeOp::EnqueueRead => &mut calls.enqueue_read,
                NativeOp::EnqueueWrite => &mut calls.enqueue_write,
                NativeOp::EnqueueKernel => &mut calls.enqueue_kernel,
                NativeOp::Flush => &mut calls.flush,
                NativeOp::Finish => &mut calls.finish,
                NativeOp::ReleaseMem => &mut calls.release_mem,
                NativeOp::ReleaseQueue => &mut calls.release_queue,
            };
            *count += 1;
        }
        match self.faults.lock().remove(&op) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
    fn transfer_range(
        state: &mut State,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: u64,
        len: u64,
    ) -> Result<Range<usize>, NativeStatus> {
        if !state.queues.contains_key(&queue) {
            return Err(status::INVALID_COMMAND_QUEUE);
        }
        let size = state
            .mems
            .get(&mem)
            .ok_or(status::INVALID_MEM_OBJECT)?
            .bytes
            .len() as u64;
        let end = offset.checked_add(len).ok_or(status::INVALID_VALUE)?;
        if end > size {
            return Err(status::INVALID_VALUE);
        }
        if !blocking {
            if let Some(host_queue) = state.queues.get_mut(&queue) {
                host_queue.pending += 1;
            }
        }
        Ok(offset as usize..end as usize)
    }
    fn defer(&self, state: &mut State, queue: QueueId, blocking: bool, op: Deferred) -> bool {
        if blocking || !self.options.deferred {
            return false;
        }
        match state.queues.get_mut(&queue) {
            Some(host_queue) => {
                host_queue.deferred.push(op);
                true
            }
            None => false,
        }
    }
    fn run_deferred(state: &mut State, queue: QueueId) {
        let deferred = match state.queues.get_mut(&queue) {
            Some(host_queue) => std::mem::take(&mut host_queue.deferred),
            None => return,
        };
        for op in deferred {
            match op {
                Deferred::Read { mem, range, dst } => {
                    if let Some(host_mem) = state.mems.get(&mem) {
                        // The enqueue keeps `dst` valid until the queue is finished.
                        let dst =
                            unsafe { std::slice::from_raw_parts_mut(dst as *mut u8, range.len()) };
                        dst.copy_from_slice(&host_mem.bytes[range]);
                    }
                }
                Deferred::Write { mem, range, src } => {
                    if let Some(host_mem) = state.mems.get_mut(&mem) {
                        // The enqueue keeps `src` valid until the queue is finished.
                        let src =
                            unsafe { std::slice::from_raw_parts(src as *const u8, range.len()) };
                        host_mem.bytes[range].copy_from_slice(src);
                    }
                }
            }
        }
    }
}

unsafe impl Runtime for HostRuntime {
    fn accepts_zero_size(&self) -> bool {
        self.options.zero_size_allocations
    }
    fn allocate(&self, context: ContextId, flags: u64, size: u64) -> Result<MemId, NativeStatus> {
        self.call(NativeOp::Allocate)?;
        if context != CONTEXT {
            return Err(status::INVALID_CONTEXT);
        }
        let access = MemFlags::from_bits(flags).device_access();
        if access.bits().count_ones() > 1 {
            return Err(status::INVALID_VALUE);
        }
        if (size == 0 && !self.options.zero_size_allocations) || size > self.options.max_allocation
        {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        let len = usize::try_from(size).map_err(|_| status::OUT_OF_HOST_MEMORY)?;
        let mut state = self.state.lock();
        let id = MemId::from_raw(state.next_id());
        state.mems.insert(
            id,
            HostMem {
                flags,
                bytes: vec![0; len],
            },
        );
        Ok(id)
    }
    fn create_queue(
        &self,
        context: ContextId,
        device: DeviceId,
    ) -> Result<QueueId, NativeStatus> {
        self.call(NativeOp::CreateQueue)?;
        if context != CONTEXT {
            return Err(status::INVALID_CONTEXT);
        }
        if device != DEVICE {
            return Err(status::INVALID_DEVICE);
        }
        let mut state = self.state.lock();
        let id = QueueId::from_raw(state.next_id());
        state.queues.insert(id, HostQueue::default());
        Ok(id)
    }
    unsafe fn enqueue_read(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: u64,
        len: u64,
        ptr: *mut u8,
    ) -> Result<(), NativeStatus> {
        self.call(NativeOp::EnqueueRead)?;
        if ptr.is_null() {
            return Err(status::INVALID_VALUE);
        }
        let mut state = self.state.lock();
        let range = Self::transfer_range(&mut state, queue, mem, blocking, offset, len)?;
        let op = Deferred::Read {
            mem,
            range: range.clone(),
            dst: ptr as usize,
        };
        if self.defer(&mut state, queue, blocking, op) {
            return Ok(());
        }
        Self::run_deferred(&mut state, queue);
        let bytes = &state.mems.get(&mem).ok_or(status::INVALID_MEM_OBJECT)?.bytes;
        let dst = unsafe { std::slice::from_raw_parts_mut(ptr, range.len()) };
        dst.copy_from_slice(&bytes[range]);
        Ok(())
    }
    unsafe fn enqueue_write(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: u64,
        len: u64,
        ptr: *const u8,
    ) -> Result<(), NativeStatus> {
        self.call(NativeOp::EnqueueWrite)?;
        if ptr.is_null() {
            return Err(status::INVALID_VALUE);
        }
        let mut state = self.state.lock();
        let range = Self::transfer_range(&mut state, queue, mem, blocking, offset, len)?;
        let op = Deferred::Write {
            mem,
            range: range.clone(),
            src: ptr as usize,
        };
        if self.defer(&mut state, queue, blocking, op) {
            return Ok(());
        }
        Self::run_deferred(&mut state, queue);
        let bytes = &mut state
            .mems
            .get_mut(&mem)
            .ok_or(status::INVALID_MEM_OBJECT)?
            .bytes;
        let src = unsafe { std::slice::from_raw_parts(ptr, range.len()) };
        bytes[range].copy_from_slice(src);
        Ok(())
    }
    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        work_dim: u32,
        global_work_sizes: &[u64],
    ) -> Result<(), NativeStatus> {
        self.call(NativeOp::EnqueueKernel)?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let host_queue = state
            .queues
            .get_mut(&queue)
            .ok_or(status::INVALID_COMMAND_QUEUE)?;
        let name = state.kernels.get(&kernel).ok_or(status::INVALID_KERNEL)?;
        if !(1..=3).contains(&work_dim) || global_work_sizes.len() != work_dim as usize {
            return Err(status::INVALID_WORK_DIMENSION);
        }
        if global_work_sizes.contains(&0) {
            return Err(status::INVALID_GLOBAL_WORK_SIZE);
        }
        host_queue.pending += 1;
        state.dispatches.push(KernelDispatch {
            queue,
            name: name.clone(),
            global_work_sizes: global_work_sizes.to_vec(),
        });
        Ok(())
    }
    fn flush(&self, _queue: QueueId) {
        self.call(NativeOp::Flush).ok();
    }
    fn finish(&self, queue: QueueId) {
        self.call(NativeOp::Finish).ok();
        let mut state = self.state.lock();
        Self::run_deferred(&mut state, queue);
        if let Some(host_queue) = state.queues.get_mut(&queue) {
            host_queue.pending = 0;
        }
    }
    fn release_mem(&self, mem: MemId) -> Result<(), NativeStatus> {
        self.call(NativeOp::ReleaseMem)?;
        self.state
            .lock()
            .mems
            .remove(&mem)
            .map(|_| ())
            .ok_or(status::INVALID_MEM_OBJECT)
    }
    fn release_queue(&self, queue: QueueId) -> Result<(), NativeStatus> {
        self.call(NativeOp::ReleaseQueue)?;
        self.state
            .lock()
            .queues
            .remove(&queue)
            .map(|_| ())
            .ok_or(status::INVALID_COMMAND_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_validates_size() {
        let runtime = HostRuntime::builder().max_allocation(64).build();
        assert_eq!(
            runtime.allocate(CONTEXT, 0, 0),
            Err(status::INVALID_BUFFER_SIZE)
        );
        assert_eq!(
            runtime.allocate(CONTEXT, 0, 65),
            Err(status::INVALID_BUFFER_SIZE)
        );
        let mem = runtime.allocate(CONTEXT, 0, 64).unwrap();
        assert_eq!(runtime.mem_bytes(mem), Some(vec![0; 64]));
        let runtime = HostRuntime::builder().zero_size_allocations(true).build();
        assert!(runtime.allocate(CONTEXT, 0, 0).is_ok());
    }

    #[test]
    fn allocate_rejects_conflicting_access() {
        let runtime = HostRuntime::builder().build();
        let flags = MemFlags::READ_ONLY | MemFlags::WRITE_ONLY;
        assert_eq!(
            runtime.allocate(CONTEXT, flags.bits(), 4),
            Err(status::INVALID_VALUE)
        );
        assert_eq!(
            runtime.allocate(ContextId::from_raw(7), 0, 4),
            Err(status::INVALID_CONTEXT)
        );
    }

    #[test]
    fn transfers_are_bounds_checked() {
        let runtime = HostRuntime::builder().build();
        let queue = runtime.create_queue(CONTEXT, DEVICE).unwrap();
        let mem = runtime.allocate(CONTEXT, 0, 8).unwrap();
        let data = [1u8, 2, 3, 4];
        let result = unsafe { runtime.enqueue_write(queue, mem, true, 6, 4, data.as_ptr()) };
        assert_eq!(result, Err(status::INVALID_VALUE));
        unsafe { runtime.enqueue_write(queue, mem, false, 4, 4, data.as_ptr()) }.unwrap();
        assert_eq!(runtime.pending(queue), Some(1));
        runtime.finish(queue);
        assert_eq!(runtime.pending(queue), Some(0));
        let mut out = [0u8; 8];
        unsafe { runtime.enqueue_read(queue, mem, true, 0, 8, out.as_mut_ptr()) }.unwrap();
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn deferred_transfers_run_on_finish() {
        let runtime = HostRuntime::builder().deferred(true).build();
        let queue = runtime.create_queue(CONTEXT, DEVICE).unwrap();
        let mem = runtime.allocate(CONTEXT, 0, 4).unwrap();
        let data = [1u8, 2, 3, 4];
        unsafe { runtime.enqueue_write(queue, mem, false, 0, 4, data.as_ptr()) }.unwrap();
        assert_eq!(runtime.mem_bytes(mem), Some(vec![0; 4]));
        let mut out = [0u8; 4];
        unsafe { runtime.enqueue_read(queue, mem, false, 0, 4, out.as_mut_ptr()) }.unwrap();
        assert_eq!(out, [0; 4]);
        assert_eq!(runtime.pending(queue), Some(2));
        runtime.finish(queue);
        assert_eq!(runtime.pending(queue), Some(0));
        assert_eq!(runtime.mem_bytes(mem), Some(data.to_vec()));
        assert_eq!(out, data);
    }

    #[test]
    fn blocking_transfer_runs_deferred_first() {
        let runtime = HostRuntime::builder().deferred(true).build();
        let queue = runtime.create_queue(CONTEXT, DEVICE).unwrap();
        let mem = runtime.allocate(CONTEXT, 0, 4).unwrap();
        let data = [5u8, 6, 7, 8];
        unsafe { runtime.enqueue_write(queue, mem, false, 0, 4, data.as_ptr()) }.unwrap();
        let mut out = [0u8; 4];
        unsafe { runtime.enqueue_read(queue, mem, true, 0, 4, out.as_mut_ptr()) }.unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn fail_next_fails_once() {
        let runtime = HostRuntime::builder().build();
        runtime.fail_next(NativeOp::Allocate, status::OUT_OF_RESOURCES);
        assert_eq!(
            runtime.allocate(CONTEXT, 0, 4),
            Err(status::OUT_OF_RESOURCES)
        );
        assert!(runtime.allocate(CONTEXT, 0, 4).is_ok());
        assert_eq!(runtime.calls().allocate, 2);
    }

    #[test]
    fn release_twice_is_invalid() {
        let runtime = HostRuntime::builder().build();
        let mem = runtime.allocate(CONTEXT, 0, 4).unwrap();
        assert_eq!(runtime.release_mem(mem), Ok(()));
        assert_eq!(runtime.release_mem(mem), Err(status::INVALID_MEM_OBJECT));
        assert_eq!(runtime.live_mems(), 0);
    }

    #[test]
    fn kernel_dispatch_is_recorded() {
        let runtime = HostRuntime::builder().build();
        let queue = runtime.create_queue(CONTEXT, DEVICE).unwrap();
        let kernel = runtime.kernel("saxpy");
        assert_eq!(
            runtime.enqueue_kernel(queue, kernel.id(), 4, &[1, 1, 1, 1]),
            Err(status::INVALID_WORK_DIMENSION)
        );
        assert_eq!(
            runtime.enqueue_kernel(queue, kernel.id(), 1, &[0]),
            Err(status::INVALID_GLOBAL_WORK_SIZE)
        );
        runtime
            .enqueue_kernel(queue, kernel.id(), 2, &[64, 8])
            .unwrap();
        assert_eq!(
            runtime.dispatches(),
            vec![KernelDispatch {
                queue,
                name: "saxpy".into(),
                global_work_sizes: vec![64, 8],
            }]
        );
    }
}
