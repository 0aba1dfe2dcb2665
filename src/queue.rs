/*!
Command queues.

A [`CommandQueue`] submits transfers between host data and [`Buffer`]s, and
kernel dispatches, to one device. Commands execute in submission order.

Transfers start at offset 0 of the buffer and cover as many elements as the
host data holds. See [`transfer`](crate::transfer) for the accepted host data.

```
# use clbuf::{buffer::{Buffer, MemFlags}, device::HostRuntime, elem::ElementType, queue::CommandQueue};
# fn main() -> clbuf::result::Result<()> {
let runtime = HostRuntime::builder().build();
let context = runtime.context();
let queue = CommandQueue::create(&context, &runtime.device())?;
let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::F32, 4)?;
queue.write(&buffer, &[1f32, 2., 3., 4.][..])?;
assert_eq!(queue.read_vec::<f32>(&buffer)?, [1., 2., 3., 4.]);
# Ok(())
# }
```
*/

use crate::{
    buffer::Buffer,
    device::{same_runtime, Context, ContextId, Device, Kernel, Owned, QueueId, Runtime},
    elem::HostRepr,
    error::{ConfigError, HostDataKind, NativeError, NativeOp},
    result::Result,
    scalar::Scalar,
    transfer::{self, HostSlice, HostSliceMut},
};
use parking_lot::Mutex;
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

/// An in order command queue.
///
/// The queue is released on drop, after waiting for enqueued work to finish
/// if staged host data is still held.
pub struct CommandQueue {
    queue: Owned<QueueId>,
    context: ContextId,
    staging: Mutex<Vec<Vec<u8>>>,
}

impl CommandQueue {
    /// Creates a queue for `device`.
    ///
    /// **errors**
    /// - [`NativeError`] (CreateQueue) if the runtime fails to create the queue.
    pub fn create(context: &Context, device: &Device) -> Result<Self> {
        let runtime = context.runtime();
        let id = runtime
            .create_queue(context.id(), device.id())
            .map_err(|code| NativeError::new(NativeOp::CreateQueue, code))?;
        log::debug!("created {id:?} for {:?}", device.id());
        Ok(Self {
            queue: Owned::new(runtime.clone(), id),
            context: context.id(),
            staging: Mutex::default(),
        })
    }
    /// The raw id.
    pub fn id(&self) -> QueueId {
        self.queue.id()
    }
    /// The id of the context.
    pub fn context_id(&self) -> ContextId {
        self.context
    }
    fn runtime(&self) -> &Arc<dyn Runtime> {
        self.queue.runtime()
    }
    fn check_buffer(&self, buffer: &Buffer) -> Result<(), ConfigError> {
        if !same_runtime(self.runtime(), buffer.runtime()) || self.context != buffer.context_id() {
            return Err(ConfigError::ContextMismatch);
        }
        Ok(())
    }
    /** Enqueues a write of `host` to `buffer`.

    Writes `host.len()` elements to the start of `buffer`. If `blocking` is
    true, returns once the data has been copied out of `host`. Lane groups are
    flattened into staging storage, which is held by the queue until
    [`finish`](Self::finish) when the write is not blocking.

    **errors**
    - [`ConfigError`] if `buffer` belongs to another context, or `host` is
    invalid for `buffer`, see [`transfer::prepare`]. No command is enqueued.
    - [`NativeError`] (EnqueueWrite) if the runtime fails to enqueue the write.

    # Safety
    If `blocking` is false, the memory borrowed by `host` must not be
    modified or freed until [`finish`](Self::finish) returns.
    */
    pub unsafe fn enqueue_write<'a>(
        &self,
        buffer: &Buffer,
        blocking: bool,
        host: impl Into<HostSlice<'a>>,
    ) -> Result<()> {
        self.check_buffer(buffer)?;
        let host = host.into();
        let transfer = transfer::prepare(buffer, &host)?;
        log::trace!(
            "{:?} write {} bytes to {:?}, blocking = {blocking}",
            self.id(),
            transfer.byte_len(),
            buffer.id(),
        );
        unsafe {
            self.runtime().enqueue_write(
                self.id(),
                buffer.id(),
                blocking,
                0,
                transfer.byte_len(),
                transfer.as_ptr(),
            )
        }
        .map_err(|code| NativeError::new(NativeOp::EnqueueWrite, code))?;
        if !blocking {
            if let Some(staging) = transfer.into_staging() {
                self.staging.lock().push(staging);
            }
        }
        Ok(())
    }
    /** Enqueues a read of `buffer` into `host`.

    Reads `host.len()` elements from the start of `buffer`. If `blocking` is
    true, returns once the data is in `host`.

    **errors**
    - [`ConfigError`] if `buffer` belongs to another context, or `host` is
    invalid for `buffer`, see [`transfer::prepare_mut`]. No command is enqueued.
    - [`ConfigError::NonBlockingGroupedRead`] if `host` is lane groups and
    `blocking` is false.
    - [`NativeError`] (EnqueueRead) if the runtime fails to enqueue the read.

    # Safety
    If `blocking` is false, the memory borrowed by `host` must not be
    accessed or freed until [`finish`](Self::finish) returns.
    */
    pub unsafe fn enqueue_read<'a>(
        &self,
        buffer: &Buffer,
        blocking: bool,
        host: impl Into<HostSliceMut<'a>>,
    ) -> Result<()> {
        self.check_buffer(buffer)?;
        let mut transfer = transfer::prepare_mut(buffer, host.into())?;
        if !blocking && transfer.is_staged() {
            return Err(ConfigError::NonBlockingGroupedRead.into());
        }
        log::trace!(
            "{:?} read {} bytes from {:?}, blocking = {blocking}",
            self.id(),
            transfer.byte_len(),
            buffer.id(),
        );
        unsafe {
            self.runtime().enqueue_read(
                self.id(),
                buffer.id(),
                blocking,
                0,
                transfer.byte_len(),
                transfer.as_mut_ptr(),
            )
        }
        .map_err(|code| NativeError::new(NativeOp::EnqueueRead, code))?;
        transfer.complete();
        Ok(())
    }
    /// Writes `host` to `buffer`, blocking.
    ///
    /// See [`enqueue_write`](Self::enqueue_write).
    pub fn write<'a>(&self, buffer: &Buffer, host: impl Into<HostSlice<'a>>) -> Result<()> {
        unsafe { self.enqueue_write(buffer, true, host) }
    }
    /// Reads `buffer` into `host`, blocking.
    ///
    /// See [`enqueue_read`](Self::enqueue_read).
    pub fn read<'a>(&self, buffer: &Buffer, host: impl Into<HostSliceMut<'a>>) -> Result<()> {
        unsafe { self.enqueue_read(buffer, true, host) }
    }
    /// Reads all of `buffer` into a new vec.
    ///
    /// **errors**
    /// - [`ConfigError::RepresentationMismatch`] if `T` is not the scalar of
    /// the element type.
    pub fn read_vec<T: Scalar>(&self, buffer: &Buffer) -> Result<Vec<T>> {
        let mut output = vec![T::default(); buffer.element_count() as usize];
        self.read(buffer, HostSliceMut::scalars(output.as_mut_slice()))?;
        Ok(output)
    }
    /// Reads all of `buffer` into a new vec of flat lanes.
    ///
    /// **errors**
    /// - [`ConfigError::RepresentationMismatch`] if the element type is a scalar.
    pub fn read_lanes(&self, buffer: &Buffer) -> Result<Vec<u32>> {
        let element_type = buffer.element_type();
        let lane_count = match element_type.host_repr() {
            HostRepr::Lanes { lane_count } => lane_count,
            expected @ HostRepr::Scalar(_) => {
                return Err(ConfigError::RepresentationMismatch {
                    element_type,
                    expected,
                    found: HostDataKind::Lanes,
                }
                .into());
            }
        };
        let mut output = vec![0u32; buffer.element_count() as usize * lane_count as usize];
        self.read(buffer, HostSliceMut::Lanes(&mut output))?;
        Ok(output)
    }
    /** Enqueues a dispatch of `kernel` over `global_work_sizes`.

    **errors**
    - [`ConfigError::WorkDimensionMismatch`] if `global_work_sizes` does not
    have `work_dim` entries. No command is enqueued.
    - [`NativeError`] (EnqueueKernel) if the runtime rejects the dispatch.

    # Safety
    The kernel's arguments must be bound to objects that are alive, and the
    kernel must not access memory out of bounds.
    */
    pub unsafe fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        work_dim: u32,
        global_work_sizes: &[u64],
    ) -> Result<()> {
        if global_work_sizes.len() != work_dim as usize {
            return Err(ConfigError::WorkDimensionMismatch {
                work_dim,
                sizes: global_work_sizes.len(),
            }
            .into());
        }
        log::trace!(
            "{:?} dispatch {:?} over {global_work_sizes:?}",
            self.id(),
            kernel.id()
        );
        self.runtime()
            .enqueue_kernel(self.id(), kernel.id(), work_dim, global_work_sizes)
            .map_err(|code| NativeError::new(NativeOp::EnqueueKernel, code))?;
        Ok(())
    }
    /// Submits enqueued commands to the device.
    pub fn flush(&self) {
        self.runtime().flush(self.id());
    }
    /// Waits for enqueued commands to complete.
    ///
    /// Staging storage of non-blocking writes enqueued before the call is
    /// freed once the runtime has finished.
    pub fn finish(&self) {
        let staged = std::mem::take(&mut *self.staging.lock());
        self.runtime().finish(self.id());
        drop(staged);
    }
    /// Releases the queue.
    ///
    /// Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if !self.staging.get_mut().is_empty() {
            self.finish();
        }
        self.queue.release();
    }
}

impl Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.queue)
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::MemFlags,
        device::{DeviceId, HostRuntime, KernelId, MemId, NativeStatus},
        elem::ElementType,
        error::{status, Error},
    };

    fn setup() -> (Arc<HostRuntime>, Context, CommandQueue) {
        let runtime = HostRuntime::builder().build();
        let context = runtime.context();
        let queue = CommandQueue::create(&context, &runtime.device()).unwrap();
        (runtime, context, queue)
    }

    #[test]
    fn create_failure_is_native_error() {
        let runtime = HostRuntime::builder().build();
        runtime.fail_next(NativeOp::CreateQueue, status::OUT_OF_RESOURCES);
        let error = CommandQueue::create(&runtime.context(), &runtime.device()).unwrap_err();
        assert_eq!(
            error,
            Error::from(NativeError::new(NativeOp::CreateQueue, status::OUT_OF_RESOURCES))
        );
        assert_eq!(runtime.live_queues(), 0);
    }

    #[test]
    fn write_read_f32() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::F32, 1024).unwrap();
        let x: Vec<f32> = (0..1024).map(|x| x as f32 * 0.5).collect();
        queue.write(&buffer, &x).unwrap();
        let calls = runtime.calls();
        assert_eq!(calls.enqueue_write, 1);
        assert_eq!(runtime.mem_bytes(buffer.id()).unwrap().len(), 4096);
        let y = queue.read_vec::<f32>(&buffer).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn write_read_u8() {
        let (_runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::U8, 7).unwrap();
        let x = [1u8, 2, 3, 4, 5, 6, 7];
        queue.write(&buffer, &x[..]).unwrap();
        let mut y = [0u8; 7];
        queue.read(&buffer, &mut y[..]).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn write_read_i64() {
        let (_runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::I64, 3).unwrap();
        let x = [i64::MIN, -1, i64::MAX];
        queue.write(&buffer, &x[..]).unwrap();
        assert_eq!(queue.read_vec::<i64>(&buffer).unwrap(), x);
    }

    #[test]
    fn write_groups_read_lanes_wide_i256() {
        let (_runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideI256, 2).unwrap();
        let groups = [[-1i32, 1, -2, 2, -3, 3, -4, 4], [5, 6, 7, 8, 9, 10, 11, 12]];
        queue.write(&buffer, HostSlice::lane_groups(&groups)).unwrap();
        let lanes = queue.read_lanes(&buffer).unwrap();
        let expected: Vec<u32> = groups.iter().flatten().map(|x| *x as u32).collect();
        assert_eq!(lanes, expected);
        let mut output = [[0i32; 8]; 2];
        queue.read(&buffer, HostSliceMut::lane_groups(&mut output)).unwrap();
        assert_eq!(output, groups);
    }

    #[test]
    fn malformed_group_issues_no_native_call() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideU128, 4).unwrap();
        let before = runtime.calls();
        let groups = vec![vec![0u32; 3]];
        let error = queue.write(&buffer, HostSlice::lane_groups(&groups)).unwrap_err();
        assert!(error.is_config());
        assert!(matches!(
            error,
            Error::Config(ConfigError::LaneGroupLength { index: 0, len: 3, lane_count: 4 })
        ));
        assert_eq!(runtime.calls(), before);
    }

    #[test]
    fn mismatched_scalar_issues_no_native_call() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::F64, 4).unwrap();
        let before = runtime.calls();
        let x = [0f32; 4];
        let error = queue.write(&buffer, &x[..]).unwrap_err();
        assert!(matches!(
            error,
            Error::Config(ConfigError::RepresentationMismatch { .. })
        ));
        let error = queue.read_vec::<u64>(&buffer).unwrap_err();
        assert!(error.is_config());
        let error = queue.read_lanes(&buffer).unwrap_err();
        assert!(error.is_config());
        assert_eq!(runtime.calls(), before);
    }

    #[test]
    fn partial_prefix_write() {
        let (_runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::U32, 4).unwrap();
        queue.write(&buffer, &[9u32, 9, 9, 9][..]).unwrap();
        queue.write(&buffer, &[1u32, 2][..]).unwrap();
        assert_eq!(queue.read_vec::<u32>(&buffer).unwrap(), [1, 2, 9, 9]);
        let mut y = [0u32; 3];
        queue.read(&buffer, &mut y[..]).unwrap();
        assert_eq!(y, [1, 2, 9]);
    }

    #[test]
    fn enqueue_failure_is_native_error() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::I16, 2).unwrap();
        runtime.fail_next(NativeOp::EnqueueWrite, status::OUT_OF_RESOURCES);
        let error = queue.write(&buffer, &[1i16, 2][..]).unwrap_err();
        assert_eq!(
            error,
            Error::from(NativeError::new(NativeOp::EnqueueWrite, status::OUT_OF_RESOURCES))
        );
        runtime.fail_next(NativeOp::EnqueueRead, status::INVALID_MEM_OBJECT);
        let error = queue.read_vec::<i16>(&buffer).unwrap_err();
        match error {
            Error::Native(error) => {
                assert_eq!(error.op(), NativeOp::EnqueueRead);
                assert_eq!(error.code(), status::INVALID_MEM_OBJECT);
            }
            error => panic!("{error:?}"),
        }
    }

    #[test]
    fn non_blocking_grouped_write_holds_staging() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideU64, 2).unwrap();
        {
            let groups = vec![vec![1u32, 2], vec![3, 4]];
            unsafe {
                queue
                    .enqueue_write(&buffer, false, HostSlice::lane_groups(&groups))
                    .unwrap();
            }
        }
        assert_eq!(queue.staging.lock().len(), 1);
        assert_eq!(runtime.pending(queue.id()), Some(1));
        queue.finish();
        assert!(queue.staging.lock().is_empty());
        assert_eq!(runtime.pending(queue.id()), Some(0));
        assert_eq!(queue.read_lanes(&buffer).unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn non_blocking_grouped_read_rejected() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideU64, 2).unwrap();
        let before = runtime.calls();
        let mut groups = [[0u32; 2]; 2];
        let error =
            unsafe { queue.enqueue_read(&buffer, false, HostSliceMut::lane_groups(&mut groups)) }
                .unwrap_err();
        assert_eq!(error, Error::from(ConfigError::NonBlockingGroupedRead));
        assert_eq!(runtime.calls(), before);
    }

    #[test]
    fn non_blocking_scalar_read() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::U16, 3).unwrap();
        queue.write(&buffer, &[4u16, 5, 6][..]).unwrap();
        let mut y = [0u16; 3];
        unsafe {
            queue.enqueue_read(&buffer, false, &mut y[..]).unwrap();
        }
        queue.flush();
        queue.finish();
        assert_eq!(y, [4, 5, 6]);
        let calls = runtime.calls();
        assert_eq!(calls.flush, 1);
        assert_eq!(calls.finish, 1);
    }

    #[test]
    fn buffer_from_other_context() {
        let (_runtime, _context, queue) = setup();
        let other = HostRuntime::builder().build();
        let buffer =
            Buffer::create(&other.context(), [MemFlags::READ_WRITE], ElementType::U8, 1).unwrap();
        let error = queue.write(&buffer, &[1u8][..]).unwrap_err();
        assert_eq!(error, Error::from(ConfigError::ContextMismatch));
        assert_eq!(other.calls().enqueue_write, 0);
    }

    #[test]
    fn enqueue_kernel_dispatches() {
        let (runtime, _context, queue) = setup();
        let kernel = runtime.kernel("saxpy");
        unsafe {
            queue.enqueue_kernel(&kernel, 2, &[64, 8]).unwrap();
        }
        let dispatches = runtime.dispatches();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].name, "saxpy");
        assert_eq!(dispatches[0].queue, queue.id());
        assert_eq!(dispatches[0].global_work_sizes, [64, 8]);
    }

    #[test]
    fn enqueue_kernel_work_dim_mismatch() {
        let (runtime, _context, queue) = setup();
        let kernel = runtime.kernel("fill");
        let before = runtime.calls();
        let error = unsafe { queue.enqueue_kernel(&kernel, 3, &[64, 8]) }.unwrap_err();
        assert_eq!(
            error,
            Error::from(ConfigError::WorkDimensionMismatch {
                work_dim: 3,
                sizes: 2
            })
        );
        assert_eq!(runtime.calls(), before);
    }

    #[test]
    fn enqueue_kernel_native_failure() {
        let (runtime, _context, queue) = setup();
        let kernel = runtime.kernel("fill");
        let error = unsafe { queue.enqueue_kernel(&kernel, 1, &[0]) }.unwrap_err();
        assert_eq!(
            error,
            Error::from(NativeError::new(
                NativeOp::EnqueueKernel,
                status::INVALID_GLOBAL_WORK_SIZE
            ))
        );
    }

    #[test]
    fn release_once() {
        let (runtime, _context, queue) = setup();
        assert_eq!(runtime.live_queues(), 1);
        queue.release();
        assert_eq!(runtime.live_queues(), 0);
        assert_eq!(runtime.calls().release_queue, 1);
    }

    #[test]
    fn drop_with_staging_finishes_first() {
        let (runtime, context, queue) = setup();
        let buffer = Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideU64, 1).unwrap();
        let groups = [[1u32, 2]];
        unsafe {
            queue
                .enqueue_write(&buffer, false, HostSlice::lane_groups(&groups))
                .unwrap();
        }
        drop(queue);
        let calls = runtime.calls();
        assert_eq!(calls.finish, 1);
        assert_eq!(calls.release_queue, 1);
    }

    #[test]
    fn deferred_grouped_write_completes_on_finish() {
        let runtime = HostRuntime::builder().deferred(true).build();
        let context = runtime.context();
        let queue = CommandQueue::create(&context, &runtime.device()).unwrap();
        let buffer =
            Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideI128, 3).unwrap();
        let groups = vec![[-1i32, 2, -3, 4]; 3];
        {
            let groups = groups.clone();
            unsafe {
                queue
                    .enqueue_write(&buffer, false, HostSlice::lane_groups(&groups))
                    .unwrap();
            }
        }
        assert_eq!(runtime.mem_bytes(buffer.id()), Some(vec![0; 48]));
        assert_eq!(queue.staging.lock().len(), 1);
        queue.finish();
        assert!(queue.staging.lock().is_empty());
        let mut output = [[0i32; 4]; 3];
        queue
            .read(&buffer, HostSliceMut::lane_groups(&mut output))
            .unwrap();
        assert_eq!(output.to_vec(), groups);
    }

    #[test]
    fn drop_finishes_deferred_staging() {
        let runtime = HostRuntime::builder().deferred(true).build();
        let context = runtime.context();
        let queue = CommandQueue::create(&context, &runtime.device()).unwrap();
        let buffer =
            Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideU64, 2).unwrap();
        unsafe {
            queue
                .enqueue_write(&buffer, false, HostSlice::lane_groups(&[[1u32, 2], [3, 4]]))
                .unwrap();
        }
        drop(queue);
        assert_eq!(
            runtime.mem_bytes(buffer.id()),
            Some(bytemuck::cast_slice::<u32, u8>(&[1, 2, 3, 4]).to_vec())
        );
        assert_eq!(runtime.live_queues(), 0);
    }

    /// Calls `on_finish` once, after the host runtime has finished.
    struct FinishHook {
        host: Arc<HostRuntime>,
        on_finish: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    unsafe impl Runtime for FinishHook {
        fn allocate(&self, context: ContextId, flags: u64, size: u64) -> Result<MemId, NativeStatus> {
            self.host.allocate(context, flags, size)
        }
        fn create_queue(
            &self,
            context: ContextId,
            device: DeviceId,
        ) -> Result<QueueId, NativeStatus> {
            self.host.create_queue(context, device)
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
            unsafe { self.host.enqueue_read(queue, mem, blocking, offset, len, ptr) }
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
            unsafe { self.host.enqueue_write(queue, mem, blocking, offset, len, ptr) }
        }
        fn enqueue_kernel(
            &self,
            queue: QueueId,
            kernel: KernelId,
            work_dim: u32,
            global_work_sizes: &[u64],
        ) -> Result<(), NativeStatus> {
            self.host
                .enqueue_kernel(queue, kernel, work_dim, global_work_sizes)
        }
        fn flush(&self, queue: QueueId) {
            self.host.flush(queue);
        }
        fn finish(&self, queue: QueueId) {
            self.host.finish(queue);
            let on_finish = self.on_finish.lock().take();
            if let Some(on_finish) = on_finish {
                on_finish();
            }
        }
        fn release_mem(&self, mem: MemId) -> Result<(), NativeStatus> {
            self.host.release_mem(mem)
        }
        fn release_queue(&self, queue: QueueId) -> Result<(), NativeStatus> {
            self.host.release_queue(queue)
        }
    }

    #[test]
    fn finish_keeps_staging_enqueued_during_finish() {
        let host = HostRuntime::builder().deferred(true).build();
        let hook = Arc::new(FinishHook {
            host: host.clone(),
            on_finish: Mutex::default(),
        });
        let context = Context::from_raw(hook.clone(), host.context().id());
        let queue = Arc::new(CommandQueue::create(&context, &host.device()).unwrap());
        let buffer = Arc::new(
            Buffer::create(&context, [MemFlags::READ_WRITE], ElementType::WideU64, 256).unwrap(),
        );
        let expected: Vec<u32> = (0..512).collect();
        {
            let queue = queue.clone();
            let buffer = buffer.clone();
            let lanes = expected.clone();
            *hook.on_finish.lock() = Some(Box::new(move || {
                let groups: Vec<[u32; 2]> = lanes.chunks(2).map(|x| [x[0], x[1]]).collect();
                unsafe {
                    queue
                        .enqueue_write(&buffer, false, HostSlice::lane_groups(&groups))
                        .unwrap();
                }
            }));
        }
        queue.finish();
        assert_eq!(queue.staging.lock().len(), 1);
        assert_eq!(host.pending(queue.id()), Some(1));
        queue.finish();
        assert!(queue.staging.lock().is_empty());
        assert_eq!(queue.read_lanes(&buffer).unwrap(), expected);
    }
}
