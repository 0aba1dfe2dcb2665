/*!
Typed device buffers and command queues over a C-style compute runtime.

**clbuf** allocates [`Buffer`](buffer::Buffer)s of a fixed
[`ElementType`](elem::ElementType), moves host data in and out of them with a
[`CommandQueue`](queue::CommandQueue), and dispatches kernels. Host data is
validated against the element type before anything reaches the runtime:
scalars must match exactly, and wide integers are given as 32-bit lanes.

The runtime itself is behind the [`Runtime`](device::Runtime) trait.
[`HostRuntime`](device::HostRuntime) implements it in process.
*/
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub use clbuf_core;

#[doc(inline)]
pub use clbuf_core::{elem, scalar};

/// Result type.
pub mod result {
    /// Result with [`Error`](crate::error::Error) as the default error.
    pub type Result<T, E = crate::error::Error> = std::result::Result<T, E>;
}

pub mod buffer;
pub mod device;
pub mod error;
pub mod queue;
pub mod transfer;
