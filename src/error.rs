/*!
Errors.

A [`ConfigError`] is raised before any native call is issued, nothing has
been allocated or enqueued. A [`NativeError`] is a failure reported by the
[`Runtime`](crate::device::Runtime).
*/

use clbuf_core::elem::{ElementType, HostRepr, UnknownElementType};
use derive_more::Display;
use std::fmt::{self, Debug, Display};

/// An invalid request, detected before calling into the runtime.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The tag or name does not name an element type.
    #[error(transparent)]
    UnknownElementType(#[from] UnknownElementType),
    /// The builder was not given an element type.
    #[error("element type not specified")]
    MissingElementType,
    /// Zero length buffers are not accepted by the runtime.
    #[error("zero sized allocation of {element_type}")]
    ZeroSizedAllocation {
        #[allow(missing_docs)]
        element_type: ElementType,
    },
    /// The host data does not have the representation of the element type.
    #[error("representation mismatch: {element_type} expects {expected}, found {found}")]
    RepresentationMismatch {
        #[allow(missing_docs)]
        element_type: ElementType,
        #[allow(missing_docs)]
        expected: HostRepr,
        #[allow(missing_docs)]
        found: HostDataKind,
    },
    /// A lane group does not hold exactly one element.
    #[error("unexpected lane-group length: group {index} has {len} lanes, expected {lane_count}")]
    LaneGroupLength {
        #[allow(missing_docs)]
        index: usize,
        #[allow(missing_docs)]
        len: usize,
        #[allow(missing_docs)]
        lane_count: u32,
    },
    /// Flat lanes do not divide into whole elements.
    #[error("{lanes} lanes is not a multiple of {lane_count}")]
    PartialElement {
        #[allow(missing_docs)]
        lanes: usize,
        #[allow(missing_docs)]
        lane_count: u32,
    },
    /// The host data is empty.
    #[error("empty host data")]
    EmptyHostData,
    /// The host data holds more elements than the buffer.
    #[error("host data has {host} elements, buffer has {buffer}")]
    HostDataTooLong {
        #[allow(missing_docs)]
        host: u64,
        #[allow(missing_docs)]
        buffer: u64,
    },
    /// `global_work_sizes.len()` differs from `work_dim`.
    #[error("work_dim is {work_dim} but {sizes} global work sizes were given")]
    WorkDimensionMismatch {
        #[allow(missing_docs)]
        work_dim: u32,
        #[allow(missing_docs)]
        sizes: usize,
    },
    /// Grouped lanes can only be read by a blocking read.
    #[error("non-blocking read into lane groups")]
    NonBlockingGroupedRead,
    /// Objects from different contexts were mixed.
    #[error("objects belong to different contexts")]
    ContextMismatch,
}

/// The shape of host data, used in errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display)]
pub enum HostDataKind {
    #[allow(missing_docs)]
    #[display(fmt = "[{}]", _0)]
    Scalar(clbuf_core::scalar::ScalarType),
    #[allow(missing_docs)]
    #[display(fmt = "[u32]")]
    Lanes,
    #[allow(missing_docs)]
    #[display(fmt = "[[u32]]")]
    LaneGroups,
}

/// The native operation that failed.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Display)]
pub enum NativeOp {
    Allocate,
    CreateQueue,
    EnqueueRead,
    EnqueueWrite,
    EnqueueKernel,
    Flush,
    Finish,
    ReleaseMem,
    ReleaseQueue,
}

/// Translated native error codes.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Display)]
pub enum NativeErrorKind {
    OutOfDeviceMemory,
    OutOfResources,
    OutOfHostMemory,
    InvalidValue,
    InvalidContext,
    InvalidDevice,
    InvalidQueue,
    InvalidMemObject,
    InvalidKernel,
    InvalidBufferSize,
    InvalidWorkDimension,
    InvalidWorkSize,
    Other,
}

/// Native status codes, as returned by a [`Runtime`](crate::device::Runtime).
pub mod status {
    #![allow(missing_docs)]

    pub const SUCCESS: i32 = 0;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const OUT_OF_HOST_MEMORY: i32 = -6;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_CONTEXT: i32 = -34;
    pub const INVALID_COMMAND_QUEUE: i32 = -36;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_KERNEL: i32 = -48;
    pub const INVALID_WORK_DIMENSION: i32 = -53;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
}

/// A failure reported by the runtime.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct NativeError {
    op: NativeOp,
    code: i32,
}

impl NativeError {
    /// Creates an error for `op` with the native `code`.
    pub fn new(op: NativeOp, code: i32) -> Self {
        Self { op, code }
    }
    /// The operation that failed.
    pub fn op(&self) -> NativeOp {
        self.op
    }
    /// The untranslated native code.
    pub fn code(&self) -> i32 {
        self.code
    }
    /// The translated code.
    pub fn kind(&self) -> NativeErrorKind {
        use NativeErrorKind as K;
        match self.code {
            status::MEM_OBJECT_ALLOCATION_FAILURE => K::OutOfDeviceMemory,
            status::OUT_OF_RESOURCES => K::OutOfResources,
            status::OUT_OF_HOST_MEMORY => K::OutOfHostMemory,
            status::INVALID_VALUE => K::InvalidValue,
            status::INVALID_DEVICE => K::InvalidDevice,
            status::INVALID_CONTEXT => K::InvalidContext,
            status::INVALID_COMMAND_QUEUE => K::InvalidQueue,
            status::INVALID_MEM_OBJECT => K::InvalidMemObject,
            status::INVALID_KERNEL => K::InvalidKernel,
            status::INVALID_BUFFER_SIZE => K::InvalidBufferSize,
            status::INVALID_WORK_DIMENSION => K::InvalidWorkDimension,
            status::INVALID_GLOBAL_WORK_SIZE => K::InvalidWorkSize,
            _ => K::Other,
        }
    }
}

impl Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} failed: {} ({})", self.op, self.kind(), self.code)
    }
}

impl std::error::Error for NativeError {}

impl Debug for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NativeError")
            .field("op", &self.op)
            .field("kind", &self.kind())
            .field("code", &self.code)
            .finish()
    }
}

/// Errors returned by **clbuf**.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[allow(missing_docs)]
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Native(#[from] NativeError),
}

impl Error {
    /// Whether the error was raised before calling into the runtime.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
    /// Whether the error was reported by the runtime.
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl From<UnknownElementType> for Error {
    fn from(error: UnknownElementType) -> Self {
        Self::Config(error.into())
    }
}
