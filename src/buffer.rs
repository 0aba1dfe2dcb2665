/*!
Typed device buffers.

A [`Buffer`] owns a native memory object holding
[`element_count`](Buffer::element_count) elements of one [`ElementType`]. The
type and length are fixed when the buffer is created; the size in bytes is
always `element_count * per_element_byte_width`.

```
# use clbuf::{buffer::{Buffer, MemFlags}, device::HostRuntime, elem::ElementType};
# fn main() -> clbuf::result::Result<()> {
let runtime = HostRuntime::builder().build();
let buffer = Buffer::builder()
    .flag(MemFlags::READ_WRITE)
    .element_type(ElementType::WideI512)
    .len(8)
    .build(&runtime.context())?;
assert_eq!(buffer.per_element_byte_width(), 64);
assert_eq!(buffer.total_allocated_bytes(), 512);
# Ok(())
# }
```
*/

use crate::{
    device::{Context, ContextId, MemId, Owned, Runtime},
    elem::ElementType,
    error::{ConfigError, NativeError, NativeOp},
    result::Result,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

/// Access permissions of a memory object.
///
/// Flags are combined with bitwise OR. With the `serde` feature, flags
/// serialize as the raw permission word.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, derive_more::BitOr, derive_more::BitOrAssign)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct MemFlags(u64);

impl MemFlags {
    /// The device reads and writes the memory object.
    pub const READ_WRITE: Self = Self(1 << 0);
    /// The device only writes the memory object.
    pub const WRITE_ONLY: Self = Self(1 << 1);
    /// The device only reads the memory object.
    pub const READ_ONLY: Self = Self(1 << 2);
    /// The memory object is allocated in host accessible memory.
    pub const ALLOC_HOST_PTR: Self = Self(1 << 4);
    /// The host only writes the memory object.
    pub const HOST_WRITE_ONLY: Self = Self(1 << 7);
    /// The host only reads the memory object.
    pub const HOST_READ_ONLY: Self = Self(1 << 8);
    /// The host neither reads nor writes the memory object.
    pub const HOST_NO_ACCESS: Self = Self(1 << 9);

    const NAMED: [(Self, &'static str); 7] = [
        (Self::READ_WRITE, "READ_WRITE"),
        (Self::WRITE_ONLY, "WRITE_ONLY"),
        (Self::READ_ONLY, "READ_ONLY"),
        (Self::ALLOC_HOST_PTR, "ALLOC_HOST_PTR"),
        (Self::HOST_WRITE_ONLY, "HOST_WRITE_ONLY"),
        (Self::HOST_READ_ONLY, "HOST_READ_ONLY"),
        (Self::HOST_NO_ACCESS, "HOST_NO_ACCESS"),
    ];

    /// No flags.
    pub const fn empty() -> Self {
        Self(0)
    }
    /// Flags from a raw permission word, unknown bits are kept.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
    /// The permission word.
    pub const fn bits(&self) -> u64 {
        self.0
    }
    /// Whether all of `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
    /// Whether no flags are set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
    /// Combines `flags` into one permission word.
    pub fn combine(flags: impl IntoIterator<Item = Self>) -> Self {
        flags.into_iter().fold(Self::empty(), |acc, x| acc | x)
    }
    /// The device access flags, [`READ_WRITE`](Self::READ_WRITE),
    /// [`WRITE_ONLY`](Self::WRITE_ONLY) and [`READ_ONLY`](Self::READ_ONLY).
    pub const fn device_access(&self) -> Self {
        Self(self.0 & (Self::READ_WRITE.0 | Self::WRITE_ONLY.0 | Self::READ_ONLY.0))
    }
}

impl FromIterator<MemFlags> for MemFlags {
    fn from_iter<I: IntoIterator<Item = MemFlags>>(iter: I) -> Self {
        Self::combine(iter)
    }
}

impl Debug for MemFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("MemFlags(empty)");
        }
        let mut rest = self.0;
        let mut names = Vec::new();
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                names.push(name);
                rest &= !flag.0;
            }
        }
        write!(f, "MemFlags({}", names.join(" | "))?;
        if rest != 0 {
            if !names.is_empty() {
                f.write_str(" | ")?;
            }
            write!(f, "{rest:#x}")?;
        }
        f.write_str(")")
    }
}

/// Builders.
pub mod builder {
    use super::*;

    /// Builder for creating a [`Buffer`].
    #[derive(Clone, Debug, Default)]
    pub struct BufferBuilder {
        flags: MemFlags,
        element_type: Option<ElementTag>,
        len: u32,
    }

    #[derive(Clone, Copy, Debug)]
    enum ElementTag {
        Type(ElementType),
        Raw(u32),
    }

    impl BufferBuilder {
        /// Replaces the flags, defaults to empty.
        pub fn flags(mut self, flags: impl IntoIterator<Item = MemFlags>) -> Self {
            self.flags = MemFlags::combine(flags);
            self
        }
        /// Adds `flag`.
        pub fn flag(mut self, flag: MemFlags) -> Self {
            self.flags |= flag;
            self
        }
        /// The element type, required.
        pub fn element_type(mut self, element_type: ElementType) -> Self {
            self.element_type.replace(ElementTag::Type(element_type));
            self
        }
        /// The element type from a raw tag, see [`ElementType`].
        ///
        /// An unknown tag fails in [`build`](Self::build).
        pub fn element_tag(mut self, tag: u32) -> Self {
            self.element_type.replace(ElementTag::Raw(tag));
            self
        }
        /// The number of elements, defaults to 0.
        pub fn len(mut self, len: u32) -> Self {
            self.len = len;
            self
        }
        /// Creates the buffer.
        ///
        /// **errors**
        /// - [`ConfigError::UnknownElementType`]
        /// - [`ConfigError::MissingElementType`]
        /// - See [`Buffer::create`].
        pub fn build(self, context: &Context) -> Result<Buffer> {
            let element_type = match self.element_type {
                Some(ElementTag::Type(element_type)) => element_type,
                Some(ElementTag::Raw(tag)) => ElementType::try_from(tag)?,
                None => return Err(ConfigError::MissingElementType.into()),
            };
            Buffer::create(context, [self.flags], element_type, self.len)
        }
    }
}
use builder::BufferBuilder;

/// A typed device buffer.
///
/// The memory object is released by [`release`](Buffer::release), or when
/// the buffer is dropped.
pub struct Buffer {
    mem: Owned<MemId>,
    context: ContextId,
    element_type: ElementType,
    flags: MemFlags,
    len: u32,
}

impl Buffer {
    /// A builder, see [`BufferBuilder`].
    pub fn builder() -> BufferBuilder {
        BufferBuilder::default()
    }
    /// Allocates a buffer of `len` elements of `element_type`.
    ///
    /// `flags` are combined with bitwise OR.
    ///
    /// **errors**
    /// - [`ConfigError::ZeroSizedAllocation`] if `len` is 0 and the runtime
    ///   does not accept zero sized allocations. Nothing is allocated.
    /// - [`NativeError`] with [`NativeOp::Allocate`] if the runtime fails.
    pub fn create(
        context: &Context,
        flags: impl IntoIterator<Item = MemFlags>,
        element_type: ElementType,
        len: u32,
    ) -> Result<Self> {
        let flags = MemFlags::combine(flags);
        let size = u64::from(len) * u64::from(element_type.size());
        let runtime = context.runtime();
        if size == 0 && !runtime.accepts_zero_size() {
            return Err(ConfigError::ZeroSizedAllocation { element_type }.into());
        }
        let mem = runtime
            .allocate(context.id(), flags.bits(), size)
            .map_err(|code| NativeError::new(NativeOp::Allocate, code))?;
        log::debug!("allocated {mem:?}: {len} x {element_type} ({size} bytes) {flags:?}");
        Ok(Self {
            mem: Owned::new(runtime.clone(), mem),
            context: context.id(),
            element_type,
            flags,
            len,
        })
    }
    /// The element type.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }
    /// Size of an element in bytes.
    pub fn per_element_byte_width(&self) -> u32 {
        self.element_type.size()
    }
    /// Lanes per element, 1 for scalars.
    pub fn lane_count(&self) -> u32 {
        self.element_type.lane_count()
    }
    /// The number of elements.
    pub fn element_count(&self) -> u32 {
        self.len
    }
    /// Size of the memory object in bytes.
    pub fn total_allocated_bytes(&self) -> u64 {
        u64::from(self.len) * u64::from(self.per_element_byte_width())
    }
    /// The flags the buffer was allocated with.
    pub fn flags(&self) -> MemFlags {
        self.flags
    }
    /// The native memory object.
    pub fn id(&self) -> MemId {
        self.mem.id()
    }
    /// The context the buffer was allocated in.
    pub fn context_id(&self) -> ContextId {
        self.context
    }
    pub(crate) fn runtime(&self) -> &Arc<dyn Runtime> {
        self.mem.runtime()
    }
    /// Releases the memory object.
    ///
    /// Failures are logged, not returned.
    pub fn release(mut self) {
        log::debug!("releasing {:?}", self.mem);
        self.mem.release();
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("mem", &self.mem)
            .field("element_type", &self.element_type)
            .field("len", &self.len)
            .field("flags", &self.flags)
            .finish()
    }
}
