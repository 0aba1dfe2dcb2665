/*!
Host data and transfer marshalling.

Host data for a transfer is a [`HostSlice`] (written to the device) or a
[`HostSliceMut`] (read from the device), in one of three shapes:

- Scalars, for scalar element types. The scalar type must match the element
  type exactly, ie `&[f32]` for [`ElementType::F32`].
- Lanes, for wide element types. A flat sequence of 32-bit lanes,
  [`lane_count`](ElementType::lane_count) lanes per element.
- Lane groups, for wide element types. One group of exactly `lane_count`
  lanes per element, flattened through a staging buffer.

Lanes may be `u32` or `i32`, they are reinterpreted bit for bit. An element of
[`ElementType::WideI512`] is 16 lanes, 64 bytes, regardless of how the host
views the lanes.

[`prepare`] and [`prepare_mut`] validate host data against a buffer and
compute the byte length and pointer for the native transfer. Host data may
hold fewer elements than the buffer, in which case only that prefix of the
buffer is transferred.
*/

use crate::{
    buffer::Buffer,
    elem::{ElementType, HostRepr},
    error::{ConfigError, HostDataKind},
    scalar::{Lane, Scalar, ScalarType},
};
use std::borrow::Cow;

/// Scalars borrowed for a write.
#[derive(Clone, Copy, Debug)]
pub struct ScalarSlice<'a> {
    scalar_type: ScalarType,
    bytes: &'a [u8],
}

impl ScalarSlice<'_> {
    /// The scalar type.
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }
    /// The number of scalars.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.scalar_type.size()
    }
    /// Whether there are no scalars.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Scalars borrowed for a read.
#[derive(Debug)]
pub struct ScalarSliceMut<'a> {
    scalar_type: ScalarType,
    bytes: &'a mut [u8],
}

impl ScalarSliceMut<'_> {
    /// The scalar type.
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }
    /// The number of scalars.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.scalar_type.size()
    }
    /// Whether there are no scalars.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Host data to write to a buffer.
#[derive(Clone, Debug)]
pub enum HostSlice<'a> {
    /// Scalars of a scalar element type.
    Scalars(ScalarSlice<'a>),
    /// Flat lanes of a wide element type.
    Lanes(&'a [u32]),
    /// One group of lanes per element of a wide element type.
    LaneGroups(Vec<&'a [u32]>),
}

impl<'a> HostSlice<'a> {
    /// Scalars.
    pub fn scalars<T: Scalar>(scalars: &'a [T]) -> Self {
        Self::Scalars(ScalarSlice {
            scalar_type: T::SCALAR_TYPE,
            bytes: bytemuck::cast_slice(scalars),
        })
    }
    /// Flat lanes.
    pub fn lanes<L: Lane>(lanes: &'a [L]) -> Self {
        Self::Lanes(bytemuck::cast_slice(lanes))
    }
    /// Lane groups, ie `&[[i32; 16]]` or `&[Vec<u32>]`.
    pub fn lane_groups<L: Lane, G: AsRef<[L]>>(groups: &'a [G]) -> Self {
        Self::LaneGroups(
            groups
                .iter()
                .map(|group| bytemuck::cast_slice(group.as_ref()))
                .collect(),
        )
    }
    /// The shape.
    pub fn kind(&self) -> HostDataKind {
        match self {
            Self::Scalars(slice) => HostDataKind::Scalar(slice.scalar_type),
            Self::Lanes(_) => HostDataKind::Lanes,
            Self::LaneGroups(_) => HostDataKind::LaneGroups,
        }
    }
}

impl<'a, T: Scalar> From<&'a [T]> for HostSlice<'a> {
    fn from(scalars: &'a [T]) -> Self {
        Self::scalars(scalars)
    }
}

impl<'a, T: Scalar> From<&'a Vec<T>> for HostSlice<'a> {
    fn from(scalars: &'a Vec<T>) -> Self {
        Self::scalars(scalars)
    }
}

/// Host data to read a buffer into.
#[derive(Debug)]
pub enum HostSliceMut<'a> {
    /// Scalars of a scalar element type.
    Scalars(ScalarSliceMut<'a>),
    /// Flat lanes of a wide element type.
    Lanes(&'a mut [u32]),
    /// One group of lanes per element of a wide element type.
    LaneGroups(Vec<&'a mut [u32]>),
}

impl<'a> HostSliceMut<'a> {
    /// Scalars.
    pub fn scalars<T: Scalar>(scalars: &'a mut [T]) -> Self {
        Self::Scalars(ScalarSliceMut {
            scalar_type: T::SCALAR_TYPE,
            bytes: bytemuck::cast_slice_mut(scalars),
        })
    }
    /// Flat lanes.
    pub fn lanes<L: Lane>(lanes: &'a mut [L]) -> Self {
        Self::Lanes(bytemuck::cast_slice_mut(lanes))
    }
    /// Lane groups, ie `&mut [[i32; 16]]` or `&mut [Vec<u32>]`.
    pub fn lane_groups<L: Lane, G: AsMut<[L]>>(groups: &'a mut [G]) -> Self {
        Self::LaneGroups(
            groups
                .iter_mut()
                .map(|group| bytemuck::cast_slice_mut(group.as_mut()))
                .collect(),
        )
    }
    /// The shape.
    pub fn kind(&self) -> HostDataKind {
        match self {
            Self::Scalars(slice) => HostDataKind::Scalar(slice.scalar_type),
            Self::Lanes(_) => HostDataKind::Lanes,
            Self::LaneGroups(_) => HostDataKind::LaneGroups,
        }
    }
}

impl<'a, T: Scalar> From<&'a mut [T]> for HostSliceMut<'a> {
    fn from(scalars: &'a mut [T]) -> Self {
        Self::scalars(scalars)
    }
}

impl<'a, T: Scalar> From<&'a mut Vec<T>> for HostSliceMut<'a> {
    fn from(scalars: &'a mut Vec<T>) -> Self {
        Self::scalars(scalars)
    }
}

/// The shape of host data, without the data.
enum Shape<'s> {
    Scalars { scalar_type: ScalarType, len: usize },
    Lanes { len: usize },
    LaneGroups { lens: Box<dyn Iterator<Item = usize> + 's> },
}

impl<'a> HostSlice<'a> {
    fn shape(&self) -> Shape<'_> {
        match self {
            Self::Scalars(slice) => Shape::Scalars {
                scalar_type: slice.scalar_type,
                len: slice.len(),
            },
            Self::Lanes(lanes) => Shape::Lanes { len: lanes.len() },
            Self::LaneGroups(groups) => Shape::LaneGroups {
                lens: Box::new(groups.iter().map(|group| group.len())),
            },
        }
    }
}

impl<'a> HostSliceMut<'a> {
    fn shape(&self) -> Shape<'_> {
        match self {
            Self::Scalars(slice) => Shape::Scalars {
                scalar_type: slice.scalar_type,
                len: slice.len(),
            },
            Self::Lanes(lanes) => Shape::Lanes { len: lanes.len() },
            Self::LaneGroups(groups) => Shape::LaneGroups {
                lens: Box::new(groups.iter().map(|group| group.len())),
            },
        }
    }
}

/// Validates the shape of host data against `buffer` and returns the number
/// of elements it holds.
fn host_elements(
    buffer: &Buffer,
    kind: HostDataKind,
    shape: Shape<'_>,
) -> Result<u64, ConfigError> {
    let element_type = buffer.element_type();
    let expected = element_type.host_repr();
    let elements = match (expected, shape) {
        (HostRepr::Scalar(scalar_type), Shape::Scalars { scalar_type: found, len })
            if scalar_type == found =>
        {
            len
        }
        (HostRepr::Lanes { lane_count }, Shape::Lanes { len }) => {
            if len % lane_count as usize != 0 {
                return Err(ConfigError::PartialElement {
                    lanes: len,
                    lane_count,
                });
            }
            len / lane_count as usize
        }
        (HostRepr::Lanes { lane_count }, Shape::LaneGroups { lens }) => {
            let mut groups = 0;
            for (index, len) in lens.enumerate() {
                if len != lane_count as usize {
                    return Err(ConfigError::LaneGroupLength {
                        index,
                        len,
                        lane_count,
                    });
                }
                groups += 1;
            }
            groups
        }
        (expected, _) => {
            return Err(mismatch(element_type, expected, kind));
        }
    };
    let elements = elements as u64;
    if elements == 0 {
        return Err(ConfigError::EmptyHostData);
    }
    let buffer_elements = u64::from(buffer.element_count());
    if elements > buffer_elements {
        return Err(ConfigError::HostDataTooLong {
            host: elements,
            buffer: buffer_elements,
        });
    }
    Ok(elements)
}

fn mismatch(element_type: ElementType, expected: HostRepr, found: HostDataKind) -> ConfigError {
    ConfigError::RepresentationMismatch {
        element_type,
        expected,
        found,
    }
}

/// A prepared write.
///
/// Borrows the host data, or owns the flattened lanes of lane groups.
#[derive(Debug)]
pub struct Transfer<'a> {
    bytes: Cow<'a, [u8]>,
    elements: u64,
}

impl<'a> Transfer<'a> {
    /// The number of bytes to transfer.
    pub fn byte_len(&self) -> u64 {
        self.bytes.len() as u64
    }
    /// The number of elements to transfer.
    pub fn element_count(&self) -> u64 {
        self.elements
    }
    /// The bytes to transfer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
    /// Pointer to the bytes, valid while `self` is alive.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }
    /// Whether the host data was copied into a staging buffer.
    pub fn is_staged(&self) -> bool {
        matches!(self.bytes, Cow::Owned(_))
    }
    pub(crate) fn into_staging(self) -> Option<Vec<u8>> {
        match self.bytes {
            Cow::Owned(staging) => Some(staging),
            Cow::Borrowed(_) => None,
        }
    }
}

/// Prepares `host` to be written to `buffer`.
///
/// **errors**
/// - [`ConfigError::RepresentationMismatch`] if `host` is not in the
///   representation of the element type.
/// - [`ConfigError::LaneGroupLength`] if any lane group does not hold exactly
///   one element.
/// - [`ConfigError::PartialElement`] if flat lanes do not divide into elements.
/// - [`ConfigError::EmptyHostData`]
/// - [`ConfigError::HostDataTooLong`]
pub fn prepare<'a>(buffer: &Buffer, host: &HostSlice<'a>) -> Result<Transfer<'a>, ConfigError> {
    let elements = host_elements(buffer, host.kind(), host.shape())?;
    let bytes = match host {
        HostSlice::Scalars(slice) => Cow::Borrowed(slice.bytes),
        HostSlice::Lanes(lanes) => Cow::Borrowed(bytemuck::cast_slice(*lanes)),
        HostSlice::LaneGroups(groups) => Cow::Owned(
            groups
                .iter()
                .flat_map(|group| bytemuck::cast_slice::<u32, u8>(group))
                .copied()
                .collect(),
        ),
    };
    debug_assert_eq!(
        bytes.len() as u64,
        elements * u64::from(buffer.per_element_byte_width())
    );
    Ok(Transfer { bytes, elements })
}

/// A prepared read.
///
/// Borrows the host data, or stages lane groups in a flat buffer that is
/// copied back by [`complete`](TransferMut::complete).
#[derive(Debug)]
pub struct TransferMut<'a> {
    target: Target<'a>,
    elements: u64,
}

#[derive(Debug)]
enum Target<'a> {
    Direct(&'a mut [u8]),
    Staged {
        staging: Vec<u32>,
        groups: Vec<&'a mut [u32]>,
    },
}

impl<'a> TransferMut<'a> {
    /// The number of bytes to transfer.
    pub fn byte_len(&self) -> u64 {
        match &self.target {
            Target::Direct(bytes) => bytes.len() as u64,
            Target::Staged { staging, .. } => {
                (staging.len() * std::mem::size_of::<u32>()) as u64
            }
        }
    }
    /// The number of elements to transfer.
    pub fn element_count(&self) -> u64 {
        self.elements
    }
    /// Pointer to the destination bytes, valid while `self` is alive.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        match &mut self.target {
            Target::Direct(bytes) => bytes.as_mut_ptr(),
            Target::Staged { staging, .. } => {
                bytemuck::cast_slice_mut::<u32, u8>(staging).as_mut_ptr()
            }
        }
    }
    /// Whether the host data is read through a staging buffer.
    pub fn is_staged(&self) -> bool {
        matches!(self.target, Target::Staged { .. })
    }
    /// Copies staged lanes back into their groups.
    ///
    /// Call once the read has completed.
    pub fn complete(self) {
        if let Target::Staged { staging, groups } = self.target {
            let mut offset = 0;
            for group in groups {
                let end = offset + group.len();
                group.copy_from_slice(&staging[offset..end]);
                offset = end;
            }
        }
    }
}

/// Prepares `host` to be read into from `buffer`.
///
/// **errors**
///
/// See [`prepare`].
pub fn prepare_mut<'a>(
    buffer: &Buffer,
    host: HostSliceMut<'a>,
) -> Result<TransferMut<'a>, ConfigError> {
    let elements = host_elements(buffer, host.kind(), host.shape())?;
    let target = match host {
        HostSliceMut::Scalars(slice) => Target::Direct(slice.bytes),
        HostSliceMut::Lanes(lanes) => Target::Direct(bytemuck::cast_slice_mut(lanes)),
        HostSliceMut::LaneGroups(groups) => {
            let lanes: usize = groups.iter().map(|group| group.len()).sum();
            Target::Staged {
                staging: vec![0; lanes],
                groups,
            }
        }
    };
    let transfer = TransferMut { target, elements };
    debug_assert_eq!(
        transfer.byte_len(),
        elements * u64::from(buffer.per_element_byte_width())
    );
    Ok(transfer)
}
