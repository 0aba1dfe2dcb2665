/*!
Element types of device buffers.

An [`ElementType`] is either a scalar, stored on the host as the matching
[`Scalar`](crate::scalar::Scalar), or a wide vector, stored on the host as a
flat sequence of 32-bit [lanes](crate::scalar::Lane).

| element type | bytes | lanes |
|---|---|---|
| `U8`, `I8` | 1 | 1 |
| `U16`, `I16` | 2 | 1 |
| `U32`, `I32`, `F32` | 4 | 1 |
| `U64`, `I64`, `F64` | 8 | 1 |
| `WideU64`, `WideI64` | 8 | 2 |
| `WideU128`, `WideI128` | 16 | 4 |
| `WideU256`, `WideI256` | 32 | 8 |
| `WideU512`, `WideI512` | 64 | 16 |
*/

use crate::scalar::ScalarType;
use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Size of a lane in bytes.
pub const LANE_SIZE: u32 = 4;

/// The element type of a buffer.
///
/// Discriminants are stable tags. New element types take new tags, existing
/// tags never change meaning.
#[allow(missing_docs)]
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
#[repr(u32)]
pub enum ElementType {
    U8 = 1,
    I8 = 2,
    U16 = 3,
    I16 = 4,
    U32 = 5,
    I32 = 6,
    F32 = 7,
    U64 = 8,
    I64 = 9,
    F64 = 10,
    WideU64 = 11,
    WideI64 = 12,
    WideU128 = 13,
    WideI128 = 14,
    WideU256 = 15,
    WideI256 = 16,
    WideU512 = 17,
    WideI512 = 18,
}

/// Per element geometry of an [`ElementType`].
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct ElementDesc {
    /// Bytes per element.
    pub byte_width: u32,
    /// 32-bit lanes per element, 1 for scalars.
    pub lane_count: u32,
}

/// How an element type is represented on the host.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
pub enum HostRepr {
    /// A sequence of the scalar.
    #[display(fmt = "[{}]", _0)]
    Scalar(ScalarType),
    /// A flat sequence of 32-bit lanes, `lane_count` per element.
    #[display(fmt = "[u32; {} * n]", lane_count)]
    Lanes {
        #[allow(missing_docs)]
        lane_count: u32,
    },
}

/// A raw tag or name that is not an [`ElementType`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum UnknownElementType {
    #[allow(missing_docs)]
    #[error("unknown element type tag {0}")]
    Tag(u32),
    #[allow(missing_docs)]
    #[error("unknown element type {0:?}")]
    Name(String),
}

impl ElementType {
    /// All element types, in tag order.
    #[inline]
    pub fn iter() -> impl Iterator<Item = Self> {
        use ElementType::*;
        [
            U8, I8, U16, I16, U32, I32, F32, U64, I64, F64, WideU64, WideI64, WideU128, WideI128,
            WideU256, WideI256, WideU512, WideI512,
        ]
        .into_iter()
    }
    /// The element geometry.
    ///
    /// Each tag has its own arm, signed and unsigned variants are never
    /// grouped through a shared default.
    #[inline]
    pub const fn desc(&self) -> ElementDesc {
        use ElementType::*;
        let (byte_width, lane_count) = match self {
            U8 => (1, 1),
            I8 => (1, 1),
            U16 => (2, 1),
            I16 => (2, 1),
            U32 => (4, 1),
            I32 => (4, 1),
            F32 => (4, 1),
            U64 => (8, 1),
            I64 => (8, 1),
            F64 => (8, 1),
            WideU64 => (2 * LANE_SIZE, 2),
            WideI64 => (2 * LANE_SIZE, 2),
            WideU128 => (4 * LANE_SIZE, 4),
            WideI128 => (4 * LANE_SIZE, 4),
            WideU256 => (8 * LANE_SIZE, 8),
            WideI256 => (8 * LANE_SIZE, 8),
            WideU512 => (16 * LANE_SIZE, 16),
            WideI512 => (16 * LANE_SIZE, 16),
        };
        ElementDesc {
            byte_width,
            lane_count,
        }
    }
    /// Size of an element in bytes.
    #[inline]
    pub const fn size(&self) -> u32 {
        self.desc().byte_width
    }
    /// Lanes per element, 1 for scalars.
    #[inline]
    pub const fn lane_count(&self) -> u32 {
        self.desc().lane_count
    }
    /// The host representation.
    #[inline]
    pub fn host_repr(&self) -> HostRepr {
        use ElementType::*;
        match self {
            U8 => HostRepr::Scalar(ScalarType::U8),
            I8 => HostRepr::Scalar(ScalarType::I8),
            U16 => HostRepr::Scalar(ScalarType::U16),
            I16 => HostRepr::Scalar(ScalarType::I16),
            U32 => HostRepr::Scalar(ScalarType::U32),
            I32 => HostRepr::Scalar(ScalarType::I32),
            F32 => HostRepr::Scalar(ScalarType::F32),
            U64 => HostRepr::Scalar(ScalarType::U64),
            I64 => HostRepr::Scalar(ScalarType::I64),
            F64 => HostRepr::Scalar(ScalarType::F64),
            WideU64 | WideI64 | WideU128 | WideI128 | WideU256 | WideI256 | WideU512
            | WideI512 => HostRepr::Lanes {
                lane_count: self.lane_count(),
            },
        }
    }
    /// Whether the type is a wide vector.
    #[inline]
    pub fn is_wide(&self) -> bool {
        matches!(self.host_repr(), HostRepr::Lanes { .. })
    }
    /// Whether the type is signed.
    #[inline]
    pub fn is_signed(&self) -> bool {
        use ElementType::*;
        match self {
            U8 | U16 | U32 | U64 | WideU64 | WideU128 | WideU256 | WideU512 => false,
            I8 | I16 | I32 | F32 | I64 | F64 | WideI64 | WideI128 | WideI256 | WideI512 => true,
        }
    }
    /// Name of the type.
    ///
    /// Lowercase, ie "f32", "wide_i512", etc.
    #[inline]
    pub fn name(&self) -> &'static str {
        use ElementType::*;
        match self {
            U8 => "u8",
            I8 => "i8",
            U16 => "u16",
            I16 => "i16",
            U32 => "u32",
            I32 => "i32",
            F32 => "f32",
            U64 => "u64",
            I64 => "i64",
            F64 => "f64",
            WideU64 => "wide_u64",
            WideI64 => "wide_i64",
            WideU128 => "wide_u128",
            WideI128 => "wide_i128",
            WideU256 => "wide_u256",
            WideI256 => "wide_i256",
            WideU512 => "wide_u512",
            WideI512 => "wide_i512",
        }
    }
    /// Name of the variant.
    ///
    /// ie "F32", "WideI512", etc.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        use ElementType::*;
        match self {
            U8 => "U8",
            I8 => "I8",
            U16 => "U16",
            I16 => "I16",
            U32 => "U32",
            I32 => "I32",
            F32 => "F32",
            U64 => "U64",
            I64 => "I64",
            F64 => "F64",
            WideU64 => "WideU64",
            WideI64 => "WideI64",
            WideU128 => "WideU128",
            WideI128 => "WideI128",
            WideU256 => "WideU256",
            WideI256 => "WideI256",
            WideU512 => "WideU512",
            WideI512 => "WideI512",
        }
    }
}

impl From<ScalarType> for ElementType {
    #[inline]
    fn from(scalar_type: ScalarType) -> Self {
        use ScalarType as S;
        match scalar_type {
            S::U8 => Self::U8,
            S::I8 => Self::I8,
            S::U16 => Self::U16,
            S::I16 => Self::I16,
            S::U32 => Self::U32,
            S::I32 => Self::I32,
            S::F32 => Self::F32,
            S::U64 => Self::U64,
            S::I64 => Self::I64,
            S::F64 => Self::F64,
        }
    }
}

impl From<ElementType> for u32 {
    #[inline]
    fn from(element_type: ElementType) -> u32 {
        element_type as u32
    }
}

impl TryFrom<u32> for ElementType {
    type Error = UnknownElementType;
    fn try_from(input: u32) -> Result<Self, UnknownElementType> {
        Self::iter()
            .find(|x| *x as u32 == input)
            .ok_or(UnknownElementType::Tag(input))
    }
}

impl FromStr for ElementType {
    type Err = UnknownElementType;
    fn from_str(input: &str) -> Result<Self, UnknownElementType> {
        Self::iter()
            .find(|x| x.as_str() == input || x.name() == input)
            .ok_or_else(|| UnknownElementType::Name(input.to_string()))
    }
}

#[cfg(feature = "serde")]
impl Serialize for ElementType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ElementType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Visitor;

        struct ElementTypeVisitor;

        impl Visitor<'_> for ElementTypeVisitor {
            type Value = ElementType;
            fn expecting(&self, formatter: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(formatter, "an element type")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ElementType::from_str(v).map_err(E::custom)
            }
        }
        deserializer.deserialize_str(ElementTypeVisitor)
    }
}
