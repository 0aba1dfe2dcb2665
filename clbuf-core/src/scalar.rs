use bytemuck::Pod;
use derive_more::Display;
use dry::macro_for;
use num_traits::{FromPrimitive, NumCast};
use paste::paste;
#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

mod sealed {
    #[doc(hidden)]
    pub trait Sealed {}

    macro_rules! impl_sealed {
        ($($t:ty),+) => {
            $(
                impl Sealed for $t {}
            )+
        };
    }

    impl_sealed!(u8, i8, u16, i16, u32, i32, f32, u64, i64, f64);
}
use sealed::Sealed;

/// Host numerical types that back scalar element types.
#[allow(missing_docs)]
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
    I64,
    F64,
}

impl ScalarType {
    /// All scalar types, narrowest first.
    #[inline]
    pub fn iter() -> impl Iterator<Item = Self> {
        use ScalarType::*;
        [U8, I8, U16, I16, U32, I32, F32, U64, I64, F64].into_iter()
    }
    /// Size of the type in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        use ScalarType::*;
        match self {
            U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
        }
    }
    /// Whether the type is a signed integer or a float.
    #[inline]
    pub fn is_signed(&self) -> bool {
        use ScalarType::*;
        match self {
            U8 | U16 | U32 | U64 => false,
            I8 | I16 | I32 | I64 | F32 | F64 => true,
        }
    }
    /// Name of the type.
    ///
    /// Lowercase, ie "u8", "f32", etc.
    #[inline]
    pub fn name(&self) -> &'static str {
        use ScalarType::*;
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
        }
    }
    /// Name of the variant.
    ///
    /// Uppercase, ie "U8", "F32", etc.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        use ScalarType::*;
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
        }
    }
}

impl FromStr for ScalarType {
    type Err = ();
    fn from_str(input: &str) -> Result<Self, ()> {
        Self::iter()
            .find(|x| x.as_str() == input || x.name() == input)
            .ok_or(())
    }
}

#[cfg(feature = "serde")]
impl Serialize for ScalarType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ScalarType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Visitor;

        struct ScalarTypeVisitor;

        impl Visitor<'_> for ScalarTypeVisitor {
            type Value = ScalarType;
            fn expecting(&self, formatter: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(formatter, "a scalar type")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ScalarType::from_str(v).map_err(|_| E::custom(format!("unknown ScalarType {v}")))
            }
        }
        deserializer.deserialize_str(ScalarTypeVisitor)
    }
}

/// Base trait for host scalars.
pub trait Scalar:
    Default
    + Copy
    + 'static
    + Send
    + Sync
    + NumCast
    + FromPrimitive
    + PartialEq
    + PartialOrd
    + Pod
    + Debug
    + Display
    + Sealed
{
    /// The [`ScalarType`] of the scalar.
    const SCALAR_TYPE: ScalarType;
}

macro_for!($X in [u8, i8, u16, i16, u32, i32, f32, u64, i64, f64] {
    paste! {
        impl Scalar for $X {
            const SCALAR_TYPE: ScalarType = ScalarType::[<$X:upper>];
        }
    }
});

/// A 32-bit lane of a wide element.
///
/// Lanes are reinterpreted bit for bit, signedness is only a host-side view.
pub trait Lane: Copy + 'static + Send + Sync + Pod + Debug + Sealed {}

impl Lane for u32 {}
impl Lane for i32 {}
