//! Engine element type tags.
//!
//! A [`TypeTag`] names one of the fixed-width numeric layouts the engine
//! accepts. The discriminants are the engine's own `vl_type` identifiers,
//! so a tag can be passed straight through an entry point and decoded from
//! a value the engine reports back.
//!
//! | Tag       | `vl_type` | Bytes | Rust |
//! |-----------|-----------|-------|------|
//! | `Float32` | 1         | 4     | f32  |
//! | `Float64` | 2         | 8     | f64  |
//! | `Int8`    | 3         | 1     | i8   |
//! | `UInt8`   | 4         | 1     | u8   |
//! | `Int16`   | 5         | 2     | i16  |
//! | `UInt16`  | 6         | 2     | u16  |
//! | `Int32`   | 7         | 4     | i32  |
//! | `UInt32`  | 8         | 4     | u32  |
//! | `Int64`   | 9         | 8     | i64  |
//! | `UInt64`  | 10        | 8     | u64  |

use crate::{Element, FfiError, FfiResult};
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;

/// Element layout selector shared with the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum TypeTag {
    /// 32-bit IEEE float (`VL_TYPE_FLOAT`).
    #[serde(rename = "float")]
    Float32 = 1,
    /// 64-bit IEEE float (`VL_TYPE_DOUBLE`).
    #[serde(rename = "double")]
    Float64 = 2,
    /// Signed 8-bit integer.
    Int8 = 3,
    /// Unsigned 8-bit integer.
    UInt8 = 4,
    /// Signed 16-bit integer.
    Int16 = 5,
    /// Unsigned 16-bit integer.
    UInt16 = 6,
    /// Signed 32-bit integer.
    Int32 = 7,
    /// Unsigned 32-bit integer.
    UInt32 = 8,
    /// Signed 64-bit integer.
    Int64 = 9,
    /// Unsigned 64-bit integer.
    UInt64 = 10,
}

impl TypeTag {
    /// Every supported tag, in identifier order.
    pub const ALL: [Self; 10] = [
        Self::Float32,
        Self::Float64,
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
    ];

    /// Tag of the engine's unsigned index type (`vl_uindex`/`vl_size`).
    #[cfg(target_pointer_width = "64")]
    pub const INDEX: Self = Self::UInt64;

    /// Tag of the engine's unsigned index type (`vl_uindex`/`vl_size`).
    #[cfg(not(target_pointer_width = "64"))]
    pub const INDEX: Self = Self::UInt32;

    /// Tag of the engine's signed index type (`vl_index`).
    #[cfg(target_pointer_width = "64")]
    pub const SIGNED_INDEX: Self = Self::Int64;

    /// Tag of the engine's signed index type (`vl_index`).
    #[cfg(not(target_pointer_width = "64"))]
    pub const SIGNED_INDEX: Self = Self::Int32;

    /// The engine identifier of this tag.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Decode an identifier reported by the engine.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedType`] for identifiers outside the
    /// supported set.
    pub fn from_id(id: u32) -> FfiResult<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.id() == id)
            .ok_or_else(|| FfiError::UnsupportedType(format!("vl_type {id}")))
    }

    /// Width of one element in bytes.
    #[inline]
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float64 | Self::Int64 | Self::UInt64 => 8,
        }
    }

    /// Whether this is a floating-point layout.
    #[inline]
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Whether this layout is signed.
    #[inline]
    #[must_use]
    pub const fn is_signed(self) -> bool {
        !matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }

    /// The engine's name for this layout.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
        }
    }

    /// The tag of a statically known element type.
    #[inline]
    #[must_use]
    pub const fn of<T: Element>() -> Self {
        T::TAG
    }

    /// Resolve the tag for an arbitrary host element type.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedType`] when `T` has no engine
    /// counterpart (`bool`, `String`, `usize`, records, ...).
    pub fn resolve<T: ?Sized + 'static>() -> FfiResult<Self> {
        let id = TypeId::of::<T>();
        let found = [
            (TypeId::of::<f32>(), Self::Float32),
            (TypeId::of::<f64>(), Self::Float64),
            (TypeId::of::<i8>(), Self::Int8),
            (TypeId::of::<u8>(), Self::UInt8),
            (TypeId::of::<i16>(), Self::Int16),
            (TypeId::of::<u16>(), Self::UInt16),
            (TypeId::of::<i32>(), Self::Int32),
            (TypeId::of::<u32>(), Self::UInt32),
            (TypeId::of::<i64>(), Self::Int64),
            (TypeId::of::<u64>(), Self::UInt64),
        ]
        .into_iter()
        .find_map(|(candidate, tag)| (candidate == id).then_some(tag));

        found.ok_or_else(|| FfiError::UnsupportedType(std::any::type_name::<T>().to_string()))
    }

    /// Whether [`TypeTag::resolve`] succeeds for `T`.
    #[must_use]
    pub fn is_supported<T: ?Sized + 'static>() -> bool {
        Self::resolve::<T>().is_ok()
    }

    /// Fail unless `actual` equals `self`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::TagMismatch`] when the tags differ.
    pub fn expect(self, actual: Self) -> FfiResult<()> {
        if self == actual {
            Ok(())
        } else {
            Err(FfiError::TagMismatch {
                expected: self,
                actual,
            })
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::from_id(tag.id()).unwrap(), tag);
        }
        assert_eq!(TypeTag::Float32.id(), 1);
        assert_eq!(TypeTag::UInt64.id(), 10);
    }

    #[test]
    fn test_unknown_id_is_unsupported() {
        assert!(matches!(
            TypeTag::from_id(0),
            Err(FfiError::UnsupportedType(_))
        ));
        assert!(matches!(
            TypeTag::from_id(11),
            Err(FfiError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_sizes() {
        assert_eq!(TypeTag::Int8.size_of(), 1);
        assert_eq!(TypeTag::UInt16.size_of(), 2);
        assert_eq!(TypeTag::Float32.size_of(), 4);
        assert_eq!(TypeTag::Int64.size_of(), 8);
        assert_eq!(TypeTag::INDEX.size_of(), std::mem::size_of::<usize>());
        assert_eq!(TypeTag::SIGNED_INDEX.size_of(), std::mem::size_of::<isize>());
        assert!(TypeTag::SIGNED_INDEX.is_signed());
    }

    #[test]
    fn test_resolve_supported() {
        assert_eq!(TypeTag::resolve::<f64>().unwrap(), TypeTag::Float64);
        assert_eq!(TypeTag::resolve::<u8>().unwrap(), TypeTag::UInt8);
        assert_eq!(TypeTag::of::<i16>(), TypeTag::Int16);
        assert!(TypeTag::is_supported::<u32>());
    }

    #[test]
    fn test_resolve_unsupported() {
        let err = TypeTag::resolve::<bool>().unwrap_err();
        assert_eq!(err, FfiError::UnsupportedType("bool".to_string()));
        assert!(!TypeTag::is_supported::<String>());
        assert!(!TypeTag::is_supported::<str>());
        assert!(!TypeTag::is_supported::<usize>());
        assert!(!TypeTag::is_supported::<(f32, f32)>());
    }

    #[test]
    fn test_signedness() {
        assert!(TypeTag::Float32.is_signed());
        assert!(TypeTag::Int8.is_signed());
        assert!(!TypeTag::UInt32.is_signed());
        assert!(TypeTag::Float64.is_float());
        assert!(!TypeTag::Int64.is_float());
    }

    #[test]
    fn test_expect() {
        assert!(TypeTag::Float32.expect(TypeTag::Float32).is_ok());
        assert_eq!(
            TypeTag::Float32.expect(TypeTag::Float64),
            Err(FfiError::TagMismatch {
                expected: TypeTag::Float32,
                actual: TypeTag::Float64,
            })
        );
    }
}
