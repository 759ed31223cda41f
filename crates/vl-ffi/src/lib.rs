//! # VLFeat FFI Primitives
//!
//! This crate provides the boundary layer between Rust and the VLFeat
//! engine: the pieces every algorithm binding is built from.
//!
//! ## Overview
//!
//! Key components:
//!
//! - **TypeTag**: the closed set of element kinds the engine understands,
//!   with the engine's own integer identifiers and widths.
//! - **Numeric marshalling**: one generic conversion path that turns a host
//!   slice of any supported numeric type into a buffer of the width a tag
//!   selects, and back.
//! - **ForeignHandle**: an owning wrapper around one engine object. The
//!   destructor runs exactly once, on scope exit or on `release`.
//! - **ArrayView**: a borrowed, zero-copy view over an engine result
//!   buffer, reconstructed from a pointer and a count in a single audited
//!   place.
//!
//! ## Boundary Model
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         Rust caller                            │
//! ├────────────────────────────────────────────────────────────────┤
//! │  &[S: Element] ──(to_foreign, tag)──> ForeignBuffer            │
//! │                                          │ (lives for one call) │
//! ├──────────────────────────────────────────┼─────────────────────┤
//! │                    FFI Boundary          │                     │
//! ├──────────────────────────────────────────┼─────────────────────┤
//! │  ForeignHandle<R> ──(as_mut_ptr)──> engine entry point         │
//! │                                          │                     │
//! │  engine result (ptr, count) ─────────────▼                     │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ArrayView<'handle, T> / read_primitive ──> host values        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vl_ffi::{marshal, TypeTag};
//!
//! // Narrow host doubles to the engine's float layout for one call
//! let buffer = marshal::to_foreign(&points, TypeTag::Float32);
//! unsafe { (api.vl_kmeans_cluster)(handle.as_mut_ptr(), buffer.as_ptr(), dim, n, k) };
//!
//! // Borrow the engine's records without copying
//! let view = unsafe { view::read_records(features_ptr, count) };
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Bind a type alias to the Rust element type a [`TypeTag`] selects and
/// evaluate `$body` with it.
///
/// This is the witness that lets one generic routine serve every width.
macro_rules! with_element {
    ($tag:expr, $t:ident => $body:expr) => {
        match $tag {
            $crate::TypeTag::Float32 => {
                type $t = f32;
                $body
            }
            $crate::TypeTag::Float64 => {
                type $t = f64;
                $body
            }
            $crate::TypeTag::Int8 => {
                type $t = i8;
                $body
            }
            $crate::TypeTag::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::TypeTag::Int16 => {
                type $t = i16;
                $body
            }
            $crate::TypeTag::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::TypeTag::Int32 => {
                type $t = i32;
                $body
            }
            $crate::TypeTag::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::TypeTag::Int64 => {
                type $t = i64;
                $body
            }
            $crate::TypeTag::UInt64 => {
                type $t = u64;
                $body
            }
        }
    };
}

pub mod handle;
pub mod marshal;
pub mod tag;
pub mod view;

pub use handle::{ForeignHandle, ForeignResource, HandleConfig};
pub use marshal::{from_foreign, to_foreign, to_foreign_any, ForeignBuffer};
pub use tag::TypeTag;
pub use view::{read_primitive, read_records, ArrayView, Field, ForeignRecord, RecordLayout};

use thiserror::Error;

/// Errors that can occur at the engine boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FfiError {
    /// A host element type has no engine counterpart.
    #[error("unsupported element type: {0}")]
    UnsupportedType(String),

    /// The host value is not a homogeneous sequence of numeric elements.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// An engine constructor returned null, or the engine ran out of memory.
    #[error("engine allocation failed: {0}")]
    AllocationFailed(String),

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid {resource} state: {reason}")]
    InvalidHandleState {
        /// Kind of engine object.
        resource: &'static str,
        /// What was missing.
        reason: String,
    },

    /// Size mismatch between expected and actual.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Expected number of elements.
        expected: usize,
        /// Actual number of elements.
        actual: usize,
    },

    /// A buffer was tagged differently from the object it is passed to.
    #[error("type tag mismatch: expected {expected}, got {actual}")]
    TagMismatch {
        /// Tag the engine object is configured for.
        expected: TypeTag,
        /// Tag of the buffer.
        actual: TypeTag,
    },

    /// An engine entry point reported a failure status.
    #[error("{operation} failed with engine status {code}")]
    Engine {
        /// Entry point that failed.
        operation: &'static str,
        /// Raw engine status code.
        code: i32,
    },

    /// The engine library or one of its entry points is missing.
    #[error("engine library unavailable: {0}")]
    LibraryUnavailable(String),
}

/// Result type for boundary operations.
pub type FfiResult<T> = Result<T, FfiError>;

/// Check if a pointer is properly aligned for a type.
#[inline]
#[must_use]
pub fn is_aligned<T>(ptr: *const T) -> bool {
    (ptr as usize) % std::mem::align_of::<T>() == 0
}

mod private {
    pub trait Sealed {}
}

/// A host numeric type with a fixed-width engine counterpart.
///
/// Implemented for exactly the ten primitive types listed by [`TypeTag`];
/// the trait is sealed so the set stays closed.
///
/// Conversions between elements follow Rust `as` semantics: integers
/// truncate (wrap) when narrowing, floats convert to integers by
/// truncation toward zero with saturation, `f64` narrows to `f32` by
/// rounding to nearest, and integers convert to floats by rounding to
/// nearest.
///
/// # Safety
///
/// Implementors must have the exact size and alignment of the C type
/// named by `C_TYPE_NAME`, no padding and no invalid bit patterns.
pub unsafe trait Element:
    Copy + Default + PartialOrd + std::fmt::Debug + Send + Sync + 'static + private::Sealed
{
    /// The engine tag of this type.
    const TAG: TypeTag;

    /// The C-equivalent type name (for documentation).
    const C_TYPE_NAME: &'static str;

    #[doc(hidden)]
    fn from_f32(value: f32) -> Self;
    #[doc(hidden)]
    fn from_f64(value: f64) -> Self;
    #[doc(hidden)]
    fn from_i8(value: i8) -> Self;
    #[doc(hidden)]
    fn from_u8(value: u8) -> Self;
    #[doc(hidden)]
    fn from_i16(value: i16) -> Self;
    #[doc(hidden)]
    fn from_u16(value: u16) -> Self;
    #[doc(hidden)]
    fn from_i32(value: i32) -> Self;
    #[doc(hidden)]
    fn from_u32(value: u32) -> Self;
    #[doc(hidden)]
    fn from_i64(value: i64) -> Self;
    #[doc(hidden)]
    fn from_u64(value: u64) -> Self;

    /// Convert to another element type with `as` semantics.
    fn cast<T: Element>(self) -> T;

    /// Wrap a vector of this type into the matching buffer variant.
    fn into_buffer(values: Vec<Self>) -> ForeignBuffer;

    /// Borrow the contents of `buffer` if it holds this type.
    fn peek(buffer: &ForeignBuffer) -> Option<&[Self]>;
}

macro_rules! impl_element {
    (@from $ty:ident; $( $method:ident: $src:ty ),*) => {
        $(
            #[inline]
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_possible_wrap,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss,
                clippy::cast_lossless,
                clippy::unnecessary_cast
            )]
            fn $method(value: $src) -> Self {
                value as $ty
            }
        )*
    };
    ($( $ty:ident => $tag:ident, $c_name:literal, $variant:ident, $from:ident; )*) => {
        $(
            impl private::Sealed for $ty {}

            unsafe impl Element for $ty {
                const TAG: TypeTag = TypeTag::$tag;
                const C_TYPE_NAME: &'static str = $c_name;

                impl_element!(@from $ty;
                    from_f32: f32, from_f64: f64,
                    from_i8: i8, from_u8: u8,
                    from_i16: i16, from_u16: u16,
                    from_i32: i32, from_u32: u32,
                    from_i64: i64, from_u64: u64);

                #[inline]
                fn cast<T: Element>(self) -> T {
                    T::$from(self)
                }

                #[inline]
                fn into_buffer(values: Vec<Self>) -> ForeignBuffer {
                    ForeignBuffer::$variant(values)
                }

                #[inline]
                fn peek(buffer: &ForeignBuffer) -> Option<&[Self]> {
                    match buffer {
                        ForeignBuffer::$variant(values) => Some(values),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element! {
    f32 => Float32, "float", F32, from_f32;
    f64 => Float64, "double", F64, from_f64;
    i8 => Int8, "vl_int8", I8, from_i8;
    u8 => UInt8, "vl_uint8", U8, from_u8;
    i16 => Int16, "vl_int16", I16, from_i16;
    u16 => UInt16, "vl_uint16", U16, from_u16;
    i32 => Int32, "vl_int32", I32, from_i32;
    u32 => UInt32, "vl_uint32", U32, from_u32;
    i64 => Int64, "vl_int64", I64, from_i64;
    u64 => UInt64, "vl_uint64", U64, from_u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_check() {
        let aligned: [f64; 4] = [1.0, 2.0, 3.0, 4.0];
        assert!(is_aligned(aligned.as_ptr()));
    }

    #[test]
    fn test_element_type_names() {
        assert_eq!(f32::C_TYPE_NAME, "float");
        assert_eq!(f64::C_TYPE_NAME, "double");
        assert_eq!(i32::C_TYPE_NAME, "vl_int32");
        assert_eq!(u64::C_TYPE_NAME, "vl_uint64");
    }

    #[test]
    fn test_element_sizes_match_tags() {
        fn check<T: Element>() {
            assert_eq!(std::mem::size_of::<T>(), T::TAG.size_of(), "{}", T::C_TYPE_NAME);
        }
        check::<f32>();
        check::<f64>();
        check::<i8>();
        check::<u8>();
        check::<i16>();
        check::<u16>();
        check::<i32>();
        check::<u32>();
        check::<i64>();
        check::<u64>();
    }

    #[test]
    fn test_cast_follows_as_semantics() {
        assert_eq!(300i32.cast::<u8>(), 44);
        assert_eq!((-1i16).cast::<u16>(), u16::MAX);
        assert_eq!(2.9f64.cast::<i32>(), 2);
        assert_eq!((-2.9f32).cast::<i8>(), -2);
        assert_eq!(1e10f64.cast::<i16>(), i16::MAX);
        assert_eq!(f64::NAN.cast::<u32>(), 0);
        assert_eq!(0.1f64.cast::<f32>(), 0.1f32);
        assert_eq!(u64::MAX.cast::<f64>(), 2f64.powi(64));
    }

    #[test]
    fn test_error_messages() {
        let err = FfiError::InvalidHandleState {
            resource: "kmeans",
            reason: "no centers".to_string(),
        };
        assert_eq!(err.to_string(), "invalid kmeans state: no centers");

        let err = FfiError::TagMismatch {
            expected: TypeTag::Float64,
            actual: TypeTag::Float32,
        };
        assert_eq!(err.to_string(), "type tag mismatch: expected double, got float");
    }
}
