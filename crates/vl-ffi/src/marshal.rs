//! Numeric marshalling between host slices and engine layouts.
//!
//! Every conversion goes through one generic routine, `convert::<S, T>`,
//! where `T` is the element type selected by a [`TypeTag`]. The public
//! surface is tag-directed and never duplicated per width.
//!
//! ## Buffer Lifetime
//!
//! A [`ForeignBuffer`] is produced immediately before one engine call and
//! dropped immediately after it:
//!
//! ```rust,ignore
//! let data = to_foreign(points, self.data_type());
//! unsafe { (api.vl_kmeans_cluster)(raw, data.as_ptr(), dim, n, k) };
//! // `data` goes out of scope here
//! ```

use crate::view::foreign_slice;
use crate::{Element, FfiError, FfiResult, TypeTag};
use std::any::Any;
use std::ffi::c_void;

/// An owned buffer laid out the way the engine expects for one tag.
///
/// The variant is the tag, so a buffer can never disagree with the layout
/// of its contents.
#[derive(Clone, Debug, PartialEq)]
pub enum ForeignBuffer {
    /// `float` elements.
    F32(Vec<f32>),
    /// `double` elements.
    F64(Vec<f64>),
    /// `vl_int8` elements.
    I8(Vec<i8>),
    /// `vl_uint8` elements.
    U8(Vec<u8>),
    /// `vl_int16` elements.
    I16(Vec<i16>),
    /// `vl_uint16` elements.
    U16(Vec<u16>),
    /// `vl_int32` elements.
    I32(Vec<i32>),
    /// `vl_uint32` elements.
    U32(Vec<u32>),
    /// `vl_int64` elements.
    I64(Vec<i64>),
    /// `vl_uint64` elements.
    U64(Vec<u64>),
}

macro_rules! each_variant {
    ($buffer:expr, $values:ident => $body:expr) => {
        match $buffer {
            ForeignBuffer::F32($values) => $body,
            ForeignBuffer::F64($values) => $body,
            ForeignBuffer::I8($values) => $body,
            ForeignBuffer::U8($values) => $body,
            ForeignBuffer::I16($values) => $body,
            ForeignBuffer::U16($values) => $body,
            ForeignBuffer::I32($values) => $body,
            ForeignBuffer::U32($values) => $body,
            ForeignBuffer::I64($values) => $body,
            ForeignBuffer::U64($values) => $body,
        }
    };
}

impl ForeignBuffer {
    /// A zero-filled buffer of `len` elements, for the engine to write into.
    #[must_use]
    pub fn zeroed(tag: TypeTag, len: usize) -> Self {
        with_element!(tag, T => T::into_buffer(vec![T::default(); len]))
    }

    /// Copy `count` elements of layout `tag` out of engine memory.
    ///
    /// # Safety
    ///
    /// `ptr` must address at least `count * tag.size_of()` readable bytes,
    /// aligned for the tag's element type. It may be dangling when
    /// `count` is zero.
    #[must_use]
    pub unsafe fn copy_from_raw(ptr: *const c_void, count: usize, tag: TypeTag) -> Self {
        // SAFETY: forwarded to the caller.
        with_element!(tag, T => T::into_buffer(unsafe { foreign_slice(ptr.cast::<T>(), count) }.to_vec()))
    }

    /// The layout of this buffer.
    #[must_use]
    pub const fn tag(&self) -> TypeTag {
        match self {
            Self::F32(_) => TypeTag::Float32,
            Self::F64(_) => TypeTag::Float64,
            Self::I8(_) => TypeTag::Int8,
            Self::U8(_) => TypeTag::UInt8,
            Self::I16(_) => TypeTag::Int16,
            Self::U16(_) => TypeTag::UInt16,
            Self::I32(_) => TypeTag::Int32,
            Self::U32(_) => TypeTag::UInt32,
            Self::I64(_) => TypeTag::Int64,
            Self::U64(_) => TypeTag::UInt64,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        each_variant!(self, values => values.len())
    }

    /// Whether the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the contents in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.len() * self.tag().size_of()
    }

    /// Pointer to the first element, for passing to the engine.
    ///
    /// Never null; dangling but aligned when the buffer is empty.
    #[must_use]
    pub fn as_ptr(&self) -> *const c_void {
        each_variant!(self, values => values.as_ptr().cast())
    }

    /// Mutable pointer to the first element, for engine output.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        each_variant!(self, values => values.as_mut_ptr().cast())
    }

    /// Borrow the contents if they are of type `T`.
    #[must_use]
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::peek(self)
    }

    /// Convert the contents to host type `T`.
    #[must_use]
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        each_variant!(self, values => convert(values))
    }

    /// Fail unless this buffer has layout `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::TagMismatch`] when the layouts differ.
    pub fn expect_tag(&self, tag: TypeTag) -> FfiResult<()> {
        tag.expect(self.tag())
    }
}

impl<T: Element> From<Vec<T>> for ForeignBuffer {
    fn from(values: Vec<T>) -> Self {
        T::into_buffer(values)
    }
}

/// Convert every element of `host` to `T`.
fn convert<S: Element, T: Element>(host: &[S]) -> Vec<T> {
    host.iter().map(|&value| value.cast::<T>()).collect()
}

/// Marshal a host slice into the layout selected by `tag`.
///
/// Elements are converted with `as` semantics (see [`Element`]). The
/// result owns a fresh allocation of `host.len() * tag.size_of()` bytes.
#[must_use]
pub fn to_foreign<S: Element>(host: &[S], tag: TypeTag) -> ForeignBuffer {
    tracing::trace!(
        from = S::TAG.name(),
        to = tag.name(),
        len = host.len(),
        "marshalling host slice"
    );
    with_element!(tag, T => T::into_buffer(convert::<S, T>(host)))
}

/// Marshal a dynamically typed host value into the layout selected by `tag`.
///
/// Accepts a `Vec<T>`, `Box<[T]>` or `ForeignBuffer` of any supported
/// element type.
///
/// # Errors
///
/// Returns [`FfiError::UnsupportedInput`] if `host` is not one of those
/// homogeneous numeric containers.
pub fn to_foreign_any(host: &dyn Any, tag: TypeTag) -> FfiResult<ForeignBuffer> {
    macro_rules! try_containers {
        ($($ty:ty),*) => {
            $(
                if let Some(values) = host.downcast_ref::<Vec<$ty>>() {
                    return Ok(to_foreign(values, tag));
                }
                if let Some(values) = host.downcast_ref::<Box<[$ty]>>() {
                    return Ok(to_foreign(values, tag));
                }
            )*
        };
    }

    try_containers!(f32, f64, i8, u8, i16, u16, i32, u32, i64, u64);

    if let Some(buffer) = host.downcast_ref::<ForeignBuffer>() {
        return Ok(each_variant!(buffer, values => to_foreign(values, tag)));
    }

    Err(FfiError::UnsupportedInput(
        "expected a homogeneous container of a supported numeric type".to_string(),
    ))
}

/// Reconstruct `count` host values from engine memory of layout `tag`.
///
/// # Safety
///
/// `ptr` must address at least `count * tag.size_of()` readable bytes,
/// aligned for the tag's element type and valid for the duration of the
/// call. It may be dangling when `count` is zero.
#[must_use]
pub unsafe fn from_foreign<T: Element>(ptr: *const c_void, count: usize, tag: TypeTag) -> Vec<T> {
    tracing::trace!(from = tag.name(), to = T::TAG.name(), count, "reading engine buffer");
    // SAFETY: forwarded to the caller.
    with_element!(tag, S => convert::<S, T>(unsafe { foreign_slice(ptr.cast::<S>(), count) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_foreign_widens() {
        let buffer = to_foreign(&[1u8, 2, 255], TypeTag::Float64);
        assert_eq!(buffer, ForeignBuffer::F64(vec![1.0, 2.0, 255.0]));
        assert_eq!(buffer.size_bytes(), 24);
    }

    #[test]
    fn test_to_foreign_narrows() {
        let buffer = to_foreign(&[1.9f64, -1.9, 300.0, -300.0], TypeTag::Int8);
        assert_eq!(buffer, ForeignBuffer::I8(vec![1, -1, 127, -128]));

        let buffer = to_foreign(&[258i32, -1], TypeTag::UInt8);
        assert_eq!(buffer, ForeignBuffer::U8(vec![2, 255]));
    }

    #[test]
    fn test_to_foreign_empty() {
        let buffer = to_foreign::<f32>(&[], TypeTag::UInt32);
        assert!(buffer.is_empty());
        assert_eq!(buffer.tag(), TypeTag::UInt32);
        assert!(!buffer.as_ptr().is_null());
    }

    #[test]
    fn test_zeroed() {
        let buffer = ForeignBuffer::zeroed(TypeTag::Int16, 4);
        assert_eq!(buffer, ForeignBuffer::I16(vec![0; 4]));
        assert_eq!(buffer.size_bytes(), 8);
    }

    #[test]
    fn test_from_foreign_reads_each_width() {
        let source = [1.5f32, -2.25, 4.0];
        let read: Vec<f64> =
            unsafe { from_foreign(source.as_ptr().cast(), source.len(), TypeTag::Float32) };
        assert_eq!(read, vec![1.5, -2.25, 4.0]);

        let source = [7u16, 65_535];
        let read: Vec<i32> =
            unsafe { from_foreign(source.as_ptr().cast(), source.len(), TypeTag::UInt16) };
        assert_eq!(read, vec![7, 65_535]);
    }

    #[test]
    fn test_from_foreign_zero_count_ignores_pointer() {
        let read: Vec<f32> = unsafe { from_foreign(std::ptr::null(), 0, TypeTag::Float64) };
        assert!(read.is_empty());
    }

    #[test]
    fn test_copy_from_raw() {
        let source = [3i64, -4];
        let buffer =
            unsafe { ForeignBuffer::copy_from_raw(source.as_ptr().cast(), 2, TypeTag::Int64) };
        assert_eq!(buffer, ForeignBuffer::I64(vec![3, -4]));
    }

    #[test]
    fn test_to_foreign_any_accepts_numeric_containers() {
        let host: Vec<i32> = vec![1, 2, 3];
        let buffer = to_foreign_any(&host, TypeTag::Float32).unwrap();
        assert_eq!(buffer, ForeignBuffer::F32(vec![1.0, 2.0, 3.0]));

        let boxed: Box<[u64]> = vec![9u64].into_boxed_slice();
        let buffer = to_foreign_any(&boxed, TypeTag::UInt8).unwrap();
        assert_eq!(buffer, ForeignBuffer::U8(vec![9]));

        let existing = ForeignBuffer::F64(vec![0.5]);
        let buffer = to_foreign_any(&existing, TypeTag::Float32).unwrap();
        assert_eq!(buffer, ForeignBuffer::F32(vec![0.5]));
    }

    #[test]
    fn test_to_foreign_any_rejects_non_numeric() {
        let inputs: [Box<dyn Any>; 4] = [
            Box::new(vec![true, false]),
            Box::new(vec!["a".to_string()]),
            Box::new(vec![(1.0f32, 2.0f32)]),
            Box::new(3.0f64),
        ];
        for input in &inputs {
            assert!(matches!(
                to_foreign_any(input.as_ref(), TypeTag::Float64),
                Err(FfiError::UnsupportedInput(_))
            ));
        }
    }

    #[test]
    fn test_as_slice_and_expect_tag() {
        let buffer = ForeignBuffer::from(vec![1u32, 2]);
        assert_eq!(buffer.as_slice::<u32>(), Some(&[1u32, 2][..]));
        assert_eq!(buffer.as_slice::<i32>(), None);
        assert!(buffer.expect_tag(TypeTag::UInt32).is_ok());
        assert!(matches!(
            buffer.expect_tag(TypeTag::Int32),
            Err(FfiError::TagMismatch { .. })
        ));
    }

    #[test]
    fn test_to_vec_converts() {
        let buffer = ForeignBuffer::F32(vec![1.0, 2.5]);
        assert_eq!(buffer.to_vec::<f64>(), vec![1.0, 2.5]);
        assert_eq!(buffer.to_vec::<u8>(), vec![1, 2]);
    }
}
