//! Zero-copy views over engine result buffers.
//!
//! The engine hands back bare pointers. Their lengths come from a separate
//! query on the same object ("how many features", "how many keypoints").
//! [`foreign_slice`] is the only place in the workspace that turns such a
//! pair into a Rust slice; everything else goes through it.
//!
//! ## Lifetime Discipline
//!
//! Bindings return views borrowed from the handle that produced them:
//!
//! ```rust,ignore
//! pub fn features(&self) -> ArrayView<'_, VlCovDetFeature> {
//!     let count = self.num_features();
//!     unsafe { read_records(features_ptr, count) }
//! }
//! ```
//!
//! Every mutating binding call takes `&mut self`, so the borrow checker
//! rejects any call that could invalidate the buffer while a view is alive.

use crate::{is_aligned, marshal, Element, TypeTag};
use std::ffi::c_void;
use std::ops::Deref;

/// Reinterpret an engine pointer and element count as a slice.
///
/// A count of zero returns an empty slice without looking at `ptr`.
///
/// # Safety
///
/// When `count > 0`, `ptr` must address `count` initialized values of `T`
/// that remain valid and unmodified for `'a`.
///
/// # Panics
///
/// Panics if `count > 0` and `ptr` is null or misaligned.
pub(crate) unsafe fn foreign_slice<'a, T>(ptr: *const T, count: usize) -> &'a [T] {
    if count == 0 {
        return &[];
    }
    assert!(
        !ptr.is_null(),
        "engine returned a null buffer for {count} elements"
    );
    assert!(is_aligned(ptr), "engine buffer {ptr:p} is misaligned");
    // SAFETY: non-null and aligned (checked above); extent and lifetime are
    // the caller's contract.
    unsafe { std::slice::from_raw_parts(ptr, count) }
}

/// One field of a record layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name in the engine's struct.
    pub name: &'static str,
    /// Element layout of the field.
    pub tag: TypeTag,
}

impl Field {
    /// Create a field descriptor.
    #[must_use]
    pub const fn new(name: &'static str, tag: TypeTag) -> Self {
        Self { name, tag }
    }
}

/// Field order and widths of an engine struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    /// Engine struct name.
    pub name: &'static str,
    /// Fields in memory order.
    pub fields: &'static [Field],
}

impl RecordLayout {
    /// Sum of the field widths, excluding any padding.
    #[must_use]
    pub const fn packed_size(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < self.fields.len() {
            total += self.fields[i].tag.size_of();
            i += 1;
        }
        total
    }

    /// Field names in memory order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.name)
    }
}

/// A `#[repr(C)]` struct mirroring an engine record.
///
/// # Safety
///
/// The implementor must be `#[repr(C)]` with fields in exactly the order
/// and widths given by `LAYOUT`, and every bit pattern the engine may
/// write must be a valid value.
pub unsafe trait ForeignRecord: Copy + 'static {
    /// The engine struct this type mirrors.
    const LAYOUT: RecordLayout;
}

/// A borrowed, read-only sequence of engine values.
///
/// Derefs to `[T]`; the lifetime ties it to the handle it came from.
#[derive(Clone, Copy, Debug)]
pub struct ArrayView<'a, T> {
    items: &'a [T],
}

impl<'a, T> ArrayView<'a, T> {
    /// A view over nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self { items: &[] }
    }

    /// View `count` values starting at `ptr`.
    ///
    /// # Safety
    ///
    /// See [`read_records`].
    #[must_use]
    pub unsafe fn from_raw_parts(ptr: *const T, count: usize) -> Self {
        // SAFETY: forwarded to the caller.
        Self {
            items: unsafe { foreign_slice(ptr, count) },
        }
    }

    /// Number of values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the view is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The values as a slice with the view's lifetime.
    #[inline]
    #[must_use]
    pub const fn as_slice(&self) -> &'a [T] {
        self.items
    }
}

impl<T: Copy> ArrayView<'_, T> {
    /// Map every value into an owned host type.
    #[must_use]
    pub fn decode<H: From<T>>(&self) -> Vec<H> {
        self.items.iter().copied().map(H::from).collect()
    }
}

impl<T: Element> ArrayView<'_, T> {
    /// Convert every value to host element type `U`.
    #[must_use]
    pub fn convert<U: Element>(&self) -> Vec<U> {
        self.items.iter().map(|&value| value.cast::<U>()).collect()
    }
}

impl<T> Default for ArrayView<'_, T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Deref for ArrayView<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.items
    }
}

impl<'a, T> IntoIterator for ArrayView<'a, T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Read `count` primitive values of layout `tag` into host type `T`.
///
/// # Safety
///
/// Same contract as [`marshal::from_foreign`].
#[must_use]
pub unsafe fn read_primitive<T: Element>(ptr: *const c_void, count: usize, tag: TypeTag) -> Vec<T> {
    // SAFETY: forwarded to the caller.
    unsafe { marshal::from_foreign(ptr, count, tag) }
}

/// View `count` records of type `R` starting at `ptr`.
///
/// `count` must come from a query on the same engine object, issued after
/// the call that produced the records. A count of zero never dereferences
/// `ptr`.
///
/// # Safety
///
/// When `count > 0`, `ptr` must address `count` initialized records that
/// stay valid and unmodified for `'a`.
#[must_use]
pub unsafe fn read_records<'a, R: ForeignRecord>(ptr: *const R, count: usize) -> ArrayView<'a, R> {
    debug_assert!(
        std::mem::size_of::<R>() >= R::LAYOUT.packed_size(),
        "{} is smaller than its layout",
        R::LAYOUT.name
    );
    tracing::trace!(record = R::LAYOUT.name, count, "viewing engine records");
    // SAFETY: forwarded to the caller.
    unsafe { ArrayView::from_raw_parts(ptr, count) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Pair {
        score: f64,
        index: u32,
        level: i32,
    }

    unsafe impl ForeignRecord for Pair {
        const LAYOUT: RecordLayout = RecordLayout {
            name: "Pair",
            fields: &[
                Field::new("score", TypeTag::Float64),
                Field::new("index", TypeTag::UInt32),
                Field::new("level", TypeTag::Int32),
            ],
        };
    }

    struct Scored(f64);

    impl From<Pair> for Scored {
        fn from(pair: Pair) -> Self {
            Self(pair.score)
        }
    }

    #[test]
    fn test_layout_size_matches_repr_c() {
        assert_eq!(Pair::LAYOUT.packed_size(), 16);
        assert_eq!(std::mem::size_of::<Pair>(), Pair::LAYOUT.packed_size());
        assert_eq!(
            Pair::LAYOUT.field_names().collect::<Vec<_>>(),
            ["score", "index", "level"]
        );
    }

    #[test]
    fn test_read_records_zero_count_never_dereferences() {
        let view = unsafe { read_records::<Pair>(std::ptr::null(), 0) };
        assert!(view.is_empty());

        let dangling = std::ptr::NonNull::<Pair>::dangling().as_ptr();
        let view = unsafe { read_records::<Pair>(dangling, 0) };
        assert_eq!(view.len(), 0);
    }

    #[test]
    fn test_read_records_single() {
        let records = [Pair {
            score: 0.5,
            index: 7,
            level: -1,
        }];
        let view = unsafe { read_records(records.as_ptr(), 1) };
        assert_eq!(view.len(), 1);
        assert_eq!(view[0], records[0]);
    }

    #[test]
    fn test_read_records_many() {
        let records: Vec<Pair> = (0..64)
            .map(|i| Pair {
                score: f64::from(i) * 0.25,
                index: i,
                level: -(i as i32),
            })
            .collect();
        let view = unsafe { read_records(records.as_ptr(), records.len()) };
        assert_eq!(view.as_slice(), records.as_slice());
        assert_eq!(view.iter().map(|p| p.index).sum::<u32>(), (0..64).sum());

        let decoded: Vec<Scored> = view.decode();
        assert_eq!(decoded[63].0, 15.75);
    }

    #[test]
    fn test_read_records_prefix_only() {
        let records = [
            Pair {
                score: 1.0,
                index: 1,
                level: 1,
            },
            Pair {
                score: 2.0,
                index: 2,
                level: 2,
            },
        ];
        let view = unsafe { read_records(records.as_ptr(), 1) };
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].index, 1);
    }

    #[test]
    #[should_panic(expected = "null buffer")]
    fn test_null_with_count_panics() {
        let _ = unsafe { read_records::<Pair>(std::ptr::null(), 3) };
    }

    #[test]
    fn test_primitive_view_convert() {
        let values = [1i16, -2, 3];
        let view = unsafe { ArrayView::from_raw_parts(values.as_ptr(), values.len()) };
        assert_eq!(view.convert::<f32>(), vec![1.0, -2.0, 3.0]);

        let read: Vec<i64> =
            unsafe { read_primitive(values.as_ptr().cast(), values.len(), TypeTag::Int16) };
        assert_eq!(read, vec![1, -2, 3]);
    }

    #[test]
    fn test_empty_view_default() {
        let view: ArrayView<'_, u32> = ArrayView::default();
        assert!(view.is_empty());
        assert_eq!(view.into_iter().count(), 0);
    }
}
