//! Property tests for vl-ffi
//!
//! These tests verify the marshalling laws: host data pushed into an engine
//! layout and read back is reproduced exactly when the layout can hold it,
//! and within the layout's precision otherwise.

use proptest::prelude::*;
use vl_ffi::{from_foreign, read_records, to_foreign, Element, ForeignBuffer, TypeTag};

fn round_trip<S: Element>(host: &[S], tag: TypeTag) -> Vec<S> {
    let buffer = to_foreign(host, tag);
    assert_eq!(buffer.tag(), tag);
    assert_eq!(buffer.size_bytes(), host.len() * tag.size_of());
    unsafe { from_foreign(buffer.as_ptr(), buffer.len(), tag) }
}

// ============================================================
// Exact round trips
// ============================================================

proptest! {
    #[test]
    fn f64_exact_through_double(host in prop::collection::vec(-1e300f64..1e300, 0..64)) {
        prop_assert_eq!(round_trip(&host, TypeTag::Float64), host);
    }

    #[test]
    fn f32_exact_through_float_and_double(host in prop::collection::vec(any::<f32>().prop_filter("finite", |v| v.is_finite()), 0..64)) {
        prop_assert_eq!(round_trip(&host, TypeTag::Float32), host.clone());
        prop_assert_eq!(round_trip(&host, TypeTag::Float64), host);
    }

    #[test]
    fn i32_exact_through_wider_tags(host in prop::collection::vec(any::<i32>(), 0..64)) {
        prop_assert_eq!(round_trip(&host, TypeTag::Int32), host.clone());
        prop_assert_eq!(round_trip(&host, TypeTag::Int64), host.clone());
        prop_assert_eq!(round_trip(&host, TypeTag::Float64), host);
    }

    #[test]
    fn u8_exact_through_every_tag(host in prop::collection::vec(any::<u8>(), 0..64)) {
        for tag in TypeTag::ALL.into_iter().filter(|t| *t != TypeTag::Int8) {
            prop_assert_eq!(round_trip(&host, tag), host.clone(), "tag {}", tag);
        }
    }

    #[test]
    fn u64_exact_through_uint64(host in prop::collection::vec(any::<u64>(), 0..64)) {
        prop_assert_eq!(round_trip(&host, TypeTag::UInt64), host);
    }
}

// ============================================================
// Narrowing round trips
// ============================================================

proptest! {
    #[test]
    fn f64_through_float_has_bounded_error(host in prop::collection::vec(-1e30f64..1e30, 0..64)) {
        let back = round_trip(&host, TypeTag::Float32);
        prop_assert_eq!(back.len(), host.len());
        for (orig, got) in host.iter().zip(&back) {
            let tolerance = (orig.abs() * f64::from(f32::EPSILON)).max(f64::from(f32::MIN_POSITIVE));
            prop_assert!((orig - got).abs() <= tolerance, "{} vs {}", orig, got);
        }
    }

    #[test]
    fn integers_narrow_by_truncation(host in prop::collection::vec(any::<i64>(), 0..64)) {
        let back = round_trip(&host, TypeTag::UInt16);
        for (orig, got) in host.iter().zip(&back) {
            prop_assert_eq!(*got, i64::from(*orig as u16));
        }
    }

    #[test]
    fn floats_narrow_to_integers_toward_zero(host in prop::collection::vec(-1000.0f64..1000.0, 0..64)) {
        let back = round_trip(&host, TypeTag::Int16);
        for (orig, got) in host.iter().zip(&back) {
            prop_assert_eq!(*got, orig.trunc());
        }
    }

    #[test]
    fn length_is_preserved_for_every_tag(len in 0usize..256) {
        let host = vec![1.0f32; len];
        for tag in TypeTag::ALL {
            let buffer = to_foreign(&host, tag);
            prop_assert_eq!(buffer.len(), len);
        }
    }
}

// ============================================================
// Boundary counts
// ============================================================

#[test]
fn test_zero_count_read_never_dereferences() {
    for tag in TypeTag::ALL {
        let read: Vec<f64> = unsafe { from_foreign(std::ptr::null(), 0, tag) };
        assert!(read.is_empty(), "tag {tag}");
    }
}

#[test]
fn test_partial_read_stops_at_count() {
    let buffer = ForeignBuffer::from(vec![10u32, 20, 30, 40]);
    let read: Vec<u32> = unsafe { from_foreign(buffer.as_ptr(), 1, TypeTag::UInt32) };
    assert_eq!(read, vec![10]);
    let read: Vec<u32> = unsafe { from_foreign(buffer.as_ptr(), 4, TypeTag::UInt32) };
    assert_eq!(read, vec![10, 20, 30, 40]);
}

#[test]
fn test_zero_count_records_with_dangling_pointer() {
    #[derive(Clone, Copy)]
    #[repr(C)]
    struct Frame {
        x: f32,
        y: f32,
    }

    unsafe impl vl_ffi::ForeignRecord for Frame {
        const LAYOUT: vl_ffi::RecordLayout = vl_ffi::RecordLayout {
            name: "Frame",
            fields: &[
                vl_ffi::Field::new("x", TypeTag::Float32),
                vl_ffi::Field::new("y", TypeTag::Float32),
            ],
        };
    }

    let view = unsafe { read_records::<Frame>(std::ptr::NonNull::dangling().as_ptr(), 0) };
    assert!(view.is_empty());
}
