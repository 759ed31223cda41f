//! In-process mock engine.
//!
//! The mock implements every bound entry point as an `extern "C"` Rust
//! function with simple, deterministic behaviour: clustering picks the
//! first points as centers, detectors report one feature per bright
//! pixel, and so on. It exists so the real ownership, marshalling and
//! read-back paths can be exercised without VLFeat installed.
//!
//! Every object the mock hands out is tracked per thread. Destroying an
//! unknown pointer, or touching an object after it was destroyed, panics,
//! so a double free or use-after-release in the bindings aborts the test
//! that triggered it.

pub(crate) mod aib;
pub(crate) mod covdet;
pub(crate) mod dsift;
pub(crate) mod encode;
pub(crate) mod gmm;
pub(crate) mod hikmeans;
pub(crate) mod hog;
pub(crate) mod ikmeans;
pub(crate) mod kdtree;
pub(crate) mod kmeans;
pub(crate) mod lbp;
pub(crate) mod liop;
pub(crate) mod mser;
pub(crate) mod quickshift;
pub(crate) mod scalespace;
pub(crate) mod sift;
pub(crate) mod slic;

use crate::engine::{Engine, EngineConfig, EngineSource};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::ffi::c_void;
use std::sync::OnceLock;
use vl_ffi::{from_foreign, ArrayView, ForeignBuffer, TypeTag};

thread_local! {
    static LIVE: RefCell<FxHashMap<usize, &'static str>> = RefCell::new(FxHashMap::default());
}

static MOCK_ENGINE: OnceLock<Engine> = OnceLock::new();

/// The mock engine.
pub(crate) fn engine() -> &'static Engine {
    MOCK_ENGINE.get_or_init(|| Engine {
        source: EngineSource::Mock,
        config: EngineConfig::default(),
        kmeans: kmeans::API,
        ikm: ikmeans::API,
        hikm: hikmeans::API,
        aib: aib::API,
        kdforest: kdtree::API,
        gmm: gmm::API,
        covdet: covdet::API,
        sift: sift::API,
        dsift: dsift::API,
        scalespace: scalespace::API,
        mser: mser::API,
        hog: hog::API,
        lbp: lbp::API,
        liop: liop::API,
        quickshift: quickshift::API,
        slic: slic::API,
        encode: encode::API,
    })
}

/// Number of mock objects alive on the current thread.
#[must_use]
pub fn live_objects() -> usize {
    LIVE.with(|live| live.borrow().len())
}

/// Number of mock objects of one kind alive on the current thread.
#[must_use]
pub fn live_objects_of(kind: &str) -> usize {
    LIVE.with(|live| live.borrow().values().filter(|k| **k == kind).count())
}

/// Box `value` and register it as a live object of `kind`.
pub(crate) fn alloc<T, R>(kind: &'static str, value: T) -> *mut R {
    let raw = Box::into_raw(Box::new(value));
    LIVE.with(|live| live.borrow_mut().insert(raw as usize, kind));
    raw.cast()
}

/// Unregister and drop an object created by [`alloc`].
///
/// # Safety
///
/// `raw` must come from `alloc::<T, _>`.
pub(crate) unsafe fn free<T, R>(raw: *mut R) {
    let kind = LIVE.with(|live| live.borrow_mut().remove(&(raw as usize)));
    assert!(kind.is_some(), "mock engine: destroying unknown object {raw:p}");
    // SAFETY: registered by `alloc::<T, _>` and unregistered just now.
    drop(unsafe { Box::from_raw(raw.cast::<T>()) });
}

/// Borrow a live object created by [`alloc`].
///
/// # Safety
///
/// `raw` must come from `alloc::<T, _>` and no other borrow of the same
/// object may be alive.
pub(crate) unsafe fn object<'a, T, R>(raw: *const R) -> &'a mut T {
    let known = LIVE.with(|live| live.borrow().contains_key(&(raw as usize)));
    assert!(known, "mock engine: use of dead object {raw:p}");
    // SAFETY: live, registered and exclusively borrowed per the contract.
    unsafe { &mut *raw.cast_mut().cast::<T>() }
}

/// Read `count` caller values of layout `tag` as `f64`.
///
/// # Safety
///
/// `ptr` must address `count` elements of layout `tag`.
pub(crate) unsafe fn read_f64(ptr: *const c_void, count: usize, tag: TypeTag) -> Vec<f64> {
    unsafe { from_foreign(ptr, count, tag) }
}

/// Copy `count` caller values of a known element type.
///
/// # Safety
///
/// `ptr` must address `count` elements of `T`.
pub(crate) unsafe fn read_vec<T: Copy>(ptr: *const T, count: usize) -> Vec<T> {
    unsafe { ArrayView::from_raw_parts(ptr, count) }.to_vec()
}

/// Copy a buffer into caller-provided output memory.
///
/// # Safety
///
/// `dst` must address at least `src.size_bytes()` writable bytes.
pub(crate) unsafe fn write_buffer(dst: *mut c_void, src: &ForeignBuffer) {
    unsafe { std::ptr::copy_nonoverlapping(src.as_ptr().cast::<u8>(), dst.cast::<u8>(), src.size_bytes()) };
}

/// Copy values into caller-provided output memory.
///
/// # Safety
///
/// `dst` must address at least `src.len()` writable elements.
pub(crate) unsafe fn write_slice<T: Copy>(dst: *mut T, src: &[T]) {
    unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
}

/// Squared Euclidean distance.
pub(crate) fn sq_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index and squared distance of the row of `centers` nearest to `point`.
pub(crate) fn nearest(point: &[f64], centers: &[f64], dimension: usize) -> (usize, f64) {
    centers
        .chunks(dimension)
        .map(|center| sq_distance(point, center))
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
}
