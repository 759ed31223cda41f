//! Integer k-means.
//!
//! Clusters `u8` data with integer centers. Data is row-major,
//! `dimension` bytes per point; centers are `i32`.

use crate::engine::Engine;
use crate::sys::VlSize;
use crate::{element_count, rows};
use std::ffi::c_int;
use vl_ffi::{ArrayView, FfiError, FfiResult, ForeignHandle, ForeignResource};

/// Opaque `VlIKMFilt`.
#[repr(C)]
pub(crate) struct VlIKMFilt {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_ikm_*` entry points.
    #[allow(non_snake_case)]
    pub(crate) struct IkmApi {
        fn vl_ikm_new(method: c_int) -> *mut VlIKMFilt;
        fn vl_ikm_delete(ikm: *mut VlIKMFilt);
        fn vl_ikm_init(ikm: *mut VlIKMFilt, centers: *const i32, dimension: VlSize, k: VlSize);
        fn vl_ikm_init_rand(ikm: *mut VlIKMFilt, dimension: VlSize, k: VlSize);
        fn vl_ikm_init_rand_data(ikm: *mut VlIKMFilt, data: *const u8, dimension: VlSize, num_data: VlSize, k: VlSize);
        fn vl_ikm_train(ikm: *mut VlIKMFilt, data: *const u8, num_data: VlSize) -> c_int;
        fn vl_ikm_push(ikm: *const VlIKMFilt, assignments: *mut u32, data: *const u8, num_data: VlSize);
        fn vl_ikm_push_one(centers: *const i32, data: *const u8, dimension: VlSize, k: VlSize) -> u32;
        fn vl_ikm_get_ndims(ikm: *const VlIKMFilt) -> VlSize;
        fn vl_ikm_get_K(ikm: *const VlIKMFilt) -> VlSize;
        fn vl_ikm_get_verbosity(ikm: *const VlIKMFilt) -> c_int;
        fn vl_ikm_get_max_niters(ikm: *const VlIKMFilt) -> VlSize;
        fn vl_ikm_get_centers(ikm: *const VlIKMFilt) -> *const i32;
        fn vl_ikm_set_verbosity(ikm: *mut VlIKMFilt, verbosity: c_int);
        fn vl_ikm_set_max_niters(ikm: *mut VlIKMFilt, max_niters: VlSize);
    }
}

unsafe impl ForeignResource for VlIKMFilt {
    type Api = IkmApi;
    const KIND: &'static str = "ikmeans";

    unsafe fn destroy(api: &IkmApi, raw: *mut Self) {
        unsafe { (api.vl_ikm_delete)(raw) };
    }

    unsafe fn apply_verbosity(api: &IkmApi, raw: *mut Self, level: i32) {
        unsafe { (api.vl_ikm_set_verbosity)(raw, level) };
    }
}

engine_enum! {
    /// Training algorithm (`VlIKMAlgorithms`).
    pub enum IkmAlgorithm {
        /// Lloyd's algorithm.
        Lloyd = 0,
        /// Elkan's accelerated algorithm.
        Elkan = 1,
    }
}

/// An integer k-means filter.
#[derive(Debug)]
pub struct IKMeans {
    handle: ForeignHandle<VlIKMFilt>,
    algorithm: IkmAlgorithm,
}

impl IKMeans {
    /// Create a filter trained with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot create
    /// the filter.
    pub fn new(engine: &'static Engine, algorithm: IkmAlgorithm) -> FfiResult<Self> {
        // SAFETY: `vl_ikm_new` returns a fresh filter or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.ikm, engine.handle_config(), |api: &'static IkmApi| (api.vl_ikm_new)(algorithm.raw()))?
        };
        Ok(Self { handle, algorithm })
    }

    /// The training algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> IkmAlgorithm {
        self.algorithm
    }

    /// Use `centers`, `dimension` values each, as the initial centers.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `centers` is not a whole
    /// number of rows and [`FfiError::UnsupportedInput`] if it is empty.
    pub fn init(&mut self, centers: &[i32], dimension: usize) -> FfiResult<()> {
        let k = rows(dimension, centers.len())?;
        if k == 0 {
            return Err(FfiError::UnsupportedInput("no centers given".to_string()));
        }
        // SAFETY: `centers` holds `dimension * k` values; the engine copies
        // them.
        unsafe { (self.handle.api().vl_ikm_init)(self.handle.as_mut_ptr(), centers.as_ptr(), dimension, k) };
        Ok(())
    }

    /// Seed `k` random centers of `dimension` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if either is zero.
    pub fn init_rand(&mut self, dimension: usize, k: usize) -> FfiResult<()> {
        if dimension == 0 || k == 0 {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot seed {k} centers of dimension {dimension}"
            )));
        }
        element_count(&[dimension, k])?;
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_ikm_init_rand)(self.handle.as_mut_ptr(), dimension, k) };
        Ok(())
    }

    /// Seed `k` centers chosen among the points of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `data` is not a whole number
    /// of rows and [`FfiError::UnsupportedInput`] if `k` is zero or exceeds
    /// the number of points.
    pub fn init_rand_data(&mut self, data: &[u8], dimension: usize, k: usize) -> FfiResult<()> {
        let num_data = rows(dimension, data.len())?;
        if k == 0 || k > num_data {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot seed {k} centers from {num_data} points"
            )));
        }
        // SAFETY: `data` holds `dimension * num_data` values.
        unsafe {
            (self.handle.api().vl_ikm_init_rand_data)(self.handle.as_mut_ptr(), data.as_ptr(), dimension, num_data, k);
        }
        Ok(())
    }

    /// Refine the centers on `data`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before an `init*` call,
    /// [`FfiError::SizeMismatch`] if `data` is not a whole number of rows
    /// and [`FfiError::Engine`] if training fails.
    pub fn train(&mut self, data: &[u8]) -> FfiResult<()> {
        let dimension = self.require_centers()?;
        let num_data = rows(dimension, data.len())?;
        tracing::debug!(dimension, num_data, k = self.k(), "ikmeans train");
        // SAFETY: `data` holds `num_data` rows of the filter's dimension.
        let code = unsafe { (self.handle.api().vl_ikm_train)(self.handle.as_mut_ptr(), data.as_ptr(), num_data) };
        if code == 0 {
            Ok(())
        } else {
            Err(FfiError::Engine {
                operation: "vl_ikm_train",
                code,
            })
        }
    }

    /// Index of the nearest center for every point of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before an `init*` call and
    /// [`FfiError::SizeMismatch`] if `data` is not a whole number of rows.
    pub fn push(&self, data: &[u8]) -> FfiResult<Vec<u32>> {
        let dimension = self.require_centers()?;
        let num_data = rows(dimension, data.len())?;
        let mut assignments = vec![0u32; num_data];
        // SAFETY: `assignments` has one slot per point.
        unsafe {
            (self.handle.api().vl_ikm_push)(
                self.handle.as_ptr(),
                assignments.as_mut_ptr(),
                data.as_ptr(),
                num_data,
            );
        }
        Ok(assignments)
    }

    /// The current centers, `k * ndims` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before an `init*` call.
    pub fn centers(&self) -> FfiResult<ArrayView<'_, i32>> {
        let dimension = self.require_centers()?;
        // SAFETY: the engine holds `k` centers of `dimension` values.
        Ok(unsafe {
            ArrayView::from_raw_parts((self.handle.api().vl_ikm_get_centers)(self.handle.as_ptr()), dimension * self.k())
        })
    }

    /// Diagnostic level reported by the engine object.
    #[must_use]
    pub fn verbosity(&self) -> i32 {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_ikm_get_verbosity)(self.handle.as_ptr()) }
    }

    /// Change the diagnostic level of this object.
    pub fn set_verbosity(&mut self, level: i32) {
        self.handle.set_verbosity(level);
    }

    engine_getters! {
        /// Dimension of the centers; zero before an `init*` call.
        ndims: VlSize => vl_ikm_get_ndims;
        /// Number of centers.
        k: VlSize => vl_ikm_get_K;
    }

    engine_accessors! {
        /// Iteration cap of [`IKMeans::train`].
        max_niters, set_max_niters: VlSize => vl_ikm_get_max_niters, vl_ikm_set_max_niters;
    }

    fn require_centers(&self) -> FfiResult<usize> {
        match self.ndims() {
            0 => Err(FfiError::InvalidHandleState {
                resource: VlIKMFilt::KIND,
                reason: "no centers; call init first".to_string(),
            }),
            dimension => Ok(dimension),
        }
    }
}

/// Index of the center nearest to `point` among `centers`, `point.len()`
/// values each.
///
/// # Errors
///
/// Returns [`FfiError::SizeMismatch`] if `centers` is not a whole number
/// of rows and [`FfiError::UnsupportedInput`] if it is empty.
pub fn ikm_push_one(engine: &'static Engine, centers: &[i32], point: &[u8]) -> FfiResult<u32> {
    let dimension = point.len();
    let k = rows(dimension, centers.len())?;
    if k == 0 {
        return Err(FfiError::UnsupportedInput("no centers given".to_string()));
    }
    // SAFETY: `centers` holds `k` rows of `dimension` values and `point`
    // one row.
    Ok(unsafe { (engine.ikm.vl_ikm_push_one)(centers.as_ptr(), point.as_ptr(), dimension, k) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    /// Two tight groups on a line.
    fn data() -> Vec<u8> {
        vec![0, 0, 2, 2, 1, 1, 200, 200, 202, 202, 201, 201]
    }

    #[test]
    fn test_train_requires_init() {
        let mut ikm = IKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        assert_eq!(ikm.ndims(), 0);
        assert!(matches!(ikm.train(&data()), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(ikm.push(&data()), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(ikm.centers(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_train_and_push() {
        let mut ikm = IKMeans::new(Engine::mock(), IkmAlgorithm::Elkan).unwrap();
        ikm.init(&[0, 0, 255, 255], 2).unwrap();
        ikm.train(&data()).unwrap();
        assert_eq!((ikm.ndims(), ikm.k()), (2, 2));
        assert_eq!(ikm.centers().unwrap().as_slice(), &[1, 1, 201, 201]);
        assert_eq!(ikm.push(&[3, 3, 190, 190]).unwrap(), vec![0, 1]);
        assert_eq!(ikm.algorithm(), IkmAlgorithm::Elkan);
    }

    #[test]
    fn test_init_rand_data_validates() {
        let mut ikm = IKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        assert!(matches!(
            ikm.init_rand_data(&data(), 2, 7),
            Err(FfiError::UnsupportedInput(_))
        ));
        assert!(matches!(
            ikm.init_rand_data(&data()[..5], 2, 1),
            Err(FfiError::SizeMismatch { .. })
        ));
        ikm.init_rand_data(&data(), 2, 2).unwrap();
        assert_eq!(ikm.centers().unwrap().len(), 4);
    }

    #[test]
    fn test_init_rand() {
        let mut ikm = IKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        assert!(matches!(ikm.init_rand(0, 3), Err(FfiError::UnsupportedInput(_))));
        ikm.init_rand(3, 4).unwrap();
        assert_eq!((ikm.ndims(), ikm.k()), (3, 4));
        assert!(matches!(ikm.train(&[1, 2]), Err(FfiError::SizeMismatch { .. })));
    }

    #[test]
    fn test_settings() {
        let mut ikm = IKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        ikm.set_max_niters(7);
        assert_eq!(ikm.max_niters(), 7);
        ikm.set_verbosity(2);
        assert_eq!(ikm.verbosity(), 2);
    }

    #[test]
    fn test_push_one() {
        let centers = [0, 0, 100, 100];
        assert_eq!(ikm_push_one(Engine::mock(), &centers, &[90, 95]).unwrap(), 1);
        assert!(matches!(
            ikm_push_one(Engine::mock(), &centers[..3], &[1, 1]),
            Err(FfiError::SizeMismatch { .. })
        ));
        assert!(matches!(ikm_push_one(Engine::mock(), &[], &[1, 1]), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_drop_releases_filter() {
        let before = mock::live_objects_of(VlIKMFilt::KIND);
        let ikm = IKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        assert_eq!(mock::live_objects_of(VlIKMFilt::KIND), before + 1);
        drop(ikm);
        assert_eq!(mock::live_objects_of(VlIKMFilt::KIND), before);
    }
}
