//! k-means clustering.
//!
//! A [`KMeans`] object is configured for one data type (`float` or
//! `double`) and one distance. Data is passed row-major, `dimension`
//! values per point, and converted to the object's data type on the way
//! in; results are converted to the caller's element type on the way out.

use crate::engine::Engine;
use crate::sys::{VectorComparison, VlSize, VlType};
use crate::{check_len, require_float, rows};
use std::ffi::{c_int, c_void};
use vl_ffi::{
    marshal, read_primitive, Element, FfiError, FfiResult, ForeignBuffer, ForeignHandle,
    ForeignResource, TypeTag,
};

/// Opaque `VlKMeans`.
#[repr(C)]
pub(crate) struct VlKMeans {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_kmeans_*` entry points.
    pub(crate) struct KMeansApi {
        fn vl_kmeans_new(data_type: VlType, distance: c_int) -> *mut VlKMeans;
        fn vl_kmeans_new_copy(kmeans: *const VlKMeans) -> *mut VlKMeans;
        fn vl_kmeans_delete(kmeans: *mut VlKMeans);
        fn vl_kmeans_reset(kmeans: *mut VlKMeans);
        fn vl_kmeans_cluster(kmeans: *mut VlKMeans, data: *const c_void, dimension: VlSize, num_data: VlSize, num_centers: VlSize) -> f64;
        fn vl_kmeans_quantize(kmeans: *const VlKMeans, assignments: *mut u32, distances: *mut c_void, data: *const c_void, num_data: VlSize);
        fn vl_kmeans_set_centers(kmeans: *mut VlKMeans, centers: *const c_void, dimension: VlSize, num_centers: VlSize);
        fn vl_kmeans_init_centers_with_rand_data(kmeans: *mut VlKMeans, data: *const c_void, dimension: VlSize, num_data: VlSize, num_centers: VlSize);
        fn vl_kmeans_init_centers_plus_plus(kmeans: *mut VlKMeans, data: *const c_void, dimension: VlSize, num_data: VlSize, num_centers: VlSize);
        fn vl_kmeans_refine_centers(kmeans: *mut VlKMeans, data: *const c_void, num_data: VlSize) -> f64;
        fn vl_kmeans_get_distance(kmeans: *const VlKMeans) -> c_int;
        fn vl_kmeans_get_algorithm(kmeans: *const VlKMeans) -> c_int;
        fn vl_kmeans_get_initialization(kmeans: *const VlKMeans) -> c_int;
        fn vl_kmeans_get_num_repetitions(kmeans: *const VlKMeans) -> VlSize;
        fn vl_kmeans_get_dimension(kmeans: *const VlKMeans) -> VlSize;
        fn vl_kmeans_get_num_centers(kmeans: *const VlKMeans) -> VlSize;
        fn vl_kmeans_get_max_num_iterations(kmeans: *const VlKMeans) -> VlSize;
        fn vl_kmeans_get_min_energy_variation(kmeans: *const VlKMeans) -> f64;
        fn vl_kmeans_get_max_num_comparisons(kmeans: *const VlKMeans) -> VlSize;
        fn vl_kmeans_get_num_trees(kmeans: *const VlKMeans) -> VlSize;
        fn vl_kmeans_get_energy(kmeans: *const VlKMeans) -> f64;
        fn vl_kmeans_get_centers(kmeans: *const VlKMeans) -> *const c_void;
        fn vl_kmeans_set_algorithm(kmeans: *mut VlKMeans, algorithm: c_int);
        fn vl_kmeans_set_initialization(kmeans: *mut VlKMeans, initialization: c_int);
        fn vl_kmeans_set_num_repetitions(kmeans: *mut VlKMeans, num_repetitions: VlSize);
        fn vl_kmeans_set_max_num_iterations(kmeans: *mut VlKMeans, max_num_iterations: VlSize);
        fn vl_kmeans_set_min_energy_variation(kmeans: *mut VlKMeans, min_energy_variation: f64);
        fn vl_kmeans_set_verbosity(kmeans: *mut VlKMeans, verbosity: c_int);
        fn vl_kmeans_set_max_num_comparisons(kmeans: *mut VlKMeans, max_num_comparisons: VlSize);
        fn vl_kmeans_set_num_trees(kmeans: *mut VlKMeans, num_trees: VlSize);
    }
}

unsafe impl ForeignResource for VlKMeans {
    type Api = KMeansApi;
    const KIND: &'static str = "kmeans";

    unsafe fn destroy(api: &KMeansApi, raw: *mut Self) {
        unsafe { (api.vl_kmeans_delete)(raw) };
    }

    unsafe fn apply_verbosity(api: &KMeansApi, raw: *mut Self, level: i32) {
        unsafe { (api.vl_kmeans_set_verbosity)(raw, level) };
    }
}

engine_enum! {
    /// Optimization algorithm (`VlKMeansAlgorithm`).
    pub enum KMeansAlgorithm {
        /// Lloyd's algorithm.
        Lloyd = 0,
        /// Elkan's accelerated algorithm.
        Elkan = 1,
        /// Approximate nearest neighbours through a KD-forest.
        Ann = 2,
    }
}

engine_enum! {
    /// Center seeding (`VlKMeansInitialization`).
    pub enum KMeansInitialization {
        /// Random data points.
        RandomSelection = 0,
        /// k-means++.
        PlusPlus = 1,
    }
}

/// A k-means clustering context.
#[derive(Debug)]
pub struct KMeans {
    handle: ForeignHandle<VlKMeans>,
    data_type: TypeTag,
}

impl KMeans {
    /// Create a context for `data_type` data compared with `distance`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedType`] unless `data_type` is
    /// `Float32` or `Float64`, and [`FfiError::AllocationFailed`] if the
    /// engine cannot create the object.
    pub fn new(engine: &'static Engine, data_type: TypeTag, distance: VectorComparison) -> FfiResult<Self> {
        require_float(VlKMeans::KIND, data_type)?;
        // SAFETY: `vl_kmeans_new` returns a fresh object or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.kmeans, engine.handle_config(), |api: &'static KMeansApi| {
                (api.vl_kmeans_new)(data_type.id(), distance.raw())
            })?
        };
        Ok(Self { handle, data_type })
    }

    /// Deep copy, including centers and settings.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot copy.
    pub fn try_clone(&self) -> FfiResult<Self> {
        // SAFETY: `vl_kmeans_new_copy` returns a fresh object or null.
        let handle = unsafe { self.handle.derive(|api, raw| (api.vl_kmeans_new_copy)(raw))? };
        Ok(Self {
            handle,
            data_type: self.data_type,
        })
    }

    /// Discard centers and energy; settings are kept.
    pub fn reset(&mut self) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_kmeans_reset)(self.handle.as_mut_ptr()) };
    }

    /// The data type this context was created for.
    #[must_use]
    pub const fn data_type(&self) -> TypeTag {
        self.data_type
    }

    /// Run the full clustering pass and return the final energy.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `data` is not a whole number
    /// of `dimension`-sized rows, and [`FfiError::UnsupportedInput`] if
    /// `num_centers` is zero or exceeds the number of points.
    pub fn cluster<T: Element>(&mut self, data: &[T], dimension: usize, num_centers: usize) -> FfiResult<f64> {
        let num_data = check_centers(dimension, data.len(), num_centers)?;
        let buffer = marshal::to_foreign(data, self.data_type);
        tracing::debug!(dimension, num_data, num_centers, "kmeans cluster");
        // SAFETY: `buffer` holds `dimension * num_data` elements of the
        // object's data type.
        Ok(unsafe {
            (self.handle.api().vl_kmeans_cluster)(
                self.handle.as_mut_ptr(),
                buffer.as_ptr(),
                dimension,
                num_data,
                num_centers,
            )
        })
    }

    /// Assign each point to its nearest center.
    ///
    /// Returns the center index and the distance for every point.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no centers exist yet and
    /// [`FfiError::SizeMismatch`] if `data` is not a whole number of rows.
    pub fn quantize<T: Element>(&self, data: &[T]) -> FfiResult<(Vec<u32>, Vec<T>)> {
        let dimension = self.require_centers()?;
        let num_data = rows(dimension, data.len())?;
        let buffer = marshal::to_foreign(data, self.data_type);
        let mut assignments = vec![0u32; num_data];
        let mut distances = ForeignBuffer::zeroed(self.data_type, num_data);
        // SAFETY: the output buffers hold `num_data` elements each and the
        // input holds `num_data` rows.
        unsafe {
            (self.handle.api().vl_kmeans_quantize)(
                self.handle.as_ptr(),
                assignments.as_mut_ptr(),
                distances.as_mut_ptr(),
                buffer.as_ptr(),
                num_data,
            );
        }
        Ok((assignments, distances.to_vec()))
    }

    /// Replace the centers, `dimension` values each.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `centers` is not a whole
    /// number of rows, and [`FfiError::UnsupportedInput`] if it is empty.
    pub fn set_centers<T: Element>(&mut self, centers: &[T], dimension: usize) -> FfiResult<()> {
        let num_centers = rows(dimension, centers.len())?;
        if num_centers == 0 {
            return Err(FfiError::UnsupportedInput("no centers given".to_string()));
        }
        let buffer = marshal::to_foreign(centers, self.data_type);
        // SAFETY: `buffer` holds `dimension * num_centers` elements.
        unsafe {
            (self.handle.api().vl_kmeans_set_centers)(
                self.handle.as_mut_ptr(),
                buffer.as_ptr(),
                dimension,
                num_centers,
            );
        }
        Ok(())
    }

    /// Seed centers with randomly chosen points.
    ///
    /// # Errors
    ///
    /// Same conditions as [`KMeans::cluster`].
    pub fn init_centers_with_rand_data<T: Element>(
        &mut self,
        data: &[T],
        dimension: usize,
        num_centers: usize,
    ) -> FfiResult<()> {
        let num_data = check_centers(dimension, data.len(), num_centers)?;
        let buffer = marshal::to_foreign(data, self.data_type);
        // SAFETY: `buffer` holds `dimension * num_data` elements.
        unsafe {
            (self.handle.api().vl_kmeans_init_centers_with_rand_data)(
                self.handle.as_mut_ptr(),
                buffer.as_ptr(),
                dimension,
                num_data,
                num_centers,
            );
        }
        Ok(())
    }

    /// Seed centers with k-means++.
    ///
    /// # Errors
    ///
    /// Same conditions as [`KMeans::cluster`].
    pub fn init_centers_plus_plus<T: Element>(
        &mut self,
        data: &[T],
        dimension: usize,
        num_centers: usize,
    ) -> FfiResult<()> {
        let num_data = check_centers(dimension, data.len(), num_centers)?;
        let buffer = marshal::to_foreign(data, self.data_type);
        // SAFETY: `buffer` holds `dimension * num_data` elements.
        unsafe {
            (self.handle.api().vl_kmeans_init_centers_plus_plus)(
                self.handle.as_mut_ptr(),
                buffer.as_ptr(),
                dimension,
                num_data,
                num_centers,
            );
        }
        Ok(())
    }

    /// Improve the current centers and return the final energy.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no centers exist yet and
    /// [`FfiError::SizeMismatch`] if `data` is not a whole number of rows.
    pub fn refine_centers<T: Element>(&mut self, data: &[T]) -> FfiResult<f64> {
        let dimension = self.require_centers()?;
        let num_data = rows(dimension, data.len())?;
        let buffer = marshal::to_foreign(data, self.data_type);
        // SAFETY: `buffer` holds `num_data` rows of the current dimension.
        Ok(unsafe {
            (self.handle.api().vl_kmeans_refine_centers)(self.handle.as_mut_ptr(), buffer.as_ptr(), num_data)
        })
    }

    /// All centers, row-major, `dimension * num_centers` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no centers exist yet.
    pub fn centers<T: Element>(&self) -> FfiResult<Vec<T>> {
        let dimension = self.require_centers()?;
        let count = dimension * self.num_centers();
        // SAFETY: the engine holds `dimension * num_centers` elements of the
        // object's data type until the next mutating call.
        let centers = unsafe {
            let ptr = (self.handle.api().vl_kmeans_get_centers)(self.handle.as_ptr());
            read_primitive(ptr, count, self.data_type)
        };
        check_len(count, centers.len())?;
        Ok(centers)
    }

    /// The centers split into one vector per center.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no centers exist yet.
    pub fn center_rows<T: Element>(&self) -> FfiResult<Vec<Vec<T>>> {
        let dimension = self.dimension();
        Ok(self
            .centers()?
            .chunks(dimension)
            .map(<[T]>::to_vec)
            .collect())
    }

    /// Configured distance.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::Engine`] if the engine reports an unknown value.
    pub fn distance(&self) -> FfiResult<VectorComparison> {
        // SAFETY: the handle is live.
        let raw = unsafe { (self.handle.api().vl_kmeans_get_distance)(self.handle.as_ptr()) };
        VectorComparison::from_raw("vl_kmeans_get_distance", raw)
    }

    /// Configured algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::Engine`] if the engine reports an unknown value.
    pub fn algorithm(&self) -> FfiResult<KMeansAlgorithm> {
        // SAFETY: the handle is live.
        let raw = unsafe { (self.handle.api().vl_kmeans_get_algorithm)(self.handle.as_ptr()) };
        KMeansAlgorithm::from_raw("vl_kmeans_get_algorithm", raw)
    }

    /// Select the algorithm.
    pub fn set_algorithm(&mut self, algorithm: KMeansAlgorithm) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_kmeans_set_algorithm)(self.handle.as_mut_ptr(), algorithm.raw()) };
    }

    /// Configured seeding.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::Engine`] if the engine reports an unknown value.
    pub fn initialization(&self) -> FfiResult<KMeansInitialization> {
        // SAFETY: the handle is live.
        let raw = unsafe { (self.handle.api().vl_kmeans_get_initialization)(self.handle.as_ptr()) };
        KMeansInitialization::from_raw("vl_kmeans_get_initialization", raw)
    }

    /// Select the seeding used by [`KMeans::cluster`].
    pub fn set_initialization(&mut self, initialization: KMeansInitialization) {
        // SAFETY: the handle is live.
        unsafe {
            (self.handle.api().vl_kmeans_set_initialization)(self.handle.as_mut_ptr(), initialization.raw());
        };
    }

    /// Diagnostic level of this object.
    #[must_use]
    pub const fn verbosity(&self) -> i32 {
        self.handle.verbosity()
    }

    /// Change the diagnostic level of this object.
    pub fn set_verbosity(&mut self, level: i32) {
        self.handle.set_verbosity(level);
    }

    engine_accessors! {
        /// Number of clustering passes; the best is kept.
        num_repetitions, set_num_repetitions: usize => vl_kmeans_get_num_repetitions, vl_kmeans_set_num_repetitions;
        /// Iteration limit of one pass.
        max_num_iterations, set_max_num_iterations: usize => vl_kmeans_get_max_num_iterations, vl_kmeans_set_max_num_iterations;
        /// Relative energy change below which a pass stops.
        min_energy_variation, set_min_energy_variation: f64 => vl_kmeans_get_min_energy_variation, vl_kmeans_set_min_energy_variation;
        /// Comparison budget of the ANN algorithm.
        max_num_comparisons, set_max_num_comparisons: usize => vl_kmeans_get_max_num_comparisons, vl_kmeans_set_max_num_comparisons;
        /// Number of trees of the ANN algorithm.
        num_trees, set_num_trees: usize => vl_kmeans_get_num_trees, vl_kmeans_set_num_trees;
    }

    engine_getters! {
        /// Dimension of the data; 0 before any centers exist.
        dimension: usize => vl_kmeans_get_dimension;
        /// Number of centers; 0 before any centers exist.
        num_centers: usize => vl_kmeans_get_num_centers;
        /// Energy of the current centers.
        energy: f64 => vl_kmeans_get_energy;
    }

    /// Borrow the engine object for configuring another one.
    pub(crate) fn raw(&mut self) -> *mut VlKMeans {
        self.handle.as_mut_ptr()
    }

    fn require_centers(&self) -> FfiResult<usize> {
        let dimension = self.dimension();
        if dimension == 0 || self.num_centers() == 0 {
            return Err(FfiError::InvalidHandleState {
                resource: VlKMeans::KIND,
                reason: "no centers; call cluster, set_centers or an init method first".to_string(),
            });
        }
        Ok(dimension)
    }
}

/// Validate a data set for seeding `num_centers` centers; returns the
/// number of points.
fn check_centers(dimension: usize, len: usize, num_centers: usize) -> FfiResult<usize> {
    let num_data = rows(dimension, len)?;
    if num_centers == 0 || num_centers > num_data {
        return Err(FfiError::UnsupportedInput(format!(
            "cannot seed {num_centers} centers from {num_data} points"
        )));
    }
    Ok(num_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    fn points() -> Vec<f64> {
        // Three well separated groups of four points in 2-D
        vec![
            0.0, 0.0, 0.1, 0.0, 0.0, 0.1, 0.1, 0.1, //
            10.0, 10.0, 10.1, 10.0, 10.0, 10.1, 10.1, 10.1, //
            -10.0, 5.0, -10.1, 5.0, -10.0, 5.1, -10.1, 5.1,
        ]
    }

    fn kmeans(data_type: TypeTag) -> KMeans {
        KMeans::new(Engine::mock(), data_type, VectorComparison::DistanceL2).unwrap()
    }

    #[test]
    fn test_rejects_integer_data_type() {
        let err = KMeans::new(Engine::mock(), TypeTag::UInt8, VectorComparison::DistanceL2).unwrap_err();
        assert!(matches!(err, FfiError::UnsupportedType(_)));
    }

    #[test]
    fn test_cluster_produces_centers() {
        let mut km = kmeans(TypeTag::Float64);
        let energy = km.cluster(&points(), 2, 3).unwrap();
        assert!(energy >= 0.0);
        assert_eq!(km.dimension(), 2);
        assert_eq!(km.num_centers(), 3);
        assert_eq!(km.centers::<f64>().unwrap().len(), 6);
        assert_eq!(km.energy(), energy);
    }

    #[test]
    fn test_results_before_clustering_are_invalid_state() {
        let mut km = kmeans(TypeTag::Float32);
        assert!(matches!(km.centers::<f32>(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(km.quantize(&[1.0f32, 2.0]), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(km.refine_centers(&[1.0f32, 2.0]), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_quantize_assigns_nearest_center() {
        let mut km = kmeans(TypeTag::Float64);
        km.set_centers(&[0.0f64, 0.0, 10.0, 10.0], 2).unwrap();
        let (assignments, distances) = km.quantize(&[9.0f64, 9.0, 1.0, 0.0]).unwrap();
        assert_eq!(assignments, vec![1, 0]);
        assert_eq!(distances.len(), 2);
        assert!(distances[1] < distances[0]);
    }

    #[test]
    fn test_float32_context_accepts_f64_input() {
        let mut km = kmeans(TypeTag::Float32);
        km.cluster(&points(), 2, 3).unwrap();
        let centers: Vec<f32> = km.centers().unwrap();
        assert_eq!(centers.len(), 6);
    }

    #[test]
    fn test_size_validation() {
        let mut km = kmeans(TypeTag::Float64);
        assert!(matches!(km.cluster(&[1.0f64; 5], 2, 1), Err(FfiError::SizeMismatch { .. })));
        assert!(matches!(km.cluster(&[1.0f64; 4], 2, 3), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(km.cluster(&[1.0f64; 4], 2, 0), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(km.set_centers::<f64>(&[], 2), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_settings_round_trip() {
        let mut km = kmeans(TypeTag::Float64);
        km.set_algorithm(KMeansAlgorithm::Elkan);
        km.set_initialization(KMeansInitialization::PlusPlus);
        km.set_num_repetitions(4);
        km.set_max_num_iterations(50);
        km.set_min_energy_variation(1e-4);
        km.set_max_num_comparisons(64);
        km.set_num_trees(3);
        assert_eq!(km.algorithm().unwrap(), KMeansAlgorithm::Elkan);
        assert_eq!(km.initialization().unwrap(), KMeansInitialization::PlusPlus);
        assert_eq!(km.num_repetitions(), 4);
        assert_eq!(km.max_num_iterations(), 50);
        assert_eq!(km.min_energy_variation(), 1e-4);
        assert_eq!(km.max_num_comparisons(), 64);
        assert_eq!(km.num_trees(), 3);
        assert_eq!(km.distance().unwrap(), VectorComparison::DistanceL2);
    }

    #[test]
    fn test_verbosity_reaches_engine_object() {
        let mut km = kmeans(TypeTag::Float64);
        assert_eq!(km.verbosity(), 0);
        km.set_verbosity(3);
        assert_eq!(km.verbosity(), 3);
        assert_eq!(mock::kmeans::verbosity_of(km.raw()), 3);
    }

    #[test]
    fn test_try_clone_is_independent() {
        let before = mock::live_objects();
        let mut km = kmeans(TypeTag::Float64);
        km.cluster(&points(), 2, 3).unwrap();
        let copy = km.try_clone().unwrap();
        assert_eq!(mock::live_objects(), before + 2);
        km.reset();
        assert_eq!(km.num_centers(), 0);
        assert_eq!(copy.num_centers(), 3);
        drop(km);
        drop(copy);
        assert_eq!(mock::live_objects(), before);
    }

    #[test]
    fn test_init_then_refine() {
        let mut km = kmeans(TypeTag::Float64);
        km.init_centers_plus_plus(&points(), 2, 3).unwrap();
        let first = km.refine_centers(&points()).unwrap();
        km.init_centers_with_rand_data(&points(), 2, 3).unwrap();
        let second = km.refine_centers(&points()).unwrap();
        assert_eq!(first, second);
        assert_eq!(km.center_rows::<f64>().unwrap().len(), 3);
    }
}
