//! Gaussian mixture models fitted by expectation maximization.
//!
//! Means and covariances are stored row-major, `dimension` values per
//! component; priors hold one value per component and posteriors one
//! value per component per point of the last fitted data set.
//!
//! A [`Gmm`] can be told to seed itself with a caller-owned [`KMeans`]
//! object. The engine keeps that pointer without taking ownership, so the
//! mixture borrows the k-means object exclusively for the rest of its life:
//!
//! ```compile_fail
//! use vl_bind::{Engine, Gmm, KMeans, TypeTag, VectorComparison};
//!
//! let engine = Engine::mock();
//! let mut gmm = Gmm::new(engine, TypeTag::Float64, 2, 2).unwrap();
//! {
//!     let mut kmeans = KMeans::new(engine, TypeTag::Float64, VectorComparison::DistanceL2).unwrap();
//!     gmm.set_kmeans_init_object(&mut kmeans);
//! } // `kmeans` dropped while still borrowed
//! gmm.reset();
//! ```

use crate::engine::Engine;
use crate::kmeans::{KMeans, VlKMeans};
use crate::sys::{VlSize, VlType};
use crate::{check_len, element_count, require_float, rows};
use std::ffi::{c_int, c_void};
use std::marker::PhantomData;
use vl_ffi::{marshal, read_primitive, Element, FfiError, FfiResult, ForeignHandle, ForeignResource, TypeTag};

/// Opaque `VlGMM`.
#[repr(C)]
pub(crate) struct VlGMM {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_gmm_*` entry points.
    pub(crate) struct GmmApi {
        fn vl_gmm_new(data_type: VlType, dimension: VlSize, num_components: VlSize) -> *mut VlGMM;
        fn vl_gmm_new_copy(gmm: *const VlGMM) -> *mut VlGMM;
        fn vl_gmm_delete(gmm: *mut VlGMM);
        fn vl_gmm_reset(gmm: *mut VlGMM);
        fn vl_gmm_cluster(gmm: *mut VlGMM, data: *const c_void, num_data: VlSize) -> f64;
        fn vl_gmm_init_with_rand_data(gmm: *mut VlGMM, data: *const c_void, num_data: VlSize);
        fn vl_gmm_init_with_kmeans(gmm: *mut VlGMM, data: *const c_void, num_data: VlSize, kmeans: *mut VlKMeans);
        fn vl_gmm_em(gmm: *mut VlGMM, data: *const c_void, num_data: VlSize) -> f64;
        fn vl_gmm_set_means(gmm: *mut VlGMM, means: *const c_void);
        fn vl_gmm_set_covariances(gmm: *mut VlGMM, covariances: *const c_void);
        fn vl_gmm_set_priors(gmm: *mut VlGMM, priors: *const c_void);
        fn vl_gmm_set_num_repetitions(gmm: *mut VlGMM, num_repetitions: VlSize);
        fn vl_gmm_set_max_num_iterations(gmm: *mut VlGMM, max_num_iterations: VlSize);
        fn vl_gmm_set_verbosity(gmm: *mut VlGMM, verbosity: c_int);
        fn vl_gmm_set_initialization(gmm: *mut VlGMM, initialization: c_int);
        fn vl_gmm_set_kmeans_init_object(gmm: *mut VlGMM, kmeans: *mut VlKMeans);
        fn vl_gmm_set_covariance_lower_bounds(gmm: *mut VlGMM, bounds: *const f64);
        fn vl_gmm_set_covariance_lower_bound(gmm: *mut VlGMM, bound: f64);
        fn vl_gmm_get_means(gmm: *const VlGMM) -> *const c_void;
        fn vl_gmm_get_covariances(gmm: *const VlGMM) -> *const c_void;
        fn vl_gmm_get_priors(gmm: *const VlGMM) -> *const c_void;
        fn vl_gmm_get_posteriors(gmm: *const VlGMM) -> *const c_void;
        fn vl_gmm_get_data_type(gmm: *const VlGMM) -> VlType;
        fn vl_gmm_get_dimension(gmm: *const VlGMM) -> VlSize;
        fn vl_gmm_get_num_repetitions(gmm: *const VlGMM) -> VlSize;
        fn vl_gmm_get_num_data(gmm: *const VlGMM) -> VlSize;
        fn vl_gmm_get_num_clusters(gmm: *const VlGMM) -> VlSize;
        fn vl_gmm_get_loglikelihood(gmm: *const VlGMM) -> f64;
        fn vl_gmm_get_verbosity(gmm: *const VlGMM) -> c_int;
        fn vl_gmm_get_max_num_iterations(gmm: *const VlGMM) -> VlSize;
        fn vl_gmm_get_initialization(gmm: *const VlGMM) -> c_int;
        fn vl_gmm_get_covariance_lower_bounds(gmm: *const VlGMM) -> *const f64;
    }
}

unsafe impl ForeignResource for VlGMM {
    type Api = GmmApi;
    const KIND: &'static str = "gmm";

    unsafe fn destroy(api: &GmmApi, raw: *mut Self) {
        unsafe { (api.vl_gmm_delete)(raw) };
    }

    unsafe fn apply_verbosity(api: &GmmApi, raw: *mut Self, level: i32) {
        unsafe { (api.vl_gmm_set_verbosity)(raw, level) };
    }
}

engine_enum! {
    /// How components are seeded before EM (`VlGMMInitialization`).
    pub enum GmmInitialization {
        /// Run k-means and use its clusters.
        KMeans = 0,
        /// Random data points.
        Rand = 1,
        /// Means, covariances and priors set by the caller.
        Custom = 2,
    }
}

/// A Gaussian mixture model.
///
/// `'k` is the lifetime of the k-means object given to
/// [`Gmm::set_kmeans_init_object`], if any.
#[derive(Debug)]
pub struct Gmm<'k> {
    handle: ForeignHandle<VlGMM>,
    data_type: TypeTag,
    dimension: usize,
    num_components: usize,
    _kmeans: PhantomData<&'k mut KMeans>,
}

impl<'k> Gmm<'k> {
    /// Create a mixture of `num_components` components over
    /// `dimension`-sized points of `data_type`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedType`] unless `data_type` is
    /// floating point, [`FfiError::UnsupportedInput`] if `dimension` or
    /// `num_components` is zero, and [`FfiError::AllocationFailed`] if the
    /// engine cannot create the model.
    pub fn new(engine: &'static Engine, data_type: TypeTag, dimension: usize, num_components: usize) -> FfiResult<Self> {
        require_float(VlGMM::KIND, data_type)?;
        if dimension == 0 || num_components == 0 {
            return Err(FfiError::UnsupportedInput(format!(
                "gmm needs a positive dimension and component count, got {dimension} and {num_components}"
            )));
        }
        element_count(&[dimension, num_components])?;
        // SAFETY: `vl_gmm_new` returns a fresh model or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.gmm, engine.handle_config(), |api: &'static GmmApi| {
                (api.vl_gmm_new)(data_type.id(), dimension, num_components)
            })?
        };
        Ok(Self {
            handle,
            data_type,
            dimension,
            num_components,
            _kmeans: PhantomData,
        })
    }

    /// Deep copy. The engine copies any k-means seeding object too, so the
    /// copy owns its own.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot copy.
    pub fn try_clone(&self) -> FfiResult<Self> {
        // SAFETY: `vl_gmm_new_copy` returns a fresh model or null.
        let handle = unsafe { self.handle.derive(|api, raw| (api.vl_gmm_new_copy)(raw))? };
        Ok(Self {
            handle,
            data_type: self.data_type,
            dimension: self.dimension,
            num_components: self.num_components,
            _kmeans: PhantomData,
        })
    }

    /// Forget the fitted data; parameters and settings are kept.
    pub fn reset(&mut self) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_gmm_reset)(self.handle.as_mut_ptr()) };
    }

    /// Seed according to [`Gmm::initialization`], run EM and return the
    /// final log-likelihood.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `data` is not a whole number
    /// of points and [`FfiError::UnsupportedInput`] if it has fewer points
    /// than components.
    pub fn cluster<T: Element>(&mut self, data: &[T]) -> FfiResult<f64> {
        let num_data = self.check_data(data.len())?;
        let buffer = marshal::to_foreign(data, self.data_type);
        tracing::debug!(num_data, components = self.num_components, "gmm cluster");
        // SAFETY: `buffer` holds `num_data` points.
        Ok(unsafe { (self.handle.api().vl_gmm_cluster)(self.handle.as_mut_ptr(), buffer.as_ptr(), num_data) })
    }

    /// Seed the components from randomly chosen points.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Gmm::cluster`].
    pub fn init_with_rand_data<T: Element>(&mut self, data: &[T]) -> FfiResult<()> {
        let num_data = self.check_data(data.len())?;
        let buffer = marshal::to_foreign(data, self.data_type);
        // SAFETY: `buffer` holds `num_data` points.
        unsafe { (self.handle.api().vl_gmm_init_with_rand_data)(self.handle.as_mut_ptr(), buffer.as_ptr(), num_data) };
        Ok(())
    }

    /// Seed the components by clustering `data` with `kmeans`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Gmm::cluster`], plus
    /// [`FfiError::TagMismatch`] if `kmeans` uses another data type.
    pub fn init_with_kmeans<T: Element>(&mut self, data: &[T], kmeans: &mut KMeans) -> FfiResult<()> {
        self.data_type.expect(kmeans.data_type())?;
        let num_data = self.check_data(data.len())?;
        let buffer = marshal::to_foreign(data, self.data_type);
        // SAFETY: `buffer` holds `num_data` points and `kmeans` is live and
        // exclusively borrowed for the call.
        unsafe {
            (self.handle.api().vl_gmm_init_with_kmeans)(self.handle.as_mut_ptr(), buffer.as_ptr(), num_data, kmeans.raw());
        }
        Ok(())
    }

    /// Run EM from the current parameters and return the log-likelihood.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Gmm::cluster`].
    pub fn em<T: Element>(&mut self, data: &[T]) -> FfiResult<f64> {
        let num_data = self.check_data(data.len())?;
        let buffer = marshal::to_foreign(data, self.data_type);
        // SAFETY: `buffer` holds `num_data` points.
        Ok(unsafe { (self.handle.api().vl_gmm_em)(self.handle.as_mut_ptr(), buffer.as_ptr(), num_data) })
    }

    /// Use `kmeans` whenever the model seeds itself with k-means.
    ///
    /// The model keeps using the object until it is dropped, hence the
    /// exclusive borrow.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::TagMismatch`] if `kmeans` uses another data type.
    pub fn set_kmeans_init_object(&mut self, kmeans: &'k mut KMeans) -> FfiResult<()> {
        self.data_type.expect(kmeans.data_type())?;
        // SAFETY: `kmeans` stays borrowed for `'k`, which outlives `self`.
        unsafe { (self.handle.api().vl_gmm_set_kmeans_init_object)(self.handle.as_mut_ptr(), kmeans.raw()) };
        Ok(())
    }

    /// Replace the means, `dimension * num_clusters` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] for any other length.
    pub fn set_means<T: Element>(&mut self, means: &[T]) -> FfiResult<()> {
        check_len(self.dimension * self.num_components, means.len())?;
        let buffer = marshal::to_foreign(means, self.data_type);
        // SAFETY: the engine copies `dimension * num_clusters` values.
        unsafe { (self.handle.api().vl_gmm_set_means)(self.handle.as_mut_ptr(), buffer.as_ptr()) };
        Ok(())
    }

    /// Replace the diagonal covariances, `dimension * num_clusters` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] for any other length.
    pub fn set_covariances<T: Element>(&mut self, covariances: &[T]) -> FfiResult<()> {
        check_len(self.dimension * self.num_components, covariances.len())?;
        let buffer = marshal::to_foreign(covariances, self.data_type);
        // SAFETY: the engine copies `dimension * num_clusters` values.
        unsafe { (self.handle.api().vl_gmm_set_covariances)(self.handle.as_mut_ptr(), buffer.as_ptr()) };
        Ok(())
    }

    /// Replace the priors, `num_clusters` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] for any other length.
    pub fn set_priors<T: Element>(&mut self, priors: &[T]) -> FfiResult<()> {
        check_len(self.num_components, priors.len())?;
        let buffer = marshal::to_foreign(priors, self.data_type);
        // SAFETY: the engine copies `num_clusters` values.
        unsafe { (self.handle.api().vl_gmm_set_priors)(self.handle.as_mut_ptr(), buffer.as_ptr()) };
        Ok(())
    }

    /// Set one covariance floor per dimension.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] unless `bounds` has `dimension`
    /// values.
    pub fn set_covariance_lower_bounds(&mut self, bounds: &[f64]) -> FfiResult<()> {
        check_len(self.dimension, bounds.len())?;
        // SAFETY: the engine copies `dimension` doubles.
        unsafe { (self.handle.api().vl_gmm_set_covariance_lower_bounds)(self.handle.as_mut_ptr(), bounds.as_ptr()) };
        Ok(())
    }

    /// Set the same covariance floor for every dimension.
    pub fn set_covariance_lower_bound(&mut self, bound: f64) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_gmm_set_covariance_lower_bound)(self.handle.as_mut_ptr(), bound) };
    }

    /// Covariance floors, one per dimension.
    #[must_use]
    pub fn covariance_lower_bounds(&self) -> Vec<f64> {
        // SAFETY: the engine holds `dimension` doubles.
        unsafe {
            let ptr = (self.handle.api().vl_gmm_get_covariance_lower_bounds)(self.handle.as_ptr());
            read_primitive(ptr.cast(), self.dimension, TypeTag::Float64)
        }
    }

    /// Component means, `dimension * num_clusters` values.
    #[must_use]
    pub fn means<T: Element>(&self) -> Vec<T> {
        // SAFETY: the engine holds `dimension * num_clusters` values of
        // the model's data type.
        unsafe {
            let ptr = (self.handle.api().vl_gmm_get_means)(self.handle.as_ptr());
            read_primitive(ptr, self.dimension * self.num_components, self.data_type)
        }
    }

    /// Diagonal covariances, `dimension * num_clusters` values.
    #[must_use]
    pub fn covariances<T: Element>(&self) -> Vec<T> {
        // SAFETY: as for `means`.
        unsafe {
            let ptr = (self.handle.api().vl_gmm_get_covariances)(self.handle.as_ptr());
            read_primitive(ptr, self.dimension * self.num_components, self.data_type)
        }
    }

    /// Component priors, `num_clusters` values.
    #[must_use]
    pub fn priors<T: Element>(&self) -> Vec<T> {
        // SAFETY: the engine holds `num_clusters` values.
        unsafe {
            let ptr = (self.handle.api().vl_gmm_get_priors)(self.handle.as_ptr());
            read_primitive(ptr, self.num_components, self.data_type)
        }
    }

    /// Posterior of every component for every point of the last fitted
    /// data set, `num_clusters * num_data` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no data has been fitted.
    pub fn posteriors<T: Element>(&self) -> FfiResult<Vec<T>> {
        let num_data = self.num_data();
        if num_data == 0 {
            return Err(FfiError::InvalidHandleState {
                resource: VlGMM::KIND,
                reason: "no posteriors before the model is fitted".to_string(),
            });
        }
        // SAFETY: the engine holds `num_clusters * num_data` values.
        Ok(unsafe {
            let ptr = (self.handle.api().vl_gmm_get_posteriors)(self.handle.as_ptr());
            read_primitive(ptr, self.num_components * num_data, self.data_type)
        })
    }

    /// The data type this model was created for.
    #[must_use]
    pub const fn data_type(&self) -> TypeTag {
        self.data_type
    }

    /// Configured seeding.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::Engine`] if the engine reports an unknown value.
    pub fn initialization(&self) -> FfiResult<GmmInitialization> {
        // SAFETY: the handle is live.
        let raw = unsafe { (self.handle.api().vl_gmm_get_initialization)(self.handle.as_ptr()) };
        GmmInitialization::from_raw("vl_gmm_get_initialization", raw)
    }

    /// Select the seeding used by [`Gmm::cluster`].
    pub fn set_initialization(&mut self, initialization: GmmInitialization) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_gmm_set_initialization)(self.handle.as_mut_ptr(), initialization.raw()) };
    }

    /// Diagnostic level reported by the engine object.
    #[must_use]
    pub fn verbosity(&self) -> i32 {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_gmm_get_verbosity)(self.handle.as_ptr()) }
    }

    /// Change the diagnostic level of this object.
    pub fn set_verbosity(&mut self, level: i32) {
        self.handle.set_verbosity(level);
    }

    engine_accessors! {
        /// Number of EM runs; the best is kept.
        num_repetitions, set_num_repetitions: usize => vl_gmm_get_num_repetitions, vl_gmm_set_num_repetitions;
        /// Iteration limit of one EM run.
        max_num_iterations, set_max_num_iterations: usize => vl_gmm_get_max_num_iterations, vl_gmm_set_max_num_iterations;
    }

    engine_getters! {
        /// Dimension of the data.
        dimension: usize => vl_gmm_get_dimension;
        /// Number of points of the last fitted data set.
        num_data: usize => vl_gmm_get_num_data;
        /// Number of components.
        num_clusters: usize => vl_gmm_get_num_clusters;
        /// Log-likelihood of the last fit.
        loglikelihood: f64 => vl_gmm_get_loglikelihood;
    }

    fn check_data(&self, len: usize) -> FfiResult<usize> {
        let num_data = rows(self.dimension, len)?;
        if num_data < self.num_components {
            return Err(FfiError::UnsupportedInput(format!(
                "{num_data} points cannot seed {} components",
                self.num_components
            )));
        }
        Ok(num_data)
    }
}
