//! Hierarchical integer k-means.
//!
//! A vocabulary tree of depth `depth` and branching factor `k` over `u8`
//! data. Each point is quantized to one path from the root, `depth`
//! child indices.

use crate::engine::Engine;
use crate::ikmeans::IkmAlgorithm;
use crate::sys::VlSize;
use crate::{element_count, rows};
use std::ffi::c_int;
use vl_ffi::{FfiError, FfiResult, ForeignHandle, ForeignResource};

/// Opaque `VlHIKMTree`.
#[repr(C)]
pub(crate) struct VlHIKMTree {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_hikm_*` entry points.
    #[allow(non_snake_case)]
    pub(crate) struct HikmApi {
        fn vl_hikm_new(method: c_int) -> *mut VlHIKMTree;
        fn vl_hikm_delete(tree: *mut VlHIKMTree);
        fn vl_hikm_init(tree: *mut VlHIKMTree, dimension: VlSize, k: VlSize, depth: VlSize);
        fn vl_hikm_train(tree: *mut VlHIKMTree, data: *const u8, num_data: VlSize);
        fn vl_hikm_push(tree: *mut VlHIKMTree, assignments: *mut u32, data: *const u8, num_data: VlSize);
        fn vl_hikm_get_ndims(tree: *const VlHIKMTree) -> VlSize;
        fn vl_hikm_get_K(tree: *const VlHIKMTree) -> VlSize;
        fn vl_hikm_get_depth(tree: *const VlHIKMTree) -> VlSize;
        fn vl_hikm_get_verbosity(tree: *const VlHIKMTree) -> c_int;
        fn vl_hikm_get_max_niters(tree: *const VlHIKMTree) -> VlSize;
        fn vl_hikm_set_verbosity(tree: *mut VlHIKMTree, verbosity: c_int);
        fn vl_hikm_set_max_niters(tree: *mut VlHIKMTree, max_niters: c_int);
    }
}

unsafe impl ForeignResource for VlHIKMTree {
    type Api = HikmApi;
    const KIND: &'static str = "hikmeans";

    unsafe fn destroy(api: &HikmApi, raw: *mut Self) {
        unsafe { (api.vl_hikm_delete)(raw) };
    }

    unsafe fn apply_verbosity(api: &HikmApi, raw: *mut Self, level: i32) {
        unsafe { (api.vl_hikm_set_verbosity)(raw, level) };
    }
}

/// A hierarchical k-means tree.
#[derive(Debug)]
pub struct HIKMeans {
    handle: ForeignHandle<VlHIKMTree>,
    algorithm: IkmAlgorithm,
    trained: bool,
}

impl HIKMeans {
    /// Create an empty tree whose nodes are trained with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot create
    /// the tree.
    pub fn new(engine: &'static Engine, algorithm: IkmAlgorithm) -> FfiResult<Self> {
        // SAFETY: `vl_hikm_new` returns a fresh tree or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.hikm, engine.handle_config(), |api: &'static HikmApi| (api.vl_hikm_new)(algorithm.raw()))?
        };
        Ok(Self {
            handle,
            algorithm,
            trained: false,
        })
    }

    /// The node training algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> IkmAlgorithm {
        self.algorithm
    }

    /// Shape the tree for `dimension`-byte points, `k` children per node
    /// and `depth` levels. Discards any previous training.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if any argument is zero.
    pub fn init(&mut self, dimension: usize, k: usize, depth: usize) -> FfiResult<()> {
        if dimension == 0 || k == 0 || depth == 0 {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot build a tree of dimension {dimension}, branching {k}, depth {depth}"
            )));
        }
        self.trained = false;
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_hikm_init)(self.handle.as_mut_ptr(), dimension, k, depth) };
        Ok(())
    }

    /// Train every node of the tree on `data`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before [`HIKMeans::init`],
    /// [`FfiError::SizeMismatch`] if `data` is not a whole number of rows
    /// and [`FfiError::UnsupportedInput`] if there are fewer points than
    /// children per node.
    pub fn train(&mut self, data: &[u8]) -> FfiResult<()> {
        let dimension = self.require_init()?;
        let num_data = rows(dimension, data.len())?;
        let k = self.k();
        if num_data < k {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot train {k} children from {num_data} points"
            )));
        }
        tracing::debug!(dimension, num_data, k, depth = self.depth(), "hikmeans train");
        self.trained = false;
        // SAFETY: `data` holds `num_data` rows of the tree's dimension.
        unsafe { (self.handle.api().vl_hikm_train)(self.handle.as_mut_ptr(), data.as_ptr(), num_data) };
        self.trained = true;
        Ok(())
    }

    /// Path of every point of `data` through the tree: `depth` child
    /// indices per point, root first.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before [`HIKMeans::train`]
    /// and [`FfiError::SizeMismatch`] if `data` is not a whole number of
    /// rows.
    pub fn push(&mut self, data: &[u8]) -> FfiResult<Vec<u32>> {
        let dimension = self.require_init()?;
        if !self.trained {
            return Err(FfiError::InvalidHandleState {
                resource: VlHIKMTree::KIND,
                reason: "tree is not trained".to_string(),
            });
        }
        let num_data = rows(dimension, data.len())?;
        let mut assignments = vec![0u32; element_count(&[num_data, self.depth()])?];
        // SAFETY: `assignments` holds `depth` slots per point.
        unsafe {
            (self.handle.api().vl_hikm_push)(self.handle.as_mut_ptr(), assignments.as_mut_ptr(), data.as_ptr(), num_data);
        }
        Ok(assignments)
    }

    /// Whether [`HIKMeans::train`] has completed since the last
    /// [`HIKMeans::init`].
    #[must_use]
    pub const fn is_trained(&self) -> bool {
        self.trained
    }

    /// Diagnostic level reported by the engine object.
    #[must_use]
    pub fn verbosity(&self) -> i32 {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_hikm_get_verbosity)(self.handle.as_ptr()) }
    }

    /// Change the diagnostic level of this object.
    pub fn set_verbosity(&mut self, level: i32) {
        self.handle.set_verbosity(level);
    }

    /// Iteration cap for training each node.
    #[must_use]
    pub fn max_niters(&self) -> usize {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_hikm_get_max_niters)(self.handle.as_ptr()) }
    }

    /// Set [`HIKMeans::max_niters`].
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `max_niters` does not fit
    /// the engine's `int`.
    pub fn set_max_niters(&mut self, max_niters: usize) -> FfiResult<()> {
        let value = c_int::try_from(max_niters)
            .map_err(|_| FfiError::UnsupportedInput(format!("{max_niters} iterations is too many")))?;
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_hikm_set_max_niters)(self.handle.as_mut_ptr(), value) };
        Ok(())
    }

    engine_getters! {
        /// Dimension of the points; zero before [`HIKMeans::init`].
        ndims: VlSize => vl_hikm_get_ndims;
        /// Children per node.
        k: VlSize => vl_hikm_get_K;
        /// Number of levels.
        depth: VlSize => vl_hikm_get_depth;
    }

    fn require_init(&self) -> FfiResult<usize> {
        match self.ndims() {
            0 => Err(FfiError::InvalidHandleState {
                resource: VlHIKMTree::KIND,
                reason: "call init first".to_string(),
            }),
            dimension => Ok(dimension),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Four one-dimensional groups of two points.
    fn data() -> Vec<u8> {
        vec![0, 2, 60, 62, 120, 122, 250, 252]
    }

    #[test]
    fn test_lifecycle_order_is_enforced() {
        let mut tree = HIKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        assert!(matches!(tree.train(&data()), Err(FfiError::InvalidHandleState { .. })));
        tree.init(1, 2, 2).unwrap();
        assert!(matches!(tree.push(&data()), Err(FfiError::InvalidHandleState { .. })));
        tree.train(&data()).unwrap();
        assert!(tree.is_trained());
        tree.init(1, 2, 2).unwrap();
        assert!(!tree.is_trained());
    }

    #[test]
    fn test_push_returns_one_path_per_point() {
        let mut tree = HIKMeans::new(Engine::mock(), IkmAlgorithm::Elkan).unwrap();
        tree.init(1, 2, 2).unwrap();
        tree.train(&data()).unwrap();
        assert_eq!((tree.ndims(), tree.k(), tree.depth()), (1, 2, 2));

        let paths = tree.push(&[1, 61, 121, 251]).unwrap();
        assert_eq!(paths.len(), 4 * 2);
        let leaves: Vec<&[u32]> = paths.chunks(2).collect();
        assert_eq!(leaves[0][0], leaves[1][0]);
        assert_ne!(leaves[0][1], leaves[1][1]);
        assert_ne!(leaves[1][0], leaves[2][0]);
        assert_eq!(leaves[2][0], leaves[3][0]);
    }

    #[test]
    fn test_init_and_train_validate() {
        let mut tree = HIKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        assert!(matches!(tree.init(1, 0, 2), Err(FfiError::UnsupportedInput(_))));
        tree.init(2, 3, 1).unwrap();
        assert!(matches!(tree.train(&[1, 2, 3]), Err(FfiError::SizeMismatch { .. })));
        assert!(matches!(tree.train(&[1, 2, 3, 4]), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_settings() {
        let mut tree = HIKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        tree.set_max_niters(12).unwrap();
        assert_eq!(tree.max_niters(), 12);
        assert!(matches!(tree.set_max_niters(usize::MAX), Err(FfiError::UnsupportedInput(_))));
        tree.set_verbosity(1);
        assert_eq!(tree.verbosity(), 1);
        assert_eq!(tree.algorithm(), IkmAlgorithm::Lloyd);
    }
}
