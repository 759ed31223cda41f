//! Randomized KD-tree forests for approximate nearest-neighbour search.
//!
//! The engine does not copy the indexed points; [`KdForest::build`] keeps
//! its marshalled copy alive inside the binding for as long as the forest
//! exists. A forest can be built once.
//!
//! Creating a [`KdForestSearcher`] registers it with the forest, so it
//! takes the forest by exclusive borrow: the forest cannot be queried,
//! rebuilt or dropped while the searcher is alive. Searchers are used one
//! at a time; drop one before creating the next.

use crate::engine::Engine;
use crate::sys::{VectorComparison, VlSize, VlType, VlUIndex};
use crate::{check_len, require_float, rows};
use serde::{Deserialize, Serialize};
use std::ffi::{c_int, c_void};
use vl_ffi::{
    marshal, Element, FfiError, FfiResult, ForeignBuffer, ForeignHandle, ForeignRecord, ForeignResource,
    RecordLayout, TypeTag,
};

/// Opaque `VlKDForest`.
#[repr(C)]
pub(crate) struct VlKDForest {
    _private: [u8; 0],
}

/// Opaque `VlKDForestSearcher`.
#[repr(C)]
pub(crate) struct VlKDForestSearcher {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_kdforest_*` entry points.
    pub(crate) struct KdForestApi {
        fn vl_kdforest_new(data_type: VlType, dimension: VlSize, num_trees: VlSize, distance: c_int) -> *mut VlKDForest;
        fn vl_kdforest_new_searcher(forest: *mut VlKDForest) -> *mut VlKDForestSearcher;
        fn vl_kdforest_delete(forest: *mut VlKDForest);
        fn vl_kdforestsearcher_delete(searcher: *mut VlKDForestSearcher);
        fn vl_kdforest_build(forest: *mut VlKDForest, num_data: VlSize, data: *const c_void);
        fn vl_kdforest_query(forest: *mut VlKDForest, neighbors: *mut Neighbor, num_neighbors: VlSize, query: *const c_void) -> VlSize;
        fn vl_kdforestsearcher_query(searcher: *mut VlKDForestSearcher, neighbors: *mut Neighbor, num_neighbors: VlSize, query: *const c_void) -> VlSize;
        fn vl_kdforest_get_depth_of_tree(forest: *const VlKDForest, tree_index: VlUIndex) -> VlSize;
        fn vl_kdforest_get_num_nodes_of_tree(forest: *const VlKDForest, tree_index: VlUIndex) -> VlSize;
        fn vl_kdforest_get_num_trees(forest: *const VlKDForest) -> VlSize;
        fn vl_kdforest_get_data_dimension(forest: *const VlKDForest) -> VlSize;
        fn vl_kdforest_get_data_type(forest: *const VlKDForest) -> VlType;
        fn vl_kdforest_get_max_num_comparisons(forest: *const VlKDForest) -> VlSize;
        fn vl_kdforest_set_max_num_comparisons(forest: *mut VlKDForest, n: VlSize);
        fn vl_kdforest_get_thresholding_method(forest: *const VlKDForest) -> c_int;
        fn vl_kdforest_set_thresholding_method(forest: *mut VlKDForest, method: c_int);
    }
}

unsafe impl ForeignResource for VlKDForest {
    type Api = KdForestApi;
    const KIND: &'static str = "kdforest";

    unsafe fn destroy(api: &KdForestApi, raw: *mut Self) {
        unsafe { (api.vl_kdforest_delete)(raw) };
    }
}

unsafe impl ForeignResource for VlKDForestSearcher {
    type Api = KdForestApi;
    const KIND: &'static str = "kdforest searcher";

    unsafe fn destroy(api: &KdForestApi, raw: *mut Self) {
        unsafe { (api.vl_kdforestsearcher_delete)(raw) };
    }
}

engine_enum! {
    /// How split thresholds are chosen (`VlKDTreeThresholdingMethod`).
    pub enum ThresholdingMethod {
        /// Median of the data along the split dimension.
        Median = 0,
        /// Mean of the data along the split dimension.
        Mean = 1,
    }
}

/// One query result (`VlKDForestNeighbor`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Distance to the query point, in the forest's distance.
    pub distance: f64,
    /// Index of the point in the data given to [`KdForest::build`].
    pub index: usize,
}

unsafe impl ForeignRecord for Neighbor {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlKDForestNeighbor",
        fields: &[
            vl_ffi::Field::new("distance", TypeTag::Float64),
            vl_ffi::Field::new("index", TypeTag::INDEX),
        ],
    };
}

/// A forest of randomized KD-trees.
#[derive(Debug)]
pub struct KdForest {
    handle: ForeignHandle<VlKDForest>,
    data_type: TypeTag,
    dimension: usize,
    data: Option<ForeignBuffer>,
}

impl KdForest {
    /// Create an empty forest of `num_trees` trees over `dimension`-sized
    /// points of `data_type`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedType`] unless `data_type` is
    /// floating point, [`FfiError::UnsupportedInput`] if `dimension` or
    /// `num_trees` is zero, and [`FfiError::AllocationFailed`] if the
    /// engine cannot create the forest.
    pub fn new(
        engine: &'static Engine,
        data_type: TypeTag,
        dimension: usize,
        num_trees: usize,
        distance: VectorComparison,
    ) -> FfiResult<Self> {
        require_float(VlKDForest::KIND, data_type)?;
        if dimension == 0 || num_trees == 0 {
            return Err(FfiError::UnsupportedInput(format!(
                "kdforest needs a positive dimension and tree count, got {dimension} and {num_trees}"
            )));
        }
        // SAFETY: `vl_kdforest_new` returns a fresh forest or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.kdforest, engine.handle_config(), |api: &'static KdForestApi| {
                (api.vl_kdforest_new)(data_type.id(), dimension, num_trees, distance.raw())
            })?
        };
        Ok(Self {
            handle,
            data_type,
            dimension,
            data: None,
        })
    }

    /// Index `data`, row-major with `data_dimension()` values per point.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if the forest is already
    /// built, [`FfiError::SizeMismatch`] if `data` is not a whole number
    /// of points and [`FfiError::UnsupportedInput`] if it is empty.
    pub fn build<T: Element>(&mut self, data: &[T]) -> FfiResult<()> {
        if self.is_built() {
            return Err(FfiError::InvalidHandleState {
                resource: VlKDForest::KIND,
                reason: "forest is already built".to_string(),
            });
        }
        let num_data = rows(self.dimension, data.len())?;
        if num_data == 0 {
            return Err(FfiError::UnsupportedInput("cannot build a forest from no points".to_string()));
        }
        tracing::debug!(num_data, dimension = self.dimension, "building kdforest");
        // The engine keeps pointing into this buffer; it moves into `self`
        // without reallocating.
        let buffer = self.data.insert(marshal::to_foreign(data, self.data_type));
        let ptr = buffer.as_ptr();
        // SAFETY: `ptr` addresses `num_data` points and lives as long as
        // the forest.
        unsafe { (self.handle.api().vl_kdforest_build)(self.handle.as_mut_ptr(), num_data, ptr) };
        Ok(())
    }

    /// Whether [`KdForest::build`] has been called.
    #[must_use]
    pub const fn is_built(&self) -> bool {
        self.data.is_some()
    }

    /// Number of indexed points; 0 before the forest is built.
    #[must_use]
    pub fn num_data(&self) -> usize {
        self.data.as_ref().map_or(0, |data| data.len() / self.dimension)
    }

    /// Find the `num_neighbors` nearest points to `query`.
    ///
    /// Returns the number of distance comparisons made and the
    /// neighbours, nearest first. Fewer than `num_neighbors` are returned
    /// when the forest holds fewer points.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before the forest is
    /// built, [`FfiError::SizeMismatch`] if `query` is not one point and
    /// [`FfiError::UnsupportedInput`] if `num_neighbors` is zero.
    pub fn query<T: Element>(&mut self, num_neighbors: usize, query: &[T]) -> FfiResult<(usize, Vec<Neighbor>)> {
        let (point, mut neighbors) = self.prepare_query(num_neighbors, query)?;
        // SAFETY: `neighbors` holds `num_neighbors` records and `point`
        // one point of the forest's data type.
        let comparisons = unsafe {
            (self.handle.api().vl_kdforest_query)(
                self.handle.as_mut_ptr(),
                neighbors.as_mut_ptr(),
                num_neighbors,
                point.as_ptr(),
            )
        };
        neighbors.truncate(self.num_data());
        Ok((comparisons, neighbors))
    }

    /// Create a searcher with its own query state.
    ///
    /// The forest stays exclusively borrowed until the searcher is dropped:
    ///
    /// ```compile_fail
    /// # use vl_bind::{Engine, KdForest, TypeTag, VectorComparison};
    /// let mut forest = KdForest::new(Engine::mock(), TypeTag::Float64, 1, 1, VectorComparison::DistanceL2).unwrap();
    /// forest.build(&[1.0f64, 2.0]).unwrap();
    /// let first = forest.new_searcher().unwrap();
    /// let second = forest.new_searcher().unwrap();
    /// drop((first, second));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before the forest is built
    /// and [`FfiError::AllocationFailed`] if the engine cannot create the
    /// searcher.
    pub fn new_searcher(&mut self) -> FfiResult<KdForestSearcher<'_>> {
        self.require_built()?;
        let forest = self.handle.as_mut_ptr();
        // SAFETY: `vl_kdforest_new_searcher` registers a fresh searcher
        // with the forest or returns null; the searcher cannot outlive the
        // borrow of `self`.
        let handle = unsafe {
            ForeignHandle::create(self.handle.api(), self.handle.config(), |api: &'static KdForestApi| {
                (api.vl_kdforest_new_searcher)(forest)
            })?
        };
        Ok(KdForestSearcher { handle, forest: self })
    }

    /// Depth of tree `tree_index`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before the forest is built
    /// and [`FfiError::UnsupportedInput`] if there is no such tree.
    pub fn depth_of_tree(&self, tree_index: usize) -> FfiResult<usize> {
        self.check_tree(tree_index)?;
        // SAFETY: the forest is built and `tree_index` is in range.
        Ok(unsafe { (self.handle.api().vl_kdforest_get_depth_of_tree)(self.handle.as_ptr(), tree_index) })
    }

    /// Number of nodes of tree `tree_index`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`KdForest::depth_of_tree`].
    pub fn num_nodes_of_tree(&self, tree_index: usize) -> FfiResult<usize> {
        self.check_tree(tree_index)?;
        // SAFETY: the forest is built and `tree_index` is in range.
        Ok(unsafe { (self.handle.api().vl_kdforest_get_num_nodes_of_tree)(self.handle.as_ptr(), tree_index) })
    }

    /// Data type reported by the engine.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedType`] if the engine reports an
    /// unknown type id.
    pub fn data_type(&self) -> FfiResult<TypeTag> {
        // SAFETY: the handle is live.
        TypeTag::from_id(unsafe { (self.handle.api().vl_kdforest_get_data_type)(self.handle.as_ptr()) })
    }

    /// Split threshold selection.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::Engine`] if the engine reports an unknown value.
    pub fn thresholding_method(&self) -> FfiResult<ThresholdingMethod> {
        // SAFETY: the handle is live.
        let raw = unsafe { (self.handle.api().vl_kdforest_get_thresholding_method)(self.handle.as_ptr()) };
        ThresholdingMethod::from_raw("vl_kdforest_get_thresholding_method", raw)
    }

    /// Select the split threshold used by the next build.
    pub fn set_thresholding_method(&mut self, method: ThresholdingMethod) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_kdforest_set_thresholding_method)(self.handle.as_mut_ptr(), method.raw()) };
    }

    engine_accessors! {
        /// Comparison budget of a query; 0 means exact search.
        max_num_comparisons, set_max_num_comparisons: usize => vl_kdforest_get_max_num_comparisons, vl_kdforest_set_max_num_comparisons;
    }

    engine_getters! {
        /// Number of trees.
        num_trees: usize => vl_kdforest_get_num_trees;
        /// Dimension of the indexed points.
        data_dimension: usize => vl_kdforest_get_data_dimension;
    }

    fn require_built(&self) -> FfiResult<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(FfiError::InvalidHandleState {
                resource: VlKDForest::KIND,
                reason: "forest is not built; call build first".to_string(),
            })
        }
    }

    fn check_tree(&self, tree_index: usize) -> FfiResult<()> {
        self.require_built()?;
        let num_trees = self.num_trees();
        if tree_index >= num_trees {
            return Err(FfiError::UnsupportedInput(format!(
                "tree {tree_index} out of range for a forest of {num_trees} trees"
            )));
        }
        Ok(())
    }

    fn prepare_query<T: Element>(&self, num_neighbors: usize, query: &[T]) -> FfiResult<(ForeignBuffer, Vec<Neighbor>)> {
        self.require_built()?;
        check_len(self.dimension, query.len())?;
        if num_neighbors == 0 {
            return Err(FfiError::UnsupportedInput("num_neighbors must be positive".to_string()));
        }
        Ok((
            marshal::to_foreign(query, self.data_type),
            vec![Neighbor::default(); num_neighbors],
        ))
    }
}

/// An independent query cursor over a built [`KdForest`].
#[derive(Debug)]
pub struct KdForestSearcher<'f> {
    handle: ForeignHandle<VlKDForestSearcher>,
    forest: &'f mut KdForest,
}

impl KdForestSearcher<'_> {
    /// Same as [`KdForest::query`], using this searcher's state.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `query` is not one point and
    /// [`FfiError::UnsupportedInput`] if `num_neighbors` is zero.
    pub fn query<T: Element>(&mut self, num_neighbors: usize, query: &[T]) -> FfiResult<(usize, Vec<Neighbor>)> {
        let (point, mut neighbors) = self.forest.prepare_query(num_neighbors, query)?;
        // SAFETY: as in `KdForest::query`; the forest outlives `self`.
        let comparisons = unsafe {
            (self.handle.api().vl_kdforestsearcher_query)(
                self.handle.as_mut_ptr(),
                neighbors.as_mut_ptr(),
                num_neighbors,
                point.as_ptr(),
            )
        };
        neighbors.truncate(self.forest.num_data());
        Ok((comparisons, neighbors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    fn grid() -> Vec<f32> {
        // 3x3 grid of 2-D points
        (0..9).flat_map(|i| [(i % 3) as f32, (i / 3) as f32]).collect()
    }

    fn forest() -> KdForest {
        KdForest::new(Engine::mock(), TypeTag::Float32, 2, 2, VectorComparison::DistanceL2).unwrap()
    }

    #[test]
    fn test_new_validates_arguments() {
        let engine = Engine::mock();
        assert!(matches!(
            KdForest::new(engine, TypeTag::Int32, 2, 1, VectorComparison::DistanceL2),
            Err(FfiError::UnsupportedType(_))
        ));
        assert!(matches!(
            KdForest::new(engine, TypeTag::Float64, 0, 1, VectorComparison::DistanceL2),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_query_before_build_is_invalid_state() {
        let mut forest = forest();
        assert!(matches!(forest.query(1, &[0.0f32, 0.0]), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(forest.new_searcher(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(forest.depth_of_tree(0), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_build_uses_number_of_points() {
        let mut forest = forest();
        forest.build(&grid()).unwrap();
        assert!(forest.is_built());
        assert_eq!(forest.num_data(), 9);
        assert_eq!(forest.num_nodes_of_tree(0).unwrap(), 17);
        assert!(forest.depth_of_tree(1).unwrap() > 0);
        assert!(forest.depth_of_tree(2).is_err());
        assert!(matches!(forest.build(&grid()), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_query_returns_nearest_first() {
        let mut forest = forest();
        forest.build(&grid()).unwrap();
        let (comparisons, neighbors) = forest.query(2, &[2.1f64, 2.0]).unwrap();
        assert!(comparisons > 0);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].index, 8);
        assert!(neighbors[0].distance <= neighbors[1].distance);
    }

    #[test]
    fn test_query_more_neighbors_than_points() {
        let mut forest = forest();
        forest.build(&[0.0f32, 0.0, 1.0, 1.0]).unwrap();
        let (_, neighbors) = forest.query(5, &[0.0f32, 0.0]).unwrap();
        assert_eq!(neighbors.len(), 2);
    }

    #[test]
    fn test_query_validates_point() {
        let mut forest = forest();
        forest.build(&grid()).unwrap();
        assert!(matches!(forest.query(1, &[1.0f32]), Err(FfiError::SizeMismatch { .. })));
        assert!(matches!(forest.query(0, &[1.0f32, 1.0]), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_searcher_matches_forest() {
        let mut forest = forest();
        forest.build(&grid()).unwrap();
        let (_, expected) = forest.query(3, &[0.2f32, 0.9]).unwrap();
        let before = mock::live_objects_of(VlKDForestSearcher::KIND);
        let mut searcher = forest.new_searcher().unwrap();
        assert_eq!(mock::live_objects_of(VlKDForestSearcher::KIND), before + 1);
        let (_, found) = searcher.query(3, &[0.2f32, 0.9]).unwrap();
        assert_eq!(found, expected);
        drop(searcher);
        assert_eq!(mock::live_objects_of(VlKDForestSearcher::KIND), before);
    }

    #[test]
    fn test_settings() {
        let mut forest = forest();
        forest.set_max_num_comparisons(32);
        forest.set_thresholding_method(ThresholdingMethod::Mean);
        assert_eq!(forest.max_num_comparisons(), 32);
        assert_eq!(forest.thresholding_method().unwrap(), ThresholdingMethod::Mean);
        assert_eq!(forest.num_trees(), 2);
        assert_eq!(forest.data_dimension(), 2);
        assert_eq!(forest.data_type().unwrap(), TypeTag::Float32);
    }

    #[test]
    fn test_neighbor_layout() {
        assert!(Neighbor::LAYOUT.packed_size() <= std::mem::size_of::<Neighbor>());
        assert_eq!(Neighbor::LAYOUT.field_names().collect::<Vec<_>>(), ["distance", "index"]);
    }
}
