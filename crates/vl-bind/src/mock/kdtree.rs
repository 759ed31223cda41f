//! Mock `vl_kdforest_*`: exhaustive search over a copy of the data.

use super::{alloc, free, object, read_f64, sq_distance, write_slice};
use crate::kdtree::{KdForestApi, Neighbor, VlKDForest, VlKDForestSearcher};
use crate::sys::{VlSize, VlType, VlUIndex};
use std::ffi::{c_int, c_void};
use vl_ffi::TypeTag;

struct MockForest {
    data_type: TypeTag,
    dimension: VlSize,
    num_trees: VlSize,
    data: Vec<f64>,
    max_num_comparisons: VlSize,
    thresholding: c_int,
}

impl MockForest {
    fn num_data(&self) -> usize {
        self.data.len() / self.dimension
    }

    unsafe fn query(&self, neighbors: *mut Neighbor, num_neighbors: VlSize, query: *const c_void) -> VlSize {
        let point = unsafe { read_f64(query, self.dimension, self.data_type) };
        let mut found: Vec<Neighbor> = self
            .data
            .chunks(self.dimension)
            .enumerate()
            .map(|(index, row)| Neighbor {
                distance: sq_distance(&point, row),
                index,
            })
            .collect();
        found.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        found.truncate(num_neighbors);
        unsafe { write_slice(neighbors, &found) };
        self.num_data()
    }
}

struct MockSearcher {
    forest: *const VlKDForest,
}

fn forest<'a>(raw: *const VlKDForest) -> &'a mut MockForest {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(data_type: VlType, dimension: VlSize, num_trees: VlSize, _distance: c_int) -> *mut VlKDForest {
    let Ok(data_type) = TypeTag::from_id(data_type) else {
        return std::ptr::null_mut();
    };
    alloc(
        "kdforest",
        MockForest {
            data_type,
            dimension,
            num_trees,
            data: Vec::new(),
            max_num_comparisons: 0,
            thresholding: 0,
        },
    )
}

unsafe extern "C" fn new_searcher(raw: *mut VlKDForest) -> *mut VlKDForestSearcher {
    alloc("kdforest searcher", MockSearcher { forest: raw })
}

unsafe extern "C" fn delete(raw: *mut VlKDForest) {
    unsafe { free::<MockForest, _>(raw) };
}

unsafe extern "C" fn searcher_delete(raw: *mut VlKDForestSearcher) {
    unsafe { free::<MockSearcher, _>(raw) };
}

unsafe extern "C" fn build(raw: *mut VlKDForest, num_data: VlSize, data: *const c_void) {
    let forest = forest(raw);
    forest.data = unsafe { read_f64(data, num_data * forest.dimension, forest.data_type) };
}

unsafe extern "C" fn query(raw: *mut VlKDForest, neighbors: *mut Neighbor, num_neighbors: VlSize, point: *const c_void) -> VlSize {
    unsafe { forest(raw).query(neighbors, num_neighbors, point) }
}

unsafe extern "C" fn searcher_query(
    raw: *mut VlKDForestSearcher,
    neighbors: *mut Neighbor,
    num_neighbors: VlSize,
    point: *const c_void,
) -> VlSize {
    let searcher = unsafe { object::<MockSearcher, _>(raw) };
    unsafe { forest(searcher.forest).query(neighbors, num_neighbors, point) }
}

unsafe extern "C" fn get_depth_of_tree(raw: *const VlKDForest, _tree_index: VlUIndex) -> VlSize {
    let num_data = forest(raw).num_data();
    (usize::BITS - num_data.leading_zeros()) as VlSize
}

unsafe extern "C" fn get_num_nodes_of_tree(raw: *const VlKDForest, _tree_index: VlUIndex) -> VlSize {
    (2 * forest(raw).num_data()).saturating_sub(1)
}

unsafe extern "C" fn get_num_trees(raw: *const VlKDForest) -> VlSize {
    forest(raw).num_trees
}

unsafe extern "C" fn get_data_dimension(raw: *const VlKDForest) -> VlSize {
    forest(raw).dimension
}

unsafe extern "C" fn get_data_type(raw: *const VlKDForest) -> VlType {
    forest(raw).data_type.id()
}

unsafe extern "C" fn get_max_num_comparisons(raw: *const VlKDForest) -> VlSize {
    forest(raw).max_num_comparisons
}

unsafe extern "C" fn set_max_num_comparisons(raw: *mut VlKDForest, n: VlSize) {
    forest(raw).max_num_comparisons = n;
}

unsafe extern "C" fn get_thresholding_method(raw: *const VlKDForest) -> c_int {
    forest(raw).thresholding
}

unsafe extern "C" fn set_thresholding_method(raw: *mut VlKDForest, method: c_int) {
    forest(raw).thresholding = method;
}

pub(crate) const API: KdForestApi = KdForestApi {
    vl_kdforest_new: new,
    vl_kdforest_new_searcher: new_searcher,
    vl_kdforest_delete: delete,
    vl_kdforestsearcher_delete: searcher_delete,
    vl_kdforest_build: build,
    vl_kdforest_query: query,
    vl_kdforestsearcher_query: searcher_query,
    vl_kdforest_get_depth_of_tree: get_depth_of_tree,
    vl_kdforest_get_num_nodes_of_tree: get_num_nodes_of_tree,
    vl_kdforest_get_num_trees: get_num_trees,
    vl_kdforest_get_data_dimension: get_data_dimension,
    vl_kdforest_get_data_type: get_data_type,
    vl_kdforest_get_max_num_comparisons: get_max_num_comparisons,
    vl_kdforest_set_max_num_comparisons: set_max_num_comparisons,
    vl_kdforest_get_thresholding_method: get_thresholding_method,
    vl_kdforest_set_thresholding_method: set_thresholding_method,
};
