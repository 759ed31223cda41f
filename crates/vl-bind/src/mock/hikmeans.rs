//! Mock `vl_hikm_*`: every node runs the integer k-means mock on the
//! points routed to it, seeded with the first of them.

use super::ikmeans::{lloyd, nearest_center};
use super::{alloc, free, object, read_vec, write_slice};
use crate::hikmeans::{HikmApi, VlHIKMTree};
use crate::sys::VlSize;
use std::ffi::c_int;

struct Node {
    centers: Vec<i32>,
    children: Vec<Node>,
}

struct MockHikm {
    dimension: usize,
    k: usize,
    depth: usize,
    max_niters: c_int,
    verbosity: c_int,
    root: Option<Node>,
}

impl MockHikm {
    fn build(&self, points: &[u8], level: usize) -> Node {
        let available = points.len() / self.dimension;
        let mut centers = Vec::with_capacity(self.k * self.dimension);
        for c in 0..self.k {
            let row = c.min(available.saturating_sub(1)) * self.dimension;
            centers.extend(points[row..row + self.dimension].iter().map(|&x| i32::from(x)));
        }
        lloyd(points, self.dimension, &mut centers, usize::try_from(self.max_niters).unwrap_or(0));
        let children = if level + 1 == self.depth {
            Vec::new()
        } else {
            (0..self.k)
                .map(|c| {
                    let routed: Vec<u8> = points
                        .chunks(self.dimension)
                        .filter(|point| nearest_center(point, &centers) == c)
                        .flatten()
                        .copied()
                        .collect();
                    if routed.is_empty() {
                        let center: Vec<u8> = centers[c * self.dimension..(c + 1) * self.dimension]
                            .iter()
                            .map(|&x| u8::try_from(x.clamp(0, 255)).unwrap_or(0))
                            .collect();
                        self.build(&center, level + 1)
                    } else {
                        self.build(&routed, level + 1)
                    }
                })
                .collect()
        };
        Node { centers, children }
    }
}

fn get<'a>(raw: *const VlHIKMTree) -> &'a mut MockHikm {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(_method: c_int) -> *mut VlHIKMTree {
    alloc(
        "hikmeans",
        MockHikm {
            dimension: 0,
            k: 0,
            depth: 0,
            max_niters: 200,
            verbosity: 0,
            root: None,
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlHIKMTree) {
    unsafe { free::<MockHikm, _>(raw) };
}

unsafe extern "C" fn init(raw: *mut VlHIKMTree, dimension: VlSize, k: VlSize, depth: VlSize) {
    let tree = get(raw);
    tree.dimension = dimension;
    tree.k = k;
    tree.depth = depth;
    tree.root = None;
}

unsafe extern "C" fn train(raw: *mut VlHIKMTree, data: *const u8, num_data: VlSize) {
    let tree = get(raw);
    let points = unsafe { read_vec(data, tree.dimension * num_data) };
    tree.root = Some(tree.build(&points, 0));
}

unsafe extern "C" fn push(raw: *mut VlHIKMTree, assignments: *mut u32, data: *const u8, num_data: VlSize) {
    let tree = get(raw);
    let Some(root) = tree.root.as_ref() else {
        return;
    };
    let points = unsafe { read_vec(data, tree.dimension * num_data) };
    let mut paths = Vec::with_capacity(num_data * tree.depth);
    for point in points.chunks(tree.dimension) {
        let mut node = root;
        loop {
            let c = nearest_center(point, &node.centers);
            paths.push(u32::try_from(c).unwrap_or(u32::MAX));
            match node.children.get(c) {
                Some(child) => node = child,
                None => break,
            }
        }
    }
    unsafe { write_slice(assignments, &paths) };
}

unsafe extern "C" fn get_ndims(raw: *const VlHIKMTree) -> VlSize {
    get(raw).dimension
}

unsafe extern "C" fn get_k(raw: *const VlHIKMTree) -> VlSize {
    get(raw).k
}

unsafe extern "C" fn get_depth(raw: *const VlHIKMTree) -> VlSize {
    get(raw).depth
}

unsafe extern "C" fn get_verbosity(raw: *const VlHIKMTree) -> c_int {
    get(raw).verbosity
}

unsafe extern "C" fn get_max_niters(raw: *const VlHIKMTree) -> VlSize {
    usize::try_from(get(raw).max_niters).unwrap_or(0)
}

unsafe extern "C" fn set_verbosity(raw: *mut VlHIKMTree, verbosity: c_int) {
    get(raw).verbosity = verbosity;
}

unsafe extern "C" fn set_max_niters(raw: *mut VlHIKMTree, max_niters: c_int) {
    get(raw).max_niters = max_niters;
}

pub(crate) const API: HikmApi = HikmApi {
    vl_hikm_new: new,
    vl_hikm_delete: delete,
    vl_hikm_init: init,
    vl_hikm_train: train,
    vl_hikm_push: push,
    vl_hikm_get_ndims: get_ndims,
    vl_hikm_get_K: get_k,
    vl_hikm_get_depth: get_depth,
    vl_hikm_get_verbosity: get_verbosity,
    vl_hikm_get_max_niters: get_max_niters,
    vl_hikm_set_verbosity: set_verbosity,
    vl_hikm_set_max_niters: set_max_niters,
};
