//! Mock `vl_ikm_*`: Lloyd iterations with integer means. Random seeding
//! is replaced by evenly spaced centers or the first points.

use super::{alloc, free, object, read_vec, write_slice};
use crate::ikmeans::{IkmApi, VlIKMFilt};
use crate::sys::VlSize;
use std::ffi::c_int;

struct MockIkm {
    dimension: usize,
    k: usize,
    max_niters: VlSize,
    verbosity: c_int,
    centers: Vec<i32>,
}

fn get<'a>(raw: *const VlIKMFilt) -> &'a mut MockIkm {
    unsafe { object(raw) }
}

fn sq_distance(point: &[u8], center: &[i32]) -> i64 {
    point
        .iter()
        .zip(center)
        .map(|(&x, &c)| {
            let d = i64::from(x) - i64::from(c);
            d * d
        })
        .sum()
}

/// Index of the row of `centers` nearest to `point`.
pub(super) fn nearest_center(point: &[u8], centers: &[i32]) -> usize {
    centers
        .chunks(point.len())
        .map(|center| sq_distance(point, center))
        .enumerate()
        .min_by_key(|&(_, d)| d)
        .map_or(0, |(i, _)| i)
}

/// Lloyd iterations on `points`, `dimension` bytes each. Empty clusters
/// keep their center.
pub(super) fn lloyd(points: &[u8], dimension: usize, centers: &mut [i32], max_niters: usize) {
    let k = centers.len() / dimension;
    for _ in 0..max_niters {
        let mut sums = vec![0i64; centers.len()];
        let mut counts = vec![0i64; k];
        for point in points.chunks(dimension) {
            let c = nearest_center(point, centers);
            counts[c] += 1;
            for (sum, &x) in sums[c * dimension..(c + 1) * dimension].iter_mut().zip(point) {
                *sum += i64::from(x);
            }
        }
        let mut changed = false;
        for (i, center) in centers.iter_mut().enumerate() {
            let count = counts[i / dimension];
            if count > 0 {
                let mean = i32::try_from((sums[i] + count / 2) / count).unwrap_or(i32::MAX);
                changed |= mean != *center;
                *center = mean;
            }
        }
        if !changed {
            break;
        }
    }
}

unsafe extern "C" fn new(_method: c_int) -> *mut VlIKMFilt {
    alloc(
        "ikmeans",
        MockIkm {
            dimension: 0,
            k: 0,
            max_niters: 200,
            verbosity: 0,
            centers: Vec::new(),
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlIKMFilt) {
    unsafe { free::<MockIkm, _>(raw) };
}

unsafe extern "C" fn init(raw: *mut VlIKMFilt, centers: *const i32, dimension: VlSize, k: VlSize) {
    let ikm = get(raw);
    ikm.centers = unsafe { read_vec(centers, dimension * k) };
    ikm.dimension = dimension;
    ikm.k = k;
}

unsafe extern "C" fn init_rand(raw: *mut VlIKMFilt, dimension: VlSize, k: VlSize) {
    let ikm = get(raw);
    let step = 255 / i32::try_from(k).unwrap_or(i32::MAX).max(1);
    ikm.centers = (0..k)
        .flat_map(|c| std::iter::repeat(i32::try_from(c).unwrap_or(0) * step).take(dimension))
        .collect();
    ikm.dimension = dimension;
    ikm.k = k;
}

unsafe extern "C" fn init_rand_data(raw: *mut VlIKMFilt, data: *const u8, dimension: VlSize, _num_data: VlSize, k: VlSize) {
    let ikm = get(raw);
    ikm.centers = unsafe { read_vec(data, dimension * k) }.into_iter().map(i32::from).collect();
    ikm.dimension = dimension;
    ikm.k = k;
}

unsafe extern "C" fn train(raw: *mut VlIKMFilt, data: *const u8, num_data: VlSize) -> c_int {
    let ikm = get(raw);
    let points = unsafe { read_vec(data, ikm.dimension * num_data) };
    lloyd(&points, ikm.dimension, &mut ikm.centers, ikm.max_niters);
    0
}

unsafe extern "C" fn push(raw: *const VlIKMFilt, assignments: *mut u32, data: *const u8, num_data: VlSize) {
    let ikm = get(raw);
    let points = unsafe { read_vec(data, ikm.dimension * num_data) };
    let assign: Vec<u32> = points
        .chunks(ikm.dimension)
        .map(|point| u32::try_from(nearest_center(point, &ikm.centers)).unwrap_or(u32::MAX))
        .collect();
    unsafe { write_slice(assignments, &assign) };
}

unsafe extern "C" fn push_one(centers: *const i32, data: *const u8, dimension: VlSize, k: VlSize) -> u32 {
    let centers = unsafe { read_vec(centers, dimension * k) };
    let point = unsafe { read_vec(data, dimension) };
    u32::try_from(nearest_center(&point, &centers)).unwrap_or(u32::MAX)
}

unsafe extern "C" fn get_ndims(raw: *const VlIKMFilt) -> VlSize {
    get(raw).dimension
}

unsafe extern "C" fn get_k(raw: *const VlIKMFilt) -> VlSize {
    get(raw).k
}

unsafe extern "C" fn get_verbosity(raw: *const VlIKMFilt) -> c_int {
    get(raw).verbosity
}

unsafe extern "C" fn get_max_niters(raw: *const VlIKMFilt) -> VlSize {
    get(raw).max_niters
}

unsafe extern "C" fn get_centers(raw: *const VlIKMFilt) -> *const i32 {
    get(raw).centers.as_ptr()
}

unsafe extern "C" fn set_verbosity(raw: *mut VlIKMFilt, verbosity: c_int) {
    get(raw).verbosity = verbosity;
}

unsafe extern "C" fn set_max_niters(raw: *mut VlIKMFilt, max_niters: VlSize) {
    get(raw).max_niters = max_niters;
}

pub(crate) const API: IkmApi = IkmApi {
    vl_ikm_new: new,
    vl_ikm_delete: delete,
    vl_ikm_init: init,
    vl_ikm_init_rand: init_rand,
    vl_ikm_init_rand_data: init_rand_data,
    vl_ikm_train: train,
    vl_ikm_push: push,
    vl_ikm_push_one: push_one,
    vl_ikm_get_ndims: get_ndims,
    vl_ikm_get_K: get_k,
    vl_ikm_get_verbosity: get_verbosity,
    vl_ikm_get_max_niters: get_max_niters,
    vl_ikm_get_centers: get_centers,
    vl_ikm_set_verbosity: set_verbosity,
    vl_ikm_set_max_niters: set_max_niters,
};
