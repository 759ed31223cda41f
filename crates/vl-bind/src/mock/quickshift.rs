//! Mock `vl_quickshift_*`: brute-force Parzen density and nearest
//! denser neighbour, reading the caller's image at process time.

use super::{alloc, free, object, read_vec, sq_distance};
use crate::quickshift::{QuickShiftApi, VlQS};
use crate::sys::VlBool;
use std::ffi::c_int;

struct MockQuickShift {
    image: *const f64,
    height: usize,
    width: usize,
    channels: usize,
    max_dist: f64,
    kernel_size: f64,
    medoid: VlBool,
    parents: Vec<c_int>,
    dists: Vec<f64>,
    density: Vec<f64>,
}

fn get<'a>(raw: *const VlQS) -> &'a mut MockQuickShift {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(image: *const f64, height: c_int, width: c_int, channels: c_int) -> *mut VlQS {
    let height = usize::try_from(height).unwrap_or(0);
    let width = usize::try_from(width).unwrap_or(0);
    let channels = usize::try_from(channels).unwrap_or(0);
    let pixels = height * width;
    alloc(
        "quickshift",
        MockQuickShift {
            image,
            height,
            width,
            channels,
            max_dist: 3.0 * 2.0,
            kernel_size: 2.0,
            medoid: 0,
            parents: vec![0; pixels],
            dists: vec![0.0; pixels],
            density: vec![0.0; pixels],
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlQS) {
    unsafe { free::<MockQuickShift, _>(raw) };
}

unsafe extern "C" fn process(raw: *mut VlQS) {
    let qs = get(raw);
    let pixels = qs.height * qs.width;
    let image = unsafe { read_vec(qs.image, pixels * qs.channels) };

    // Joint spatial and feature coordinates of every pixel.
    let points: Vec<Vec<f64>> = (0..pixels)
        .map(|i| {
            let mut point = vec![(i % qs.height) as f64, (i / qs.height) as f64];
            point.extend((0..qs.channels).map(|k| image[i + k * pixels]));
            point
        })
        .collect();
    let two_sigma_sq = 2.0 * qs.kernel_size * qs.kernel_size;
    qs.density = points
        .iter()
        .map(|p| points.iter().map(|q| (-sq_distance(p, q) / two_sigma_sq).exp()).sum())
        .collect();

    let tau_sq = qs.max_dist * qs.max_dist;
    for i in 0..pixels {
        let mut best = (i, f64::INFINITY);
        for j in 0..pixels {
            let d = sq_distance(&points[i], &points[j]);
            if qs.density[j] > qs.density[i] && d <= tau_sq && d < best.1 {
                best = (j, d);
            }
        }
        qs.parents[i] = c_int::try_from(best.0).unwrap_or(c_int::MAX);
        qs.dists[i] = best.1.sqrt();
    }
}

unsafe extern "C" fn get_max_dist(raw: *const VlQS) -> f64 {
    get(raw).max_dist
}

unsafe extern "C" fn set_max_dist(raw: *mut VlQS, value: f64) {
    get(raw).max_dist = value;
}

unsafe extern "C" fn get_kernel_size(raw: *const VlQS) -> f64 {
    get(raw).kernel_size
}

unsafe extern "C" fn set_kernel_size(raw: *mut VlQS, value: f64) {
    get(raw).kernel_size = value;
}

unsafe extern "C" fn get_medoid(raw: *const VlQS) -> VlBool {
    get(raw).medoid
}

unsafe extern "C" fn set_medoid(raw: *mut VlQS, value: VlBool) {
    get(raw).medoid = value;
}

unsafe extern "C" fn get_parents(raw: *const VlQS) -> *mut c_int {
    get(raw).parents.as_mut_ptr()
}

unsafe extern "C" fn get_dists(raw: *const VlQS) -> *mut f64 {
    get(raw).dists.as_mut_ptr()
}

unsafe extern "C" fn get_density(raw: *const VlQS) -> *mut f64 {
    get(raw).density.as_mut_ptr()
}

pub(crate) const API: QuickShiftApi = QuickShiftApi {
    vl_quickshift_new: new,
    vl_quickshift_delete: delete,
    vl_quickshift_process: process,
    vl_quickshift_get_max_dist: get_max_dist,
    vl_quickshift_set_max_dist: set_max_dist,
    vl_quickshift_get_kernel_size: get_kernel_size,
    vl_quickshift_set_kernel_size: set_kernel_size,
    vl_quickshift_get_medoid: get_medoid,
    vl_quickshift_set_medoid: set_medoid,
    vl_quickshift_get_parents: get_parents,
    vl_quickshift_get_dists: get_dists,
    vl_quickshift_get_density: get_density,
};
