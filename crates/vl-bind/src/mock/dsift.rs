//! Mock `vl_dsift_*`: the grid follows the engine's layout rules; the
//! descriptor of a frame is flat and its norm is the total intensity
//! under the frame.

use super::{alloc, free, object, read_vec};
use crate::dsift::{DsiftApi, DsiftGeometry, DsiftKeypoint, VlDsiftFilter};
use crate::sys::VlBool;
use std::ffi::c_int;

struct MockDsift {
    width: c_int,
    height: c_int,
    step_x: c_int,
    step_y: c_int,
    bounds: [c_int; 4],
    geometry: DsiftGeometry,
    flat_window: VlBool,
    window_size: f64,
    keypoints: Vec<DsiftKeypoint>,
    descriptors: Vec<f32>,
}

impl MockDsift {
    fn num_frames(&self) -> (c_int, c_int) {
        let [min_x, min_y, max_x, max_y] = self.bounds;
        let g = &self.geometry;
        let range_x = max_x - min_x - (g.num_bin_x - 1) * g.bin_size_x;
        let range_y = max_y - min_y - (g.num_bin_y - 1) * g.bin_size_y;
        let frames = |range: c_int, step: c_int| if range >= 0 { range / step + 1 } else { 0 };
        (frames(range_x, self.step_x), frames(range_y, self.step_y))
    }

    fn descriptor_size(&self) -> c_int {
        self.geometry.num_bin_t * self.geometry.num_bin_x * self.geometry.num_bin_y
    }
}

fn get<'a>(raw: *const VlDsiftFilter) -> &'a mut MockDsift {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(width: c_int, height: c_int) -> *mut VlDsiftFilter {
    alloc(
        "dsift",
        MockDsift {
            width,
            height,
            step_x: 5,
            step_y: 5,
            bounds: [0, 0, width - 1, height - 1],
            geometry: DsiftGeometry::default(),
            flat_window: 0,
            window_size: 2.0,
            keypoints: Vec::new(),
            descriptors: Vec::new(),
        },
    )
}

unsafe extern "C" fn new_basic(width: c_int, height: c_int, step: c_int, bin_size: c_int) -> *mut VlDsiftFilter {
    let raw = unsafe { new(width, height) };
    let dsift = get(raw);
    dsift.step_x = step;
    dsift.step_y = step;
    dsift.geometry.bin_size_x = bin_size;
    dsift.geometry.bin_size_y = bin_size;
    raw
}

unsafe extern "C" fn delete(raw: *mut VlDsiftFilter) {
    unsafe { free::<MockDsift, _>(raw) };
}

unsafe extern "C" fn process(raw: *mut VlDsiftFilter, image: *const f32) {
    let dsift = get(raw);
    let width = usize::try_from(dsift.width).unwrap_or(0);
    let height = usize::try_from(dsift.height).unwrap_or(0);
    let image = unsafe { read_vec(image, width * height) };
    let (frames_x, frames_y) = dsift.num_frames();
    let g = dsift.geometry;
    let [min_x, min_y, ..] = dsift.bounds;
    let delta_x = 0.5 * f64::from(g.bin_size_x * (g.num_bin_x - 1));
    let delta_y = 0.5 * f64::from(g.bin_size_y * (g.num_bin_y - 1));
    let size = usize::try_from(dsift.descriptor_size()).unwrap_or(0);

    dsift.keypoints.clear();
    dsift.descriptors.clear();
    for fy in 0..frames_y {
        for fx in 0..frames_x {
            let x0 = min_x + fx * dsift.step_x;
            let y0 = min_y + fy * dsift.step_y;
            let span_x = (g.num_bin_x - 1) * g.bin_size_x;
            let span_y = (g.num_bin_y - 1) * g.bin_size_y;
            let mut norm = 0.0f64;
            for y in y0..=(y0 + span_y).min(dsift.height - 1) {
                for x in x0..=(x0 + span_x).min(dsift.width - 1) {
                    let index = usize::try_from(y).unwrap_or(0) * width + usize::try_from(x).unwrap_or(0);
                    norm += f64::from(image[index].abs());
                }
            }
            dsift.keypoints.push(DsiftKeypoint {
                x: f64::from(x0) + delta_x,
                y: f64::from(y0) + delta_y,
                s: 0.5 * f64::from(g.bin_size_x + g.bin_size_y),
                norm,
            });
            let value = if norm > 0.0 { (size as f32).sqrt().recip() } else { 0.0 };
            dsift.descriptors.extend(std::iter::repeat(value).take(size));
        }
    }
}

unsafe extern "C" fn set_steps(raw: *mut VlDsiftFilter, step_x: c_int, step_y: c_int) {
    let dsift = get(raw);
    dsift.step_x = step_x;
    dsift.step_y = step_y;
}

unsafe extern "C" fn set_bounds(raw: *mut VlDsiftFilter, min_x: c_int, min_y: c_int, max_x: c_int, max_y: c_int) {
    get(raw).bounds = [min_x, min_y, max_x, max_y];
}

unsafe extern "C" fn set_geometry(raw: *mut VlDsiftFilter, geometry: *const DsiftGeometry) {
    // SAFETY: the caller passes a valid record.
    get(raw).geometry = unsafe { *geometry };
}

unsafe extern "C" fn set_flat_window(raw: *mut VlDsiftFilter, flat: VlBool) {
    get(raw).flat_window = flat;
}

unsafe extern "C" fn set_window_size(raw: *mut VlDsiftFilter, size: f64) {
    get(raw).window_size = size;
}

unsafe extern "C" fn get_descriptors(raw: *const VlDsiftFilter) -> *const f32 {
    get(raw).descriptors.as_ptr()
}

unsafe extern "C" fn get_descriptor_size(raw: *const VlDsiftFilter) -> c_int {
    get(raw).descriptor_size()
}

unsafe extern "C" fn get_keypoint_num(raw: *const VlDsiftFilter) -> c_int {
    let (frames_x, frames_y) = get(raw).num_frames();
    frames_x * frames_y
}

unsafe extern "C" fn get_keypoints(raw: *const VlDsiftFilter) -> *const DsiftKeypoint {
    get(raw).keypoints.as_ptr()
}

unsafe extern "C" fn get_bounds(raw: *const VlDsiftFilter, min_x: *mut c_int, min_y: *mut c_int, max_x: *mut c_int, max_y: *mut c_int) {
    let [a, b, c, d] = get(raw).bounds;
    // SAFETY: the caller passes valid output locations.
    unsafe {
        *min_x = a;
        *min_y = b;
        *max_x = c;
        *max_y = d;
    }
}

unsafe extern "C" fn get_steps(raw: *const VlDsiftFilter, step_x: *mut c_int, step_y: *mut c_int) {
    let dsift = get(raw);
    // SAFETY: the caller passes valid output locations.
    unsafe {
        *step_x = dsift.step_x;
        *step_y = dsift.step_y;
    }
}

unsafe extern "C" fn get_geometry(raw: *const VlDsiftFilter) -> *const DsiftGeometry {
    &get(raw).geometry
}

unsafe extern "C" fn get_flat_window(raw: *const VlDsiftFilter) -> VlBool {
    get(raw).flat_window
}

unsafe extern "C" fn get_window_size(raw: *const VlDsiftFilter) -> f64 {
    get(raw).window_size
}

pub(crate) const API: DsiftApi = DsiftApi {
    vl_dsift_new: new,
    vl_dsift_new_basic: new_basic,
    vl_dsift_delete: delete,
    vl_dsift_process: process,
    vl_dsift_set_steps: set_steps,
    vl_dsift_set_bounds: set_bounds,
    vl_dsift_set_geometry: set_geometry,
    vl_dsift_set_flat_window: set_flat_window,
    vl_dsift_set_window_size: set_window_size,
    vl_dsift_get_descriptors: get_descriptors,
    vl_dsift_get_descriptor_size: get_descriptor_size,
    vl_dsift_get_keypoint_num: get_keypoint_num,
    vl_dsift_get_keypoints: get_keypoints,
    vl_dsift_get_bounds: get_bounds,
    vl_dsift_get_steps: get_steps,
    vl_dsift_get_geometry: get_geometry,
    vl_dsift_get_flat_window: get_flat_window,
    vl_dsift_get_window_size: get_window_size,
};
