//! Mock `vl_sift_*`: octaves are strided copies of the image and every
//! pixel above the peak threshold is a keypoint. Images with non-finite
//! pixels are rejected with `VL_ERR_BADARG`.

use super::{alloc, free, object, read_vec, write_slice};
use crate::sift::{SiftApi, SiftKeypoint, VlSiftFilt, SIFT_DESCRIPTOR_SIZE};
use crate::sys::{VL_ERR_BADARG, VL_ERR_EOF, VL_ERR_OK};
use std::ffi::c_int;

const SIGMA0: f64 = 1.6;

struct MockSift {
    image: Vec<f32>,
    width: usize,
    height: usize,
    noctaves: c_int,
    nlevels: c_int,
    o_min: c_int,
    octave_index: c_int,
    octave_image: Vec<f32>,
    octave_width: usize,
    octave_height: usize,
    keypoints: Vec<SiftKeypoint>,
    peak_thresh: f64,
    edge_thresh: f64,
    norm_thresh: f64,
    magnif: f64,
    window_size: f64,
}

/// Image size at octave `o`.
fn octave_size(size: usize, o: c_int) -> usize {
    let shift = o.unsigned_abs();
    if o >= 0 {
        (size >> shift).max(1)
    } else {
        size << shift
    }
}

/// Sampling step of octave `o` in image pixels.
fn octave_step(o: c_int) -> f64 {
    2f64.powi(o)
}

impl MockSift {
    fn load_octave(&mut self, o: c_int) {
        self.octave_index = o;
        self.octave_width = octave_size(self.width, o);
        self.octave_height = octave_size(self.height, o);
        let step = octave_step(o);
        self.octave_image = (0..self.octave_height)
            .flat_map(|row| (0..self.octave_width).map(move |col| (row, col)))
            .map(|(row, col)| {
                let r = ((row as f64 * step) as usize).min(self.height - 1);
                let c = ((col as f64 * step) as usize).min(self.width - 1);
                self.image[r * self.width + c]
            })
            .collect();
        self.keypoints.clear();
    }
}

fn get<'a>(raw: *const VlSiftFilt) -> &'a mut MockSift {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(width: c_int, height: c_int, noctaves: c_int, nlevels: c_int, o_min: c_int) -> *mut VlSiftFilt {
    let width = usize::try_from(width).unwrap_or(0);
    let height = usize::try_from(height).unwrap_or(0);
    let noctaves = if noctaves < 0 {
        let mut side = octave_size(width.min(height), o_min);
        let mut count = 0;
        while side >= 8 {
            count += 1;
            side /= 2;
        }
        count.max(1)
    } else {
        noctaves
    };
    alloc(
        "sift",
        MockSift {
            image: Vec::new(),
            width,
            height,
            noctaves,
            nlevels,
            o_min,
            octave_index: o_min,
            octave_image: Vec::new(),
            octave_width: octave_size(width, o_min),
            octave_height: octave_size(height, o_min),
            keypoints: Vec::new(),
            peak_thresh: 0.0,
            edge_thresh: 10.0,
            norm_thresh: f64::NEG_INFINITY,
            magnif: 3.0,
            window_size: 2.0,
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlSiftFilt) {
    unsafe { free::<MockSift, _>(raw) };
}

unsafe extern "C" fn process_first_octave(raw: *mut VlSiftFilt, image: *const f32) -> c_int {
    let sift = get(raw);
    sift.image = unsafe { read_vec(image, sift.width * sift.height) };
    if sift.image.iter().any(|value| !value.is_finite()) {
        return VL_ERR_BADARG;
    }
    if sift.noctaves == 0 {
        return VL_ERR_EOF;
    }
    let o_min = sift.o_min;
    sift.load_octave(o_min);
    VL_ERR_OK
}

unsafe extern "C" fn process_next_octave(raw: *mut VlSiftFilt) -> c_int {
    let sift = get(raw);
    let next = sift.octave_index + 1;
    if next >= sift.o_min + sift.noctaves {
        return VL_ERR_EOF;
    }
    sift.load_octave(next);
    VL_ERR_OK
}

unsafe extern "C" fn detect(raw: *mut VlSiftFilt) {
    let sift = get(raw);
    let o = sift.octave_index;
    let step = octave_step(o) as f32;
    let threshold = sift.peak_thresh as f32;
    let width = sift.octave_width;
    sift.keypoints = sift
        .octave_image
        .iter()
        .enumerate()
        .filter(|(_, value)| **value > threshold)
        .map(|(i, _)| {
            let (ix, iy) = (i % width, i / width);
            SiftKeypoint {
                o,
                ix: ix as i32,
                iy: iy as i32,
                is: 0,
                x: ix as f32 * step,
                y: iy as f32 * step,
                s: 0.0,
                sigma: SIGMA0 as f32 * step,
            }
        })
        .collect();
}

unsafe extern "C" fn calc_keypoint_orientations(_raw: *mut VlSiftFilt, angles: *mut f64, _keypoint: *const SiftKeypoint) -> c_int {
    unsafe { write_slice(angles, &[0.0]) };
    1
}

unsafe extern "C" fn calc_keypoint_descriptor(_raw: *mut VlSiftFilt, descriptor: *mut f32, _keypoint: *const SiftKeypoint, _angle: f64) {
    unsafe { write_slice(descriptor, &uniform_descriptor()) };
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn calc_raw_descriptor(
    raw: *const VlSiftFilt,
    _image: *const f32,
    descriptor: *mut f32,
    _width: c_int,
    _height: c_int,
    _x: f64,
    _y: f64,
    _s: f64,
    _angle: f64,
) {
    get(raw);
    unsafe { write_slice(descriptor, &uniform_descriptor()) };
}

/// Unit-norm descriptor with equal bins.
fn uniform_descriptor() -> [f32; SIFT_DESCRIPTOR_SIZE] {
    [1.0 / (SIFT_DESCRIPTOR_SIZE as f32).sqrt(); SIFT_DESCRIPTOR_SIZE]
}

unsafe extern "C" fn keypoint_init(raw: *const VlSiftFilt, keypoint: *mut SiftKeypoint, x: f64, y: f64, sigma: f64) {
    let sift = get(raw);
    let o = sift.octave_index;
    let step = octave_step(o);
    let s = f64::from(sift.nlevels) * (sigma / (SIGMA0 * step)).log2();
    let value = SiftKeypoint {
        o,
        ix: (x / step).round() as i32,
        iy: (y / step).round() as i32,
        is: s.round() as i32,
        x: x as f32,
        y: y as f32,
        s: s as f32,
        sigma: sigma as f32,
    };
    unsafe { write_slice(keypoint, &[value]) };
}

unsafe extern "C" fn get_octave_index(raw: *const VlSiftFilt) -> c_int {
    get(raw).octave_index
}

unsafe extern "C" fn get_noctaves(raw: *const VlSiftFilt) -> c_int {
    get(raw).noctaves
}

unsafe extern "C" fn get_octave_first(raw: *const VlSiftFilt) -> c_int {
    get(raw).o_min
}

unsafe extern "C" fn get_octave_width(raw: *const VlSiftFilt) -> c_int {
    c_int::try_from(get(raw).octave_width).unwrap_or(c_int::MAX)
}

unsafe extern "C" fn get_octave_height(raw: *const VlSiftFilt) -> c_int {
    c_int::try_from(get(raw).octave_height).unwrap_or(c_int::MAX)
}

unsafe extern "C" fn get_nlevels(raw: *const VlSiftFilt) -> c_int {
    get(raw).nlevels
}

unsafe extern "C" fn get_nkeypoints(raw: *const VlSiftFilt) -> c_int {
    c_int::try_from(get(raw).keypoints.len()).unwrap_or(c_int::MAX)
}

unsafe extern "C" fn get_keypoints(raw: *const VlSiftFilt) -> *const SiftKeypoint {
    get(raw).keypoints.as_ptr()
}

unsafe extern "C" fn get_octave(raw: *const VlSiftFilt, _s: c_int) -> *mut f32 {
    get(raw).octave_image.as_mut_ptr()
}

unsafe extern "C" fn get_peak_thresh(raw: *const VlSiftFilt) -> f64 {
    get(raw).peak_thresh
}

unsafe extern "C" fn get_edge_thresh(raw: *const VlSiftFilt) -> f64 {
    get(raw).edge_thresh
}

unsafe extern "C" fn get_norm_thresh(raw: *const VlSiftFilt) -> f64 {
    get(raw).norm_thresh
}

unsafe extern "C" fn get_magnif(raw: *const VlSiftFilt) -> f64 {
    get(raw).magnif
}

unsafe extern "C" fn get_window_size(raw: *const VlSiftFilt) -> f64 {
    get(raw).window_size
}

unsafe extern "C" fn set_peak_thresh(raw: *mut VlSiftFilt, value: f64) {
    get(raw).peak_thresh = value;
}

unsafe extern "C" fn set_edge_thresh(raw: *mut VlSiftFilt, value: f64) {
    get(raw).edge_thresh = value;
}

unsafe extern "C" fn set_norm_thresh(raw: *mut VlSiftFilt, value: f64) {
    get(raw).norm_thresh = value;
}

unsafe extern "C" fn set_magnif(raw: *mut VlSiftFilt, value: f64) {
    get(raw).magnif = value;
}

unsafe extern "C" fn set_window_size(raw: *mut VlSiftFilt, value: f64) {
    get(raw).window_size = value;
}

pub(crate) const API: SiftApi = SiftApi {
    vl_sift_new: new,
    vl_sift_delete: delete,
    vl_sift_process_first_octave: process_first_octave,
    vl_sift_process_next_octave: process_next_octave,
    vl_sift_detect: detect,
    vl_sift_calc_keypoint_orientations: calc_keypoint_orientations,
    vl_sift_calc_keypoint_descriptor: calc_keypoint_descriptor,
    vl_sift_calc_raw_descriptor: calc_raw_descriptor,
    vl_sift_keypoint_init: keypoint_init,
    vl_sift_get_octave_index: get_octave_index,
    vl_sift_get_noctaves: get_noctaves,
    vl_sift_get_octave_first: get_octave_first,
    vl_sift_get_octave_width: get_octave_width,
    vl_sift_get_octave_height: get_octave_height,
    vl_sift_get_nlevels: get_nlevels,
    vl_sift_get_nkeypoints: get_nkeypoints,
    vl_sift_get_keypoints: get_keypoints,
    vl_sift_get_octave: get_octave,
    vl_sift_get_peak_thresh: get_peak_thresh,
    vl_sift_get_edge_thresh: get_edge_thresh,
    vl_sift_get_norm_thresh: get_norm_thresh,
    vl_sift_get_magnif: get_magnif,
    vl_sift_get_window_size: get_window_size,
    vl_sift_set_peak_thresh: set_peak_thresh,
    vl_sift_set_edge_thresh: set_edge_thresh,
    vl_sift_set_norm_thresh: set_norm_thresh,
    vl_sift_set_magnif: set_magnif,
    vl_sift_set_window_size: set_window_size,
};
