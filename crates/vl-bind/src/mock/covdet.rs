//! Mock `vl_covdet_*`: one feature per pixel above the peak threshold.
//! Images with non-finite pixels are rejected with `VL_ERR_BADARG`.

use super::{alloc, free, object, read_vec, write_slice};
use crate::covdet::{CovDetApi, Feature, FeatureLaplacianScale, FeatureOrientation, Frame, VlCovDet};
use crate::sys::{to_vl_bool, VlBool, VlIndex, VlSize, VL_ERR_BADARG, VL_ERR_OK};
use std::ffi::{c_int, c_void};

struct MockCovDet {
    image: Vec<f32>,
    width: VlSize,
    height: VlSize,
    features: Vec<Feature>,
    orientations: Vec<FeatureOrientation>,
    scales: Vec<FeatureLaplacianScale>,
    statistics: Vec<VlSize>,
    first_octave: VlIndex,
    num_octaves: VlSize,
    base_scale: f64,
    octave_resolution: VlSize,
    peak_threshold: f64,
    edge_threshold: f64,
    laplacian_peak_threshold: f64,
    max_num_orientations: VlSize,
    transposed: VlBool,
    aa_accurate_smoothing: VlBool,
    non_extrema_suppression_threshold: f64,
    allow_padded_warping: VlBool,
}

impl MockCovDet {
    fn pixel(&self, x: f32, y: f32) -> f32 {
        let col = (x.max(0.0) as usize).min(self.width.saturating_sub(1));
        let row = (y.max(0.0) as usize).min(self.height.saturating_sub(1));
        self.image.get(row * self.width + col).copied().unwrap_or_default()
    }
}

fn get<'a>(raw: *const VlCovDet) -> &'a mut MockCovDet {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(_method: c_int) -> *mut VlCovDet {
    alloc(
        "covdet",
        MockCovDet {
            image: Vec::new(),
            width: 0,
            height: 0,
            features: Vec::new(),
            orientations: Vec::new(),
            scales: Vec::new(),
            statistics: Vec::new(),
            first_octave: 0,
            num_octaves: 0,
            base_scale: 1.6,
            octave_resolution: 3,
            peak_threshold: 0.5,
            edge_threshold: 10.0,
            laplacian_peak_threshold: 0.01,
            max_num_orientations: 4,
            transposed: 0,
            aa_accurate_smoothing: 0,
            non_extrema_suppression_threshold: 0.5,
            allow_padded_warping: 1,
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlCovDet) {
    unsafe { free::<MockCovDet, _>(raw) };
}

unsafe extern "C" fn reset(raw: *mut VlCovDet) {
    let det = get(raw);
    det.image.clear();
    det.width = 0;
    det.height = 0;
    det.features.clear();
    det.statistics.clear();
}

unsafe extern "C" fn put_image(raw: *mut VlCovDet, image: *const f32, width: VlSize, height: VlSize) -> c_int {
    let det = get(raw);
    det.features.clear();
    let pixels = unsafe { read_vec(image, width * height) };
    if pixels.iter().any(|value| !value.is_finite()) {
        det.image.clear();
        return VL_ERR_BADARG;
    }
    det.image = pixels;
    det.width = width;
    det.height = height;
    det.features.clear();
    VL_ERR_OK
}

unsafe extern "C" fn detect(raw: *mut VlCovDet) {
    let det = get(raw);
    let threshold = det.peak_threshold;
    det.features = det
        .image
        .iter()
        .enumerate()
        .filter(|(_, &value)| f64::from(value) > threshold)
        .map(|(i, &value)| Feature {
            frame: Frame::circle((i % det.width) as f32, (i / det.width) as f32, det.base_scale as f32),
            peak_score: value,
            ..Feature::default()
        })
        .collect();
}

unsafe extern "C" fn append_feature(raw: *mut VlCovDet, feature: *const Feature) -> c_int {
    get(raw).features.push(unsafe { *feature });
    VL_ERR_OK
}

unsafe extern "C" fn extract_orientations(raw: *mut VlCovDet) {
    for feature in &mut get(raw).features {
        feature.orientation_score = 1.0;
    }
}

unsafe extern "C" fn extract_laplacian_scales(raw: *mut VlCovDet) {
    let det = get(raw);
    for feature in &mut det.features {
        feature.laplacian_scale_score = 1.0;
    }
    let threshold = det.laplacian_peak_threshold;
    let selected = det
        .features
        .iter()
        .filter(|feature| f64::from(feature.peak_score) >= threshold)
        .count();
    det.statistics = vec![selected];
}

unsafe extern "C" fn extract_affine_shape(_raw: *mut VlCovDet) {}

unsafe extern "C" fn extract_orientations_for_frame(
    raw: *mut VlCovDet,
    num_orientations: *mut VlSize,
    _frame: Frame,
) -> *mut FeatureOrientation {
    let det = get(raw);
    det.orientations = vec![FeatureOrientation { angle: 0.0, score: 1.0 }];
    unsafe { *num_orientations = det.orientations.len() };
    det.orientations.as_mut_ptr()
}

unsafe extern "C" fn extract_laplacian_scales_for_frame(
    raw: *mut VlCovDet,
    num_scales: *mut VlSize,
    frame: Frame,
) -> *mut FeatureLaplacianScale {
    let det = get(raw);
    det.scales = vec![FeatureLaplacianScale {
        scale: f64::from(frame.a11),
        score: 1.0,
    }];
    unsafe { *num_scales = det.scales.len() };
    det.scales.as_mut_ptr()
}

unsafe extern "C" fn extract_affine_shape_for_frame(_raw: *mut VlCovDet, adapted: *mut Frame, frame: Frame) -> c_int {
    unsafe { *adapted = frame };
    VL_ERR_OK
}

unsafe extern "C" fn extract_patch_for_frame(
    raw: *mut VlCovDet,
    patch: *mut f32,
    resolution: VlSize,
    extent: f64,
    _sigma: f64,
    frame: Frame,
) -> VlBool {
    let det = get(raw);
    let side = 2 * resolution + 1;
    let values = vec![det.pixel(frame.x, frame.y); side * side];
    unsafe { write_slice(patch, &values) };
    let reach = extent * f64::from(frame.a11.abs());
    let (x, y) = (f64::from(frame.x), f64::from(frame.y));
    to_vl_bool(x < reach || y < reach || x + reach > det.width as f64 || y + reach > det.height as f64)
}

unsafe extern "C" fn drop_features_outside(raw: *mut VlCovDet, margin: f64) {
    let det = get(raw);
    let (width, height) = (det.width as f64, det.height as f64);
    det.features.retain(|feature| {
        let reach = margin * f64::from(feature.frame.a11.abs());
        let (x, y) = (f64::from(feature.frame.x), f64::from(feature.frame.y));
        x >= reach && y >= reach && x + reach <= width - 1.0 && y + reach <= height - 1.0
    });
}

unsafe extern "C" fn get_num_features(raw: *const VlCovDet) -> VlSize {
    get(raw).features.len()
}

unsafe extern "C" fn get_features(raw: *const VlCovDet) -> *mut c_void {
    get(raw).features.as_mut_ptr().cast()
}

unsafe extern "C" fn get_first_octave(raw: *const VlCovDet) -> VlIndex {
    get(raw).first_octave
}

unsafe extern "C" fn set_first_octave(raw: *mut VlCovDet, value: VlIndex) {
    get(raw).first_octave = value;
}

unsafe extern "C" fn get_num_octaves(raw: *const VlCovDet) -> VlSize {
    get(raw).num_octaves
}

unsafe extern "C" fn set_num_octaves(raw: *mut VlCovDet, value: VlSize) {
    get(raw).num_octaves = value;
}

unsafe extern "C" fn get_base_scale(raw: *const VlCovDet) -> f64 {
    get(raw).base_scale
}

unsafe extern "C" fn set_base_scale(raw: *mut VlCovDet, value: f64) {
    get(raw).base_scale = value;
}

unsafe extern "C" fn get_octave_resolution(raw: *const VlCovDet) -> VlSize {
    get(raw).octave_resolution
}

unsafe extern "C" fn set_octave_resolution(raw: *mut VlCovDet, value: VlSize) {
    get(raw).octave_resolution = value;
}

unsafe extern "C" fn get_peak_threshold(raw: *const VlCovDet) -> f64 {
    get(raw).peak_threshold
}

unsafe extern "C" fn set_peak_threshold(raw: *mut VlCovDet, value: f64) {
    get(raw).peak_threshold = value;
}

unsafe extern "C" fn get_edge_threshold(raw: *const VlCovDet) -> f64 {
    get(raw).edge_threshold
}

unsafe extern "C" fn set_edge_threshold(raw: *mut VlCovDet, value: f64) {
    get(raw).edge_threshold = value;
}

unsafe extern "C" fn set_laplacian_peak_threshold(raw: *mut VlCovDet, value: f64) {
    get(raw).laplacian_peak_threshold = value;
}

unsafe extern "C" fn get_max_num_orientations(raw: *const VlCovDet) -> VlSize {
    get(raw).max_num_orientations
}

unsafe extern "C" fn set_max_num_orientations(raw: *mut VlCovDet, value: VlSize) {
    get(raw).max_num_orientations = value;
}

unsafe extern "C" fn get_transposed(raw: *const VlCovDet) -> VlBool {
    get(raw).transposed
}

unsafe extern "C" fn set_transposed(raw: *mut VlCovDet, value: VlBool) {
    get(raw).transposed = value;
}

unsafe extern "C" fn get_aa_accurate_smoothing(raw: *const VlCovDet) -> VlBool {
    get(raw).aa_accurate_smoothing
}

unsafe extern "C" fn set_aa_accurate_smoothing(raw: *mut VlCovDet, value: VlBool) {
    get(raw).aa_accurate_smoothing = value;
}

unsafe extern "C" fn get_non_extrema_suppression_threshold(raw: *const VlCovDet) -> f64 {
    get(raw).non_extrema_suppression_threshold
}

unsafe extern "C" fn set_non_extrema_suppression_threshold(raw: *mut VlCovDet, value: f64) {
    get(raw).non_extrema_suppression_threshold = value;
}

unsafe extern "C" fn get_num_non_extrema_suppressed(_raw: *const VlCovDet) -> VlSize {
    0
}

unsafe extern "C" fn get_allow_padded_warping(raw: *const VlCovDet) -> VlBool {
    get(raw).allow_padded_warping
}

unsafe extern "C" fn set_allow_padded_warping(raw: *mut VlCovDet, value: VlBool) {
    get(raw).allow_padded_warping = value;
}

unsafe extern "C" fn get_laplacian_scales_statistics(raw: *const VlCovDet, num_scales: *mut VlSize) -> *const VlSize {
    let det = get(raw);
    unsafe { *num_scales = det.statistics.len() };
    det.statistics.as_ptr()
}

pub(crate) const API: CovDetApi = CovDetApi {
    vl_covdet_new: new,
    vl_covdet_delete: delete,
    vl_covdet_reset: reset,
    vl_covdet_put_image: put_image,
    vl_covdet_detect: detect,
    vl_covdet_append_feature: append_feature,
    vl_covdet_extract_orientations: extract_orientations,
    vl_covdet_extract_laplacian_scales: extract_laplacian_scales,
    vl_covdet_extract_affine_shape: extract_affine_shape,
    vl_covdet_extract_orientations_for_frame: extract_orientations_for_frame,
    vl_covdet_extract_laplacian_scales_for_frame: extract_laplacian_scales_for_frame,
    vl_covdet_extract_affine_shape_for_frame: extract_affine_shape_for_frame,
    vl_covdet_extract_patch_for_frame: extract_patch_for_frame,
    vl_covdet_drop_features_outside: drop_features_outside,
    vl_covdet_get_num_features: get_num_features,
    vl_covdet_get_features: get_features,
    vl_covdet_get_first_octave: get_first_octave,
    vl_covdet_set_first_octave: set_first_octave,
    vl_covdet_get_num_octaves: get_num_octaves,
    vl_covdet_set_num_octaves: set_num_octaves,
    vl_covdet_get_base_scale: get_base_scale,
    vl_covdet_set_base_scale: set_base_scale,
    vl_covdet_get_octave_resolution: get_octave_resolution,
    vl_covdet_set_octave_resolution: set_octave_resolution,
    vl_covdet_get_peak_threshold: get_peak_threshold,
    vl_covdet_set_peak_threshold: set_peak_threshold,
    vl_covdet_get_edge_threshold: get_edge_threshold,
    vl_covdet_set_edge_threshold: set_edge_threshold,
    vl_covdet_set_laplacian_peak_threshold: set_laplacian_peak_threshold,
    vl_covdet_get_max_num_orientations: get_max_num_orientations,
    vl_covdet_set_max_num_orientations: set_max_num_orientations,
    vl_covdet_get_transposed: get_transposed,
    vl_covdet_set_transposed: set_transposed,
    vl_covdet_get_aa_accurate_smoothing: get_aa_accurate_smoothing,
    vl_covdet_set_aa_accurate_smoothing: set_aa_accurate_smoothing,
    vl_covdet_get_non_extrema_suppression_threshold: get_non_extrema_suppression_threshold,
    vl_covdet_set_non_extrema_suppression_threshold: set_non_extrema_suppression_threshold,
    vl_covdet_get_num_non_extrema_suppressed: get_num_non_extrema_suppressed,
    vl_covdet_get_allow_padded_warping: get_allow_padded_warping,
    vl_covdet_set_allow_padded_warping: set_allow_padded_warping,
    vl_covdet_get_laplacian_scales_statistics: get_laplacian_scales_statistics,
};
