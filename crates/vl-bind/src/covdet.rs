//! Covariant feature detection.
//!
//! ```text
//!   put_image ──► detect ──► extract_orientations ──► features()
//!                    │       extract_laplacian_scales
//!                    │       extract_affine_shape
//!                    └─────► drop_features_outside
//! ```
//!
//! The engine copies the image into its scale space, so the caller's
//! buffer is not retained. An empty image is accepted and yields no
//! features.

use crate::{check_len, element_count};
use crate::engine::Engine;
use crate::sys::{check_status, from_vl_bool, to_vl_bool, VlBool, VlIndex, VlSize};
use serde::{Deserialize, Serialize};
use std::ffi::{c_int, c_void};
use vl_ffi::{
    read_records, ArrayView, FfiError, FfiResult, Field, ForeignHandle, ForeignRecord, ForeignResource, RecordLayout,
    TypeTag,
};

/// Opaque `VlCovDet`.
#[repr(C)]
pub(crate) struct VlCovDet {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_covdet_*` entry points.
    pub(crate) struct CovDetApi {
        fn vl_covdet_new(method: c_int) -> *mut VlCovDet;
        fn vl_covdet_delete(covdet: *mut VlCovDet);
        fn vl_covdet_reset(covdet: *mut VlCovDet);
        fn vl_covdet_put_image(covdet: *mut VlCovDet, image: *const f32, width: VlSize, height: VlSize) -> c_int;
        fn vl_covdet_detect(covdet: *mut VlCovDet);
        fn vl_covdet_append_feature(covdet: *mut VlCovDet, feature: *const Feature) -> c_int;
        fn vl_covdet_extract_orientations(covdet: *mut VlCovDet);
        fn vl_covdet_extract_laplacian_scales(covdet: *mut VlCovDet);
        fn vl_covdet_extract_affine_shape(covdet: *mut VlCovDet);
        fn vl_covdet_extract_orientations_for_frame(covdet: *mut VlCovDet, num_orientations: *mut VlSize, frame: Frame) -> *mut FeatureOrientation;
        fn vl_covdet_extract_laplacian_scales_for_frame(covdet: *mut VlCovDet, num_scales: *mut VlSize, frame: Frame) -> *mut FeatureLaplacianScale;
        fn vl_covdet_extract_affine_shape_for_frame(covdet: *mut VlCovDet, adapted: *mut Frame, frame: Frame) -> c_int;
        fn vl_covdet_extract_patch_for_frame(covdet: *mut VlCovDet, patch: *mut f32, resolution: VlSize, extent: f64, sigma: f64, frame: Frame) -> VlBool;
        fn vl_covdet_drop_features_outside(covdet: *mut VlCovDet, margin: f64);
        fn vl_covdet_get_num_features(covdet: *const VlCovDet) -> VlSize;
        fn vl_covdet_get_features(covdet: *const VlCovDet) -> *mut c_void;
        fn vl_covdet_get_first_octave(covdet: *const VlCovDet) -> VlIndex;
        fn vl_covdet_set_first_octave(covdet: *mut VlCovDet, octave: VlIndex);
        fn vl_covdet_get_num_octaves(covdet: *const VlCovDet) -> VlSize;
        fn vl_covdet_set_num_octaves(covdet: *mut VlCovDet, num_octaves: VlSize);
        fn vl_covdet_get_base_scale(covdet: *const VlCovDet) -> f64;
        fn vl_covdet_set_base_scale(covdet: *mut VlCovDet, scale: f64);
        fn vl_covdet_get_octave_resolution(covdet: *const VlCovDet) -> VlSize;
        fn vl_covdet_set_octave_resolution(covdet: *mut VlCovDet, resolution: VlSize);
        fn vl_covdet_get_peak_threshold(covdet: *const VlCovDet) -> f64;
        fn vl_covdet_set_peak_threshold(covdet: *mut VlCovDet, threshold: f64);
        fn vl_covdet_get_edge_threshold(covdet: *const VlCovDet) -> f64;
        fn vl_covdet_set_edge_threshold(covdet: *mut VlCovDet, threshold: f64);
        fn vl_covdet_set_laplacian_peak_threshold(covdet: *mut VlCovDet, threshold: f64);
        fn vl_covdet_get_max_num_orientations(covdet: *const VlCovDet) -> VlSize;
        fn vl_covdet_set_max_num_orientations(covdet: *mut VlCovDet, max: VlSize);
        fn vl_covdet_get_transposed(covdet: *const VlCovDet) -> VlBool;
        fn vl_covdet_set_transposed(covdet: *mut VlCovDet, transposed: VlBool);
        fn vl_covdet_get_aa_accurate_smoothing(covdet: *const VlCovDet) -> VlBool;
        fn vl_covdet_set_aa_accurate_smoothing(covdet: *mut VlCovDet, accurate: VlBool);
        fn vl_covdet_get_non_extrema_suppression_threshold(covdet: *const VlCovDet) -> f64;
        fn vl_covdet_set_non_extrema_suppression_threshold(covdet: *mut VlCovDet, threshold: f64);
        fn vl_covdet_get_num_non_extrema_suppressed(covdet: *const VlCovDet) -> VlSize;
        fn vl_covdet_get_allow_padded_warping(covdet: *const VlCovDet) -> VlBool;
        fn vl_covdet_set_allow_padded_warping(covdet: *mut VlCovDet, allow: VlBool);
        fn vl_covdet_get_laplacian_scales_statistics(covdet: *const VlCovDet, num_scales: *mut VlSize) -> *const VlSize;
    }
}

unsafe impl ForeignResource for VlCovDet {
    type Api = CovDetApi;
    const KIND: &'static str = "covdet";

    unsafe fn destroy(api: &CovDetApi, raw: *mut Self) {
        unsafe { (api.vl_covdet_delete)(raw) };
    }
}

engine_enum! {
    /// Detector type (`VlCovDetMethod`).
    pub enum CovDetMethod {
        /// Difference of Gaussians.
        DoG = 1,
        /// Hessian determinant.
        Hessian = 2,
        /// Hessian with Laplacian scale selection.
        HessianLaplace = 3,
        /// Harris with Laplacian scale selection.
        HarrisLaplace = 4,
        /// Hessian over several scales.
        MultiscaleHessian = 5,
        /// Harris over several scales.
        MultiscaleHarris = 6,
    }
}

/// An oriented ellipse (`VlFrameOrientedEllipse`): center and the affine
/// map from the unit circle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Center, horizontal.
    pub x: f32,
    /// Center, vertical.
    pub y: f32,
    /// Affine map, row 1 column 1.
    pub a11: f32,
    /// Affine map, row 1 column 2.
    pub a12: f32,
    /// Affine map, row 2 column 1.
    pub a21: f32,
    /// Affine map, row 2 column 2.
    pub a22: f32,
}

impl Frame {
    /// A circular frame of radius `scale` centered at `(x, y)`.
    #[must_use]
    pub const fn circle(x: f32, y: f32, scale: f32) -> Self {
        Self {
            x,
            y,
            a11: scale,
            a12: 0.0,
            a21: 0.0,
            a22: scale,
        }
    }
}

/// A detected feature (`VlCovDetFeature`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Geometry.
    pub frame: Frame,
    /// Detector response.
    pub peak_score: f32,
    /// Edge measure.
    pub edge_score: f32,
    /// Orientation response.
    pub orientation_score: f32,
    /// Laplacian scale response.
    pub laplacian_scale_score: f32,
}

/// A dominant orientation (`VlCovDetFeatureOrientation`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureOrientation {
    /// Angle in radians.
    pub angle: f64,
    /// Response.
    pub score: f64,
}

/// A characteristic scale (`VlCovDetFeatureLaplacianScale`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureLaplacianScale {
    /// Scale.
    pub scale: f64,
    /// Response.
    pub score: f64,
}

const FRAME_FIELDS: [Field; 6] = [
    Field::new("x", TypeTag::Float32),
    Field::new("y", TypeTag::Float32),
    Field::new("a11", TypeTag::Float32),
    Field::new("a12", TypeTag::Float32),
    Field::new("a21", TypeTag::Float32),
    Field::new("a22", TypeTag::Float32),
];

unsafe impl ForeignRecord for Frame {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlFrameOrientedEllipse",
        fields: &FRAME_FIELDS,
    };
}

unsafe impl ForeignRecord for Feature {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlCovDetFeature",
        fields: &[
            FRAME_FIELDS[0],
            FRAME_FIELDS[1],
            FRAME_FIELDS[2],
            FRAME_FIELDS[3],
            FRAME_FIELDS[4],
            FRAME_FIELDS[5],
            Field::new("peakScore", TypeTag::Float32),
            Field::new("edgeScore", TypeTag::Float32),
            Field::new("orientationScore", TypeTag::Float32),
            Field::new("laplacianScaleScore", TypeTag::Float32),
        ],
    };
}

unsafe impl ForeignRecord for FeatureOrientation {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlCovDetFeatureOrientation",
        fields: &[Field::new("angle", TypeTag::Float64), Field::new("score", TypeTag::Float64)],
    };
}

unsafe impl ForeignRecord for FeatureLaplacianScale {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlCovDetFeatureLaplacianScale",
        fields: &[Field::new("scale", TypeTag::Float64), Field::new("score", TypeTag::Float64)],
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImageState {
    Missing,
    Empty,
    Loaded,
}

/// Getter/setter pairs over `vl_bool` accessors.
macro_rules! flag_accessors {
    ($( $(#[$doc:meta])* $get:ident, $set:ident => $vl_get:ident, $vl_set:ident; )*) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $get(&self) -> bool {
                // SAFETY: the handle is live.
                from_vl_bool(unsafe { (self.handle.api().$vl_get)(self.handle.as_ptr()) })
            }

            #[doc = concat!("Set the flag returned by [`Self::", stringify!($get), "`].")]
            pub fn $set(&mut self, value: bool) {
                // SAFETY: the handle is live.
                unsafe { (self.handle.api().$vl_set)(self.handle.as_mut_ptr(), to_vl_bool(value)) }
            }
        )*
    };
}

/// A covariant feature detector.
#[derive(Debug)]
pub struct CovDet {
    handle: ForeignHandle<VlCovDet>,
    image: ImageState,
}

impl CovDet {
    /// Create a detector.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot create
    /// the detector.
    pub fn new(engine: &'static Engine, method: CovDetMethod) -> FfiResult<Self> {
        // SAFETY: `vl_covdet_new` returns a fresh detector or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.covdet, engine.handle_config(), |api: &'static CovDetApi| (api.vl_covdet_new)(method.raw()))?
        };
        Ok(Self {
            handle,
            image: ImageState::Missing,
        })
    }

    /// Drop the image and every feature; settings are kept.
    pub fn reset(&mut self) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_covdet_reset)(self.handle.as_mut_ptr()) };
        self.image = ImageState::Missing;
    }

    /// Load a `width` × `height` grayscale image, row-major.
    ///
    /// Previously detected features are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `image` does not hold
    /// `width * height` values and the engine's status otherwise.
    pub fn put_image(&mut self, image: &[f32], width: usize, height: usize) -> FfiResult<()> {
        check_len(element_count(&[width, height])?, image.len())?;
        if image.is_empty() {
            self.reset();
            self.image = ImageState::Empty;
            return Ok(());
        }
        tracing::trace!(width, height, "covdet put_image");
        // A failed load leaves the engine without a usable image.
        self.image = ImageState::Missing;
        // SAFETY: `image` holds `width * height` values; the engine copies
        // them.
        let status = unsafe {
            (self.handle.api().vl_covdet_put_image)(self.handle.as_mut_ptr(), image.as_ptr(), width, height)
        };
        check_status("vl_covdet_put_image", status)?;
        self.image = ImageState::Loaded;
        Ok(())
    }

    /// Detect features in the current image.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no image was given.
    pub fn detect(&mut self) -> FfiResult<()> {
        if self.require_image()? {
            // SAFETY: an image is loaded.
            unsafe { (self.handle.api().vl_covdet_detect)(self.handle.as_mut_ptr()) };
        }
        Ok(())
    }

    /// Add a feature to the current list.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the list cannot grow.
    pub fn append_feature(&mut self, feature: &Feature) -> FfiResult<()> {
        // SAFETY: the engine copies `feature`.
        let status = unsafe { (self.handle.api().vl_covdet_append_feature)(self.handle.as_mut_ptr(), feature) };
        check_status("vl_covdet_append_feature", status)
    }

    /// Assign dominant orientations, duplicating multi-orientation
    /// features.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no image was given.
    pub fn extract_orientations(&mut self) -> FfiResult<()> {
        if self.require_image()? {
            // SAFETY: an image is loaded.
            unsafe { (self.handle.api().vl_covdet_extract_orientations)(self.handle.as_mut_ptr()) };
        }
        Ok(())
    }

    /// Select characteristic scales for the current features.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no image was given.
    pub fn extract_laplacian_scales(&mut self) -> FfiResult<()> {
        if self.require_image()? {
            // SAFETY: an image is loaded.
            unsafe { (self.handle.api().vl_covdet_extract_laplacian_scales)(self.handle.as_mut_ptr()) };
        }
        Ok(())
    }

    /// Adapt the current features to affine shapes.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no image was given.
    pub fn extract_affine_shape(&mut self) -> FfiResult<()> {
        if self.require_image()? {
            // SAFETY: an image is loaded.
            unsafe { (self.handle.api().vl_covdet_extract_affine_shape)(self.handle.as_mut_ptr()) };
        }
        Ok(())
    }

    /// Dominant orientations of one frame.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] unless a non-empty image is
    /// loaded.
    pub fn extract_orientations_for_frame(&mut self, frame: Frame) -> FfiResult<Vec<FeatureOrientation>> {
        self.require_pixels()?;
        let mut count: VlSize = 0;
        // SAFETY: the engine returns `count` records valid until the next
        // call on the detector; they are copied out immediately.
        Ok(unsafe {
            let ptr = (self.handle.api().vl_covdet_extract_orientations_for_frame)(
                self.handle.as_mut_ptr(),
                &mut count,
                frame,
            );
            read_records(ptr, count).to_vec()
        })
    }

    /// Characteristic scales of one frame.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] unless a non-empty image is
    /// loaded.
    pub fn extract_laplacian_scales_for_frame(&mut self, frame: Frame) -> FfiResult<Vec<FeatureLaplacianScale>> {
        self.require_pixels()?;
        let mut count: VlSize = 0;
        // SAFETY: as in `extract_orientations_for_frame`.
        Ok(unsafe {
            let ptr = (self.handle.api().vl_covdet_extract_laplacian_scales_for_frame)(
                self.handle.as_mut_ptr(),
                &mut count,
                frame,
            );
            read_records(ptr, count).to_vec()
        })
    }

    /// Affine-adapted version of one frame.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] unless a non-empty image is
    /// loaded, and [`FfiError::Engine`] if adaptation does not converge.
    pub fn extract_affine_shape_for_frame(&mut self, frame: Frame) -> FfiResult<Frame> {
        self.require_pixels()?;
        let mut adapted = Frame::default();
        // SAFETY: `adapted` is a valid output location.
        let status = unsafe {
            (self.handle.api().vl_covdet_extract_affine_shape_for_frame)(self.handle.as_mut_ptr(), &mut adapted, frame)
        };
        check_status("vl_covdet_extract_affine_shape_for_frame", status)?;
        Ok(adapted)
    }

    /// Resample the image around `frame` into a square patch of side
    /// `2 * resolution + 1`.
    ///
    /// Returns the patch, row-major, and whether part of it fell outside
    /// the image.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] unless a non-empty image is
    /// loaded.
    pub fn extract_patch_for_frame(
        &mut self,
        resolution: usize,
        extent: f64,
        sigma: f64,
        frame: Frame,
    ) -> FfiResult<(Vec<f32>, bool)> {
        self.require_pixels()?;
        let side = 2 * resolution + 1;
        let mut patch = vec![0.0f32; side * side];
        // SAFETY: `patch` holds `side * side` values.
        let padded = unsafe {
            (self.handle.api().vl_covdet_extract_patch_for_frame)(
                self.handle.as_mut_ptr(),
                patch.as_mut_ptr(),
                resolution,
                extent,
                sigma,
                frame,
            )
        };
        Ok((patch, from_vl_bool(padded)))
    }

    /// Remove features closer than `margin` scale units to the border.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no image was given.
    pub fn drop_features_outside(&mut self, margin: f64) -> FfiResult<()> {
        if self.require_image()? {
            // SAFETY: an image is loaded.
            unsafe { (self.handle.api().vl_covdet_drop_features_outside)(self.handle.as_mut_ptr(), margin) };
        }
        Ok(())
    }

    /// Current features.
    #[must_use]
    pub fn features(&self) -> ArrayView<'_, Feature> {
        let count = self.num_features();
        // SAFETY: the engine holds `count` features until the next
        // mutating call, which needs `&mut self`.
        unsafe {
            let ptr = (self.handle.api().vl_covdet_get_features)(self.handle.as_ptr());
            read_records(ptr.cast::<Feature>(), count)
        }
    }

    /// Histogram of the scales selected by the last
    /// [`CovDet::extract_laplacian_scales`].
    #[must_use]
    pub fn laplacian_scales_statistics(&self) -> Vec<usize> {
        let mut count: VlSize = 0;
        // SAFETY: the engine returns `count` values.
        unsafe {
            let ptr = (self.handle.api().vl_covdet_get_laplacian_scales_statistics)(self.handle.as_ptr(), &mut count);
            ArrayView::from_raw_parts(ptr, count).to_vec()
        }
    }

    /// Set the peak threshold of Laplacian scale selection.
    ///
    /// The engine has no matching getter.
    pub fn set_laplacian_peak_threshold(&mut self, threshold: f64) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_covdet_set_laplacian_peak_threshold)(self.handle.as_mut_ptr(), threshold) };
    }

    engine_accessors! {
        /// First octave of the scale space; may be negative.
        first_octave, set_first_octave: isize => vl_covdet_get_first_octave, vl_covdet_set_first_octave;
        /// Number of octaves.
        num_octaves, set_num_octaves: usize => vl_covdet_get_num_octaves, vl_covdet_set_num_octaves;
        /// Scale of the first level.
        base_scale, set_base_scale: f64 => vl_covdet_get_base_scale, vl_covdet_set_base_scale;
        /// Levels per octave.
        octave_resolution, set_octave_resolution: usize => vl_covdet_get_octave_resolution, vl_covdet_set_octave_resolution;
        /// Minimum detector response.
        peak_threshold, set_peak_threshold: f64 => vl_covdet_get_peak_threshold, vl_covdet_set_peak_threshold;
        /// Maximum edge measure.
        edge_threshold, set_edge_threshold: f64 => vl_covdet_get_edge_threshold, vl_covdet_set_edge_threshold;
        /// Orientations kept per feature.
        max_num_orientations, set_max_num_orientations: usize => vl_covdet_get_max_num_orientations, vl_covdet_set_max_num_orientations;
        /// Threshold of non-extrema suppression.
        non_extrema_suppression_threshold, set_non_extrema_suppression_threshold: f64 => vl_covdet_get_non_extrema_suppression_threshold, vl_covdet_set_non_extrema_suppression_threshold;
    }

    engine_getters! {
        /// Number of current features.
        num_features: usize => vl_covdet_get_num_features;
        /// Features removed by non-extrema suppression in the last detection.
        num_non_extrema_suppressed: usize => vl_covdet_get_num_non_extrema_suppressed;
    }

    flag_accessors! {
        /// Whether the image is read column-major.
        transposed, set_transposed => vl_covdet_get_transposed, vl_covdet_set_transposed;
        /// Whether anti-aliasing smoothing is exact.
        aa_accurate_smoothing, set_aa_accurate_smoothing => vl_covdet_get_aa_accurate_smoothing, vl_covdet_set_aa_accurate_smoothing;
        /// Whether patches may extend past the border.
        allow_padded_warping, set_allow_padded_warping => vl_covdet_get_allow_padded_warping, vl_covdet_set_allow_padded_warping;
    }

    /// Whether there are pixels to process; fails if no image was given.
    fn require_image(&self) -> FfiResult<bool> {
        match self.image {
            ImageState::Missing => Err(FfiError::InvalidHandleState {
                resource: VlCovDet::KIND,
                reason: "no image; call put_image first".to_string(),
            }),
            ImageState::Empty => Ok(false),
            ImageState::Loaded => Ok(true),
        }
    }

    fn require_pixels(&self) -> FfiResult<()> {
        if self.require_image()? {
            Ok(())
        } else {
            Err(FfiError::InvalidHandleState {
                resource: VlCovDet::KIND,
                reason: "the image is empty".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8x8 dark image with two bright pixels.
    fn image() -> Vec<f32> {
        let mut image = vec![0.0f32; 64];
        image[2 * 8 + 3] = 1.0;
        image[5 * 8 + 6] = 0.9;
        image
    }

    fn covdet() -> CovDet {
        CovDet::new(Engine::mock(), CovDetMethod::DoG).unwrap()
    }

    #[test]
    fn test_empty_image_has_no_features() {
        let mut det = covdet();
        det.put_image(&[], 0, 0).unwrap();
        det.detect().unwrap();
        det.extract_orientations().unwrap();
        assert_eq!(det.num_features(), 0);
        assert!(det.features().is_empty());
        assert!(matches!(
            det.extract_orientations_for_frame(Frame::circle(0.0, 0.0, 1.0)),
            Err(FfiError::InvalidHandleState { .. })
        ));
    }

    #[test]
    fn test_detect_without_image_is_invalid_state() {
        let mut det = covdet();
        assert!(matches!(det.detect(), Err(FfiError::InvalidHandleState { .. })));
        det.put_image(&image(), 8, 8).unwrap();
        det.reset();
        assert!(matches!(det.detect(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_detect_reads_feature_records() {
        let mut det = covdet();
        det.put_image(&image(), 8, 8).unwrap();
        det.detect().unwrap();
        let features = det.features();
        assert_eq!(features.len(), det.num_features());
        assert_eq!(features.len(), 2);
        assert_eq!((features[0].frame.x, features[0].frame.y), (3.0, 2.0));
        assert_eq!(features[1].peak_score, 0.9);
    }

    #[test]
    fn test_image_size_is_checked() {
        let mut det = covdet();
        assert!(matches!(det.put_image(&[0.0; 10], 4, 4), Err(FfiError::SizeMismatch { .. })));
        assert!(matches!(det.put_image(&[], usize::MAX, 2), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_failed_put_image_unloads_previous_image() {
        let mut det = covdet();
        det.put_image(&image(), 8, 8).unwrap();
        det.detect().unwrap();
        let mut bad = image();
        bad[0] = f32::NAN;
        assert!(matches!(
            det.put_image(&bad, 8, 8),
            Err(FfiError::Engine { operation: "vl_covdet_put_image", .. })
        ));
        assert!(matches!(det.detect(), Err(FfiError::InvalidHandleState { .. })));
        assert!(det.features().is_empty());
        det.put_image(&image(), 8, 8).unwrap();
        det.detect().unwrap();
        assert_eq!(det.num_features(), 2);
    }

    #[test]
    fn test_orientation_and_scale_extraction() {
        let mut det = covdet();
        det.put_image(&image(), 8, 8).unwrap();
        det.detect().unwrap();
        det.extract_orientations().unwrap();
        det.extract_laplacian_scales().unwrap();
        det.extract_affine_shape().unwrap();
        assert!(det.features().iter().all(|f| f.orientation_score > 0.0));
        assert_eq!(det.laplacian_scales_statistics().iter().sum::<usize>(), 2);

        let frame = Frame::circle(3.0, 2.0, 1.5);
        assert!(!det.extract_orientations_for_frame(frame).unwrap().is_empty());
        assert!(!det.extract_laplacian_scales_for_frame(frame).unwrap().is_empty());
        assert_eq!(det.extract_affine_shape_for_frame(frame).unwrap(), frame);
    }

    #[test]
    fn test_patch_side_follows_resolution() {
        let mut det = covdet();
        det.put_image(&image(), 8, 8).unwrap();
        let (patch, _) = det
            .extract_patch_for_frame(3, 6.0, 1.0, Frame::circle(4.0, 4.0, 1.0))
            .unwrap();
        assert_eq!(patch.len(), 49);
    }

    #[test]
    fn test_append_and_drop_outside() {
        let mut det = covdet();
        det.put_image(&image(), 8, 8).unwrap();
        det.append_feature(&Feature {
            frame: Frame::circle(0.0, 0.0, 1.0),
            ..Feature::default()
        })
        .unwrap();
        det.append_feature(&Feature {
            frame: Frame::circle(4.0, 4.0, 1.0),
            ..Feature::default()
        })
        .unwrap();
        assert_eq!(det.num_features(), 2);
        det.drop_features_outside(1.0).unwrap();
        assert_eq!(det.num_features(), 1);
        assert_eq!(det.features()[0].frame.x, 4.0);
    }

    #[test]
    fn test_num_octaves_is_not_feature_count() {
        let mut det = covdet();
        det.set_num_octaves(3);
        det.put_image(&image(), 8, 8).unwrap();
        det.detect().unwrap();
        assert_eq!(det.num_octaves(), 3);
        assert_eq!(det.num_features(), 2);
    }

    #[test]
    fn test_settings() {
        let mut det = covdet();
        det.set_first_octave(-1);
        det.set_base_scale(1.6);
        det.set_octave_resolution(3);
        det.set_peak_threshold(0.02);
        det.set_edge_threshold(10.0);
        det.set_max_num_orientations(4);
        det.set_non_extrema_suppression_threshold(0.5);
        det.set_laplacian_peak_threshold(0.01);
        det.set_transposed(true);
        det.set_aa_accurate_smoothing(true);
        det.set_allow_padded_warping(false);
        assert_eq!(det.first_octave(), -1);
        assert_eq!(det.base_scale(), 1.6);
        assert_eq!(det.octave_resolution(), 3);
        assert_eq!(det.peak_threshold(), 0.02);
        assert_eq!(det.edge_threshold(), 10.0);
        assert_eq!(det.max_num_orientations(), 4);
        assert_eq!(det.non_extrema_suppression_threshold(), 0.5);
        assert!(det.transposed());
        assert!(det.aa_accurate_smoothing());
        assert!(!det.allow_padded_warping());
        assert_eq!(det.num_non_extrema_suppressed(), 0);
    }

    #[test]
    fn test_record_layouts_match() {
        assert_eq!(Feature::LAYOUT.packed_size(), std::mem::size_of::<Feature>());
        assert_eq!(Frame::LAYOUT.packed_size(), std::mem::size_of::<Frame>());
        assert_eq!(FeatureOrientation::LAYOUT.packed_size(), 16);
    }
}
