//! Scale-invariant feature transform.
//!
//! A [`Sift`] filter walks the octaves of one image at a time:
//!
//! ```rust,ignore
//! let mut sift = Sift::new(engine, width, height, -1, 3, 0)?;
//! let mut more = sift.process_first_octave(&image)?;
//! while more {
//!     sift.detect()?;
//!     for keypoint in sift.keypoints().to_vec() {
//!         for angle in sift.keypoint_orientations(&keypoint)? {
//!             let descriptor = sift.keypoint_descriptor(&keypoint, angle)?;
//!         }
//!     }
//!     more = sift.process_next_octave()?;
//! }
//! ```

use crate::{check_len, element_count};
use crate::engine::Engine;
use crate::sys::{check_status, VL_ERR_EOF, VL_ERR_OK};
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use vl_ffi::{read_records, ArrayView, FfiError, FfiResult, Field, ForeignHandle, ForeignRecord, ForeignResource, RecordLayout, TypeTag};

/// Length of a SIFT descriptor.
pub const SIFT_DESCRIPTOR_SIZE: usize = 128;

/// Most orientations the engine assigns to one keypoint.
const MAX_ORIENTATIONS: usize = 4;

/// Opaque `VlSiftFilt`.
#[repr(C)]
pub(crate) struct VlSiftFilt {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_sift_*` entry points.
    pub(crate) struct SiftApi {
        fn vl_sift_new(width: c_int, height: c_int, noctaves: c_int, nlevels: c_int, o_min: c_int) -> *mut VlSiftFilt;
        fn vl_sift_delete(sift: *mut VlSiftFilt);
        fn vl_sift_process_first_octave(sift: *mut VlSiftFilt, image: *const f32) -> c_int;
        fn vl_sift_process_next_octave(sift: *mut VlSiftFilt) -> c_int;
        fn vl_sift_detect(sift: *mut VlSiftFilt);
        fn vl_sift_calc_keypoint_orientations(sift: *mut VlSiftFilt, angles: *mut f64, keypoint: *const SiftKeypoint) -> c_int;
        fn vl_sift_calc_keypoint_descriptor(sift: *mut VlSiftFilt, descriptor: *mut f32, keypoint: *const SiftKeypoint, angle: f64);
        fn vl_sift_calc_raw_descriptor(sift: *const VlSiftFilt, image: *const f32, descriptor: *mut f32, width: c_int, height: c_int, x: f64, y: f64, s: f64, angle: f64);
        fn vl_sift_keypoint_init(sift: *const VlSiftFilt, keypoint: *mut SiftKeypoint, x: f64, y: f64, sigma: f64);
        fn vl_sift_get_octave_index(sift: *const VlSiftFilt) -> c_int;
        fn vl_sift_get_noctaves(sift: *const VlSiftFilt) -> c_int;
        fn vl_sift_get_octave_first(sift: *const VlSiftFilt) -> c_int;
        fn vl_sift_get_octave_width(sift: *const VlSiftFilt) -> c_int;
        fn vl_sift_get_octave_height(sift: *const VlSiftFilt) -> c_int;
        fn vl_sift_get_nlevels(sift: *const VlSiftFilt) -> c_int;
        fn vl_sift_get_nkeypoints(sift: *const VlSiftFilt) -> c_int;
        fn vl_sift_get_keypoints(sift: *const VlSiftFilt) -> *const SiftKeypoint;
        fn vl_sift_get_octave(sift: *const VlSiftFilt, s: c_int) -> *mut f32;
        fn vl_sift_get_peak_thresh(sift: *const VlSiftFilt) -> f64;
        fn vl_sift_get_edge_thresh(sift: *const VlSiftFilt) -> f64;
        fn vl_sift_get_norm_thresh(sift: *const VlSiftFilt) -> f64;
        fn vl_sift_get_magnif(sift: *const VlSiftFilt) -> f64;
        fn vl_sift_get_window_size(sift: *const VlSiftFilt) -> f64;
        fn vl_sift_set_peak_thresh(sift: *mut VlSiftFilt, t: f64);
        fn vl_sift_set_edge_thresh(sift: *mut VlSiftFilt, t: f64);
        fn vl_sift_set_norm_thresh(sift: *mut VlSiftFilt, t: f64);
        fn vl_sift_set_magnif(sift: *mut VlSiftFilt, m: f64);
        fn vl_sift_set_window_size(sift: *mut VlSiftFilt, w: f64);
    }
}

unsafe impl ForeignResource for VlSiftFilt {
    type Api = SiftApi;
    const KIND: &'static str = "sift";

    unsafe fn destroy(api: &SiftApi, raw: *mut Self) {
        unsafe { (api.vl_sift_delete)(raw) };
    }
}

/// A detected keypoint (`VlSiftKeypoint`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SiftKeypoint {
    /// Octave index.
    pub o: i32,
    /// Integer column in the octave.
    pub ix: i32,
    /// Integer row in the octave.
    pub iy: i32,
    /// Integer scale level in the octave.
    pub is: i32,
    /// Column in image coordinates.
    pub x: f32,
    /// Row in image coordinates.
    pub y: f32,
    /// Fractional scale level.
    pub s: f32,
    /// Scale in image coordinates.
    pub sigma: f32,
}

unsafe impl ForeignRecord for SiftKeypoint {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlSiftKeypoint",
        fields: &[
            Field::new("o", TypeTag::Int32),
            Field::new("ix", TypeTag::Int32),
            Field::new("iy", TypeTag::Int32),
            Field::new("is", TypeTag::Int32),
            Field::new("x", TypeTag::Float32),
            Field::new("y", TypeTag::Float32),
            Field::new("s", TypeTag::Float32),
            Field::new("sigma", TypeTag::Float32),
        ],
    };
}

/// A SIFT filter for images of one size.
#[derive(Debug)]
pub struct Sift {
    handle: ForeignHandle<VlSiftFilt>,
    width: usize,
    height: usize,
    processing: bool,
}

impl Sift {
    /// Create a filter for `width` × `height` images.
    ///
    /// `noctaves` of -1 uses as many octaves as the image allows;
    /// `o_min` is the first octave and may be negative to upsample.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for an empty or oversized
    /// image and [`FfiError::AllocationFailed`] if the engine cannot
    /// create the filter.
    pub fn new(
        engine: &'static Engine,
        width: usize,
        height: usize,
        noctaves: i32,
        nlevels: i32,
        o_min: i32,
    ) -> FfiResult<Self> {
        let (c_width, c_height) = match (c_int::try_from(width), c_int::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(FfiError::UnsupportedInput(format!(
                    "cannot run sift on a {width}x{height} image"
                )))
            }
        };
        if nlevels < 1 {
            return Err(FfiError::UnsupportedInput(format!("nlevels must be positive, got {nlevels}")));
        }
        // SAFETY: `vl_sift_new` returns a fresh filter or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.sift, engine.handle_config(), |api: &'static SiftApi| {
                (api.vl_sift_new)(c_width, c_height, noctaves, nlevels, o_min)
            })?
        };
        Ok(Self {
            handle,
            width,
            height,
            processing: false,
        })
    }

    /// Start on a new image, computing its first octave.
    ///
    /// Returns `false` if the image has no octave to process.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `image` does not hold
    /// `width * height` values.
    pub fn process_first_octave(&mut self, image: &[f32]) -> FfiResult<bool> {
        check_len(element_count(&[self.width, self.height])?, image.len())?;
        tracing::debug!(width = self.width, height = self.height, "sift first octave");
        self.processing = false;
        // SAFETY: `image` holds `width * height` values; the engine copies
        // them.
        let status = unsafe { (self.handle.api().vl_sift_process_first_octave)(self.handle.as_mut_ptr(), image.as_ptr()) };
        self.processing = octave_status("vl_sift_process_first_octave", status)?;
        Ok(self.processing)
    }

    /// Advance to the next octave; `false` once the last one is done.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no image is being
    /// processed.
    pub fn process_next_octave(&mut self) -> FfiResult<bool> {
        self.require_octave()?;
        self.processing = false;
        // SAFETY: an octave is loaded.
        let status = unsafe { (self.handle.api().vl_sift_process_next_octave)(self.handle.as_mut_ptr()) };
        self.processing = octave_status("vl_sift_process_next_octave", status)?;
        Ok(self.processing)
    }

    /// Detect keypoints in the current octave.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no octave is loaded.
    pub fn detect(&mut self) -> FfiResult<()> {
        self.require_octave()?;
        // SAFETY: an octave is loaded.
        unsafe { (self.handle.api().vl_sift_detect)(self.handle.as_mut_ptr()) };
        Ok(())
    }

    /// Keypoints found by the last [`Sift::detect`].
    #[must_use]
    pub fn keypoints(&self) -> ArrayView<'_, SiftKeypoint> {
        let count = usize::try_from(self.nkeypoints()).unwrap_or(0);
        // SAFETY: the engine holds `nkeypoints` records until the next
        // mutating call.
        unsafe { read_records((self.handle.api().vl_sift_get_keypoints)(self.handle.as_ptr()), count) }
    }

    /// Dominant orientations of `keypoint`, at most four.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no octave is loaded.
    pub fn keypoint_orientations(&mut self, keypoint: &SiftKeypoint) -> FfiResult<Vec<f64>> {
        self.require_octave()?;
        let mut angles = [0.0f64; MAX_ORIENTATIONS];
        // SAFETY: `angles` has room for the engine's maximum of four.
        let count = unsafe {
            (self.handle.api().vl_sift_calc_keypoint_orientations)(self.handle.as_mut_ptr(), angles.as_mut_ptr(), keypoint)
        };
        let count = usize::try_from(count).unwrap_or(0).min(MAX_ORIENTATIONS);
        Ok(angles[..count].to_vec())
    }

    /// Descriptor of `keypoint` at orientation `angle`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no octave is loaded.
    pub fn keypoint_descriptor(&mut self, keypoint: &SiftKeypoint, angle: f64) -> FfiResult<Vec<f32>> {
        self.require_octave()?;
        let mut descriptor = vec![0.0f32; SIFT_DESCRIPTOR_SIZE];
        // SAFETY: `descriptor` holds a full descriptor.
        unsafe {
            (self.handle.api().vl_sift_calc_keypoint_descriptor)(
                self.handle.as_mut_ptr(),
                descriptor.as_mut_ptr(),
                keypoint,
                angle,
            );
        }
        Ok(descriptor)
    }

    /// Descriptor of a frame computed directly on a gradient image.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `image` does not hold
    /// `width * height` values and [`FfiError::UnsupportedInput`] if the
    /// size does not fit the engine.
    #[allow(clippy::too_many_arguments)]
    pub fn raw_descriptor(
        &self,
        image: &[f32],
        width: usize,
        height: usize,
        x: f64,
        y: f64,
        s: f64,
        angle: f64,
    ) -> FfiResult<Vec<f32>> {
        check_len(element_count(&[width, height])?, image.len())?;
        let (Ok(c_width), Ok(c_height)) = (c_int::try_from(width), c_int::try_from(height)) else {
            return Err(FfiError::UnsupportedInput(format!("image of {width}x{height} is too large")));
        };
        let mut descriptor = vec![0.0f32; SIFT_DESCRIPTOR_SIZE];
        // SAFETY: `image` holds `width * height` values and `descriptor` a
        // full descriptor.
        unsafe {
            (self.handle.api().vl_sift_calc_raw_descriptor)(
                self.handle.as_ptr(),
                image.as_ptr(),
                descriptor.as_mut_ptr(),
                c_width,
                c_height,
                x,
                y,
                s,
                angle,
            );
        }
        Ok(descriptor)
    }

    /// A keypoint at `(x, y)` with scale `sigma`, for computing
    /// descriptors of given frames.
    #[must_use]
    pub fn keypoint_init(&self, x: f64, y: f64, sigma: f64) -> SiftKeypoint {
        let mut keypoint = SiftKeypoint::default();
        // SAFETY: `keypoint` is a valid output location.
        unsafe { (self.handle.api().vl_sift_keypoint_init)(self.handle.as_ptr(), &mut keypoint, x, y, sigma) };
        keypoint
    }

    /// Level `s` of the current octave, `octave_width * octave_height`
    /// values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if no octave is loaded and
    /// [`FfiError::UnsupportedInput`] if `s` is outside `-1..=nlevels + 1`.
    pub fn octave(&self, s: i32) -> FfiResult<ArrayView<'_, f32>> {
        self.require_octave()?;
        let nlevels = self.nlevels();
        if !(-1..=nlevels + 1).contains(&s) {
            return Err(FfiError::UnsupportedInput(format!(
                "level {s} outside -1..={}",
                nlevels + 1
            )));
        }
        let count = usize::try_from(self.octave_width()).unwrap_or(0) * usize::try_from(self.octave_height()).unwrap_or(0);
        // SAFETY: the engine holds the level until the next octave, which
        // needs `&mut self`.
        Ok(unsafe { ArrayView::from_raw_parts((self.handle.api().vl_sift_get_octave)(self.handle.as_ptr(), s), count) })
    }

    /// Width of the images this filter was created for.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height of the images this filter was created for.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    engine_getters! {
        /// Index of the current octave.
        octave_index: i32 => vl_sift_get_octave_index;
        /// Number of octaves.
        noctaves: i32 => vl_sift_get_noctaves;
        /// Index of the first octave.
        octave_first: i32 => vl_sift_get_octave_first;
        /// Width of the current octave.
        octave_width: i32 => vl_sift_get_octave_width;
        /// Height of the current octave.
        octave_height: i32 => vl_sift_get_octave_height;
        /// Levels per octave.
        nlevels: i32 => vl_sift_get_nlevels;
        /// Number of keypoints found by the last detection.
        nkeypoints: i32 => vl_sift_get_nkeypoints;
    }

    engine_accessors! {
        /// Minimum contrast of a keypoint.
        peak_thresh, set_peak_thresh: f64 => vl_sift_get_peak_thresh, vl_sift_set_peak_thresh;
        /// Maximum edge ratio of a keypoint.
        edge_thresh, set_edge_thresh: f64 => vl_sift_get_edge_thresh, vl_sift_set_edge_thresh;
        /// Minimum gradient norm of a descriptor.
        norm_thresh, set_norm_thresh: f64 => vl_sift_get_norm_thresh, vl_sift_set_norm_thresh;
        /// Descriptor bin size relative to the keypoint scale.
        magnif, set_magnif: f64 => vl_sift_get_magnif, vl_sift_set_magnif;
        /// Gaussian window size of a descriptor, in bins.
        window_size, set_window_size: f64 => vl_sift_get_window_size, vl_sift_set_window_size;
    }

    fn require_octave(&self) -> FfiResult<()> {
        if self.processing {
            Ok(())
        } else {
            Err(FfiError::InvalidHandleState {
                resource: VlSiftFilt::KIND,
                reason: "no octave loaded; call process_first_octave first".to_string(),
            })
        }
    }
}

/// Map an octave step's status to "octave available".
fn octave_status(operation: &'static str, status: c_int) -> FfiResult<bool> {
    match status {
        VL_ERR_OK => Ok(true),
        VL_ERR_EOF => Ok(false),
        code => check_status(operation, code).map(|()| false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16x16 image with bright pixels at even coordinates.
    fn image() -> Vec<f32> {
        let mut image = vec![0.0f32; 256];
        image[4 * 16 + 6] = 1.0;
        image[10 * 16 + 2] = 0.8;
        image
    }

    fn sift() -> Sift {
        Sift::new(Engine::mock(), 16, 16, 2, 3, 0).unwrap()
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(Sift::new(Engine::mock(), 0, 16, -1, 3, 0), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(Sift::new(Engine::mock(), 16, 16, -1, 0, 0), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_octave_iteration_ends_with_false() {
        let mut sift = sift();
        assert!(sift.process_first_octave(&image()).unwrap());
        assert_eq!(sift.octave_index(), 0);
        assert_eq!(sift.octave_width(), 16);
        assert!(sift.process_next_octave().unwrap());
        assert_eq!(sift.octave_index(), 1);
        assert_eq!(sift.octave_height(), 8);
        assert!(!sift.process_next_octave().unwrap());
        assert!(matches!(sift.detect(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_calls_before_first_octave_are_invalid_state() {
        let mut sift = sift();
        assert!(matches!(sift.process_next_octave(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(sift.detect(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(sift.octave(0), Err(FfiError::InvalidHandleState { .. })));
        assert!(sift.keypoints().is_empty());
    }

    #[test]
    fn test_failed_first_octave_stops_processing() {
        let mut sift = sift();
        assert!(sift.process_first_octave(&image()).unwrap());
        let mut bad = image();
        bad[3] = f32::INFINITY;
        assert!(matches!(
            sift.process_first_octave(&bad),
            Err(FfiError::Engine { operation: "vl_sift_process_first_octave", .. })
        ));
        assert!(matches!(sift.detect(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(sift.process_next_octave(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_oversized_raw_image_is_rejected() {
        let sift = sift();
        assert!(matches!(
            sift.raw_descriptor(&[], usize::MAX, 2, 0.0, 0.0, 1.0, 0.0),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_detect_and_describe() {
        let mut sift = sift();
        sift.process_first_octave(&image()).unwrap();
        sift.detect().unwrap();
        assert_eq!(sift.nkeypoints(), 2);
        let keypoints = sift.keypoints().to_vec();
        assert_eq!(keypoints.len(), 2);
        assert_eq!((keypoints[0].x, keypoints[0].y), (6.0, 4.0));

        let angles = sift.keypoint_orientations(&keypoints[0]).unwrap();
        assert!(!angles.is_empty() && angles.len() <= 4);
        let descriptor = sift.keypoint_descriptor(&keypoints[0], angles[0]).unwrap();
        assert_eq!(descriptor.len(), SIFT_DESCRIPTOR_SIZE);
    }

    #[test]
    fn test_octave_levels() {
        let mut sift = sift();
        sift.process_first_octave(&image()).unwrap();
        assert_eq!(sift.octave(0).unwrap().len(), 256);
        assert_eq!(sift.octave(-1).unwrap().len(), 256);
        assert!(sift.octave(5).is_err());
    }

    #[test]
    fn test_keypoint_init_and_raw_descriptor() {
        let sift = sift();
        let keypoint = sift.keypoint_init(5.0, 7.0, 2.0);
        assert_eq!((keypoint.x, keypoint.y, keypoint.sigma), (5.0, 7.0, 2.0));
        let descriptor = sift.raw_descriptor(&image(), 16, 16, 5.0, 7.0, 2.0, 0.0).unwrap();
        assert_eq!(descriptor.len(), SIFT_DESCRIPTOR_SIZE);
        assert!(sift.raw_descriptor(&image(), 8, 8, 5.0, 7.0, 2.0, 0.0).is_err());
    }

    #[test]
    fn test_thresholds() {
        let mut sift = sift();
        sift.set_peak_thresh(0.9);
        sift.set_edge_thresh(5.0);
        sift.set_norm_thresh(0.1);
        sift.set_magnif(4.0);
        sift.set_window_size(1.5);
        assert_eq!(sift.peak_thresh(), 0.9);
        assert_eq!(sift.edge_thresh(), 5.0);
        assert_eq!(sift.norm_thresh(), 0.1);
        assert_eq!(sift.magnif(), 4.0);
        assert_eq!(sift.window_size(), 1.5);
        assert_eq!(sift.noctaves(), 2);
        assert_eq!(sift.octave_first(), 0);
        assert_eq!(sift.nlevels(), 3);

        sift.process_first_octave(&image()).unwrap();
        sift.detect().unwrap();
        assert_eq!(sift.keypoints().len(), 1);
    }

    #[test]
    fn test_keypoint_layout() {
        assert_eq!(SiftKeypoint::LAYOUT.packed_size(), std::mem::size_of::<SiftKeypoint>());
    }
}
