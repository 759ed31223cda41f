//! Quick shift mode seeking.
//!
//! Images are stored with the row index varying fastest, one plane per
//! channel: the value of channel `k` at row `y`, column `x` is at
//! `y + height * x + height * width * k`. The output maps use the same
//! pixel order.

use crate::{check_len, element_count};
use crate::engine::Engine;
use crate::sys::{from_vl_bool, to_vl_bool, VlBool};
use std::ffi::c_int;
use vl_ffi::{ArrayView, FfiError, FfiResult, ForeignHandle, ForeignResource};

/// Opaque `VlQS`.
#[repr(C)]
pub(crate) struct VlQS {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_quickshift_*` entry points.
    pub(crate) struct QuickShiftApi {
        fn vl_quickshift_new(image: *const f64, height: c_int, width: c_int, channels: c_int) -> *mut VlQS;
        fn vl_quickshift_delete(qs: *mut VlQS);
        fn vl_quickshift_process(qs: *mut VlQS);
        fn vl_quickshift_get_max_dist(qs: *const VlQS) -> f64;
        fn vl_quickshift_set_max_dist(qs: *mut VlQS, tau: f64);
        fn vl_quickshift_get_kernel_size(qs: *const VlQS) -> f64;
        fn vl_quickshift_set_kernel_size(qs: *mut VlQS, sigma: f64);
        fn vl_quickshift_get_medoid(qs: *const VlQS) -> VlBool;
        fn vl_quickshift_set_medoid(qs: *mut VlQS, medoid: VlBool);
        fn vl_quickshift_get_parents(qs: *const VlQS) -> *mut c_int;
        fn vl_quickshift_get_dists(qs: *const VlQS) -> *mut f64;
        fn vl_quickshift_get_density(qs: *const VlQS) -> *mut f64;
    }
}

unsafe impl ForeignResource for VlQS {
    type Api = QuickShiftApi;
    const KIND: &'static str = "quickshift";

    unsafe fn destroy(api: &QuickShiftApi, raw: *mut Self) {
        unsafe { (api.vl_quickshift_delete)(raw) };
    }
}

/// A quick shift segmentation of one image.
///
/// The engine reads the image through the pointer given at creation, so
/// the binding keeps its own copy for as long as the object lives.
#[derive(Debug)]
pub struct QuickShift {
    // Declared before `image` so the engine object is deleted first.
    handle: ForeignHandle<VlQS>,
    image: Box<[f64]>,
    height: usize,
    width: usize,
    channels: usize,
    processed: bool,
}

impl QuickShift {
    /// Prepare a segmentation of `image`, `height * width * channels`
    /// values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for a zero or oversized
    /// dimension and [`FfiError::SizeMismatch`] if `image` has the wrong
    /// length.
    pub fn new(
        engine: &'static Engine,
        image: &[f64],
        height: usize,
        width: usize,
        channels: usize,
    ) -> FfiResult<Self> {
        let dims = [height, width, channels].map(c_int::try_from);
        let [Ok(c_height), Ok(c_width), Ok(c_channels)] = dims else {
            return Err(FfiError::UnsupportedInput(format!(
                "image of {height}x{width}x{channels} is too large"
            )));
        };
        if height == 0 || width == 0 || channels == 0 {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot segment a {height}x{width}x{channels} image"
            )));
        }
        check_len(element_count(&[height, width, channels])?, image.len())?;

        let image: Box<[f64]> = image.into();
        // SAFETY: `image` is owned by the returned binding and outlives the
        // engine object.
        let handle = unsafe {
            ForeignHandle::create(&engine.quickshift, engine.handle_config(), |api: &'static QuickShiftApi| {
                (api.vl_quickshift_new)(image.as_ptr(), c_height, c_width, c_channels)
            })?
        };
        Ok(Self {
            handle,
            image,
            height,
            width,
            channels,
            processed: false,
        })
    }

    /// Compute densities and the parent forest.
    pub fn process(&mut self) {
        tracing::debug!(height = self.height, width = self.width, "quickshift process");
        // SAFETY: the image is alive for the object's lifetime.
        unsafe { (self.handle.api().vl_quickshift_process)(self.handle.as_mut_ptr()) };
        self.processed = true;
    }

    /// Parent of every pixel; roots are their own parent.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before [`QuickShift::process`].
    pub fn parents(&self) -> FfiResult<ArrayView<'_, i32>> {
        self.require_processed()?;
        // SAFETY: the engine holds one parent per pixel.
        Ok(unsafe { ArrayView::from_raw_parts((self.handle.api().vl_quickshift_get_parents)(self.handle.as_ptr()), self.pixels()) })
    }

    /// Distance of every pixel to its parent; infinite at roots.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before [`QuickShift::process`].
    pub fn dists(&self) -> FfiResult<ArrayView<'_, f64>> {
        self.require_processed()?;
        // SAFETY: the engine holds one distance per pixel.
        Ok(unsafe { ArrayView::from_raw_parts((self.handle.api().vl_quickshift_get_dists)(self.handle.as_ptr()), self.pixels()) })
    }

    /// Estimated density at every pixel.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before [`QuickShift::process`].
    pub fn density(&self) -> FfiResult<ArrayView<'_, f64>> {
        self.require_processed()?;
        // SAFETY: the engine holds one density per pixel.
        Ok(unsafe { ArrayView::from_raw_parts((self.handle.api().vl_quickshift_get_density)(self.handle.as_ptr()), self.pixels()) })
    }

    /// The image being segmented.
    #[must_use]
    pub fn image(&self) -> &[f64] {
        &self.image
    }

    /// Image height.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Image width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of channels.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Whether parents are chosen among image pixels as medoids.
    #[must_use]
    pub fn medoid(&self) -> bool {
        // SAFETY: the handle is live.
        from_vl_bool(unsafe { (self.handle.api().vl_quickshift_get_medoid)(self.handle.as_ptr()) })
    }

    /// Set [`QuickShift::medoid`].
    pub fn set_medoid(&mut self, medoid: bool) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_quickshift_set_medoid)(self.handle.as_mut_ptr(), to_vl_bool(medoid)) };
    }

    engine_accessors! {
        /// Largest distance between a pixel and its parent.
        max_dist, set_max_dist: f64 => vl_quickshift_get_max_dist, vl_quickshift_set_max_dist;
        /// Standard deviation of the density kernel.
        kernel_size, set_kernel_size: f64 => vl_quickshift_get_kernel_size, vl_quickshift_set_kernel_size;
    }

    const fn pixels(&self) -> usize {
        self.height * self.width
    }

    fn require_processed(&self) -> FfiResult<()> {
        if self.processed {
            Ok(())
        } else {
            Err(FfiError::InvalidHandleState {
                resource: VlQS::KIND,
                reason: "call process first".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    /// One row, two flat segments of three pixels.
    fn image() -> Vec<f64> {
        vec![0.0, 0.0, 0.0, 10.0, 10.0, 10.0]
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(QuickShift::new(Engine::mock(), &[], 0, 4, 1), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(
            QuickShift::new(Engine::mock(), &image(), 1, 4, 1),
            Err(FfiError::SizeMismatch { expected: 4, actual: 6 })
        ));
        let side = std::ffi::c_int::MAX as usize;
        assert!(matches!(
            QuickShift::new(Engine::mock(), &[], side, side, side),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_outputs_require_process() {
        let qs = QuickShift::new(Engine::mock(), &image(), 1, 6, 1).unwrap();
        assert!(matches!(qs.parents(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(qs.dists(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(qs.density(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_segments_flat_regions() {
        let mut qs = QuickShift::new(Engine::mock(), &image(), 1, 6, 1).unwrap();
        qs.set_kernel_size(1.0);
        qs.set_max_dist(3.0);
        qs.process();

        assert_eq!(qs.parents().unwrap().as_slice(), &[1, 1, 1, 4, 4, 4]);
        let dists = qs.dists().unwrap();
        assert_eq!(dists[0], 1.0);
        assert!(dists[1].is_infinite());
        let density = qs.density().unwrap();
        assert_eq!(density.len(), 6);
        assert!(density[1] > density[0]);
    }

    #[test]
    fn test_parameters_and_dimensions() {
        let mut qs = QuickShift::new(Engine::mock(), &image(), 2, 3, 1).unwrap();
        qs.set_medoid(true);
        assert!(qs.medoid());
        qs.set_medoid(false);
        assert!(!qs.medoid());
        assert_eq!((qs.height(), qs.width(), qs.channels()), (2, 3, 1));
        assert_eq!(qs.image(), image().as_slice());
    }

    #[test]
    fn test_image_outlives_engine_object() {
        let before = mock::live_objects_of(VlQS::KIND);
        let qs = QuickShift::new(Engine::mock(), &image(), 1, 6, 1).unwrap();
        assert_eq!(mock::live_objects_of(VlQS::KIND), before + 1);
        drop(qs);
        assert_eq!(mock::live_objects_of(VlQS::KIND), before);
    }
}
