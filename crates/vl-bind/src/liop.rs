//! Local intensity order pattern descriptors.
//!
//! Describes a square patch by the relative order of intensities sampled
//! around each pixel, pooled over bins of the patch's intensity order.

use crate::engine::Engine;
use crate::sys::VlSize;
use crate::{check_len, element_count};
use std::ffi::c_int;
use vl_ffi::{FfiError, FfiResult, ForeignHandle, ForeignResource};

/// Largest supported number of neighbours; the descriptor grows with its
/// factorial.
pub const LIOP_MAX_NEIGHBOURS: usize = 10;

/// Opaque `VlLiopDesc`.
#[repr(C)]
pub(crate) struct VlLiopDesc {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_liopdesc_*` entry points.
    pub(crate) struct LiopApi {
        fn vl_liopdesc_new(num_neighbours: c_int, num_spatial_bins: c_int, radius: f32, side_length: VlSize) -> *mut VlLiopDesc;
        fn vl_liopdesc_new_basic(side_length: VlSize) -> *mut VlLiopDesc;
        fn vl_liopdesc_delete(liop: *mut VlLiopDesc);
        fn vl_liopdesc_process(liop: *mut VlLiopDesc, descriptor: *mut f32, patch: *const f32);
        fn vl_liopdesc_get_dimension(liop: *const VlLiopDesc) -> VlSize;
        fn vl_liopdesc_get_num_neighbours(liop: *const VlLiopDesc) -> VlSize;
        fn vl_liopdesc_get_intensity_threshold(liop: *const VlLiopDesc) -> f32;
        fn vl_liopdesc_set_intensity_threshold(liop: *mut VlLiopDesc, threshold: f32);
        fn vl_liopdesc_get_num_spatial_bins(liop: *const VlLiopDesc) -> VlSize;
        fn vl_liopdesc_get_neighbourhood_radius(liop: *const VlLiopDesc) -> f64;
    }
}

unsafe impl ForeignResource for VlLiopDesc {
    type Api = LiopApi;
    const KIND: &'static str = "liop";

    unsafe fn destroy(api: &LiopApi, raw: *mut Self) {
        unsafe { (api.vl_liopdesc_delete)(raw) };
    }
}

/// A LIOP extractor for patches of one size.
#[derive(Debug)]
pub struct Liop {
    handle: ForeignHandle<VlLiopDesc>,
    side_length: usize,
}

impl Liop {
    /// Create an extractor sampling `num_neighbours` points on a circle of
    /// `radius` pixels, pooled into `num_spatial_bins` bins, for patches
    /// of `side_length` x `side_length` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `num_neighbours` is
    /// outside `1..=10`, `num_spatial_bins` or `side_length` is zero, or
    /// `radius` is not positive.
    pub fn new(
        engine: &'static Engine,
        num_neighbours: usize,
        num_spatial_bins: usize,
        radius: f32,
        side_length: usize,
    ) -> FfiResult<Self> {
        if !(1..=LIOP_MAX_NEIGHBOURS).contains(&num_neighbours) {
            return Err(FfiError::UnsupportedInput(format!(
                "{num_neighbours} neighbours outside 1..={LIOP_MAX_NEIGHBOURS}"
            )));
        }
        let Ok(c_bins) = c_int::try_from(num_spatial_bins) else {
            return Err(FfiError::UnsupportedInput(format!("{num_spatial_bins} spatial bins is too many")));
        };
        if c_bins == 0 || side_length == 0 || radius.is_nan() || radius <= 0.0 {
            return Err(FfiError::UnsupportedInput(format!(
                "invalid liop layout: {num_spatial_bins} bins, radius {radius}, side {side_length}"
            )));
        }
        element_count(&[side_length, side_length])?;
        let c_neighbours = c_int::try_from(num_neighbours).unwrap_or(c_int::MAX);
        // SAFETY: `vl_liopdesc_new` returns a fresh extractor or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.liop, engine.handle_config(), |api: &'static LiopApi| {
                (api.vl_liopdesc_new)(c_neighbours, c_bins, radius, side_length)
            })?
        };
        Ok(Self { handle, side_length })
    }

    /// Create an extractor with the standard layout: four neighbours,
    /// six spatial bins and a radius of two pixels.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `side_length` is zero.
    pub fn new_basic(engine: &'static Engine, side_length: usize) -> FfiResult<Self> {
        if side_length == 0 {
            return Err(FfiError::UnsupportedInput("patch side must be positive".to_string()));
        }
        element_count(&[side_length, side_length])?;
        // SAFETY: `vl_liopdesc_new_basic` returns a fresh extractor or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.liop, engine.handle_config(), |api: &'static LiopApi| (api.vl_liopdesc_new_basic)(side_length))?
        };
        Ok(Self { handle, side_length })
    }

    /// Side of the patches this extractor accepts.
    #[must_use]
    pub const fn side_length(&self) -> usize {
        self.side_length
    }

    /// Descriptor of `patch`, `side_length²` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `patch` has the wrong length.
    pub fn process(&mut self, patch: &[f32]) -> FfiResult<Vec<f32>> {
        check_len(self.side_length * self.side_length, patch.len())?;
        let mut descriptor = vec![0.0f32; self.dimension()];
        // SAFETY: `descriptor` holds a full descriptor and `patch` a full
        // patch.
        unsafe {
            (self.handle.api().vl_liopdesc_process)(self.handle.as_mut_ptr(), descriptor.as_mut_ptr(), patch.as_ptr());
        }
        Ok(descriptor)
    }

    engine_getters! {
        /// Descriptor length, `num_spatial_bins * num_neighbours!`.
        dimension: VlSize => vl_liopdesc_get_dimension;
        /// Points sampled around each pixel.
        num_neighbours: VlSize => vl_liopdesc_get_num_neighbours;
        /// Bins of the patch intensity order.
        num_spatial_bins: VlSize => vl_liopdesc_get_num_spatial_bins;
        /// Radius of the sampling circle.
        neighbourhood_radius: f64 => vl_liopdesc_get_neighbourhood_radius;
    }

    engine_accessors! {
        /// Intensity difference below which neighbours are not weighted;
        /// negative selects the engine's adaptive default.
        intensity_threshold, set_intensity_threshold: f32 => vl_liopdesc_get_intensity_threshold, vl_liopdesc_set_intensity_threshold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(side: usize) -> Vec<f32> {
        (0..side * side).map(|i| i as f32).collect()
    }

    #[test]
    fn test_basic_layout() {
        let liop = Liop::new_basic(Engine::mock(), 11).unwrap();
        assert_eq!(liop.num_neighbours(), 4);
        assert_eq!(liop.num_spatial_bins(), 6);
        assert_eq!(liop.dimension(), 144);
        assert_eq!(liop.neighbourhood_radius(), 2.0);
        assert_eq!(liop.side_length(), 11);
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(Liop::new(Engine::mock(), 0, 6, 2.0, 11), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(Liop::new(Engine::mock(), 11, 6, 2.0, 11), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(Liop::new(Engine::mock(), 4, 0, 2.0, 11), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(Liop::new(Engine::mock(), 4, 6, f32::NAN, 11), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(Liop::new_basic(Engine::mock(), 0), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_descriptor() {
        let mut liop = Liop::new(Engine::mock(), 3, 2, 1.5, 9).unwrap();
        assert_eq!(liop.dimension(), 12);
        let descriptor = liop.process(&ramp(9)).unwrap();
        assert_eq!(descriptor.len(), 12);
        let norm: f32 = descriptor.iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(matches!(liop.process(&ramp(8)), Err(FfiError::SizeMismatch { .. })));
    }

    #[test]
    fn test_flat_patch_has_empty_descriptor() {
        let mut liop = Liop::new_basic(Engine::mock(), 7).unwrap();
        let descriptor = liop.process(&[1.0; 49]).unwrap();
        assert!(descriptor.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_intensity_threshold() {
        let mut liop = Liop::new_basic(Engine::mock(), 7).unwrap();
        liop.set_intensity_threshold(0.25);
        assert_eq!(liop.intensity_threshold(), 0.25);
    }
}
