//! Local binary patterns.
//!
//! Each cell of `cell_size` pixels gets a histogram of the quantized
//! 3x3 patterns of its pixels. Histograms are stored one component plane
//! after another, `(width / cell_size) * (height / cell_size)` cells per
//! plane.

use crate::engine::Engine;
use crate::sys::{to_vl_bool, VlBool, VlSize};
use crate::{check_len, element_count};
use std::ffi::c_int;
use vl_ffi::{FfiError, FfiResult, ForeignHandle, ForeignResource};

/// Opaque `VlLbp`.
#[repr(C)]
pub(crate) struct VlLbp {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_lbp_*` entry points.
    pub(crate) struct LbpApi {
        fn vl_lbp_new(mapping: c_int, transposed: VlBool) -> *mut VlLbp;
        fn vl_lbp_delete(lbp: *mut VlLbp);
        fn vl_lbp_process(lbp: *mut VlLbp, features: *mut f32, image: *const f32, width: VlSize, height: VlSize, cell_size: VlSize);
        fn vl_lbp_get_dimension(lbp: *const VlLbp) -> VlSize;
    }
}

unsafe impl ForeignResource for VlLbp {
    type Api = LbpApi;
    const KIND: &'static str = "lbp";

    unsafe fn destroy(api: &LbpApi, raw: *mut Self) {
        unsafe { (api.vl_lbp_delete)(raw) };
    }
}

engine_enum! {
    /// Pattern quantization (`VlLbpMappingType`).
    pub enum LbpMapping {
        /// Uniform patterns: 58 bins.
        Uniform = 0,
    }
}

/// A local binary pattern extractor.
#[derive(Debug)]
pub struct Lbp {
    handle: ForeignHandle<VlLbp>,
    mapping: LbpMapping,
}

impl Lbp {
    /// Create an extractor. `transposed` selects images stored with the
    /// row index varying fastest.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot create
    /// the extractor.
    pub fn new(engine: &'static Engine, mapping: LbpMapping, transposed: bool) -> FfiResult<Self> {
        // SAFETY: `vl_lbp_new` returns a fresh extractor or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.lbp, engine.handle_config(), |api: &'static LbpApi| {
                (api.vl_lbp_new)(mapping.raw(), to_vl_bool(transposed))
            })?
        };
        Ok(Self { handle, mapping })
    }

    /// The pattern quantization.
    #[must_use]
    pub const fn mapping(&self) -> LbpMapping {
        self.mapping
    }

    /// Cell histograms of `image`, `width * height` values.
    ///
    /// Partial cells at the right and bottom edges are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for a zero cell size or an
    /// image smaller than one cell, and [`FfiError::SizeMismatch`] if
    /// `image` has the wrong length.
    pub fn process(&mut self, image: &[f32], width: usize, height: usize, cell_size: usize) -> FfiResult<Vec<f32>> {
        if cell_size == 0 || width < cell_size || height < cell_size {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot fit {cell_size}-pixel cells in a {width}x{height} image"
            )));
        }
        check_len(element_count(&[width, height])?, image.len())?;
        let cells = (width / cell_size) * (height / cell_size);
        let mut features = vec![0.0f32; element_count(&[cells, self.dimension()])?];
        tracing::debug!(width, height, cell_size, "lbp process");
        // SAFETY: `features` holds one histogram per cell and `image` the
        // full image.
        unsafe {
            (self.handle.api().vl_lbp_process)(
                self.handle.as_mut_ptr(),
                features.as_mut_ptr(),
                image.as_ptr(),
                width,
                height,
                cell_size,
            );
        }
        Ok(features)
    }

    engine_getters! {
        /// Histogram bins per cell.
        dimension: VlSize => vl_lbp_get_dimension;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_dimension() {
        let lbp = Lbp::new(Engine::mock(), LbpMapping::Uniform, false).unwrap();
        assert_eq!(lbp.dimension(), 58);
        assert_eq!(lbp.mapping(), LbpMapping::Uniform);
    }

    #[test]
    fn test_histograms_per_cell() {
        let mut lbp = Lbp::new(Engine::mock(), LbpMapping::Uniform, false).unwrap();
        let image: Vec<f32> = (0..100).map(|i| (i % 10) as f32).collect();
        let features = lbp.process(&image, 10, 10, 4).unwrap();
        // 2x2 full cells.
        assert_eq!(features.len(), 4 * 58);
        let cell_totals: Vec<f32> = (0..4).map(|c| (0..58).map(|k| features[c + 4 * k]).sum()).collect();
        assert!(cell_totals.iter().all(|&total| (total - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_flat_image_is_one_pattern() {
        let mut lbp = Lbp::new(Engine::mock(), LbpMapping::Uniform, true).unwrap();
        let features = lbp.process(&[3.0; 64], 8, 8, 8).unwrap();
        assert_eq!(features.iter().filter(|&&v| v > 0.0).count(), 1);
    }

    #[test]
    fn test_process_validates() {
        let mut lbp = Lbp::new(Engine::mock(), LbpMapping::Uniform, false).unwrap();
        assert!(matches!(lbp.process(&[0.0; 16], 4, 4, 0), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(lbp.process(&[0.0; 16], 4, 4, 5), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(lbp.process(&[0.0; 15], 4, 4, 2), Err(FfiError::SizeMismatch { .. })));
    }
}
