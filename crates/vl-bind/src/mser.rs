//! Maximally stable extremal regions.

use crate::{check_len, element_count};
use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use vl_ffi::{read_records, ArrayView, FfiError, FfiResult, Field, ForeignHandle, ForeignRecord, ForeignResource, RecordLayout, TypeTag};

/// Opaque `VlMserFilt`.
#[repr(C)]
pub(crate) struct VlMserFilt {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_mser_*` entry points.
    pub(crate) struct MserApi {
        fn vl_mser_new(ndims: c_int, dims: *const c_int) -> *mut VlMserFilt;
        fn vl_mser_delete(mser: *mut VlMserFilt);
        fn vl_mser_process(mser: *mut VlMserFilt, image: *const u8);
        fn vl_mser_ell_fit(mser: *mut VlMserFilt);
        fn vl_mser_get_regions_num(mser: *const VlMserFilt) -> u32;
        fn vl_mser_get_regions(mser: *const VlMserFilt) -> *const u32;
        fn vl_mser_get_ell(mser: *const VlMserFilt) -> *const f32;
        fn vl_mser_get_ell_num(mser: *const VlMserFilt) -> u32;
        fn vl_mser_get_ell_dof(mser: *const VlMserFilt) -> u32;
        fn vl_mser_get_stats(mser: *const VlMserFilt) -> *const MserStats;
        fn vl_mser_get_delta(mser: *const VlMserFilt) -> u8;
        fn vl_mser_set_delta(mser: *mut VlMserFilt, delta: u8);
        fn vl_mser_get_min_area(mser: *const VlMserFilt) -> f64;
        fn vl_mser_set_min_area(mser: *mut VlMserFilt, area: f64);
        fn vl_mser_get_max_area(mser: *const VlMserFilt) -> f64;
        fn vl_mser_set_max_area(mser: *mut VlMserFilt, area: f64);
        fn vl_mser_get_max_variation(mser: *const VlMserFilt) -> f64;
        fn vl_mser_set_max_variation(mser: *mut VlMserFilt, variation: f64);
        fn vl_mser_get_min_diversity(mser: *const VlMserFilt) -> f64;
        fn vl_mser_set_min_diversity(mser: *mut VlMserFilt, diversity: f64);
    }
}

unsafe impl ForeignResource for VlMserFilt {
    type Api = MserApi;
    const KIND: &'static str = "mser";

    unsafe fn destroy(api: &MserApi, raw: *mut Self) {
        unsafe { (api.vl_mser_delete)(raw) };
    }
}

/// Counters from the last [`Mser::process`] (`VlMserStats`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MserStats {
    /// Extremal regions found.
    pub num_extremal: i32,
    /// Regions rejected as unstable.
    pub num_unstable: i32,
    /// Regions rejected by the maximum variation.
    pub num_abs_unstable: i32,
    /// Regions rejected as too large.
    pub num_too_big: i32,
    /// Regions rejected as too small.
    pub num_too_small: i32,
    /// Regions rejected as duplicates.
    pub num_duplicates: i32,
}

unsafe impl ForeignRecord for MserStats {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlMserStats",
        fields: &[
            Field::new("num_extremal", TypeTag::Int32),
            Field::new("num_unstable", TypeTag::Int32),
            Field::new("num_abs_unstable", TypeTag::Int32),
            Field::new("num_too_big", TypeTag::Int32),
            Field::new("num_too_small", TypeTag::Int32),
            Field::new("num_duplicates", TypeTag::Int32),
        ],
    };
}

/// An MSER filter for images of fixed dimensions.
///
/// Regions are reported by the linear index of a seed pixel; ellipses are
/// fitted on request by [`Mser::ell_fit`].
#[derive(Debug)]
pub struct Mser {
    handle: ForeignHandle<VlMserFilt>,
    dims: Vec<usize>,
    processed: bool,
}

impl Mser {
    /// Create a filter for images with the given dimensions, fastest
    /// varying first.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `dims` is empty, contains
    /// a zero or does not fit the engine's integer type.
    pub fn new(engine: &'static Engine, dims: &[usize]) -> FfiResult<Self> {
        if dims.is_empty() || dims.contains(&0) {
            return Err(FfiError::UnsupportedInput(format!("invalid image dimensions {dims:?}")));
        }
        let c_dims = dims
            .iter()
            .map(|&d| c_int::try_from(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| FfiError::UnsupportedInput(format!("image dimensions {dims:?} are too large")))?;
        let ndims = c_int::try_from(c_dims.len())
            .map_err(|_| FfiError::UnsupportedInput(format!("{} dimensions is too many", dims.len())))?;
        element_count(dims)?;
        // SAFETY: `c_dims` holds `ndims` values; the engine copies them.
        let handle = unsafe {
            ForeignHandle::create(&engine.mser, engine.handle_config(), |api: &'static MserApi| {
                (api.vl_mser_new)(ndims, c_dims.as_ptr())
            })?
        };
        Ok(Self {
            handle,
            dims: dims.to_vec(),
            processed: false,
        })
    }

    /// Image dimensions this filter was created for.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of pixels in an image.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Extract regions from `image`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] unless `image` holds one value
    /// per pixel.
    pub fn process(&mut self, image: &[u8]) -> FfiResult<()> {
        check_len(self.pixel_count(), image.len())?;
        tracing::debug!(pixels = image.len(), "mser process");
        // SAFETY: `image` holds one value per pixel.
        unsafe { (self.handle.api().vl_mser_process)(self.handle.as_mut_ptr(), image.as_ptr()) };
        self.processed = true;
        Ok(())
    }

    /// Fit an ellipse to every region of the last image.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before the first
    /// [`Mser::process`].
    pub fn ell_fit(&mut self) -> FfiResult<()> {
        if !self.processed {
            return Err(FfiError::InvalidHandleState {
                resource: VlMserFilt::KIND,
                reason: "no image processed".to_string(),
            });
        }
        // SAFETY: regions exist for the last image.
        unsafe { (self.handle.api().vl_mser_ell_fit)(self.handle.as_mut_ptr()) };
        Ok(())
    }

    /// Seed pixel of every region.
    #[must_use]
    pub fn regions(&self) -> ArrayView<'_, u32> {
        let count = self.regions_num() as usize;
        // SAFETY: the engine holds `regions_num` values until the next
        // `process`.
        unsafe { ArrayView::from_raw_parts((self.handle.api().vl_mser_get_regions)(self.handle.as_ptr()), count) }
    }

    /// Fitted ellipses, `ell_dof` values each.
    #[must_use]
    pub fn ellipses(&self) -> ArrayView<'_, f32> {
        let count = self.ell_num() as usize * self.ell_dof() as usize;
        // SAFETY: the engine holds `ell_num * ell_dof` values until the
        // next `process` or `ell_fit`.
        unsafe { ArrayView::from_raw_parts((self.handle.api().vl_mser_get_ell)(self.handle.as_ptr()), count) }
    }

    /// Counters from the last [`Mser::process`].
    #[must_use]
    pub fn stats(&self) -> MserStats {
        // SAFETY: the engine keeps one stats record for the filter's
        // lifetime.
        let stats = unsafe { read_records((self.handle.api().vl_mser_get_stats)(self.handle.as_ptr()), 1) };
        stats.first().copied().unwrap_or_default()
    }

    engine_getters! {
        /// Number of regions found by the last [`Mser::process`].
        regions_num: u32 => vl_mser_get_regions_num;
        /// Number of fitted ellipses.
        ell_num: u32 => vl_mser_get_ell_num;
        /// Values per ellipse: the center followed by the upper triangle
        /// of the covariance.
        ell_dof: u32 => vl_mser_get_ell_dof;
    }

    engine_accessors! {
        /// Intensity step used to measure stability.
        delta, set_delta: u8 => vl_mser_get_delta, vl_mser_set_delta;
        /// Minimum region area, relative to the image.
        min_area, set_min_area: f64 => vl_mser_get_min_area, vl_mser_set_min_area;
        /// Maximum region area, relative to the image.
        max_area, set_max_area: f64 => vl_mser_get_max_area, vl_mser_set_max_area;
        /// Maximum absolute stability score.
        max_variation, set_max_variation: f64 => vl_mser_get_max_variation, vl_mser_set_max_variation;
        /// Minimum diversity between nested regions.
        min_diversity, set_min_diversity: f64 => vl_mser_get_min_diversity, vl_mser_set_min_diversity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 6x5 image: a 2x2 block at (1,1) and a single pixel at (5,4).
    fn image() -> Vec<u8> {
        let mut image = vec![0u8; 30];
        for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
            image[y * 6 + x] = 200;
        }
        image[4 * 6 + 5] = 255;
        image
    }

    #[test]
    fn test_new_validates_dims() {
        assert!(matches!(Mser::new(Engine::mock(), &[]), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(Mser::new(Engine::mock(), &[4, 0]), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_process_checks_length() {
        let mut mser = Mser::new(Engine::mock(), &[6, 5]).unwrap();
        assert_eq!(mser.pixel_count(), 30);
        assert_eq!(
            mser.process(&[0u8; 29]),
            Err(FfiError::SizeMismatch {
                expected: 30,
                actual: 29
            })
        );
    }

    #[test]
    fn test_regions_and_ellipses() {
        let mut mser = Mser::new(Engine::mock(), &[6, 5]).unwrap();
        assert!(matches!(mser.ell_fit(), Err(FfiError::InvalidHandleState { .. })));
        mser.process(&image()).unwrap();
        assert_eq!(mser.regions_num(), 2);
        assert_eq!(mser.regions().as_slice(), &[7, 29]);
        assert_eq!(mser.stats().num_extremal, 2);

        mser.ell_fit().unwrap();
        assert_eq!(mser.ell_num(), 2);
        assert_eq!(mser.ell_dof(), 5);
        let ellipses = mser.ellipses();
        assert_eq!(ellipses.len(), 10);
        assert_eq!(&ellipses[..5], &[1.5, 1.5, 0.25, 0.0, 0.25]);
        assert_eq!(&ellipses[5..7], &[5.0, 4.0]);
    }

    #[test]
    fn test_area_limits_reject_regions() {
        let mut mser = Mser::new(Engine::mock(), &[6, 5]).unwrap();
        mser.set_min_area(0.2);
        mser.process(&image()).unwrap();
        assert_eq!(mser.regions_num(), 0);
        assert!(mser.regions().is_empty());
        assert_eq!(mser.stats().num_too_small, 2);
    }

    #[test]
    fn test_parameters() {
        let mut mser = Mser::new(Engine::mock(), &[6, 5]).unwrap();
        mser.set_delta(10);
        mser.set_max_area(0.5);
        mser.set_max_variation(0.3);
        mser.set_min_diversity(0.4);
        assert_eq!(mser.delta(), 10);
        assert_eq!(mser.max_area(), 0.5);
        assert_eq!(mser.max_variation(), 0.3);
        assert_eq!(mser.min_diversity(), 0.4);
        assert_eq!(mser.dims(), &[6, 5]);
    }

    #[test]
    fn test_stats_layout() {
        assert_eq!(MserStats::LAYOUT.packed_size(), std::mem::size_of::<MserStats>());
    }
}
