//! Histogram of oriented gradients.
//!
//! ```text
//!   put_image / put_polar_field ──► extract ──► render
//! ```
//!
//! The image is divided into square cells of `cell_size` pixels; the
//! feature map holds `hog_width * hog_height` cells of
//! [`Hog::dimension`] values, stored one component plane after another.

use crate::engine::Engine;
use crate::sys::{from_vl_bool, to_vl_bool, VlBool, VlIndex, VlSize};
use crate::{check_len, element_count};
use std::ffi::c_int;
use vl_ffi::{ArrayView, FfiError, FfiResult, ForeignHandle, ForeignResource};

/// Opaque `VlHog`.
#[repr(C)]
pub(crate) struct VlHog {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_hog_*` entry points.
    pub(crate) struct HogApi {
        fn vl_hog_new(variant: c_int, num_orientations: VlSize, transposed: VlBool) -> *mut VlHog;
        fn vl_hog_delete(hog: *mut VlHog);
        fn vl_hog_put_image(hog: *mut VlHog, image: *const f32, width: VlSize, height: VlSize, num_channels: VlSize, cell_size: VlSize);
        fn vl_hog_put_polar_field(hog: *mut VlHog, modulus: *const f32, angle: *const f32, directed: VlBool, width: VlSize, height: VlSize, cell_size: VlSize);
        fn vl_hog_extract(hog: *mut VlHog, features: *mut f32);
        fn vl_hog_render(hog: *const VlHog, image: *mut f32, descriptor: *const f32, width: VlSize, height: VlSize);
        fn vl_hog_get_width(hog: *const VlHog) -> VlSize;
        fn vl_hog_get_height(hog: *const VlHog) -> VlSize;
        fn vl_hog_get_dimension(hog: *const VlHog) -> VlSize;
        fn vl_hog_get_glyph_size(hog: *const VlHog) -> VlSize;
        fn vl_hog_get_permutation(hog: *const VlHog) -> *const VlIndex;
        fn vl_hog_get_use_bilinear_orientation_assignments(hog: *const VlHog) -> VlBool;
        fn vl_hog_set_use_bilinear_orientation_assignments(hog: *mut VlHog, bilinear: VlBool);
    }
}

unsafe impl ForeignResource for VlHog {
    type Api = HogApi;
    const KIND: &'static str = "hog";

    unsafe fn destroy(api: &HogApi, raw: *mut Self) {
        unsafe { (api.vl_hog_delete)(raw) };
    }
}

engine_enum! {
    /// Feature layout (`VlHogVariant`).
    pub enum HogVariant {
        /// Dalal and Triggs: `4 * num_orientations` values per cell.
        DalalTriggs = 0,
        /// UoCTTI: directed and undirected histograms plus four texture
        /// energies, `3 * num_orientations + 4` values per cell.
        UoCtti = 1,
    }
}

/// A HOG extractor.
#[derive(Debug)]
pub struct Hog {
    handle: ForeignHandle<VlHog>,
    variant: HogVariant,
    loaded: bool,
}

impl Hog {
    /// Create an extractor with `num_orientations` undirected orientation
    /// bins. `transposed` selects images stored with the row index
    /// varying fastest.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `num_orientations` is
    /// zero and [`FfiError::AllocationFailed`] if the engine cannot create
    /// the extractor.
    pub fn new(engine: &'static Engine, variant: HogVariant, num_orientations: usize, transposed: bool) -> FfiResult<Self> {
        if num_orientations == 0 {
            return Err(FfiError::UnsupportedInput("at least one orientation is needed".to_string()));
        }
        // SAFETY: `vl_hog_new` returns a fresh extractor or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.hog, engine.handle_config(), |api: &'static HogApi| {
                (api.vl_hog_new)(variant.raw(), num_orientations, to_vl_bool(transposed))
            })?
        };
        Ok(Self {
            handle,
            variant,
            loaded: false,
        })
    }

    /// The feature layout.
    #[must_use]
    pub const fn variant(&self) -> HogVariant {
        self.variant
    }

    /// Compute gradients of `image`, `width * height * num_channels`
    /// values stored one channel plane after another.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for an empty image or a zero
    /// cell size and [`FfiError::SizeMismatch`] if `image` has the wrong
    /// length.
    pub fn put_image(
        &mut self,
        image: &[f32],
        width: usize,
        height: usize,
        num_channels: usize,
        cell_size: usize,
    ) -> FfiResult<()> {
        check_geometry(width, height, cell_size)?;
        if num_channels == 0 {
            return Err(FfiError::UnsupportedInput("image has no channels".to_string()));
        }
        check_len(element_count(&[width, height, num_channels])?, image.len())?;
        tracing::debug!(width, height, num_channels, cell_size, "hog put image");
        // SAFETY: `image` holds the full image; the engine does not retain
        // it.
        unsafe {
            (self.handle.api().vl_hog_put_image)(
                self.handle.as_mut_ptr(),
                image.as_ptr(),
                width,
                height,
                num_channels,
                cell_size,
            );
        }
        self.loaded = true;
        Ok(())
    }

    /// Use a precomputed gradient field instead of an image. `angle` is in
    /// radians; `directed` keeps the sign of the gradient.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for an empty field or a zero
    /// cell size and [`FfiError::SizeMismatch`] if either plane has the
    /// wrong length.
    pub fn put_polar_field(
        &mut self,
        modulus: &[f32],
        angle: &[f32],
        directed: bool,
        width: usize,
        height: usize,
        cell_size: usize,
    ) -> FfiResult<()> {
        check_geometry(width, height, cell_size)?;
        let pixels = element_count(&[width, height])?;
        check_len(pixels, modulus.len())?;
        check_len(pixels, angle.len())?;
        // SAFETY: both planes hold `width * height` values.
        unsafe {
            (self.handle.api().vl_hog_put_polar_field)(
                self.handle.as_mut_ptr(),
                modulus.as_ptr(),
                angle.as_ptr(),
                to_vl_bool(directed),
                width,
                height,
                cell_size,
            );
        }
        self.loaded = true;
        Ok(())
    }

    /// The feature map of the last image or field.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before an image or field
    /// was put.
    pub fn extract(&mut self) -> FfiResult<Vec<f32>> {
        if !self.loaded {
            return Err(FfiError::InvalidHandleState {
                resource: VlHog::KIND,
                reason: "put an image or polar field first".to_string(),
            });
        }
        let mut features = vec![0.0f32; element_count(&[self.width(), self.height(), self.dimension()])?];
        // SAFETY: `features` holds one value per cell and component.
        unsafe { (self.handle.api().vl_hog_extract)(self.handle.as_mut_ptr(), features.as_mut_ptr()) };
        Ok(features)
    }

    /// Draw `descriptor`, a `width * height` cell feature map, as a
    /// picture of glyphs, `glyph_size * width` by `glyph_size * height`
    /// pixels.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `descriptor` has the wrong
    /// length.
    pub fn render(&self, descriptor: &[f32], width: usize, height: usize) -> FfiResult<Vec<f32>> {
        check_len(element_count(&[width, height, self.dimension()])?, descriptor.len())?;
        let glyph = self.glyph_size();
        let mut image = vec![0.0f32; element_count(&[glyph, width, glyph, height])?];
        // SAFETY: `image` holds the full rendering and `descriptor` the
        // full feature map.
        unsafe {
            (self.handle.api().vl_hog_render)(self.handle.as_ptr(), image.as_mut_ptr(), descriptor.as_ptr(), width, height);
        }
        Ok(image)
    }

    /// Component permutation that mirrors a feature map left to right.
    #[must_use]
    pub fn permutation(&self) -> ArrayView<'_, VlIndex> {
        // SAFETY: the engine holds one index per component.
        unsafe {
            ArrayView::from_raw_parts((self.handle.api().vl_hog_get_permutation)(self.handle.as_ptr()), self.dimension())
        }
    }

    /// Whether gradients vote for the two nearest orientation bins.
    #[must_use]
    pub fn use_bilinear_orientation_assignments(&self) -> bool {
        // SAFETY: the handle is live.
        from_vl_bool(unsafe { (self.handle.api().vl_hog_get_use_bilinear_orientation_assignments)(self.handle.as_ptr()) })
    }

    /// Set [`Hog::use_bilinear_orientation_assignments`].
    pub fn set_use_bilinear_orientation_assignments(&mut self, bilinear: bool) {
        // SAFETY: the handle is live.
        unsafe {
            (self.handle.api().vl_hog_set_use_bilinear_orientation_assignments)(self.handle.as_mut_ptr(), to_vl_bool(bilinear));
        }
    }

    engine_getters! {
        /// Feature map width in cells.
        width: VlSize => vl_hog_get_width;
        /// Feature map height in cells.
        height: VlSize => vl_hog_get_height;
        /// Values per cell.
        dimension: VlSize => vl_hog_get_dimension;
        /// Side of a rendered glyph in pixels.
        glyph_size: VlSize => vl_hog_get_glyph_size;
    }
}

fn check_geometry(width: usize, height: usize, cell_size: usize) -> FfiResult<()> {
    if width == 0 || height == 0 || cell_size == 0 {
        return Err(FfiError::UnsupportedInput(format!(
            "cannot compute hog on a {width}x{height} image with {cell_size}-pixel cells"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A vertical step edge, 8x8.
    fn edge() -> Vec<f32> {
        (0..64).map(|i| if i % 8 < 4 { 0.0 } else { 1.0 }).collect()
    }

    #[test]
    fn test_dimension_depends_on_variant() {
        let dt = Hog::new(Engine::mock(), HogVariant::DalalTriggs, 9, false).unwrap();
        assert_eq!(dt.dimension(), 36);
        let uoctti = Hog::new(Engine::mock(), HogVariant::UoCtti, 9, false).unwrap();
        assert_eq!(uoctti.dimension(), 31);
        assert_eq!(uoctti.variant(), HogVariant::UoCtti);
        assert_eq!(uoctti.permutation().len(), 31);
        assert_eq!(uoctti.glyph_size(), 21);
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(
            Hog::new(Engine::mock(), HogVariant::DalalTriggs, 0, false),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_extract_requires_image() {
        let mut hog = Hog::new(Engine::mock(), HogVariant::UoCtti, 4, false).unwrap();
        assert!(matches!(hog.extract(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_extract_feature_map() {
        let mut hog = Hog::new(Engine::mock(), HogVariant::DalalTriggs, 4, false).unwrap();
        hog.put_image(&edge(), 8, 8, 1, 4).unwrap();
        assert_eq!((hog.width(), hog.height()), (2, 2));
        let features = hog.extract().unwrap();
        assert_eq!(features.len(), 2 * 2 * 16);
        assert!(features.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_put_image_validates() {
        let mut hog = Hog::new(Engine::mock(), HogVariant::DalalTriggs, 4, false).unwrap();
        assert!(matches!(hog.put_image(&edge(), 8, 8, 1, 0), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(hog.put_image(&edge(), 8, 8, 3, 4), Err(FfiError::SizeMismatch { .. })));
        assert!(matches!(
            hog.put_image(&[], usize::MAX, 2, 2, 4),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_polar_field() {
        let mut hog = Hog::new(Engine::mock(), HogVariant::UoCtti, 4, false).unwrap();
        let modulus = vec![1.0f32; 36];
        let angle = vec![0.0f32; 36];
        assert!(matches!(
            hog.put_polar_field(&modulus, &angle[..35], true, 6, 6, 3),
            Err(FfiError::SizeMismatch { .. })
        ));
        hog.put_polar_field(&modulus, &angle, true, 6, 6, 3).unwrap();
        let features = hog.extract().unwrap();
        assert_eq!(features.len(), 2 * 2 * 16);
    }

    #[test]
    fn test_render() {
        let mut hog = Hog::new(Engine::mock(), HogVariant::DalalTriggs, 4, false).unwrap();
        hog.put_image(&edge(), 8, 8, 1, 4).unwrap();
        let features = hog.extract().unwrap();
        let picture = hog.render(&features, 2, 2).unwrap();
        assert_eq!(picture.len(), 42 * 42);
        assert!(matches!(hog.render(&features[1..], 2, 2), Err(FfiError::SizeMismatch { .. })));
    }

    #[test]
    fn test_bilinear_assignments() {
        let mut hog = Hog::new(Engine::mock(), HogVariant::DalalTriggs, 4, false).unwrap();
        assert!(!hog.use_bilinear_orientation_assignments());
        hog.set_use_bilinear_orientation_assignments(true);
        assert!(hog.use_bilinear_orientation_assignments());
    }
}
