//! Gaussian scale space.
//!
//! A scale space holds an image smoothed at a geometric progression of
//! scales, organized in octaves of halving resolution. Octave `o` has
//! levels `octave_first_subdivision..=octave_last_subdivision`; level
//! `s` has scale `base_scale * 2^(o + s / octave_resolution)`.

use crate::engine::Engine;
use crate::sys::{from_vl_bool, VlBool, VlIndex, VlSize};
use crate::{check_len, element_count};
use serde::{Deserialize, Serialize};
use vl_ffi::{ArrayView, FfiError, FfiResult, Field, ForeignHandle, ForeignRecord, ForeignResource, RecordLayout, TypeTag};

/// Opaque `VlScaleSpace`.
#[repr(C)]
pub(crate) struct VlScaleSpace {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_scalespace_*` entry points.
    pub(crate) struct ScaleSpaceApi {
        fn vl_scalespace_get_default_geometry(width: VlSize, height: VlSize) -> ScaleSpaceGeometry;
        fn vl_scalespacegeometry_is_equal(a: ScaleSpaceGeometry, b: ScaleSpaceGeometry) -> VlBool;
        fn vl_scalespace_new(width: VlSize, height: VlSize) -> *mut VlScaleSpace;
        fn vl_scalespace_new_with_geometry(geometry: ScaleSpaceGeometry) -> *mut VlScaleSpace;
        fn vl_scalespace_new_copy(scale_space: *const VlScaleSpace) -> *mut VlScaleSpace;
        fn vl_scalespace_new_shallow_copy(scale_space: *const VlScaleSpace) -> *mut VlScaleSpace;
        fn vl_scalespace_delete(scale_space: *mut VlScaleSpace);
        fn vl_scalespace_put_image(scale_space: *mut VlScaleSpace, image: *const f32);
        fn vl_scalespace_get_geometry(scale_space: *const VlScaleSpace) -> ScaleSpaceGeometry;
        fn vl_scalespace_get_octave_geometry(scale_space: *const VlScaleSpace, o: VlIndex) -> ScaleSpaceOctaveGeometry;
        fn vl_scalespace_get_level_const(scale_space: *const VlScaleSpace, o: VlIndex, s: VlIndex) -> *const f32;
        fn vl_scalespace_get_level_sigma(scale_space: *const VlScaleSpace, o: VlIndex, s: VlIndex) -> f64;
    }
}

unsafe impl ForeignResource for VlScaleSpace {
    type Api = ScaleSpaceApi;
    const KIND: &'static str = "scalespace";

    unsafe fn destroy(api: &ScaleSpaceApi, raw: *mut Self) {
        unsafe { (api.vl_scalespace_delete)(raw) };
    }
}

/// Layout of a scale space (`VlScaleSpaceGeometry`).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleSpaceGeometry {
    /// Image width.
    pub width: VlSize,
    /// Image height.
    pub height: VlSize,
    /// Index of the first octave; negative upsamples.
    pub first_octave: VlIndex,
    /// Index of the last octave.
    pub last_octave: VlIndex,
    /// Levels per octave.
    pub octave_resolution: VlSize,
    /// First level stored in each octave.
    pub octave_first_subdivision: VlIndex,
    /// Last level stored in each octave.
    pub octave_last_subdivision: VlIndex,
    /// Scale of level `(0, 0)`.
    pub base_scale: f64,
    /// Scale assumed for the input image.
    pub nominal_scale: f64,
}

impl ScaleSpaceGeometry {
    /// The engine's default layout for a `width` x `height` image.
    #[must_use]
    pub fn default_for(engine: &'static Engine, width: usize, height: usize) -> Self {
        // SAFETY: a by-value query with no preconditions.
        unsafe { (engine.scalespace.vl_scalespace_get_default_geometry)(width, height) }
    }

    /// Whether the engine considers `self` and `other` the same layout.
    #[must_use]
    pub fn is_equal(&self, engine: &'static Engine, other: &Self) -> bool {
        // SAFETY: a by-value comparison with no preconditions.
        from_vl_bool(unsafe { (engine.scalespace.vl_scalespacegeometry_is_equal)(*self, *other) })
    }

    fn validate(&self) -> FfiResult<()> {
        let valid = self.width > 0
            && self.height > 0
            && self.octave_resolution > 0
            && self.first_octave <= self.last_octave
            && self.octave_first_subdivision <= self.octave_last_subdivision
            && self.base_scale > 0.0
            && self.nominal_scale >= 0.0;
        if valid {
            element_count(&[self.width, self.height])?;
            Ok(())
        } else {
            Err(FfiError::UnsupportedInput(format!("invalid scale space geometry {self:?}")))
        }
    }
}

unsafe impl ForeignRecord for ScaleSpaceGeometry {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlScaleSpaceGeometry",
        fields: &[
            Field::new("width", TypeTag::INDEX),
            Field::new("height", TypeTag::INDEX),
            Field::new("firstOctave", TypeTag::SIGNED_INDEX),
            Field::new("lastOctave", TypeTag::SIGNED_INDEX),
            Field::new("octaveResolution", TypeTag::INDEX),
            Field::new("octaveFirstSubdivision", TypeTag::SIGNED_INDEX),
            Field::new("octaveLastSubdivision", TypeTag::SIGNED_INDEX),
            Field::new("baseScale", TypeTag::Float64),
            Field::new("nominalScale", TypeTag::Float64),
        ],
    };
}

/// Layout of one octave (`VlScaleSpaceOctaveGeometry`).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleSpaceOctaveGeometry {
    /// Octave width.
    pub width: VlSize,
    /// Octave height.
    pub height: VlSize,
    /// Sampling step in image pixels.
    pub step: f64,
}

unsafe impl ForeignRecord for ScaleSpaceOctaveGeometry {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlScaleSpaceOctaveGeometry",
        fields: &[
            Field::new("width", TypeTag::INDEX),
            Field::new("height", TypeTag::INDEX),
            Field::new("step", TypeTag::Float64),
        ],
    };
}

/// A Gaussian scale space.
#[derive(Debug)]
pub struct ScaleSpace {
    handle: ForeignHandle<VlScaleSpace>,
    geometry: ScaleSpaceGeometry,
    loaded: bool,
}

impl ScaleSpace {
    /// Create a scale space with the default layout for a `width` x
    /// `height` image.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for an empty image and
    /// [`FfiError::AllocationFailed`] if the engine cannot create the
    /// scale space.
    pub fn new(engine: &'static Engine, width: usize, height: usize) -> FfiResult<Self> {
        if width == 0 || height == 0 {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot build a scale space for a {width}x{height} image"
            )));
        }
        element_count(&[width, height])?;
        // SAFETY: `vl_scalespace_new` returns a fresh object or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.scalespace, engine.handle_config(), |api: &'static ScaleSpaceApi| (api.vl_scalespace_new)(width, height))?
        };
        Ok(Self::wrap(handle, false))
    }

    /// Create a scale space with an explicit layout.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `geometry` describes an
    /// empty image, an empty octave or level range, or a non-positive
    /// base scale.
    pub fn with_geometry(engine: &'static Engine, geometry: ScaleSpaceGeometry) -> FfiResult<Self> {
        geometry.validate()?;
        // SAFETY: `vl_scalespace_new_with_geometry` returns a fresh object
        // or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.scalespace, engine.handle_config(), |api: &'static ScaleSpaceApi| {
                (api.vl_scalespace_new_with_geometry)(geometry)
            })?
        };
        Ok(Self::wrap(handle, false))
    }

    /// Deep copy, including the levels computed so far.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot copy.
    pub fn try_clone(&self) -> FfiResult<Self> {
        // SAFETY: `vl_scalespace_new_copy` returns a fresh object or null.
        let handle = unsafe { self.handle.derive(|api, raw| (api.vl_scalespace_new_copy)(raw))? };
        Ok(Self::wrap(handle, self.loaded))
    }

    /// A new scale space with the same layout and no image.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the engine cannot copy.
    pub fn clone_layout(&self) -> FfiResult<Self> {
        // SAFETY: `vl_scalespace_new_shallow_copy` returns a fresh object
        // or null.
        let handle = unsafe { self.handle.derive(|api, raw| (api.vl_scalespace_new_shallow_copy)(raw))? };
        Ok(Self::wrap(handle, false))
    }

    fn wrap(handle: ForeignHandle<VlScaleSpace>, loaded: bool) -> Self {
        // SAFETY: the handle is live.
        let geometry = unsafe { (handle.api().vl_scalespace_get_geometry)(handle.as_ptr()) };
        Self {
            handle,
            geometry,
            loaded,
        }
    }

    /// The layout.
    #[must_use]
    pub const fn geometry(&self) -> &ScaleSpaceGeometry {
        &self.geometry
    }

    /// Layout of octave `o`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `o` is outside the
    /// octave range.
    pub fn octave_geometry(&self, o: isize) -> FfiResult<ScaleSpaceOctaveGeometry> {
        self.check_octave(o)?;
        // SAFETY: `o` is a valid octave.
        Ok(unsafe { (self.handle.api().vl_scalespace_get_octave_geometry)(self.handle.as_ptr(), o) })
    }

    /// Compute every level from `image`, `width * height` values.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `image` has the wrong length.
    pub fn put_image(&mut self, image: &[f32]) -> FfiResult<()> {
        check_len(self.geometry.width * self.geometry.height, image.len())?;
        tracing::debug!(
            width = self.geometry.width,
            height = self.geometry.height,
            first_octave = self.geometry.first_octave,
            last_octave = self.geometry.last_octave,
            "scalespace put image"
        );
        // SAFETY: `image` holds the full image; the engine copies it.
        unsafe { (self.handle.api().vl_scalespace_put_image)(self.handle.as_mut_ptr(), image.as_ptr()) };
        self.loaded = true;
        Ok(())
    }

    /// Whether an image has been put.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Level `s` of octave `o`, one value per octave pixel.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before
    /// [`ScaleSpace::put_image`] and [`FfiError::UnsupportedInput`] if
    /// `(o, s)` is outside the layout.
    pub fn level(&self, o: isize, s: isize) -> FfiResult<ArrayView<'_, f32>> {
        if !self.loaded {
            return Err(FfiError::InvalidHandleState {
                resource: VlScaleSpace::KIND,
                reason: "call put_image first".to_string(),
            });
        }
        let octave = self.octave_geometry(o)?;
        self.check_level(s)?;
        // SAFETY: `(o, s)` is a valid level holding one value per octave
        // pixel.
        Ok(unsafe {
            ArrayView::from_raw_parts(
                (self.handle.api().vl_scalespace_get_level_const)(self.handle.as_ptr(), o, s),
                octave.width * octave.height,
            )
        })
    }

    /// Scale of level `s` of octave `o`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if `(o, s)` is outside the
    /// layout.
    pub fn level_sigma(&self, o: isize, s: isize) -> FfiResult<f64> {
        self.check_octave(o)?;
        self.check_level(s)?;
        // SAFETY: `(o, s)` is a valid level.
        Ok(unsafe { (self.handle.api().vl_scalespace_get_level_sigma)(self.handle.as_ptr(), o, s) })
    }

    fn check_octave(&self, o: isize) -> FfiResult<()> {
        let g = &self.geometry;
        if (g.first_octave..=g.last_octave).contains(&o) {
            Ok(())
        } else {
            Err(FfiError::UnsupportedInput(format!(
                "octave {o} outside {}..={}",
                g.first_octave, g.last_octave
            )))
        }
    }

    fn check_level(&self, s: isize) -> FfiResult<()> {
        let g = &self.geometry;
        if (g.octave_first_subdivision..=g.octave_last_subdivision).contains(&s) {
            Ok(())
        } else {
            Err(FfiError::UnsupportedInput(format!(
                "level {s} outside {}..={}",
                g.octave_first_subdivision, g.octave_last_subdivision
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    fn blob() -> Vec<f32> {
        (0..64 * 64).map(|i| if i % 64 == 32 && i / 64 == 32 { 1.0 } else { 0.0 }).collect()
    }

    #[test]
    fn test_default_geometry() {
        let geometry = ScaleSpaceGeometry::default_for(Engine::mock(), 64, 32);
        assert_eq!((geometry.width, geometry.height), (64, 32));
        assert_eq!((geometry.first_octave, geometry.last_octave), (0, 2));
        assert_eq!(geometry.octave_resolution, 3);
        assert_eq!((geometry.octave_first_subdivision, geometry.octave_last_subdivision), (0, 2));

        let space = ScaleSpace::new(Engine::mock(), 64, 32).unwrap();
        assert!(space.geometry().is_equal(Engine::mock(), &geometry));
        let other = ScaleSpaceGeometry {
            last_octave: 1,
            ..geometry
        };
        assert!(!other.is_equal(Engine::mock(), &geometry));
    }

    #[test]
    fn test_octave_geometry() {
        let space = ScaleSpace::new(Engine::mock(), 64, 32).unwrap();
        let octave = space.octave_geometry(1).unwrap();
        assert_eq!((octave.width, octave.height, octave.step), (32, 16, 2.0));
        assert!(matches!(space.octave_geometry(3), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_levels_require_image() {
        let mut space = ScaleSpace::new(Engine::mock(), 64, 64).unwrap();
        assert!(!space.is_loaded());
        assert!(matches!(space.level(0, 0), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(space.put_image(&[0.0; 10]), Err(FfiError::SizeMismatch { .. })));

        space.put_image(&blob()).unwrap();
        let level = space.level(1, 2).unwrap();
        assert_eq!(level.len(), 32 * 32);
        assert!(matches!(space.level(1, 3), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(space.level(-1, 0), Err(FfiError::UnsupportedInput(_))));
    }

    #[test]
    fn test_level_sigma_grows_geometrically() {
        let space = ScaleSpace::new(Engine::mock(), 64, 64).unwrap();
        let base = space.geometry().base_scale;
        assert!((space.level_sigma(0, 0).unwrap() - base).abs() < 1e-12);
        assert!((space.level_sigma(1, 0).unwrap() - 2.0 * base).abs() < 1e-12);
        let ratio = space.level_sigma(0, 1).unwrap() / space.level_sigma(0, 0).unwrap();
        assert!((ratio - 2f64.powf(1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_with_geometry_validates() {
        let mut geometry = ScaleSpaceGeometry::default_for(Engine::mock(), 32, 32);
        geometry.first_octave = -1;
        let space = ScaleSpace::with_geometry(Engine::mock(), geometry).unwrap();
        assert_eq!(space.octave_geometry(-1).unwrap().width, 64);

        geometry.octave_resolution = 0;
        assert!(matches!(
            ScaleSpace::with_geometry(Engine::mock(), geometry),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_copies() {
        let mut space = ScaleSpace::new(Engine::mock(), 64, 64).unwrap();
        space.put_image(&blob()).unwrap();
        let before = mock::live_objects_of(VlScaleSpace::KIND);

        let deep = space.try_clone().unwrap();
        assert!(deep.is_loaded());
        assert_eq!(deep.level(0, 0).unwrap().as_slice(), space.level(0, 0).unwrap().as_slice());

        let shallow = space.clone_layout().unwrap();
        assert!(!shallow.is_loaded());
        assert_eq!(shallow.geometry(), space.geometry());
        assert_eq!(mock::live_objects_of(VlScaleSpace::KIND), before + 2);

        drop(deep);
        drop(shallow);
        assert_eq!(mock::live_objects_of(VlScaleSpace::KIND), before);
    }
}
