//! Dense SIFT.
//!
//! Computes SIFT-like descriptors on a regular grid of keypoints covering
//! a rectangle of the image. The layout of the grid and of each
//! descriptor is fixed by the steps, bounds and [`DsiftGeometry`];
//! changing any of them discards the previous results.

use crate::engine::Engine;
use crate::sys::{from_vl_bool, to_vl_bool, VlBool};
use crate::{check_len, element_count};
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use vl_ffi::{
    read_records, ArrayView, FfiError, FfiResult, Field, ForeignHandle, ForeignRecord, ForeignResource, RecordLayout,
    TypeTag,
};

/// Opaque `VlDsiftFilter`.
#[repr(C)]
pub(crate) struct VlDsiftFilter {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_dsift_*` entry points.
    pub(crate) struct DsiftApi {
        fn vl_dsift_new(width: c_int, height: c_int) -> *mut VlDsiftFilter;
        fn vl_dsift_new_basic(width: c_int, height: c_int, step: c_int, bin_size: c_int) -> *mut VlDsiftFilter;
        fn vl_dsift_delete(dsift: *mut VlDsiftFilter);
        fn vl_dsift_process(dsift: *mut VlDsiftFilter, image: *const f32);
        fn vl_dsift_set_steps(dsift: *mut VlDsiftFilter, step_x: c_int, step_y: c_int);
        fn vl_dsift_set_bounds(dsift: *mut VlDsiftFilter, min_x: c_int, min_y: c_int, max_x: c_int, max_y: c_int);
        fn vl_dsift_set_geometry(dsift: *mut VlDsiftFilter, geometry: *const DsiftGeometry);
        fn vl_dsift_set_flat_window(dsift: *mut VlDsiftFilter, flat: VlBool);
        fn vl_dsift_set_window_size(dsift: *mut VlDsiftFilter, size: f64);
        fn vl_dsift_get_descriptors(dsift: *const VlDsiftFilter) -> *const f32;
        fn vl_dsift_get_descriptor_size(dsift: *const VlDsiftFilter) -> c_int;
        fn vl_dsift_get_keypoint_num(dsift: *const VlDsiftFilter) -> c_int;
        fn vl_dsift_get_keypoints(dsift: *const VlDsiftFilter) -> *const DsiftKeypoint;
        fn vl_dsift_get_bounds(dsift: *const VlDsiftFilter, min_x: *mut c_int, min_y: *mut c_int, max_x: *mut c_int, max_y: *mut c_int);
        fn vl_dsift_get_steps(dsift: *const VlDsiftFilter, step_x: *mut c_int, step_y: *mut c_int);
        fn vl_dsift_get_geometry(dsift: *const VlDsiftFilter) -> *const DsiftGeometry;
        fn vl_dsift_get_flat_window(dsift: *const VlDsiftFilter) -> VlBool;
        fn vl_dsift_get_window_size(dsift: *const VlDsiftFilter) -> f64;
    }
}

unsafe impl ForeignResource for VlDsiftFilter {
    type Api = DsiftApi;
    const KIND: &'static str = "dsift";

    unsafe fn destroy(api: &DsiftApi, raw: *mut Self) {
        unsafe { (api.vl_dsift_delete)(raw) };
    }
}

/// A grid keypoint (`VlDsiftKeypoint`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DsiftKeypoint {
    /// Column of the center.
    pub x: f64,
    /// Row of the center.
    pub y: f64,
    /// Scale.
    pub s: f64,
    /// Norm of the descriptor before normalization.
    pub norm: f64,
}

unsafe impl ForeignRecord for DsiftKeypoint {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlDsiftKeypoint",
        fields: &[
            Field::new("x", TypeTag::Float64),
            Field::new("y", TypeTag::Float64),
            Field::new("s", TypeTag::Float64),
            Field::new("norm", TypeTag::Float64),
        ],
    };
}

/// Descriptor layout (`VlDsiftDescriptorGeometry`).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsiftGeometry {
    /// Orientation bins.
    pub num_bin_t: i32,
    /// Spatial bins along columns.
    pub num_bin_x: i32,
    /// Spatial bins along rows.
    pub num_bin_y: i32,
    /// Bin width in pixels.
    pub bin_size_x: i32,
    /// Bin height in pixels.
    pub bin_size_y: i32,
}

impl Default for DsiftGeometry {
    fn default() -> Self {
        Self {
            num_bin_t: 8,
            num_bin_x: 4,
            num_bin_y: 4,
            bin_size_x: 5,
            bin_size_y: 5,
        }
    }
}

unsafe impl ForeignRecord for DsiftGeometry {
    const LAYOUT: RecordLayout = RecordLayout {
        name: "VlDsiftDescriptorGeometry",
        fields: &[
            Field::new("numBinT", TypeTag::Int32),
            Field::new("numBinX", TypeTag::Int32),
            Field::new("numBinY", TypeTag::Int32),
            Field::new("binSizeX", TypeTag::Int32),
            Field::new("binSizeY", TypeTag::Int32),
        ],
    };
}

/// Rectangle of the image covered by the grid, inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsiftBounds {
    /// First column.
    pub min_x: i32,
    /// First row.
    pub min_y: i32,
    /// Last column.
    pub max_x: i32,
    /// Last row.
    pub max_y: i32,
}

/// A dense SIFT filter for images of one size.
#[derive(Debug)]
pub struct Dsift {
    handle: ForeignHandle<VlDsiftFilter>,
    width: usize,
    height: usize,
    processed: bool,
}

impl Dsift {
    /// Create a filter for `width` × `height` images with the default
    /// grid.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for an empty or oversized
    /// image and [`FfiError::AllocationFailed`] if the engine cannot
    /// create the filter.
    pub fn new(engine: &'static Engine, width: usize, height: usize) -> FfiResult<Self> {
        let (c_width, c_height) = image_size(width, height)?;
        // SAFETY: `vl_dsift_new` returns a fresh filter or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.dsift, engine.handle_config(), |api: &'static DsiftApi| (api.vl_dsift_new)(c_width, c_height))?
        };
        Ok(Self::wrap(handle, width, height))
    }

    /// Create a filter with the same `step` along both axes and square
    /// bins of `bin_size` pixels.
    ///
    /// # Errors
    ///
    /// As [`Dsift::new`], and [`FfiError::UnsupportedInput`] if `step` or
    /// `bin_size` is not positive.
    pub fn new_basic(engine: &'static Engine, width: usize, height: usize, step: i32, bin_size: i32) -> FfiResult<Self> {
        let (c_width, c_height) = image_size(width, height)?;
        if step < 1 || bin_size < 1 {
            return Err(FfiError::UnsupportedInput(format!(
                "step {step} and bin size {bin_size} must be positive"
            )));
        }
        // SAFETY: `vl_dsift_new_basic` returns a fresh filter or null.
        let handle = unsafe {
            ForeignHandle::create(&engine.dsift, engine.handle_config(), |api: &'static DsiftApi| {
                (api.vl_dsift_new_basic)(c_width, c_height, step, bin_size)
            })?
        };
        Ok(Self::wrap(handle, width, height))
    }

    fn wrap(handle: ForeignHandle<VlDsiftFilter>, width: usize, height: usize) -> Self {
        Self {
            handle,
            width,
            height,
            processed: false,
        }
    }

    /// Image width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Image height.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Compute keypoints and descriptors for `image`, `width * height`
    /// values with the column index varying fastest.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::SizeMismatch`] if `image` has the wrong length.
    pub fn process(&mut self, image: &[f32]) -> FfiResult<()> {
        check_len(element_count(&[self.width, self.height])?, image.len())?;
        tracing::debug!(width = self.width, height = self.height, keypoints = self.keypoint_num(), "dsift process");
        // SAFETY: `image` holds `width * height` values; the engine does
        // not retain it.
        unsafe { (self.handle.api().vl_dsift_process)(self.handle.as_mut_ptr(), image.as_ptr()) };
        self.processed = true;
        Ok(())
    }

    /// Keypoints of the last [`Dsift::process`], one per grid position.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if nothing was processed
    /// since the grid last changed.
    pub fn keypoints(&self) -> FfiResult<ArrayView<'_, DsiftKeypoint>> {
        self.require_processed()?;
        // SAFETY: the engine holds `keypoint_num` records until the next
        // mutating call.
        Ok(unsafe { read_records((self.handle.api().vl_dsift_get_keypoints)(self.handle.as_ptr()), self.keypoint_count()) })
    }

    /// Descriptors of the last [`Dsift::process`], `descriptor_size`
    /// values per keypoint in keypoint order.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] if nothing was processed
    /// since the grid last changed.
    pub fn descriptors(&self) -> FfiResult<ArrayView<'_, f32>> {
        self.require_processed()?;
        let count = self.keypoint_count() * usize::try_from(self.descriptor_size()).unwrap_or(0);
        // SAFETY: the engine holds one descriptor per keypoint.
        Ok(unsafe { ArrayView::from_raw_parts((self.handle.api().vl_dsift_get_descriptors)(self.handle.as_ptr()), count) })
    }

    /// Grid step along columns and rows.
    #[must_use]
    pub fn steps(&self) -> (i32, i32) {
        let (mut step_x, mut step_y) = (0, 0);
        // SAFETY: both outputs are valid locations.
        unsafe { (self.handle.api().vl_dsift_get_steps)(self.handle.as_ptr(), &mut step_x, &mut step_y) };
        (step_x, step_y)
    }

    /// Set the grid steps.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] unless both are positive.
    pub fn set_steps(&mut self, step_x: i32, step_y: i32) -> FfiResult<()> {
        if step_x < 1 || step_y < 1 {
            return Err(FfiError::UnsupportedInput(format!("steps {step_x}x{step_y} must be positive")));
        }
        self.processed = false;
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_dsift_set_steps)(self.handle.as_mut_ptr(), step_x, step_y) };
        Ok(())
    }

    /// Rectangle covered by the grid.
    #[must_use]
    pub fn bounds(&self) -> DsiftBounds {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (0, 0, 0, 0);
        // SAFETY: all outputs are valid locations.
        unsafe {
            (self.handle.api().vl_dsift_get_bounds)(self.handle.as_ptr(), &mut min_x, &mut min_y, &mut max_x, &mut max_y);
        }
        DsiftBounds { min_x, min_y, max_x, max_y }
    }

    /// Restrict the grid to `bounds`.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] if the rectangle is empty or
    /// starts at a negative coordinate.
    pub fn set_bounds(&mut self, bounds: DsiftBounds) -> FfiResult<()> {
        let DsiftBounds { min_x, min_y, max_x, max_y } = bounds;
        if min_x < 0 || min_y < 0 || min_x > max_x || min_y > max_y {
            return Err(FfiError::UnsupportedInput(format!("invalid bounds {bounds:?}")));
        }
        self.processed = false;
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_dsift_set_bounds)(self.handle.as_mut_ptr(), min_x, min_y, max_x, max_y) };
        Ok(())
    }

    /// Descriptor layout.
    #[must_use]
    pub fn geometry(&self) -> DsiftGeometry {
        // SAFETY: the engine returns a pointer to its own geometry record.
        unsafe { *(self.handle.api().vl_dsift_get_geometry)(self.handle.as_ptr()) }
    }

    /// Change the descriptor layout.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] unless every field is
    /// positive.
    pub fn set_geometry(&mut self, geometry: &DsiftGeometry) -> FfiResult<()> {
        let fields = [
            geometry.num_bin_t,
            geometry.num_bin_x,
            geometry.num_bin_y,
            geometry.bin_size_x,
            geometry.bin_size_y,
        ];
        if fields.iter().any(|&f| f < 1) {
            return Err(FfiError::UnsupportedInput(format!("invalid geometry {geometry:?}")));
        }
        self.processed = false;
        // SAFETY: the engine copies the record.
        unsafe { (self.handle.api().vl_dsift_set_geometry)(self.handle.as_mut_ptr(), geometry) };
        Ok(())
    }

    /// Whether bins are weighted with a flat window instead of a Gaussian.
    #[must_use]
    pub fn flat_window(&self) -> bool {
        // SAFETY: the handle is live.
        from_vl_bool(unsafe { (self.handle.api().vl_dsift_get_flat_window)(self.handle.as_ptr()) })
    }

    /// Set [`Dsift::flat_window`].
    pub fn set_flat_window(&mut self, flat: bool) {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_dsift_set_flat_window)(self.handle.as_mut_ptr(), to_vl_bool(flat)) };
    }

    engine_getters! {
        /// Length of one descriptor.
        descriptor_size: i32 => vl_dsift_get_descriptor_size;
        /// Number of grid keypoints.
        keypoint_num: i32 => vl_dsift_get_keypoint_num;
    }

    engine_accessors! {
        /// Size of the Gaussian window, in bins.
        window_size, set_window_size: f64 => vl_dsift_get_window_size, vl_dsift_set_window_size;
    }

    fn keypoint_count(&self) -> usize {
        usize::try_from(self.keypoint_num()).unwrap_or(0)
    }

    fn require_processed(&self) -> FfiResult<()> {
        if self.processed {
            Ok(())
        } else {
            Err(FfiError::InvalidHandleState {
                resource: VlDsiftFilter::KIND,
                reason: "call process first".to_string(),
            })
        }
    }
}

fn image_size(width: usize, height: usize) -> FfiResult<(c_int, c_int)> {
    match (c_int::try_from(width), c_int::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(FfiError::UnsupportedInput(format!(
            "cannot run dense sift on a {width}x{height} image"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(matches!(Dsift::new(Engine::mock(), 0, 8), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(Dsift::new(Engine::mock(), usize::MAX, 8), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(
            Dsift::new_basic(Engine::mock(), 8, 8, 0, 4),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let dsift = Dsift::new(Engine::mock(), 40, 30).unwrap();
        assert_eq!(dsift.geometry(), DsiftGeometry::default());
        assert_eq!(dsift.descriptor_size(), 128);
        assert_eq!(dsift.steps(), (5, 5));
        assert_eq!(
            dsift.bounds(),
            DsiftBounds {
                min_x: 0,
                min_y: 0,
                max_x: 39,
                max_y: 29
            }
        );
        assert!(!dsift.flat_window());
    }

    #[test]
    fn test_grid_layout() {
        let mut dsift = Dsift::new_basic(Engine::mock(), 20, 12, 4, 2).unwrap();
        // Frames span (4 - 1) * 2 = 6 pixels: 20 - 1 - 6 = 13 => 4 columns,
        // 12 - 1 - 6 = 5 => 2 rows.
        assert_eq!(dsift.keypoint_num(), 8);
        dsift.process(&vec![1.0; 240]).unwrap();

        let keypoints = dsift.keypoints().unwrap();
        assert_eq!(keypoints.len(), 8);
        assert_eq!((keypoints[0].x, keypoints[0].y), (3.0, 3.0));
        assert_eq!((keypoints[1].x, keypoints[1].y), (7.0, 3.0));
        assert_eq!((keypoints[4].x, keypoints[4].y), (3.0, 7.0));
        assert_eq!(dsift.descriptors().unwrap().len(), 8 * 128);
    }

    #[test]
    fn test_layout_changes_discard_results() {
        let mut dsift = Dsift::new(Engine::mock(), 32, 32).unwrap();
        assert!(matches!(dsift.keypoints(), Err(FfiError::InvalidHandleState { .. })));
        dsift.process(&[0.5; 1024]).unwrap();
        assert!(dsift.descriptors().is_ok());

        dsift.set_steps(2, 3).unwrap();
        assert_eq!(dsift.steps(), (2, 3));
        assert!(matches!(dsift.descriptors(), Err(FfiError::InvalidHandleState { .. })));

        dsift.process(&[0.5; 1024]).unwrap();
        let geometry = DsiftGeometry {
            num_bin_t: 4,
            num_bin_x: 2,
            num_bin_y: 2,
            bin_size_x: 3,
            bin_size_y: 3,
        };
        dsift.set_geometry(&geometry).unwrap();
        assert_eq!(dsift.geometry(), geometry);
        assert_eq!(dsift.descriptor_size(), 16);
        assert!(matches!(dsift.keypoints(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_setters_validate() {
        let mut dsift = Dsift::new(Engine::mock(), 32, 32).unwrap();
        assert!(matches!(dsift.set_steps(0, 1), Err(FfiError::UnsupportedInput(_))));
        let bounds = DsiftBounds {
            min_x: 10,
            min_y: 0,
            max_x: 5,
            max_y: 31,
        };
        assert!(matches!(dsift.set_bounds(bounds), Err(FfiError::UnsupportedInput(_))));
        let geometry = DsiftGeometry {
            bin_size_x: 0,
            ..DsiftGeometry::default()
        };
        assert!(matches!(dsift.set_geometry(&geometry), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(dsift.process(&[0.0; 10]), Err(FfiError::SizeMismatch { .. })));
    }

    #[test]
    fn test_bounds_restrict_grid() {
        let mut dsift = Dsift::new_basic(Engine::mock(), 64, 64, 1, 1).unwrap();
        let bounds = DsiftBounds {
            min_x: 10,
            min_y: 20,
            max_x: 13,
            max_y: 23,
        };
        dsift.set_bounds(bounds).unwrap();
        assert_eq!(dsift.bounds(), bounds);
        // 4x4 bins of one pixel: frames span 3 pixels, one fits.
        assert_eq!(dsift.keypoint_num(), 1);
        dsift.process(&vec![0.0; 64 * 64]).unwrap();
        let keypoint = dsift.keypoints().unwrap()[0];
        assert_eq!((keypoint.x, keypoint.y, keypoint.norm), (11.5, 21.5, 0.0));
        assert!(dsift.descriptors().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_window_settings() {
        let mut dsift = Dsift::new(Engine::mock(), 16, 16).unwrap();
        dsift.set_flat_window(true);
        assert!(dsift.flat_window());
        dsift.set_window_size(1.5);
        assert_eq!(dsift.window_size(), 1.5);
        assert_eq!((dsift.width(), dsift.height()), (16, 16));
    }
}
