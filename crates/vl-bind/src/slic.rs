//! SLIC superpixels.

use crate::{check_len, element_count};
use crate::engine::Engine;
use crate::sys::VlSize;
use serde::{Deserialize, Serialize};
use vl_ffi::{FfiError, FfiResult};

foreign_api! {
    /// `vl_slic_segment`.
    pub(crate) struct SlicApi {
        fn vl_slic_segment(
            segmentation: *mut u32,
            image: *const f32,
            width: VlSize,
            height: VlSize,
            num_channels: VlSize,
            region_size: VlSize,
            regularization: f32,
            min_region_size: VlSize,
        );
    }
}

/// Parameters of [`slic_segment`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicParams {
    /// Nominal superpixel side, in pixels.
    pub region_size: usize,
    /// Trade-off between appearance and spatial compactness.
    pub regularization: f32,
    /// Superpixels smaller than this are merged into a neighbour.
    pub min_region_size: usize,
}

impl SlicParams {
    /// Parameters with the conventional minimum region size,
    /// `(region_size / 6)²`.
    #[must_use]
    pub const fn new(region_size: usize, regularization: f32) -> Self {
        let side = region_size / 6;
        Self {
            region_size,
            regularization,
            min_region_size: side * side,
        }
    }

    /// Use the given minimum region size.
    #[must_use]
    pub const fn with_min_region_size(mut self, min_region_size: usize) -> Self {
        self.min_region_size = min_region_size;
        self
    }
}

impl Default for SlicParams {
    fn default() -> Self {
        Self::new(10, 0.1)
    }
}

/// Segment `image` into superpixels.
///
/// `image` holds `width * height * channels` values with the column index
/// varying fastest, one plane per channel. Returns one label per pixel in
/// the same order.
///
/// # Errors
///
/// Returns [`FfiError::UnsupportedInput`] for an empty image or a zero
/// region size and [`FfiError::SizeMismatch`] if `image` has the wrong
/// length.
pub fn slic_segment(
    engine: &'static Engine,
    image: &[f32],
    width: usize,
    height: usize,
    channels: usize,
    params: &SlicParams,
) -> FfiResult<Vec<u32>> {
    if width == 0 || height == 0 || channels == 0 {
        return Err(FfiError::UnsupportedInput(format!(
            "cannot segment a {width}x{height}x{channels} image"
        )));
    }
    if params.region_size == 0 {
        return Err(FfiError::UnsupportedInput("region size must be positive".to_string()));
    }
    let pixels = element_count(&[width, height])?;
    check_len(element_count(&[pixels, channels])?, image.len())?;

    tracing::debug!(width, height, channels, region_size = params.region_size, "slic segment");
    let mut segmentation = vec![0u32; pixels];
    // SAFETY: `segmentation` holds one label per pixel and `image` the full
    // image; neither is retained.
    unsafe {
        (engine.slic.vl_slic_segment)(
            segmentation.as_mut_ptr(),
            image.as_ptr(),
            width,
            height,
            channels,
            params.region_size,
            params.regularization,
            params.min_region_size,
        );
    }
    Ok(segmentation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params() {
        let params = SlicParams::new(12, 0.5);
        assert_eq!(params.min_region_size, 4);
        assert_eq!(params.with_min_region_size(9).min_region_size, 9);
        assert_eq!(SlicParams::default().region_size, 10);
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: SlicParams = serde_json::from_str(r#"{"region_size": 20}"#).unwrap();
        assert_eq!(params.region_size, 20);
        assert_eq!(params.regularization, 0.1);
    }

    #[test]
    fn test_segment_grid() {
        let image = vec![0.5f32; 16];
        let labels = slic_segment(Engine::mock(), &image, 4, 4, 1, &SlicParams::new(2, 0.1)).unwrap();
        assert_eq!(labels, vec![0, 0, 1, 1, 0, 0, 1, 1, 2, 2, 3, 3, 2, 2, 3, 3]);
    }

    #[test]
    fn test_segment_validates() {
        let params = SlicParams::default();
        assert!(matches!(
            slic_segment(Engine::mock(), &[], 0, 4, 1, &params),
            Err(FfiError::UnsupportedInput(_))
        ));
        assert!(matches!(
            slic_segment(Engine::mock(), &[0.0; 8], 4, 4, 1, &params),
            Err(FfiError::SizeMismatch { expected: 16, actual: 8 })
        ));
        assert!(matches!(
            slic_segment(Engine::mock(), &[0.0; 16], 4, 4, 1, &SlicParams::new(0, 0.1)),
            Err(FfiError::UnsupportedInput(_))
        ));
        assert!(matches!(
            slic_segment(Engine::mock(), &[], usize::MAX, 2, 1, &params),
            Err(FfiError::UnsupportedInput(_))
        ));
    }
}
