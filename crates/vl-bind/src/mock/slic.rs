//! Mock `vl_slic_segment`: labels a regular grid of square cells.

use super::write_slice;
use crate::slic::SlicApi;
use crate::sys::VlSize;

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn segment(
    segmentation: *mut u32,
    _image: *const f32,
    width: VlSize,
    height: VlSize,
    _num_channels: VlSize,
    region_size: VlSize,
    _regularization: f32,
    _min_region_size: VlSize,
) {
    let cells_per_row = width.div_ceil(region_size);
    let labels: Vec<u32> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| u32::try_from((y / region_size) * cells_per_row + x / region_size).unwrap_or(u32::MAX))
        .collect();
    unsafe { write_slice(segmentation, &labels) };
}

pub(crate) const API: SlicApi = SlicApi {
    vl_slic_segment: segment,
};
