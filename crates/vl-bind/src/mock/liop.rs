//! Mock `vl_liopdesc_*`: neighbours are sampled at the nearest pixel,
//! their intensity order is coded as a permutation index and pooled by
//! the rank of the center pixel. Neighbourhoods whose spread is below
//! the threshold do not vote.

use super::{alloc, free, object, read_vec, write_slice};
use crate::liop::{LiopApi, VlLiopDesc};
use crate::sys::VlSize;
use std::ffi::c_int;

struct MockLiop {
    num_neighbours: usize,
    num_spatial_bins: usize,
    radius: f64,
    side_length: usize,
    intensity_threshold: f32,
}

impl MockLiop {
    fn dimension(&self) -> usize {
        (1..=self.num_neighbours).product::<usize>() * self.num_spatial_bins
    }
}

/// Index of the ordering of `values` among all permutations.
fn permutation_index(values: &[f32]) -> usize {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut index = 0;
    for (i, &item) in order.iter().enumerate() {
        let smaller_later = order[i + 1..].iter().filter(|&&later| later < item).count();
        index = index * (order.len() - i) + smaller_later;
    }
    index
}

fn get<'a>(raw: *const VlLiopDesc) -> &'a mut MockLiop {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(num_neighbours: c_int, num_spatial_bins: c_int, radius: f32, side_length: VlSize) -> *mut VlLiopDesc {
    alloc(
        "liop",
        MockLiop {
            num_neighbours: usize::try_from(num_neighbours).unwrap_or(0),
            num_spatial_bins: usize::try_from(num_spatial_bins).unwrap_or(0),
            radius: f64::from(radius),
            side_length,
            intensity_threshold: -5.0 / 255.0,
        },
    )
}

unsafe extern "C" fn new_basic(side_length: VlSize) -> *mut VlLiopDesc {
    unsafe { new(4, 6, 2.0, side_length) }
}

unsafe extern "C" fn delete(raw: *mut VlLiopDesc) {
    unsafe { free::<MockLiop, _>(raw) };
}

unsafe extern "C" fn process(raw: *mut VlLiopDesc, descriptor: *mut f32, patch: *const f32) {
    let liop = get(raw);
    let side = liop.side_length;
    let patch = unsafe { read_vec(patch, side * side) };
    let margin = liop.radius.ceil() as usize;
    let threshold = liop.intensity_threshold.abs();

    let mut samples = Vec::new();
    for y in margin..side.saturating_sub(margin) {
        for x in margin..side.saturating_sub(margin) {
            let neighbours: Vec<f32> = (0..liop.num_neighbours)
                .map(|k| {
                    let angle = 2.0 * std::f64::consts::PI * k as f64 / liop.num_neighbours as f64;
                    let nx = (x as f64 + liop.radius * angle.cos()).round() as usize;
                    let ny = (y as f64 + liop.radius * angle.sin()).round() as usize;
                    patch[ny.min(side - 1) * side + nx.min(side - 1)]
                })
                .collect();
            samples.push((patch[y * side + x], neighbours));
        }
    }

    let mut values = vec![0.0f32; liop.dimension()];
    let factorial = liop.dimension() / liop.num_spatial_bins;
    let mut centers: Vec<f32> = samples.iter().map(|(c, _)| *c).collect();
    centers.sort_by(f32::total_cmp);
    for (center, neighbours) in &samples {
        let spread = neighbours.iter().fold(f32::NEG_INFINITY, |m, &v| m.max((v - center).abs()));
        if spread <= threshold {
            continue;
        }
        let rank = centers.partition_point(|&c| c < *center);
        let bin = (rank * liop.num_spatial_bins / centers.len()).min(liop.num_spatial_bins - 1);
        values[bin * factorial + permutation_index(neighbours)] += 1.0;
    }
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    unsafe { write_slice(descriptor, &values) };
}

unsafe extern "C" fn get_dimension(raw: *const VlLiopDesc) -> VlSize {
    get(raw).dimension()
}

unsafe extern "C" fn get_num_neighbours(raw: *const VlLiopDesc) -> VlSize {
    get(raw).num_neighbours
}

unsafe extern "C" fn get_intensity_threshold(raw: *const VlLiopDesc) -> f32 {
    get(raw).intensity_threshold
}

unsafe extern "C" fn set_intensity_threshold(raw: *mut VlLiopDesc, threshold: f32) {
    get(raw).intensity_threshold = threshold;
}

unsafe extern "C" fn get_num_spatial_bins(raw: *const VlLiopDesc) -> VlSize {
    get(raw).num_spatial_bins
}

unsafe extern "C" fn get_neighbourhood_radius(raw: *const VlLiopDesc) -> f64 {
    get(raw).radius
}

pub(crate) const API: LiopApi = LiopApi {
    vl_liopdesc_new: new,
    vl_liopdesc_new_basic: new_basic,
    vl_liopdesc_delete: delete,
    vl_liopdesc_process: process,
    vl_liopdesc_get_dimension: get_dimension,
    vl_liopdesc_get_num_neighbours: get_num_neighbours,
    vl_liopdesc_get_intensity_threshold: get_intensity_threshold,
    vl_liopdesc_set_intensity_threshold: set_intensity_threshold,
    vl_liopdesc_get_num_spatial_bins: get_num_spatial_bins,
    vl_liopdesc_get_neighbourhood_radius: get_neighbourhood_radius,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_index() {
        assert_eq!(permutation_index(&[1.0, 2.0, 3.0]), 0);
        assert_eq!(permutation_index(&[3.0, 2.0, 1.0]), 5);
        assert_eq!(permutation_index(&[1.0, 3.0, 2.0]), 1);
    }
}
