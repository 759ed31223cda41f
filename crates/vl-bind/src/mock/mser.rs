//! Mock `vl_mser_*`: regions are the connected components of bright
//! pixels, filtered by relative area.

use super::{alloc, free, object, read_vec};
use crate::mser::{MserApi, MserStats, VlMserFilt};
use std::ffi::c_int;

const BRIGHT: u8 = 128;

struct MockMser {
    dims: Vec<usize>,
    strides: Vec<usize>,
    components: Vec<Vec<usize>>,
    regions: Vec<u32>,
    ell: Vec<f32>,
    ell_num: u32,
    stats: MserStats,
    delta: u8,
    min_area: f64,
    max_area: f64,
    max_variation: f64,
    min_diversity: f64,
}

impl MockMser {
    fn pixel_count(&self) -> usize {
        self.dims.iter().product()
    }

    fn coordinate(&self, index: usize, dim: usize) -> usize {
        (index / self.strides[dim]) % self.dims[dim]
    }

    /// Pixels reachable from `index` along any axis.
    fn neighbors(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(2 * self.dims.len());
        for dim in 0..self.dims.len() {
            let coordinate = self.coordinate(index, dim);
            if coordinate > 0 {
                out.push(index - self.strides[dim]);
            }
            if coordinate + 1 < self.dims[dim] {
                out.push(index + self.strides[dim]);
            }
        }
        out
    }

    fn dof(&self) -> usize {
        let n = self.dims.len();
        n + n * (n + 1) / 2
    }
}

fn get<'a>(raw: *const VlMserFilt) -> &'a mut MockMser {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(ndims: c_int, dims: *const c_int) -> *mut VlMserFilt {
    let ndims = usize::try_from(ndims).unwrap_or(0);
    let dims: Vec<usize> = unsafe { read_vec(dims, ndims) }
        .into_iter()
        .map(|d| usize::try_from(d).unwrap_or(0))
        .collect();
    let strides = dims
        .iter()
        .scan(1, |stride, &d| {
            let current = *stride;
            *stride *= d;
            Some(current)
        })
        .collect();
    alloc(
        "mser",
        MockMser {
            dims,
            strides,
            components: Vec::new(),
            regions: Vec::new(),
            ell: Vec::new(),
            ell_num: 0,
            stats: MserStats::default(),
            delta: 5,
            min_area: 0.0002,
            max_area: 0.75,
            max_variation: 0.25,
            min_diversity: 0.2,
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlMserFilt) {
    unsafe { free::<MockMser, _>(raw) };
}

unsafe extern "C" fn process(raw: *mut VlMserFilt, image: *const u8) {
    let mser = get(raw);
    let total = mser.pixel_count();
    let image = unsafe { read_vec(image, total) };

    let mut seen = vec![false; total];
    let mut components = Vec::new();
    for start in 0..total {
        if seen[start] || image[start] < BRIGHT {
            continue;
        }
        seen[start] = true;
        let mut component = vec![start];
        let mut cursor = 0;
        while cursor < component.len() {
            for next in mser.neighbors(component[cursor]) {
                if !seen[next] && image[next] >= BRIGHT {
                    seen[next] = true;
                    component.push(next);
                }
            }
            cursor += 1;
        }
        components.push(component);
    }

    let mut stats = MserStats {
        num_extremal: i32::try_from(components.len()).unwrap_or(i32::MAX),
        ..MserStats::default()
    };
    components.retain(|component| {
        let area = component.len() as f64 / total as f64;
        if area < mser.min_area {
            stats.num_too_small += 1;
            false
        } else if area > mser.max_area {
            stats.num_too_big += 1;
            false
        } else {
            true
        }
    });

    mser.regions = components
        .iter()
        .map(|component| u32::try_from(component[0]).unwrap_or(u32::MAX))
        .collect();
    mser.components = components;
    mser.stats = stats;
    mser.ell.clear();
    mser.ell_num = 0;
}

unsafe extern "C" fn ell_fit(raw: *mut VlMserFilt) {
    let mser = get(raw);
    let ndims = mser.dims.len();
    let mut ell = Vec::with_capacity(mser.components.len() * mser.dof());
    for component in &mser.components {
        let n = component.len() as f64;
        let coordinates: Vec<Vec<f64>> = component
            .iter()
            .map(|&index| (0..ndims).map(|dim| mser.coordinate(index, dim) as f64).collect())
            .collect();
        let mean: Vec<f64> = (0..ndims)
            .map(|dim| coordinates.iter().map(|c| c[dim]).sum::<f64>() / n)
            .collect();
        ell.extend(mean.iter().map(|&m| m as f32));
        for i in 0..ndims {
            for j in i..ndims {
                let covariance = coordinates
                    .iter()
                    .map(|c| (c[i] - mean[i]) * (c[j] - mean[j]))
                    .sum::<f64>()
                    / n;
                ell.push(covariance as f32);
            }
        }
    }
    mser.ell = ell;
    mser.ell_num = u32::try_from(mser.components.len()).unwrap_or(u32::MAX);
}

unsafe extern "C" fn get_regions_num(raw: *const VlMserFilt) -> u32 {
    u32::try_from(get(raw).regions.len()).unwrap_or(u32::MAX)
}

unsafe extern "C" fn get_regions(raw: *const VlMserFilt) -> *const u32 {
    get(raw).regions.as_ptr()
}

unsafe extern "C" fn get_ell(raw: *const VlMserFilt) -> *const f32 {
    get(raw).ell.as_ptr()
}

unsafe extern "C" fn get_ell_num(raw: *const VlMserFilt) -> u32 {
    get(raw).ell_num
}

unsafe extern "C" fn get_ell_dof(raw: *const VlMserFilt) -> u32 {
    u32::try_from(get(raw).dof()).unwrap_or(u32::MAX)
}

unsafe extern "C" fn get_stats(raw: *const VlMserFilt) -> *const MserStats {
    &get(raw).stats
}

unsafe extern "C" fn get_delta(raw: *const VlMserFilt) -> u8 {
    get(raw).delta
}

unsafe extern "C" fn set_delta(raw: *mut VlMserFilt, value: u8) {
    get(raw).delta = value;
}

unsafe extern "C" fn get_min_area(raw: *const VlMserFilt) -> f64 {
    get(raw).min_area
}

unsafe extern "C" fn set_min_area(raw: *mut VlMserFilt, value: f64) {
    get(raw).min_area = value;
}

unsafe extern "C" fn get_max_area(raw: *const VlMserFilt) -> f64 {
    get(raw).max_area
}

unsafe extern "C" fn set_max_area(raw: *mut VlMserFilt, value: f64) {
    get(raw).max_area = value;
}

unsafe extern "C" fn get_max_variation(raw: *const VlMserFilt) -> f64 {
    get(raw).max_variation
}

unsafe extern "C" fn set_max_variation(raw: *mut VlMserFilt, value: f64) {
    get(raw).max_variation = value;
}

unsafe extern "C" fn get_min_diversity(raw: *const VlMserFilt) -> f64 {
    get(raw).min_diversity
}

unsafe extern "C" fn set_min_diversity(raw: *mut VlMserFilt, value: f64) {
    get(raw).min_diversity = value;
}

pub(crate) const API: MserApi = MserApi {
    vl_mser_new: new,
    vl_mser_delete: delete,
    vl_mser_process: process,
    vl_mser_ell_fit: ell_fit,
    vl_mser_get_regions_num: get_regions_num,
    vl_mser_get_regions: get_regions,
    vl_mser_get_ell: get_ell,
    vl_mser_get_ell_num: get_ell_num,
    vl_mser_get_ell_dof: get_ell_dof,
    vl_mser_get_stats: get_stats,
    vl_mser_get_delta: get_delta,
    vl_mser_set_delta: set_delta,
    vl_mser_get_min_area: get_min_area,
    vl_mser_set_min_area: set_min_area,
    vl_mser_get_max_area: get_max_area,
    vl_mser_set_max_area: set_max_area,
    vl_mser_get_max_variation: get_max_variation,
    vl_mser_set_max_variation: set_max_variation,
    vl_mser_get_min_diversity: get_min_diversity,
    vl_mser_set_min_diversity: set_min_diversity,
};
