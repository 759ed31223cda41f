//! Mock `vl_hog_*`: central-difference gradients voted into the
//! orientation bin of each cell, without block normalization. Rendered
//! glyphs are filled with the cell's total energy.

use super::{alloc, free, object, read_vec, write_slice};
use crate::hog::{HogApi, VlHog};
use crate::sys::{VlBool, VlIndex, VlSize};
use std::f32::consts::PI;
use std::ffi::c_int;

const GLYPH_SIZE: usize = 21;

struct MockHog {
    variant: c_int,
    num_orientations: usize,
    dimension: usize,
    bilinear: VlBool,
    permutation: Vec<VlIndex>,
    hog_width: usize,
    hog_height: usize,
    features: Vec<f32>,
}

impl MockHog {
    /// Start a new feature map for a `width` x `height` field.
    fn reset_map(&mut self, width: usize, height: usize, cell_size: usize) {
        self.hog_width = (width + cell_size / 2) / cell_size;
        self.hog_height = (height + cell_size / 2) / cell_size;
        self.features = vec![0.0; self.hog_width * self.hog_height * self.dimension];
    }

    /// Add a gradient of `modulus` at `angle` to the cell holding pixel
    /// `(x, y)`.
    fn vote(&mut self, x: usize, y: usize, cell_size: usize, modulus: f32, angle: f32, directed: bool) {
        if self.hog_width == 0 || self.hog_height == 0 || modulus == 0.0 {
            return;
        }
        let cx = (x / cell_size).min(self.hog_width - 1);
        let cy = (y / cell_size).min(self.hog_height - 1);
        let n = self.num_orientations;
        let undirected = bin(angle.rem_euclid(PI), PI, n);
        let component = if self.variant == 1 {
            if directed {
                bin(angle.rem_euclid(2.0 * PI), 2.0 * PI, 2 * n)
            } else {
                2 * n + undirected
            }
        } else {
            undirected
        };
        let plane = self.hog_width * self.hog_height;
        self.features[cx + cy * self.hog_width + component * plane] += modulus;
    }
}

fn bin(angle: f32, range: f32, bins: usize) -> usize {
    ((angle / range * bins as f32) as usize).min(bins - 1)
}

fn get<'a>(raw: *const VlHog) -> &'a mut MockHog {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(variant: c_int, num_orientations: VlSize, _transposed: VlBool) -> *mut VlHog {
    let dimension = if variant == 1 {
        3 * num_orientations + 4
    } else {
        4 * num_orientations
    };
    alloc(
        "hog",
        MockHog {
            variant,
            num_orientations,
            dimension,
            bilinear: 0,
            permutation: (0..dimension).map(|k| VlIndex::try_from(k).unwrap_or(VlIndex::MAX)).collect(),
            hog_width: 0,
            hog_height: 0,
            features: Vec::new(),
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlHog) {
    unsafe { free::<MockHog, _>(raw) };
}

unsafe extern "C" fn put_image(
    raw: *mut VlHog,
    image: *const f32,
    width: VlSize,
    height: VlSize,
    num_channels: VlSize,
    cell_size: VlSize,
) {
    let hog = get(raw);
    let pixels = width * height;
    let image = unsafe { read_vec(image, pixels * num_channels) };
    hog.reset_map(width, height, cell_size);
    let at = |k: usize, x: usize, y: usize| image[k * pixels + y * width + x];
    for y in 0..height {
        for x in 0..width {
            // Gradient of the channel with the strongest response.
            let (gx, gy) = (0..num_channels)
                .map(|k| {
                    let gx = at(k, (x + 1).min(width - 1), y) - at(k, x.saturating_sub(1), y);
                    let gy = at(k, x, (y + 1).min(height - 1)) - at(k, x, y.saturating_sub(1));
                    (gx, gy)
                })
                .fold((0.0f32, 0.0f32), |best, g| if g.0.hypot(g.1) > best.0.hypot(best.1) { g } else { best });
            hog.vote(x, y, cell_size, gx.hypot(gy), gy.atan2(gx), true);
        }
    }
}

unsafe extern "C" fn put_polar_field(
    raw: *mut VlHog,
    modulus: *const f32,
    angle: *const f32,
    directed: VlBool,
    width: VlSize,
    height: VlSize,
    cell_size: VlSize,
) {
    let hog = get(raw);
    let modulus = unsafe { read_vec(modulus, width * height) };
    let angle = unsafe { read_vec(angle, width * height) };
    hog.reset_map(width, height, cell_size);
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            hog.vote(x, y, cell_size, modulus[i], angle[i], directed != 0);
        }
    }
}

unsafe extern "C" fn extract(raw: *mut VlHog, features: *mut f32) {
    let hog = get(raw);
    unsafe { write_slice(features, &hog.features) };
}

unsafe extern "C" fn render(raw: *const VlHog, image: *mut f32, descriptor: *const f32, width: VlSize, height: VlSize) {
    let hog = get(raw);
    let plane = width * height;
    let descriptor = unsafe { read_vec(descriptor, plane * hog.dimension) };
    let side = GLYPH_SIZE * width;
    let mut picture = vec![0.0f32; side * GLYPH_SIZE * height];
    for cy in 0..height {
        for cx in 0..width {
            let energy: f32 = (0..hog.dimension).map(|k| descriptor[cx + cy * width + k * plane]).sum();
            for gy in 0..GLYPH_SIZE {
                let row = (cy * GLYPH_SIZE + gy) * side + cx * GLYPH_SIZE;
                picture[row..row + GLYPH_SIZE].fill(energy);
            }
        }
    }
    unsafe { write_slice(image, &picture) };
}

unsafe extern "C" fn get_width(raw: *const VlHog) -> VlSize {
    get(raw).hog_width
}

unsafe extern "C" fn get_height(raw: *const VlHog) -> VlSize {
    get(raw).hog_height
}

unsafe extern "C" fn get_dimension(raw: *const VlHog) -> VlSize {
    get(raw).dimension
}

unsafe extern "C" fn get_glyph_size(_raw: *const VlHog) -> VlSize {
    GLYPH_SIZE
}

unsafe extern "C" fn get_permutation(raw: *const VlHog) -> *const VlIndex {
    get(raw).permutation.as_ptr()
}

unsafe extern "C" fn get_bilinear(raw: *const VlHog) -> VlBool {
    get(raw).bilinear
}

unsafe extern "C" fn set_bilinear(raw: *mut VlHog, bilinear: VlBool) {
    get(raw).bilinear = bilinear;
}

pub(crate) const API: HogApi = HogApi {
    vl_hog_new: new,
    vl_hog_delete: delete,
    vl_hog_put_image: put_image,
    vl_hog_put_polar_field: put_polar_field,
    vl_hog_extract: extract,
    vl_hog_render: render,
    vl_hog_get_width: get_width,
    vl_hog_get_height: get_height,
    vl_hog_get_dimension: get_dimension,
    vl_hog_get_glyph_size: get_glyph_size,
    vl_hog_get_permutation: get_permutation,
    vl_hog_get_use_bilinear_orientation_assignments: get_bilinear,
    vl_hog_set_use_bilinear_orientation_assignments: set_bilinear,
};
