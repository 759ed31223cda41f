//! Mock `vl_lbp_*`: 8-neighbour patterns of interior pixels quantized
//! to the 58 uniform bins, each cell histogram normalized to sum one.

use super::{alloc, free, object, read_vec, write_slice};
use crate::lbp::{LbpApi, VlLbp};
use crate::sys::{VlBool, VlSize};
use std::ffi::c_int;

const DIMENSION: usize = 58;

/// Neighbour offsets in circular order.
const NEIGHBOURS: [(isize, isize); 8] = [(1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1), (1, -1)];

struct MockLbp {
    transposed: bool,
}

/// Uniform bin of an 8-bit circular pattern: rotations of runs of one to
/// seven ones, then flat, then everything else.
fn uniform_bin(bits: [bool; 8]) -> usize {
    let ones = bits.iter().filter(|&&b| b).count();
    if ones == 0 || ones == 8 {
        return 56;
    }
    let transitions = (0..8).filter(|&i| bits[i] != bits[(i + 1) % 8]).count();
    if transitions != 2 {
        return 57;
    }
    let start = (0..8).find(|&i| bits[i] && !bits[(i + 7) % 8]).unwrap_or(0);
    (ones - 1) * 8 + start
}

fn get<'a>(raw: *const VlLbp) -> &'a mut MockLbp {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(_mapping: c_int, transposed: VlBool) -> *mut VlLbp {
    alloc(
        "lbp",
        MockLbp {
            transposed: transposed != 0,
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlLbp) {
    unsafe { free::<MockLbp, _>(raw) };
}

unsafe extern "C" fn process(
    raw: *mut VlLbp,
    features: *mut f32,
    image: *const f32,
    width: VlSize,
    height: VlSize,
    cell_size: VlSize,
) {
    let lbp = get(raw);
    let image = unsafe { read_vec(image, width * height) };
    let at = |x: usize, y: usize| {
        if lbp.transposed {
            image[y + x * height]
        } else {
            image[x + y * width]
        }
    };
    let (cells_x, cells_y) = (width / cell_size, height / cell_size);
    let cells = cells_x * cells_y;
    let mut histograms = vec![0.0f32; cells * DIMENSION];
    let mut counts = vec![0.0f32; cells];
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let (cx, cy) = (x / cell_size, y / cell_size);
            if cx >= cells_x || cy >= cells_y {
                continue;
            }
            let center = at(x, y);
            let bits = NEIGHBOURS.map(|(dx, dy)| at(x.saturating_add_signed(dx), y.saturating_add_signed(dy)) > center);
            let cell = cx + cy * cells_x;
            histograms[cell + uniform_bin(bits) * cells] += 1.0;
            counts[cell] += 1.0;
        }
    }
    for (i, value) in histograms.iter_mut().enumerate() {
        let count = counts[i % cells];
        if count > 0.0 {
            *value /= count;
        }
    }
    unsafe { write_slice(features, &histograms) };
}

unsafe extern "C" fn get_dimension(_raw: *const VlLbp) -> VlSize {
    DIMENSION
}

pub(crate) const API: LbpApi = LbpApi {
    vl_lbp_new: new,
    vl_lbp_delete: delete,
    vl_lbp_process: process,
    vl_lbp_get_dimension: get_dimension,
};
