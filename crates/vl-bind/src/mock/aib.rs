//! Mock `vl_aib_*`: exhaustive greedy merging on the caller's
//! distribution, normalized in place at creation.

use super::{alloc, free, object, read_vec};
use crate::aib::{AibApi, VlAIB};
use std::ffi::c_int;

struct MockAib {
    pcx: *mut f64,
    num_values: usize,
    num_labels: usize,
    verbosity: c_int,
    parents: Vec<u32>,
    costs: Vec<f64>,
}

fn get<'a>(raw: *const VlAIB) -> &'a mut MockAib {
    unsafe { object(raw) }
}

fn xlogx(x: f64) -> f64 {
    if x > 0.0 {
        x * x.ln()
    } else {
        0.0
    }
}

/// Mutual information lost by merging rows `a` and `b`.
fn merge_cost(a: &[f64], b: &[f64]) -> f64 {
    let joint: f64 = a.iter().zip(b).map(|(&x, &y)| xlogx(x) + xlogx(y) - xlogx(x + y)).sum();
    let pa: f64 = a.iter().sum();
    let pb: f64 = b.iter().sum();
    joint - (xlogx(pa) + xlogx(pb) - xlogx(pa + pb))
}

fn to_u32(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

unsafe extern "C" fn new(pcx: *mut f64, num_values: u32, num_labels: u32) -> *mut VlAIB {
    let num_values = num_values as usize;
    let num_labels = num_labels as usize;
    let len = num_values * num_labels;
    let total: f64 = unsafe { read_vec(pcx, len) }.iter().sum();
    if total > 0.0 {
        for i in 0..len {
            // SAFETY: `pcx` addresses `len` writable values.
            unsafe { *pcx.add(i) /= total };
        }
    }
    alloc(
        "aib",
        MockAib {
            pcx,
            num_values,
            num_labels,
            verbosity: 0,
            parents: vec![0; 2 * num_values - 1],
            costs: vec![0.0; num_values],
        },
    )
}

unsafe extern "C" fn delete(raw: *mut VlAIB) {
    unsafe { free::<MockAib, _>(raw) };
}

unsafe extern "C" fn process(raw: *mut VlAIB) {
    let aib = get(raw);
    let values = unsafe { read_vec(aib.pcx, aib.num_values * aib.num_labels) };
    // Active nodes: tree index and row.
    let mut active: Vec<(usize, Vec<f64>)> = values
        .chunks(aib.num_labels)
        .map(<[f64]>::to_vec)
        .enumerate()
        .collect();
    let mut next = aib.num_values;
    let mut step = 1;
    while active.len() > 1 {
        let mut best = (0, 1, f64::INFINITY);
        for i in 0..active.len() {
            for j in i + 1..active.len() {
                let cost = merge_cost(&active[i].1, &active[j].1);
                if cost < best.2 {
                    best = (i, j, cost);
                }
            }
        }
        let (i, j, cost) = best;
        let (node_b, row_b) = active.remove(j);
        let (node_a, row_a) = std::mem::take(&mut active[i]);
        aib.parents[node_a] = to_u32(next);
        aib.parents[node_b] = to_u32(next);
        aib.costs[step] = cost.max(0.0);
        active[i] = (next, row_a.iter().zip(&row_b).map(|(x, y)| x + y).collect());
        next += 1;
        step += 1;
    }
    let root = next - 1;
    aib.parents[root] = to_u32(root);
}

unsafe extern "C" fn get_parents(raw: *const VlAIB) -> *const u32 {
    get(raw).parents.as_ptr()
}

unsafe extern "C" fn get_costs(raw: *const VlAIB) -> *const f64 {
    get(raw).costs.as_ptr()
}

unsafe extern "C" fn get_verbosity(raw: *const VlAIB) -> c_int {
    get(raw).verbosity
}

unsafe extern "C" fn set_verbosity(raw: *mut VlAIB, verbosity: c_int) {
    get(raw).verbosity = verbosity;
}

pub(crate) const API: AibApi = AibApi {
    vl_aib_new: new,
    vl_aib_delete: delete,
    vl_aib_process: process,
    vl_aib_get_parents: get_parents,
    vl_aib_get_costs: get_costs,
    vl_aib_get_verbosity: get_verbosity,
    vl_aib_set_verbosity: set_verbosity,
};
