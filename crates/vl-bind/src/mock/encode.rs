//! Mock `vl_vlad_encode` and `vl_fisher_encode`, computed in `f64` with
//! hard assignments for Fisher vectors.

use super::{nearest, read_f64, write_buffer};
use crate::encode::{EncodeApi, FisherFlags, VladFlags};
use crate::sys::{VlSize, VlType};
use std::ffi::{c_int, c_void};
use vl_ffi::{marshal, TypeTag};

fn l2_normalize(values: &mut [f64]) {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

fn signed_sqrt(values: &mut [f64]) {
    values.iter_mut().for_each(|v| *v = v.signum() * v.abs().sqrt());
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn vlad_encode(
    enc: *mut c_void,
    data_type: VlType,
    means: *const c_void,
    dimension: VlSize,
    num_clusters: VlSize,
    data: *const c_void,
    num_data: VlSize,
    assignments: *const c_void,
    flags: c_int,
) {
    let Ok(tag) = TypeTag::from_id(data_type) else {
        return;
    };
    let flags = VladFlags::from_bits_truncate(flags);
    let means = unsafe { read_f64(means, dimension * num_clusters, tag) };
    let data = unsafe { read_f64(data, dimension * num_data, tag) };
    let assignments = unsafe { read_f64(assignments, num_data * num_clusters, tag) };

    let mut out = vec![0.0f64; dimension * num_clusters];
    for k in 0..num_clusters {
        let mean = &means[k * dimension..(k + 1) * dimension];
        let block = &mut out[k * dimension..(k + 1) * dimension];
        let mut mass = 0.0;
        for (i, point) in data.chunks(dimension).enumerate() {
            let q = assignments[i * num_clusters + k];
            mass += q;
            for d in 0..dimension {
                block[d] += q * (point[d] - mean[d]);
            }
        }
        if flags.contains(VladFlags::NORMALIZE_MASS) && mass > 0.0 {
            block.iter_mut().for_each(|v| *v /= mass);
        }
        if flags.contains(VladFlags::SQUARE_ROOT) {
            signed_sqrt(block);
        }
        if flags.contains(VladFlags::NORMALIZE_COMPONENTS) {
            l2_normalize(block);
        }
    }
    if !flags.contains(VladFlags::UNNORMALIZED) {
        l2_normalize(&mut out);
    }
    unsafe { write_buffer(enc, &marshal::to_foreign(&out, tag)) };
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn fisher_encode(
    enc: *mut c_void,
    data_type: VlType,
    means: *const c_void,
    dimension: VlSize,
    num_clusters: VlSize,
    covariances: *const c_void,
    priors: *const c_void,
    data: *const c_void,
    num_data: VlSize,
    flags: c_int,
) -> VlSize {
    let Ok(tag) = TypeTag::from_id(data_type) else {
        return 0;
    };
    let flags = FisherFlags::from_bits_truncate(flags);
    let means = unsafe { read_f64(means, dimension * num_clusters, tag) };
    let covariances = unsafe { read_f64(covariances, dimension * num_clusters, tag) };
    let priors = unsafe { read_f64(priors, num_clusters, tag) };
    let data = unsafe { read_f64(data, dimension * num_data, tag) };

    let mut out = vec![0.0f64; 2 * dimension * num_clusters];
    let (u, v) = out.split_at_mut(dimension * num_clusters);
    for point in data.chunks(dimension) {
        let (k, _) = nearest(point, &means, dimension);
        for d in 0..dimension {
            let index = k * dimension + d;
            let z = (point[d] - means[index]) / covariances[index].sqrt();
            u[index] += z;
            v[index] += z * z - 1.0;
        }
    }
    let n = num_data.max(1) as f64;
    for k in 0..num_clusters {
        let range = k * dimension..(k + 1) * dimension;
        u[range.clone()].iter_mut().for_each(|x| *x /= n * priors[k].sqrt());
        v[range].iter_mut().for_each(|x| *x /= n * (2.0 * priors[k]).sqrt());
    }
    if flags.contains(FisherFlags::SQUARE_ROOT) {
        signed_sqrt(&mut out);
    }
    if flags.contains(FisherFlags::NORMALIZED) {
        l2_normalize(&mut out);
    }
    unsafe { write_buffer(enc, &marshal::to_foreign(&out, tag)) };
    num_data
}

pub(crate) const API: EncodeApi = EncodeApi {
    vl_vlad_encode: vlad_encode,
    vl_fisher_encode: fisher_encode,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_helpers() {
        let mut values = [3.0, -4.0];
        l2_normalize(&mut values);
        assert_eq!(values, [0.6, -0.8]);
        let mut values = [4.0, -9.0];
        signed_sqrt(&mut values);
        assert_eq!(values, [2.0, -3.0]);
        let mut zeros = [0.0, 0.0];
        l2_normalize(&mut zeros);
        assert_eq!(zeros, [0.0, 0.0]);
    }
}
