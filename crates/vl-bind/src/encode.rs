//! VLAD and Fisher vector encoders.
//!
//! Both encoders are stateless: every call marshals the model and the data
//! into the requested layout, runs the engine once and returns an owned
//! encoding in that same layout.

use crate::engine::Engine;
use crate::sys::{VlSize, VlType};
use crate::{check_len, element_count, require_float, rows};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::ffi::{c_int, c_void};
use vl_ffi::{marshal, Element, FfiError, FfiResult, ForeignBuffer, TypeTag};

foreign_api! {
    /// `vl_vlad_encode` and `vl_fisher_encode`.
    pub(crate) struct EncodeApi {
        fn vl_vlad_encode(
            enc: *mut c_void,
            data_type: VlType,
            means: *const c_void,
            dimension: VlSize,
            num_clusters: VlSize,
            data: *const c_void,
            num_data: VlSize,
            assignments: *const c_void,
            flags: c_int,
        );
        fn vl_fisher_encode(
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
        ) -> VlSize;
    }
}

bitflags! {
    /// Normalization steps of [`vlad_encode`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VladFlags: c_int {
        /// L2-normalize each cluster's block.
        const NORMALIZE_COMPONENTS = 1;
        /// Take the signed square root of every component.
        const SQUARE_ROOT = 1 << 1;
        /// Skip the final L2 normalization.
        const UNNORMALIZED = 1 << 2;
        /// Divide each block by the mass assigned to its cluster.
        const NORMALIZE_MASS = 1 << 3;
    }
}

bitflags! {
    /// Normalization steps of [`fisher_encode`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FisherFlags: c_int {
        /// Take the signed square root of every component.
        const SQUARE_ROOT = 1;
        /// L2-normalize the encoding.
        const NORMALIZED = 1 << 1;
        /// The improved Fisher vector: square root and normalization.
        const IMPROVED = Self::SQUARE_ROOT.bits() | Self::NORMALIZED.bits();
        /// Use hard assignments to the most likely component.
        const FAST = 1 << 2;
    }
}

/// The result of [`fisher_encode`].
#[derive(Clone, Debug, PartialEq)]
pub struct FisherEncoding<T> {
    /// `2 * dimension * num_clusters` values: the mean derivatives of every
    /// cluster followed by the covariance derivatives.
    pub encoding: Vec<T>,
    /// Number of data points with a non-negligible posterior.
    pub num_terms: usize,
}

/// Sizes shared by both encoders.
struct Model {
    dimension: usize,
    num_clusters: usize,
    num_data: usize,
    /// `dimension * num_clusters`; twice this also fits in `usize`.
    model_len: usize,
}

fn check_model(encoder: &str, data_type: TypeTag, dimension: usize, num_clusters: usize, means: usize, data: usize) -> FfiResult<Model> {
    require_float(encoder, data_type)?;
    if num_clusters == 0 {
        return Err(FfiError::UnsupportedInput(format!("{encoder} needs at least one cluster")));
    }
    let num_data = rows(dimension, data)?;
    let model_len = element_count(&[2, dimension, num_clusters])? / 2;
    check_len(model_len, means)?;
    Ok(Model {
        dimension,
        num_clusters,
        num_data,
        model_len,
    })
}

/// Encode `data` as a VLAD vector of `dimension * num_clusters` values.
///
/// `assignments` holds `num_data * num_clusters` soft assignments, one row
/// per data point. All inputs are converted to `data_type` first.
///
/// # Errors
///
/// Returns [`FfiError::UnsupportedType`] unless `data_type` is `Float32`
/// or `Float64`, [`FfiError::UnsupportedInput`] for zero clusters or
/// dimension and [`FfiError::SizeMismatch`] if an input has the wrong
/// length.
#[allow(clippy::too_many_arguments)]
pub fn vlad_encode<T: Element>(
    engine: &'static Engine,
    data_type: TypeTag,
    means: &[T],
    dimension: usize,
    num_clusters: usize,
    data: &[T],
    assignments: &[T],
    flags: VladFlags,
) -> FfiResult<Vec<T>> {
    let model = check_model("vlad", data_type, dimension, num_clusters, means.len(), data.len())?;
    check_len(element_count(&[model.num_data, num_clusters])?, assignments.len())?;

    let means = marshal::to_foreign(means, data_type);
    let data = marshal::to_foreign(data, data_type);
    let assignments = marshal::to_foreign(assignments, data_type);
    let mut enc = ForeignBuffer::zeroed(data_type, model.model_len);
    tracing::debug!(dimension, num_clusters, num_data = model.num_data, ?flags, "vlad encode");
    // SAFETY: every buffer is in `data_type` and sized for the model.
    unsafe {
        (engine.encode.vl_vlad_encode)(
            enc.as_mut_ptr(),
            data_type.id(),
            means.as_ptr(),
            model.dimension,
            model.num_clusters,
            data.as_ptr(),
            model.num_data,
            assignments.as_ptr(),
            flags.bits(),
        );
    }
    Ok(enc.to_vec())
}

/// Encode `data` as a Fisher vector of a diagonal Gaussian mixture.
///
/// `means` and `covariances` hold `dimension * num_clusters` values and
/// `priors` one per cluster. All inputs are converted to `data_type`
/// first.
///
/// # Errors
///
/// Returns [`FfiError::UnsupportedType`] unless `data_type` is `Float32`
/// or `Float64`, [`FfiError::UnsupportedInput`] for zero clusters or
/// dimension and [`FfiError::SizeMismatch`] if an input has the wrong
/// length.
#[allow(clippy::too_many_arguments)]
pub fn fisher_encode<T: Element>(
    engine: &'static Engine,
    data_type: TypeTag,
    means: &[T],
    dimension: usize,
    num_clusters: usize,
    covariances: &[T],
    priors: &[T],
    data: &[T],
    flags: FisherFlags,
) -> FfiResult<FisherEncoding<T>> {
    let model = check_model("fisher", data_type, dimension, num_clusters, means.len(), data.len())?;
    check_len(model.model_len, covariances.len())?;
    check_len(num_clusters, priors.len())?;

    let means = marshal::to_foreign(means, data_type);
    let covariances = marshal::to_foreign(covariances, data_type);
    let priors = marshal::to_foreign(priors, data_type);
    let data = marshal::to_foreign(data, data_type);
    let mut enc = ForeignBuffer::zeroed(data_type, 2 * model.model_len);
    tracing::debug!(dimension, num_clusters, num_data = model.num_data, ?flags, "fisher encode");
    // SAFETY: every buffer is in `data_type` and sized for the model.
    let num_terms = unsafe {
        (engine.encode.vl_fisher_encode)(
            enc.as_mut_ptr(),
            data_type.id(),
            means.as_ptr(),
            model.dimension,
            model.num_clusters,
            covariances.as_ptr(),
            priors.as_ptr(),
            data.as_ptr(),
            model.num_data,
            flags.bits(),
        )
    };
    Ok(FisherEncoding {
        encoding: enc.to_vec(),
        num_terms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    const MEANS: [f64; 4] = [0.0, 0.0, 10.0, 10.0];
    const DATA: [f64; 6] = [1.0, 0.0, 0.0, 1.0, 11.0, 10.0];
    const ASSIGNMENTS: [f64; 6] = [1.0, 0.0, 1.0, 0.0, 0.0, 1.0];

    #[test]
    fn test_flag_values() {
        assert_eq!(VladFlags::NORMALIZE_MASS.bits(), 8);
        assert_eq!(FisherFlags::IMPROVED.bits(), 3);
        assert!(FisherFlags::IMPROVED.contains(FisherFlags::SQUARE_ROOT));
        assert_eq!(FisherFlags::FAST.bits(), 4);
    }

    #[test]
    fn test_vlad_unnormalized() {
        let enc = vlad_encode(
            Engine::mock(),
            TypeTag::Float64,
            &MEANS,
            2,
            2,
            &DATA,
            &ASSIGNMENTS,
            VladFlags::UNNORMALIZED,
        )
        .unwrap();
        assert_close(&enc, &[1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_vlad_normalized_in_float32() {
        let enc = vlad_encode(Engine::mock(), TypeTag::Float32, &MEANS, 2, 2, &DATA, &ASSIGNMENTS, VladFlags::empty()).unwrap();
        let norm = enc.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vlad_validates() {
        let engine = Engine::mock();
        assert!(matches!(
            vlad_encode(engine, TypeTag::Int32, &MEANS, 2, 2, &DATA, &ASSIGNMENTS, VladFlags::empty()),
            Err(FfiError::UnsupportedType(_))
        ));
        assert!(matches!(
            vlad_encode(engine, TypeTag::Float64, &MEANS, 2, 2, &DATA, &ASSIGNMENTS[..4], VladFlags::empty()),
            Err(FfiError::SizeMismatch { expected: 6, actual: 4 })
        ));
        assert!(matches!(
            vlad_encode(engine, TypeTag::Float64, &MEANS, 2, 0, &DATA, &ASSIGNMENTS, VladFlags::empty()),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_fisher_single_component() {
        let result = fisher_encode(
            Engine::mock(),
            TypeTag::Float64,
            &[0.0],
            1,
            1,
            &[1.0],
            &[1.0],
            &[2.0, 0.0],
            FisherFlags::empty(),
        )
        .unwrap();
        assert_eq!(result.num_terms, 2);
        assert_close(&result.encoding, &[1.0, std::f64::consts::FRAC_1_SQRT_2]);
    }

    #[test]
    fn test_fisher_length_and_validation() {
        let engine = Engine::mock();
        let result = fisher_encode(engine, TypeTag::Float32, &MEANS, 2, 2, &[1.0; 4], &[0.5, 0.5], &DATA, FisherFlags::IMPROVED).unwrap();
        assert_eq!(result.encoding.len(), 8);
        assert!(matches!(
            fisher_encode(engine, TypeTag::Float64, &MEANS, 2, 2, &[1.0; 4], &[1.0], &DATA, FisherFlags::empty()),
            Err(FfiError::SizeMismatch { expected: 2, actual: 1 })
        ));
    }
}
