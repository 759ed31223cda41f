//! Engine C types shared by every binding.

use std::ffi::c_int;
use vl_ffi::{FfiError, FfiResult};

/// Unsigned size (`vl_size`).
pub type VlSize = usize;

/// Signed index (`vl_index`).
pub type VlIndex = isize;

/// Unsigned index (`vl_uindex`).
pub type VlUIndex = usize;

/// Boolean (`vl_bool`).
pub type VlBool = c_int;

/// Element type identifier (`vl_type`).
pub type VlType = u32;

/// `VL_ERR_OK`
pub const VL_ERR_OK: c_int = 0;
/// `VL_ERR_OVERFLOW`
pub const VL_ERR_OVERFLOW: c_int = 1;
/// `VL_ERR_ALLOC`
pub const VL_ERR_ALLOC: c_int = 2;
/// `VL_ERR_BADARG`
pub const VL_ERR_BADARG: c_int = 3;
/// `VL_ERR_IO`
pub const VL_ERR_IO: c_int = 4;
/// `VL_ERR_EOF`
pub const VL_ERR_EOF: c_int = 5;

/// Convert an engine status code into a result.
///
/// `VL_ERR_ALLOC` becomes [`FfiError::AllocationFailed`]; every other
/// non-OK code, including `VL_ERR_EOF`, becomes [`FfiError::Engine`].
pub(crate) fn check_status(operation: &'static str, code: c_int) -> FfiResult<()> {
    match code {
        VL_ERR_OK => Ok(()),
        VL_ERR_ALLOC => Err(FfiError::AllocationFailed(format!(
            "{operation} ran out of memory"
        ))),
        code => {
            tracing::debug!(operation, code, "engine call failed");
            Err(FfiError::Engine { operation, code })
        }
    }
}

/// Convert a host boolean into `vl_bool`.
#[inline]
pub(crate) const fn to_vl_bool(value: bool) -> VlBool {
    value as VlBool
}

/// Convert a `vl_bool` into a host boolean.
#[inline]
pub(crate) const fn from_vl_bool(value: VlBool) -> bool {
    value != 0
}

engine_enum! {
    /// Distance or kernel used to compare vectors (`VlVectorComparisonType`).
    pub enum VectorComparison {
        /// L1 distance.
        DistanceL1 = 0,
        /// Squared L2 distance.
        DistanceL2 = 1,
        /// Chi-squared distance.
        DistanceChi2 = 2,
        /// Hellinger distance.
        DistanceHellinger = 3,
        /// Jensen-Shannon distance.
        DistanceJs = 4,
        /// Mahalanobis distance.
        DistanceMahalanobis = 5,
        /// L1 kernel.
        KernelL1 = 6,
        /// L2 kernel.
        KernelL2 = 7,
        /// Chi-squared kernel.
        KernelChi2 = 8,
        /// Hellinger kernel.
        KernelHellinger = 9,
        /// Jensen-Shannon kernel.
        KernelJs = 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert!(check_status("op", VL_ERR_OK).is_ok());
        assert!(matches!(
            check_status("op", VL_ERR_ALLOC),
            Err(FfiError::AllocationFailed(_))
        ));
        assert_eq!(
            check_status("vl_covdet_put_image", VL_ERR_BADARG),
            Err(FfiError::Engine {
                operation: "vl_covdet_put_image",
                code: 3
            })
        );
        assert!(check_status("op", VL_ERR_EOF).is_err());
    }

    #[test]
    fn test_vector_comparison_raw() {
        assert_eq!(VectorComparison::DistanceL2.raw(), 1);
        assert_eq!(
            VectorComparison::from_raw("get", 10).unwrap(),
            VectorComparison::KernelJs
        );
        assert!(VectorComparison::from_raw("get", 11).is_err());
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(to_vl_bool(true), 1);
        assert!(!from_vl_bool(0));
        assert!(from_vl_bool(7));
    }
}
