//! # VLFeat Bindings
//!
//! Safe, owned wrappers around the stateful objects of the VLFeat computer
//! vision library: clustering (k-means, integer and hierarchical k-means,
//! GMM, agglomerative information bottleneck), nearest-neighbour search
//! (KD-forest), local features (SIFT, dense SIFT, covariant detectors,
//! MSER, HOG, LBP, LIOP), Gaussian scale spaces, segmentation (quick
//! shift, SLIC) and encoders (VLAD, Fisher).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  KMeans  IKMeans  Gmm  Aib  KdForest  ScaleSpace           │
//! │  CovDet  Sift  Dsift  Mser  Hog  Lbp  Liop  QuickShift ... │
//! ├────────────────────────────────────────────────────────────┤
//! │  vl_ffi: TypeTag · marshal · ForeignHandle · ArrayView     │
//! ├────────────────────────────────────────────────────────────┤
//! │  Engine: entry point tables                                │
//! │    ├── libvl (loaded at runtime via libloading)            │
//! │    └── mock  (in-process, for tests)                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine library is loaded at runtime, so this crate builds without
//! VLFeat installed and reports a missing library as an error.
//!
//! ## Threading
//!
//! Engine objects keep unsynchronized mutable state, and VLFeat keeps some
//! state per thread. Every binding type is therefore `!Send` and `!Sync`:
//!
//! ```compile_fail
//! fn assert_send<T: Send>() {}
//! assert_send::<vl_bind::KMeans>();
//! ```
//!
//! Calls are synchronous and cannot be interrupted. To bound the time spent
//! in a long clustering pass, run it on a dedicated thread (creating the
//! object there) and stop waiting for it; the call still runs to completion.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vl_bind::{Engine, KMeans, TypeTag, VectorComparison};
//!
//! let engine = Engine::global()?;
//! let mut kmeans = KMeans::new(engine, TypeTag::Float64, VectorComparison::DistanceL2)?;
//! let energy = kmeans.cluster(&points, 4, 3)?;
//! let centers: Vec<f64> = kmeans.centers()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Declare a table of engine entry points.
///
/// Generates a struct with one function pointer per symbol and a `load`
/// constructor that resolves every symbol from a shared library.
macro_rules! foreign_api {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( fn $symbol:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) $( -> $ret:ty )? ; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        $vis struct $name {
            $(
                pub(crate) $symbol: unsafe extern "C" fn( $( $arg: $ty ),* ) $( -> $ret )?,
            )*
        }

        impl $name {
            /// Resolve every entry point from `lib`.
            pub(crate) fn load(lib: &libloading::Library) -> vl_ffi::FfiResult<Self> {
                // SAFETY: each symbol is looked up with the signature the
                // engine header declares for it.
                unsafe {
                    Ok(Self {
                        $(
                            $symbol: *lib
                                .get::<unsafe extern "C" fn( $( $ty ),* ) $( -> $ret )?>(
                                    concat!(stringify!($symbol), "\0").as_bytes(),
                                )
                                .map_err(|e| {
                                    vl_ffi::FfiError::LibraryUnavailable(format!(
                                        "missing entry point {}: {e}",
                                        stringify!($symbol)
                                    ))
                                })?,
                        )*
                    })
                }
            }
        }
    };
}

/// Generate getter/setter pairs that forward to engine accessors.
///
/// The binding struct must own its object in a field named `handle`.
macro_rules! engine_accessors {
    (
        $(
            $(#[$doc:meta])*
            $get:ident, $set:ident: $ty:ty => $vl_get:ident, $vl_set:ident;
        )*
    ) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $get(&self) -> $ty {
                // SAFETY: the handle is live.
                unsafe { (self.handle.api().$vl_get)(self.handle.as_ptr()) }
            }

            #[doc = concat!("Set the value returned by [`Self::", stringify!($get), "`].")]
            pub fn $set(&mut self, value: $ty) {
                // SAFETY: the handle is live and exclusively borrowed.
                unsafe { (self.handle.api().$vl_set)(self.handle.as_mut_ptr(), value) }
            }
        )*
    };
}

/// Generate getters that forward to engine accessors.
macro_rules! engine_getters {
    (
        $(
            $(#[$doc:meta])*
            $get:ident: $ty:ty => $vl_get:ident;
        )*
    ) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $get(&self) -> $ty {
                // SAFETY: the handle is live.
                unsafe { (self.handle.api().$vl_get)(self.handle.as_ptr()) }
            }
        )*
    };
}

/// Declare a C enum mirrored by a Rust enum with checked decoding.
macro_rules! engine_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[repr(i32)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value, )*
        }

        impl $name {
            /// The engine's integer value.
            #[inline]
            #[must_use]
            pub const fn raw(self) -> std::ffi::c_int {
                self as std::ffi::c_int
            }

            /// Decode a value reported by `operation`.
            pub(crate) fn from_raw(operation: &'static str, raw: std::ffi::c_int) -> vl_ffi::FfiResult<Self> {
                match raw {
                    $( $value => Ok(Self::$variant), )*
                    code => Err(vl_ffi::FfiError::Engine { operation, code }),
                }
            }
        }
    };
}

pub mod aib;
pub mod covdet;
pub mod dsift;
pub mod encode;
pub mod engine;
pub mod gmm;
pub mod hikmeans;
pub mod hog;
pub mod ikmeans;
pub mod kdtree;
pub mod kmeans;
pub mod lbp;
pub mod liop;
pub mod mock;
pub mod mser;
pub mod quickshift;
pub mod scalespace;
pub mod sift;
pub mod slic;
pub mod sys;

pub use aib::Aib;
pub use covdet::{CovDet, CovDetMethod, Feature, FeatureLaplacianScale, FeatureOrientation, Frame};
pub use dsift::{Dsift, DsiftBounds, DsiftGeometry, DsiftKeypoint};
pub use encode::{fisher_encode, vlad_encode, FisherEncoding, FisherFlags, VladFlags};
pub use engine::{Engine, EngineConfig, EngineSource};
pub use gmm::{Gmm, GmmInitialization};
pub use hikmeans::HIKMeans;
pub use hog::{Hog, HogVariant};
pub use ikmeans::{ikm_push_one, IKMeans, IkmAlgorithm};
pub use kdtree::{KdForest, KdForestSearcher, Neighbor, ThresholdingMethod};
pub use kmeans::{KMeans, KMeansAlgorithm, KMeansInitialization};
pub use lbp::{Lbp, LbpMapping};
pub use liop::{Liop, LIOP_MAX_NEIGHBOURS};
pub use mser::{Mser, MserStats};
pub use quickshift::QuickShift;
pub use scalespace::{ScaleSpace, ScaleSpaceGeometry, ScaleSpaceOctaveGeometry};
pub use sift::{Sift, SiftKeypoint, SIFT_DESCRIPTOR_SIZE};
pub use slic::{slic_segment, SlicParams};
pub use sys::VectorComparison;
pub use vl_ffi::{ArrayView, Element, FfiError, FfiResult, HandleConfig, TypeTag};

/// Fail unless a host buffer holds exactly `expected` elements.
pub(crate) fn check_len(expected: usize, actual: usize) -> FfiResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(FfiError::SizeMismatch { expected, actual })
    }
}

/// Fail unless `data_type` is one of the floating-point layouts.
pub(crate) fn require_float(resource: &str, data_type: TypeTag) -> FfiResult<()> {
    if data_type.is_float() {
        Ok(())
    } else {
        Err(FfiError::UnsupportedType(format!(
            "{resource} requires float or double data, got {data_type}"
        )))
    }
}

/// Number of elements in an array with the given extents.
///
/// Fails instead of wrapping when the product does not fit in `usize`.
pub(crate) fn element_count(extents: &[usize]) -> FfiResult<usize> {
    extents
        .iter()
        .try_fold(1usize, |count, &extent| count.checked_mul(extent))
        .ok_or_else(|| FfiError::UnsupportedInput(format!("array of extents {extents:?} is too large")))
}

/// Number of whole rows of width `dimension` in `len` values.
pub(crate) fn rows(dimension: usize, len: usize) -> FfiResult<usize> {
    if dimension == 0 {
        return Err(FfiError::UnsupportedInput(
            "dimension must be positive".to_string(),
        ));
    }
    if len % dimension != 0 {
        return Err(FfiError::SizeMismatch {
            expected: (len / dimension + 1) * dimension,
            actual: len,
        });
    }
    Ok(len / dimension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_check_len() {
        assert!(check_len(4, 4).is_ok());
        assert_eq!(
            check_len(4, 3),
            Err(FfiError::SizeMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_rows() {
        assert_eq!(rows(4, 12).unwrap(), 3);
        assert_eq!(rows(4, 0).unwrap(), 0);
        assert!(rows(4, 13).is_err());
        assert!(rows(0, 4).is_err());
    }

    #[test]
    fn test_element_count() {
        assert_eq!(element_count(&[4, 3, 2]).unwrap(), 24);
        assert_eq!(element_count(&[]).unwrap(), 1);
        assert_eq!(element_count(&[7, 0]).unwrap(), 0);
        assert!(matches!(
            element_count(&[usize::MAX, 2]),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    proptest! {
        #[test]
        fn test_rows_accepts_whole_rows(dimension in 1usize..64, count in 0usize..64) {
            prop_assert_eq!(rows(dimension, dimension * count).unwrap(), count);
        }

        #[test]
        fn test_rows_rejects_partial_rows(dimension in 2usize..64, count in 0usize..64, extra in 1usize..64) {
            let len = dimension * count + extra % dimension;
            prop_assume!(extra % dimension != 0);
            let is_size_mismatch = matches!(rows(dimension, len), Err(FfiError::SizeMismatch { expected, .. }) if expected > len);
            prop_assert!(is_size_mismatch);
        }

        #[test]
        fn test_check_len_matches_equality(expected in 0usize..1000, actual in 0usize..1000) {
            prop_assert_eq!(check_len(expected, actual).is_ok(), expected == actual);
        }

        #[test]
        fn test_element_count_is_checked_product(extents in prop::collection::vec(any::<usize>(), 0..4)) {
            let product = extents.iter().try_fold(1usize, |acc, &e| acc.checked_mul(e));
            prop_assert_eq!(element_count(&extents).ok(), product);
        }
    }

    #[test]
    fn test_require_float() {
        assert!(require_float("kmeans", TypeTag::Float32).is_ok());
        assert!(matches!(
            require_float("kmeans", TypeTag::UInt8),
            Err(FfiError::UnsupportedType(_))
        ));
    }
}
