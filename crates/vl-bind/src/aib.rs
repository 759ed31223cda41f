//! Agglomerative information bottleneck.
//!
//! Merges the values of a discrete variable `x` greedily, at each step
//! joining the pair whose merge loses the least mutual information with
//! the class label `c`. The input is the joint distribution `P(x, c)`,
//! `num_values` rows of `num_labels` entries; the result is a binary
//! merge tree over `2 * num_values - 1` nodes, the first `num_values`
//! being the original values.

use crate::engine::Engine;
use crate::{check_len, element_count};
use std::ffi::c_int;
use vl_ffi::{ArrayView, FfiError, FfiResult, ForeignHandle, ForeignResource};

/// Opaque `VlAIB`.
#[repr(C)]
pub(crate) struct VlAIB {
    _private: [u8; 0],
}

foreign_api! {
    /// `vl_aib_*` entry points.
    pub(crate) struct AibApi {
        fn vl_aib_new(pcx: *mut f64, num_values: u32, num_labels: u32) -> *mut VlAIB;
        fn vl_aib_delete(aib: *mut VlAIB);
        fn vl_aib_process(aib: *mut VlAIB);
        fn vl_aib_get_parents(aib: *const VlAIB) -> *const u32;
        fn vl_aib_get_costs(aib: *const VlAIB) -> *const f64;
        fn vl_aib_get_verbosity(aib: *const VlAIB) -> c_int;
        fn vl_aib_set_verbosity(aib: *mut VlAIB, verbosity: c_int);
    }
}

unsafe impl ForeignResource for VlAIB {
    type Api = AibApi;
    const KIND: &'static str = "aib";

    unsafe fn destroy(api: &AibApi, raw: *mut Self) {
        unsafe { (api.vl_aib_delete)(raw) };
    }

    unsafe fn apply_verbosity(api: &AibApi, raw: *mut Self, level: i32) {
        unsafe { (api.vl_aib_set_verbosity)(raw, level) };
    }
}

/// One information bottleneck run.
///
/// The engine normalizes and then merges the distribution in place, so
/// the binding owns the buffer it works on.
#[derive(Debug)]
pub struct Aib {
    // Declared before `_pcx` so the engine object is deleted first.
    handle: ForeignHandle<VlAIB>,
    _pcx: Vec<f64>,
    num_values: usize,
    num_labels: usize,
    processed: bool,
}

impl Aib {
    /// Prepare a run on `pcx`, `num_values * num_labels` non-negative
    /// entries in row-major order (one row per value).
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::UnsupportedInput`] for a zero or oversized
    /// dimension or a negative or non-finite entry, and
    /// [`FfiError::SizeMismatch`] if `pcx` has the wrong length.
    pub fn new(engine: &'static Engine, pcx: &[f64], num_values: usize, num_labels: usize) -> FfiResult<Self> {
        let (Ok(c_values), Ok(c_labels)) = (u32::try_from(num_values), u32::try_from(num_labels)) else {
            return Err(FfiError::UnsupportedInput(format!(
                "distribution of {num_values}x{num_labels} is too large"
            )));
        };
        if num_values == 0 || num_labels == 0 {
            return Err(FfiError::UnsupportedInput(format!(
                "cannot run aib on a {num_values}x{num_labels} distribution"
            )));
        }
        check_len(element_count(&[num_values, num_labels])?, pcx.len())?;
        if let Some(bad) = pcx.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(FfiError::UnsupportedInput(format!("invalid probability {bad}")));
        }

        let mut pcx = pcx.to_vec();
        let ptr = pcx.as_mut_ptr();
        // SAFETY: `pcx` is owned by the returned binding, outlives the
        // engine object and is not touched from Rust afterwards.
        let handle = unsafe {
            ForeignHandle::create(&engine.aib, engine.handle_config(), |api: &'static AibApi| (api.vl_aib_new)(ptr, c_values, c_labels))?
        };
        Ok(Self {
            handle,
            _pcx: pcx,
            num_values,
            num_labels,
            processed: false,
        })
    }

    /// Run all `num_values - 1` merges.
    pub fn process(&mut self) {
        tracing::debug!(num_values = self.num_values, num_labels = self.num_labels, "aib process");
        // SAFETY: the distribution buffer is alive for the object's
        // lifetime.
        unsafe { (self.handle.api().vl_aib_process)(self.handle.as_mut_ptr()) };
        self.processed = true;
    }

    /// Parent of every node of the merge tree, `2 * num_values - 1`
    /// entries. Leaves come first, then merged nodes in merge order; the
    /// root is its own parent.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before [`Aib::process`].
    pub fn parents(&self) -> FfiResult<ArrayView<'_, u32>> {
        self.require_processed()?;
        // SAFETY: the engine holds one parent per node.
        Ok(unsafe {
            ArrayView::from_raw_parts(
                (self.handle.api().vl_aib_get_parents)(self.handle.as_ptr()),
                2 * self.num_values - 1,
            )
        })
    }

    /// Information lost by each merge, `num_values` entries; entry `t`
    /// is the cost of merge `t`, entry zero the unmerged state.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::InvalidHandleState`] before [`Aib::process`].
    pub fn costs(&self) -> FfiResult<ArrayView<'_, f64>> {
        self.require_processed()?;
        // SAFETY: the engine holds one cost per value.
        Ok(unsafe { ArrayView::from_raw_parts((self.handle.api().vl_aib_get_costs)(self.handle.as_ptr()), self.num_values) })
    }

    /// Number of values of `x`.
    #[must_use]
    pub const fn num_values(&self) -> usize {
        self.num_values
    }

    /// Number of class labels.
    #[must_use]
    pub const fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Diagnostic level reported by the engine object.
    #[must_use]
    pub fn verbosity(&self) -> i32 {
        // SAFETY: the handle is live.
        unsafe { (self.handle.api().vl_aib_get_verbosity)(self.handle.as_ptr()) }
    }

    /// Change the diagnostic level of this object.
    pub fn set_verbosity(&mut self, level: i32) {
        self.handle.set_verbosity(level);
    }

    fn require_processed(&self) -> FfiResult<()> {
        if self.processed {
            Ok(())
        } else {
            Err(FfiError::InvalidHandleState {
                resource: VlAIB::KIND,
                reason: "call process first".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    /// Values 0 and 1 always carry label 0, value 2 label 1.
    fn pcx() -> Vec<f64> {
        vec![0.25, 0.0, 0.25, 0.0, 0.0, 0.5]
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(Aib::new(Engine::mock(), &[], 0, 2), Err(FfiError::UnsupportedInput(_))));
        assert!(matches!(
            Aib::new(Engine::mock(), &pcx(), 2, 2),
            Err(FfiError::SizeMismatch { expected: 4, actual: 6 })
        ));
        assert!(matches!(
            Aib::new(Engine::mock(), &[0.5, -0.5], 1, 2),
            Err(FfiError::UnsupportedInput(_))
        ));
        assert!(matches!(
            Aib::new(Engine::mock(), &[f64::NAN, 0.5], 2, 1),
            Err(FfiError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_outputs_require_process() {
        let aib = Aib::new(Engine::mock(), &pcx(), 3, 2).unwrap();
        assert!(matches!(aib.parents(), Err(FfiError::InvalidHandleState { .. })));
        assert!(matches!(aib.costs(), Err(FfiError::InvalidHandleState { .. })));
    }

    #[test]
    fn test_merges_values_with_the_same_label_first() {
        let mut aib = Aib::new(Engine::mock(), &pcx(), 3, 2).unwrap();
        aib.process();
        assert_eq!(aib.parents().unwrap().as_slice(), &[3, 3, 4, 4, 4]);
        let costs = aib.costs().unwrap();
        assert_eq!(costs.len(), 3);
        assert_eq!(costs[0], 0.0);
        assert!(costs[1].abs() < 1e-12);
        assert!((costs[2] - std::f64::consts::LN_2).abs() < 1e-12);
        assert_eq!((aib.num_values(), aib.num_labels()), (3, 2));
    }

    #[test]
    fn test_caller_buffer_is_not_modified() {
        let input = vec![1.0, 3.0, 2.0, 2.0];
        let mut aib = Aib::new(Engine::mock(), &input, 2, 2).unwrap();
        aib.process();
        assert_eq!(input, vec![1.0, 3.0, 2.0, 2.0]);
        assert_eq!(aib.parents().unwrap().as_slice(), &[2, 2, 2]);
    }

    #[test]
    fn test_verbosity() {
        let mut aib = Aib::new(Engine::mock(), &pcx(), 3, 2).unwrap();
        aib.set_verbosity(3);
        assert_eq!(aib.verbosity(), 3);
    }

    #[test]
    fn test_buffer_outlives_engine_object() {
        let before = mock::live_objects_of(VlAIB::KIND);
        let aib = Aib::new(Engine::mock(), &pcx(), 3, 2).unwrap();
        assert_eq!(mock::live_objects_of(VlAIB::KIND), before + 1);
        drop(aib);
        assert_eq!(mock::live_objects_of(VlAIB::KIND), before);
    }
}
