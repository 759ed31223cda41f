//! Ownership of engine objects.
//!
//! A [`ForeignHandle`] owns exactly one pointer returned by an engine
//! constructor. It is created only from a non-null pointer, it cannot be
//! cloned, and its destructor runs exactly once: on [`ForeignHandle::release`]
//! or when it goes out of scope, including early returns on error.
//!
//! ## States
//!
//! ```text
//!   create ──(null)──> Err(AllocationFailed)    no handle exists
//!     │
//!     └──(non-null)──> Live ──release / drop──> gone
//! ```
//!
//! There is no value of type `ForeignHandle` that is uninitialized or
//! released, so operations on such a handle cannot be written:
//!
//! ```compile_fail
//! use vl_ffi::{ForeignHandle, ForeignResource};
//!
//! fn use_after_release<R: ForeignResource>(handle: ForeignHandle<R>) {
//!     handle.release();
//!     let _ = handle.verbosity();
//! }
//! ```
//!
//! Handles hold a raw pointer and are neither `Send` nor `Sync`; an engine
//! object stays on the thread that created it:
//!
//! ```compile_fail
//! use vl_ffi::{ForeignHandle, ForeignResource};
//!
//! fn assert_send<T: Send>() {}
//! fn check<R: ForeignResource>() {
//!     assert_send::<ForeignHandle<R>>();
//! }
//! ```

use crate::{FfiError, FfiResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr::NonNull;

/// An engine object type and the way to destroy it.
///
/// Implemented on the opaque `#[repr(C)]` type that engine pointers point
/// to.
///
/// # Safety
///
/// `destroy` must release exactly the object behind `raw` using the entry
/// point that pairs with the constructor used in [`ForeignHandle::create`].
pub unsafe trait ForeignResource: 'static {
    /// Table of entry points the object is driven through.
    type Api: 'static;

    /// Short name used in logs and errors.
    const KIND: &'static str;

    /// Call the engine destructor.
    ///
    /// # Safety
    ///
    /// `raw` must be a live object created through `api`; it is invalid
    /// afterwards.
    unsafe fn destroy(api: &Self::Api, raw: *mut Self);

    /// Push a verbosity level to the object. Objects without a verbosity
    /// setting ignore it.
    ///
    /// # Safety
    ///
    /// `raw` must be a live object created through `api`.
    unsafe fn apply_verbosity(api: &Self::Api, raw: *mut Self, level: i32) {
        let _ = (api, raw, level);
    }
}

/// Per-handle settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleConfig {
    /// Engine diagnostic level; 0 is silent.
    pub verbosity: i32,
}

impl HandleConfig {
    /// Settings with the given verbosity.
    #[must_use]
    pub const fn with_verbosity(verbosity: i32) -> Self {
        Self { verbosity }
    }
}

/// Exclusive owner of one engine object.
pub struct ForeignHandle<R: ForeignResource> {
    raw: NonNull<R>,
    api: &'static R::Api,
    config: HandleConfig,
}

impl<R: ForeignResource> ForeignHandle<R> {
    /// Run an engine constructor and take ownership of its result.
    ///
    /// The configured verbosity is applied to the new object.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the constructor returns
    /// null. No destructor is called in that case.
    ///
    /// # Safety
    ///
    /// A non-null pointer returned by `construct` must be a fresh object
    /// owned by nobody else and destroyable by [`ForeignResource::destroy`].
    pub unsafe fn create<F>(api: &'static R::Api, config: HandleConfig, construct: F) -> FfiResult<Self>
    where
        F: FnOnce(&'static R::Api) -> *mut R,
    {
        let Some(raw) = NonNull::new(construct(api)) else {
            tracing::debug!(kind = R::KIND, "engine constructor returned null");
            return Err(FfiError::AllocationFailed(format!(
                "{} constructor returned null",
                R::KIND
            )));
        };

        // SAFETY: `raw` is live and was created through `api`.
        unsafe { R::apply_verbosity(api, raw.as_ptr(), config.verbosity) };
        tracing::debug!(kind = R::KIND, ptr = ?raw, "created engine object");

        Ok(Self { raw, api, config })
    }

    /// Pointer for entry points that only read the object.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *const R {
        self.raw.as_ptr().cast_const()
    }

    /// Pointer for entry points that mutate the object.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut R {
        self.raw.as_ptr()
    }

    /// The entry points this object was created through.
    #[inline]
    #[must_use]
    pub const fn api(&self) -> &'static R::Api {
        self.api
    }

    /// Current settings.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> HandleConfig {
        self.config
    }

    /// Configured verbosity.
    #[inline]
    #[must_use]
    pub const fn verbosity(&self) -> i32 {
        self.config.verbosity
    }

    /// Change the verbosity of this object only.
    pub fn set_verbosity(&mut self, level: i32) {
        self.config.verbosity = level;
        // SAFETY: the handle is live for as long as `self` exists.
        unsafe { R::apply_verbosity(self.api, self.raw.as_ptr(), level) };
    }

    /// Create a sibling handle through another constructor of the same
    /// object type, such as a deep copy, carrying over the settings.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::AllocationFailed`] if the constructor returns
    /// null.
    ///
    /// # Safety
    ///
    /// Same contract as [`ForeignHandle::create`].
    pub unsafe fn derive<F>(&self, construct: F) -> FfiResult<Self>
    where
        F: FnOnce(&'static R::Api, *const R) -> *mut R,
    {
        let source = self.as_ptr();
        // SAFETY: forwarded to the caller.
        unsafe { Self::create(self.api, self.config, |api| construct(api, source)) }
    }

    /// Destroy the engine object now.
    pub fn release(self) {
        drop(self);
    }
}

impl<R: ForeignResource> Drop for ForeignHandle<R> {
    fn drop(&mut self) {
        tracing::debug!(kind = R::KIND, ptr = ?self.raw, "releasing engine object");
        // SAFETY: the pointer came from a successful constructor and this is
        // the only place it is destroyed.
        unsafe { R::destroy(self.api, self.raw.as_ptr()) };
    }
}

impl<R: ForeignResource> fmt::Debug for ForeignHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignHandle")
            .field("kind", &R::KIND)
            .field("raw", &self.raw)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[repr(C)]
    struct Widget {
        verbosity: i32,
    }

    struct WidgetApi {
        delete: unsafe extern "C" fn(*mut Widget),
        set_verbosity: unsafe extern "C" fn(*mut Widget, i32),
    }

    thread_local! {
        static LIVE: Cell<usize> = const { Cell::new(0) };
        static DESTROYED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    fn widget_new() -> *mut Widget {
        LIVE.with(|live| live.set(live.get() + 1));
        Box::into_raw(Box::new(Widget { verbosity: 0 }))
    }

    unsafe extern "C" fn widget_delete(raw: *mut Widget) {
        LIVE.with(|live| live.set(live.get() - 1));
        DESTROYED.with(|d| d.borrow_mut().push(raw as usize));
        drop(unsafe { Box::from_raw(raw) });
    }

    unsafe extern "C" fn widget_set_verbosity(raw: *mut Widget, level: i32) {
        unsafe { (*raw).verbosity = level };
    }

    static WIDGET_API: WidgetApi = WidgetApi {
        delete: widget_delete,
        set_verbosity: widget_set_verbosity,
    };

    unsafe impl ForeignResource for Widget {
        type Api = WidgetApi;
        const KIND: &'static str = "widget";

        unsafe fn destroy(api: &WidgetApi, raw: *mut Self) {
            unsafe { (api.delete)(raw) };
        }

        unsafe fn apply_verbosity(api: &WidgetApi, raw: *mut Self, level: i32) {
            unsafe { (api.set_verbosity)(raw, level) };
        }
    }

    fn live() -> usize {
        LIVE.with(Cell::get)
    }

    fn create_widget(config: HandleConfig) -> FfiResult<ForeignHandle<Widget>> {
        unsafe { ForeignHandle::create(&WIDGET_API, config, |_| widget_new()) }
    }

    #[test]
    fn test_create_then_release_leaves_nothing() {
        let before = live();
        let handle = create_widget(HandleConfig::default()).unwrap();
        assert_eq!(live(), before + 1);
        handle.release();
        assert_eq!(live(), before);
    }

    #[test]
    fn test_drop_releases_exactly_once() {
        let handle = create_widget(HandleConfig::default()).unwrap();
        let addr = handle.as_ptr() as usize;
        drop(handle);
        let hits = DESTROYED.with(|d| d.borrow().iter().filter(|&&a| a == addr).count());
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_null_constructor_is_allocation_failure() {
        let before = live();
        let result: FfiResult<ForeignHandle<Widget>> = unsafe {
            ForeignHandle::create(&WIDGET_API, HandleConfig::default(), |_| std::ptr::null_mut())
        };
        assert!(matches!(result, Err(FfiError::AllocationFailed(_))));
        assert_eq!(live(), before);
    }

    #[test]
    fn test_early_return_releases() {
        fn failing_step() -> FfiResult<()> {
            let _handle = create_widget(HandleConfig::default())?;
            Err(FfiError::UnsupportedInput("bail".to_string()))
        }

        let before = live();
        assert!(failing_step().is_err());
        assert_eq!(live(), before);
    }

    #[test]
    fn test_verbosity_is_per_handle() {
        let mut loud = create_widget(HandleConfig::with_verbosity(2)).unwrap();
        let quiet = create_widget(HandleConfig::default()).unwrap();

        assert_eq!(unsafe { (*loud.as_ptr()).verbosity }, 2);
        assert_eq!(unsafe { (*quiet.as_ptr()).verbosity }, 0);

        loud.set_verbosity(5);
        assert_eq!(loud.verbosity(), 5);
        assert_eq!(unsafe { (*loud.as_ptr()).verbosity }, 5);
        assert_eq!(quiet.verbosity(), 0);
    }

    #[test]
    fn test_read_pointer_is_const() {
        let mut handle = create_widget(HandleConfig::default()).unwrap();
        let read: *const Widget = handle.as_ptr();
        let write: *mut Widget = handle.as_mut_ptr();
        assert_eq!(read, write.cast_const());
    }

    #[test]
    fn test_derive_is_independent() {
        let before = live();
        let original = create_widget(HandleConfig::with_verbosity(1)).unwrap();
        let copy = unsafe { original.derive(|_, _| widget_new()) }.unwrap();
        assert_ne!(original.as_ptr(), copy.as_ptr());
        assert_eq!(copy.verbosity(), 1);
        drop(original);
        assert_eq!(live(), before + 1);
        drop(copy);
        assert_eq!(live(), before);
    }

    #[test]
    fn test_move_transfers_ownership() {
        let before = live();
        let handle = create_widget(HandleConfig::default()).unwrap();
        let moved = vec![handle];
        assert_eq!(live(), before + 1);
        drop(moved);
        assert_eq!(live(), before);
    }
}
