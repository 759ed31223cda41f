//! Engine loading and configuration.
//!
//! The VLFeat shared library is loaded dynamically at runtime. This allows
//! the bindings to compile on systems without VLFeat and to report a
//! missing library (or a missing entry point) as an ordinary error.
//!
//! Every entry point is resolved once, when the engine is loaded, into the
//! per-algorithm tables held by [`Engine`]. Engines live for the rest of
//! the process, so handles can hold `&'static` references to their tables.
//!
//! # Exported Accessors
//!
//! Some VLFeat accessors are header-inline functions. The loaded library
//! must export them as symbols (a small export shim compiled against the
//! VLFeat headers does this); a missing one is reported by name.

use crate::aib::AibApi;
use crate::covdet::CovDetApi;
use crate::dsift::DsiftApi;
use crate::encode::EncodeApi;
use crate::gmm::GmmApi;
use crate::hikmeans::HikmApi;
use crate::hog::HogApi;
use crate::ikmeans::IkmApi;
use crate::kdtree::KdForestApi;
use crate::kmeans::KMeansApi;
use crate::lbp::LbpApi;
use crate::liop::LiopApi;
use crate::mser::MserApi;
use crate::quickshift::QuickShiftApi;
use crate::scalespace::ScaleSpaceApi;
use crate::sift::SiftApi;
use crate::slic::SlicApi;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use vl_ffi::{FfiError, FfiResult, HandleConfig};

/// Environment variable naming the engine library.
pub const LIBRARY_ENV: &str = "VL_LIBRARY";

/// Environment variable holding the default verbosity.
pub const VERBOSITY_ENV: &str = "VL_VERBOSITY";

/// Engine settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path or name of the engine library. `None` tries the platform
    /// default names.
    pub library: Option<PathBuf>,
    /// Verbosity given to every new engine object.
    pub verbosity: i32,
}

impl EngineConfig {
    /// Read settings from `VL_LIBRARY` and `VL_VERBOSITY`.
    ///
    /// Unset or unparsable variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let library = std::env::var_os(LIBRARY_ENV).map(PathBuf::from);
        let verbosity = std::env::var(VERBOSITY_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_default();
        Self { library, verbosity }
    }

    /// Use the given library.
    #[must_use]
    pub fn with_library(mut self, library: impl Into<PathBuf>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Use the given default verbosity.
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: i32) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Library names to try, in order.
    fn candidates(&self) -> Vec<PathBuf> {
        if let Some(library) = &self.library {
            return vec![library.clone()];
        }

        #[cfg(target_os = "linux")]
        let names = ["libvl.so", "libvl.so.0"];

        #[cfg(target_os = "macos")]
        let names = ["libvl.dylib"];

        #[cfg(target_os = "windows")]
        let names = ["vl.dll"];

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        let names: [&str; 0] = [];

        names.iter().map(PathBuf::from).collect()
    }
}

/// Where an engine's entry points come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineSource {
    /// A dynamically loaded VLFeat library.
    Library(PathBuf),
    /// The in-process mock engine.
    Mock,
}

/// A fully resolved set of engine entry points.
pub struct Engine {
    pub(crate) source: EngineSource,
    pub(crate) config: EngineConfig,
    pub(crate) kmeans: KMeansApi,
    pub(crate) ikm: IkmApi,
    pub(crate) hikm: HikmApi,
    pub(crate) aib: AibApi,
    pub(crate) kdforest: KdForestApi,
    pub(crate) gmm: GmmApi,
    pub(crate) covdet: CovDetApi,
    pub(crate) sift: SiftApi,
    pub(crate) dsift: DsiftApi,
    pub(crate) scalespace: ScaleSpaceApi,
    pub(crate) mser: MserApi,
    pub(crate) hog: HogApi,
    pub(crate) lbp: LbpApi,
    pub(crate) liop: LiopApi,
    pub(crate) quickshift: QuickShiftApi,
    pub(crate) slic: SlicApi,
    pub(crate) encode: EncodeApi,
}

static GLOBAL_ENGINE: OnceLock<FfiResult<&'static Engine>> = OnceLock::new();

impl Engine {
    /// Load the engine library described by `config`.
    ///
    /// Candidate libraries are tried in order; one that cannot be opened,
    /// or that lacks an entry point, is skipped. The library that loads
    /// stays loaded for the rest of the process.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::LibraryUnavailable`] listing every failed
    /// candidate if none of them provides the full set of entry points.
    pub fn load(config: EngineConfig) -> FfiResult<&'static Self> {
        let candidates = config.candidates();
        Self::load_from(candidates, config)
    }

    fn load_from(candidates: Vec<PathBuf>, config: EngineConfig) -> FfiResult<&'static Self> {
        let mut failures = Vec::with_capacity(candidates.len());

        for path in candidates {
            // SAFETY: loading VLFeat runs its library constructors, which
            // only initialize its own global state.
            let lib = match unsafe { libloading::Library::new(&path) } {
                Ok(lib) => lib,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "engine library not loadable");
                    failures.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };

            let engine = match Self::resolve(&lib, &path, &config) {
                Ok(engine) => engine,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "engine library incomplete");
                    failures.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };

            // Keep the library loaded for the entire program lifetime
            std::mem::forget(lib);

            tracing::info!("Successfully loaded VLFeat library: {}", path.display());
            return Ok(Box::leak(Box::new(engine)));
        }

        if failures.is_empty() {
            failures.push("no candidate library names for this platform".to_string());
        }
        Err(FfiError::LibraryUnavailable(failures.join("; ")))
    }

    /// Resolve every entry point table from `lib`.
    fn resolve(lib: &libloading::Library, path: &Path, config: &EngineConfig) -> FfiResult<Self> {
        Ok(Self {
            source: EngineSource::Library(path.to_path_buf()),
            config: config.clone(),
            kmeans: KMeansApi::load(lib)?,
            ikm: IkmApi::load(lib)?,
            hikm: HikmApi::load(lib)?,
            aib: AibApi::load(lib)?,
            kdforest: KdForestApi::load(lib)?,
            gmm: GmmApi::load(lib)?,
            covdet: CovDetApi::load(lib)?,
            sift: SiftApi::load(lib)?,
            dsift: DsiftApi::load(lib)?,
            scalespace: ScaleSpaceApi::load(lib)?,
            mser: MserApi::load(lib)?,
            hog: HogApi::load(lib)?,
            lbp: LbpApi::load(lib)?,
            liop: LiopApi::load(lib)?,
            quickshift: QuickShiftApi::load(lib)?,
            slic: SlicApi::load(lib)?,
            encode: EncodeApi::load(lib)?,
        })
    }

    /// The process-wide engine, configured from the environment.
    ///
    /// Loaded on first use; the outcome, success or failure, is cached.
    ///
    /// # Errors
    ///
    /// Returns the error from the first load attempt.
    pub fn global() -> FfiResult<&'static Self> {
        GLOBAL_ENGINE
            .get_or_init(|| Self::load(EngineConfig::from_env()))
            .clone()
    }

    /// The in-process mock engine.
    #[must_use]
    pub fn mock() -> &'static Self {
        crate::mock::engine()
    }

    /// Where this engine's entry points come from.
    #[must_use]
    pub const fn source(&self) -> &EngineSource {
        &self.source
    }

    /// The settings this engine was loaded with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether this is the mock engine.
    #[must_use]
    pub const fn is_mock(&self) -> bool {
        matches!(self.source, EngineSource::Mock)
    }

    /// Settings for a new engine object.
    #[must_use]
    pub const fn handle_config(&self) -> HandleConfig {
        HandleConfig::with_verbosity(self.config.verbosity)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("source", &self.source)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = EngineConfig::default()
            .with_library("/opt/vlfeat/libvl.so")
            .with_verbosity(2);
        assert_eq!(config.library, Some(PathBuf::from("/opt/vlfeat/libvl.so")));
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.candidates(), vec![PathBuf::from("/opt/vlfeat/libvl.so")]);
    }

    #[test]
    fn test_default_candidates_are_platform_names() {
        let candidates = EngineConfig::default().candidates();
        #[cfg(target_os = "linux")]
        assert_eq!(candidates[0], PathBuf::from("libvl.so"));
        #[cfg(not(target_os = "linux"))]
        let _ = candidates;
    }

    #[test]
    fn test_missing_library_is_unavailable() {
        let config = EngineConfig::default().with_library("/nonexistent/libvl-missing.so");
        let err = Engine::load(config).unwrap_err();
        assert!(matches!(err, FfiError::LibraryUnavailable(_)));
        assert!(err.to_string().contains("libvl-missing.so"));
    }

    #[test]
    fn test_every_candidate_is_tried() {
        let candidates = vec![
            PathBuf::from("/nonexistent/libvl-first.so"),
            PathBuf::from("/nonexistent/libvl-second.so"),
        ];
        let err = Engine::load_from(candidates, EngineConfig::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("libvl-first.so"));
        assert!(message.contains("libvl-second.so"));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_incomplete_library_falls_through_to_next_candidate() {
        let candidates = vec![
            PathBuf::from("libc.so.6"),
            PathBuf::from("/nonexistent/libvl-after-libc.so"),
        ];
        let err = Engine::load_from(candidates, EngineConfig::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("missing entry point vl_kmeans_new"), "{message}");
        assert!(message.contains("libvl-after-libc.so"), "{message}");
    }

    #[test]
    fn test_mock_engine() {
        let engine = Engine::mock();
        assert!(engine.is_mock());
        assert_eq!(engine.source(), &EngineSource::Mock);
        assert_eq!(engine.handle_config(), HandleConfig::default());
        assert!(format!("{engine:?}").contains("Mock"));
    }
}
