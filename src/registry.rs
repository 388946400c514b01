//! Implementation registry: candidate enumeration and snapshots.
//!
//! The registry enumerates every runtime implementation installable on
//! the host - the built-in stub, explicitly registered in-process
//! providers, and shared libraries found in the configured search paths -
//! and captures one immutable [`RuntimeCaps`] snapshot per candidate.
//! Enumeration performs only the lightweight descriptor query; full
//! initialization happens per session, later.
//!
//! Absence of candidates is not an error at this layer: a failed or empty
//! probe yields an empty (or stub-only) snapshot, and failures to load
//! individual libraries are logged and skipped.
//!
//! The snapshot is immutable and shareable read-only across loaders:
//! wrap it in an `Arc` and hand it to as many
//! [`Loader`](crate::loader::Loader)s as needed.

use crate::caps::RuntimeCaps;
use crate::runtime::loader::{DEFAULT_SEARCH_PATHS, RuntimeLoader};
use crate::runtime::stub::StubRuntime;
use crate::runtime::RuntimeProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for one registry probe.
///
/// This struct is the explicit selection entry point: which candidates a
/// registry sees is decided entirely by the config passed in, never by
/// process-wide state. Tests register fake providers here instead of
/// flipping global switches.
pub struct RegistryConfig {
    /// Directories probed for runtime shared libraries, in order.
    pub search_paths: Vec<PathBuf>,
    /// Whether the built-in stub candidate is included.
    pub include_stub: bool,
    /// In-process providers registered ahead of discovery, in order.
    pub providers: Vec<Arc<dyn RuntimeProvider>>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            search_paths: DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            include_stub: true,
            providers: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// A config with no library discovery: stub plus whatever providers
    /// are registered. The common choice for tests and embedders that
    /// link their runtimes in-process.
    pub fn in_process() -> Self {
        Self {
            search_paths: Vec::new(),
            ..Self::default()
        }
    }

    /// Register an in-process provider.
    pub fn with_provider(mut self, provider: Arc<dyn RuntimeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Add a search path for runtime libraries.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Exclude the built-in stub candidate.
    pub fn without_stub(mut self) -> Self {
        self.include_stub = false;
        self
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One enumerated candidate: provider plus its capability snapshot.
pub struct Candidate {
    provider: Arc<dyn RuntimeProvider>,
    caps: RuntimeCaps,
}

impl Candidate {
    /// The candidate's declared capabilities.
    pub fn caps(&self) -> &RuntimeCaps {
        &self.caps
    }

    /// The provider backing this candidate.
    pub(crate) fn provider(&self) -> &Arc<dyn RuntimeProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("name", &self.caps.name)
            .field("kind", &self.caps.kind)
            .field("api_version", &self.caps.api_version)
            .finish()
    }
}

/// An immutable, ordered snapshot of all discoverable candidates.
///
/// Ordering is stable within one snapshot: the stub first (when
/// enabled), then registered providers in registration order, then
/// discovered libraries in the OS-reported directory order. Candidates
/// are never added or removed mid-snapshot.
pub struct Registry {
    candidates: Vec<Candidate>,
}

impl Registry {
    /// Enumerate all candidates per `config` and capture the snapshot.
    ///
    /// Never fails: candidates whose libraries cannot be loaded or whose
    /// descriptors do not validate are logged and skipped, and an empty
    /// snapshot is a legal outcome.
    ///
    /// # Safety
    ///
    /// Probing search paths executes the descriptor query of every
    /// runtime library found there. All libraries in the configured
    /// search paths must be trusted and implement the runtime ABI.
    pub unsafe fn probe(config: &RegistryConfig) -> Self {
        let mut candidates = Vec::new();

        if config.include_stub {
            let stub: Arc<dyn RuntimeProvider> = Arc::new(StubRuntime::new());
            candidates.push(Candidate {
                caps: stub.caps().clone(),
                provider: stub,
            });
        }

        for provider in &config.providers {
            candidates.push(Candidate {
                caps: provider.caps().clone(),
                provider: Arc::clone(provider),
            });
        }

        if !config.search_paths.is_empty() {
            let loader = RuntimeLoader::with_search_paths(config.search_paths.iter().cloned());
            // SAFETY: Caller guarantees libraries in the search paths are
            // trusted.
            for result in unsafe { loader.discover() } {
                match result {
                    Ok(runtime) => {
                        let provider: Arc<dyn RuntimeProvider> = Arc::new(runtime);
                        candidates.push(Candidate {
                            caps: provider.caps().clone(),
                            provider,
                        });
                    }
                    Err(e) => {
                        // Absence or breakage of one candidate never
                        // fails the probe.
                        warn!("skipping runtime candidate: {e}");
                    }
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            "registry snapshot: {:?}",
            candidates.iter().map(|c| c.caps.name.as_str()).collect::<Vec<_>>()
        );

        Self { candidates }
    }

    /// Build a registry from already-constructed candidates, bypassing
    /// discovery. In-process equivalent of [`Registry::probe`].
    pub fn in_process(config: &RegistryConfig) -> Self {
        debug_assert!(config.search_paths.is_empty());
        // SAFETY: With no search paths configured, probe loads no
        // libraries and executes no foreign code.
        unsafe {
            Self::probe(&RegistryConfig {
                search_paths: Vec::new(),
                include_stub: config.include_stub,
                providers: config.providers.clone(),
            })
        }
    }

    /// The ordered candidate snapshot.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Iterate candidate capability descriptors in snapshot order.
    pub fn caps_iter(&self) -> impl Iterator<Item = &RuntimeCaps> {
        self.candidates.iter().map(|c| &c.caps)
    }

    /// Number of candidates in the snapshot.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// True if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("candidates", &self.candidates)
            .finish()
    }
}
