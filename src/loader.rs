//! Loader: filter configuration and session resolution.
//!
//! A [`Loader`] owns one filter tree over a shared registry snapshot and
//! resolves filtered candidates into live [`Session`]s. Several loaders
//! may hold independent filter trees over the same snapshot.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use medley::loader::Loader;
//! use medley::registry::{Registry, RegistryConfig};
//! use medley::caps::RuntimeKind;
//!
//! let registry = Arc::new(Registry::in_process(&RegistryConfig::in_process()));
//! let mut loader = Loader::new(registry);
//! loader.set_kind(RuntimeKind::Stub)?;
//!
//! let session = loader.create_session(0)?;
//! session.close()?;
//! loader.unload();
//! # Ok::<(), medley::Error>(())
//! ```

use crate::caps::RuntimeKind;
use crate::error::{Error, Result};
use crate::property::{FilterTree, PropertyValue, paths};
use crate::registry::Registry;
use crate::runtime::SessionParams;
use crate::selector;
use crate::session::Session;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Owner of a filter tree and registry access; resolves implementation
/// candidates into sessions.
pub struct Loader {
    registry: Arc<Registry>,
    filters: FilterTree,
    /// Sessions created through this loader and not yet closed.
    live_sessions: Arc<AtomicUsize>,
}

impl Loader {
    /// Create a loader with an empty filter tree over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            filters: FilterTree::new(),
            live_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The registry snapshot this loader selects from.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The loader's current filter tree.
    pub fn filters(&self) -> &FilterTree {
        &self.filters
    }

    /// Convenience filter for the implementation-kind path.
    pub fn set_kind(&mut self, kind: RuntimeKind) -> Result<()> {
        self.filters.set(paths::IMPL_KIND, kind as u32)
    }

    /// Set one filter property.
    ///
    /// Only structural validation happens here; value kinds and
    /// categorical validity surface at [`Loader::create_session`] as
    /// [`Error::Unsupported`]. Mutating filters after a session was
    /// created is permitted and affects only subsequent
    /// `create_session` calls, never already-resolved sessions.
    pub fn set_property(
        &mut self,
        path: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        self.filters.set(path, value)
    }

    /// Resolve the `index`-th matching candidate into a session.
    ///
    /// Runs deferred configuration validation first (a bad filter tree
    /// fails with [`Error::Unsupported`] and is never misreported), then
    /// reduces the snapshot to the ordered matching sub-sequence.
    /// `index` addresses that sub-sequence; out of bounds - including
    /// the zero-candidates case produced by deliberately mismatched
    /// device filters - fails with [`Error::NotFound`].
    ///
    /// A failed call leaves the loader fully reusable with another index
    /// or filter configuration.
    pub fn create_session(&self, index: usize) -> Result<Session> {
        self.filters.validate()?;

        let matching = selector::select(self.registry.caps_iter(), &self.filters);
        let Some(&candidate_idx) = matching.get(index) else {
            debug!(
                index,
                matching = matching.len(),
                "session index out of bounds of the matching sub-sequence"
            );
            return Err(Error::NotFound);
        };

        let candidate = &self.registry.candidates()[candidate_idx];
        let params = SessionParams::from_filters(&self.filters);
        let runtime = candidate.provider().create(&params)?;
        debug!(
            runtime = %candidate.caps().name,
            index,
            "resolved candidate into session"
        );

        Ok(Session::new(
            runtime,
            Arc::clone(&self.live_sessions),
            candidate.caps().name.clone(),
        ))
    }

    /// Number of sessions created through this loader and not yet
    /// closed.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::Relaxed)
    }

    /// Release the loader's registry reference and filter tree.
    ///
    /// Safe to call after all sessions created through it are closed.
    /// Live sessions keep their own references to the bound
    /// implementations and stay usable; only the loader's handle on the
    /// snapshot is released.
    pub fn unload(self) {
        debug!(live = self.live_sessions(), "loader unloaded");
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("filters", &self.filters.len())
            .field("live_sessions", &self.live_sessions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{ApiVersion, DeviceIdent, RuntimeCaps};
    use crate::registry::RegistryConfig;
    use crate::runtime::{RuntimeProvider, RuntimeSession};

    struct FakeHardware {
        caps: RuntimeCaps,
    }

    impl FakeHardware {
        fn new() -> Self {
            let mut caps = RuntimeCaps::new("fake-gpu", RuntimeKind::Hardware, ApiVersion::new(2, 1));
            caps.device = DeviceIdent {
                vendor_id: Some(0x8086),
                drm_render_node: Some(128),
                drm_primary_node: Some(0),
                ..Default::default()
            };
            Self { caps }
        }
    }

    impl RuntimeProvider for FakeHardware {
        fn caps(&self) -> &RuntimeCaps {
            &self.caps
        }
        fn create(&self, _params: &SessionParams) -> Result<Box<dyn RuntimeSession>> {
            Ok(Box::new(FakeHwSession))
        }
    }

    struct FakeHwSession;

    impl RuntimeSession for FakeHwSession {
        fn clone_session(&self) -> Result<Box<dyn RuntimeSession>> {
            Ok(Box::new(FakeHwSession))
        }
        fn process(&mut self, _opcode: u32, _payload: &mut [u8]) -> Result<()> {
            Ok(())
        }
    }

    fn registry_with_fake_gpu() -> Arc<Registry> {
        Arc::new(Registry::in_process(
            &RegistryConfig::in_process().with_provider(Arc::new(FakeHardware::new())),
        ))
    }

    #[test]
    fn test_default_filters_resolve_stub_first() {
        let loader = Loader::new(registry_with_fake_gpu());
        let session = loader.create_session(0).unwrap();
        assert_eq!(session.runtime_name(), "medley-stub");
    }

    #[test]
    fn test_kind_filter_indexes_the_filtered_sequence() {
        let mut loader = Loader::new(registry_with_fake_gpu());
        loader.set_kind(RuntimeKind::Hardware).unwrap();
        // Candidate 0 of the hardware sub-sequence, not of the snapshot.
        let session = loader.create_session(0).unwrap();
        assert_eq!(session.runtime_name(), "fake-gpu");
    }

    #[test]
    fn test_index_out_of_bounds_is_not_found() {
        let loader = Loader::new(registry_with_fake_gpu());
        assert!(matches!(loader.create_session(5), Err(Error::NotFound)));
    }

    #[test]
    fn test_mismatched_device_filter_is_not_found() {
        let mut loader = Loader::new(registry_with_fake_gpu());
        loader.set_kind(RuntimeKind::Hardware).unwrap();
        loader.set_property(paths::VENDOR_ID, 0x8086u16).unwrap();
        loader.set_property(paths::DRM_RENDER_NODE, 999u32).unwrap();
        assert!(matches!(loader.create_session(0), Err(Error::NotFound)));
    }

    #[test]
    fn test_invalid_config_is_unsupported_not_not_found() {
        let mut loader = Loader::new(registry_with_fake_gpu());
        // Wrong value kind for a recognized path: configuration error,
        // surfaced at session creation.
        loader.set_property(paths::NUM_THREAD, 4u32).unwrap();
        assert!(matches!(
            loader.create_session(0),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_failed_create_leaves_loader_reusable() {
        let mut loader = Loader::new(registry_with_fake_gpu());
        loader.set_property(paths::VENDOR_ID, 0xffffu16).unwrap();
        assert!(matches!(loader.create_session(0), Err(Error::NotFound)));

        loader.set_property(paths::VENDOR_ID, 0x8086u16).unwrap();
        assert!(loader.create_session(0).is_ok());
    }

    #[test]
    fn test_live_session_count_tracks_close() {
        let loader = Loader::new(registry_with_fake_gpu());
        let a = loader.create_session(0).unwrap();
        let b = loader.create_session(0).unwrap();
        assert_eq!(loader.live_sessions(), 2);

        a.close().unwrap();
        assert_eq!(loader.live_sessions(), 1);
        b.close().unwrap();
        assert_eq!(loader.live_sessions(), 0);
    }

    #[test]
    fn test_repeated_selection_is_deterministic() {
        let mut loader = Loader::new(registry_with_fake_gpu());
        loader.set_kind(RuntimeKind::Hardware).unwrap();
        for _ in 0..3 {
            let session = loader.create_session(0).unwrap();
            assert_eq!(session.runtime_name(), "fake-gpu");
            session.close().unwrap();
        }
    }
}
