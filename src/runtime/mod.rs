//! Runtime implementation contract and loading.
//!
//! Concrete media runtimes are external collaborators. The dispatcher
//! talks to them through exactly two things: a side-effect-free
//! capability query (safe to call before full load) and an entry-point
//! table covering session create/clone/close plus the runtime's opaque
//! processing operations. This module defines that contract twice:
//!
//! - [`RuntimeProvider`]/[`RuntimeSession`]: the safe in-process trait
//!   seam, used by the built-in stub and by tests;
//! - [`abi`]: the C-compatible descriptor and entry-point table exported
//!   by runtime shared libraries, bridged onto the traits by [`loader`].
//!
//! The dispatcher never inspects frame or codec data; `process` payloads
//! are routed through untouched.

pub mod abi;
pub mod loader;
pub mod stub;

use crate::caps::RuntimeCaps;
use crate::error::Result;
use crate::property::paths;

pub use abi::{MEDLEY_ABI_VERSION, ExtensionProperty, RuntimeDescriptor, SessionTable};
pub use loader::{DEFAULT_SEARCH_PATHS, LoadedRuntime, RuntimeLoadError, RuntimeLoader};
pub use stub::StubRuntime;

/// Validated session-creation parameters extracted from a loader's
/// filter tree.
///
/// These are filter properties that configure the created session rather
/// than constrain candidate selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionParams {
    /// Requested thread count (`session.NumThread`), if set.
    pub num_threads: Option<u16>,
}

impl SessionParams {
    /// Extract session parameters from a validated filter tree.
    pub fn from_filters(tree: &crate::property::FilterTree) -> Self {
        Self {
            num_threads: tree.get(paths::NUM_THREAD).and_then(|v| v.as_u16()),
        }
    }
}

/// One enumerable runtime implementation candidate.
///
/// `caps` must be cheap and side-effect free: the registry queries every
/// discoverable candidate without fully initializing any of them.
/// `create` performs the full resolution (implementation-level state,
/// device contexts) for one session.
pub trait RuntimeProvider: Send + Sync {
    /// Declared capabilities of this candidate.
    fn caps(&self) -> &RuntimeCaps;

    /// Create one bound session instance.
    fn create(&self, params: &SessionParams) -> Result<Box<dyn RuntimeSession>>;
}

/// One live instance of a runtime implementation, bound to a session.
pub trait RuntimeSession: Send {
    /// Clone this instance into a cooperating child that shares
    /// implementation-level resources (e.g. a device context).
    ///
    /// Runtimes without a clonable context report
    /// [`Error::NotImplemented`](crate::error::Error::NotImplemented),
    /// which the dispatcher surfaces distinctly from `NotFound`.
    fn clone_session(&self) -> Result<Box<dyn RuntimeSession>>;

    /// Execute one opaque processing operation.
    ///
    /// The dispatcher routes `opcode` and `payload` through without
    /// interpretation; their meaning is a private contract between the
    /// caller and the runtime.
    fn process(&mut self, opcode: u32, payload: &mut [u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::FilterTree;

    #[test]
    fn test_session_params_extraction() {
        let mut tree = FilterTree::new();
        assert_eq!(SessionParams::from_filters(&tree), SessionParams::default());

        tree.set(paths::NUM_THREAD, 4u16).unwrap();
        assert_eq!(
            SessionParams::from_filters(&tree),
            SessionParams { num_threads: Some(4) }
        );
    }
}
