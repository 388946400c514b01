//! # Medley
//!
//! A capability-based dispatcher for media processing runtimes.
//!
//! Medley discovers the runtime implementations installable on a host
//! (a built-in stub, software runtimes, hardware runtimes), lets callers
//! declaratively constrain which implementation they want, selects the
//! best matching candidate, and manages the lifecycle of opaque
//! processing sessions bound to it - create, clone into cooperating
//! child sessions, disjoin, close. The dispatcher never inspects frame
//! or codec data; it only routes calls through each runtime's resolved
//! entry-point table.
//!
//! ## Features
//!
//! - **Typed property filters**: hierarchical path/value constraints
//!   with a small closed comparator set (exact match, minimum version)
//! - **Deterministic selection**: filters reduce the registry snapshot
//!   to an ordered sub-sequence that session indices address
//! - **Session trees**: clone produces a joined child sharing the
//!   implementation's device context until disjoined
//! - **Precise errors**: "the query is invalid" (`Unsupported`) is never
//!   conflated with "nothing matches" (`NotFound`)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use medley::prelude::*;
//!
//! // Enumerate candidates once, share the snapshot across loaders.
//! let registry = Arc::new(Registry::in_process(&RegistryConfig::in_process()));
//!
//! let mut loader = Loader::new(registry);
//! loader.set_kind(RuntimeKind::Stub)?;
//! loader.set_property("implDescription.ApiVersion.Major", 2u16)?;
//!
//! // Resolve the first matching candidate into a session.
//! let session = loader.create_session(0)?;
//! session.close()?;
//! loader.unload();
//! # Ok::<(), medley::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod caps;
pub mod error;
pub mod loader;
pub mod property;
pub mod registry;
pub mod runtime;
pub mod selector;
pub mod session;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::caps::{ApiVersion, RuntimeCaps, RuntimeKind};
    pub use crate::error::{Error, Result};
    pub use crate::loader::Loader;
    pub use crate::property::{FilterTree, PropertyValue};
    pub use crate::registry::{Registry, RegistryConfig};
    pub use crate::session::{Session, SessionState};
}

pub use error::{Error, Result};
