//! Built-in stub runtime.
//!
//! The stub is the no-hardware-required default candidate: it is always
//! present in a registry snapshot (unless disabled), declares no device
//! identity, and accepts processing calls as no-ops. It gives callers a
//! deterministic candidate to resolve when no filters are set, and gives
//! tests a runtime that needs nothing from the host.

use crate::caps::{ApiVersion, RuntimeCaps, RuntimeKind};
use crate::error::{Error, Result};
use crate::runtime::{RuntimeProvider, RuntimeSession, SessionParams};

/// API version the stub reports.
const STUB_API_VERSION: ApiVersion = ApiVersion::new(2, 1);

/// The built-in stub runtime provider.
#[derive(Debug)]
pub struct StubRuntime {
    caps: RuntimeCaps,
}

impl StubRuntime {
    /// Create the stub provider.
    pub fn new() -> Self {
        Self {
            caps: RuntimeCaps::new("medley-stub", RuntimeKind::Stub, STUB_API_VERSION),
        }
    }
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeProvider for StubRuntime {
    fn caps(&self) -> &RuntimeCaps {
        &self.caps
    }

    fn create(&self, params: &SessionParams) -> Result<Box<dyn RuntimeSession>> {
        Ok(Box::new(StubSession {
            _num_threads: params.num_threads,
        }))
    }
}

/// A stub session: accepts every processing call, has no clonable
/// device context.
struct StubSession {
    _num_threads: Option<u16>,
}

impl RuntimeSession for StubSession {
    fn clone_session(&self) -> Result<Box<dyn RuntimeSession>> {
        Err(Error::NotImplemented("clone_session"))
    }

    fn process(&mut self, _opcode: u32, _payload: &mut [u8]) -> Result<()> {
        Ok(())
    }
}
