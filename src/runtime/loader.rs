//! Dynamic runtime loading using libloading.

use super::abi::{ENTRY_POINT, MEDLEY_ABI_VERSION, RuntimeDescriptor, SessionTable};
use crate::caps::RuntimeCaps;
use crate::error::{Error, Result};
use crate::runtime::{RuntimeProvider, RuntimeSession, SessionParams};
use libloading::{Library, Symbol};
use std::ffi::{OsStr, c_void};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::debug;

/// Errors that can occur when loading runtime libraries.
#[derive(Debug, ThisError)]
pub enum RuntimeLoadError {
    /// Failed to load the shared library.
    #[error("failed to load library: {0}")]
    LoadFailed(String),

    /// The library doesn't have the required entry point.
    #[error("missing runtime entry point: medley_runtime_descriptor")]
    MissingEntryPoint,

    /// The runtime returned a null descriptor.
    #[error("runtime returned null descriptor")]
    NullDescriptor,

    /// ABI version mismatch.
    #[error("ABI version mismatch: expected {expected}, got {actual}")]
    AbiMismatch {
        /// Expected ABI version.
        expected: u32,
        /// Actual ABI version found.
        actual: u32,
    },

    /// Runtime descriptor validation failed.
    #[error("invalid runtime descriptor: {0}")]
    InvalidDescriptor(&'static str),
}

/// Type of the runtime entry point function.
type DescriptorEntryPoint = unsafe extern "C" fn() -> *const RuntimeDescriptor;

/// Default install locations probed for runtime libraries, in order.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "/usr/lib/medley/runtimes",
    "/usr/local/lib/medley/runtimes",
];

// ============================================================================
// Loaded runtime candidate
// ============================================================================

/// A runtime implementation loaded from a shared library.
///
/// Holds a reference to the library to keep it loaded; sessions created
/// from it hold their own references, so the library stays bound until
/// the provider and every session created through it are gone.
pub struct LoadedRuntime {
    /// The loaded library (kept alive).
    library: Arc<Library>,
    /// Pointer to the descriptor (valid as long as the library is loaded).
    descriptor: *const RuntimeDescriptor,
    /// Cached capability snapshot.
    caps: RuntimeCaps,
}

// SAFETY: LoadedRuntime only accesses static data from the loaded library
// through validated pointers. The library is kept alive by Arc<Library>.
unsafe impl Send for LoadedRuntime {}
unsafe impl Sync for LoadedRuntime {}

impl RuntimeProvider for LoadedRuntime {
    fn caps(&self) -> &RuntimeCaps {
        &self.caps
    }

    fn create(&self, params: &SessionParams) -> Result<Box<dyn RuntimeSession>> {
        // SAFETY: The descriptor was validated at load time and the
        // library is kept alive.
        let desc = unsafe { &*self.descriptor };
        // SAFETY: Calling the runtime's create entry point with a plain
        // value argument.
        let ptr = unsafe { (desc.table.create)(params.num_threads.unwrap_or(0)) };
        if ptr.is_null() {
            return Err(Error::runtime(format!(
                "runtime '{}' failed to create a session",
                self.caps.name
            )));
        }
        Ok(Box::new(TableSession {
            ptr,
            table: desc.table,
            _library: Arc::clone(&self.library),
        }))
    }
}

impl std::fmt::Debug for LoadedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedRuntime")
            .field("name", &self.caps.name)
            .field("kind", &self.caps.kind)
            .field("api_version", &self.caps.api_version)
            .finish()
    }
}

/// A live session routed through a runtime's entry-point table.
struct TableSession {
    /// Opaque session pointer owned by the runtime.
    ptr: *mut c_void,
    /// Entry-point table resolved at load time.
    table: SessionTable,
    /// Keeps the library bound while the session lives.
    _library: Arc<Library>,
}

// SAFETY: The session pointer is owned exclusively by this wrapper and
// only passed back into the library that produced it, which stays loaded
// for the wrapper's lifetime.
unsafe impl Send for TableSession {}

impl RuntimeSession for TableSession {
    fn clone_session(&self) -> Result<Box<dyn RuntimeSession>> {
        let clone_fn = self
            .table
            .clone
            .ok_or(Error::NotImplemented("clone_session"))?;
        // SAFETY: `ptr` was produced by this table's create/clone entry
        // point and is still live.
        let child = unsafe { clone_fn(self.ptr) };
        if child.is_null() {
            return Err(Error::runtime("runtime clone entry point failed"));
        }
        Ok(Box::new(TableSession {
            ptr: child,
            table: self.table,
            _library: Arc::clone(&self._library),
        }))
    }

    fn process(&mut self, opcode: u32, payload: &mut [u8]) -> Result<()> {
        let process_fn = self.table.process.ok_or(Error::NotImplemented("process"))?;
        // SAFETY: `ptr` is live and `payload` is a valid byte range.
        let status = unsafe { process_fn(self.ptr, opcode, payload.as_mut_ptr(), payload.len()) };
        if status == 0 {
            Ok(())
        } else {
            Err(Error::runtime(format!(
                "processing operation {opcode} failed with status {status}"
            )))
        }
    }
}

impl Drop for TableSession {
    fn drop(&mut self) {
        // SAFETY: Each session pointer is closed exactly once, here.
        unsafe { (self.table.close)(self.ptr) };
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Loader that probes well-known install locations for runtime
/// libraries.
pub struct RuntimeLoader {
    /// Search paths for runtime libraries.
    search_paths: Vec<std::path::PathBuf>,
}

impl RuntimeLoader {
    /// Create a loader with the default search paths.
    pub fn new() -> Self {
        Self {
            search_paths: DEFAULT_SEARCH_PATHS
                .iter()
                .map(std::path::PathBuf::from)
                .collect(),
        }
    }

    /// Create a loader with only the given search paths.
    pub fn with_search_paths(
        paths: impl IntoIterator<Item = impl Into<std::path::PathBuf>>,
    ) -> Self {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a search path.
    pub fn add_search_path(&mut self, path: impl Into<std::path::PathBuf>) {
        self.search_paths.push(path.into());
    }

    /// Load a runtime library from a specific path.
    ///
    /// The descriptor query is the only call made into the library here;
    /// full initialization happens later, per session.
    ///
    /// # Safety
    ///
    /// Loading runtimes executes arbitrary code from shared libraries.
    /// The library must:
    /// - Export a valid `medley_runtime_descriptor` function
    /// - Return a valid, static runtime descriptor
    /// - Properly implement the session entry-point table
    pub unsafe fn load_from_path(&self, path: impl AsRef<Path>) -> std::result::Result<LoadedRuntime, RuntimeLoadError> {
        let path = path.as_ref();

        // SAFETY: Loading a dynamic library. Caller ensures it is trusted.
        let library = unsafe {
            Library::new(path).map_err(|e| RuntimeLoadError::LoadFailed(e.to_string()))?
        };

        // SAFETY: Getting a symbol from the library just loaded.
        let entry_point: Symbol<DescriptorEntryPoint> = unsafe {
            library
                .get(ENTRY_POINT)
                .map_err(|_| RuntimeLoadError::MissingEntryPoint)?
        };

        // SAFETY: Calling the descriptor query, which must be side-effect
        // free per the runtime contract.
        let descriptor = unsafe { entry_point() };
        if descriptor.is_null() {
            return Err(RuntimeLoadError::NullDescriptor);
        }

        // SAFETY: Dereferencing the descriptor pointer returned non-null.
        let desc = unsafe { &*descriptor };
        if desc.abi_version != MEDLEY_ABI_VERSION {
            return Err(RuntimeLoadError::AbiMismatch {
                expected: MEDLEY_ABI_VERSION,
                actual: desc.abi_version,
            });
        }

        // SAFETY: Validating before any other use of the descriptor.
        unsafe {
            desc.validate().map_err(RuntimeLoadError::InvalidDescriptor)?;
        }

        // SAFETY: Building the capability snapshot from the validated
        // descriptor.
        let caps = unsafe { desc.to_caps() };
        debug!(path = %path.display(), name = %caps.name, "loaded runtime library");

        Ok(LoadedRuntime {
            library: Arc::new(library),
            descriptor,
            caps,
        })
    }

    /// Scan one directory for runtime libraries and load each of them.
    ///
    /// # Safety
    ///
    /// See [`RuntimeLoader::load_from_path`] for safety requirements.
    pub unsafe fn load_all_from_dir(
        &self,
        dir: impl AsRef<Path>,
    ) -> Vec<std::result::Result<LoadedRuntime, RuntimeLoadError>> {
        let dir = dir.as_ref();
        let mut runtimes = Vec::new();

        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension() == Some(OsStr::new("so")) {
                    // SAFETY: Caller guarantees libraries in the search
                    // paths are trusted.
                    runtimes.push(unsafe { self.load_from_path(&path) });
                }
            }
        }

        runtimes
    }

    /// Probe every search path in order.
    ///
    /// # Safety
    ///
    /// See [`RuntimeLoader::load_from_path`] for safety requirements.
    pub unsafe fn discover(&self) -> Vec<std::result::Result<LoadedRuntime, RuntimeLoadError>> {
        let mut runtimes = Vec::new();
        for dir in &self.search_paths {
            // SAFETY: Same contract as load_all_from_dir.
            runtimes.extend(unsafe { self.load_all_from_dir(dir) });
        }
        runtimes
    }
}

impl Default for RuntimeLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_creation() {
        let loader = RuntimeLoader::new();
        assert!(!loader.search_paths.is_empty());
    }

    #[test]
    fn test_add_search_path() {
        let mut loader = RuntimeLoader::new();
        let initial = loader.search_paths.len();
        loader.add_search_path("/custom/path");
        assert_eq!(loader.search_paths.len(), initial + 1);
    }

    #[test]
    fn test_load_nonexistent_library() {
        let loader = RuntimeLoader::new();
        let result = unsafe { loader.load_from_path("/nonexistent/libmissing.so") };
        assert!(matches!(result, Err(RuntimeLoadError::LoadFailed(_))));
    }

    #[test]
    fn test_discover_empty_dirs_is_empty() {
        let loader = RuntimeLoader::with_search_paths(["/nonexistent/medley-runtime-dir"]);
        assert!(unsafe { loader.discover() }.is_empty());
    }
}
