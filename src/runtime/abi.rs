//! Runtime descriptor and entry-point table for the C-compatible ABI.
//!
//! A runtime shared library exports a single symbol:
//!
//! ```c
//! const RuntimeDescriptor* medley_runtime_descriptor();
//! ```
//!
//! The descriptor carries the candidate's declared capabilities (queried
//! without initializing the runtime) and the [`SessionTable`] of entry
//! points the dispatcher routes session calls through. The ABI surface is
//! kept minimal and C-compatible for maximum interoperability.

use crate::caps::{ApiVersion, DeviceIdent, RuntimeCaps, RuntimeKind};
use crate::property::PropertyValue;
use crate::runtime::RuntimeSession;
use std::ffi::{CStr, c_char, c_int, c_void};

/// Current ABI version. Runtimes must match this version to be loaded.
pub const MEDLEY_ABI_VERSION: u32 = 1;

/// Symbol name of the descriptor query entry point.
pub const ENTRY_POINT: &[u8] = b"medley_runtime_descriptor\0";

/// Sentinel for absent numeric device identity fields.
pub const NO_DEVICE_FIELD: i64 = -1;

// ============================================================================
// Entry-point table
// ============================================================================

/// Function pointer type for creating a session instance.
///
/// `num_threads` is 0 when the caller set no thread-count parameter.
///
/// # Safety
///
/// The returned pointer must be a valid boxed [`RuntimeSession`] created
/// with [`session_to_raw`], or null on failure.
pub type CreateSessionFn = unsafe extern "C" fn(num_threads: u16) -> *mut c_void;

/// Function pointer type for cloning a session instance.
///
/// # Safety
///
/// The argument must have been created by the corresponding
/// [`CreateSessionFn`]; the returned pointer follows the same contract.
pub type CloneSessionFn = unsafe extern "C" fn(session: *mut c_void) -> *mut c_void;

/// Function pointer type for destroying a session instance.
///
/// # Safety
///
/// The pointer must have been created by [`CreateSessionFn`] or
/// [`CloneSessionFn`] and must not be used afterwards.
pub type CloseSessionFn = unsafe extern "C" fn(session: *mut c_void);

/// Function pointer type for one opaque processing call.
///
/// Returns 0 on success, nonzero on runtime-reported failure.
///
/// # Safety
///
/// `payload` must point to `payload_len` valid bytes.
pub type ProcessFn =
    unsafe extern "C" fn(session: *mut c_void, opcode: u32, payload: *mut u8, payload_len: usize) -> c_int;

/// Entry-point table of a runtime implementation.
///
/// This struct is `#[repr(C)]` for C ABI compatibility. A null `clone`
/// declares that the runtime has no clonable session context.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SessionTable {
    /// Create a session instance.
    pub create: CreateSessionFn,
    /// Clone a session instance, or `None` if unsupported.
    pub clone: Option<CloneSessionFn>,
    /// Destroy a session instance.
    pub close: CloseSessionFn,
    /// Opaque processing entry point, or `None` for descriptor-only
    /// runtimes.
    pub process: Option<ProcessFn>,
}

// ============================================================================
// Extension properties
// ============================================================================

/// Value kind discriminants for [`ExtensionProperty`].
pub mod ext_kind {
    /// 16-bit unsigned integer in `value_num`.
    pub const U16: i32 = 0;
    /// 32-bit unsigned integer in `value_num`.
    pub const U32: i32 = 1;
    /// Null-terminated string in `value_str`.
    pub const STR: i32 = 2;
    /// Pointer-sized handle in `value_num`.
    pub const PTR: i32 = 3;
}

/// One declared extension property of a runtime.
///
/// This struct is `#[repr(C)]` for C ABI compatibility.
#[repr(C)]
pub struct ExtensionProperty {
    /// Null-terminated dot-separated property path.
    pub path: *const c_char,
    /// Value kind (see [`ext_kind`]).
    pub kind: c_int,
    /// Numeric value for `U16`/`U32`/`PTR` kinds.
    pub value_num: u64,
    /// String value for the `STR` kind (null otherwise).
    pub value_str: *const c_char,
}

// SAFETY: ExtensionProperty contains only raw pointers to static data,
// which are inherently Send + Sync.
unsafe impl Send for ExtensionProperty {}
unsafe impl Sync for ExtensionProperty {}

impl ExtensionProperty {
    /// Decode into a typed property value.
    ///
    /// # Safety
    ///
    /// `path` must be valid and null-terminated; for the `STR` kind,
    /// `value_str` must be as well.
    pub unsafe fn decode(&self) -> Option<(String, PropertyValue)> {
        // SAFETY: Caller guarantees `path` is valid and null-terminated.
        let path = unsafe { CStr::from_ptr(self.path) }.to_str().ok()?;
        let value = match self.kind {
            ext_kind::U16 => PropertyValue::U16(self.value_num as u16),
            ext_kind::U32 => PropertyValue::U32(self.value_num as u32),
            ext_kind::PTR => PropertyValue::Ptr(self.value_num as usize),
            ext_kind::STR => {
                if self.value_str.is_null() {
                    return None;
                }
                // SAFETY: Caller guarantees `value_str` is valid for STR.
                let s = unsafe { CStr::from_ptr(self.value_str) }.to_str().ok()?;
                PropertyValue::Str(s.to_string())
            }
            _ => return None,
        };
        Some((path.to_string(), value))
    }
}

// ============================================================================
// Runtime descriptor
// ============================================================================

/// Descriptor returned by `medley_runtime_descriptor()`.
///
/// This struct is `#[repr(C)]` for C ABI compatibility. Absent numeric
/// device fields carry [`NO_DEVICE_FIELD`].
#[repr(C)]
pub struct RuntimeDescriptor {
    /// ABI version - must match [`MEDLEY_ABI_VERSION`].
    pub abi_version: u32,
    /// Null-terminated implementation name.
    pub name: *const c_char,
    /// Implementation kind: 0 = Stub, 1 = Software, 2 = Hardware.
    pub kind: c_int,
    /// Reported API major version.
    pub api_major: u16,
    /// Reported API minor version.
    pub api_minor: u16,
    /// PCI vendor id, or [`NO_DEVICE_FIELD`].
    pub vendor_id: i64,
    /// PCI device id, or [`NO_DEVICE_FIELD`].
    pub device_id: i64,
    /// Windows LUID device node mask, or [`NO_DEVICE_FIELD`].
    pub luid_node_mask: i64,
    /// Linux DRM render node number, or [`NO_DEVICE_FIELD`].
    pub drm_render_node: i64,
    /// Linux DRM primary node number, or [`NO_DEVICE_FIELD`].
    pub drm_primary_node: i64,
    /// Number of entries in `extensions`.
    pub num_extensions: u32,
    /// Array of declared extension properties (may be null when empty).
    pub extensions: *const ExtensionProperty,
    /// Session entry-point table.
    pub table: SessionTable,
}

// SAFETY: RuntimeDescriptor contains only raw pointers to static data
// and function pointers, which are inherently Send + Sync.
unsafe impl Send for RuntimeDescriptor {}
unsafe impl Sync for RuntimeDescriptor {}

impl RuntimeDescriptor {
    /// Get the implementation name as a Rust string.
    ///
    /// # Safety
    ///
    /// The `name` pointer must be valid and null-terminated.
    pub unsafe fn name_str(&self) -> &str {
        // SAFETY: Caller guarantees `name` is valid and null-terminated.
        unsafe { CStr::from_ptr(self.name).to_str().unwrap_or("unknown") }
    }

    /// Get the slice of extension properties.
    ///
    /// # Safety
    ///
    /// The `extensions` pointer must be valid and point to
    /// `num_extensions` items.
    pub unsafe fn extensions(&self) -> &[ExtensionProperty] {
        if self.extensions.is_null() || self.num_extensions == 0 {
            &[]
        } else {
            // SAFETY: Caller guarantees `extensions` points to a valid array.
            unsafe { std::slice::from_raw_parts(self.extensions, self.num_extensions as usize) }
        }
    }

    /// Validate that this descriptor is safe to use.
    ///
    /// # Safety
    ///
    /// All pointer fields must be valid.
    pub unsafe fn validate(&self) -> Result<(), &'static str> {
        if self.abi_version != MEDLEY_ABI_VERSION {
            return Err("ABI version mismatch");
        }
        if self.name.is_null() {
            return Err("runtime name is null");
        }
        if RuntimeKind::from_raw(self.kind as u32).is_none() {
            return Err("implementation kind out of range");
        }
        // SAFETY: We're in an unsafe fn, caller guarantees validity.
        for ext in unsafe { self.extensions() } {
            if ext.path.is_null() {
                return Err("extension property path is null");
            }
            if !(ext_kind::U16..=ext_kind::PTR).contains(&ext.kind) {
                return Err("extension property kind out of range");
            }
        }
        Ok(())
    }

    /// Build the safe capability snapshot from a validated descriptor.
    ///
    /// # Safety
    ///
    /// The descriptor must have passed [`RuntimeDescriptor::validate`]
    /// and all its pointers must remain valid.
    pub unsafe fn to_caps(&self) -> RuntimeCaps {
        fn opt_u16(raw: i64) -> Option<u16> {
            u16::try_from(raw).ok()
        }
        fn opt_u32(raw: i64) -> Option<u32> {
            u32::try_from(raw).ok()
        }

        // SAFETY: Caller guarantees the descriptor is validated.
        let name = unsafe { self.name_str() }.to_string();
        // SAFETY: Validation checked every extension entry.
        let extensions = unsafe { self.extensions() }
            .iter()
            .filter_map(|ext| unsafe { ext.decode() })
            .collect();

        RuntimeCaps {
            name,
            kind: RuntimeKind::from_raw(self.kind as u32).unwrap_or(RuntimeKind::Stub),
            api_version: ApiVersion::new(self.api_major, self.api_minor),
            device: DeviceIdent {
                vendor_id: opt_u16(self.vendor_id),
                device_id: opt_u16(self.device_id),
                luid_node_mask: opt_u32(self.luid_node_mask),
                drm_render_node: opt_u32(self.drm_render_node),
                drm_primary_node: opt_u32(self.drm_primary_node),
            },
            extensions,
        }
    }
}

// ============================================================================
// Boxed-session helpers for Rust-authored runtimes
// ============================================================================

/// Convert a boxed session to a raw pointer for the C ABI.
///
/// This is used by runtimes to return sessions from their create and
/// clone entry points.
pub fn session_to_raw(session: Box<dyn RuntimeSession>) -> *mut c_void {
    // Double-box so the fat trait-object pointer fits a thin c_void.
    let boxed: Box<Box<dyn RuntimeSession>> = Box::new(session);
    Box::into_raw(boxed) as *mut c_void
}

/// Convert a raw pointer back to a boxed session.
///
/// # Safety
///
/// The pointer must have been created by [`session_to_raw`].
pub unsafe fn session_from_raw(ptr: *mut c_void) -> Box<dyn RuntimeSession> {
    // SAFETY: Caller guarantees ptr was created by session_to_raw.
    let boxed: Box<Box<dyn RuntimeSession>> =
        unsafe { Box::from_raw(ptr as *mut Box<dyn RuntimeSession>) };
    *boxed
}

/// Borrow the session behind a raw pointer without taking ownership.
///
/// # Safety
///
/// The pointer must have been created by [`session_to_raw`] and must not
/// be closed for the duration of the borrow.
pub unsafe fn session_from_raw_ref<'a>(ptr: *mut c_void) -> &'a mut Box<dyn RuntimeSession> {
    // SAFETY: Caller guarantees ptr was created by session_to_raw and is live.
    unsafe { &mut *(ptr as *mut Box<dyn RuntimeSession>) }
}

/// Helper macro for defining a runtime descriptor in Rust.
///
/// Expands to the statics, entry-point shims, and the exported
/// `medley_runtime_descriptor` symbol. Device identity fields use `-1`
/// for "not declared". Runtimes with extension properties or multiple
/// descriptors can write the [`RuntimeDescriptor`] by hand instead.
///
/// # Example
///
/// ```ignore
/// use medley::define_runtime;
/// use medley::runtime::{RuntimeSession, SessionParams};
///
/// struct SoftSession;
///
/// impl RuntimeSession for SoftSession {
///     // ...
/// }
///
/// define_runtime! {
///     name: "softrt",
///     kind: 1, // 0=Stub, 1=Software, 2=Hardware
///     api_version: (2, 1),
///     vendor_id: -1,
///     device_id: -1,
///     luid_node_mask: -1,
///     drm_render_node: -1,
///     drm_primary_node: -1,
///     clonable: false,
///     create: |_params| Box::new(SoftSession),
/// }
/// ```
#[macro_export]
macro_rules! define_runtime {
    (
        name: $name:literal,
        kind: $kind:expr,
        api_version: ($major:expr, $minor:expr),
        vendor_id: $vendor:expr,
        device_id: $device:expr,
        luid_node_mask: $luid:expr,
        drm_render_node: $render:expr,
        drm_primary_node: $primary:expr,
        clonable: $clonable:literal,
        create: $create:expr $(,)?
    ) => {
        paste::paste! {
            static [<RUNTIME_NAME_ $name:upper>]: &[u8] = concat!($name, "\0").as_bytes();

            unsafe extern "C" fn [<create_ $name>](num_threads: u16) -> *mut std::ffi::c_void {
                let creator: fn(
                    &$crate::runtime::SessionParams,
                ) -> Box<dyn $crate::runtime::RuntimeSession> = $create;
                let params = $crate::runtime::SessionParams {
                    num_threads: (num_threads != 0).then_some(num_threads),
                };
                $crate::runtime::abi::session_to_raw(creator(&params))
            }

            unsafe extern "C" fn [<clone_ $name>](
                session: *mut std::ffi::c_void,
            ) -> *mut std::ffi::c_void {
                // SAFETY: The dispatcher only passes pointers produced by the
                // create/clone shims above.
                let session = unsafe { $crate::runtime::abi::session_from_raw_ref(session) };
                match session.clone_session() {
                    Ok(child) => $crate::runtime::abi::session_to_raw(child),
                    Err(_) => std::ptr::null_mut(),
                }
            }

            unsafe extern "C" fn [<close_ $name>](session: *mut std::ffi::c_void) {
                // SAFETY: The dispatcher passes each session pointer here
                // exactly once, after its last use.
                drop(unsafe { $crate::runtime::abi::session_from_raw(session) });
            }

            unsafe extern "C" fn [<process_ $name>](
                session: *mut std::ffi::c_void,
                opcode: u32,
                payload: *mut u8,
                payload_len: usize,
            ) -> std::ffi::c_int {
                // SAFETY: The dispatcher guarantees a live session pointer and
                // a valid payload range.
                let session = unsafe { $crate::runtime::abi::session_from_raw_ref(session) };
                let payload = if payload.is_null() {
                    &mut []
                } else {
                    unsafe { std::slice::from_raw_parts_mut(payload, payload_len) }
                };
                match session.process(opcode, payload) {
                    Ok(()) => 0,
                    Err(_) => -1,
                }
            }

            static RUNTIME_DESCRIPTOR: $crate::runtime::RuntimeDescriptor =
                $crate::runtime::RuntimeDescriptor {
                    abi_version: $crate::runtime::MEDLEY_ABI_VERSION,
                    name: [<RUNTIME_NAME_ $name:upper>].as_ptr() as *const std::ffi::c_char,
                    kind: $kind,
                    api_major: $major,
                    api_minor: $minor,
                    vendor_id: $vendor,
                    device_id: $device,
                    luid_node_mask: $luid,
                    drm_render_node: $render,
                    drm_primary_node: $primary,
                    num_extensions: 0,
                    extensions: std::ptr::null(),
                    table: $crate::runtime::SessionTable {
                        create: [<create_ $name>],
                        clone: if $clonable { Some([<clone_ $name>]) } else { None },
                        close: [<close_ $name>],
                        process: Some([<process_ $name>]),
                    },
                };

            /// Runtime descriptor entry point.
            #[unsafe(no_mangle)]
            pub extern "C" fn medley_runtime_descriptor()
            -> *const $crate::runtime::RuntimeDescriptor {
                &RUNTIME_DESCRIPTOR
            }
        }
    };
}
