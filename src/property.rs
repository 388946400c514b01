//! Typed filter properties and the loader's filter tree.
//!
//! A caller constrains runtime selection by attaching property filters to
//! a [`Loader`](crate::loader::Loader). Each filter is a (path, typed
//! value) pair; paths are dot-separated hierarchical strings such as
//! `implDescription.ApiVersion.Major` or `extendedDeviceId.VendorID`.
//!
//! # Design Principles
//!
//! - **Closed value set**: property values are one of a small set of
//!   primitive kinds ([`PropertyValue`]), no runtime reflection.
//! - **Static classification**: every known path is classified once in a
//!   static table ([`PathClass`]); the selector dispatches comparators by
//!   class, never by introspecting value types.
//! - **Deferred validation**: [`FilterTree::set`] performs structural
//!   checks only. Value kinds and categorical validity are checked by
//!   [`FilterTree::validate`] at session-creation time, so a bad
//!   configuration surfaces as `Unsupported` and is never misreported as
//!   `NotFound`.

use crate::error::{Error, Result};
use smallvec::SmallVec;

// ============================================================================
// Well-known property paths
// ============================================================================

/// Well-known filter property paths understood by the matching engine.
pub mod paths {
    /// Implementation kind (stub, software, hardware). Exact match.
    pub const IMPL_KIND: &str = "implDescription.Impl";
    /// API version major. Minimum-satisfies match together with
    /// [`API_VERSION_MINOR`].
    pub const API_VERSION_MAJOR: &str = "implDescription.ApiVersion.Major";
    /// API version minor. Minimum-satisfies match together with
    /// [`API_VERSION_MAJOR`].
    pub const API_VERSION_MINOR: &str = "implDescription.ApiVersion.Minor";
    /// PCI vendor identifier. Exact match; absent on the candidate means
    /// non-match.
    pub const VENDOR_ID: &str = "extendedDeviceId.VendorID";
    /// PCI device identifier. Exact match.
    pub const DEVICE_ID: &str = "extendedDeviceId.DeviceID";
    /// Windows LUID device node mask. Exact match.
    pub const LUID_NODE_MASK: &str = "extendedDeviceId.LUIDDeviceNodeMask";
    /// Linux DRM render node number (e.g. 128 for renderD128). Exact match.
    pub const DRM_RENDER_NODE: &str = "extendedDeviceId.DRMRenderNodeNum";
    /// Linux DRM primary node number (e.g. 0 for card0). Exact match.
    pub const DRM_PRIMARY_NODE: &str = "extendedDeviceId.DRMPrimaryNodeNum";
    /// Requested session thread count. Session parameter: validated and
    /// forwarded to the runtime at create time, not matched against
    /// candidates.
    pub const NUM_THREAD: &str = "session.NumThread";
}

/// Path roots owned by the matching engine. An unrecognized path under
/// one of these roots is a configuration error rather than an extension
/// property.
const RESERVED_ROOTS: &[&str] = &["implDescription.", "extendedDeviceId.", "session."];

// ============================================================================
// Property values
// ============================================================================

/// Kind discriminant for [`PropertyValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit unsigned integer.
    U32,
    /// UTF-8 string.
    Str,
    /// Pointer-sized opaque handle.
    Ptr,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::Str => "string",
            Self::Ptr => "handle",
        };
        f.write_str(name)
    }
}

/// A typed filter property value.
///
/// The set of kinds is closed; comparison semantics are decided by the
/// path the value is attached to, not by the value itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    /// 16-bit unsigned integer.
    U16(u16),
    /// 32-bit unsigned integer.
    U32(u32),
    /// UTF-8 string.
    Str(String),
    /// Pointer-sized opaque handle.
    Ptr(usize),
}

impl PropertyValue {
    /// The kind discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::U16(_) => ValueKind::U16,
            Self::U32(_) => ValueKind::U32,
            Self::Str(_) => ValueKind::Str,
            Self::Ptr(_) => ValueKind::Ptr,
        }
    }

    /// Widen an integer value to u32, if it is one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U16(v) => Some(u32::from(*v)),
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as u16, if it is one.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

// ============================================================================
// Path classification
// ============================================================================

/// Device identity field addressed by a device path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceField {
    /// PCI vendor id.
    VendorId,
    /// PCI device id.
    DeviceId,
    /// Windows LUID node mask.
    LuidNodeMask,
    /// Linux DRM render node number.
    DrmRenderNode,
    /// Linux DRM primary node number.
    DrmPrimaryNode,
}

/// Comparator class of a property path.
///
/// The selector dispatches on this: a small closed set of comparison
/// policies rather than per-path code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathClass {
    /// Implementation kind: exact equality against the candidate's kind.
    Kind,
    /// API version major: minimum-satisfies on the (major, minor) pair.
    VersionMajor,
    /// API version minor: minimum-satisfies on the (major, minor) pair.
    VersionMinor,
    /// Device identity: exact equality; absence on the candidate is a
    /// non-match.
    Device(DeviceField),
    /// Session creation parameter: validated, forwarded to the runtime,
    /// never matched.
    SessionParam,
}

/// Static table of known paths: path, expected value kind, comparator
/// class.
const KNOWN_PATHS: &[(&str, ValueKind, PathClass)] = &[
    (paths::IMPL_KIND, ValueKind::U32, PathClass::Kind),
    (paths::API_VERSION_MAJOR, ValueKind::U16, PathClass::VersionMajor),
    (paths::API_VERSION_MINOR, ValueKind::U16, PathClass::VersionMinor),
    (paths::VENDOR_ID, ValueKind::U16, PathClass::Device(DeviceField::VendorId)),
    (paths::DEVICE_ID, ValueKind::U16, PathClass::Device(DeviceField::DeviceId)),
    (paths::LUID_NODE_MASK, ValueKind::U32, PathClass::Device(DeviceField::LuidNodeMask)),
    (paths::DRM_RENDER_NODE, ValueKind::U32, PathClass::Device(DeviceField::DrmRenderNode)),
    (paths::DRM_PRIMARY_NODE, ValueKind::U32, PathClass::Device(DeviceField::DrmPrimaryNode)),
    (paths::NUM_THREAD, ValueKind::U16, PathClass::SessionParam),
];

/// Result of classifying a property path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// A path from the known table, with its expected kind and class.
    Known(ValueKind, PathClass),
    /// A well-formed path outside the reserved roots: open-ended
    /// extension property.
    Extension,
    /// A path under a reserved root that the matching engine does not
    /// know. Configuration error.
    Unknown,
}

/// Classify a property path.
///
/// Assumes the path already passed the structural checks of
/// [`FilterTree::set`].
pub fn classify(path: &str) -> Classification {
    for (known, kind, class) in KNOWN_PATHS {
        if *known == path {
            return Classification::Known(*kind, *class);
        }
    }
    if RESERVED_ROOTS.iter().any(|root| path.starts_with(root)) {
        return Classification::Unknown;
    }
    Classification::Extension
}

/// Structural path check: non-empty, dot-separated, no empty segments.
fn check_path_syntax(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::unsupported("empty property path"));
    }
    if path.split('.').any(str::is_empty) {
        return Err(Error::unsupported(format!(
            "malformed property path '{path}': empty segment"
        )));
    }
    Ok(())
}

// ============================================================================
// Filter tree
// ============================================================================

/// One (path, value) matching constraint in a loader's configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterNode {
    /// Dot-separated hierarchical property path.
    pub path: String,
    /// Expected value at that path.
    pub value: PropertyValue,
}

/// The set of filter constraints owned by a loader.
///
/// Insertion order is irrelevant to matching but preserved for
/// diagnostics. Setting a path twice replaces the earlier node in place.
/// Unset paths impose no constraint (absence is a wildcard).
#[derive(Clone, Debug, Default)]
pub struct FilterTree {
    nodes: SmallVec<[FilterNode; 8]>,
}

impl FilterTree {
    /// Create an empty filter tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a filter property.
    ///
    /// Only structural validation happens here; value kinds and
    /// categorical validity are checked when a session is created (see
    /// [`FilterTree::validate`]).
    pub fn set(&mut self, path: impl Into<String>, value: impl Into<PropertyValue>) -> Result<()> {
        let path = path.into();
        check_path_syntax(&path)?;
        let value = value.into();
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.path == path) {
            existing.value = value;
        } else {
            self.nodes.push(FilterNode { path, value });
        }
        Ok(())
    }

    /// The constraint value set for `path`, if any.
    pub fn get(&self, path: &str) -> Option<&PropertyValue> {
        self.nodes.iter().find(|n| n.path == path).map(|n| &n.value)
    }

    /// Iterate nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FilterNode> {
        self.nodes.iter()
    }

    /// Number of constraints.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no constraints are set.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deferred configuration validation.
    ///
    /// Checks every node against the known-path table: unknown reserved
    /// paths, value kind mismatches, and categorically invalid values all
    /// fail with [`Error::Unsupported`]. Runs before selection so that a
    /// configuration error is never reported as `NotFound`.
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            match classify(&node.path) {
                Classification::Unknown => {
                    return Err(Error::unsupported(format!(
                        "unknown property path '{}'",
                        node.path
                    )));
                }
                Classification::Extension => {}
                Classification::Known(expected, class) => {
                    if node.value.kind() != expected {
                        return Err(Error::unsupported(format!(
                            "property '{}' expects {} value, got {}",
                            node.path,
                            expected,
                            node.value.kind()
                        )));
                    }
                    if class == PathClass::Kind {
                        // Kind values come from a small enumerated range.
                        let raw = node.value.as_u32().unwrap_or(u32::MAX);
                        if crate::caps::RuntimeKind::from_raw(raw).is_none() {
                            return Err(Error::unsupported(format!(
                                "property '{}' has out-of-range kind value {raw}",
                                node.path
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kinds() {
        assert_eq!(PropertyValue::U16(1).kind(), ValueKind::U16);
        assert_eq!(PropertyValue::U32(1).kind(), ValueKind::U32);
        assert_eq!(PropertyValue::from("x").kind(), ValueKind::Str);
        assert_eq!(PropertyValue::Ptr(0).kind(), ValueKind::Ptr);
    }

    #[test]
    fn test_classify_known_paths() {
        assert_eq!(
            classify(paths::API_VERSION_MAJOR),
            Classification::Known(ValueKind::U16, PathClass::VersionMajor)
        );
        assert_eq!(
            classify(paths::DRM_RENDER_NODE),
            Classification::Known(ValueKind::U32, PathClass::Device(DeviceField::DrmRenderNode))
        );
        assert_eq!(
            classify(paths::NUM_THREAD),
            Classification::Known(ValueKind::U16, PathClass::SessionParam)
        );
    }

    #[test]
    fn test_classify_reserved_vs_extension() {
        // Typo under a reserved root is unknown, not an extension.
        assert_eq!(classify("implDescription.ApiVersion.Patch"), Classification::Unknown);
        // Paths outside reserved roots are open-ended extensions.
        assert_eq!(classify("vendorExt.Feature.Level"), Classification::Extension);
    }

    #[test]
    fn test_set_rejects_malformed_paths() {
        let mut tree = FilterTree::new();
        assert!(matches!(tree.set("", 1u16), Err(Error::Unsupported(_))));
        assert!(matches!(tree.set("a..b", 1u16), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut tree = FilterTree::new();
        tree.set(paths::VENDOR_ID, 0x8086u16).unwrap();
        tree.set(paths::DRM_RENDER_NODE, 128u32).unwrap();
        tree.set(paths::VENDOR_ID, 0x1002u16).unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(paths::VENDOR_ID), Some(&PropertyValue::U16(0x1002)));
        // Insertion order preserved after replacement.
        let order: Vec<&str> = tree.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(order, vec![paths::VENDOR_ID, paths::DRM_RENDER_NODE]);
    }

    #[test]
    fn test_validate_defers_kind_mismatch() {
        let mut tree = FilterTree::new();
        // Wrong value kind is accepted at set time...
        tree.set(paths::NUM_THREAD, 4u32).unwrap();
        // ...and rejected at validation time.
        assert!(matches!(tree.validate(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_reserved_path() {
        let mut tree = FilterTree::new();
        tree.set("session.NumThreads", 4u16).unwrap();
        assert!(matches!(tree.validate(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_kind() {
        let mut tree = FilterTree::new();
        tree.set(paths::IMPL_KIND, 99u32).unwrap();
        assert!(matches!(tree.validate(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_validate_accepts_well_formed_tree() {
        let mut tree = FilterTree::new();
        tree.set(paths::IMPL_KIND, crate::caps::RuntimeKind::Hardware as u32).unwrap();
        tree.set(paths::API_VERSION_MAJOR, 2u16).unwrap();
        tree.set(paths::NUM_THREAD, 4u16).unwrap();
        tree.set("vendorExt.Feature.Level", 3u32).unwrap();
        assert!(tree.validate().is_ok());
    }
}
