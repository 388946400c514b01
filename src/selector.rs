//! Filter matching and ordered candidate selection.
//!
//! The selector is a pure function from (capability descriptor, filter
//! tree) to a match decision, plus the enumeration step that reduces a
//! registry snapshot to the ordered sub-sequence of matching candidates.
//! `create_session`'s index parameter indexes into that sub-sequence,
//! never into the raw snapshot.
//!
//! Comparison policy is dispatched by [`PathClass`], a small closed set:
//!
//! - implementation kind: exact equality;
//! - version paths: minimum-satisfies, lexicographic on (major, minor);
//! - device identity: exact equality, absence on the candidate is a
//!   non-match;
//! - extension paths: exact equality on the raw typed value;
//! - session parameters: no constraint.
//!
//! Unset properties impose no constraint, so adding a filter node can
//! only shrink the matching set (matching is monotonic).

use crate::caps::{ApiVersion, RuntimeCaps};
use crate::property::{Classification, FilterTree, PathClass, classify};
use tracing::trace;

/// Check whether one candidate's declared capabilities satisfy every
/// constraint in the filter tree.
///
/// Assumes the tree passed [`FilterTree::validate`]; an unknown path is
/// treated as a non-match here (validation reports it as `Unsupported`
/// before selection ever runs).
pub fn matches(caps: &RuntimeCaps, tree: &FilterTree) -> bool {
    // Version constraints combine into a single (major, minor) minimum;
    // an absent half defaults to zero.
    let mut req_major: Option<u16> = None;
    let mut req_minor: Option<u16> = None;

    for node in tree.iter() {
        let ok = match classify(&node.path) {
            Classification::Known(_, PathClass::Kind) => {
                node.value.as_u32() == Some(caps.kind as u32)
            }
            Classification::Known(_, PathClass::VersionMajor) => {
                req_major = node.value.as_u16();
                true
            }
            Classification::Known(_, PathClass::VersionMinor) => {
                req_minor = node.value.as_u16();
                true
            }
            Classification::Known(_, PathClass::Device(field)) => {
                match caps.device.field(field) {
                    Some(declared) => node.value.as_u32() == Some(declared),
                    None => false,
                }
            }
            Classification::Known(_, PathClass::SessionParam) => true,
            Classification::Extension => {
                caps.extension(&node.path) == Some(&node.value)
            }
            Classification::Unknown => false,
        };
        if !ok {
            trace!(candidate = %caps.name, path = %node.path, "filter node rejected candidate");
            return false;
        }
    }

    if req_major.is_some() || req_minor.is_some() {
        let requested = ApiVersion::new(req_major.unwrap_or(0), req_minor.unwrap_or(0));
        if caps.api_version < requested {
            trace!(
                candidate = %caps.name,
                declared = %caps.api_version,
                requested = %requested,
                "version below requested minimum"
            );
            return false;
        }
    }

    true
}

/// Reduce a snapshot to the indices of matching candidates, preserving
/// snapshot order.
pub fn select<'a>(
    snapshot: impl IntoIterator<Item = &'a RuntimeCaps>,
    tree: &FilterTree,
) -> Vec<usize> {
    snapshot
        .into_iter()
        .enumerate()
        .filter(|(_, caps)| matches(caps, tree))
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{DeviceIdent, RuntimeKind};
    use crate::property::{PropertyValue, paths};

    fn stub() -> RuntimeCaps {
        RuntimeCaps::new("stub", RuntimeKind::Stub, ApiVersion::new(2, 1))
    }

    fn hw(name: &str, version: ApiVersion) -> RuntimeCaps {
        let mut caps = RuntimeCaps::new(name, RuntimeKind::Hardware, version);
        caps.device = DeviceIdent {
            vendor_id: Some(0x8086),
            device_id: Some(0x4c8a),
            luid_node_mask: Some(1),
            drm_render_node: Some(128),
            drm_primary_node: Some(0),
        };
        caps
    }

    #[test]
    fn test_empty_tree_matches_everything() {
        let tree = FilterTree::new();
        assert!(matches(&stub(), &tree));
        assert!(matches(&hw("gpu", ApiVersion::new(1, 3)), &tree));
    }

    #[test]
    fn test_kind_is_exact() {
        let mut tree = FilterTree::new();
        tree.set(paths::IMPL_KIND, RuntimeKind::Hardware as u32).unwrap();
        assert!(matches(&hw("gpu", ApiVersion::new(2, 0)), &tree));
        assert!(!matches(&stub(), &tree));
    }

    #[test]
    fn test_version_minimum_satisfies() {
        let legacy = hw("legacy", ApiVersion::new(1, 3));
        let current = hw("current", ApiVersion::new(2, 1));

        let mut want_2_0 = FilterTree::new();
        want_2_0.set(paths::API_VERSION_MAJOR, 2u16).unwrap();
        want_2_0.set(paths::API_VERSION_MINOR, 0u16).unwrap();
        assert!(!matches(&legacy, &want_2_0));
        assert!(matches(&current, &want_2_0));

        // Requesting 1.0 accepts both: minimum, not exact.
        let mut want_1_0 = FilterTree::new();
        want_1_0.set(paths::API_VERSION_MAJOR, 1u16).unwrap();
        want_1_0.set(paths::API_VERSION_MINOR, 0u16).unwrap();
        assert!(matches(&legacy, &want_1_0));
        assert!(matches(&current, &want_1_0));
    }

    #[test]
    fn test_major_alone_implies_minor_zero() {
        let mut tree = FilterTree::new();
        tree.set(paths::API_VERSION_MAJOR, 2u16).unwrap();
        assert!(matches(&hw("gpu", ApiVersion::new(2, 0)), &tree));
        assert!(!matches(&hw("legacy", ApiVersion::new(1, 9)), &tree));
    }

    #[test]
    fn test_device_identity_is_exact() {
        let gpu = hw("gpu", ApiVersion::new(2, 1));

        let mut tree = FilterTree::new();
        tree.set(paths::VENDOR_ID, 0x8086u16).unwrap();
        tree.set(paths::DRM_RENDER_NODE, 128u32).unwrap();
        tree.set(paths::DRM_PRIMARY_NODE, 0u32).unwrap();
        assert!(matches(&gpu, &tree));

        tree.set(paths::DRM_RENDER_NODE, 999u32).unwrap();
        assert!(!matches(&gpu, &tree));
    }

    #[test]
    fn test_absent_device_field_is_non_match() {
        let mut tree = FilterTree::new();
        tree.set(paths::VENDOR_ID, 0x8086u16).unwrap();
        // The stub declares no device identity at all.
        assert!(!matches(&stub(), &tree));
    }

    #[test]
    fn test_extension_exact_match() {
        let mut caps = hw("gpu", ApiVersion::new(2, 1));
        caps.extensions
            .push(("vendorExt.Feature.Level".into(), PropertyValue::U32(3)));

        let mut tree = FilterTree::new();
        tree.set("vendorExt.Feature.Level", 3u32).unwrap();
        assert!(matches(&caps, &tree));

        tree.set("vendorExt.Feature.Level", 4u32).unwrap();
        assert!(!matches(&caps, &tree));

        // Extension path the candidate never declared: non-match.
        let mut other = FilterTree::new();
        other.set("vendorExt.Missing", 1u32).unwrap();
        assert!(!matches(&caps, &other));
    }

    #[test]
    fn test_session_params_impose_no_constraint() {
        let mut tree = FilterTree::new();
        tree.set(paths::NUM_THREAD, 4u16).unwrap();
        assert!(matches(&stub(), &tree));
    }

    #[test]
    fn test_select_preserves_order() {
        let snapshot = vec![
            stub(),
            hw("gpu0", ApiVersion::new(2, 1)),
            hw("gpu1", ApiVersion::new(1, 3)),
        ];
        let mut tree = FilterTree::new();
        tree.set(paths::IMPL_KIND, RuntimeKind::Hardware as u32).unwrap();
        assert_eq!(select(snapshot.iter(), &tree), vec![1, 2]);
    }

    #[test]
    fn test_matching_is_monotonic() {
        let snapshot = vec![
            stub(),
            hw("gpu0", ApiVersion::new(2, 1)),
            hw("gpu1", ApiVersion::new(1, 3)),
        ];

        let mut tree = FilterTree::new();
        let mut prev = select(snapshot.iter(), &tree).len();
        let constraints: Vec<(&str, PropertyValue)> = vec![
            (paths::IMPL_KIND, PropertyValue::U32(RuntimeKind::Hardware as u32)),
            (paths::API_VERSION_MAJOR, PropertyValue::U16(2)),
            (paths::VENDOR_ID, PropertyValue::U16(0x1002)),
        ];
        for (path, value) in constraints {
            tree.set(path, value).unwrap();
            let now = select(snapshot.iter(), &tree).len();
            assert!(now <= prev, "adding a node grew the match set");
            prev = now;
        }
    }
}
