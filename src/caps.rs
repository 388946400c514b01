//! Runtime capability descriptors.
//!
//! A [`RuntimeCaps`] is the read-only snapshot of one candidate
//! implementation's declared properties: its kind, API version, device
//! identity, and an open-ended list of extension properties. The registry
//! produces one per candidate during enumeration; the selector matches
//! filter trees against them. Descriptors are immutable and discarded
//! with the registry snapshot.

use crate::property::{DeviceField, PropertyValue};

/// Implementation kind of a runtime candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum RuntimeKind {
    /// Built-in no-hardware-required stub.
    Stub = 0,
    /// Software (CPU) runtime.
    Software = 1,
    /// Hardware-accelerated runtime.
    Hardware = 2,
}

impl RuntimeKind {
    /// Decode a raw kind value; `None` if out of range.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Stub),
            1 => Some(Self::Software),
            2 => Some(Self::Hardware),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stub => "stub",
            Self::Software => "software",
            Self::Hardware => "hardware",
        };
        f.write_str(name)
    }
}

/// API version reported by a runtime.
///
/// Ordering is lexicographic on (major, minor), which is exactly the
/// minimum-satisfies comparison the selector needs: a filter requesting
/// 2.0 rejects a 1.x runtime, a filter requesting 1.0 accepts it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
}

impl ApiVersion {
    /// Create a version.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Device identity of a runtime candidate.
///
/// All fields are optional: the stub and most software runtimes report
/// none. A device filter against an absent field is a non-match, which is
/// what excludes such candidates from device-constrained selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceIdent {
    /// PCI vendor id.
    pub vendor_id: Option<u16>,
    /// PCI device id.
    pub device_id: Option<u16>,
    /// Windows LUID device node mask.
    pub luid_node_mask: Option<u32>,
    /// Linux DRM render node number (renderD<n>).
    pub drm_render_node: Option<u32>,
    /// Linux DRM primary node number (card<n>).
    pub drm_primary_node: Option<u32>,
}

impl DeviceIdent {
    /// The declared value of one identity field, widened to u32.
    pub fn field(&self, field: DeviceField) -> Option<u32> {
        match field {
            DeviceField::VendorId => self.vendor_id.map(u32::from),
            DeviceField::DeviceId => self.device_id.map(u32::from),
            DeviceField::LuidNodeMask => self.luid_node_mask,
            DeviceField::DrmRenderNode => self.drm_render_node,
            DeviceField::DrmPrimaryNode => self.drm_primary_node,
        }
    }
}

/// Declared static properties of one runtime candidate.
#[derive(Clone, Debug)]
pub struct RuntimeCaps {
    /// Human-readable implementation name.
    pub name: String,
    /// Implementation kind.
    pub kind: RuntimeKind,
    /// Reported API version.
    pub api_version: ApiVersion,
    /// Device identity, if any.
    pub device: DeviceIdent,
    /// Open-ended extension properties, in declaration order.
    pub extensions: Vec<(String, PropertyValue)>,
}

impl RuntimeCaps {
    /// Create a descriptor with no device identity and no extensions.
    pub fn new(name: impl Into<String>, kind: RuntimeKind, api_version: ApiVersion) -> Self {
        Self {
            name: name.into(),
            kind,
            api_version,
            device: DeviceIdent::default(),
            extensions: Vec::new(),
        }
    }

    /// Look up an extension property by path.
    pub fn extension(&self, path: &str) -> Option<&PropertyValue> {
        self.extensions
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v)
    }
}
