//! Device registry
//!
//! Tracks every endpoint the platform layer has reported. Records are never
//! deleted: a removed device is only marked disconnected, so bindings that
//! name it keep their meaning and match again when it comes back.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Ids with this bit set were assigned sequentially (no fingerprint)
const ANONYMOUS_BIT: u64 = 1 << 63;

/// Stable logical device identifier
///
/// Fingerprinted devices get an id derived from the fingerprint hash, which
/// keeps it stable across reconnects and process restarts. Devices without a
/// fingerprint (virtual ports) get a sequential id from a separate range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Id for a hardware fingerprint (first 8 bytes of SHA-256, top bit clear)
    pub fn from_fingerprint(fingerprint: &str) -> Self {
        let digest = Sha256::digest(fingerprint.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes) & !ANONYMOUS_BIT)
    }

    /// Whether this id was assigned sequentially rather than derived
    pub fn is_anonymous(self) -> bool {
        self.0 & ANONYMOUS_BIT != 0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s.trim(), 16).map(DeviceId)
    }
}

/// Port direction as reported by the platform layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
    Both,
}

impl Direction {
    fn merge(self, other: Direction) -> Direction {
        if self == other {
            self
        } else {
            Direction::Both
        }
    }
}

/// Registry entry for one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub display_name: String,
    pub direction: Direction,
    pub connected: bool,
    /// Hardware fingerprint the id was derived from, if any
    pub fingerprint: Option<String>,
}

/// Owns all device records; lives on the consumer thread
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// Discovery order
    devices: Vec<Device>,
    by_id: HashMap<DeviceId, usize>,
    by_fingerprint: HashMap<String, DeviceId>,
    next_anonymous: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered endpoint
    ///
    /// Idempotent per fingerprint: a fingerprint seen before returns the same
    /// device (now connected). A `None` fingerprint always creates a new
    /// device.
    pub fn on_discovered(
        &mut self,
        fingerprint: Option<&str>,
        name: &str,
        direction: Direction,
    ) -> &Device {
        if let Some(fp) = fingerprint {
            if let Some(&id) = self.by_fingerprint.get(fp) {
                let idx = self.by_id[&id];
                let device = &mut self.devices[idx];
                if !device.connected {
                    info!("🔌 Device reconnected: {} ({})", name, id);
                }
                device.connected = true;
                device.direction = device.direction.merge(direction);
                if device.display_name != name {
                    debug!("Device {} renamed '{}' -> '{}'", id, device.display_name, name);
                    device.display_name = name.to_string();
                }
                return &self.devices[idx];
            }
        }

        let id = match fingerprint {
            Some(fp) => {
                let derived = DeviceId::from_fingerprint(fp);
                if self.by_id.contains_key(&derived) {
                    warn!(
                        "Fingerprint '{}' collides with device {}, assigning a sequential id",
                        fp, derived
                    );
                    self.allocate_anonymous()
                } else {
                    derived
                }
            }
            None => self.allocate_anonymous(),
        };

        info!("🔌 Device discovered: {} ({:?}, {})", name, direction, id);

        let idx = self.devices.len();
        self.devices.push(Device {
            id,
            display_name: name.to_string(),
            direction,
            connected: true,
            fingerprint: fingerprint.map(str::to_string),
        });
        self.by_id.insert(id, idx);
        if let Some(fp) = fingerprint {
            self.by_fingerprint.insert(fp.to_string(), id);
        }
        &self.devices[idx]
    }

    /// Mark a device disconnected. Returns false for an unknown id.
    pub fn on_removed(&mut self, id: DeviceId) -> bool {
        match self.by_id.get(&id) {
            Some(&idx) => {
                let device = &mut self.devices[idx];
                if device.connected {
                    info!("Device disconnected: {} ({})", device.display_name, id);
                }
                device.connected = false;
                true
            }
            None => {
                debug!("Removal of unknown device {} ignored", id);
                false
            }
        }
    }

    /// All known devices in discovery order
    pub fn list(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices.iter()
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.by_id.get(&id).map(|&idx| &self.devices[idx])
    }

    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<&Device> {
        self.by_fingerprint
            .get(fingerprint)
            .and_then(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn allocate_anonymous(&mut self) -> DeviceId {
        self.next_anonymous += 1;
        DeviceId(ANONYMOUS_BIT | self.next_anonymous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_keeps_device_id() {
        let mut registry = DeviceRegistry::new();
        let first = registry
            .on_discovered(Some("usb:1234:5678:A"), "nanoKONTROL2", Direction::Input)
            .id;

        assert!(registry.on_removed(first));
        assert!(!registry.get(first).unwrap().connected);

        let again = registry
            .on_discovered(Some("usb:1234:5678:A"), "nanoKONTROL2", Direction::Input)
            .id;
        assert_eq!(first, again);
        assert!(registry.get(first).unwrap().connected);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fingerprint_id_is_stable_across_registries() {
        let mut a = DeviceRegistry::new();
        let mut b = DeviceRegistry::new();
        // Different discovery order must not change the id
        b.on_discovered(None, "virtual", Direction::Input);
        let id_a = a.on_discovered(Some("fp"), "Pad", Direction::Input).id;
        let id_b = b.on_discovered(Some("fp"), "Pad", Direction::Input).id;
        assert_eq!(id_a, id_b);
        assert!(!id_a.is_anonymous());
    }

    #[test]
    fn test_no_fingerprint_gets_fresh_ids() {
        let mut registry = DeviceRegistry::new();
        let a = registry.on_discovered(None, "Virtual", Direction::Input).id;
        let b = registry.on_discovered(None, "Virtual", Direction::Input).id;
        assert_ne!(a, b);
        assert!(a.is_anonymous());
        assert!(b.is_anonymous());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_direction_merges_to_both() {
        let mut registry = DeviceRegistry::new();
        registry.on_discovered(Some("fp"), "Surface", Direction::Input);
        let device = registry.on_discovered(Some("fp"), "Surface", Direction::Output);
        assert_eq!(device.direction, Direction::Both);
    }

    #[test]
    fn test_remove_unknown_is_not_an_error() {
        let mut registry = DeviceRegistry::new();
        assert!(!registry.on_removed(DeviceId::from_raw(99)));
    }

    #[test]
    fn test_list_is_discovery_order_and_keeps_disconnected() {
        let mut registry = DeviceRegistry::new();
        let a = registry.on_discovered(Some("a"), "A", Direction::Input).id;
        let b = registry.on_discovered(Some("b"), "B", Direction::Input).id;
        registry.on_removed(a);

        let listed: Vec<_> = registry.list().map(|d| (d.id, d.connected)).collect();
        assert_eq!(listed, vec![(a, false), (b, true)]);
        assert_eq!(registry.find_by_fingerprint("b").map(|d| d.id), Some(b));
    }

    #[test]
    fn test_device_id_hex_roundtrip() {
        let id = DeviceId::from_fingerprint("x");
        let text = id.to_string();
        assert_eq!(text.len(), 16);
        assert_eq!(text.parse::<DeviceId>().unwrap(), id);
    }
}
