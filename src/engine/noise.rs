//! Hysteresis gate for jittery continuous controls
//!
//! Cheap faders and pots wobble by a step or two at rest. An idle control
//! has to move by `enter_threshold` before it is accepted; once moving, the
//! finer `active_threshold` applies until it has been quiet for `idle_ms`.
//! Values at either end of the range always pass so a control can reach its
//! limits.
//!
//! Devices differ in how much they jitter, so any setting can be overridden
//! for devices whose name contains a pattern.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::devices::DeviceId;
use crate::midi::{EventKind, MidiEvent, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseGateSettings {
    pub enabled: bool,
    /// Normalized delta needed to wake an idle control
    pub enter_threshold: f64,
    /// Normalized delta needed while the control is moving
    pub active_threshold: f64,
    pub idle_ms: u64,
}

impl Default for NoiseGateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            enter_threshold: 0.02,
            active_threshold: 0.004,
            idle_ms: 120,
        }
    }
}

/// Settings for devices whose name contains `device` (case-insensitive);
/// unset fields keep the global value
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NoiseGateOverride {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enter_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
}

impl NoiseGateOverride {
    pub fn matches(&self, device_name: &str) -> bool {
        device_name
            .to_lowercase()
            .contains(&self.device.trim().to_lowercase())
    }

    pub fn apply(&self, base: NoiseGateSettings) -> NoiseGateSettings {
        NoiseGateSettings {
            enabled: self.enabled.unwrap_or(base.enabled),
            enter_threshold: self.enter_threshold.unwrap_or(base.enter_threshold),
            active_threshold: self.active_threshold.unwrap_or(base.active_threshold),
            idle_ms: self.idle_ms.unwrap_or(base.idle_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ControlKey {
    device: DeviceId,
    kind: EventKind,
    channel: u8,
    primary: u8,
}

#[derive(Debug, Clone, Copy)]
struct ControlState {
    last: f64,
    last_accepted: Timestamp,
    engaged: bool,
}

#[derive(Debug, Default)]
pub struct NoiseGate {
    settings: NoiseGateSettings,
    overrides: Vec<NoiseGateOverride>,
    /// Resolved settings for devices matched by an override
    per_device: HashMap<DeviceId, NoiseGateSettings>,
    controls: HashMap<ControlKey, ControlState>,
}

impl NoiseGate {
    pub fn new(settings: NoiseGateSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Per-device overrides; the first matching pattern wins
    pub fn with_overrides(mut self, overrides: Vec<NoiseGateOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn settings(&self) -> &NoiseGateSettings {
        &self.settings
    }

    /// Settings in effect for events from `device`
    pub fn settings_for(&self, device: DeviceId) -> &NoiseGateSettings {
        self.per_device.get(&device).unwrap_or(&self.settings)
    }

    /// Resolve the overrides for a newly discovered device
    pub fn assign_device(&mut self, device: DeviceId, name: &str) {
        match self.overrides.iter().find(|o| o.matches(name)) {
            Some(found) => {
                let settings = found.apply(self.settings);
                debug!("Noise gate override '{}' for {} ({:?})", found.device, name, settings);
                self.per_device.insert(device, settings);
            }
            None => {
                self.per_device.remove(&device);
            }
        }
    }

    /// Whether `event` should continue to dispatch
    pub fn admit(&mut self, event: &MidiEvent) -> bool {
        let settings = *self.settings_for(event.device());
        if !settings.enabled || !event.kind().is_continuous() {
            return true;
        }

        let key = ControlKey {
            device: event.device(),
            kind: event.kind(),
            channel: event.channel(),
            primary: event.primary(),
        };
        let norm = event.normalized();
        let now = event.timestamp();

        let Some(state) = self.controls.get_mut(&key) else {
            self.controls.insert(
                key,
                ControlState {
                    last: norm,
                    last_accepted: now,
                    engaged: false,
                },
            );
            return true;
        };

        if now.saturating_sub(state.last_accepted) > settings.idle_ms * 1000 {
            state.engaged = false;
        }

        let threshold = if state.engaged {
            settings.active_threshold
        } else {
            settings.enter_threshold
        };
        let at_edge = norm <= 0.0 || norm >= 1.0;
        if !at_edge && (norm - state.last).abs() <= threshold {
            trace!("Gated {} (delta {:.4})", event, (norm - state.last).abs());
            return false;
        }

        state.last = norm;
        state.last_accepted = now;
        state.engaged = true;
        true
    }

    /// Forget per-control history
    pub fn reset(&mut self) {
        self.controls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(value: i32, ms: u64) -> MidiEvent {
        MidiEvent::new(DeviceId::from_raw(1), 0, EventKind::ControlChange, 7, value, ms * 1000)
    }

    fn enabled() -> NoiseGate {
        NoiseGate::new(NoiseGateSettings {
            enabled: true,
            ..NoiseGateSettings::default()
        })
    }

    #[test]
    fn test_disabled_gate_passes_everything() {
        let mut gate = NoiseGate::default();
        assert!(gate.admit(&cc(64, 0)));
        assert!(gate.admit(&cc(64, 1)));
    }

    #[test]
    fn test_idle_control_needs_enter_threshold() {
        let mut gate = enabled();
        assert!(gate.admit(&cc(64, 0)));
        // One step (~0.008) is below the 0.02 entry threshold
        assert!(!gate.admit(&cc(65, 500)));
        // Three steps (~0.024) wake it up
        assert!(gate.admit(&cc(67, 510)));
    }

    #[test]
    fn test_engaged_control_uses_active_threshold() {
        let mut gate = enabled();
        gate.admit(&cc(60, 0));
        assert!(gate.admit(&cc(64, 200)));
        assert!(gate.admit(&cc(65, 210)));
        assert!(gate.admit(&cc(66, 220)));
        // Same value again is never news
        assert!(!gate.admit(&cc(66, 230)));
    }

    #[test]
    fn test_goes_idle_after_quiet_period() {
        let mut gate = enabled();
        gate.admit(&cc(60, 0));
        assert!(gate.admit(&cc(64, 200)));
        // Quiet for longer than idle_ms: back to the coarse threshold
        assert!(!gate.admit(&cc(65, 400)));
    }

    #[test]
    fn test_edges_always_pass() {
        let mut gate = enabled();
        gate.admit(&cc(126, 0));
        assert!(gate.admit(&cc(127, 500)));
        assert!(gate.admit(&cc(127, 501)));
    }

    #[test]
    fn test_discrete_kinds_are_not_gated() {
        let mut gate = enabled();
        let note = MidiEvent::new(DeviceId::from_raw(1), 0, EventKind::NoteOn, 60, 100, 0);
        assert!(gate.admit(&note));
        assert!(gate.admit(&note));
    }

    #[test]
    fn test_device_override() {
        let noisy = NoiseGateOverride {
            device: "nanoKONTROL".to_string(),
            enabled: None,
            enter_threshold: Some(0.1),
            active_threshold: None,
            idle_ms: None,
        };
        let quiet = NoiseGateOverride {
            device: "launch".to_string(),
            enabled: Some(false),
            enter_threshold: None,
            active_threshold: None,
            idle_ms: None,
        };
        let mut gate = enabled().with_overrides(vec![noisy, quiet]);
        let nano = DeviceId::from_raw(1);
        let launch = DeviceId::from_raw(2);
        gate.assign_device(nano, "nanoKONTROL2 SLIDER/KNOB");
        gate.assign_device(launch, "Launch Control XL");

        assert_eq!(gate.settings_for(nano).enter_threshold, 0.1);
        assert_eq!(gate.settings_for(nano).idle_ms, 120);
        assert!(!gate.settings_for(launch).enabled);
        assert_eq!(gate.settings_for(DeviceId::from_raw(3)), gate.settings());

        // Five steps (~0.04) would wake a default control, not this one
        assert!(gate.admit(&cc(60, 0)));
        assert!(!gate.admit(&cc(65, 500)));

        let from_launch =
            |value| MidiEvent::new(launch, 0, EventKind::ControlChange, 7, value, 0);
        assert!(gate.admit(&from_launch(60)));
        assert!(gate.admit(&from_launch(60)));
    }

    #[test]
    fn test_controls_are_independent() {
        let mut gate = enabled();
        gate.admit(&cc(64, 0));
        let other = MidiEvent::new(DeviceId::from_raw(1), 0, EventKind::ControlChange, 8, 65, 1000);
        assert!(gate.admit(&other));
    }
}
