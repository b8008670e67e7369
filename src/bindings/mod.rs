//! Bindings: what to match and which action it drives
//!
//! A binding pairs a match spec (device, channel, kind, primary filter) with
//! a value transform and an opaque `action_ref`. The engine never looks
//! inside `action_ref`; resolving it is the host's job.

pub mod persistence;
pub mod store;
pub mod transform;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::devices::DeviceId;
use crate::midi::{EventKind, MidiEvent};

pub use persistence::DocumentFormat;
pub use store::BindingStore;
pub use transform::{ActionValue, Clamp, Curve, Output, Transform};

/// Stable binding identifier, unique within a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BindingId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(BindingId)
    }
}

/// Filter on the primary number (note, controller, program)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryFilter {
    #[default]
    Any,
    Exact(u8),
    /// Inclusive
    Range(u8, u8),
}

impl PrimaryFilter {
    pub fn matches(self, primary: u8) -> bool {
        match self {
            PrimaryFilter::Any => true,
            PrimaryFilter::Exact(n) => primary == n,
            PrimaryFilter::Range(lo, hi) => (lo..=hi).contains(&primary),
        }
    }
}

impl fmt::Display for PrimaryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryFilter::Any => f.write_str("*"),
            PrimaryFilter::Exact(n) => write!(f, "{}", n),
            PrimaryFilter::Range(lo, hi) => write!(f, "{}-{}", lo, hi),
        }
    }
}

/// Match predicate of a binding
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSpec {
    /// `None` matches every device
    pub device: Option<DeviceId>,
    /// `None` matches every channel
    pub channel: Option<u8>,
    pub kind: EventKind,
    pub primary: PrimaryFilter,
    /// NoteOn bindings also fire on NoteOff, seen as velocity 0
    pub note_off_as_zero_velocity: bool,
}

impl MatchSpec {
    pub fn new(kind: EventKind) -> Self {
        Self {
            device: None,
            channel: None,
            kind,
            primary: PrimaryFilter::Any,
            note_off_as_zero_velocity: false,
        }
    }

    /// Device, channel, kind, primary; cheapest rejections first
    pub fn matches(&self, event: &MidiEvent) -> bool {
        if let Some(device) = self.device {
            if device != event.device() {
                return false;
            }
        }
        if let Some(channel) = self.channel {
            if channel != event.channel() {
                return false;
            }
        }
        if !self.accepts_kind(event.kind()) {
            return false;
        }
        self.primary.matches(event.primary())
    }

    fn accepts_kind(&self, kind: EventKind) -> bool {
        kind == self.kind || self.treats_as_release(kind)
    }

    fn treats_as_release(&self, kind: EventKind) -> bool {
        self.note_off_as_zero_velocity
            && self.kind == EventKind::NoteOn
            && kind == EventKind::NoteOff
    }
}

/// One entry of the binding table
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Assigned by the store on `add`
    pub id: BindingId,
    pub matcher: MatchSpec,
    pub transform: Transform,
    pub action_ref: Arc<str>,
    pub enabled: bool,
}

impl Binding {
    /// Enabled binding for `kind` on any device/channel/primary
    pub fn new(kind: EventKind, action_ref: impl Into<Arc<str>>) -> Self {
        Self {
            id: BindingId(0),
            matcher: MatchSpec::new(kind),
            transform: Transform::default(),
            action_ref: action_ref.into(),
            enabled: true,
        }
    }

    /// Binding synthesized from a learn capture
    ///
    /// Exact device, channel, kind and primary, with a 0..1 normalized
    /// transform. Program changes bind every program on the channel, so
    /// the value tells which one was picked.
    pub fn learned(event: &MidiEvent, action_ref: impl Into<Arc<str>>) -> Self {
        let kind = event.kind();
        let binding = Self::new(kind, action_ref)
            .on_device(event.device())
            .on_channel(event.channel());

        match kind {
            EventKind::ProgramChange => {
                binding.with_transform(Transform::normalized(kind.natural_range()))
            }
            EventKind::SysEx => binding
                .primary(PrimaryFilter::Exact(event.primary()))
                .with_transform(Transform::linear(0.0, 1.0)),
            _ if kind.has_primary() => binding
                .primary(PrimaryFilter::Exact(event.primary()))
                .with_transform(Transform::normalized(kind.natural_range())),
            _ => binding.with_transform(Transform::normalized(kind.natural_range())),
        }
    }

    pub fn on_device(mut self, device: DeviceId) -> Self {
        self.matcher.device = Some(device);
        self
    }

    pub fn on_channel(mut self, channel: u8) -> Self {
        self.matcher.channel = Some(channel & 0x0F);
        self
    }

    pub fn primary(mut self, filter: PrimaryFilter) -> Self {
        self.matcher.primary = filter;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn note_off_as_zero_velocity(mut self) -> Self {
        self.matcher.note_off_as_zero_velocity = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Enabled and matching
    pub fn matches(&self, event: &MidiEvent) -> bool {
        self.enabled && self.matcher.matches(event)
    }

    /// Transformed value for an event this binding matched
    pub fn translate(&self, event: &MidiEvent) -> ActionValue {
        let value = if self.matcher.treats_as_release(event.kind()) {
            0
        } else {
            event.value()
        };
        self.transform
            .apply(value, self.matcher.kind.natural_range())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.matcher.kind)?;
        match self.matcher.channel {
            Some(ch) => write!(f, " ch:{}", ch + 1)?,
            None => f.write_str(" ch:*")?,
        }
        if self.matcher.kind.has_primary() || self.matcher.primary != PrimaryFilter::Any {
            write!(f, " n:{}", self.matcher.primary)?;
        }
        match self.matcher.device {
            Some(device) => write!(f, " dev:{}", device)?,
            None => f.write_str(" dev:*")?,
        }
        write!(f, " -> {}", self.action_ref)?;
        if !self.enabled {
            f.write_str(" (disabled)")?;
        }
        Ok(())
    }
}
