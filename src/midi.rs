//! Typed MIDI events
//!
//! `MidiEvent` is what the decoder produces and what bindings match on.
//! Events are immutable once built and are moved, not shared, between
//! pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::devices::DeviceId;

/// Microseconds, monotonic per source (device clock or arrival clock)
pub type Timestamp = u64;

/// Semantic kind of a decoded message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NoteOn,
    NoteOff,
    /// Polyphonic key pressure (per-note aftertouch)
    PolyPressure,
    ControlChange,
    PitchBend,
    ProgramChange,
    ChannelPressure,
    #[serde(rename = "sysex")]
    SysEx,
}

impl EventKind {
    /// All kinds, in wire status order
    pub const ALL: [EventKind; 8] = [
        EventKind::NoteOff,
        EventKind::NoteOn,
        EventKind::PolyPressure,
        EventKind::ControlChange,
        EventKind::ProgramChange,
        EventKind::ChannelPressure,
        EventKind::PitchBend,
        EventKind::SysEx,
    ];

    /// Kind for a channel-voice status byte (0x80-0xEF)
    pub fn from_status(status: u8) -> Option<Self> {
        match status & 0xF0 {
            0x80 => Some(EventKind::NoteOff),
            0x90 => Some(EventKind::NoteOn),
            0xA0 => Some(EventKind::PolyPressure),
            0xB0 => Some(EventKind::ControlChange),
            0xC0 => Some(EventKind::ProgramChange),
            0xD0 => Some(EventKind::ChannelPressure),
            0xE0 => Some(EventKind::PitchBend),
            _ => None,
        }
    }

    /// High nibble of the status byte (0xF0 for SysEx)
    pub fn status_nibble(self) -> u8 {
        match self {
            EventKind::NoteOff => 0x80,
            EventKind::NoteOn => 0x90,
            EventKind::PolyPressure => 0xA0,
            EventKind::ControlChange => 0xB0,
            EventKind::ProgramChange => 0xC0,
            EventKind::ChannelPressure => 0xD0,
            EventKind::PitchBend => 0xE0,
            EventKind::SysEx => 0xF0,
        }
    }

    /// Number of data bytes following a channel-voice status byte
    pub fn data_len(self) -> usize {
        match self {
            EventKind::ProgramChange | EventKind::ChannelPressure => 1,
            EventKind::SysEx => 0,
            _ => 2,
        }
    }

    /// Inclusive value range the decoder produces for this kind
    pub fn natural_range(self) -> (i32, i32) {
        match self {
            EventKind::PitchBend => (-8192, 8191),
            EventKind::SysEx => (0, 0),
            _ => (0, 127),
        }
    }

    /// Whether the kind carries a primary (note/controller/program) number
    pub fn has_primary(self) -> bool {
        !matches!(
            self,
            EventKind::PitchBend | EventKind::ChannelPressure | EventKind::SysEx
        )
    }

    /// Fader-like kinds that stream many small value changes
    pub fn is_continuous(self) -> bool {
        matches!(
            self,
            EventKind::ControlChange
                | EventKind::PitchBend
                | EventKind::ChannelPressure
                | EventKind::PolyPressure
        )
    }

    /// Short lowercase name, as used in the shell and logs
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NoteOn => "note_on",
            EventKind::NoteOff => "note_off",
            EventKind::PolyPressure => "poly_pressure",
            EventKind::ControlChange => "control_change",
            EventKind::PitchBend => "pitch_bend",
            EventKind::ProgramChange => "program_change",
            EventKind::ChannelPressure => "channel_pressure",
            EventKind::SysEx => "sysex",
        }
    }

    /// Parse a kind name, accepting the short aliases `cc`, `pb`, `pc`, `note`
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "note" | "note_on" | "noteon" => EventKind::NoteOn,
            "note_off" | "noteoff" => EventKind::NoteOff,
            "poly_pressure" | "aftertouch" => EventKind::PolyPressure,
            "cc" | "control_change" => EventKind::ControlChange,
            "pb" | "pitch_bend" | "pitchbend" => EventKind::PitchBend,
            "pc" | "program" | "program_change" => EventKind::ProgramChange,
            "channel_pressure" | "pressure" => EventKind::ChannelPressure,
            "sysex" => EventKind::SysEx,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded MIDI message from one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    device: DeviceId,
    channel: u8,
    kind: EventKind,
    primary: u8,
    value: i32,
    timestamp: Timestamp,
    payload: Vec<u8>,
}

impl MidiEvent {
    /// Build a channel-voice event
    ///
    /// Channel and primary are masked to their wire width and the value is
    /// clamped to the kind's natural range.
    pub fn new(
        device: DeviceId,
        channel: u8,
        kind: EventKind,
        primary: u8,
        value: i32,
        timestamp: Timestamp,
    ) -> Self {
        let (lo, hi) = kind.natural_range();
        let primary = if kind.has_primary() { primary & 0x7F } else { 0 };
        let value = match kind {
            EventKind::ProgramChange => i32::from(primary),
            _ => value.clamp(lo, hi),
        };
        Self {
            device,
            channel: channel & 0x0F,
            kind,
            primary,
            value,
            timestamp,
            payload: Vec::new(),
        }
    }

    /// Build a SysEx event from the body between F0 and F7
    pub fn sysex(device: DeviceId, payload: Vec<u8>, timestamp: Timestamp) -> Self {
        Self {
            device,
            channel: 0,
            kind: EventKind::SysEx,
            primary: payload.first().copied().unwrap_or(0) & 0x7F,
            value: 0,
            timestamp,
            payload,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Channel 0-15 (always 0 for SysEx)
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Note, controller or program number (SysEx: manufacturer byte)
    pub fn primary(&self) -> u8 {
        self.primary
    }

    /// Velocity / CC value / signed bend / program / pressure
    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// SysEx body without the F0/F7 framing; empty for other kinds
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Value mapped onto 0.0..=1.0 over the kind's natural range
    pub fn normalized(&self) -> f64 {
        convert::normalize(self.value, self.kind.natural_range())
    }

    /// Encode back to wire bytes (always with an explicit status byte)
    pub fn to_bytes(&self) -> Vec<u8> {
        let status = self.kind.status_nibble() | self.channel;
        match self.kind {
            EventKind::NoteOff
            | EventKind::NoteOn
            | EventKind::PolyPressure
            | EventKind::ControlChange => {
                vec![status, self.primary & 0x7F, (self.value & 0x7F) as u8]
            }
            EventKind::ProgramChange => vec![status, self.primary & 0x7F],
            EventKind::ChannelPressure => vec![status, (self.value & 0x7F) as u8],
            EventKind::PitchBend => {
                let (lsb, msb) = convert::split_14bit(convert::bend_to_14bit(self.value));
                vec![status, lsb, msb]
            }
            EventKind::SysEx => {
                let mut bytes = Vec::with_capacity(self.payload.len() + 2);
                bytes.push(0xF0);
                bytes.extend_from_slice(&self.payload);
                bytes.push(0xF7);
                bytes
            }
        }
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EventKind::NoteOn => write!(
                f,
                "NoteOn ch:{} n:{} v:{}",
                self.channel + 1,
                self.primary,
                self.value
            ),
            EventKind::NoteOff => write!(
                f,
                "NoteOff ch:{} n:{} v:{}",
                self.channel + 1,
                self.primary,
                self.value
            ),
            EventKind::PolyPressure => write!(
                f,
                "PolyPressure ch:{} n:{} p:{}",
                self.channel + 1,
                self.primary,
                self.value
            ),
            EventKind::ControlChange => write!(
                f,
                "CC ch:{} cc:{} v:{}",
                self.channel + 1,
                self.primary,
                self.value
            ),
            EventKind::ProgramChange => {
                write!(f, "ProgramChange ch:{} p:{}", self.channel + 1, self.primary)
            }
            EventKind::ChannelPressure => {
                write!(f, "ChannelPressure ch:{} p:{}", self.channel + 1, self.value)
            }
            EventKind::PitchBend => {
                write!(f, "PitchBend ch:{} v:{}", self.channel + 1, self.value)
            }
            EventKind::SysEx => write!(f, "SysEx [{}]", format_hex(&self.payload)),
        }?;
        write!(f, " @{}", self.device)
    }
}

/// MIDI value conversion utilities
pub mod convert {
    /// Centre of the 14-bit pitch bend range
    pub const BEND_CENTER: u16 = 8192;

    /// Join LSB/MSB data bytes into a 14-bit value (0-16383)
    pub fn join_14bit(lsb: u8, msb: u8) -> u16 {
        (u16::from(msb & 0x7F) << 7) | u16::from(lsb & 0x7F)
    }

    /// Split a 14-bit value into (LSB, MSB) data bytes
    pub fn split_14bit(value: u16) -> (u8, u8) {
        ((value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
    }

    /// Unsigned 14-bit bend to signed (-8192..=8191, 0 = centre)
    pub fn bend_from_14bit(value: u16) -> i32 {
        i32::from(value & 0x3FFF) - i32::from(BEND_CENTER)
    }

    /// Signed bend back to unsigned 14-bit
    pub fn bend_to_14bit(value: i32) -> u16 {
        (value.clamp(-8192, 8191) + i32::from(BEND_CENTER)) as u16
    }

    /// Map `value` within `[lo, hi]` onto 0.0..=1.0 (0.0 for an empty range)
    pub fn normalize(value: i32, (lo, hi): (i32, i32)) -> f64 {
        if hi <= lo {
            return 0.0;
        }
        let clamped = value.clamp(lo, hi);
        f64::from(clamped - lo) / f64::from(hi - lo)
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> DeviceId {
        DeviceId::from_raw(1)
    }

    #[test]
    fn test_encode_note_on() {
        let event = MidiEvent::new(dev(), 0, EventKind::NoteOn, 60, 100, 0);
        assert_eq!(event.to_bytes(), vec![0x90, 60, 100]);
    }

    #[test]
    fn test_encode_pitch_bend_center() {
        let event = MidiEvent::new(dev(), 2, EventKind::PitchBend, 0, 0, 0);
        assert_eq!(event.to_bytes(), vec![0xE2, 0x00, 0x40]);
    }

    #[test]
    fn test_encode_sysex_frames_payload() {
        let event = MidiEvent::sysex(dev(), vec![0x7E, 0x01, 0x02], 0);
        assert_eq!(event.to_bytes(), vec![0xF0, 0x7E, 0x01, 0x02, 0xF7]);
        assert_eq!(event.primary(), 0x7E);
    }

    #[test]
    fn test_constructor_masks_and_clamps() {
        let event = MidiEvent::new(dev(), 0x13, EventKind::ControlChange, 0x85, 300, 0);
        assert_eq!(event.channel(), 3);
        assert_eq!(event.primary(), 5);
        assert_eq!(event.value(), 127);

        let bend = MidiEvent::new(dev(), 0, EventKind::PitchBend, 42, -9000, 0);
        assert_eq!(bend.primary(), 0);
        assert_eq!(bend.value(), -8192);
    }

    #[test]
    fn test_program_change_value_follows_program() {
        let event = MidiEvent::new(dev(), 0, EventKind::ProgramChange, 12, 0, 0);
        assert_eq!(event.value(), 12);
        assert_eq!(event.to_bytes(), vec![0xC0, 12]);
    }

    #[test]
    fn test_normalized() {
        let low = MidiEvent::new(dev(), 0, EventKind::PitchBend, 0, -8192, 0);
        let high = MidiEvent::new(dev(), 0, EventKind::PitchBend, 0, 8191, 0);
        assert_eq!(low.normalized(), 0.0);
        assert_eq!(high.normalized(), 1.0);

        let cc = MidiEvent::new(dev(), 0, EventKind::ControlChange, 1, 127, 0);
        assert_eq!(cc.normalized(), 1.0);
    }

    #[test]
    fn test_14bit_helpers() {
        assert_eq!(convert::join_14bit(0x00, 0x40), 8192);
        assert_eq!(convert::split_14bit(16383), (0x7F, 0x7F));
        assert_eq!(convert::bend_from_14bit(0), -8192);
        assert_eq!(convert::bend_from_14bit(16383), 8191);
        assert_eq!(convert::bend_to_14bit(0), 8192);
    }

    #[test]
    fn test_kind_parse_aliases() {
        assert_eq!(EventKind::parse("cc"), Some(EventKind::ControlChange));
        assert_eq!(EventKind::parse("Note"), Some(EventKind::NoteOn));
        assert_eq!(EventKind::parse("pb"), Some(EventKind::PitchBend));
        assert_eq!(EventKind::parse("bogus"), None);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x90, 0x3C, 0x7F]), "90 3C 7F");
    }
}
