//! Streaming MIDI wire decoder
//!
//! Turns raw byte buffers into `MidiEvent`s. Buffers may split messages at
//! any byte, so per-device state (running status, partial data bytes, an
//! open SysEx) is carried from one call to the next.
//!
//! Malformed input never stops the stream: the offending bytes are skipped
//! and `DecodeStats::errors` is incremented.

use std::collections::HashMap;
use tracing::{debug, trace};

use crate::devices::DeviceId;
use crate::midi::{convert, EventKind, MidiEvent, Timestamp};

/// Default upper bound for a buffered SysEx body
pub const DEFAULT_MAX_SYSEX_LEN: usize = 4096;

/// Counters for problems seen on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Malformed or unrecognized bytes (including discarded SysEx)
    pub errors: u64,
    /// SysEx messages dropped for exceeding the size limit
    pub sysex_discarded: u64,
}

/// What went wrong, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeError {
    /// Data byte with no running status to attach to
    OrphanData(u8),
    /// Channel message cut short by a new status byte
    Truncated(u8),
    /// Undefined status byte (F4, F5, F9, FD)
    UndefinedStatus(u8),
    /// F7 outside of a SysEx
    StrayEndOfExclusive,
    /// SysEx interrupted by another status byte
    UnterminatedSysex,
    /// SysEx body longer than the configured limit
    SysexOverflow(usize),
}

#[derive(Debug, Default)]
enum Sysex {
    #[default]
    Idle,
    Collecting(Vec<u8>),
    /// Over the limit: skip data bytes until the next status byte
    Discarding,
}

/// Per-device wire state carried across buffers
#[derive(Debug, Default)]
struct StreamState {
    running_status: Option<u8>,
    data: [u8; 2],
    data_len: usize,
    /// Data bytes of a system common message still to skip
    skip: u8,
    sysex: Sysex,
}

/// Stateful decoder for any number of devices
#[derive(Debug)]
pub struct Decoder {
    streams: HashMap<DeviceId, StreamState>,
    max_sysex_len: usize,
    stats: DecodeStats,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SYSEX_LEN)
    }
}

impl Decoder {
    pub fn new(max_sysex_len: usize) -> Self {
        Self {
            streams: HashMap::new(),
            max_sysex_len,
            stats: DecodeStats::default(),
        }
    }

    /// Decode one buffer from `device`
    ///
    /// The returned iterator is lazy; bytes it does not reach are never
    /// consumed, but dropping it early loses them, so callers normally run it
    /// to completion.
    pub fn decode<'a>(
        &'a mut self,
        bytes: &'a [u8],
        timestamp: Timestamp,
        device: DeviceId,
    ) -> Decode<'a> {
        let Decoder {
            streams,
            max_sysex_len,
            stats,
        } = self;
        Decode {
            state: streams.entry(device).or_default(),
            stats,
            max_sysex_len: *max_sysex_len,
            bytes,
            pos: 0,
            device,
            timestamp,
        }
    }

    /// Forget carried state for a device (e.g. after it was unplugged)
    pub fn reset_device(&mut self, device: DeviceId) {
        if self.streams.remove(&device).is_some() {
            debug!("Decoder state reset for device {}", device);
        }
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn max_sysex_len(&self) -> usize {
        self.max_sysex_len
    }
}

/// Lazy iterator over the events of one buffer
pub struct Decode<'a> {
    state: &'a mut StreamState,
    stats: &'a mut DecodeStats,
    max_sysex_len: usize,
    bytes: &'a [u8],
    pos: usize,
    device: DeviceId,
    timestamp: Timestamp,
}

impl Decode<'_> {
    fn error(&mut self, error: DecodeError) {
        self.stats.errors += 1;
        if let DecodeError::SysexOverflow(_) = error {
            self.stats.sysex_discarded += 1;
        }
        debug!("MIDI decode error on {}: {:?}", self.device, error);
    }

    /// Handle one byte, returning an event when it completes a message
    fn feed(&mut self, byte: u8) -> Option<MidiEvent> {
        // Real-time bytes may interleave anywhere and leave state untouched
        if byte >= 0xF8 {
            if byte == 0xF9 || byte == 0xFD {
                self.error(DecodeError::UndefinedStatus(byte));
            } else {
                trace!("Ignoring real-time byte {:02X}", byte);
            }
            return None;
        }

        match std::mem::take(&mut self.state.sysex) {
            Sysex::Collecting(mut body) => {
                if byte == 0xF7 {
                    return Some(MidiEvent::sysex(self.device, body, self.timestamp));
                }
                if byte < 0x80 {
                    if body.len() >= self.max_sysex_len {
                        self.error(DecodeError::SysexOverflow(body.len() + 1));
                        self.state.sysex = Sysex::Discarding;
                    } else {
                        body.push(byte);
                        self.state.sysex = Sysex::Collecting(body);
                    }
                    return None;
                }
                self.error(DecodeError::UnterminatedSysex);
            }
            Sysex::Discarding => {
                if byte < 0x80 {
                    self.state.sysex = Sysex::Discarding;
                    return None;
                }
                if byte == 0xF7 {
                    return None;
                }
            }
            Sysex::Idle => {}
        }

        if byte >= 0x80 {
            self.status(byte);
            None
        } else {
            self.data(byte)
        }
    }

    fn status(&mut self, byte: u8) {
        if self.state.data_len > 0 {
            if let Some(status) = self.state.running_status {
                self.error(DecodeError::Truncated(status));
            }
        }
        self.state.data_len = 0;
        self.state.skip = 0;

        match byte {
            0x80..=0xEF => self.state.running_status = Some(byte),
            0xF0 => {
                self.state.running_status = None;
                self.state.sysex = Sysex::Collecting(Vec::new());
            }
            0xF7 => {
                self.state.running_status = None;
                self.error(DecodeError::StrayEndOfExclusive);
            }
            _ => {
                // System common cancels running status
                self.state.running_status = None;
                match byte {
                    0xF1 | 0xF3 => self.state.skip = 1,
                    0xF2 => self.state.skip = 2,
                    0xF6 => {}
                    _ => self.error(DecodeError::UndefinedStatus(byte)),
                }
            }
        }
    }

    fn data(&mut self, byte: u8) -> Option<MidiEvent> {
        if self.state.skip > 0 {
            self.state.skip -= 1;
            return None;
        }

        let Some(status) = self.state.running_status else {
            self.error(DecodeError::OrphanData(byte));
            return None;
        };
        let kind = EventKind::from_status(status)?;

        self.state.data[self.state.data_len] = byte;
        self.state.data_len += 1;
        if self.state.data_len < kind.data_len() {
            return None;
        }
        self.state.data_len = 0;

        let channel = status & 0x0F;
        let [d1, d2] = self.state.data;
        let event = match kind {
            EventKind::ProgramChange => {
                MidiEvent::new(self.device, channel, kind, d1, i32::from(d1), self.timestamp)
            }
            EventKind::ChannelPressure => {
                MidiEvent::new(self.device, channel, kind, 0, i32::from(d1), self.timestamp)
            }
            EventKind::PitchBend => {
                let value = convert::bend_from_14bit(convert::join_14bit(d1, d2));
                MidiEvent::new(self.device, channel, kind, 0, value, self.timestamp)
            }
            _ => MidiEvent::new(self.device, channel, kind, d1, i32::from(d2), self.timestamp),
        };
        trace!("Decoded {}", event);
        Some(event)
    }
}

impl Iterator for Decode<'_> {
    type Item = MidiEvent;

    fn next(&mut self) -> Option<MidiEvent> {
        while self.pos < self.bytes.len() {
            let byte = self.bytes[self.pos];
            self.pos += 1;
            if let Some(event) = self.feed(byte) {
                return Some(event);
            }
        }
        None
    }
}
