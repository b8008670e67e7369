//! Learn mode: capture the next incoming event for authoring
//!
//! While armed, every decoded event is offered here before dispatch. The
//! first one passing the filter is captured and consumed, so authoring a
//! binding never fires an action by accident.

use tracing::{debug, info};

use crate::devices::DeviceId;
use crate::error::{Error, Result};
use crate::midi::{EventKind, MidiEvent};

/// Restricts which events a session captures; empty fields accept anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearnFilter {
    pub kind: Option<EventKind>,
    pub channel: Option<u8>,
    pub device: Option<DeviceId>,
}

impl LearnFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel & 0x0F);
        self
    }

    pub fn device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn accepts(&self, event: &MidiEvent) -> bool {
        self.kind.map_or(true, |k| k == event.kind())
            && self.channel.map_or(true, |c| c == event.channel())
            && self.device.map_or(true, |d| d == event.device())
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnState {
    Idle,
    Armed,
    /// Holding a capture that has not been polled yet
    Captured,
}

/// Result of offering an event to the coordinator
#[derive(Debug)]
pub enum Offer {
    /// Taken by learn; must not be dispatched
    Consumed,
    /// Not for learn; continue with normal dispatch
    Pass(MidiEvent),
}

#[derive(Debug, Default)]
enum Session {
    #[default]
    Idle,
    Armed(LearnFilter),
    Captured(MidiEvent),
}

/// The key a captured note press is released with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NoteKey {
    device: DeviceId,
    channel: u8,
    note: u8,
}

impl NoteKey {
    fn of(event: &MidiEvent) -> Self {
        Self {
            device: event.device(),
            channel: event.channel(),
            note: event.primary(),
        }
    }
}

/// NoteOff, or the NoteOn/0 form many controllers send instead
fn is_note_release(event: &MidiEvent) -> bool {
    match event.kind() {
        EventKind::NoteOff => true,
        EventKind::NoteOn => event.value() == 0,
        _ => false,
    }
}

#[derive(Debug)]
pub struct LearnCoordinator {
    session: Session,
    suppress_release: bool,
    /// Note whose release is swallowed after a capture
    suppressed: Option<NoteKey>,
}

impl Default for LearnCoordinator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LearnCoordinator {
    pub fn new(suppress_release: bool) -> Self {
        Self {
            session: Session::Idle,
            suppress_release,
            suppressed: None,
        }
    }

    /// Arm a session
    pub fn begin(&mut self, filter: LearnFilter) -> Result<()> {
        match self.session {
            Session::Armed(_) => Err(Error::AlreadyArmed),
            Session::Captured(_) => Err(Error::UnreadCapture),
            Session::Idle => {
                info!("🎯 Learn armed ({:?})", filter);
                self.session = Session::Armed(filter);
                Ok(())
            }
        }
    }

    /// Offer a decoded event; consumed events must not reach dispatch
    pub fn offer(&mut self, event: MidiEvent) -> Offer {
        if let Some(key) = self.suppressed.take() {
            if is_note_release(&event) && key == NoteKey::of(&event) {
                debug!("Release after learn swallowed: {}", event);
                return Offer::Consumed;
            }
        }

        let Session::Armed(filter) = &self.session else {
            return Offer::Pass(event);
        };
        if !filter.accepts(&event) {
            return Offer::Pass(event);
        }

        info!("🎯 Learn captured: {}", event);
        // Only a pressed note has a release; continuous controls keep every value
        if self.suppress_release && event.kind() == EventKind::NoteOn && event.value() > 0 {
            self.suppressed = Some(NoteKey::of(&event));
        }
        self.session = Session::Captured(event);
        Offer::Consumed
    }

    /// Drop the session in whatever state it is in; safe to call any time
    pub fn cancel(&mut self) -> bool {
        self.suppressed = None;
        match std::mem::take(&mut self.session) {
            Session::Idle => false,
            _ => {
                info!("Learn cancelled");
                true
            }
        }
    }

    /// Take the captured event, returning the session to idle
    pub fn poll(&mut self) -> Option<MidiEvent> {
        match std::mem::take(&mut self.session) {
            Session::Captured(event) => Some(event),
            other => {
                self.session = other;
                None
            }
        }
    }

    pub fn state(&self) -> LearnState {
        match self.session {
            Session::Idle => LearnState::Idle,
            Session::Armed(_) => LearnState::Armed,
            Session::Captured(_) => LearnState::Captured,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.session, Session::Armed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> DeviceId {
        DeviceId::from_raw(1)
    }

    fn note_on(note: u8) -> MidiEvent {
        MidiEvent::new(dev(), 0, EventKind::NoteOn, note, 100, 0)
    }

    fn note_off(note: u8) -> MidiEvent {
        MidiEvent::new(dev(), 0, EventKind::NoteOff, note, 0, 0)
    }

    fn cc(controller: u8) -> MidiEvent {
        MidiEvent::new(dev(), 0, EventKind::ControlChange, controller, 10, 0)
    }

    #[test]
    fn test_lifecycle() {
        let mut learn = LearnCoordinator::new(false);
        assert_eq!(learn.state(), LearnState::Idle);
        learn.begin(LearnFilter::any()).unwrap();
        assert_eq!(learn.state(), LearnState::Armed);

        assert!(matches!(learn.offer(cc(1)), Offer::Consumed));
        assert_eq!(learn.state(), LearnState::Captured);

        let captured = learn.poll().unwrap();
        assert_eq!(captured.primary(), 1);
        assert_eq!(learn.state(), LearnState::Idle);
        assert!(learn.poll().is_none());
    }

    #[test]
    fn test_begin_rejected_while_armed_or_unread() {
        let mut learn = LearnCoordinator::new(false);
        learn.begin(LearnFilter::any()).unwrap();
        assert!(matches!(learn.begin(LearnFilter::any()), Err(Error::AlreadyArmed)));

        learn.offer(cc(1));
        assert!(matches!(learn.begin(LearnFilter::any()), Err(Error::UnreadCapture)));

        learn.poll();
        assert!(learn.begin(LearnFilter::any()).is_ok());
    }

    #[test]
    fn test_filtered_session_passes_other_events() {
        let mut learn = LearnCoordinator::new(false);
        learn
            .begin(LearnFilter::any().kind(EventKind::ControlChange).channel(0))
            .unwrap();

        match learn.offer(note_on(60)) {
            Offer::Pass(event) => assert_eq!(event.kind(), EventKind::NoteOn),
            Offer::Consumed => panic!("non-qualifying event was consumed"),
        }
        assert!(learn.is_armed());

        let other_channel = MidiEvent::new(dev(), 3, EventKind::ControlChange, 1, 1, 0);
        assert!(matches!(learn.offer(other_channel), Offer::Pass(_)));
        assert!(matches!(learn.offer(cc(7)), Offer::Consumed));
    }

    #[test]
    fn test_device_filter() {
        let mut learn = LearnCoordinator::new(false);
        learn.begin(LearnFilter::any().device(DeviceId::from_raw(2))).unwrap();
        assert!(matches!(learn.offer(cc(1)), Offer::Pass(_)));
        let from_other = MidiEvent::new(DeviceId::from_raw(2), 0, EventKind::ControlChange, 1, 1, 0);
        assert!(matches!(learn.offer(from_other), Offer::Consumed));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut learn = LearnCoordinator::default();
        assert!(!learn.cancel());
        learn.begin(LearnFilter::any()).unwrap();
        assert!(learn.cancel());
        assert!(!learn.cancel());
        assert_eq!(learn.state(), LearnState::Idle);
        assert!(matches!(learn.offer(cc(1)), Offer::Pass(_)));
    }

    #[test]
    fn test_release_after_capture_is_swallowed_once() {
        let mut learn = LearnCoordinator::new(true);
        learn.begin(LearnFilter::any()).unwrap();
        assert!(matches!(learn.offer(note_on(36)), Offer::Consumed));

        assert!(matches!(learn.offer(note_off(36)), Offer::Consumed));
        assert!(matches!(learn.offer(note_off(36)), Offer::Pass(_)));
    }

    #[test]
    fn test_other_event_clears_suppression() {
        let mut learn = LearnCoordinator::new(true);
        learn.begin(LearnFilter::any()).unwrap();
        learn.offer(note_on(36));

        assert!(matches!(learn.offer(note_on(40)), Offer::Pass(_)));
        assert!(matches!(learn.offer(note_off(36)), Offer::Pass(_)));
    }

    #[test]
    fn test_program_change_never_suppresses() {
        let mut learn = LearnCoordinator::new(true);
        learn.begin(LearnFilter::any()).unwrap();
        let pc = MidiEvent::new(dev(), 0, EventKind::ProgramChange, 5, 5, 0);
        learn.offer(pc.clone());
        assert!(matches!(learn.offer(pc), Offer::Pass(_)));
    }

    #[test]
    fn test_zero_velocity_note_on_counts_as_release() {
        let mut learn = LearnCoordinator::new(true);
        learn.begin(LearnFilter::any()).unwrap();
        learn.offer(note_on(36));
        let release = MidiEvent::new(dev(), 0, EventKind::NoteOn, 36, 0, 0);
        assert!(matches!(learn.offer(release), Offer::Consumed));
    }

    #[test]
    fn test_continuous_capture_keeps_next_value() {
        let mut learn = LearnCoordinator::new(true);
        learn.begin(LearnFilter::any()).unwrap();
        assert!(matches!(learn.offer(cc(1)), Offer::Consumed));
        learn.poll();
        assert!(matches!(learn.offer(cc(1)), Offer::Pass(_)));

        let bend = MidiEvent::new(dev(), 0, EventKind::PitchBend, 0, 9000, 0);
        learn.begin(LearnFilter::any()).unwrap();
        learn.offer(bend.clone());
        learn.poll();
        assert!(matches!(learn.offer(bend), Offer::Pass(_)));
    }

    #[test]
    fn test_suppression_can_be_disabled() {
        let mut learn = LearnCoordinator::new(false);
        learn.begin(LearnFilter::any()).unwrap();
        learn.offer(note_on(36));
        assert!(matches!(learn.offer(note_off(36)), Offer::Pass(_)));
    }
}
