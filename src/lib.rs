//! midimap - real-time MIDI mapping engine
//!
//! Decodes raw MIDI from any number of input devices, matches each event
//! against a table of user bindings and emits normalized action values.
//! Bindings are authored by hand, loaded from JSON/YAML, or captured with
//! MIDI learn.
//!
//! Threading: device callbacks only push raw packets into the bridge; a
//! single consumer thread owns the [`Engine`] and drains it with
//! [`Engine::tick`].

pub mod bindings;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod devices;
pub mod engine;
pub mod error;
pub mod learn;
pub mod midi;
pub mod paths;
pub mod ports;

pub use bindings::{ActionValue, Binding, BindingId, BindingStore, PrimaryFilter, Transform};
pub use bridge::{BridgeReceiver, BridgeSender, InputHandle};
pub use devices::{DeviceId, DeviceRegistry, Direction};
pub use engine::{ActionSink, DispatchResult, Engine, EngineOptions, EngineStats};
pub use error::{Error, Result};
pub use learn::{LearnCoordinator, LearnFilter, LearnState};
pub use midi::{EventKind, MidiEvent, Timestamp};
