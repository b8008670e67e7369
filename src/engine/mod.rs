//! Engine - owns the mapping state and runs the consumer side
//!
//! The engine is single-threaded by construction: registry, store, learn
//! session and decoder state are plain fields, mutated only from the thread
//! that calls `tick`. Device callbacks reach it through the bridge's raw
//! queue, other threads through its command channel.
//!
//! Per event: learn (may consume) → noise gate (may drop) → dispatch.

mod dispatch;
mod noise;
mod sink;


pub use dispatch::{dispatch, DispatchResult};
pub use noise::{NoiseGate, NoiseGateOverride, NoiseGateSettings};
pub use sink::{ActionSink, ConsoleSink};

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::bindings::{Binding, BindingId, BindingStore};
use crate::bridge::{AuthoringCommand, BridgeReceiver, RawPacket};
use crate::decoder::{Decoder, DEFAULT_MAX_SYSEX_LEN};
use crate::devices::{DeviceId, DeviceRegistry, Direction};
use crate::error::Result;
use crate::learn::{LearnCoordinator, LearnFilter, LearnState, Offer};
use crate::midi::MidiEvent;

/// Tunables for an engine instance
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Upper bound on raw packets drained per `tick`
    pub max_packets_per_tick: usize,
    pub max_sysex_len: usize,
    /// Swallow the release that follows a learn capture
    pub suppress_release: bool,
    pub noise: NoiseGateSettings,
    pub noise_overrides: Vec<NoiseGateOverride>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_packets_per_tick: 256,
            max_sysex_len: DEFAULT_MAX_SYSEX_LEN,
            suppress_release: true,
            noise: NoiseGateSettings::default(),
            noise_overrides: Vec::new(),
        }
    }
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub decode_errors: u64,
    pub sysex_discarded: u64,
    /// Raw packets evicted from a full bridge queue
    pub dropped_packets: u64,
    /// Events rejected by the noise gate
    pub gated: u64,
    /// Dispatch results delivered to a sink
    pub dispatched: u64,
    /// Events captured by learn
    pub learned: u64,
}

/// Work done by one `tick`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub commands: usize,
    pub packets: usize,
    pub dispatched: usize,
}

pub struct Engine {
    registry: DeviceRegistry,
    store: BindingStore,
    learn: LearnCoordinator,
    decoder: Decoder,
    gate: NoiseGate,
    bridge: Option<BridgeReceiver>,
    /// Action for the binding created from the pending learn capture
    learn_action: Option<Arc<str>>,
    max_packets_per_tick: usize,
    stats: EngineStats,
    /// Reused per packet to avoid holding the decoder borrow while dispatching
    scratch: Vec<MidiEvent>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            store: BindingStore::new(),
            learn: LearnCoordinator::new(options.suppress_release),
            decoder: Decoder::new(options.max_sysex_len),
            gate: NoiseGate::new(options.noise).with_overrides(options.noise_overrides),
            bridge: None,
            learn_action: None,
            max_packets_per_tick: options.max_packets_per_tick.max(1),
            stats: EngineStats::default(),
            scratch: Vec::new(),
        }
    }

    /// Engine fed by the consumer end of a bridge
    pub fn with_bridge(options: EngineOptions, receiver: BridgeReceiver) -> Self {
        let mut engine = Self::new(options);
        engine.bridge = Some(receiver);
        engine
    }

    // =========================================================================
    // Event path
    // =========================================================================

    /// Dispatch results for `event`, bypassing learn and the noise gate
    pub fn process<'a>(
        &'a self,
        event: &'a MidiEvent,
    ) -> impl Iterator<Item = DispatchResult> + 'a {
        dispatch(&self.store, event)
    }

    /// Run one decoded event through learn, gate and dispatch
    ///
    /// Returns the number of results handed to `sink`.
    pub fn handle_event<S>(&mut self, event: MidiEvent, sink: &mut S) -> usize
    where
        S: ActionSink + ?Sized,
    {
        let had_capture = self.learn.state() == LearnState::Captured;
        let event = match self.learn.offer(event) {
            Offer::Consumed => {
                // A suppressed release is consumed without a new capture
                if !had_capture && self.learn.state() == LearnState::Captured {
                    self.stats.learned += 1;
                    self.complete_learn();
                }
                return 0;
            }
            Offer::Pass(event) => event,
        };

        if !self.gate.admit(&event) {
            self.stats.gated += 1;
            return 0;
        }

        let mut count = 0;
        for result in dispatch(&self.store, &event) {
            trace!("Dispatch {} -> {} = {}", result.binding, result.action_ref, result.value);
            sink.on_dispatch(&result);
            count += 1;
        }
        self.stats.dispatched += count as u64;
        count
    }

    /// Decode one raw packet and handle every event in it
    pub fn handle_packet<S>(&mut self, packet: &RawPacket, sink: &mut S) -> usize
    where
        S: ActionSink + ?Sized,
    {
        let mut events = std::mem::take(&mut self.scratch);
        events.extend(
            self.decoder
                .decode(&packet.bytes, packet.timestamp, packet.device),
        );

        let mut count = 0;
        for event in events.drain(..) {
            count += self.handle_event(event, sink);
        }
        self.scratch = events;
        count
    }

    /// Drain the bridge: all pending commands, then up to
    /// `max_packets_per_tick` raw packets. Never blocks.
    pub fn tick<S>(&mut self, sink: &mut S) -> TickSummary
    where
        S: ActionSink + ?Sized,
    {
        let mut summary = TickSummary::default();
        let Some(mut bridge) = self.bridge.take() else {
            return summary;
        };

        while let Some(command) = bridge.try_recv_command() {
            self.apply_command(command);
            summary.commands += 1;
        }

        while summary.packets < self.max_packets_per_tick {
            let Some(packet) = bridge.try_recv_packet() else {
                break;
            };
            summary.dispatched += self.handle_packet(&packet, sink);
            summary.packets += 1;
        }

        self.stats.dropped_packets = bridge.dropped();
        self.bridge = Some(bridge);
        summary
    }

    // =========================================================================
    // Authoring
    // =========================================================================

    /// Apply one authoring command and send its reply
    pub fn apply_command(&mut self, command: AuthoringCommand) {
        debug!("Applying authoring command: {}", command.name());
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            AuthoringCommand::AddBinding { binding, reply } => {
                let _ = reply.send(self.store.add(binding));
            }
            AuthoringCommand::UpdateBinding { id, binding, reply } => {
                let _ = reply.send(self.store.update(id, binding));
            }
            AuthoringCommand::RemoveBinding { id, reply } => {
                let _ = reply.send(self.store.remove(id));
            }
            AuthoringCommand::SetEnabled { id, enabled, reply } => {
                let _ = reply.send(self.store.set_enabled(id, enabled));
            }
            AuthoringCommand::ListBindings { reply } => {
                let _ = reply.send(self.store.iter().cloned().collect());
            }
            AuthoringCommand::ListDevices { reply } => {
                let _ = reply.send(self.registry.list().cloned().collect());
            }
            AuthoringCommand::Load { path, reply } => {
                let _ = reply.send(self.load_bindings(&path));
            }
            AuthoringCommand::Save { path, reply } => {
                let _ = reply.send(self.save_bindings(&path));
            }
            AuthoringCommand::BeginLearn {
                filter,
                action_ref,
                reply,
            } => {
                let result = match action_ref {
                    Some(action_ref) => self.begin_learn_for(filter, action_ref),
                    None => self.begin_learn(filter),
                };
                let _ = reply.send(result);
            }
            AuthoringCommand::CancelLearn { reply } => {
                let _ = reply.send(self.cancel_learn());
            }
            AuthoringCommand::PollLearn { reply } => {
                let _ = reply.send(self.poll_learn());
            }
            AuthoringCommand::LearnState { reply } => {
                let _ = reply.send(self.learn.state());
            }
            AuthoringCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    pub fn begin_learn(&mut self, filter: LearnFilter) -> Result<()> {
        self.learn.begin(filter)
    }

    /// Arm learn; the capture is turned into a binding for `action_ref`
    pub fn begin_learn_for(
        &mut self,
        filter: LearnFilter,
        action_ref: impl Into<Arc<str>>,
    ) -> Result<()> {
        self.learn.begin(filter)?;
        self.learn_action = Some(action_ref.into());
        Ok(())
    }

    pub fn cancel_learn(&mut self) -> bool {
        self.learn_action = None;
        self.learn.cancel()
    }

    pub fn poll_learn(&mut self) -> Option<MidiEvent> {
        self.learn.poll()
    }

    fn complete_learn(&mut self) {
        let Some(action_ref) = self.learn_action.take() else {
            return;
        };
        if let Some(event) = self.learn.poll() {
            let id = self.store.add(Binding::learned(&event, action_ref));
            info!("✅ Learned binding #{} from {}", id, event);
        }
    }

    /// Replace the binding table from a file; the old table survives errors
    pub fn load_bindings(&mut self, path: &Path) -> Result<usize> {
        self.store.load_path(path).inspect_err(|e| {
            warn!("⚠️  Keeping current bindings, load of {} failed: {}", path.display(), e)
        })
    }

    /// `load_bindings` unless the file still holds what this engine last
    /// loaded or saved; `None` when skipped
    pub fn reload_bindings(&mut self, path: &Path) -> Result<Option<usize>> {
        if self.store.is_synced_with(path) {
            debug!("{} unchanged since last load/save, not reloading", path.display());
            return Ok(None);
        }
        self.load_bindings(path).map(Some)
    }

    pub fn save_bindings(&mut self, path: &Path) -> Result<()> {
        self.store.save_path(path)
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Register a discovered endpoint, returning the id to tag its input with
    pub fn on_device_discovered(
        &mut self,
        fingerprint: Option<&str>,
        name: &str,
        direction: Direction,
    ) -> DeviceId {
        let reconnecting = fingerprint
            .and_then(|fp| self.registry.find_by_fingerprint(fp))
            .is_some_and(|device| !device.connected);
        let id = self.registry.on_discovered(fingerprint, name, direction).id;
        self.gate.assign_device(id, name);
        // Wire state from the previous connection must not leak into the new one
        if reconnecting {
            self.decoder.reset_device(id);
        }
        id
    }

    /// Mark a device disconnected
    ///
    /// Its decoder state is kept so packets still queued in the bridge
    /// decode normally; the state is dropped when the device comes back.
    pub fn on_device_removed(&mut self, id: DeviceId) -> bool {
        self.registry.on_removed(id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn stats(&self) -> EngineStats {
        let decode = self.decoder.stats();
        EngineStats {
            decode_errors: decode.errors,
            sysex_discarded: decode.sysex_discarded,
            dropped_packets: self
                .bridge
                .as_ref()
                .map_or(self.stats.dropped_packets, BridgeReceiver::dropped),
            ..self.stats
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    pub fn store(&self) -> &BindingStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut BindingStore {
        &mut self.store
    }

    pub fn learn(&self) -> &LearnCoordinator {
        &self.learn
    }

    pub fn noise_gate(&self) -> &NoiseGate {
        &self.gate
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn binding(&self, id: BindingId) -> Option<&Binding> {
        self.store.get(id)
    }
}
