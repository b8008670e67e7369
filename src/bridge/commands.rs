//! Authoring commands sent to the engine from other threads
//!
//! Every command carries a oneshot reply channel. The consumer applies them
//! at the start of each tick, so bindings are never mutated while a packet
//! is being dispatched.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::bindings::{Binding, BindingId};
use crate::devices::Device;
use crate::engine::EngineStats;
use crate::error::Result;
use crate::learn::{LearnFilter, LearnState};
use crate::midi::MidiEvent;

pub enum AuthoringCommand {
    AddBinding {
        binding: Binding,
        reply: oneshot::Sender<BindingId>,
    },
    UpdateBinding {
        id: BindingId,
        binding: Binding,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveBinding {
        id: BindingId,
        reply: oneshot::Sender<Result<Binding>>,
    },
    SetEnabled {
        id: BindingId,
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Snapshot of the table in authoring order
    ListBindings {
        reply: oneshot::Sender<Vec<Binding>>,
    },
    ListDevices {
        reply: oneshot::Sender<Vec<Device>>,
    },
    /// Replace the table from a file (JSON or YAML by extension)
    Load {
        path: PathBuf,
        reply: oneshot::Sender<Result<usize>>,
    },
    Save {
        path: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Arm learn; with an `action_ref` the capture becomes a binding
    BeginLearn {
        filter: LearnFilter,
        action_ref: Option<Arc<str>>,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelLearn {
        reply: oneshot::Sender<bool>,
    },
    PollLearn {
        reply: oneshot::Sender<Option<MidiEvent>>,
    },
    LearnState {
        reply: oneshot::Sender<LearnState>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

impl AuthoringCommand {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AuthoringCommand::AddBinding { .. } => "add_binding",
            AuthoringCommand::UpdateBinding { .. } => "update_binding",
            AuthoringCommand::RemoveBinding { .. } => "remove_binding",
            AuthoringCommand::SetEnabled { .. } => "set_enabled",
            AuthoringCommand::ListBindings { .. } => "list_bindings",
            AuthoringCommand::ListDevices { .. } => "list_devices",
            AuthoringCommand::Load { .. } => "load",
            AuthoringCommand::Save { .. } => "save",
            AuthoringCommand::BeginLearn { .. } => "begin_learn",
            AuthoringCommand::CancelLearn { .. } => "cancel_learn",
            AuthoringCommand::PollLearn { .. } => "poll_learn",
            AuthoringCommand::LearnState { .. } => "learn_state",
            AuthoringCommand::Stats { .. } => "stats",
        }
    }
}
