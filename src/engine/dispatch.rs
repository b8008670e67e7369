//! Match & dispatch: one event in, one result per matching binding out

use std::sync::Arc;

use crate::bindings::{ActionValue, BindingId, BindingStore};
use crate::midi::MidiEvent;

/// One binding fired by one event
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub binding: BindingId,
    pub action_ref: Arc<str>,
    pub value: ActionValue,
    /// The event that triggered the binding
    pub source: MidiEvent,
}

/// Results for every enabled binding matching `event`, in authoring order
pub fn dispatch<'a>(
    store: &'a BindingStore,
    event: &'a MidiEvent,
) -> impl Iterator<Item = DispatchResult> + 'a {
    store.find_candidates(event).map(move |binding| DispatchResult {
        binding: binding.id,
        action_ref: Arc::clone(&binding.action_ref),
        value: binding.translate(event),
        source: event.clone(),
    })
}
