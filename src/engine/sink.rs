//! Action sinks: where dispatch results go

use tracing::info;

use super::dispatch::DispatchResult;
use crate::bridge::DispatchSender;

/// Receives dispatch results on the consumer thread
///
/// Called once per matching binding per event, in authoring order. The
/// engine never interprets `action_ref`; that is the sink's job.
pub trait ActionSink {
    fn on_dispatch(&mut self, result: &DispatchResult);
}

impl<F> ActionSink for F
where
    F: FnMut(&DispatchResult),
{
    fn on_dispatch(&mut self, result: &DispatchResult) {
        self(result)
    }
}

/// Collects results, mostly for tests and batch callers
impl ActionSink for Vec<DispatchResult> {
    fn on_dispatch(&mut self, result: &DispatchResult) {
        self.push(result.clone());
    }
}

/// Forwards to another thread through the outbound queue
impl ActionSink for DispatchSender {
    fn on_dispatch(&mut self, result: &DispatchResult) {
        self.send(result.clone());
    }
}

/// Logs every dispatch; stands in for a host when running standalone
#[derive(Debug, Default)]
pub struct ConsoleSink {
    count: u64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl ActionSink for ConsoleSink {
    fn on_dispatch(&mut self, result: &DispatchResult) {
        self.count += 1;
        info!(
            "▶ #{} {} = {} ({})",
            self.count, result.action_ref, result.value, result.source
        );
    }
}
