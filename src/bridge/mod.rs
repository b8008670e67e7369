//! Transport bridge between device I/O threads and the consumer
//!
//! Raw input takes one bounded lock-free queue shared by every device
//! callback. Producers never block: when the consumer stalls, the oldest
//! packet is evicted and counted. Authoring commands take a separate
//! unbounded channel and are never dropped.
//!
//! ```text
//! midir callback ─┐
//! midir callback ─┼─ InputHandle::deliver ─> [ArrayQueue] ─┐
//! shell thread ──── BridgeSender::submit ──> [mpsc] ───────┴─> BridgeReceiver (Engine::tick)
//! ```

pub mod commands;
pub mod queue;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::bindings::{Binding, BindingId};
use crate::devices::{Device, DeviceId};
use crate::engine::{DispatchResult, EngineStats};
use crate::error::{Error, Result};
use crate::learn::{LearnFilter, LearnState};
use crate::midi::{MidiEvent, Timestamp};

pub use commands::AuthoringCommand;
pub use queue::DropOldestQueue;

/// Default raw packet queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One buffer as delivered by a device callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub device: DeviceId,
    pub bytes: Vec<u8>,
    pub timestamp: Timestamp,
}

/// Create a bridge whose raw queue holds `capacity` packets
pub fn channel(capacity: usize) -> (BridgeSender, BridgeReceiver) {
    let packets = Arc::new(DropOldestQueue::new(capacity));
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    (
        BridgeSender {
            packets: Arc::clone(&packets),
            cmd_tx,
        },
        BridgeReceiver { packets, cmd_rx },
    )
}

/// Producer side; cheap to clone into any thread
#[derive(Clone)]
pub struct BridgeSender {
    packets: Arc<DropOldestQueue<RawPacket>>,
    cmd_tx: mpsc::UnboundedSender<AuthoringCommand>,
}

impl BridgeSender {
    /// Handle that tags every buffer with `device`
    pub fn input(&self, device: DeviceId) -> InputHandle {
        InputHandle {
            device,
            packets: Arc::clone(&self.packets),
        }
    }

    /// Queue a command; fails only if the consumer is gone
    pub fn submit(&self, command: AuthoringCommand) -> Result<()> {
        trace!("Submitting authoring command: {}", command.name());
        self.cmd_tx.send(command).map_err(|_| Error::Disconnected)
    }

    /// Raw packets evicted so far
    pub fn dropped(&self) -> u64 {
        self.packets.dropped()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> AuthoringCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.submit(make(reply))?;
        response.await.map_err(|_| Error::Disconnected)
    }

    pub async fn add_binding(&self, binding: Binding) -> Result<BindingId> {
        self.request(|reply| AuthoringCommand::AddBinding { binding, reply })
            .await
    }

    pub async fn update_binding(&self, id: BindingId, binding: Binding) -> Result<()> {
        self.request(|reply| AuthoringCommand::UpdateBinding { id, binding, reply })
            .await?
    }

    pub async fn remove_binding(&self, id: BindingId) -> Result<Binding> {
        self.request(|reply| AuthoringCommand::RemoveBinding { id, reply })
            .await?
    }

    pub async fn set_enabled(&self, id: BindingId, enabled: bool) -> Result<()> {
        self.request(|reply| AuthoringCommand::SetEnabled { id, enabled, reply })
            .await?
    }

    pub async fn list_bindings(&self) -> Result<Vec<Binding>> {
        self.request(|reply| AuthoringCommand::ListBindings { reply })
            .await
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        self.request(|reply| AuthoringCommand::ListDevices { reply })
            .await
    }

    pub async fn load(&self, path: impl Into<PathBuf>) -> Result<usize> {
        let path = path.into();
        self.request(|reply| AuthoringCommand::Load { path, reply })
            .await?
    }

    pub async fn save(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|reply| AuthoringCommand::Save { path, reply })
            .await?
    }

    pub async fn begin_learn(
        &self,
        filter: LearnFilter,
        action_ref: Option<Arc<str>>,
    ) -> Result<()> {
        self.request(|reply| AuthoringCommand::BeginLearn {
            filter,
            action_ref,
            reply,
        })
        .await?
    }

    pub async fn cancel_learn(&self) -> Result<bool> {
        self.request(|reply| AuthoringCommand::CancelLearn { reply })
            .await
    }

    pub async fn poll_learn(&self) -> Result<Option<MidiEvent>> {
        self.request(|reply| AuthoringCommand::PollLearn { reply })
            .await
    }

    pub async fn learn_state(&self) -> Result<LearnState> {
        self.request(|reply| AuthoringCommand::LearnState { reply })
            .await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        self.request(|reply| AuthoringCommand::Stats { reply }).await
    }
}

/// Per-device producer handed to a platform callback
#[derive(Clone)]
pub struct InputHandle {
    device: DeviceId,
    packets: Arc<DropOldestQueue<RawPacket>>,
}

impl InputHandle {
    /// Non-blocking push; returns false when an older packet was evicted
    pub fn deliver(&self, bytes: &[u8], timestamp: Timestamp) -> bool {
        self.packets
            .push(RawPacket {
                device: self.device,
                bytes: bytes.to_vec(),
                timestamp,
            })
            .is_none()
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }
}

/// Consumer side, owned by the engine's thread
pub struct BridgeReceiver {
    packets: Arc<DropOldestQueue<RawPacket>>,
    cmd_rx: mpsc::UnboundedReceiver<AuthoringCommand>,
}

impl BridgeReceiver {
    pub fn try_recv_packet(&self) -> Option<RawPacket> {
        self.packets.pop()
    }

    pub fn try_recv_command(&mut self) -> Option<AuthoringCommand> {
        self.cmd_rx.try_recv().ok()
    }

    pub fn dropped(&self) -> u64 {
        self.packets.dropped()
    }

    /// Packets waiting in the queue
    pub fn pending(&self) -> usize {
        self.packets.len()
    }
}

/// Create an outbound queue for dispatches consumed on another thread
pub fn dispatch_queue(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    let queue = Arc::new(DropOldestQueue::new(capacity));
    (
        DispatchSender {
            queue: Arc::clone(&queue),
        },
        DispatchReceiver { queue },
    )
}

/// Engine-side end of the outbound queue; an `ActionSink`
#[derive(Clone)]
pub struct DispatchSender {
    queue: Arc<DropOldestQueue<DispatchResult>>,
}

impl DispatchSender {
    pub fn send(&self, result: DispatchResult) {
        self.queue.push(result);
    }
}

/// Host-side end of the outbound queue
pub struct DispatchReceiver {
    queue: Arc<DropOldestQueue<DispatchResult>>,
}

impl DispatchReceiver {
    pub fn try_recv(&self) -> Option<DispatchResult> {
        self.queue.pop()
    }

    /// Everything currently queued, oldest first
    pub fn drain(&self) -> impl Iterator<Item = DispatchResult> + '_ {
        std::iter::from_fn(move || self.queue.pop())
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_handles_share_one_queue_in_arrival_order() {
        let (tx, rx) = channel(8);
        let a = tx.input(DeviceId::from_raw(1));
        let b = tx.input(DeviceId::from_raw(2));

        assert!(a.deliver(&[0x90, 60, 100], 1));
        assert!(b.deliver(&[0xB0, 1, 2], 2));
        assert!(a.deliver(&[0x80, 60, 0], 3));

        let order: Vec<_> = std::iter::from_fn(|| rx.try_recv_packet())
            .map(|p| (p.device.as_raw(), p.timestamp))
            .collect();
        assert_eq!(order, vec![(1, 1), (2, 2), (1, 3)]);
    }

    #[test]
    fn test_overflow_n_plus_one_drops_exactly_one() {
        let capacity = 4;
        let (tx, rx) = channel(capacity);
        let input = tx.input(DeviceId::from_raw(1));
        for ts in 0..capacity as u64 {
            assert!(input.deliver(&[0xF8], ts));
        }
        assert!(!input.deliver(&[0xF8], 99));

        assert_eq!(rx.dropped(), 1);
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.pending(), capacity);
        // Oldest (ts 0) is gone
        assert_eq!(rx.try_recv_packet().map(|p| p.timestamp), Some(1));
    }

    #[test]
    fn test_delivery_from_other_threads() {
        let (tx, rx) = channel(64);
        let handles: Vec<_> = (0..4u64)
            .map(|d| {
                let input = tx.input(DeviceId::from_raw(d));
                std::thread::spawn(move || {
                    for ts in 0..10 {
                        input.deliver(&[0xB0, 1, ts as u8], ts);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let packets: Vec<_> = std::iter::from_fn(|| rx.try_recv_packet()).collect();
        assert_eq!(packets.len(), 40);
        // Per-device order survives interleaving
        for d in 0..4u64 {
            let stamps: Vec<_> = packets
                .iter()
                .filter(|p| p.device.as_raw() == d)
                .map(|p| p.timestamp)
                .collect();
            assert_eq!(stamps, (0..10).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_submit_fails_when_consumer_gone() {
        let (tx, rx) = channel(4);
        drop(rx);
        assert!(matches!(tx.stats().await, Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn test_dropped_reply_is_disconnected() {
        let (tx, mut rx) = channel(4);
        let pending = tokio::spawn(async move { tx.learn_state().await });
        // Consumer takes the command and drops the reply sender
        loop {
            if let Some(command) = rx.try_recv_command() {
                assert_eq!(command.name(), "learn_state");
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(matches!(pending.await.unwrap(), Err(Error::Disconnected)));
    }
}
