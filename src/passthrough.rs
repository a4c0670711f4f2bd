//! RTP passthrough fan-out.
//!
//! Subscribers receive the camera's RTP packets (possibly re-encoded by
//! the format processor) without any decode step. Each subscriber owns a
//! bounded queue and a dedicated dispatch thread, so one slow consumer
//! can never stall the packet receive loop or its sibling subscribers:
//! when a queue is full the unit is dropped for that subscriber only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::{CameraError, Result};
use crate::media::rtp::RtpPacket;

/// Opaque handle identifying one passthrough subscription.
pub type SubscriptionId = u64;

/// Invoked on the subscriber's dispatch thread with the RTP packets of
/// one processed unit, in stream order.
pub type PacketCallback = Box<dyn Fn(&[RtpPacket]) + Send + 'static>;

struct Subscriber {
    sender: SyncSender<Arc<Vec<RtpPacket>>>,
    handle: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

/// Registry of passthrough subscribers.
///
/// `publish` is wait-free with respect to subscribers: packets are
/// cloned by `Arc` into each subscriber's queue with `try_send`, and a
/// full queue costs a counter increment, nothing more.
pub struct PassthroughRegistry {
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

impl Default for PassthroughRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PassthroughRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber with a queue of `buffer_size` units.
    ///
    /// The callback runs on a dedicated thread owned by the registry and
    /// is never invoked again once [`unsubscribe`](Self::unsubscribe)
    /// returns.
    pub fn subscribe(&self, buffer_size: usize, callback: PacketCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::sync_channel::<Arc<Vec<RtpPacket>>>(buffer_size);

        let handle = thread::Builder::new()
            .name(format!("rtp-passthrough-{id}"))
            .spawn(move || {
                // exits when the sender side is dropped at unsubscribe
                while let Ok(unit) = receiver.recv() {
                    callback(&unit);
                }
            })
            .map_err(|e| tracing::error!(error = %e, "spawning passthrough dispatch thread"))
            .ok();

        self.subscribers.lock().insert(
            id,
            Subscriber {
                sender,
                handle,
                dropped: Arc::new(AtomicU64::new(0)),
            },
        );
        tracing::info!(subscription = id, buffer_size, "RTP passthrough subscriber added");
        id
    }

    /// Fan one processed unit's packets out to every subscriber.
    ///
    /// Subscribers whose queue is full miss this unit.
    pub fn publish(&self, packets: Arc<Vec<RtpPacket>>) {
        let subscribers = self.subscribers.lock();
        for (id, sub) in subscribers.iter() {
            match sub.sender.try_send(Arc::clone(&packets)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(subscription = id, dropped, "passthrough queue full, unit dropped");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    /// Remove a subscriber and wait for its dispatch thread to finish.
    ///
    /// In-flight queued units are still delivered; after this returns
    /// the callback will not run again.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let Some(sub) = self.subscribers.lock().remove(&id) else {
            return Err(CameraError::SubscriptionNotFound(id));
        };
        Self::shut_down(id, sub);
        Ok(())
    }

    /// Remove every subscriber, joining each dispatch thread.
    pub fn unsubscribe_all(&self) {
        let drained: Vec<_> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.drain().collect()
        };
        for (id, sub) in drained {
            Self::shut_down(id, sub);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    fn shut_down(id: SubscriptionId, sub: Subscriber) {
        let dropped = sub.dropped.load(Ordering::Relaxed);
        // dropping the sender closes the channel; the thread drains the
        // queue and exits
        drop(sub.sender);
        if let Some(handle) = sub.handle {
            if handle.join().is_err() {
                tracing::warn!(subscription = id, "passthrough dispatch thread panicked");
            }
        }
        tracing::info!(subscription = id, dropped, "RTP passthrough subscriber removed");
    }
}

impl Drop for PassthroughRegistry {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn packet(sequence: u16) -> RtpPacket {
        RtpPacket {
            payload_type: 96,
            sequence,
            timestamp: 0,
            ssrc: 1,
            marker: true,
            payload: vec![0x41],
        }
    }

    #[test]
    fn delivers_units_in_order() {
        let registry = PassthroughRegistry::new();
        let (tx, rx) = channel();
        registry.subscribe(
            16,
            Box::new(move |packets| {
                let _ = tx.send(packets[0].sequence);
            }),
        );

        for seq in 0..8u16 {
            registry.publish(Arc::new(vec![packet(seq)]));
        }
        registry.unsubscribe_all();

        let received: Vec<u16> = rx.try_iter().collect();
        assert_eq!(received, (0..8).collect::<Vec<u16>>());
    }

    #[test]
    fn fans_out_to_every_subscriber() {
        let registry = PassthroughRegistry::new();
        let (tx_a, rx_a) = channel();
        let (tx_b, rx_b) = channel();
        registry.subscribe(4, Box::new(move |p| drop(tx_a.send(p.len()))));
        registry.subscribe(4, Box::new(move |p| drop(tx_b.send(p.len()))));
        assert_eq!(registry.len(), 2);

        registry.publish(Arc::new(vec![packet(1), packet(2)]));
        registry.unsubscribe_all();

        assert_eq!(rx_a.try_iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(rx_b.try_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let registry = PassthroughRegistry::new();
        let (gate_tx, gate_rx) = channel::<()>();
        let (seen_tx, seen_rx) = channel();
        let gate = Mutex::new(gate_rx);
        registry.subscribe(
            1,
            Box::new(move |packets| {
                // hold the first delivery until the test releases it
                let _ = gate.lock().recv_timeout(Duration::from_secs(5));
                let _ = seen_tx.send(packets[0].sequence);
            }),
        );

        // first unit occupies the thread, second fills the queue, the
        // rest must drop without publish ever blocking
        for seq in 0..5u16 {
            registry.publish(Arc::new(vec![packet(seq)]));
        }
        for _ in 0..5 {
            let _ = gate_tx.send(());
        }
        registry.unsubscribe_all();

        let seen: Vec<u16> = seen_rx.try_iter().collect();
        assert!(seen.len() < 5, "expected drops, saw {seen:?}");
        assert_eq!(seen.first(), Some(&0));
    }

    #[test]
    fn no_callbacks_after_unsubscribe_returns() {
        let registry = PassthroughRegistry::new();
        let fired_late = Arc::new(AtomicBool::new(false));
        let unsubscribed = Arc::new(AtomicBool::new(false));

        let fired = Arc::clone(&fired_late);
        let done = Arc::clone(&unsubscribed);
        let id = registry.subscribe(
            4,
            Box::new(move |_| {
                if done.load(Ordering::SeqCst) {
                    fired.store(true, Ordering::SeqCst);
                }
            }),
        );

        registry.publish(Arc::new(vec![packet(0)]));
        registry.unsubscribe(id).unwrap();
        unsubscribed.store(true, Ordering::SeqCst);
        registry.publish(Arc::new(vec![packet(1)]));

        assert!(!fired_late.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn unsubscribe_unknown_id_errors() {
        let registry = PassthroughRegistry::new();
        assert!(matches!(
            registry.unsubscribe(999),
            Err(CameraError::SubscriptionNotFound(999))
        ));
    }
}
