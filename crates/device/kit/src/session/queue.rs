//! FIFO queue of device intents
//!
//! Every exchange with a device goes through the queue, so two callers never
//! interleave their APDUs. The queue is a fair mutex: waiters are served in
//! arrival order. A device action holds one slot for its whole run.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use derive_more::Display;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Kind of work queued on a session
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentType {
    /// Raw APDU
    #[display("send-apdu")]
    SendApdu,
    /// Typed command
    #[display("send-command")]
    SendCommand,
    /// Device action
    #[display("device-action")]
    DeviceAction,
    /// Background state poll
    #[display("refresh")]
    Refresh,
}

/// Serializes device intents
#[derive(Debug, Default)]
pub struct IntentQueue {
    slot: Arc<Mutex<()>>,
    next_ticket: AtomicU64,
}

impl IntentQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for our turn
    pub async fn enqueue(&self, intent: IntentType) -> IntentGuard {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let queued_at = Instant::now();
        trace!(ticket, %intent, "Intent queued");
        let guard = Arc::clone(&self.slot).lock_owned().await;
        trace!(ticket, %intent, waited = ?queued_at.elapsed(), "Intent started");
        IntentGuard {
            _guard: guard,
            ticket,
            intent,
        }
    }

    /// Take the slot only if nothing is running or waiting
    pub fn try_enqueue(&self, intent: IntentType) -> Option<IntentGuard> {
        let guard = Arc::clone(&self.slot).try_lock_owned().ok()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        trace!(ticket, %intent, "Intent started");
        Some(IntentGuard {
            _guard: guard,
            ticket,
            intent,
        })
    }

    /// Whether an intent currently holds the slot
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

/// The running intent; the next one starts when this is dropped
#[derive(Debug)]
pub struct IntentGuard {
    _guard: OwnedMutexGuard<()>,
    ticket: u64,
    intent: IntentType,
}

impl IntentGuard {
    /// Kind of the running intent
    pub const fn intent(&self) -> IntentType {
        self.intent
    }
}

impl Drop for IntentGuard {
    fn drop(&mut self) {
        trace!(ticket = self.ticket, intent = %self.intent, "Intent finished");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex as SyncMutex;

    use super::*;

    #[tokio::test]
    async fn test_intents_run_in_arrival_order() {
        let queue = Arc::new(IntentQueue::new());
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let first = queue.enqueue(IntentType::DeviceAction).await;
        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = queue.enqueue(IntentType::SendApdu).await;
                order.lock().push(i);
            }));
            // Let the task reach the queue before spawning the next one
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(order.lock().is_empty());
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_try_enqueue_skips_when_busy() {
        let queue = IntentQueue::new();
        let guard = queue.enqueue(IntentType::SendCommand).await;
        assert!(queue.is_busy());
        assert!(queue.try_enqueue(IntentType::Refresh).is_none());
        drop(guard);
        let guard = queue.try_enqueue(IntentType::Refresh).unwrap();
        assert_eq!(guard.intent(), IntentType::Refresh);
    }
}
