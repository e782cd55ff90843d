//! Mount-wide accounting of outstanding [`InodePtr`](super::InodePtr)s.
//!
//! Shutdown waits for the count to reach zero. A mount whose owners have all
//! gone away while pointers are still outstanding is parked here and dropped
//! by whichever pointer release brings the count to zero.

use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

type Keepalive = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct RefTracker {
    count: AtomicUsize,
    zero: Notify,
    parked: Mutex<Option<Keepalive>>,
}

impl RefTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        self.zero.notify_waiters();
        // Dropped outside the lock: releasing the last owner tears down the
        // whole mount, including this tracker's other holders.
        let parked = self.parked.lock().take();
        drop(parked);
    }

    /// Keep `owner` alive until the count next reaches zero. If it already
    /// is zero the owner is dropped on return.
    pub fn park(&self, owner: Keepalive) {
        let released = {
            let mut parked = self.parked.lock();
            if self.count() == 0 {
                Some(owner)
            } else {
                *parked = Some(owner);
                None
            }
        };
        drop(released);
    }

    /// Resolve once no pointers are outstanding.
    pub async fn wait_for_zero(&self) {
        loop {
            // Register before checking so a release in between is not missed.
            let notified = self.zero.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for RefTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefTracker")
            .field("count", &self.count())
            .field("parked", &self.parked.lock().is_some())
            .finish()
    }
}
