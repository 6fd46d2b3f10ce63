//! The frame-advance barrier.
//!
//! One readiness flag per remote peer, all guarded by a single mutex with
//! a single condvar. Receive queues report head-occupancy changes through
//! [`BarrierHandle`]; the tick loop blocks in [`FrameBarrier::wait_all`]
//! until every flag is up. Flags start down and a flag only goes down
//! again when a pop leaves that peer's next head empty, so readiness is
//! monotone between pops.
//!
//! Waits are bounded so a stop request is observed promptly even while
//! every peer is stalled.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::queue::receive::ReadyNotifier;
use crate::trace::trace;
use crate::types::HostId;

const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Readiness barrier over a fixed set of remote peers.
pub struct FrameBarrier {
    flags: Mutex<BTreeMap<HostId, bool>>,
    cond: Condvar,
}

impl FrameBarrier {
    /// Creates a barrier with one flag per peer, all unready.
    #[must_use]
    pub fn new(peers: impl IntoIterator<Item = HostId>) -> Self {
        Self {
            flags: Mutex::new(peers.into_iter().map(|id| (id, false)).collect()),
            cond: Condvar::new(),
        }
    }

    /// Returns the notifier for one peer's receive queue.
    #[must_use]
    pub fn handle(self: &Arc<Self>, host: HostId) -> BarrierHandle {
        BarrierHandle {
            barrier: Arc::clone(self),
            host,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<HostId, bool>> {
        self.flags.lock().expect("barrier lock poisoned")
    }

    fn update(&self, host: HostId, ready: bool) {
        let mut flags = self.lock();
        flags.insert(host, ready);
        if ready {
            self.cond.notify_all();
        }
    }

    /// Whether every peer's head is currently ready. Vacuously true with
    /// no peers.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.lock().values().all(|&ready| ready)
    }

    /// Blocks until every peer's head is ready or `stop` is raised.
    ///
    /// Returns `true` when the barrier opened, `false` when the wait was
    /// abandoned because of the stop flag.
    #[must_use]
    pub fn wait_all(&self, stop: &AtomicBool) -> bool {
        let mut flags = self.lock();
        loop {
            if flags.values().all(|&ready| ready) {
                return true;
            }
            if stop.load(Ordering::Relaxed) {
                trace!("barrier wait abandoned by stop request");
                return false;
            }
            let (guard, _timeout) = self
                .cond
                .wait_timeout(flags, WAIT_SLICE)
                .expect("barrier lock poisoned");
            flags = guard;
        }
    }
}

/// Per-peer notifier handed to that peer's receive queue.
pub struct BarrierHandle {
    barrier: Arc<FrameBarrier>,
    host: HostId,
}

impl ReadyNotifier for BarrierHandle {
    fn head_changed(&self, ready: bool) {
        self.barrier.update(self.host, ready);
    }
}
