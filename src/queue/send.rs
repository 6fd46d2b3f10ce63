//! Send queues: one per outbound peer flow.
//!
//! A send queue holds locally produced frames until the peer's cumulative
//! ack retires them. Each pending frame carries its last-transmit
//! timestamp; [`SendQueue::drain`] selects the frames due for (re)
//! transmission and restamps them. Selective acks mark individual frames
//! as not-to-retransmit but never advance the retirement point past a
//! hole; only the cumulative ack does that.
//!
//! Three threads touch a queue: the tick loop enqueues, the receiver
//! applies acks, the transmitter drains. One mutex covers the state;
//! contention is bounded by tick rate times peer count.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use minstant::Instant;

use crate::trace::debug;
use crate::types::{FrameAck, FrameInput, FrameNumber};

struct Pending<C> {
    input: FrameInput<C>,
    last_sent: Option<Instant>,
    acked: bool,
}

struct SendState<C> {
    /// Lowest frame not yet cumulatively acked. Only advances.
    first_unacked: i64,
    /// Frame number the next enqueue must carry.
    next_enqueue: i64,
    pending: BTreeMap<i64, Pending<C>>,
}

/// Outbound frame store with ack-driven retirement and timed
/// retransmission.
pub struct SendQueue<C> {
    state: Mutex<SendState<C>>,
}

impl<C: Clone> SendQueue<C> {
    /// Creates an empty queue whose first frame will be `first_frame`.
    #[must_use]
    pub fn new(first_frame: FrameNumber) -> Self {
        Self {
            state: Mutex::new(SendState {
                first_unacked: first_frame.0,
                next_enqueue: first_frame.0,
                pending: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SendState<C>> {
        self.state.lock().expect("send queue lock poisoned")
    }

    /// Appends a locally produced frame, never transmitted yet.
    ///
    /// Frame numbers must arrive in strictly increasing order; anything
    /// below the expected next number is dropped with a log, since it
    /// could only be a frame the flow has already carried.
    pub fn enqueue(&self, input: FrameInput<C>) {
        let mut state = self.lock();
        let frame = input.number.0;
        if frame < state.next_enqueue {
            debug!(frame = frame, expected = state.next_enqueue, "stale enqueue dropped");
            return;
        }
        state.next_enqueue = frame + 1;
        state.pending.insert(
            frame,
            Pending {
                input,
                last_sent: None,
                acked: false,
            },
        );
    }

    /// Applies an ack snapshot from the peer.
    ///
    /// Every pending frame at or below the cumulative ack is retired.
    /// Selectively acked frames above it are kept but flagged so they
    /// are never retransmitted; a later cumulative ack retires them.
    pub fn on_ack(&self, ack: &FrameAck) {
        let mut state = self.lock();
        let retired = ack.cumulative.0 + 1;
        if retired > state.first_unacked {
            state.first_unacked = retired;
            state.pending = state.pending.split_off(&retired);
        }
        for frame in &ack.selective {
            if frame.0 >= state.first_unacked {
                if let Some(pending) = state.pending.get_mut(&frame.0) {
                    pending.acked = true;
                }
            }
        }
    }

    /// Returns the frames due for transmission at `now`: never-sent
    /// frames and frames whose last transmit is at least
    /// `retransmit_interval` old, excluding selectively acked ones.
    /// Selected frames are restamped to `now`.
    #[must_use]
    pub fn drain(&self, now: Instant, retransmit_interval: Duration) -> Vec<FrameInput<C>> {
        let mut state = self.lock();
        let mut due = Vec::new();
        for pending in state.pending.values_mut() {
            if pending.acked {
                continue;
            }
            let ready = match pending.last_sent {
                None => true,
                Some(sent) => now.duration_since(sent) >= retransmit_interval,
            };
            if ready {
                pending.last_sent = Some(now);
                due.push(pending.input.clone());
            }
        }
        due
    }

    /// Lowest frame the peer has not cumulatively acked.
    #[must_use]
    pub fn first_unacked(&self) -> FrameNumber {
        FrameNumber(self.lock().first_unacked)
    }

    /// Number of frames still held (including selectively acked ones).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether every enqueued frame has been cumulatively acked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }
}
