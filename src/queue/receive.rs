//! Receive queues: one per remote sender.
//!
//! A receive queue reassembles a contiguous prefix of an infinite frame
//! stream. Frames may arrive out of order, duplicated, or repeatedly
//! (retransmissions); extraction is strictly in order, one consumer, no
//! gaps. Every push returns an acknowledgement snapshot reflecting the
//! queue state after that push, ready to be sent back to the sender.
//!
//! Two implementations share the [`ReceiveQueue`] contract:
//!
//! - [`RingReceiveQueue`]: a fixed slot array indexed by
//!   `frame mod capacity`. The acceptance window is
//!   `[base, base + capacity - 1]`; anything outside is dropped and will
//!   be retransmitted once the window has slid. This is the variant the
//!   session runtime uses.
//! - [`MapReceiveQueue`]: an ordered map with the same window and ack
//!   semantics, suited to fan-out services that relay many streams and
//!   prefer sparse storage over preallocated slots.
//!
//! Readiness of the head slot is reported to an injected
//! [`ReadyNotifier`]. Notifications fire while the queue's state lock is
//! held, so for a given sender they are totally ordered: a `true` from a
//! push filling the head and a `false`/`true` from a pop can never be
//! observed out of order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::trace::{debug, trace};
use crate::types::{FrameAck, FrameInput, FrameNumber};

/// Callback through which a queue reports head-slot occupancy changes.
///
/// Implemented by the frame barrier; injected so the queue retains no
/// back-reference to the synchronization machinery that consumes it.
pub trait ReadyNotifier: Send + Sync {
    /// Called with `true` when the head slot becomes occupied and with
    /// `false` when a pop leaves the next head empty.
    fn head_changed(&self, ready: bool);
}

/// In-order single-consumer frame queue with out-of-order insertion.
///
/// Any number of threads may push; at most one thread pops.
pub trait ReceiveQueue<C>: Send + Sync {
    /// Inserts one frame input, returning the ack snapshot after the
    /// insertion was applied (or refused).
    fn push(&self, input: FrameInput<C>) -> FrameAck;

    /// Inserts a batch of frame inputs, returning one ack snapshot after
    /// all of them were applied.
    fn push_batch(&self, inputs: Vec<FrameInput<C>>) -> FrameAck;

    /// Extracts the frame at the head, if present. Never skips a gap.
    fn pop(&self) -> Option<FrameInput<C>>;

    /// Whether the head slot is currently occupied.
    fn head_ready(&self) -> bool;

    /// The current ack snapshot, without mutating anything.
    fn ack(&self) -> FrameAck;
}

/// Shared bookkeeping for the contiguous-prefix / selective-set tracking
/// both variants perform.
///
/// `last_in_order` is the highest frame such that everything from the
/// first frame through it has been received; `selective` holds received
/// frames above that, each inside the acceptance window.
#[derive(Debug)]
struct AckState {
    last_in_order: i64,
    selective: BTreeSet<i64>,
}

impl AckState {
    fn new(first_frame: i64) -> Self {
        Self {
            last_in_order: first_frame - 1,
            selective: BTreeSet::new(),
        }
    }

    /// Records `frame` as received, chaining `last_in_order` through any
    /// now-contiguous selective entries.
    fn record(&mut self, frame: i64) {
        if frame == self.last_in_order + 1 {
            self.last_in_order += 1;
            while self.selective.first() == Some(&(self.last_in_order + 1)) {
                self.selective.pop_first();
                self.last_in_order += 1;
            }
        } else {
            self.selective.insert(frame);
        }
    }

    fn snapshot(&self) -> FrameAck {
        FrameAck::new(
            FrameNumber(self.last_in_order),
            self.selective.iter().map(|&f| FrameNumber(f)).collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Slot-array variant
// ---------------------------------------------------------------------------

struct RingState<C> {
    slots: Box<[Option<FrameInput<C>>]>,
    base: i64,
    ack: AckState,
}

/// Fixed-capacity receive queue storing frames in a slot array.
///
/// # Invariants
///
/// - acceptance window is `[base, base + capacity - 1]`; frames outside
///   it never mutate state
/// - `ack.last_in_order >= base - 1`
/// - every selective entry lies in `(last_in_order, base + capacity - 1]`
///   and its slot is occupied
/// - the head is ready iff `last_in_order >= base`
pub struct RingReceiveQueue<C> {
    state: Mutex<RingState<C>>,
    notifier: Option<Arc<dyn ReadyNotifier>>,
}

impl<C: Send> RingReceiveQueue<C> {
    /// Creates an empty queue whose head expects `first_frame`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or `first_frame` is negative.
    #[must_use]
    pub fn new(
        capacity: usize,
        first_frame: FrameNumber,
        notifier: Option<Arc<dyn ReadyNotifier>>,
    ) -> Self {
        assert!(capacity > 0, "receive capacity must be > 0");
        assert!(first_frame.0 >= 0, "first frame must be non-negative");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            state: Mutex::new(RingState {
                slots: slots.into_boxed_slice(),
                base: first_frame.0,
                ack: AckState::new(first_frame.0),
            }),
            notifier,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingState<C>> {
        self.state.lock().expect("receive queue lock poisoned")
    }

    fn notify(&self, ready: bool) {
        if let Some(notifier) = &self.notifier {
            notifier.head_changed(ready);
        }
    }

    /// Applies one input. Returns whether the head slot went from empty
    /// to occupied.
    fn push_one(state: &mut RingState<C>, input: FrameInput<C>) -> bool {
        let capacity = state.slots.len() as i64;
        let frame = input.number.0;

        if frame < state.base || frame > state.base + capacity - 1 {
            trace!(frame = frame, base = state.base, "frame outside window, dropped");
            return false;
        }
        let idx = (frame % capacity) as usize;
        if state.slots[idx].is_some() {
            debug!(frame = frame, "duplicate frame, dropped");
            return false;
        }

        let fills_head = frame == state.base;
        state.slots[idx] = Some(input);
        state.ack.record(frame);
        fills_head
    }
}

impl<C: Send> ReceiveQueue<C> for RingReceiveQueue<C> {
    fn push(&self, input: FrameInput<C>) -> FrameAck {
        let mut state = self.lock();
        if Self::push_one(&mut state, input) {
            self.notify(true);
        }
        state.ack.snapshot()
    }

    fn push_batch(&self, inputs: Vec<FrameInput<C>>) -> FrameAck {
        let mut state = self.lock();
        let mut head_filled = false;
        for input in inputs {
            head_filled |= Self::push_one(&mut state, input);
        }
        if head_filled {
            self.notify(true);
        }
        state.ack.snapshot()
    }

    fn pop(&self) -> Option<FrameInput<C>> {
        let mut state = self.lock();
        let capacity = state.slots.len() as i64;
        let idx = (state.base % capacity) as usize;

        let input = state.slots[idx].take()?;
        state.base += 1;
        let next_idx = (state.base % capacity) as usize;
        self.notify(state.slots[next_idx].is_some());
        Some(input)
    }

    fn head_ready(&self) -> bool {
        let state = self.lock();
        let idx = (state.base % state.slots.len() as i64) as usize;
        state.slots[idx].is_some()
    }

    fn ack(&self) -> FrameAck {
        self.lock().ack.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Ordered-map variant
// ---------------------------------------------------------------------------

struct MapState<C> {
    commands: BTreeMap<i64, C>,
    base: i64,
    ack: AckState,
}

/// Receive queue storing frames in an ordered map.
///
/// Same window, duplicate, ack, and readiness semantics as
/// [`RingReceiveQueue`]; storage is proportional to the frames actually
/// buffered instead of the window size.
pub struct MapReceiveQueue<C> {
    state: Mutex<MapState<C>>,
    capacity: usize,
    notifier: Option<Arc<dyn ReadyNotifier>>,
}

impl<C: Send> MapReceiveQueue<C> {
    /// Creates an empty queue whose head expects `first_frame`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or `first_frame` is negative.
    #[must_use]
    pub fn new(
        capacity: usize,
        first_frame: FrameNumber,
        notifier: Option<Arc<dyn ReadyNotifier>>,
    ) -> Self {
        assert!(capacity > 0, "receive capacity must be > 0");
        assert!(first_frame.0 >= 0, "first frame must be non-negative");

        Self {
            state: Mutex::new(MapState {
                commands: BTreeMap::new(),
                base: first_frame.0,
                ack: AckState::new(first_frame.0),
            }),
            capacity,
            notifier,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MapState<C>> {
        self.state.lock().expect("receive queue lock poisoned")
    }

    fn notify(&self, ready: bool) {
        if let Some(notifier) = &self.notifier {
            notifier.head_changed(ready);
        }
    }

    fn push_one(&self, state: &mut MapState<C>, input: FrameInput<C>) -> bool {
        let frame = input.number.0;
        if frame < state.base || frame > state.base + self.capacity as i64 - 1 {
            trace!(frame = frame, base = state.base, "frame outside window, dropped");
            return false;
        }
        if state.commands.contains_key(&frame) {
            debug!(frame = frame, "duplicate frame, dropped");
            return false;
        }

        let fills_head = frame == state.base;
        state.commands.insert(frame, input.command);
        state.ack.record(frame);
        fills_head
    }
}

impl<C: Send> ReceiveQueue<C> for MapReceiveQueue<C> {
    fn push(&self, input: FrameInput<C>) -> FrameAck {
        let mut state = self.lock();
        if self.push_one(&mut state, input) {
            self.notify(true);
        }
        state.ack.snapshot()
    }

    fn push_batch(&self, inputs: Vec<FrameInput<C>>) -> FrameAck {
        let mut state = self.lock();
        let mut head_filled = false;
        for input in inputs {
            head_filled |= self.push_one(&mut state, input);
        }
        if head_filled {
            self.notify(true);
        }
        state.ack.snapshot()
    }

    fn pop(&self) -> Option<FrameInput<C>> {
        let mut state = self.lock();
        let frame = state.base;
        let command = state.commands.remove(&frame)?;
        state.base += 1;
        self.notify(state.commands.contains_key(&state.base));
        Some(FrameInput::new(FrameNumber(frame), command))
    }

    fn head_ready(&self) -> bool {
        let state = self.lock();
        state.commands.contains_key(&state.base)
    }

    fn ack(&self) -> FrameAck {
        self.lock().ack.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn input(frame: i64) -> FrameInput<u64> {
        FrameInput::new(FrameNumber(frame), frame as u64 * 100)
    }

    fn ring(capacity: usize, first: i64) -> RingReceiveQueue<u64> {
        RingReceiveQueue::new(capacity, FrameNumber(first), None)
    }

    fn map(capacity: usize, first: i64) -> MapReceiveQueue<u64> {
        MapReceiveQueue::new(capacity, FrameNumber(first), None)
    }

    /// Counts readiness transitions, retaining the latest value.
    struct RecordingNotifier {
        ready_signals: AtomicUsize,
        unready_signals: AtomicUsize,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ready_signals: AtomicUsize::new(0),
                unready_signals: AtomicUsize::new(0),
            })
        }
    }

    impl ReadyNotifier for RecordingNotifier {
        fn head_changed(&self, ready: bool) {
            if ready {
                self.ready_signals.fetch_add(1, Ordering::SeqCst);
            } else {
                self.unready_signals.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Verifies the documented invariants of a queue's ack snapshot
    /// against the frames known to be pushed and popped so far.
    fn assert_ack_well_formed(ack: &FrameAck, window_end: i64) {
        for frame in &ack.selective {
            assert!(
                frame.0 > ack.cumulative.0,
                "selective entry {} not above cumulative {}",
                frame.0,
                ack.cumulative.0
            );
            assert!(frame.0 <= window_end, "selective entry outside window");
        }
        let mut sorted = ack.selective.clone();
        sorted.sort();
        assert_eq!(sorted, ack.selective, "selective set must be ascending");
    }

    fn queues(capacity: usize, first: i64) -> Vec<Box<dyn ReceiveQueue<u64>>> {
        vec![
            Box::new(RingReceiveQueue::new(capacity, FrameNumber(first), None)),
            Box::new(MapReceiveQueue::new(capacity, FrameNumber(first), None)),
        ]
    }

    #[test]
    fn in_order_push_and_pop() {
        for queue in queues(8, 0) {
            let mut last = FrameAck::new(FrameNumber(-1), vec![]);
            for f in 0..4 {
                last = queue.push(input(f));
                assert_eq!(last.cumulative, FrameNumber(f));
                assert!(last.selective.is_empty());
            }
            for f in 0..4 {
                let popped = queue.pop().expect("head ready");
                assert_eq!(popped.number, FrameNumber(f));
                assert_eq!(popped.command, f as u64 * 100);
            }
            assert!(queue.pop().is_none());
            assert_eq!(last.cumulative, FrameNumber(3));
        }
    }

    #[test]
    fn reordered_pushes_ack_sequence() {
        // Push order 2, 0, 1, 4, 3; expected cumulative/selective after
        // each push, then five in-order pops.
        for queue in queues(8, 0) {
            let expectations: [(i64, i64, &[i64]); 5] = [
                (2, -1, &[2]),
                (0, 0, &[2]),
                (1, 2, &[]),
                (4, 2, &[4]),
                (3, 4, &[]),
            ];
            for (frame, cumulative, selective) in expectations {
                let ack = queue.push(input(frame));
                assert_eq!(ack.cumulative, FrameNumber(cumulative), "after push {frame}");
                let expect: Vec<FrameNumber> =
                    selective.iter().map(|&f| FrameNumber(f)).collect();
                assert_eq!(ack.selective, expect, "after push {frame}");
            }
            for f in 0..5 {
                assert_eq!(queue.pop().expect("ready").number, FrameNumber(f));
            }
            assert!(queue.pop().is_none());
        }
    }

    #[test]
    fn duplicates_change_nothing() {
        for queue in queues(8, 0) {
            let first = queue.push(input(0));
            let second = queue.push(input(0));
            let third = queue.push(input(0));
            assert_eq!(first, second);
            assert_eq!(second, third);

            assert_eq!(queue.pop().expect("ready").number, FrameNumber(0));
            assert!(queue.pop().is_none());
        }
    }

    #[test]
    fn frames_outside_window_are_ignored() {
        for queue in queues(4, 0) {
            let ack = queue.push(input(5));
            assert_eq!(ack.cumulative, FrameNumber(-1));
            assert!(ack.selective.is_empty());
            assert!(!queue.head_ready());
            assert!(queue.pop().is_none());

            // Below-window frames (already delivered) are ignored too.
            queue.push(input(0));
            assert_eq!(queue.pop().expect("ready").number, FrameNumber(0));
            let ack = queue.push(input(0));
            assert_eq!(ack.cumulative, FrameNumber(0));
            assert!(!queue.head_ready());
        }
    }

    #[test]
    fn window_slides_with_pops() {
        for queue in queues(4, 0) {
            // Window is [0, 3]; 4 does not fit yet.
            queue.push(input(0));
            queue.push(input(4));
            assert_eq!(queue.ack().cumulative, FrameNumber(0));
            assert_eq!(queue.ack().selective, vec![]);

            // After popping 0 the window is [1, 4].
            queue.pop().expect("ready");
            let ack = queue.push(input(4));
            assert_eq!(ack.selective, vec![FrameNumber(4)]);
        }
    }

    #[test]
    fn nonzero_first_frame() {
        for queue in queues(8, 100) {
            assert_eq!(queue.ack().cumulative, FrameNumber(99));
            queue.push(input(101));
            let ack = queue.push(input(100));
            assert_eq!(ack.cumulative, FrameNumber(101));
            assert_eq!(queue.pop().expect("ready").number, FrameNumber(100));
        }
    }

    #[test]
    fn ack_monotone_over_arbitrary_interleavings() {
        // A handful of fixed permutations with duplicates and
        // out-of-window frames sprinkled in; cumulative must never
        // regress and selective entries must stay above it.
        let permutations: [&[i64]; 4] = [
            &[3, 1, 0, 2, 4, 5, 6, 7],
            &[7, 6, 5, 4, 3, 2, 1, 0],
            &[0, 2, 2, 9, 1, 12, 4, 3, 0, 5, 7, 6],
            &[1, 1, 3, 5, 7, 0, 2, 4, 6, 7],
        ];
        for pushes in permutations {
            for queue in queues(8, 0) {
                let mut last_cumulative = i64::MIN;
                for &frame in pushes {
                    let ack = queue.push(input(frame));
                    assert!(ack.cumulative.0 >= last_cumulative, "cumulative regressed");
                    last_cumulative = ack.cumulative.0;
                    assert_ack_well_formed(&ack, 7);
                }
            }
        }
    }

    #[test]
    fn pops_are_gapless_and_increasing() {
        let pushes: &[i64] = &[2, 5, 0, 3, 1, 7, 4, 6];
        for queue in queues(8, 0) {
            let mut popped = Vec::new();
            for &frame in pushes {
                queue.push(input(frame));
                while let Some(i) = queue.pop() {
                    popped.push(i.number.0);
                }
            }
            assert_eq!(popped, (0..8).collect::<Vec<i64>>());
        }
    }

    #[test]
    fn head_readiness_signalled_on_fill_and_pop() {
        let notifier = RecordingNotifier::new();
        let queue: RingReceiveQueue<u64> =
            RingReceiveQueue::new(8, FrameNumber(0), Some(notifier.clone()));

        // Frame 1 does not touch the head.
        queue.push(input(1));
        assert_eq!(notifier.ready_signals.load(Ordering::SeqCst), 0);

        // Frame 0 fills the head.
        queue.push(input(0));
        assert_eq!(notifier.ready_signals.load(Ordering::SeqCst), 1);

        // Popping 0 leaves 1 at the head: signalled ready again.
        queue.pop().expect("ready");
        assert_eq!(notifier.ready_signals.load(Ordering::SeqCst), 2);

        // Popping 1 leaves an empty head: signalled unready.
        queue.pop().expect("ready");
        assert_eq!(notifier.unready_signals.load(Ordering::SeqCst), 1);

        // A duplicate of a delivered frame signals nothing.
        queue.push(input(0));
        assert_eq!(notifier.ready_signals.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.unready_signals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn map_variant_signals_identically() {
        let notifier = RecordingNotifier::new();
        let queue: MapReceiveQueue<u64> =
            MapReceiveQueue::new(8, FrameNumber(0), Some(notifier.clone()));

        queue.push_batch(vec![input(1), input(2)]);
        assert_eq!(notifier.ready_signals.load(Ordering::SeqCst), 0);
        queue.push(input(0));
        assert_eq!(notifier.ready_signals.load(Ordering::SeqCst), 1);
        queue.pop().expect("ready");
        assert_eq!(notifier.ready_signals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_push_returns_single_snapshot() {
        for queue in queues(8, 0) {
            let ack = queue.push_batch(vec![input(1), input(0), input(3)]);
            assert_eq!(ack.cumulative, FrameNumber(1));
            assert_eq!(ack.selective, vec![FrameNumber(3)]);
        }
    }

    #[test]
    fn variants_agree_on_every_snapshot() {
        let pushes: &[i64] = &[4, 0, 0, 2, 6, 1, 9, 3, 5, 2, 7];
        let ring = ring(8, 0);
        let map = map(8, 0);
        for &frame in pushes {
            assert_eq!(ring.push(input(frame)), map.push(input(frame)), "push {frame}");
            assert_eq!(ring.head_ready(), map.head_ready());
        }
        loop {
            let (a, b) = (ring.pop(), map.pop());
            assert_eq!(a, b);
            if a.is_none() {
                break;
            }
            assert_eq!(ring.ack(), map.ack());
        }
    }

    #[test]
    fn concurrent_pushes_single_popper() {
        use std::sync::Arc;

        let queue = Arc::new(ring(64, 0));
        let mut handles = Vec::new();
        // Four pushers cover the same 48 frames; duplicates are expected
        // and must be absorbed.
        for t in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for f in 0..48i64 {
                    let f = (f + t * 11) % 48;
                    queue.push(input(f));
                }
            }));
        }

        let mut popped = Vec::new();
        while popped.len() < 48 {
            if let Some(i) = queue.pop() {
                popped.push(i.number.0);
            } else {
                std::thread::yield_now();
            }
        }
        for handle in handles {
            handle.join().expect("pusher panicked");
        }
        assert_eq!(popped, (0..48).collect::<Vec<i64>>());
        assert_eq!(queue.ack().cumulative, FrameNumber(47));
        assert!(queue.ack().selective.is_empty());
    }

    #[test]
    #[should_panic(expected = "receive capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = ring(0, 0);
    }
}
