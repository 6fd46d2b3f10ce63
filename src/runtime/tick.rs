//! The tick loop.
//!
//! Per tick: collect the local command, wait for every remote stream's
//! next frame behind the barrier, pop exactly one input per participant
//! in stable host-id order, hand each to the application, advance the
//! frame counter and sleep the interframe interval.
//!
//! Before the loop, the application's priming commands establish the
//! initial pipeline depth: each is pushed like a regular tick's command
//! and advances the frame counter, so the command collected at frame `n`
//! executes `k` frames later.
//!
//! A stalled peer keeps the barrier closed indefinitely; the application
//! sees that through its suspend hook and decides what to do. The loop
//! itself never times a peer out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::barrier::FrameBarrier;
use crate::queue::receive::ReceiveQueue;
use crate::queue::send::SendQueue;
use crate::simulation::Simulation;
use crate::trace::{debug, trace, warn};
use crate::types::{FrameInput, FrameNumber, HostId};
use crate::wire::Command;

pub(crate) struct TickCoordinator<C> {
    local: HostId,
    current_frame: FrameNumber,
    interframe: Duration,
    /// Every participant's receive queue, local included. Host-id order
    /// gives all participants the same pop sequence within a frame.
    queues: BTreeMap<HostId, Arc<dyn ReceiveQueue<C>>>,
    send_queues: BTreeMap<HostId, Arc<SendQueue<C>>>,
    barrier: Arc<FrameBarrier>,
    stop: Arc<AtomicBool>,
}

impl<C: Command> TickCoordinator<C> {
    pub(crate) fn new(
        local: HostId,
        first_frame: FrameNumber,
        interframe: Duration,
        queues: BTreeMap<HostId, Arc<dyn ReceiveQueue<C>>>,
        send_queues: BTreeMap<HostId, Arc<SendQueue<C>>>,
        barrier: Arc<FrameBarrier>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            local,
            current_frame: first_frame,
            interframe,
            queues,
            send_queues,
            barrier,
            stop,
        }
    }

    /// Runs until a stop is requested (externally or by a fatal error in
    /// another context).
    pub(crate) fn run<S>(&mut self, app: &mut S)
    where
        S: Simulation<Command = C>,
    {
        self.prime(app);

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }

            self.collect_local(app.read_input());

            if !self.barrier.all_ready() {
                debug!(frame = %self.current_frame, "inputs missing, suspending");
                app.suspend_simulation();
                if !self.barrier.wait_all(&self.stop) {
                    return;
                }
                app.resume_simulation();
            }

            for (_host, queue) in &self.queues {
                match queue.pop() {
                    Some(input) => app.execute_frame(input),
                    None => warn!(host = %_host, "input missing after barrier release"),
                }
            }

            self.current_frame = self.current_frame.next();
            thread::sleep(self.interframe);
        }
    }

    /// Pushes the priming commands, advancing the frame counter past
    /// them.
    fn prime<S>(&mut self, app: &mut S)
    where
        S: Simulation<Command = C>,
    {
        let commands = app.fill_commands();
        trace!(count = commands.len(), "priming pipeline");
        for command in commands {
            self.collect_local(command);
            self.current_frame = self.current_frame.next();
        }
    }

    /// Fans the command out to every peer flow and loops it back into
    /// the local receive queue.
    fn collect_local(&mut self, command: C) {
        let input = FrameInput::new(self.current_frame, command);
        for send_queue in self.send_queues.values() {
            send_queue.enqueue(input.clone());
        }
        self.queues[&self.local].push(input);
    }
}
