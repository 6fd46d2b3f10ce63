//! Transmitter execution context.
//!
//! Wakes on a short pacing timer and, for every peer flow, drains the
//! frames due for (re)transmission plus any ack snapshot the receiver
//! posted since the last pass. A flow with nothing pending and no
//! outstanding ack emits nothing.
//!
//! A would-block send is counted as loss and left to retransmission;
//! any other send failure is fatal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use minstant::Instant;

use crate::net::{Endpoint, UdpSocket};
use crate::queue::send::SendQueue;
use crate::trace::{error, trace, warn};
use crate::types::HostId;
use crate::wire::{encode_acks, encode_inputs, Command};

use super::{AckBoard, FatalCell, SessionError};

pub(crate) struct Transmitter<C> {
    socket: Arc<UdpSocket>,
    local: HostId,
    flows: BTreeMap<HostId, (Endpoint, Arc<SendQueue<C>>)>,
    acks: Arc<AckBoard>,
    transmit_interval: Duration,
    retransmit_interval: Duration,
    stop: Arc<AtomicBool>,
    fatal: Arc<FatalCell>,
    buf: Vec<u8>,
}

impl<C: Command> Transmitter<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        local: HostId,
        flows: BTreeMap<HostId, (Endpoint, Arc<SendQueue<C>>)>,
        acks: Arc<AckBoard>,
        transmit_interval: Duration,
        retransmit_interval: Duration,
        stop: Arc<AtomicBool>,
        fatal: Arc<FatalCell>,
    ) -> Self {
        Self {
            socket,
            local,
            flows,
            acks,
            transmit_interval,
            retransmit_interval,
            stop,
            fatal,
            buf: Vec::with_capacity(2048),
        }
    }

    /// Runs until the stop flag is raised or a fatal condition occurs.
    pub(crate) fn run(mut self) {
        trace!("transmitter started");
        if let Err(err) = self.run_inner() {
            error!(error = %err, "transmitter tearing session down");
            self.fatal.set(err);
            self.stop.store(true, Ordering::Relaxed);
        }
        trace!("transmitter exiting");
    }

    fn run_inner(&mut self) -> Result<(), SessionError> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            self.transmit_pass()?;
            thread::sleep(self.transmit_interval);
        }
    }

    /// One pacing tick: every flow's due frames, then its pending ack.
    fn transmit_pass(&mut self) -> Result<(), SessionError> {
        let now = Instant::now();
        for (host, (endpoint, queue)) in &self.flows {
            let due = queue.drain(now, self.retransmit_interval);
            if !due.is_empty() {
                trace!(peer = %host, count = due.len(), "sending inputs");
                match encode_inputs(self.local, &due, &mut self.buf) {
                    Ok(()) => {
                        if self.socket.try_send_to(&self.buf, *endpoint)?.is_none() {
                            trace!(peer = %host, "send would block, leaving to retransmission");
                        }
                    }
                    Err(_e) => {
                        warn!(peer = %host, error = %_e, "input batch not encodable, skipped");
                    }
                }
            }

            if let Some(ack) = self.acks.take(*host) {
                trace!(peer = %host, cumulative = %ack.cumulative, "sending ack");
                match encode_acks(self.local, &[ack], &mut self.buf) {
                    Ok(()) => {
                        if self.socket.try_send_to(&self.buf, *endpoint)?.is_none() {
                            trace!(peer = %host, "ack send would block, superseded later");
                        }
                    }
                    Err(_e) => {
                        warn!(peer = %host, error = %_e, "ack batch not encodable, skipped");
                    }
                }
            }
        }
        Ok(())
    }
}
