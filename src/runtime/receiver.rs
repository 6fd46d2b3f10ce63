//! Receiver execution context.
//!
//! Blocks on the socket, demuxes each datagram into either a receive
//! queue push (posting the resulting ack snapshot for the transmitter)
//! or a send-queue ack application. The receiver is the only writer of
//! receive-queue slots and the only caller of ack application.
//!
//! Damaged or foreign datagrams are logged and dropped. A datagram that
//! decodes but names an unknown host, or carries an impossible frame
//! number, is a protocol violation and tears the session down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::net::{Endpoint, SocketPoller, UdpSocket};
use crate::queue::receive::ReceiveQueue;
use crate::queue::send::SendQueue;
use crate::trace::{debug, error, trace};
use crate::types::HostId;
use crate::wire::{decode_datagram, Command, Datagram, MAX_DATAGRAM_SIZE};

use super::{AckBoard, FatalCell, SessionError};

/// How long one socket wait may last before the stop flag is rechecked.
const POLL_TIMEOUT: Duration = Duration::from_millis(20);

pub(crate) struct Receiver<C> {
    socket: Arc<UdpSocket>,
    poller: SocketPoller,
    receive_queues: BTreeMap<HostId, Arc<dyn ReceiveQueue<C>>>,
    send_queues: BTreeMap<HostId, Arc<SendQueue<C>>>,
    acks: Arc<AckBoard>,
    stop: Arc<AtomicBool>,
    fatal: Arc<FatalCell>,
    buf: Vec<u8>,
}

impl<C: Command> Receiver<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        poller: SocketPoller,
        receive_queues: BTreeMap<HostId, Arc<dyn ReceiveQueue<C>>>,
        send_queues: BTreeMap<HostId, Arc<SendQueue<C>>>,
        acks: Arc<AckBoard>,
        stop: Arc<AtomicBool>,
        fatal: Arc<FatalCell>,
    ) -> Self {
        Self {
            socket,
            poller,
            receive_queues,
            send_queues,
            acks,
            stop,
            fatal,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Runs until the stop flag is raised or a fatal condition occurs.
    pub(crate) fn run(mut self) {
        trace!("receiver started");
        if let Err(err) = self.run_inner() {
            error!(error = %err, "receiver tearing session down");
            self.fatal.set(err);
            self.stop.store(true, Ordering::Relaxed);
        }
        trace!("receiver exiting");
    }

    fn run_inner(&mut self) -> Result<(), SessionError> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            self.poller.wait(POLL_TIMEOUT)?;
            loop {
                let Some((len, from)) = self.socket.try_recv_from(&mut self.buf)? else {
                    break;
                };
                if len == 0 {
                    continue;
                }
                self.handle_datagram(len, from)?;
            }
        }
    }

    fn handle_datagram(&mut self, len: usize, _from: Endpoint) -> Result<(), SessionError> {
        let datagram = match decode_datagram::<C>(&self.buf[..len]) {
            Ok(d) => d,
            Err(e) if e.is_protocol_violation() => return Err(e.into()),
            Err(_e) => {
                debug!(from = %_from, error = %_e, "malformed datagram dropped");
                return Ok(());
            }
        };

        match datagram {
            Datagram::Inputs { sender, inputs } => {
                let Some(queue) = self.receive_queues.get(&sender) else {
                    return Err(SessionError::UnknownSender(sender));
                };
                trace!(
                    sender = %sender,
                    count = inputs.len(),
                    "inputs received"
                );
                let ack = queue.push_batch(inputs);
                self.acks.post(sender, ack);
            }
            Datagram::Acks { sender, acks } => {
                let Some(send_queue) = self.send_queues.get(&sender) else {
                    return Err(SessionError::UnknownSender(sender));
                };
                trace!(sender = %sender, count = acks.len(), "acks received");
                for ack in &acks {
                    send_queue.on_ack(ack);
                }
            }
        }
        Ok(())
    }
}
