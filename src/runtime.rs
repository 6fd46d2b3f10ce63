//! Session runtime: thread lifecycle, fatal-error propagation, and the
//! enrollment summary the session is built from.
//!
//! # Architecture
//!
//! [`Session::start`] spawns two named threads around a shared socket:
//!
//! - **lockstride-rx** ([`receiver`]): the only writer of receive-queue
//!   slots and the only caller of send-queue ack application.
//! - **lockstride-tx** ([`transmitter`]): the only drainer of send
//!   queues.
//!
//! The tick loop itself runs on whichever thread calls [`Session::run`];
//! it is the only consumer of receive queues and the only enqueuer of
//! send queues.
//!
//! Shutdown is a single shared stop flag. Each context observes it at
//! its next suspension point (socket poll, pacing sleep, barrier wait or
//! interframe sleep) and returns; `run` then joins the threads. The
//! first fatal error wins a set-once cell and is returned from `run`;
//! a requested stop returns `Ok(())`. No in-flight frames are flushed.

mod receiver;
mod tick;
mod transmitter;

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::barrier::FrameBarrier;
use crate::config::SessionConfig;
use crate::net::{Endpoint, SocketPoller, UdpSocket};
use crate::queue::receive::{ReadyNotifier, ReceiveQueue, RingReceiveQueue};
use crate::queue::send::SendQueue;
use crate::simulation::Simulation;
use crate::trace::{debug, info, warn};
use crate::types::{FrameAck, FrameNumber, HostId};
use crate::wire::{Command, WireError};

/// A remote participant and the endpoint its flow is sent to.
///
/// With direct rendezvous every peer has its own endpoint; with a relay
/// server performing fan-out, every peer shares the server's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    /// The peer's host id.
    pub id: HostId,
    /// Destination for datagrams belonging to this flow.
    pub endpoint: Endpoint,
}

/// Result of participant enrollment, produced before the session exists.
///
/// Enrollment itself (ID assignment, first-frame agreement, rendezvous)
/// is not this crate's concern; whatever performs it must deliver these
/// values, identical in `first_frame` across all participants, plus the
/// bound UDP socket handed to [`Session::start`].
#[derive(Debug, Clone)]
pub struct Handshake {
    /// This host's id.
    pub local: HostId,
    /// First frame of the simulation, shared by all hosts.
    pub first_frame: FrameNumber,
    /// The remote participants. Fixed for the session's lifetime.
    pub peers: Vec<Peer>,
}

impl Handshake {
    /// Builds a handshake in which every peer flow is routed through one
    /// relay endpoint.
    #[must_use]
    pub fn via_server(
        local: HostId,
        first_frame: FrameNumber,
        server: Endpoint,
        peer_ids: impl IntoIterator<Item = HostId>,
    ) -> Self {
        Self {
            local,
            first_frame,
            peers: peer_ids
                .into_iter()
                .map(|id| Peer {
                    id,
                    endpoint: server,
                })
                .collect(),
        }
    }
}

/// Fatal session conditions. Everything recoverable is absorbed and
/// logged before reaching this type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket I/O failed in a way that is not congestion.
    #[error("socket failure: {0}")]
    Io(#[from] io::Error),
    /// A well-formed datagram named a host outside the session.
    #[error("datagram from unknown {0}")]
    UnknownSender(HostId),
    /// A peer sent something structurally impossible.
    #[error("protocol violation: {0}")]
    Protocol(#[from] WireError),
    /// The peer set repeats an id or contains the local host.
    #[error("invalid peer set: {0} appears twice or is the local host")]
    InvalidPeer(HostId),
}

/// Hand-off slot for ack snapshots, receiver to transmitter.
///
/// One slot per sender holding the newest snapshot: cumulative acks are
/// monotone and the selective set is a current-state view, so an unsent
/// older snapshot is fully superseded by the next one.
pub(crate) struct AckBoard {
    slots: Mutex<BTreeMap<HostId, FrameAck>>,
}

impl AckBoard {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn post(&self, host: HostId, ack: FrameAck) {
        self.slots
            .lock()
            .expect("ack board lock poisoned")
            .insert(host, ack);
    }

    pub(crate) fn take(&self, host: HostId) -> Option<FrameAck> {
        self.slots
            .lock()
            .expect("ack board lock poisoned")
            .remove(&host)
    }
}

/// Set-once cell carrying the first fatal error to the shutdown path.
pub(crate) struct FatalCell {
    slot: Mutex<Option<SessionError>>,
}

impl FatalCell {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn set(&self, err: SessionError) {
        let mut slot = self.slot.lock().expect("fatal cell lock poisoned");
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn take(&self) -> Option<SessionError> {
        self.slot.lock().expect("fatal cell lock poisoned").take()
    }
}

/// Requests teardown of a running session from any thread.
#[derive(Clone)]
pub struct SessionController {
    stop: Arc<AtomicBool>,
}

impl SessionController {
    /// Asks every session context to exit at its next suspension point.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// A running lockstep session.
///
/// Created by [`Session::start`], driven by [`Session::run`]. Dropping
/// the session raises the stop flag; `run` performs the orderly join.
pub struct Session<C> {
    local: HostId,
    first_frame: FrameNumber,
    interframe: std::time::Duration,
    socket: Arc<UdpSocket>,
    /// All receive queues, local included, in stable host-id order.
    queues: BTreeMap<HostId, Arc<dyn ReceiveQueue<C>>>,
    send_queues: BTreeMap<HostId, Arc<SendQueue<C>>>,
    barrier: Arc<FrameBarrier>,
    stop: Arc<AtomicBool>,
    fatal: Arc<FatalCell>,
    rx_handle: Option<JoinHandle<()>>,
    tx_handle: Option<JoinHandle<()>>,
}

impl<C: Command> Session<C> {
    /// Builds the queues and barrier and spawns the receiver and
    /// transmitter threads around the given bound socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer set is inconsistent or the socket
    /// cannot be prepared for polling.
    ///
    /// # Panics
    ///
    /// Panics if a thread cannot be spawned.
    pub fn start(
        mut socket: UdpSocket,
        handshake: Handshake,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let Handshake {
            local,
            first_frame,
            peers,
        } = handshake;

        info!(
            local = %local,
            first_frame = %first_frame,
            peers = peers.len(),
            "session starting"
        );

        let mut seen = std::collections::BTreeSet::new();
        for peer in &peers {
            if peer.id == local || !seen.insert(peer.id) {
                return Err(SessionError::InvalidPeer(peer.id));
            }
        }

        if let Err(_e) = socket.set_buffer_sizes(config.socket_buffer_bytes) {
            warn!(error = %_e, "socket buffer sizing failed, continuing with defaults");
        }
        let poller = SocketPoller::new(&mut socket)?;
        let socket = Arc::new(socket);

        let barrier = Arc::new(FrameBarrier::new(peers.iter().map(|p| p.id)));

        let mut queues: BTreeMap<HostId, Arc<dyn ReceiveQueue<C>>> = BTreeMap::new();
        let mut remote_queues: BTreeMap<HostId, Arc<dyn ReceiveQueue<C>>> = BTreeMap::new();
        let mut send_queues: BTreeMap<HostId, Arc<SendQueue<C>>> = BTreeMap::new();
        let mut flows: BTreeMap<HostId, (Endpoint, Arc<SendQueue<C>>)> = BTreeMap::new();

        // Self-loopback is a direct in-memory push: the local queue sits
        // outside the barrier and has no send flow.
        let local_queue: Arc<dyn ReceiveQueue<C>> = Arc::new(RingReceiveQueue::new(
            config.receive_capacity,
            first_frame,
            None,
        ));
        queues.insert(local, local_queue);
        for peer in &peers {
            let notifier: Arc<dyn ReadyNotifier> = Arc::new(barrier.handle(peer.id));
            let queue: Arc<dyn ReceiveQueue<C>> = Arc::new(RingReceiveQueue::new(
                config.receive_capacity,
                first_frame,
                Some(notifier),
            ));
            queues.insert(peer.id, Arc::clone(&queue));
            remote_queues.insert(peer.id, queue);

            let send_queue = Arc::new(SendQueue::new(first_frame));
            send_queues.insert(peer.id, Arc::clone(&send_queue));
            flows.insert(peer.id, (peer.endpoint, send_queue));
        }

        let acks = Arc::new(AckBoard::new());
        let stop = Arc::new(AtomicBool::new(false));
        let fatal = Arc::new(FatalCell::new());

        debug!("spawning receiver thread");
        let rx = receiver::Receiver::new(
            Arc::clone(&socket),
            poller,
            remote_queues,
            send_queues.clone(),
            Arc::clone(&acks),
            Arc::clone(&stop),
            Arc::clone(&fatal),
        );
        let rx_handle = thread::Builder::new()
            .name("lockstride-rx".into())
            .spawn(move || rx.run())
            .expect("failed to spawn receiver thread");

        debug!("spawning transmitter thread");
        let tx = transmitter::Transmitter::new(
            Arc::clone(&socket),
            local,
            flows,
            Arc::clone(&acks),
            config.transmit_interval,
            config.retransmit_interval,
            Arc::clone(&stop),
            Arc::clone(&fatal),
        );
        let tx_handle = thread::Builder::new()
            .name("lockstride-tx".into())
            .spawn(move || tx.run())
            .expect("failed to spawn transmitter thread");

        Ok(Self {
            local,
            first_frame,
            interframe: config.interframe,
            socket,
            queues,
            send_queues,
            barrier,
            stop,
            fatal,
            rx_handle: Some(rx_handle),
            tx_handle: Some(tx_handle),
        })
    }

    /// The endpoint the session's socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        self.socket.local_addr()
    }

    /// Returns a handle through which any thread can request teardown.
    #[must_use]
    pub fn controller(&self) -> SessionController {
        SessionController {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Runs the tick loop on the calling thread until a stop is
    /// requested or a fatal condition occurs, then joins the receiver
    /// and transmitter.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error recorded by any context; a
    /// requested stop yields `Ok(())`.
    pub fn run<S>(&mut self, app: &mut S) -> Result<(), SessionError>
    where
        S: Simulation<Command = C>,
    {
        let mut coordinator = tick::TickCoordinator::new(
            self.local,
            self.first_frame,
            self.interframe,
            self.queues.clone(),
            self.send_queues.clone(),
            Arc::clone(&self.barrier),
            Arc::clone(&self.stop),
        );
        coordinator.run(app);

        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.rx_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.tx_handle.take() {
            let _ = handle.join();
        }
        info!(local = %self.local, "session stopped");

        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<C> Drop for Session<C> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
