//! Deterministic lockstep session core.
//!
//! `lockstride` keeps a fixed set of hosts advancing a simulation in
//! lockstep over an unreliable datagram transport. Every host contributes
//! one command per frame; no host executes a frame until it holds the
//! command of every participant for that frame.
//!
//! # Architecture
//!
//! A running [`Session`] owns three execution contexts:
//!
//! - **Receiver**: blocks on the UDP socket, demuxes each datagram into
//!   either a per-sender receive queue push or a send-queue ack
//!   application, and posts fresh ack snapshots for the transmitter.
//! - **Transmitter**: wakes on a short periodic timer, drains every peer
//!   flow's send queue (new frames plus due retransmissions) and any
//!   outstanding ack snapshots into outbound datagrams.
//! - **Tick loop** (caller thread, via [`Session::run`]): collects the
//!   local command, waits on the frame barrier until every remote stream
//!   has its next frame buffered, pops exactly one input per participant,
//!   hands them to the application, then sleeps the interframe interval.
//!
//! ```text
//!  local input ──► SendQueue (per peer) ──► Transmitter ──► UDP
//!       │
//!       └────────► local ReceiveQueue ─┐
//!                                      ├──► barrier ──► tick loop ──► app
//!  UDP ──► Receiver ──► ReceiveQueue ──┘
//!              │
//!              └──► SendQueue acks
//! ```
//!
//! Reliability is selective-repeat: receive queues accept frames out of
//! order inside a fixed window and return cumulative + selective ack
//! snapshots; send queues retire frames on cumulative ack and retransmit
//! anything unacked after [`SessionConfig::retransmit_interval`].
//!
//! Participant enrollment (ID assignment, first-frame agreement, UDP
//! rendezvous) happens before this crate is involved; its result arrives
//! as a [`Handshake`] plus a bound [`net::UdpSocket`].
//!
//! # Example
//!
//! ```ignore
//! use lockstride::{Handshake, HostId, Session, SessionConfig};
//!
//! let socket = lockstride::net::UdpSocket::bind(my_endpoint)?;
//! let handshake = Handshake::via_server(
//!     HostId(0),
//!     first_frame,
//!     server_endpoint,
//!     vec![HostId(1), HostId(2)],
//! );
//! let mut session = Session::start(socket, handshake, SessionConfig::lan())?;
//! session.run(&mut my_simulation)?;
//! ```

pub mod barrier;
pub mod config;
pub mod net;
pub mod queue;
pub mod runtime;
pub mod simulation;
mod trace;
pub mod types;
pub mod wire;

pub use barrier::FrameBarrier;
pub use config::SessionConfig;
pub use net::Endpoint;
pub use queue::receive::{MapReceiveQueue, ReceiveQueue, RingReceiveQueue};
pub use queue::send::SendQueue;
pub use runtime::{Handshake, Peer, Session, SessionController, SessionError};
pub use simulation::Simulation;
pub use trace::init_tracing;
pub use types::{FrameAck, FrameInput, FrameNumber, HostId};
pub use wire::Command;
