//! Per-sender frame queues: the receive side (out-of-order reassembly
//! with selective acks) and the send side (retransmission until acked).

pub mod receive;
pub mod send;
