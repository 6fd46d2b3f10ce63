//! Network primitives: endpoints, the non-blocking UDP socket, and the
//! readiness poller the receiver blocks on.

pub mod endpoint;
pub mod socket;

pub use endpoint::Endpoint;
pub use socket::{SocketPoller, UdpSocket};
