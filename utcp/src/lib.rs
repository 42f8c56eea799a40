//! A userspace, TCP-style reliable transport over an arbitrary unreliable
//! datagram substrate.
//!
//! The host never owns a socket: callers feed inbound datagrams to
//! [`Host::recv`] and are handed outbound ones through the `Egress`
//! capability object passed to [`Host::new`]. Everything else —
//! connection setup and teardown, retransmission, flow control — is
//! internal bookkeeping driven by [`Host::recv`] and the periodic
//! [`Host::timeout`] sweep.
mod connection;
mod egress;
mod retransmit;
mod seq;
mod state_machine;

pub mod callback;
pub mod error;
pub mod header;
pub mod host;
pub mod state;

pub use callback::{Accept, Egress as EgressCallback, PollCallback, PreAccept, RecvCallback};
pub use connection::Connection;
pub use error::{Error, RecvEvent, Result};
pub use host::{ConnectionId, Host};
pub use state::State;
