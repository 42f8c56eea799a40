//! Capability objects standing in for the host/connection callbacks of
//! spec.md §4.3/§6.
//!
//! spec.md §9 flags the original's callback-plus-opaque-user-pointer
//! pairs for redesign: "best modeled as a capability object ... not as
//! raw function pointers with a side pointer". A Rust closure already
//! owns whatever state it captures, so each callback is a small trait
//! implemented for any matching `FnMut`, boxed by the host/connection
//! that holds it. There is no separate `priv` pointer to carry.
use crate::connection::Connection;
use crate::error::RecvEvent;

/// Delivers datagrams to the substrate. Required at host creation
/// (spec.md §4.3). Must not reenter the host (spec.md §6).
pub trait Egress {
	fn send(&mut self, bytes: &[u8]);
}

impl<F: FnMut(&[u8])> Egress for F {
	fn send(&mut self, bytes: &[u8]) {
		self(bytes)
	}
}

/// Cheap filter invoked for an unmatched inbound SYN before a connection
/// is allocated for it (spec.md §4.3).
pub trait PreAccept {
	fn pre_accept(&mut self, local_port: u16) -> bool;
}

impl<F: FnMut(u16) -> bool> PreAccept for F {
	fn pre_accept(&mut self, local_port: u16) -> bool {
		self(local_port)
	}
}

/// Invoked once the three-way handshake for an inbound connection
/// completes (spec.md §4.3, §4.4 step 6). The handler is expected to
/// install a `recv_cb` via [`Connection::set_recv_cb`].
pub trait Accept {
	fn accept(&mut self, connection: &mut Connection, local_port: u16);
}

impl<F: FnMut(&mut Connection, u16)> Accept for F {
	fn accept(&mut self, connection: &mut Connection, local_port: u16) {
		self(connection, local_port)
	}
}

/// Delivers inbound payload or a half-close/error notification to the
/// application (spec.md §6).
pub trait RecvCallback {
	fn recv(&mut self, event: RecvEvent<'_>);
}

impl<F: FnMut(RecvEvent<'_>)> RecvCallback for F {
	fn recv(&mut self, event: RecvEvent<'_>) {
		self(event)
	}
}

/// Invoked during the timer sweep when send-buffer headroom crosses half
/// of `maxsndbufsize` (spec.md §4.6, §6).
pub trait PollCallback {
	fn poll(&mut self, writable_bytes: usize);
}

impl<F: FnMut(usize)> PollCallback for F {
	fn poll(&mut self, writable_bytes: usize) {
		self(writable_bytes)
	}
}
