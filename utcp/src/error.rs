//! The error channel surfaced to callers (spec.md §7).
//!
//! The original design threads an errno-like value through thread-local
//! state before invoking `recv_cb(NULL, 0)`. This crate instead carries the
//! cause explicitly: [`Error`] is returned from fallible public operations,
//! and [`RecvEvent::Closed`] carries an `Option<Error>` to the recv
//! callback so a graceful FIN (`None`) and an abnormal close (`Some`) share
//! one notification path.
use thiserror::Error;

/// Reasons a public operation, or a half-close notification, can fail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// A null buffer or host was supplied where one was required.
	#[error("invalid argument")]
	InvalidArgument,
	/// An inbound datagram was too short or carried unknown control bits.
	#[error("malformed segment")]
	BadMessage,
	/// `connect` was attempted to a local/remote pair already in use.
	#[error("address in use")]
	AddressInUse,
	/// Allocation failed while growing a send buffer.
	#[error("out of memory")]
	NoMemory,
	/// A write was attempted before the handshake completed.
	#[error("not connected")]
	NotConnected,
	/// A write was attempted after the local side closed its send half.
	#[error("broken pipe")]
	BrokenPipe,
	/// An operation was attempted on a connection that has been reaped.
	#[error("bad file descriptor")]
	BadFileDescriptor,
	/// The send buffer is full; no bytes were accepted.
	#[error("would block")]
	WouldBlock,
	/// The peer refused the connection (RST during the handshake).
	#[error("connection refused")]
	ConnectionRefused,
	/// The peer reset an established connection.
	#[error("connection reset")]
	ConnectionReset,
	/// The user timeout elapsed with no activity from the peer.
	#[error("timed out")]
	TimedOut,
}

/// The result type used throughout the public surface.
pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// What is delivered to a connection's `recv_cb`.
///
/// `Data` carries inbound payload bytes; `Closed` signals a half-close or
/// connection-ending error. `Closed(None)` is a graceful FIN; `Closed(Some(_))`
/// is a refusal, reset, or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvEvent<'a> {
	Data(&'a [u8]),
	Closed(Option<Error>),
}
