//! The per-connection record (spec.md §3): endpoints, state, send/receive
//! control blocks, send buffer, timers, and callbacks.
use std::time::Instant;

use crate::callback::{PollCallback, RecvCallback};
use crate::state::State;

/// Default initial send-buffer capacity (spec.md §6).
pub const INITIAL_SNDBUF: usize = 4 * 1024;

/// The send sequence variables (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct SndSeq {
	/// Initial send sequence number.
	pub iss: u32,
	/// Oldest unacknowledged sequence number.
	pub una: u32,
	/// Next sequence number to send.
	pub nxt: u32,
	/// One past the last byte the application has enqueued (including a
	/// queued FIN).
	pub last: u32,
	/// The peer's most recently advertised receive window.
	pub wnd: u32,
	/// Self-imposed in-flight byte limit.
	pub cwnd: u32,
}

/// The receive sequence variables (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct RcvSeq {
	/// The peer's initial sequence number.
	pub irs: u32,
	/// Next expected sequence number.
	pub nxt: u32,
	/// Advertised receive window — constant, equal to the host MTU
	/// (spec.md §3: "currently constant equal to MTU").
	pub wnd: u32,
}

/// The Transmission Control Block for one flow.
pub struct Connection {
	/// The local endpoint identifier. Unique (with `dst`) across the host.
	pub src: u16,
	/// The remote endpoint identifier.
	pub dst: u16,

	pub state: State,

	pub snd: SndSeq,
	pub rcv: RcvSeq,

	/// Bytes `[snd.una, snd.last)`, stored at buffer offset `seqdiff(seq, snd.una)`.
	sndbuf: Vec<u8>,
	maxsndbufsize: usize,

	/// User timeout / TIME_WAIT expiry.
	pub conn_timeout: Option<Instant>,
	/// Retransmission timer.
	pub rtrx_timeout: Option<Instant>,

	pub dupack: u32,

	pub reapable: bool,
	pub nodelay: bool,
	pub keepalive: bool,

	pub recv_cb: Option<Box<dyn RecvCallback>>,
	pub poll_cb: Option<Box<dyn PollCallback>>,
}

impl Connection {
	/// Build the record for a locally-initiated connection, entering
	/// `SYN_SENT` (spec.md §4.3 `connect`).
	pub fn outbound(src: u16, dst: u16, iss: u32, mtu: u32) -> Self {
		Self::new(src, dst, State::SynSent, iss, 0, 0, mtu)
	}

	/// Build the record for a connection accepted off an inbound SYN,
	/// entering `SYN_RECEIVED` (spec.md §4.3).
	pub fn inbound(src: u16, dst: u16, iss: u32, irs: u32, peer_wnd: u32, mtu: u32) -> Self {
		let mut conn = Self::new(src, dst, State::SynReceived, iss, irs, irs + 1, mtu);
		conn.snd.wnd = peer_wnd;
		conn
	}

	/// Both `outbound` and `inbound` construct a record right after a SYN
	/// has already gone out (a bare SYN, or the SYN half of a SYN+ACK), so
	/// `snd.nxt` and `snd.last` both start one past `iss` — the SYN
	/// occupies that sequence number and, having already been sent,
	/// leaves nothing pending (spec.md §8's `seqdiff(snd.last, snd.nxt) ≥
	/// 0` invariant would otherwise momentarily go negative; spec.md
	/// §4.4 step 4's "subtracting 1 in SYN_SENT or SYN_RECEIVED" is what
	/// this sets up).
	fn new(src: u16, dst: u16, state: State, iss: u32, irs: u32, rcv_nxt: u32, mtu: u32) -> Self {
		Self {
			src,
			dst,
			state,
			snd: SndSeq { iss, una: iss, nxt: iss.wrapping_add(1), last: iss.wrapping_add(1), wnd: 0, cwnd: mtu },
			rcv: RcvSeq { irs, nxt: rcv_nxt, wnd: mtu },
			sndbuf: Vec::with_capacity(INITIAL_SNDBUF),
			maxsndbufsize: INITIAL_SNDBUF,
			conn_timeout: None,
			rtrx_timeout: None,
			dupack: 0,
			reapable: false,
			nodelay: false,
			keepalive: false,
			recv_cb: None,
			poll_cb: None,
		}
	}

	/// Bytes currently held in the send buffer — `[snd.una, snd.last)`.
	pub fn buffered(&self) -> &[u8] {
		&self.sndbuf
	}

	/// `snd.last - snd.una`, the number of bytes the buffer must hold.
	pub fn outq(&self) -> usize {
		crate::seq::seqdiff(self.snd.last, self.snd.una) as usize
	}

	pub fn sndbuf_capacity(&self) -> usize {
		self.maxsndbufsize
	}

	pub fn set_sndbuf_capacity(&mut self, size: usize) {
		self.maxsndbufsize = size;
	}

	/// Free bytes in the send buffer's configured capacity.
	pub fn sndbuf_free(&self) -> usize {
		self.maxsndbufsize.saturating_sub(self.outq())
	}

	/// Append `data` to the send buffer, growing capacity by doubling up
	/// to `maxsndbufsize` (spec.md §4.7). Returns the number of bytes
	/// actually accepted, which may be less than `data.len()` if the
	/// buffer is full.
	pub fn enqueue(&mut self, data: &[u8]) -> usize {
		let free = self.sndbuf_free();
		let n = data.len().min(free);

		if n == 0 {
			return 0;
		}

		let mut want = self.sndbuf.capacity().max(1);
		while want < self.sndbuf.len() + n {
			want = (want * 2).min(self.maxsndbufsize);
		}
		if want > self.sndbuf.capacity() {
			self.sndbuf.reserve(want - self.sndbuf.capacity());
		}

		self.sndbuf.extend_from_slice(&data[..n]);
		self.snd.last = self.snd.last.wrapping_add(n as u32);

		n
	}

	/// Reserve one sequence number for a FIN at the tail of the send
	/// buffer (spec.md §4.7 `shutdown`). The FIN occupies `snd.last` but
	/// is not a byte in `sndbuf`.
	pub fn enqueue_fin(&mut self) {
		self.snd.last = self.snd.last.wrapping_add(1);
	}

	/// Drop the first `n` acknowledged bytes from the front of the send
	/// buffer (spec.md §4.4 step 4: "memmove the send buffer down").
	pub fn drain_acked(&mut self, n: usize) {
		self.sndbuf.drain(..n.min(self.sndbuf.len()));
	}

	/// Bytes from `sndbuf` at `[offset, offset+len)`.
	pub fn sndbuf_range(&self, offset: usize, len: usize) -> &[u8] {
		&self.sndbuf[offset..offset + len]
	}

	pub fn set_recv_cb(&mut self, cb: impl RecvCallback + 'static) {
		self.recv_cb = Some(Box::new(cb));
	}

	pub fn set_poll_cb(&mut self, cb: impl PollCallback + 'static) {
		self.poll_cb = Some(Box::new(cb));
	}
}
