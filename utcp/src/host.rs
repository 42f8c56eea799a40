//! The host/multiplexer (spec.md §4.3, §4.6, §4.7): owns every
//! connection, demultiplexes inbound datagrams to the right one, and
//! drives the timer sweep and public outbound operations.
use std::time::{Duration, Instant};

use rand::Rng;

use crate::callback::{Accept, Egress, PollCallback, PreAccept, RecvCallback};
use crate::connection::Connection;
use crate::egress;
use crate::error::{Error, RecvEvent, Result};
use crate::header::{Control, Header};
use crate::retransmit;
use crate::state::State;
use crate::state_machine::{self, Outcome};

/// Default MTU (spec.md §4.3 `init`).
const DEFAULT_MTU: u32 = 1000;
/// Default user timeout (spec.md §4.3 `init`).
const DEFAULT_USER_TIMEOUT: Duration = Duration::from_secs(60);
/// Cap on the value `timeout()` reports to the caller (spec.md §4.6).
const MAX_TIMEOUT: Duration = Duration::from_secs(3600);
/// Retransmit timer interval (spec.md §4.6: "recompute ... as now + 1s").
/// The original has no adaptive RTO; this fixed interval is the
/// simplification spec.md §4.6 describes.
const RTRX_INTERVAL: Duration = Duration::from_secs(1);

/// A stable handle to a connection. `(src, dst)` is unique for the life
/// of the connection and is already the host's sort key, so resolving a
/// handle back to a live connection is the same binary search used for
/// demultiplexing — no separate slot/generation table is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId {
	src: u16,
	dst: u16,
}

/// Owns every connection on this host and the capability objects used to
/// reach the outside world (spec.md §4.3 `init`).
pub struct Host {
	/// Sorted by `(src, dst)` for binary-search demultiplexing (spec.md
	/// §4.4 "matching").
	pub(crate) connections: Vec<Connection>,
	pub(crate) mtu: u32,
	user_timeout: Duration,
	pub(crate) pre_accept: Option<Box<dyn PreAccept>>,
	pub(crate) accept: Box<dyn Accept>,
	pub(crate) egress: Box<dyn Egress>,
}

impl Host {
	/// Create a host (spec.md §4.3 `init`). `accept` is invoked once an
	/// inbound connection's handshake completes; `egress` delivers every
	/// outbound datagram.
	pub fn new(accept: impl Accept + 'static, egress: impl Egress + 'static) -> Self {
		Self {
			connections: Vec::new(),
			mtu: DEFAULT_MTU,
			user_timeout: DEFAULT_USER_TIMEOUT,
			pre_accept: None,
			accept: Box::new(accept),
			egress: Box::new(egress),
		}
	}

	/// Install a filter invoked for unmatched inbound SYNs before a
	/// connection record is allocated (spec.md §4.3).
	pub fn set_pre_accept(&mut self, pre_accept: impl PreAccept + 'static) {
		self.pre_accept = Some(Box::new(pre_accept));
	}

	pub fn mtu(&self) -> u32 {
		self.mtu
	}

	pub fn set_mtu(&mut self, mtu: u32) {
		self.mtu = mtu;
	}

	pub fn user_timeout(&self) -> Duration {
		self.user_timeout
	}

	pub fn set_user_timeout(&mut self, timeout: Duration) {
		self.user_timeout = timeout;
	}

	fn find(&self, id: ConnectionId) -> Result<usize> {
		self.connections.binary_search_by_key(&(id.src, id.dst), |c| (c.src, c.dst)).map_err(|_| Error::BadFileDescriptor)
	}

	/// Open a connection to `dst` (spec.md §4.3 `connect`). The local
	/// port is chosen at random with the high bit set, retrying on
	/// collision with an existing connection.
	pub fn connect(&mut self, dst: u16, recv_cb: impl RecvCallback + 'static) -> ConnectionId {
		let mut rng = rand::thread_rng();
		let src = loop {
			let candidate = rng.gen::<u16>() | 0x8000;
			if self.connections.binary_search_by_key(&(candidate, dst), |c| (c.src, c.dst)).is_err() {
				break candidate;
			}
		};

		let iss = rng.gen::<u32>();
		let mut conn = Connection::outbound(src, dst, iss, self.mtu);
		conn.set_recv_cb(recv_cb);
		conn.conn_timeout = Some(Instant::now() + self.user_timeout);

		let header = Header::new(src, dst, iss, 0, self.mtu, Control::syn());
		let mut buf = [0u8; Header::LEN];
		header.write_into(&mut buf);
		self.egress.send(&buf);

		let idx = self.connections.partition_point(|c| (c.src, c.dst) < (src, dst));
		self.connections.insert(idx, conn);

		ConnectionId { src, dst }
	}

	/// Ingest one datagram from the substrate (spec.md §4.4 "matching").
	pub fn recv(&mut self, bytes: &[u8]) -> Result<()> {
		let hdr = *Header::parse(bytes)?;
		let payload = &bytes[Header::LEN..];

		match self.connections.binary_search_by_key(&(hdr.dst, hdr.src), |c| (c.src, c.dst)) {
			Ok(idx) => {
				let outcome = state_machine::process(self, idx, &hdr, payload, Instant::now());
				if matches!(outcome, Outcome::Free) {
					self.connections.remove(idx);
				}
			}
			Err(_) => self.accept_unmatched(&hdr, payload),
		}

		Ok(())
	}

	/// Handle a segment matching no existing connection (spec.md §4.4):
	/// a bare RST is dropped, an unsolicited SYN is offered to
	/// `pre_accept` and either answered with SYN+ACK or refused, and
	/// anything else draws a RST reply.
	fn accept_unmatched(&mut self, hdr: &Header, payload: &[u8]) {
		if hdr.ctl.rst() {
			return;
		}

		if hdr.ctl.syn() && !hdr.ctl.ack() {
			let allow = match self.pre_accept.as_mut() {
				Some(pre_accept) => pre_accept.pre_accept(hdr.dst),
				None => true,
			};

			if !allow {
				state_machine::reply_rst(hdr, payload.len(), &mut *self.egress);
				return;
			}

			let iss = rand::thread_rng().gen::<u32>();
			let mut conn = Connection::inbound(hdr.dst, hdr.src, iss, hdr.seq, hdr.wnd, self.mtu);
			conn.conn_timeout = Some(Instant::now() + self.user_timeout);

			let header = Header::new(hdr.dst, hdr.src, iss, hdr.seq.wrapping_add(1), self.mtu, Control::syn_ack());
			let mut buf = [0u8; Header::LEN];
			header.write_into(&mut buf);
			self.egress.send(&buf);

			let idx = self.connections.partition_point(|c| (c.src, c.dst) < (hdr.dst, hdr.src));
			self.connections.insert(idx, conn);
			return;
		}

		state_machine::reply_rst(hdr, payload.len(), &mut *self.egress);
	}

	/// Run the timer sweep once (spec.md §4.6): reap dead connections,
	/// expire `conn_timeout`/`rtrx_timeout`, fire `poll_cb`, and report
	/// how long the caller may wait before calling again.
	pub fn timeout(&mut self) -> Duration {
		let now = Instant::now();
		let mut earliest: Option<Instant> = None;
		let mut i = 0;

		while i < self.connections.len() {
			let free = self.step_connection(i, now, &mut earliest);
			if free {
				self.connections.remove(i);
			} else {
				i += 1;
			}
		}

		match earliest {
			Some(t) => t.saturating_duration_since(now).min(MAX_TIMEOUT),
			None => MAX_TIMEOUT,
		}
	}

	fn step_connection(&mut self, idx: usize, now: Instant, earliest: &mut Option<Instant>) -> bool {
		if self.connections[idx].state == State::Closed && self.connections[idx].reapable {
			return true;
		}

		if let Some(deadline) = self.connections[idx].conn_timeout {
			if deadline <= now {
				let conn = &mut self.connections[idx];
				let was_time_wait = conn.state == State::TimeWait;
				conn.state = State::Closed;
				conn.reapable = true;
				conn.conn_timeout = None;
				if !was_time_wait {
					if let Some(cb) = conn.recv_cb.as_mut() {
						cb.recv(RecvEvent::Closed(Some(Error::TimedOut)));
					}
				}
				return true;
			}
		}

		if let Some(deadline) = self.connections[idx].rtrx_timeout {
			if deadline <= now {
				let mtu = self.mtu;
				let conn = &self.connections[idx];
				retransmit::retransmit(conn, mtu, &mut *self.egress);
			}
		}

		let conn = &mut self.connections[idx];

		if matches!(conn.state, State::Established | State::CloseWait) {
			let free = conn.sndbuf_free();
			if free * 2 > conn.sndbuf_capacity() {
				if let Some(cb) = conn.poll_cb.as_mut() {
					cb.poll(free);
				}
			}
		}

		// Recompute, unconditionally, rather than only arm-if-unset
		// (spec.md §4.6: "recompute the next rtrx_timeout ... iff
		// snd.nxt ≠ snd.una, else clear it").
		conn.rtrx_timeout = (conn.snd.una != conn.snd.nxt).then(|| now + RTRX_INTERVAL);

		for deadline in [conn.conn_timeout, conn.rtrx_timeout].into_iter().flatten() {
			*earliest = Some(match *earliest {
				Some(e) => e.min(deadline),
				None => deadline,
			});
		}

		false
	}

	/// Queue `data` for transmission (spec.md §4.7 `send`). Only
	/// `ESTABLISHED`/`CLOSE_WAIT` accept bytes; earlier states haven't
	/// finished the handshake, later ones already sent a local FIN.
	pub fn send(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize> {
		let idx = self.find(id)?;
		let conn = &mut self.connections[idx];

		match conn.state {
			State::Established | State::CloseWait => {}
			State::Listen | State::SynSent | State::SynReceived => return Err(Error::NotConnected),
			_ => return Err(Error::BrokenPipe),
		}

		let n = conn.enqueue(data);
		egress::ack(conn, self.mtu, &mut *self.egress, false);
		Ok(n)
	}

	/// Half-close the connection: no more data may be sent, but inbound
	/// data is still delivered (spec.md §4.7 `shutdown`).
	///
	/// `SYN_RECEIVED`/`ESTABLISHED` queue a FIN and move to `FIN_WAIT_1`;
	/// `CLOSE_WAIT` moves to `CLOSING` (spec.md's literal table, not the
	/// conventional `LAST_ACK` — see DESIGN.md). `LISTEN`/`SYN_SENT` have
	/// no peer to FIN, so they drop straight to `CLOSED`.
	pub fn shutdown(&mut self, id: ConnectionId) -> Result {
		let idx = self.find(id)?;
		let conn = &mut self.connections[idx];

		match conn.state {
			State::SynReceived | State::Established => conn.state = State::FinWait1,
			State::CloseWait => conn.state = State::Closing,
			State::Listen | State::SynSent => {
				conn.state = State::Closed;
				return Ok(());
			}
			_ => return Err(Error::NotConnected),
		}

		conn.enqueue_fin();
		egress::ack(conn, self.mtu, &mut *self.egress, true);
		Ok(())
	}

	/// Shut down, then mark the connection reapable regardless of whether
	/// `shutdown` itself applied (spec.md §4.7 `close`).
	pub fn close(&mut self, id: ConnectionId) -> Result {
		let _ = self.shutdown(id);
		let idx = self.find(id)?;
		self.connections[idx].reapable = true;
		Ok(())
	}

	/// Tear the connection down immediately with a RST, bypassing the
	/// graceful close handshake (spec.md §4.7 `abort`).
	pub fn abort(&mut self, id: ConnectionId) -> Result {
		let idx = self.find(id)?;
		let conn = &mut self.connections[idx];

		let header = Header::new(conn.src, conn.dst, conn.snd.nxt, 0, 0, Control::rst());
		let mut buf = [0u8; Header::LEN];
		header.write_into(&mut buf);
		self.egress.send(&buf);

		conn.state = State::Closed;
		conn.reapable = true;
		Ok(())
	}

	pub fn set_recv_cb(&mut self, id: ConnectionId, cb: impl RecvCallback + 'static) -> Result {
		let idx = self.find(id)?;
		self.connections[idx].set_recv_cb(cb);
		Ok(())
	}

	pub fn set_poll_cb(&mut self, id: ConnectionId, cb: impl PollCallback + 'static) -> Result {
		let idx = self.find(id)?;
		self.connections[idx].set_poll_cb(cb);
		Ok(())
	}

	pub fn sndbuf(&self, id: ConnectionId) -> Result<usize> {
		Ok(self.connections[self.find(id)?].sndbuf_capacity())
	}

	pub fn set_sndbuf(&mut self, id: ConnectionId, size: usize) -> Result {
		let idx = self.find(id)?;
		self.connections[idx].set_sndbuf_capacity(size);
		Ok(())
	}

	pub fn sndbuf_free(&self, id: ConnectionId) -> Result<usize> {
		Ok(self.connections[self.find(id)?].sndbuf_free())
	}

	pub fn outq(&self, id: ConnectionId) -> Result<usize> {
		Ok(self.connections[self.find(id)?].outq())
	}

	pub fn nodelay(&self, id: ConnectionId) -> Result<bool> {
		Ok(self.connections[self.find(id)?].nodelay)
	}

	pub fn set_nodelay(&mut self, id: ConnectionId, nodelay: bool) -> Result {
		let idx = self.find(id)?;
		self.connections[idx].nodelay = nodelay;
		Ok(())
	}

	pub fn keepalive(&self, id: ConnectionId) -> Result<bool> {
		Ok(self.connections[self.find(id)?].keepalive)
	}

	pub fn set_keepalive(&mut self, id: ConnectionId, keepalive: bool) -> Result {
		let idx = self.find(id)?;
		self.connections[idx].keepalive = keepalive;
		Ok(())
	}

	pub fn state(&self, id: ConnectionId) -> Result<State> {
		Ok(self.connections[self.find(id)?].state)
	}
}

impl Drop for Host {
	fn drop(&mut self) {
		let stragglers = self.connections.iter().filter(|c| !(c.state == State::Closed && c.reapable)).count();
		if stragglers > 0 {
			log::warn!("Host dropped with {stragglers} connection(s) not reapable");
		}
	}
}
