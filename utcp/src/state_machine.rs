//! Inbound segment processing (spec.md §4.4): the eight-step pipeline
//! that takes a parsed segment matched to a connection and mutates its
//! state, notifying the application and emitting outbound segments as it
//! goes.
use std::time::{Duration, Instant};

use crate::callback::Egress;
use crate::egress;
use crate::error::{Error, RecvEvent};
use crate::header::{Control, Header};
use crate::host::Host;
use crate::seq::{self, seqdiff};
use crate::state::State;

const TIME_WAIT_DURATION: Duration = Duration::from_secs(60);

/// Build the RST reply to an offending segment (spec.md §4.4, "RST
/// emission helper"): ports swapped, `wnd = 0`, and either a bare RST
/// acking the offending ACK number, or an RST+ACK acking past the
/// offending segment's payload.
pub(crate) fn reply_rst(hdr: &Header, payload_len: usize, egress: &mut dyn Egress) {
	let (seq, ack, ctl) = if hdr.ctl.ack() {
		(hdr.ack, 0, Control::rst())
	} else {
		(0, hdr.seq.wrapping_add(payload_len as u32), Control::rst_ack())
	};

	let header = Header::new(hdr.dst, hdr.src, seq, ack, 0, ctl);
	let mut buf = [0u8; Header::LEN];
	header.write_into(&mut buf);
	egress.send(&buf);
}

/// Whether `process` should ask the caller to free the connection record
/// once it returns (the various "silently destroy" / "free immediately"
/// paths of spec.md §4.4 step 3).
pub(crate) enum Outcome {
	Continue,
	Free,
}

/// Run the full inbound pipeline for one segment already matched to
/// `host.connections[idx]`.
pub(crate) fn process(host: &mut Host, idx: usize, hdr: &Header, payload: &[u8], now: Instant) -> Outcome {
	let mtu = host.mtu;
	let rcv_nxt_before = host.connections[idx].rcv.nxt;

	// Step 1 — acceptability.
	if host.connections[idx].state != State::SynSent {
		let conn = &host.connections[idx];
		if hdr.seq != conn.rcv.nxt {
			if hdr.ctl.rst() {
				return Outcome::Continue;
			}
			let conn = &mut host.connections[idx];
			egress::ack(conn, mtu, &mut *host.egress, true);
			return Outcome::Continue;
		}
	}

	// Step 2 — ACK validity.
	if hdr.ctl.ack() {
		let conn = &host.connections[idx];
		if !seq::in_inclusive_range(hdr.ack, conn.snd.una, conn.snd.nxt) {
			if hdr.ctl.rst() {
				return Outcome::Continue;
			}
			reply_rst(hdr, payload.len(), &mut *host.egress);
			return Outcome::Continue;
		}
	}

	// Step 3 — RST handling. Terminal for this segment either way.
	if hdr.ctl.rst() {
		return handle_rst(host, idx, hdr);
	}

	// Step 4 — advance snd.una.
	let mut advanced = 0i32;
	if hdr.ctl.ack() {
		advanced = advance_una(host, idx, hdr, payload.is_empty(), now);
	}

	// Step 5 — SYN processing.
	if hdr.ctl.syn() {
		if !handle_syn(host, idx, hdr, advanced) {
			return Outcome::Continue;
		}
	}

	// Step 6 — new data / handshake completion.
	if host.connections[idx].state == State::SynReceived && advanced > 0 {
		host.connections[idx].state = State::Established;

		let local_port = host.connections[idx].src;
		{
			let Host { connections, accept, .. } = host;
			let conn = &mut connections[idx];
			accept.accept(conn, local_port);
		}

		if host.connections[idx].recv_cb.is_none() {
			host.connections[idx].state = State::Closed;
			host.connections[idx].reapable = true;
			reply_rst(hdr, payload.len(), &mut *host.egress);
			return Outcome::Free;
		}
	}

	if !payload.is_empty() {
		let state = host.connections[idx].state;

		if state.accepts_data() {
			let conn = &mut host.connections[idx];
			if let Some(cb) = conn.recv_cb.as_mut() {
				cb.recv(RecvEvent::Data(payload));
			}
			conn.rcv.nxt = conn.rcv.nxt.wrapping_add(payload.len() as u32);
		} else if state.is_past_half_close() {
			log::warn!("Payload received after FIN in state {state:?}; resetting");
			reply_rst(hdr, payload.len(), &mut *host.egress);
			return Outcome::Continue;
		}
	}

	// Step 7 — FIN processing.
	if hdr.ctl.fin() {
		let conn = &mut host.connections[idx];
		let next = match conn.state {
			State::Established => Some(State::CloseWait),
			State::FinWait1 => Some(State::Closing),
			State::FinWait2 => {
				conn.conn_timeout = Some(now + TIME_WAIT_DURATION);
				Some(State::TimeWait)
			}
			_ => None,
		};

		match next {
			Some(state) => {
				conn.state = state;
				conn.rcv.nxt = conn.rcv.nxt.wrapping_add(1);
				if let Some(cb) = conn.recv_cb.as_mut() {
					cb.recv(RecvEvent::Closed(None));
				}
			}
			None => {
				reply_rst(hdr, payload.len(), &mut *host.egress);
				return Outcome::Continue;
			}
		}
	}

	// Step 8 — emit.
	let rcv_advanced = host.connections[idx].rcv.nxt != rcv_nxt_before;
	let conn = &mut host.connections[idx];
	egress::ack(conn, mtu, &mut *host.egress, rcv_advanced);

	Outcome::Continue
}

fn advance_una(host: &mut Host, idx: usize, hdr: &Header, no_payload: bool, now: Instant) -> i32 {
	let conn = &mut host.connections[idx];
	let advanced = seqdiff(hdr.ack, conn.snd.una);

	if advanced > 0 {
		let mut data_acked = advanced as u32;
		if matches!(conn.state, State::SynSent | State::SynReceived) {
			data_acked -= 1;
		}

		conn.drain_acked(data_acked as usize);
		conn.snd.una = hdr.ack;
		conn.dupack = 0;

		let cap = conn.sndbuf_capacity() as u32;
		conn.snd.cwnd = conn.snd.cwnd.saturating_add(host.mtu).min(cap);

		// Any advancement clears the user timeout and, once fully
		// drained, the retransmit timer — ahead of the FIN_WAIT_1/CLOSING
		// checks below, so a fresh TIME_WAIT arm isn't immediately wiped.
		conn.conn_timeout = None;
		if conn.snd.una == conn.snd.nxt {
			conn.rtrx_timeout = None;
		}

		if conn.state == State::FinWait1 && conn.snd.una == conn.snd.last {
			conn.state = State::FinWait2;
		}
		if conn.state == State::Closing && conn.snd.una == conn.snd.last {
			conn.state = State::TimeWait;
			conn.conn_timeout = Some(now + TIME_WAIT_DURATION);
		}
	} else if advanced == 0 && no_payload {
		// Duplicate ACK accounting (spec.md §4.4 step 4: "advanced == 0
		// and the segment carried no payload"). Fast retransmit on the
		// third duplicate is not implemented — see spec.md §9.
		conn.dupack += 1;
	}

	advanced
}

/// Returns `false` if a RST reply was sent for a duplicate/unexpected
/// SYN and the caller should stop processing this segment.
fn handle_syn(host: &mut Host, idx: usize, hdr: &Header, advanced: i32) -> bool {
	let conn = &mut host.connections[idx];

	let accepted = conn.state == State::SynSent && advanced > 0;

	if accepted {
		conn.rcv.irs = hdr.seq;
		conn.rcv.nxt = hdr.seq;
		conn.state = State::Established;
	}

	conn.rcv.nxt = conn.rcv.nxt.wrapping_add(1);

	if accepted {
		true
	} else {
		reply_rst(hdr, 0, &mut *host.egress);
		false
	}
}

fn handle_rst(host: &mut Host, idx: usize, hdr: &Header) -> Outcome {
	let conn = &mut host.connections[idx];

	match conn.state {
		State::SynSent if hdr.ctl.ack() => {
			conn.state = State::Closed;
			conn.reapable = true;
			if let Some(cb) = conn.recv_cb.as_mut() {
				cb.recv(RecvEvent::Closed(Some(Error::ConnectionRefused)));
			}
			Outcome::Continue
		}
		State::SynReceived if !hdr.ctl.ack() => Outcome::Free,
		State::Established | State::FinWait1 | State::FinWait2 | State::CloseWait if !hdr.ctl.ack() => {
			conn.state = State::Closed;
			conn.reapable = true;
			if let Some(cb) = conn.recv_cb.as_mut() {
				cb.recv(RecvEvent::Closed(Some(Error::ConnectionReset)));
			}
			Outcome::Continue
		}
		State::Closing | State::LastAck | State::TimeWait if !hdr.ctl.ack() => {
			if conn.reapable {
				Outcome::Free
			} else {
				conn.state = State::Closed;
				conn.reapable = true;
				Outcome::Continue
			}
		}
		other => {
			log::debug!("Unhandled RST in state {other:?} (ack={}); dropping", hdr.ctl.ack());
			Outcome::Continue
		}
	}
}
