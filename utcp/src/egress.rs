//! Build and fragment outbound ACK/data segments from the send buffer
//! (spec.md §4.5).
//!
//! Every segment here advertises `wnd = snd.wnd` — the peer's own last-seen
//! window echoed back, per spec.md §4.5's literal field list — rather than
//! our own `rcv.wnd`. Receive-side window advertising beyond a constant is
//! an explicit Non-goal, so the field carries no flow-control weight either
//! way; this keeps the wire value exactly as spec.md names it instead of
//! substituting the more conventional choice.
use crate::callback::Egress;
use crate::connection::Connection;
use crate::header::{Control, Header};
use crate::seq::seqdiff;
use crate::state::State;

/// Emit pending data (clamped to the congestion window and `mtu`) plus a
/// trailing ACK, or — if `send_at_least_one` and there is nothing pending
/// — a bare ACK carrying the current `rcv.nxt`.
///
/// This is `ack()` in spec.md §4.5.
pub fn ack(conn: &mut Connection, mtu: u32, egress: &mut dyn Egress, send_at_least_one: bool) {
	let pending = seqdiff(conn.snd.last, conn.snd.nxt).max(0) as u32;
	let cwnd_left = conn.snd.cwnd as i64 - seqdiff(conn.snd.nxt, conn.snd.una) as i64;
	let mut left = pending.min(cwnd_left.max(0) as u32);

	if left == 0 && !send_at_least_one {
		return;
	}

	if left == 0 {
		emit_segment(conn, egress, Control::ack(), 0);
		return;
	}

	while left > 0 {
		let seglen = left.min(mtu);
		left -= seglen;

		let is_last_fragment = left == 0;
		let sets_fin = is_last_fragment && matches!(conn.state, State::FinWait1 | State::Closing) && conn.snd.nxt.wrapping_add(seglen) == conn.snd.last;

		let (seglen, ctl) = if sets_fin {
			(seglen - 1, Control::fin_ack())
		} else {
			(seglen, Control::ack())
		};

		emit_segment(conn, egress, ctl, seglen);
	}
}

fn emit_segment(conn: &mut Connection, egress: &mut dyn Egress, ctl: Control, seglen: u32) {
	let offset = seqdiff(conn.snd.nxt, conn.snd.una) as usize;
	let payload = conn.sndbuf_range(offset, seglen as usize);

	let header = Header::new(conn.src, conn.dst, conn.snd.nxt, conn.rcv.nxt, conn.snd.wnd, ctl);

	let mut buf = vec![0u8; Header::LEN + payload.len()];
	header.write_into(&mut buf);
	buf[Header::LEN..].copy_from_slice(payload);

	egress.send(&buf);

	conn.snd.nxt = conn.snd.nxt.wrapping_add(seglen);
	if ctl.fin() {
		conn.snd.nxt = conn.snd.nxt.wrapping_add(1);
	}
}
