//! Rebuild and re-emit the earliest unacknowledged segment on timer
//! expiry (spec.md §4.6).
//!
//! Retransmission never advances `snd.nxt`/`snd.una`, and never touches
//! `rtrx_timeout` directly — the timer sweep recomputes it on the next
//! pass (spec.md §4.6).
use crate::callback::Egress;
use crate::connection::Connection;
use crate::header::{Control, Header};
use crate::seq::seqdiff;
use crate::state::State;

/// Rebuild and re-emit the earliest unacknowledged segment appropriate
/// to `conn`'s state. States other than `SYN_SENT`, `SYN_RECEIVED`,
/// `ESTABLISHED`, and `FIN_WAIT_1` have no retransmit case in the
/// original design (spec.md §9) — that gap is preserved; we log and do
/// nothing rather than emit a segment for bookkeeping we don't model.
pub fn retransmit(conn: &Connection, mtu: u32, egress: &mut dyn Egress) {
	match conn.state {
		State::SynSent => {
			let header = Header::new(conn.src, conn.dst, conn.snd.iss, 0, conn.rcv.wnd, Control::syn());
			send(header, &[], egress);
		}
		State::SynReceived => {
			let header = Header::new(conn.src, conn.dst, conn.snd.iss, conn.rcv.nxt, conn.rcv.wnd, Control::syn_ack());
			send(header, &[], egress);
		}
		State::Established | State::FinWait1 => {
			let pending = seqdiff(conn.snd.nxt, conn.snd.una).max(0) as usize;
			let clamped = pending.min(mtu as usize);

			// `pending` counts a queued-and-sent FIN as one sequence unit,
			// but the FIN is never a byte in `sndbuf` — clamp before
			// slicing, not after, or the FIN-only retransmit case (nothing
			// but a FIN outstanding) slices one byte past an empty buffer.
			let whole_span_fits = conn.state == State::FinWait1 && clamped == pending && conn.snd.una.wrapping_add(clamped as u32) == conn.snd.last;

			let (seglen, ctl) = if whole_span_fits { (clamped - 1, Control::fin_ack()) } else { (clamped, Control::ack()) };

			let payload = conn.sndbuf_range(0, seglen);
			let header = Header::new(conn.src, conn.dst, conn.snd.una, conn.rcv.nxt, conn.snd.wnd, ctl);
			send(header, payload, egress);
		}
		other => {
			log::warn!("No retransmit case for state {other:?}; dropping retransmission");
		}
	}
}

fn send(header: Header, payload: &[u8], egress: &mut dyn Egress) {
	let mut buf = vec![0u8; Header::LEN + payload.len()];
	header.write_into(&mut buf);
	buf[Header::LEN..].copy_from_slice(payload);
	egress.send(&buf);
}
