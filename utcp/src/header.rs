//! The wire format: a fixed segment header, packed and parsed in host byte
//! order (spec.md §3, §4.2, §6).
//!
//! Fields are read and written directly as raw memory via the crate-local
//! `Cast` marker trait (see `utils::bytes`), exactly as the teacher's own
//! IP/UDP headers are. Unlike those headers this one does *not* wrap its
//! multi-byte fields in a big-endian accessor: spec.md §6 is explicit that
//! this design only interoperates between same-endianness peers, and that
//! is a known limitation to preserve, not a bug to quietly fix.
use bilge::prelude::*;
use utils::bytes::{self, Cast};

use crate::error::Error;

/// `ctl` flag bits (spec.md §3). Bits outside this set must be zero.
#[bitsize(16)]
#[derive(Clone, Copy, FromBits, Cast)]
#[repr(C)]
pub struct Control {
	pub syn: bool,
	pub ack: bool,
	pub fin: bool,
	pub rst: bool,
	reserved: u12,
}

impl Control {
	pub fn none() -> Self {
		Self::from_flags(false, false, false, false)
	}

	pub fn from_flags(syn: bool, ack: bool, fin: bool, rst: bool) -> Self {
		Self::new(syn, ack, fin, rst, u12::new(0))
	}

	pub fn syn() -> Self {
		Self::from_flags(true, false, false, false)
	}

	pub fn ack() -> Self {
		Self::from_flags(false, true, false, false)
	}

	pub fn syn_ack() -> Self {
		Self::from_flags(true, true, false, false)
	}

	pub fn fin_ack() -> Self {
		Self::from_flags(false, true, true, false)
	}

	pub fn rst() -> Self {
		Self::from_flags(false, false, false, true)
	}

	pub fn rst_ack() -> Self {
		Self::from_flags(false, true, false, true)
	}

	/// Whether any bit outside `{SYN, ACK, FIN, RST}` is set.
	pub fn has_unknown_bits(&self) -> bool {
		self.reserved().value() != 0
	}
}

/// The segment header. Fields named as in spec.md §3.
///
/// The struct's `size_of` is the true on-wire header length; spec.md's
/// "16 bytes" framing (§2, §4.2) undercounts the fields it itself lists
/// (`src`, `dst`, `seq`, `ack`, `wnd`, `ctl`, `aux` sum to 20 bytes at the
/// widths given). Rather than drop a named field to force a 16-byte total,
/// this keeps every field at the width spec.md assigns it — `wnd` in
/// particular is typed `u32` both on the wire and in `SndSeq`/`RcvSeq`,
/// and is copied directly between the two — and sizes the "too short"
/// check off `Header::LEN`, not a hardcoded constant. See DESIGN.md.
#[derive(Clone, Copy, Cast)]
#[repr(C)]
pub struct Header {
	pub src: u16,
	pub dst: u16,
	pub seq: u32,
	pub ack: u32,
	pub wnd: u32,
	pub ctl: Control,
	pub aux: u16,
}

impl Header {
	pub const LEN: usize = core::mem::size_of::<Header>();

	#[allow(clippy::too_many_arguments)]
	pub fn new(src: u16, dst: u16, seq: u32, ack: u32, wnd: u32, ctl: Control) -> Self {
		Self { src, dst, seq, ack, wnd, ctl, aux: 0 }
	}

	/// Parse a header from the front of an inbound datagram.
	///
	/// Rejects datagrams shorter than the header, and headers carrying
	/// control bits outside `{SYN, ACK, FIN, RST}` (spec.md §4.2).
	pub fn parse(buf: &[u8]) -> Result<&Header, Error> {
		if buf.len() < Self::LEN {
			return Err(Error::BadMessage);
		}

		let header: &Header = bytes::cast(&buf[..Self::LEN]);

		if header.ctl.has_unknown_bits() {
			return Err(Error::BadMessage);
		}

		Ok(header)
	}

	/// Write this header into the front of `buf`, which must be at least
	/// [`Header::LEN`] bytes long.
	pub fn write_into(self, buf: &mut [u8]) {
		*bytes::cast_mut::<Header, _>(&mut buf[..Self::LEN]) = self;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pack_then_parse_round_trips() {
		let mut buf = [0u8; Header::LEN];

		let original = Header::new(7, 42, 1000, 2000, 1000, Control::syn_ack());
		original.write_into(&mut buf);

		let parsed = Header::parse(&buf).unwrap();

		assert_eq!(parsed.src, 7);
		assert_eq!(parsed.dst, 42);
		assert_eq!(parsed.seq, 1000);
		assert_eq!(parsed.ack, 2000);
		assert_eq!(parsed.wnd, 1000);
		assert!(parsed.ctl.syn());
		assert!(parsed.ctl.ack());
		assert!(!parsed.ctl.fin());
		assert!(!parsed.ctl.rst());
	}

	#[test]
	fn short_datagram_is_rejected() {
		let buf = [0u8; 4];
		assert_eq!(Header::parse(&buf).unwrap_err(), Error::BadMessage);
	}

	#[test]
	fn unknown_control_bits_are_rejected() {
		let mut buf = [0u8; Header::LEN];
		Header::new(1, 2, 0, 0, 0, Control::none()).write_into(&mut buf);

		// Set a reserved bit in the `ctl` word (bit 4, value 0x10).
		let ctl_offset = 2 + 2 + 4 + 4 + 4;
		buf[ctl_offset] |= 0x10;

		assert_eq!(Header::parse(&buf).unwrap_err(), Error::BadMessage);
	}
}
