//! The eleven-state connection lifecycle (spec.md §3).

/// A connection's position in the TCP-style state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Closed,
	Listen,
	SynSent,
	SynReceived,
	Established,
	FinWait1,
	FinWait2,
	CloseWait,
	Closing,
	LastAck,
	TimeWait,
}

impl State {
	/// States in which a peer's payload may be delivered to `recv_cb`
	/// (spec.md §4.4 step 6: "ESTABLISHED, FIN_WAIT_1, FIN_WAIT_2").
	pub fn accepts_data(self) -> bool {
		matches!(self, State::Established | State::FinWait1 | State::FinWait2)
	}

	/// States at or past `CLOSE_WAIT`, where receiving a payload is a
	/// protocol violation (spec.md §4.4 step 6).
	pub fn is_past_half_close(self) -> bool {
		matches!(self, State::CloseWait | State::Closing | State::LastAck | State::TimeWait)
	}
}
