use std::fmt;

/// Lifecycle of an inbound or outbound path.
///
/// `Pending` lasts from sending (or receiving) the `open` handshake until the `ack_open` settles
/// it. `Closing` means a graceful close was requested but buffered data has not drained yet.
/// `Closed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathState {
    Pending,
    Open,
    Closing,
    Closed,
    Aborted,
}

impl PathState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PathState::Closed | PathState::Aborted)
    }
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathState::Pending => "pending",
            PathState::Open => "open",
            PathState::Closing => "closing",
            PathState::Closed => "closed",
            PathState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
