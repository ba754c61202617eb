use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    /// No backend turn outstanding. Initial state, and the state after the
    /// backend confirms a reset or finishes an agent run.
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Inputs to the status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Connect,
    Reconnect,
    Opened,
    /// The socket opened by a reset's reconnect came up.
    OpenedAfterReset,
    /// Peer closed or the stream ended.
    Closed,
    TransportError,
    /// Local `close()`.
    CloseRequested,
    /// `reset_confirmed` / `agent_execution_result` from the backend.
    TurnComplete,
}

impl ConnectionStatus {
    /// Next status for `event`, or `None` if there is no such edge.
    pub fn next(self, event: StatusEvent) -> Option<ConnectionStatus> {
        use ConnectionStatus::*;
        use StatusEvent::*;
        match (self, event) {
            (Idle | Disconnected | Error, Connect) => Some(Connecting),
            (_, Reconnect) => Some(Connecting),
            (Connecting, Opened) => Some(Connected),
            (Connecting, OpenedAfterReset) => Some(Idle),
            (Connected | Idle, Closed) => Some(Disconnected),
            (Connecting | Connected | Idle, TransportError) => Some(Error),
            (Connecting | Connected | Idle, CloseRequested) => Some(Disconnected),
            (_, TurnComplete) => Some(Idle),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "Idle",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionStatus::*;
    use super::StatusEvent::*;

    #[test]
    fn happy_path() {
        let s = Idle.next(Connect).unwrap();
        assert_eq!(s, Connecting);
        let s = s.next(Opened).unwrap();
        assert_eq!(s, Connected);
        assert_eq!(s.next(Closed), Some(Disconnected));
    }

    #[test]
    fn transport_errors_only_from_live_states() {
        assert_eq!(Connecting.next(TransportError), Some(Error));
        assert_eq!(Connected.next(TransportError), Some(Error));
        assert_eq!(Disconnected.next(TransportError), None);
        assert_eq!(Error.next(TransportError), None);
    }

    #[test]
    fn connect_is_not_an_edge_while_live() {
        assert_eq!(Connecting.next(Connect), None);
        assert_eq!(Connected.next(Connect), None);
        assert_eq!(Disconnected.next(Connect), Some(Connecting));
        assert_eq!(Error.next(Connect), Some(Connecting));
    }

    #[test]
    fn reconnect_from_anywhere() {
        for s in [Idle, Connecting, Connected, Disconnected, Error] {
            assert_eq!(s.next(Reconnect), Some(Connecting));
        }
    }

    #[test]
    fn turn_complete_returns_to_idle() {
        assert_eq!(Connected.next(TurnComplete), Some(Idle));
        assert_eq!(Connecting.next(OpenedAfterReset), Some(Idle));
        assert_eq!(Connected.next(Opened), None);
    }
}
