use crate::connection::{ConnectionStatus, StatusEvent};
use crate::error::SessionError;
use crate::playback::QueueSnapshot;
use crate::reassembly::StreamReassembler;
use crate::transcript::TranscriptStore;
use serde::Serialize;
use std::collections::VecDeque;

/// Absorbed errors kept for diagnostics.
const DIAGNOSTICS_KEEP: usize = 64;

/// Everything one session knows. A reset builds a new `Session` rather than
/// clearing this one field by field.
#[derive(Debug)]
pub struct Session {
    pub(crate) status: ConnectionStatus,
    pub(crate) awaiting_response: bool,
    pub(crate) pending_prompt: Option<String>,
    pub(crate) transcript: TranscriptStore,
    pub(crate) reassembler: StreamReassembler,
    diagnostics: VecDeque<SessionError>,
    alert: Option<SessionError>,
    /// Set on the session built by reset until its socket opens.
    reopening_after_reset: bool,
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub awaiting_response: bool,
    pub pending_prompt: Option<String>,
    pub transcript_len: usize,
    pub open_buffers: usize,
    pub queue_len: usize,
    pub playing: bool,
    pub alert: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            awaiting_response: false,
            pending_prompt: None,
            transcript: TranscriptStore::new(),
            reassembler: StreamReassembler::new(),
            diagnostics: VecDeque::new(),
            alert: None,
            reopening_after_reset: false,
        }
    }

    pub(crate) fn after_reset() -> Self {
        Self {
            reopening_after_reset: true,
            ..Self::new()
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Move along the status machine. Events with no edge from the current
    /// status are ignored; returns whether the status changed.
    pub fn apply(&mut self, event: StatusEvent) -> bool {
        let event = match event {
            StatusEvent::Opened if self.reopening_after_reset => StatusEvent::OpenedAfterReset,
            other => other,
        };
        if matches!(event, StatusEvent::OpenedAfterReset) {
            self.reopening_after_reset = false;
        }
        if matches!(event, StatusEvent::TurnComplete) {
            self.awaiting_response = false;
        }
        match self.status.next(event) {
            Some(next) => {
                if next != self.status {
                    log::info!("[session] status {} -> {} ({:?})", self.status, next, event);
                }
                let changed = next != self.status;
                self.status = next;
                changed
            }
            None => {
                log::debug!("[session] no edge from {} on {:?}", self.status, event);
                false
            }
        }
    }

    pub fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }

    pub fn reassembler(&self) -> &StreamReassembler {
        &self.reassembler
    }

    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.pending_prompt.as_deref()
    }

    /// Record an error. Surfaced kinds become the alert; the rest go to the
    /// diagnostics ring. Both are logged.
    pub fn record(&mut self, err: SessionError) {
        if err.is_surfaced() {
            log::warn!("[session] {}", err);
            self.alert = Some(err);
        } else {
            log::warn!("[session] absorbed: {}", err);
            if self.diagnostics.len() == DIAGNOSTICS_KEEP {
                self.diagnostics.pop_front();
            }
            self.diagnostics.push_back(err);
        }
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &SessionError> {
        self.diagnostics.iter()
    }

    pub fn protocol_error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|e| matches!(e, SessionError::Protocol(_)))
            .count()
    }

    pub fn alert(&self) -> Option<&SessionError> {
        self.alert.as_ref()
    }

    pub fn clear_alert(&mut self) {
        self.alert = None;
    }

    pub fn snapshot(&self, queue: QueueSnapshot) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            awaiting_response: self.awaiting_response,
            pending_prompt: self.pending_prompt.clone(),
            transcript_len: self.transcript.len(),
            open_buffers: self.reassembler.open_keys().len(),
            queue_len: queue.len(),
            playing: queue.playing,
            alert: self.alert.as_ref().map(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_idle_and_empty() {
        let s = Session::new();
        assert_eq!(s.status(), ConnectionStatus::Idle);
        assert!(!s.awaiting_response());
        assert!(s.transcript().is_empty());
        assert!(s.alert().is_none());
    }

    #[test]
    fn reset_session_lands_in_idle_when_socket_opens() {
        let mut s = Session::after_reset();
        assert!(s.apply(StatusEvent::Reconnect));
        assert_eq!(s.status(), ConnectionStatus::Connecting);
        s.apply(StatusEvent::Opened);
        assert_eq!(s.status(), ConnectionStatus::Idle);

        // Later reconnects behave normally again.
        s.apply(StatusEvent::Reconnect);
        s.apply(StatusEvent::Opened);
        assert_eq!(s.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn turn_complete_clears_awaiting() {
        let mut s = Session::new();
        s.apply(StatusEvent::Connect);
        s.apply(StatusEvent::Opened);
        s.awaiting_response = true;
        s.apply(StatusEvent::TurnComplete);
        assert_eq!(s.status(), ConnectionStatus::Idle);
        assert!(!s.awaiting_response());
    }

    #[test]
    fn invalid_edges_leave_status_alone() {
        let mut s = Session::new();
        assert!(!s.apply(StatusEvent::Closed));
        assert_eq!(s.status(), ConnectionStatus::Idle);
        assert!(!s.apply(StatusEvent::Opened));
        assert_eq!(s.status(), ConnectionStatus::Idle);
    }

    #[test]
    fn errors_split_between_alert_and_diagnostics() {
        let mut s = Session::new();
        s.record(SessionError::Protocol("bad".into()));
        s.record(SessionError::Playback("engine".into()));
        s.record(SessionError::Capture("denied".into()));
        assert_eq!(s.protocol_error_count(), 1);
        assert_eq!(s.diagnostics().count(), 2);
        assert_eq!(s.alert(), Some(&SessionError::Capture("denied".into())));
    }

    #[test]
    fn diagnostics_ring_is_bounded() {
        let mut s = Session::new();
        for i in 0..(DIAGNOSTICS_KEEP + 10) {
            s.record(SessionError::Protocol(format!("#{}", i)));
        }
        assert_eq!(s.diagnostics().count(), DIAGNOSTICS_KEEP);
        assert_eq!(
            s.diagnostics().next(),
            Some(&SessionError::Protocol("#10".into()))
        );
    }
}
