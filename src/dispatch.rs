use crate::connection::StatusEvent;
use crate::protocol::{self, CodeOutput, Frame};
use crate::reassembly::Reassembled;
use crate::session::Session;
use crate::transcript::EntryKind;

/// Where one inbound frame ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Transcript(EntryKind),
    Reassembly,
    /// Decoded clip for the playback queue; the caller enqueues it.
    Audio(Vec<u8>),
    Prompt,
    Control,
    Ignored,
}

/// Decode and route one socket text frame. Every frame, whatever its type,
/// clears `awaiting_response` afterwards.
pub fn dispatch(session: &mut Session, raw: &str) -> Routed {
    let decoded = protocol::decode(raw);
    if let Some(err) = decoded.error {
        session.record(err);
    }
    let routed = route(session, decoded.frame);
    session.awaiting_response = false;
    routed
}

fn route(session: &mut Session, frame: Frame) -> Routed {
    match frame {
        Frame::Text(text) => {
            session.transcript.append(EntryKind::User, text);
            Routed::Transcript(EntryKind::User)
        }
        Frame::ChatResponse(text) => {
            session.transcript.append(EntryKind::Assistant, text);
            Routed::Transcript(EntryKind::Assistant)
        }
        Frame::Audio(payload) => Routed::Audio(payload),
        Frame::CodeOutput(CodeOutput::Fragment(fragment)) => {
            match session.reassembler.apply(&fragment) {
                Reassembled::Completed { kind, text } => {
                    session.transcript.append(kind, text);
                }
                Reassembled::Opaque(raw) => {
                    session.transcript.append(EntryKind::Code, raw);
                }
                Reassembled::Opened | Reassembled::Appended | Reassembled::Nothing => {}
            }
            Routed::Reassembly
        }
        Frame::CodeOutput(CodeOutput::Raw(raw)) => {
            session.transcript.append(EntryKind::Code, raw);
            Routed::Reassembly
        }
        Frame::InputRequired(prompt) => {
            log::info!("[session] input required: {}", prompt);
            session.pending_prompt = Some(prompt);
            Routed::Prompt
        }
        Frame::ResetConfirmed | Frame::AgentExecutionResult => {
            session.apply(StatusEvent::TurnComplete);
            Routed::Control
        }
        Frame::Rejected(tag) => {
            log::debug!("[session] dropped undeliverable {} frame", tag);
            Routed::Ignored
        }
        Frame::Unknown(tag) => {
            log::debug!("[session] ignoring unknown frame type {}", tag);
            Routed::Ignored
        }
    }
}
