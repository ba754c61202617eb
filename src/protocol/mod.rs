pub mod inbound;
pub mod outbound;

use crate::error::SessionError;

pub use inbound::decode;
pub use outbound::OutboundFrame;

/// One inbound message, decoded from a socket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// User-side text echoed back by the backend (`text` / `userMessage`).
    Text(String),
    /// Assistant reply text (`response` / `chat` / `parsed_message`).
    ChatResponse(String),
    /// Decoded response audio, normally a WAV file.
    Audio(Vec<u8>),
    /// One piece of a structured code/console stream.
    CodeOutput(CodeOutput),
    /// The backend is waiting on an answer from the user.
    InputRequired(String),
    ResetConfirmed,
    AgentExecutionResult,
    /// A known tag whose payload could not be delivered anywhere.
    Rejected(String),
    /// Type tag this client does not know about.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodeOutput {
    Fragment(CodeFragment),
    /// Payload that was not a well-formed fragment, kept verbatim.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeFragment {
    pub role: String,
    pub kind: String,
    pub shape: FragmentShape,
    /// The fragment exactly as received, for opaque routes.
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentShape {
    Start,
    Content(String),
    End,
}

/// Result of decoding one frame. Decoding never fails outright: a malformed
/// payload degrades to verbatim content and the problem is reported in
/// `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub frame: Frame,
    pub error: Option<SessionError>,
}

impl Decoded {
    fn clean(frame: Frame) -> Self {
        Self { frame, error: None }
    }

    fn degraded(frame: Frame, reason: String) -> Self {
        Self {
            frame,
            error: Some(SessionError::Protocol(reason)),
        }
    }
}
