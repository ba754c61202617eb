use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Socket failed to open, dropped, or a send was attempted while down.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Inbound payload was not the structured JSON we expected.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Scratch file or playback engine failure for a single clip.
    #[error("Playback error: {0}")]
    Playback(String),

    /// Input device permission or acquisition failure.
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("No input prompt is pending")]
    NoPendingPrompt,

    #[error("Input is empty")]
    EmptyInput,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e.to_string())
    }
}

impl SessionError {
    /// Whether this error is shown to the observer (status/alert) rather than
    /// absorbed and logged.
    pub fn is_surfaced(&self) -> bool {
        match self {
            SessionError::Connection(_) | SessionError::Capture(_) => true,
            SessionError::Protocol(_) | SessionError::Playback(_) => false,
            SessionError::NoPendingPrompt | SessionError::EmptyInput => true,
            SessionError::Config(_) | SessionError::Io(_) => true,
        }
    }

    /// Short text suitable for a status line.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Connection(_) => "Connection lost. Reset to reconnect.".to_string(),
            SessionError::Protocol(_) => "Received a malformed message.".to_string(),
            SessionError::Playback(_) => "Could not play a response clip.".to_string(),
            SessionError::Capture(_) => {
                "Microphone unavailable. Check permissions and try again.".to_string()
            }
            SessionError::NoPendingPrompt => "Nothing is waiting for input.".to_string(),
            SessionError::EmptyInput => "Type something first.".to_string(),
            SessionError::Config(_) => "Configuration error. Please check settings.".to_string(),
            SessionError::Io(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
