use crate::error::{Result, SessionError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

/// Frames the client sends. The backend understands these two only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Text { text: String },
    Audio { audio: String },
}

impl OutboundFrame {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundFrame::Text { text: text.into() }
    }

    /// Wrap raw captured audio (a complete WAV file) as base64.
    pub fn audio(bytes: &[u8]) -> Self {
        OutboundFrame::Audio {
            audio: BASE64.encode(bytes),
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SessionError::Protocol(format!("Failed to encode frame: {}", e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Text { .. } => "text",
            OutboundFrame::Audio { .. } => "audio",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn text_frame_shape() {
        let encoded = OutboundFrame::text("open chrome").encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "open chrome"}));
    }

    #[test]
    fn audio_frame_is_base64() {
        let encoded = OutboundFrame::audio(b"RIFF").encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"type": "audio", "audio": "UklGRg=="}));
    }
}
