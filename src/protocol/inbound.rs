use super::{CodeFragment, CodeOutput, Decoded, FragmentShape, Frame};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

/// Decode one socket text frame.
pub fn decode(text: &str) -> Decoded {
    let event: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return Decoded::degraded(
                Frame::ChatResponse(text.to_string()),
                format!("frame is not JSON: {}", e),
            )
        }
    };

    let event_type = match event.get("type").and_then(|t| t.as_str()) {
        Some(t) => t,
        None => {
            return Decoded::degraded(
                Frame::ChatResponse(text.to_string()),
                format!("event missing type: {}", event),
            )
        }
    };

    match event_type {
        "text" | "userMessage" => match str_field(&event, "text") {
            Some(t) => Decoded::clean(Frame::Text(t.to_string())),
            None => Decoded::degraded(
                Frame::Text(text.to_string()),
                format!("{} frame without text", event_type),
            ),
        },
        "response" | "chat" | "parsed_message" => match str_field(&event, "text") {
            Some(t) => Decoded::clean(Frame::ChatResponse(t.to_string())),
            None => Decoded::degraded(
                Frame::ChatResponse(text.to_string()),
                format!("{} frame without text", event_type),
            ),
        },
        "audio" => {
            let payload = match str_field(&event, "audio") {
                Some(p) => p,
                None => {
                    return Decoded::degraded(
                        Frame::Rejected(event_type.to_string()),
                        "audio frame without payload".into(),
                    )
                }
            };
            match BASE64.decode(payload.trim()) {
                Ok(bytes) => Decoded::clean(Frame::Audio(bytes)),
                Err(e) => Decoded::degraded(
                    Frame::Rejected(event_type.to_string()),
                    format!("audio payload is not base64: {}", e),
                ),
            }
        }
        "code_output" => match str_field(&event, "text") {
            Some(inner) => decode_code_output(inner),
            None => Decoded::degraded(
                Frame::CodeOutput(CodeOutput::Raw(text.to_string())),
                "code_output frame without text".into(),
            ),
        },
        "input_required" => match str_field(&event, "prompt") {
            Some(p) => Decoded::clean(Frame::InputRequired(p.to_string())),
            None => Decoded::degraded(
                Frame::InputRequired(String::new()),
                "input_required frame without prompt".into(),
            ),
        },
        "reset_confirmed" => Decoded::clean(Frame::ResetConfirmed),
        "agent_execution_result" => Decoded::clean(Frame::AgentExecutionResult),
        other => Decoded::clean(Frame::Unknown(other.to_string())),
    }
}

fn str_field<'a>(event: &'a Value, name: &str) -> Option<&'a str> {
    event.get(name).and_then(|v| v.as_str())
}

/// The `text` of a `code_output` frame is itself JSON describing one fragment.
fn decode_code_output(inner: &str) -> Decoded {
    match parse_fragment(inner) {
        Ok(fragment) => Decoded::clean(Frame::CodeOutput(CodeOutput::Fragment(fragment))),
        Err(reason) => Decoded::degraded(
            Frame::CodeOutput(CodeOutput::Raw(inner.to_string())),
            reason,
        ),
    }
}

fn parse_fragment(inner: &str) -> Result<CodeFragment, String> {
    let value: Value =
        serde_json::from_str(inner).map_err(|e| format!("code_output is not JSON: {}", e))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "code_output is not an object".to_string())?;

    let role = obj
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "code_output fragment without role".to_string())?;
    let kind = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "code_output fragment without type".to_string())?;

    let flag = |name: &str| obj.get(name).and_then(|v| v.as_bool()).unwrap_or(false);
    let shape = if flag("start") {
        FragmentShape::Start
    } else if flag("end") {
        FragmentShape::End
    } else if let Some(content) = obj.get("content") {
        FragmentShape::Content(match content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    } else {
        return Err(format!(
            "code_output fragment ({}, {}) has no start, end or content",
            role, kind
        ));
    };

    Ok(CodeFragment {
        role: role.to_string(),
        kind: kind.to_string(),
        shape,
        raw: inner.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    fn fragment(decoded: Decoded) -> CodeFragment {
        match decoded.frame {
            Frame::CodeOutput(CodeOutput::Fragment(f)) => f,
            other => panic!("expected fragment, got {:?}", other),
        }
    }

    #[test]
    fn user_and_assistant_text_aliases() {
        for tag in ["text", "userMessage"] {
            let d = decode(&format!(r#"{{"type":"{}","text":"hello"}}"#, tag));
            assert_eq!(d.frame, Frame::Text("hello".into()));
            assert!(d.error.is_none());
        }
        for tag in ["response", "chat", "parsed_message"] {
            let d = decode(&format!(r#"{{"type":"{}","text":"hi there"}}"#, tag));
            assert_eq!(d.frame, Frame::ChatResponse("hi there".into()));
        }
    }

    #[test]
    fn audio_payload_is_base64_decoded() {
        let d = decode(r#"{"type":"audio","audio":"UklGRg==","text":"Sure."}"#);
        assert_eq!(d.frame, Frame::Audio(b"RIFF".to_vec()));
    }

    #[test]
    fn bad_base64_is_rejected_with_protocol_error() {
        let d = decode(r#"{"type":"audio","audio":"***"}"#);
        assert_eq!(d.frame, Frame::Rejected("audio".into()));
        assert!(matches!(d.error, Some(SessionError::Protocol(_))));
    }

    #[test]
    fn code_output_shapes() {
        let start = fragment(decode(
            r#"{"type":"code_output","text":"{\"role\":\"computer\",\"type\":\"console\",\"start\":true}"}"#,
        ));
        assert_eq!(start.role, "computer");
        assert_eq!(start.kind, "console");
        assert_eq!(start.shape, FragmentShape::Start);

        let content = fragment(decode(
            r#"{"type":"code_output","text":"{\"role\":\"assistant\",\"type\":\"code\",\"content\":\"print(1)\"}"}"#,
        ));
        assert_eq!(content.shape, FragmentShape::Content("print(1)".into()));

        let end = fragment(decode(
            r#"{"type":"code_output","text":"{\"role\":\"assistant\",\"type\":\"code\",\"end\":true}"}"#,
        ));
        assert_eq!(end.shape, FragmentShape::End);
    }

    #[test]
    fn non_string_content_is_kept_as_json_text() {
        let f = fragment(decode(
            r#"{"type":"code_output","text":"{\"role\":\"computer\",\"type\":\"console\",\"content\":42}"}"#,
        ));
        assert_eq!(f.shape, FragmentShape::Content("42".into()));
    }

    #[test]
    fn malformed_code_output_degrades_to_raw() {
        let d = decode(r#"{"type":"code_output","text":"not json"}"#);
        assert_eq!(d.frame, Frame::CodeOutput(CodeOutput::Raw("not json".into())));
        assert!(matches!(d.error, Some(SessionError::Protocol(_))));

        let d = decode(r#"{"type":"code_output","text":"{\"role\":\"computer\",\"type\":\"console\"}"}"#);
        assert!(matches!(d.frame, Frame::CodeOutput(CodeOutput::Raw(_))));
        assert!(d.error.is_some());
    }

    #[test]
    fn non_json_frame_becomes_verbatim_assistant_text() {
        let d = decode("plain words");
        assert_eq!(d.frame, Frame::ChatResponse("plain words".into()));
        assert!(matches!(d.error, Some(SessionError::Protocol(_))));
    }

    #[test]
    fn missing_text_keeps_the_raw_frame() {
        let raw = r#"{"type":"chat","message":"oops"}"#;
        let d = decode(raw);
        assert_eq!(d.frame, Frame::ChatResponse(raw.into()));
        assert!(d.error.is_some());
    }

    #[test]
    fn control_and_unknown_tags() {
        assert_eq!(decode(r#"{"type":"reset_confirmed"}"#).frame, Frame::ResetConfirmed);
        assert_eq!(
            decode(r#"{"type":"agent_execution_result","result":{}}"#).frame,
            Frame::AgentExecutionResult
        );
        assert_eq!(
            decode(r#"{"type":"input_required","prompt":"Run it? (y/n)"}"#).frame,
            Frame::InputRequired("Run it? (y/n)".into())
        );
        let d = decode(r#"{"type":"telemetry","x":1}"#);
        assert_eq!(d.frame, Frame::Unknown("telemetry".into()));
        assert!(d.error.is_none());
    }
}
