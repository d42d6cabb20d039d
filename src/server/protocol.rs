//! JSON message protocol for the push channel between backend and clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::types::{EnrichedResult, ReplyPayload};

/// Control messages sent by clients to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Merge the provided fields into the live session settings.
    Settings { settings: Map<String, Value> },
    /// Re-enable processing and reopen the recognition session.
    StartProcessing,
    /// Disable processing, close the recognition session, drain queues.
    StopProcessing,
    /// Ask for the current processing state (reply goes to the requester only).
    RequestBackendStatus,
}

impl ClientMessage {
    /// Deserialize a control message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize a control message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages pushed by the backend to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The drastic on/off state of the pipeline.
    BackendStatus {
        #[serde(rename = "isActive")]
        is_active: bool,
    },
    /// One enriched transcript.
    TranscriptData {
        is_final: bool,
        transcript: String,
        speaker: String,
        detected_language: String,
        english: String,
        replies: ReplyPayload,
    },
}

impl ServerMessage {
    pub fn status(is_active: bool) -> Self {
        ServerMessage::BackendStatus { is_active }
    }

    /// Serialize a push message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a push message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl From<EnrichedResult> for ServerMessage {
    fn from(result: EnrichedResult) -> Self {
        ServerMessage::TranscriptData {
            is_final: result.is_final,
            transcript: result.transcript,
            speaker: result.speaker,
            detected_language: result.detected_language,
            english: result.english,
            replies: result.replies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ReplySuggestion;

    #[test]
    fn client_message_json_format_examples() {
        let start = ClientMessage::StartProcessing.to_json().unwrap();
        assert_eq!(start, r#"{"type":"start_processing"}"#);

        let stop = ClientMessage::StopProcessing.to_json().unwrap();
        assert_eq!(stop, r#"{"type":"stop_processing"}"#);

        let status = ClientMessage::RequestBackendStatus.to_json().unwrap();
        assert_eq!(status, r#"{"type":"request_backend_status"}"#);
    }

    #[test]
    fn settings_message_roundtrip() {
        let raw = r#"{"type":"settings","settings":{"userName":"Alex","responseLanguage":"EN"}}"#;
        let message = ClientMessage::from_json(raw).unwrap();

        let ClientMessage::Settings { settings } = &message else {
            panic!("expected settings message");
        };
        assert_eq!(
            settings.get("userName").and_then(Value::as_str),
            Some("Alex")
        );

        let reserialized = message.to_json().unwrap();
        let reparsed = ClientMessage::from_json(&reserialized).unwrap();
        assert_eq!(message, reparsed);
    }

    #[test]
    fn unknown_or_malformed_client_messages_fail_to_parse() {
        assert!(ClientMessage::from_json(r#"{"type":"reboot"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"no_type":true}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
        // settings without a payload is malformed
        assert!(ClientMessage::from_json(r#"{"type":"settings"}"#).is_err());
    }

    #[test]
    fn backend_status_uses_camel_case_flag() {
        let json = ServerMessage::status(true).to_json().unwrap();
        assert_eq!(json, r#"{"type":"backend_status","isActive":true}"#);
    }

    #[test]
    fn transcript_data_wire_shape() {
        let message = ServerMessage::TranscriptData {
            is_final: true,
            transcript: "ciao".to_string(),
            speaker: "Speaker 0".to_string(),
            detected_language: "IT".to_string(),
            english: "hi".to_string(),
            replies: ReplyPayload::Suggestions(vec![ReplySuggestion {
                original: "Ciao anche a te!".to_string(),
                english: "Hi to you too!".to_string(),
            }]),
        };

        let json = message.to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"transcript_data""#));
        assert!(json.contains(r#""transcript":"ciao""#));
        assert!(json.contains(r#""replies":[{"original":"Ciao anche a te!""#));

        let roundtrip = ServerMessage::from_json(&json).unwrap();
        assert_eq!(message, roundtrip);
    }

    #[test]
    fn transcript_data_with_error_markers() {
        let message = ServerMessage::TranscriptData {
            is_final: true,
            transcript: "ciao".to_string(),
            speaker: "Unknown Speaker".to_string(),
            detected_language: "error".to_string(),
            english: "Translation Error".to_string(),
            replies: ReplyPayload::Markers(vec!["Translation Failed".to_string()]),
        };

        let json = message.to_json().unwrap();
        assert!(json.contains(r#""replies":["Translation Failed"]"#));
    }

    #[test]
    fn from_enriched_result_passes_fields_through() {
        let result = EnrichedResult {
            is_final: true,
            transcript: "come stai".to_string(),
            speaker: "Speaker 1".to_string(),
            detected_language: "IT".to_string(),
            english: "how are you".to_string(),
            replies: ReplyPayload::default(),
        };

        let ServerMessage::TranscriptData {
            transcript,
            english,
            ..
        } = ServerMessage::from(result)
        else {
            panic!("expected transcript data");
        };
        assert_eq!(transcript, "come stai");
        assert_eq!(english, "how are you");
    }
}
