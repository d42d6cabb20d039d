//! Defensive decoding of recognition-service events.
//!
//! The service streams loosely-structured JSON; fields may be absent,
//! null, or the wrong type. Every extraction here degrades to a default
//! instead of failing, so a malformed event can never take the session down.

use serde_json::Value;

use crate::pipeline::types::{TranscriptRecord, WordTiming};

/// A recognized server event, normalized from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The service acknowledged the stream; the session is fully open.
    Opened,
    /// A transcription result (interim or final).
    Result(TranscriptRecord),
    SpeechStarted,
    /// The speaker stopped; everything before this point is final.
    UtteranceEnd,
    Error { message: String },
    Closed,
    /// Anything unparseable or of an unknown kind. Logged and ignored.
    Unknown { kind: String },
}

/// Decode one raw text message into a `ServerEvent`.
pub fn parse_event(raw: &str) -> ServerEvent {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return ServerEvent::Unknown {
            kind: "unparseable".to_string(),
        };
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match kind {
        "session_opened" => ServerEvent::Opened,
        "result" => ServerEvent::Result(parse_result(&value)),
        "speech_started" => ServerEvent::SpeechStarted,
        "utterance_end" => ServerEvent::UtteranceEnd,
        "error" => ServerEvent::Error {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified error")
                .to_string(),
        },
        "session_closed" => ServerEvent::Closed,
        other => ServerEvent::Unknown {
            kind: other.to_string(),
        },
    }
}

/// Extract a transcript record from a `result` event.
///
/// Missing nested fields yield empty text / zero confidence / no words.
fn parse_result(value: &Value) -> TranscriptRecord {
    let alternative = value
        .get("channel")
        .and_then(|c| c.get("alternatives"))
        .and_then(Value::as_array)
        .and_then(|alts| alts.first());

    let text = alternative
        .and_then(|alt| alt.get("transcript"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let confidence = alternative
        .and_then(|alt| alt.get("confidence"))
        .and_then(Value::as_f64)
        .unwrap_or_default() as f32;

    let words = alternative
        .and_then(|alt| alt.get("words"))
        .and_then(Value::as_array)
        .map(|words| words.iter().map(parse_word).collect::<Vec<WordTiming>>())
        .unwrap_or_default();

    TranscriptRecord {
        text,
        is_final: value
            .get("is_final")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        is_end_of_utterance: false,
        confidence,
        speaker: segment_speaker(&words),
        detected_language: detected_language(value, &words),
        words,
    }
}

fn parse_word(value: &Value) -> WordTiming {
    WordTiming {
        word: value
            .get("word")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        start: value.get("start").and_then(Value::as_f64).unwrap_or_default(),
        end: value.get("end").and_then(Value::as_f64).unwrap_or_default(),
        speaker: value
            .get("speaker")
            .and_then(Value::as_u64)
            .map(|s| s as u32),
        language: value
            .get("language")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Speaker attribution policy: the tag of the first recognized word labels
/// the whole segment. A simplification, not a turn-taking model.
fn segment_speaker(words: &[WordTiming]) -> Option<u32> {
    words.first().and_then(|w| w.speaker)
}

/// Language from the event's top-level tag, falling back to the first
/// word-level tag.
fn detected_language(value: &Value, words: &[WordTiming]) -> Option<String> {
    value
        .get("detected_language")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| words.iter().find_map(|w| w.language.clone()))
}
