//! Data types flowing through the conversation-assist pipeline.

use serde::{Deserialize, Serialize};

/// Which capture stream a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    /// The loopback/virtual-cable device carrying the remote party's audio.
    Loopback,
    /// The local microphone. Captured but not forwarded to recognition.
    Microphone,
}

/// A fixed-length block of PCM samples copied out of a driver callback.
///
/// Ownership passes from the capture callback to the frame queue; a frame
/// is consumed exactly once and then discarded.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub source: FrameSource,
    /// PCM samples (16-bit signed integers, mono, 48 kHz).
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(source: FrameSource, samples: Vec<i16>) -> Self {
        Self { source, samples }
    }

    /// Samples as little-endian PCM bytes, the encoding the recognition
    /// service expects on the wire.
    pub fn pcm_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// Per-word detail from a recognition result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub speaker: Option<u32>,
    pub language: Option<String>,
}

/// A normalized recognition event.
///
/// Produced by the recognition session from each server event; only records
/// with `is_final` and non-empty text, or explicit utterance-end markers,
/// reach the orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranscriptRecord {
    pub text: String,
    pub is_final: bool,
    pub is_end_of_utterance: bool,
    pub confidence: f32,
    /// Speaker tag of the first recognized word in the segment, when
    /// diarization is enabled.
    pub speaker: Option<u32>,
    pub detected_language: Option<String>,
    pub words: Vec<WordTiming>,
}

impl TranscriptRecord {
    /// An explicit end-of-utterance marker with no transcript text.
    pub fn utterance_end() -> Self {
        Self {
            is_final: true,
            is_end_of_utterance: true,
            ..Default::default()
        }
    }

    /// Human-readable speaker label used in history and broadcasts.
    pub fn speaker_label(&self) -> String {
        match self.speaker {
            Some(n) => format!("Speaker {n}"),
            None => "Unknown Speaker".to_string(),
        }
    }

    /// True when the record should be promoted downstream.
    pub fn is_promotable(&self) -> bool {
        self.is_end_of_utterance || (self.is_final && !self.text.is_empty())
    }
}

/// One reply suggestion in the speaker's language with its English gloss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySuggestion {
    pub original: String,
    pub english: String,
}

/// The `replies` field of a broadcast result.
///
/// Successful enrichment carries structured suggestions; a failed stage
/// carries plain error-marker strings. Serialized untagged so the wire
/// shape matches both cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyPayload {
    Suggestions(Vec<ReplySuggestion>),
    Markers(Vec<String>),
}

impl Default for ReplyPayload {
    fn default() -> Self {
        ReplyPayload::Suggestions(Vec::new())
    }
}

impl ReplyPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            ReplyPayload::Suggestions(s) => s.is_empty(),
            ReplyPayload::Markers(m) => m.is_empty(),
        }
    }
}

/// Transcript merged with translation and suggestions, ready to broadcast.
///
/// Built once per finalized transcript and discarded after broadcast.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichedResult {
    pub is_final: bool,
    pub transcript: String,
    pub speaker: String,
    pub detected_language: String,
    pub english: String,
    pub replies: ReplyPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_bytes_little_endian() {
        let frame = AudioFrame::new(FrameSource::Loopback, vec![1, -2, 0x1234]);
        assert_eq!(
            frame.pcm_bytes(),
            vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]
        );
    }

    #[test]
    fn speaker_label_with_and_without_diarization() {
        let mut record = TranscriptRecord::default();
        assert_eq!(record.speaker_label(), "Unknown Speaker");

        record.speaker = Some(2);
        assert_eq!(record.speaker_label(), "Speaker 2");
    }

    #[test]
    fn promotable_requires_final_and_text() {
        let record = TranscriptRecord {
            text: "ciao".to_string(),
            is_final: false,
            ..Default::default()
        };
        assert!(!record.is_promotable());

        let record = TranscriptRecord {
            text: String::new(),
            is_final: true,
            ..Default::default()
        };
        assert!(!record.is_promotable());

        let record = TranscriptRecord {
            text: "ciao".to_string(),
            is_final: true,
            ..Default::default()
        };
        assert!(record.is_promotable());
    }

    #[test]
    fn utterance_end_marker_is_promotable() {
        let record = TranscriptRecord::utterance_end();
        assert!(record.text.is_empty());
        assert!(record.is_promotable());
    }

    #[test]
    fn reply_payload_suggestions_serialize_as_objects() {
        let payload = ReplyPayload::Suggestions(vec![ReplySuggestion {
            original: "Ciao!".to_string(),
            english: "Hi!".to_string(),
        }]);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"[{"original":"Ciao!","english":"Hi!"}]"#);
    }

    #[test]
    fn reply_payload_markers_serialize_as_strings() {
        let payload = ReplyPayload::Markers(vec!["Translation Failed".to_string()]);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"["Translation Failed"]"#);
    }

    #[test]
    fn reply_payload_default_is_empty_suggestions() {
        let payload = ReplyPayload::default();
        assert!(payload.is_empty());
        assert_eq!(serde_json::to_string(&payload).unwrap(), "[]");
    }

    #[test]
    fn reply_payload_roundtrip_both_shapes() {
        let suggestions: ReplyPayload =
            serde_json::from_str(r#"[{"original":"a","english":"b"}]"#).unwrap();
        assert!(matches!(suggestions, ReplyPayload::Suggestions(ref s) if s.len() == 1));

        let markers: ReplyPayload = serde_json::from_str(r#"["Translation Failed"]"#).unwrap();
        assert!(matches!(markers, ReplyPayload::Markers(ref m) if m.len() == 1));
    }
}
