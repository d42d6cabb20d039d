//! Default configuration constants for parley.
//!
//! Shared constants used across configuration types and the pipeline to
//! keep the capture, recognition, and control stages in agreement.

use std::time::Duration;

/// Audio sample rate in Hz.
///
/// The recognition service expects linear PCM at 48 kHz; the capture side
/// opens its streams at the same rate so no resampling is needed.
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per audio frame.
///
/// 20 ms blocks at 48 kHz. Every frame handed to the pipeline has exactly
/// this many samples.
pub const FRAME_SAMPLES: usize = 960;

/// Capacity of the audio frame queue, in frames.
///
/// 100 frames × 20 ms ≈ 2 seconds of audio. Once full, new frames are
/// dropped at the capture boundary so a recognition outage cannot grow
/// memory without bound.
pub const AUDIO_QUEUE_FRAMES: usize = 100;

/// Capacity of the recognition output queue, in records.
pub const TRANSCRIPT_QUEUE_RECORDS: usize = 64;

/// Maximum number of conversation turns kept as suggestion context.
pub const MAX_HISTORY_TURNS: usize = 10;

/// How often the session supervisor re-checks connection state.
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Delay before the first reconnect attempt after a drop.
pub const RECONNECT_BACKOFF_FIRST: Duration = Duration::from_secs(5);

/// Delay between reconnect attempts after repeated failures.
pub const RECONNECT_BACKOFF_REPEAT: Duration = Duration::from_secs(10);

/// How long the audio pump waits for a frame before logging a liveness
/// warning. The timeout is non-fatal; the wait is simply retried.
pub const AUDIO_LIVENESS_WINDOW: Duration = Duration::from_secs(5);

/// Per-iteration bounded wait on internal queues.
///
/// Short enough that cancellation and queue drains are observed promptly.
pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Deadline for joining pipeline tasks during shutdown.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Capacity of each client's outbound message queue.
pub const CLIENT_QUEUE_MESSAGES: usize = 64;

/// Maximum number of reply suggestions kept per utterance.
pub const MAX_SUGGESTIONS: usize = 3;

/// Placeholder broadcast in the `english` field when translation fails.
pub const TRANSLATION_ERROR_MARKER: &str = "Translation Error";

/// Placeholder broadcast in `replies` when translation fails.
pub const TRANSLATION_FAILED_REPLY: &str = "Translation Failed";

/// Placeholder broadcast in `replies` when the suggestion service fails.
pub const SUGGESTION_ERROR_REPLY: &str = "Reply Error";

/// Language code broadcast when translation fails.
pub const DETECTED_LANGUAGE_ERROR: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_matches_twenty_ms_at_sample_rate() {
        assert_eq!(FRAME_SAMPLES as u32, SAMPLE_RATE / 50);
    }

    #[test]
    fn audio_queue_bounds_roughly_two_seconds() {
        let frame_ms = 1000 * FRAME_SAMPLES as u64 / SAMPLE_RATE as u64;
        assert_eq!(frame_ms * AUDIO_QUEUE_FRAMES as u64, 2000);
    }

    #[test]
    fn repeat_backoff_is_longer_than_first() {
        assert!(RECONNECT_BACKOFF_REPEAT > RECONNECT_BACKOFF_FIRST);
    }
}
