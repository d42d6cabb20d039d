//! parley - real-time conversation assist
//!
//! Captures live loopback audio, streams it to a recognition service,
//! enriches finalized transcripts with translation and reply suggestions,
//! and pushes the results to connected clients over a websocket channel.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod recognition;
pub mod server;
pub mod services;
pub mod state;

// Capture bridge
pub use audio::capture::AudioCapture;

// Recognition session
pub use recognition::session::{RecognitionSession, SessionState};
pub use recognition::transport::{RecognitionTransport, WsTransport};

// Pipeline
pub use pipeline::supervisor::PipelineSupervisor;
pub use pipeline::types::{AudioFrame, EnrichedResult, TranscriptRecord};

// Push channel
pub use server::broadcaster::Broadcaster;
pub use server::protocol::{ClientMessage, ServerMessage};
pub use server::{ControlHandler, PushServer};

// External service contracts
pub use services::suggestion::SuggestionClient;
pub use services::translation::Translator;

// Error handling
pub use error::{ParleyError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when a git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
