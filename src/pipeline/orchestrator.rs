//! Transcript enrichment: translation, reply suggestions, broadcast.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::defaults;
use crate::pipeline::history::HistoryTurn;
use crate::pipeline::types::{EnrichedResult, ReplyPayload, TranscriptRecord};
use crate::server::broadcaster::Broadcaster;
use crate::server::protocol::ServerMessage;
use crate::services::suggestion::SuggestionClient;
use crate::services::translation::Translator;
use crate::state::SharedState;

/// Single consumer of the transcript queue.
///
/// Records are processed strictly in arrival order; at most one is in
/// flight at a time, so history ordering matches utterance order. No
/// per-record failure may terminate the consume loop: every stage error
/// degrades into an explicit marker and the result is still broadcast.
pub struct Orchestrator {
    state: Arc<SharedState>,
    translator: Arc<dyn Translator>,
    suggestions: Arc<dyn SuggestionClient>,
    broadcaster: Broadcaster,
}

impl Orchestrator {
    pub fn new(
        state: Arc<SharedState>,
        translator: Arc<dyn Translator>,
        suggestions: Arc<dyn SuggestionClient>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            state,
            translator,
            suggestions,
            broadcaster,
        }
    }

    /// Consume loop. Waits on the queue in short bounded slices so both
    /// cancellation and control-plane drains are observed promptly.
    pub async fn run(
        self,
        queue: Arc<Mutex<mpsc::Receiver<TranscriptRecord>>>,
        running: Arc<AtomicBool>,
    ) {
        info!("transcript processor started");
        while running.load(Ordering::SeqCst) {
            let record = {
                let mut rx = queue.lock().await;
                match tokio::time::timeout(defaults::QUEUE_POLL_INTERVAL, rx.recv()).await {
                    Ok(Some(record)) => Some(record),
                    Ok(None) => break,
                    Err(_) => None,
                }
            };

            if let Some(record) = record {
                self.process_record(record).await;
            }
        }
        info!("transcript processor finished");
    }

    /// Enrich and broadcast one promoted record.
    pub async fn process_record(&self, record: TranscriptRecord) {
        if !record.is_promotable() {
            warn!("dropping record that should not have been promoted: {record:?}");
            return;
        }

        // Gate check at dequeue time: disabled means drop, with no history
        // mutation and no broadcast.
        if !self.state.is_enabled() {
            debug!("processing disabled, discarding transcript record");
            return;
        }

        // Utterance-end markers carry no text: pass them through without
        // touching history or the enrichment services.
        if record.text.is_empty() {
            debug!("broadcasting bare utterance-end marker");
            self.broadcaster.broadcast(&ServerMessage::from(EnrichedResult {
                is_final: record.is_final,
                speaker: record.speaker_label(),
                detected_language: record.detected_language.clone().unwrap_or_default(),
                ..Default::default()
            }));
            return;
        }

        let speaker = record.speaker_label();
        {
            let mut history = self.state.history.lock().await;
            history.push(HistoryTurn::new(speaker.clone(), record.text.clone()));
        }

        let mut result = EnrichedResult {
            is_final: record.is_final,
            transcript: record.text.clone(),
            speaker,
            detected_language: record.detected_language.clone().unwrap_or_default(),
            english: String::new(),
            replies: ReplyPayload::default(),
        };

        match self.translator.translate(&record.text).await {
            Ok(translation) => {
                result.english = translation.text.clone();
                result.detected_language = translation.detected_source_language.clone();

                result.replies = self.request_suggestions(&result).await;

                // Fill the turn we just appended so later suggestion calls
                // see the translated text.
                let mut history = self.state.history.lock().await;
                history.set_last_translation(translation.text);
            }
            Err(e) => {
                warn!("translation failed for '{}': {e}", record.text);
                result.english = defaults::TRANSLATION_ERROR_MARKER.to_string();
                result.detected_language = defaults::DETECTED_LANGUAGE_ERROR.to_string();
                result.replies =
                    ReplyPayload::Markers(vec![defaults::TRANSLATION_FAILED_REPLY.to_string()]);
            }
        }

        self.broadcaster.broadcast(&ServerMessage::from(result));
    }

    /// Run the suggestion stage, degrading to an error marker on failure.
    /// An empty suggestion list is a valid no-reply outcome and is kept.
    async fn request_suggestions(&self, result: &EnrichedResult) -> ReplyPayload {
        let settings = self.state.settings.read().await.clone();
        let history = self.state.history.lock().await.snapshot();

        match self
            .suggestions
            .suggest(
                &result.english,
                &settings,
                &result.detected_language,
                &history,
            )
            .await
        {
            Ok(suggestions) => ReplyPayload::Suggestions(suggestions),
            Err(e) => {
                warn!("suggestion request failed: {e}");
                ReplyPayload::Markers(vec![defaults::SUGGESTION_ERROR_REPLY.to_string()])
            }
        }
    }
}
