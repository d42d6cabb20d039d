//! Top-level composition: capture queue → recognition session →
//! orchestrator → broadcaster, plus the control-plane toggles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::defaults;
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::types::{AudioFrame, FrameSource, TranscriptRecord};
use crate::recognition::session::RecognitionSession;
use crate::recognition::transport::RecognitionTransport;
use crate::server::broadcaster::{Broadcaster, ClientId};
use crate::server::protocol::{ClientMessage, ServerMessage};
use crate::server::ControlHandler;
use crate::services::suggestion::SuggestionClient;
use crate::services::translation::Translator;
use crate::state::SharedState;

/// Owns the lifecycles of every pipeline component and implements the
/// global enable/disable switch with deterministic queue draining.
pub struct PipelineSupervisor {
    state: Arc<SharedState>,
    session: Arc<RecognitionSession>,
    broadcaster: Broadcaster,
    translator: Arc<dyn Translator>,
    suggestions: Arc<dyn SuggestionClient>,
    frame_tx: mpsc::Sender<AudioFrame>,
    /// Receivers sit behind locks so the control plane can drain them
    /// while the pump tasks are between bounded waits.
    frame_rx: Arc<Mutex<mpsc::Receiver<AudioFrame>>>,
    transcript_rx: Arc<Mutex<mpsc::Receiver<TranscriptRecord>>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes start_processing/stop_processing from concurrent clients.
    toggle: Mutex<()>,
}

impl PipelineSupervisor {
    pub fn new(
        config: &Config,
        transport: Arc<dyn RecognitionTransport>,
        translator: Arc<dyn Translator>,
        suggestions: Arc<dyn SuggestionClient>,
    ) -> Arc<Self> {
        let (frame_tx, frame_rx) = mpsc::channel(defaults::AUDIO_QUEUE_FRAMES);
        let (transcript_tx, transcript_rx) = mpsc::channel(defaults::TRANSCRIPT_QUEUE_RECORDS);

        let session = RecognitionSession::new(transport, config.recognition.clone(), transcript_tx);

        Arc::new(Self {
            state: SharedState::new(),
            session,
            broadcaster: Broadcaster::new(),
            translator,
            suggestions,
            frame_tx,
            frame_rx: Arc::new(Mutex::new(frame_rx)),
            transcript_rx: Arc::new(Mutex::new(transcript_rx)),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            toggle: Mutex::new(()),
        })
    }

    /// Producer side of the frame queue, handed to the capture bridge.
    pub fn frame_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.frame_tx.clone()
    }

    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn session(&self) -> Arc<RecognitionSession> {
        Arc::clone(&self.session)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open the recognition session and spawn the pump tasks.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("pipeline already running");
            return;
        }

        if self.state.is_enabled() {
            self.session.start().await;
        }

        let orchestrator = Orchestrator::new(
            Arc::clone(&self.state),
            Arc::clone(&self.translator),
            Arc::clone(&self.suggestions),
            self.broadcaster.clone(),
        );

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(Arc::clone(self).audio_pump()));
        tasks.push(tokio::spawn(orchestrator.run(
            Arc::clone(&self.transcript_rx),
            Arc::clone(&self.running),
        )));
        info!("pipeline started");
    }

    /// Stop everything: session, pump tasks, queues. Idempotent.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.session.stop().await;

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if tokio::time::timeout(defaults::SHUTDOWN_DEADLINE, task)
                .await
                .is_err()
            {
                warn!("pipeline task did not stop before deadline, detaching");
            }
        }
        info!("pipeline stopped");
    }

    /// Forward loopback frames to the recognition session.
    ///
    /// Frames arriving while processing is disabled are dropped, not
    /// queued; microphone frames are captured but never forwarded. A
    /// quiet stretch longer than the liveness window is logged and the
    /// wait simply retried.
    async fn audio_pump(self: Arc<Self>) {
        info!("audio pump started");
        let mut last_frame = tokio::time::Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let frame = {
                let mut rx = self.frame_rx.lock().await;
                match tokio::time::timeout(defaults::QUEUE_POLL_INTERVAL, rx.recv()).await {
                    Ok(Some(frame)) => Some(frame),
                    Ok(None) => break,
                    Err(_) => None,
                }
            };

            let Some(frame) = frame else {
                if last_frame.elapsed() >= defaults::AUDIO_LIVENESS_WINDOW {
                    warn!(
                        "no audio frames for {:?}, capture may be stalled",
                        defaults::AUDIO_LIVENESS_WINDOW
                    );
                    last_frame = tokio::time::Instant::now();
                }
                continue;
            };

            last_frame = tokio::time::Instant::now();

            if !self.state.is_enabled() {
                continue;
            }
            if frame.source != FrameSource::Loopback {
                continue;
            }

            self.session.send(&frame).await;
        }
        info!("audio pump finished");
    }

    /// Re-open the session and lift the gate. Broadcasts the new status;
    /// replies only to the requester when nothing changed.
    async fn start_processing(&self, client: ClientId) {
        let _guard = self.toggle.lock().await;

        if self.state.is_enabled() {
            info!("start_processing requested but already enabled");
            self.broadcaster.send_to(client, &ServerMessage::status(true));
            return;
        }

        info!("enabling processing");
        self.session.start().await;
        self.state.set_enabled(true);
        self.broadcaster.broadcast(&ServerMessage::status(true));
    }

    /// Close the gate first so no new work is queued, then tear the
    /// session down and empty both queues so nothing stale is processed
    /// once re-enabled.
    async fn stop_processing(&self, client: ClientId) {
        let _guard = self.toggle.lock().await;

        if !self.state.is_enabled() {
            info!("stop_processing requested but already disabled");
            self.broadcaster.send_to(client, &ServerMessage::status(false));
            return;
        }

        info!("disabling processing");
        self.state.set_enabled(false);
        self.session.stop().await;
        self.drain_queues().await;
        self.broadcaster.broadcast(&ServerMessage::status(false));
    }

    /// Empty the audio and transcript queues.
    async fn drain_queues(&self) {
        let mut dropped_frames = 0usize;
        {
            let mut rx = self.frame_rx.lock().await;
            while rx.try_recv().is_ok() {
                dropped_frames += 1;
            }
        }

        let mut dropped_records = 0usize;
        {
            let mut rx = self.transcript_rx.lock().await;
            while rx.try_recv().is_ok() {
                dropped_records += 1;
            }
        }

        debug!("drained {dropped_frames} audio frames and {dropped_records} transcript records");
    }
}

#[async_trait]
impl ControlHandler for PipelineSupervisor {
    async fn handle(&self, client: ClientId, message: ClientMessage) {
        match message {
            ClientMessage::Settings { settings } => {
                let mut live = self.state.settings.write().await;
                live.merge(&settings);
                info!("settings updated");
            }
            ClientMessage::StartProcessing => self.start_processing(client).await,
            ClientMessage::StopProcessing => self.stop_processing(client).await,
            ClientMessage::RequestBackendStatus => {
                self.broadcaster
                    .send_to(client, &ServerMessage::status(self.state.is_enabled()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::transport::{MockScript, MockTransport};
    use crate::services::suggestion::MockSuggestionClient;
    use crate::services::translation::MockTranslator;
    use serde_json::json;
    use std::time::Duration;

    fn supervisor_with(
        scripts: Vec<MockScript>,
    ) -> (Arc<PipelineSupervisor>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new(scripts));
        let supervisor = PipelineSupervisor::new(
            &Config::default(),
            Arc::clone(&transport) as Arc<dyn RecognitionTransport>,
            Arc::new(MockTranslator::new().with_response("translated")),
            Arc::new(MockSuggestionClient::new()),
        );
        (supervisor, transport)
    }

    fn loopback_frame() -> AudioFrame {
        AudioFrame::new(FrameSource::Loopback, vec![7i16; 960])
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..3000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn frames_flow_to_the_session_while_enabled() {
        let (supervisor, transport) = supervisor_with(vec![MockScript::opened()]);

        supervisor.start().await;
        wait_for(|| supervisor.session.is_open()).await;

        supervisor.frame_sender().send(loopback_frame()).await.unwrap();
        wait_for(|| !transport.sent_frames().is_empty()).await;

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn microphone_frames_are_never_forwarded() {
        let (supervisor, transport) = supervisor_with(vec![MockScript::opened()]);

        supervisor.start().await;
        wait_for(|| supervisor.session.is_open()).await;

        supervisor
            .frame_sender()
            .send(AudioFrame::new(FrameSource::Microphone, vec![1i16; 960]))
            .await
            .unwrap();
        supervisor.frame_sender().send(loopback_frame()).await.unwrap();

        wait_for(|| !transport.sent_frames().is_empty()).await;
        // Only the loopback frame made it out.
        assert_eq!(transport.sent_frames().len(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_gate_drops_frames_instead_of_queueing() {
        let (supervisor, transport) =
            supervisor_with(vec![MockScript::opened(), MockScript::opened()]);

        supervisor.start().await;
        wait_for(|| supervisor.session.is_open()).await;

        supervisor.handle(1, ClientMessage::StopProcessing).await;

        for _ in 0..5 {
            supervisor.frame_sender().send(loopback_frame()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(transport.sent_frames().is_empty());

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_leaves_no_stale_items() {
        // Queue frames before any pump runs, then toggle off and on: the
        // stale frames must be drained, not forwarded after re-enable.
        let (supervisor, transport) = supervisor_with(vec![MockScript::opened()]);

        for _ in 0..5 {
            supervisor.frame_sender().send(loopback_frame()).await.unwrap();
        }

        supervisor.handle(1, ClientMessage::StopProcessing).await;
        supervisor.handle(1, ClientMessage::StartProcessing).await;
        assert!(supervisor.state.is_enabled());

        supervisor.start().await;
        wait_for(|| supervisor.session.is_open()).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(transport.sent_frames().is_empty());

        // Fresh frames still flow.
        supervisor.frame_sender().send(loopback_frame()).await.unwrap();
        wait_for(|| transport.sent_frames().len() == 1).await;

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_processing_twice_only_replies_the_second_time() {
        let (supervisor, _transport) = supervisor_with(vec![MockScript::opened()]);
        let broadcaster = supervisor.broadcaster();
        let (requester, mut requester_rx) = broadcaster.register();
        let (_other, mut other_rx) = broadcaster.register();

        supervisor.handle(requester, ClientMessage::StopProcessing).await;

        // First call: teardown happened and everyone was notified.
        assert_eq!(requester_rx.recv().await, Some(ServerMessage::status(false)));
        assert_eq!(other_rx.recv().await, Some(ServerMessage::status(false)));

        supervisor.handle(requester, ClientMessage::StopProcessing).await;

        // Second call: only the requester hears back.
        assert_eq!(requester_rx.recv().await, Some(ServerMessage::status(false)));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn start_processing_when_enabled_replies_to_requester_only() {
        let (supervisor, _transport) = supervisor_with(vec![MockScript::opened()]);
        let broadcaster = supervisor.broadcaster();
        let (requester, mut requester_rx) = broadcaster.register();
        let (_other, mut other_rx) = broadcaster.register();

        supervisor.handle(requester, ClientMessage::StartProcessing).await;

        assert_eq!(requester_rx.recv().await, Some(ServerMessage::status(true)));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn settings_message_merges_into_live_settings() {
        let (supervisor, _transport) = supervisor_with(vec![]);

        let incoming = json!({ "userName": "Alex" });
        let serde_json::Value::Object(map) = incoming else {
            unreachable!()
        };
        supervisor
            .handle(1, ClientMessage::Settings { settings: map })
            .await;

        assert_eq!(supervisor.state.settings.read().await.user_name(), "Alex");
    }

    #[tokio::test(start_paused = true)]
    async fn status_request_replies_to_requester_only() {
        let (supervisor, _transport) = supervisor_with(vec![]);
        let broadcaster = supervisor.broadcaster();
        let (requester, mut requester_rx) = broadcaster.register();
        let (_other, mut other_rx) = broadcaster.register();

        supervisor
            .handle(requester, ClientMessage::RequestBackendStatus)
            .await;

        assert_eq!(requester_rx.recv().await, Some(ServerMessage::status(true)));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent() {
        let (supervisor, _transport) = supervisor_with(vec![MockScript::opened()]);

        supervisor.start().await;
        supervisor.shutdown().await;
        supervisor.shutdown().await;

        assert!(!supervisor.is_running());
    }
}
