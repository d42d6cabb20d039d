//! Resilient streaming recognition session.
//!
//! Owns one logical connection to the recognition service, survives drops
//! by reconnecting with backoff, and normalizes server events into
//! transcript records for the orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RecognitionConfig;
use crate::defaults;
use crate::pipeline::types::{AudioFrame, TranscriptRecord};
use crate::recognition::event::{ServerEvent, parse_event};
use crate::recognition::transport::{AudioSink, EventSource, RecognitionTransport};

/// Connection lifecycle of the session.
///
/// `Disconnected -> Connecting -> Open -> Disconnected` on error or close;
/// `Closing -> Disconnected` only on explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionState::Disconnected as u8))
    }

    fn load(&self) -> SessionState {
        match self.0.load(Ordering::SeqCst) {
            1 => SessionState::Connecting,
            2 => SessionState::Open,
            3 => SessionState::Closing,
            _ => SessionState::Disconnected,
        }
    }

    fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// One logical streaming connection to the recognition service.
///
/// At most one is open per pipeline instance. All connect/disconnect
/// transitions are serialized through the sink lock.
pub struct RecognitionSession {
    transport: Arc<dyn RecognitionTransport>,
    config: RecognitionConfig,
    output: mpsc::Sender<TranscriptRecord>,
    state: StateCell,
    /// Write half of the live connection. Doubles as the lock that
    /// serializes overlapping connect attempts.
    sink: Mutex<Option<Box<dyn AudioSink>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl RecognitionSession {
    pub fn new(
        transport: Arc<dyn RecognitionTransport>,
        config: RecognitionConfig,
        output: mpsc::Sender<TranscriptRecord>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            output,
            state: StateCell::new(),
            sink: Mutex::new(None),
            supervisor: Mutex::new(None),
            reader: Mutex::new(None),
            running: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    pub fn is_open(&self) -> bool {
        self.state.load() == SessionState::Open
    }

    /// Start the supervising loop. A no-op with a warning if one is
    /// already running.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.supervisor.lock().await;
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            warn!("recognition session already running");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let session = Arc::clone(self);
        *guard = Some(tokio::spawn(session.run()));
        info!("recognition session started");
    }

    /// Stop the supervising loop, await its termination, and perform one
    /// explicit disconnect. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.state.store(SessionState::Closing);
        self.running.store(false, Ordering::SeqCst);

        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle
            && tokio::time::timeout(defaults::SHUTDOWN_DEADLINE, handle)
                .await
                .is_err()
        {
            warn!("recognition supervisor did not stop in time, detaching");
        }

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }

        // Disconnect regardless of whether the loop's own cleanup already
        // did; a missing sink makes this a no-op. Bounded so a connect
        // attempt hung on the network cannot wedge shutdown.
        if tokio::time::timeout(defaults::SHUTDOWN_DEADLINE, self.disconnect())
            .await
            .is_err()
        {
            warn!("recognition disconnect timed out");
        }
        self.state.store(SessionState::Disconnected);
        info!("recognition session stopped");
    }

    /// Forward one audio frame while the session is open.
    ///
    /// A send failure is reported by flipping the state to `Disconnected`
    /// (triggering reconnection), never by returning an error.
    pub async fn send(&self, frame: &AudioFrame) {
        if self.state.load() != SessionState::Open {
            debug!("not connected, dropping audio frame");
            return;
        }

        let mut sink_guard = self.sink.lock().await;
        let Some(sink) = sink_guard.as_mut() else {
            return;
        };

        if let Err(e) = sink.send(frame.pcm_bytes()).await {
            warn!("audio send failed, marking session disconnected: {e}");
            self.state.store(SessionState::Disconnected);
        }
    }

    /// Supervising loop: poll connection state on a fixed interval and
    /// reconnect with backoff whenever the session has dropped. Retries
    /// forever; each attempt is logged.
    async fn run(self: Arc<Self>) {
        debug!("recognition supervisor loop started");
        self.try_connect().await;

        while self.running.load(Ordering::SeqCst) {
            match self.state.load() {
                SessionState::Disconnected => {
                    let backoff =
                        if self.consecutive_failures.load(Ordering::SeqCst) == 0 {
                            defaults::RECONNECT_BACKOFF_FIRST
                        } else {
                            defaults::RECONNECT_BACKOFF_REPEAT
                        };
                    warn!("recognition session down, reconnecting in {backoff:?}");
                    if !self.sleep_while_running(backoff).await {
                        break;
                    }
                    self.try_connect().await;
                }
                _ => {
                    if !self
                        .sleep_while_running(defaults::SESSION_POLL_INTERVAL)
                        .await
                    {
                        break;
                    }
                }
            }
        }
        debug!("recognition supervisor loop finished");
    }

    /// Attempt the network handshake. On success the session moves to
    /// `Connecting`; the service's own opened event moves it to `Open`.
    /// Failure leaves it `Disconnected` for the next retry.
    async fn try_connect(self: &Arc<Self>) {
        let mut sink_guard = self.sink.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        self.state.store(SessionState::Connecting);
        info!("connecting to recognition service");

        match self.transport.connect(&self.config).await {
            Ok((sink, source)) => {
                *sink_guard = Some(sink);

                let session = Arc::clone(self);
                let handle = tokio::spawn(session.read_events(source));
                if let Some(old) = self.reader.lock().await.replace(handle) {
                    old.abort();
                }
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                self.state.store(SessionState::Disconnected);
                warn!("recognition connect failed: {e}");
            }
        }
    }

    /// Read loop for one connection. Normalizes every inbound event and
    /// forwards only promotable records downstream.
    async fn read_events(self: Arc<Self>, mut source: Box<dyn EventSource>) {
        while self.running.load(Ordering::SeqCst) {
            let Some(raw) = source.next_event().await else {
                if self.state.load() != SessionState::Closing {
                    info!("recognition stream closed");
                    self.state.store(SessionState::Disconnected);
                }
                return;
            };

            match parse_event(&raw) {
                ServerEvent::Opened => {
                    info!("recognition session open");
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    self.state.store(SessionState::Open);
                }
                ServerEvent::Result(record) => {
                    if !record.is_final {
                        debug!(text = %record.text, "interim result, not queued");
                        continue;
                    }
                    if record.text.is_empty() {
                        debug!("final result with empty text, skipped");
                        continue;
                    }
                    self.enqueue(record);
                }
                ServerEvent::UtteranceEnd => {
                    self.enqueue(TranscriptRecord::utterance_end());
                }
                ServerEvent::SpeechStarted => {
                    debug!("speech started");
                }
                ServerEvent::Error { message } => {
                    warn!("recognition service error: {message}");
                    self.state.store(SessionState::Disconnected);
                }
                ServerEvent::Closed => {
                    info!("recognition service closed the session");
                    self.state.store(SessionState::Disconnected);
                    return;
                }
                ServerEvent::Unknown { kind } => {
                    debug!("ignoring recognition event of kind '{kind}'");
                }
            }
        }
    }

    fn enqueue(&self, record: TranscriptRecord) {
        if let Err(e) = self.output.try_send(record) {
            warn!("transcript queue unavailable, dropping record: {e}");
        }
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            if let Err(e) = sink.finish().await {
                debug!("error finishing recognition connection: {e}");
            }
            info!("recognition connection closed");
        }
    }

    /// Sleep in short slices, observing the running flag at each one.
    /// Returns false when stopped mid-sleep.
    async fn sleep_while_running(&self, total: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + total;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            let slice = defaults::QUEUE_POLL_INTERVAL.min(deadline - now);
            tokio::time::sleep(slice).await;
        }
    }
}
