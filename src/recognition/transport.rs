//! Transport seam for the streaming recognition connection.
//!
//! The session logic only sees the two trait halves of a connection: an
//! audio sink it writes PCM into and an event source it reads service
//! events from. Production uses a websocket; tests script the halves.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::config::RecognitionConfig;
use crate::error::{ParleyError, Result};

/// Write half of a recognition connection.
#[async_trait]
pub trait AudioSink: Send {
    /// Forward one block of PCM bytes.
    async fn send(&mut self, pcm: Vec<u8>) -> Result<()>;

    /// Tell the service the stream is over and close the connection.
    async fn finish(&mut self) -> Result<()>;
}

/// Read half of a recognition connection. Yields raw event payloads;
/// `None` means the connection is gone.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<String>;
}

/// Factory for recognition connections.
#[async_trait]
pub trait RecognitionTransport: Send + Sync {
    async fn connect(
        &self,
        config: &RecognitionConfig,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn EventSource>)>;
}

/// Build the streaming session URL with the negotiated audio parameters.
pub fn session_url(config: &RecognitionConfig) -> Result<Url> {
    let mut url = Url::parse(&config.endpoint).map_err(|e| ParleyError::Connection {
        message: format!("invalid endpoint {}: {e}", config.endpoint),
    })?;

    url.query_pairs_mut()
        .append_pair("model", &config.model)
        .append_pair("language", &config.language)
        .append_pair("encoding", "linear16")
        .append_pair("sample_rate", &crate::defaults::SAMPLE_RATE.to_string())
        .append_pair("channels", "1")
        .append_pair("diarize", if config.diarize { "true" } else { "false" })
        .append_pair("interim_results", "true")
        .append_pair("utterance_end_ms", &config.utterance_end_ms.to_string());

    Ok(url)
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct WsAudioSink {
    sink: WsSink,
}

#[async_trait]
impl AudioSink for WsAudioSink {
    async fn send(&mut self, pcm: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::binary(pcm))
            .await
            .map_err(|e| ParleyError::Connection {
                message: format!("audio send failed: {e}"),
            })
    }

    async fn finish(&mut self) -> Result<()> {
        // Best effort on both: the peer may already be gone.
        let _ = self
            .sink
            .send(Message::text(r#"{"type":"close_stream"}"#))
            .await;
        self.sink.close().await.map_err(|e| ParleyError::Connection {
            message: format!("close failed: {e}"),
        })
    }
}

struct WsEventSource {
    source: WsSource,
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn next_event(&mut self) -> Option<String> {
        loop {
            match self.source.next().await? {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(_)) => return None,
                // Control frames and unexpected binary payloads are skipped.
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("recognition socket read error: {e}");
                    return None;
                }
            }
        }
    }
}

/// Websocket transport to the recognition service.
pub struct WsTransport;

#[async_trait]
impl RecognitionTransport for WsTransport {
    async fn connect(
        &self,
        config: &RecognitionConfig,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn EventSource>)> {
        let url = session_url(config)?;

        let mut request =
            url.as_str()
                .into_client_request()
                .map_err(|e| ParleyError::Connection {
                    message: format!("invalid session request: {e}"),
                })?;

        if let Some(key) = &config.api_key {
            let value = format!("Token {key}")
                .parse()
                .map_err(|_| ParleyError::Connection {
                    message: "API key is not a valid header value".to_string(),
                })?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| ParleyError::Connection {
                    message: format!("handshake failed: {e}"),
                })?;

        let (sink, source) = stream.split();
        Ok((
            Box::new(WsAudioSink { sink }),
            Box::new(WsEventSource { source }),
        ))
    }
}

// ── Scripted transport for tests ───────────────────────────────────────

/// One scripted connection attempt for [`MockTransport`].
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Fail the connect call itself.
    pub fail_connect: bool,
    /// Raw event payloads delivered in order after connecting.
    pub events: Vec<String>,
    /// Keep the connection open (events pending forever) after the script
    /// is exhausted; otherwise the source reports closed.
    pub hold_open: bool,
    /// Fail audio sends on this connection.
    pub fail_sends: bool,
}

impl MockScript {
    /// A connection that opens successfully and stays up.
    pub fn opened() -> Self {
        Self {
            events: vec![r#"{"type":"session_opened"}"#.to_string()],
            hold_open: true,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn with_events(mut self, events: &[&str]) -> Self {
        self.events
            .extend(events.iter().map(|s| s.to_string()));
        self
    }
}

/// Scripted recognition transport for testing.
pub struct MockTransport {
    scripts: std::sync::Mutex<VecDeque<MockScript>>,
    connect_attempts: AtomicU32,
    sent_frames: Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: std::sync::Mutex::new(scripts.into()),
            connect_attempts: AtomicU32::new(0),
            sent_frames: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// PCM payloads sent across all connections.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent_frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }
}

struct MockSink {
    fail_sends: bool,
    sent: Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl AudioSink for MockSink {
    async fn send(&mut self, pcm: Vec<u8>) -> Result<()> {
        if self.fail_sends {
            return Err(ParleyError::Connection {
                message: "mock send failure".to_string(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(pcm);
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MockEventSource {
    events: VecDeque<String>,
    hold_open: bool,
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn next_event(&mut self) -> Option<String> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        if self.hold_open {
            std::future::pending::<()>().await;
        }
        None
    }
}

#[async_trait]
impl RecognitionTransport for MockTransport {
    async fn connect(
        &self,
        _config: &RecognitionConfig,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn EventSource>)> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop_front())
            .unwrap_or_else(MockScript::opened);

        if script.fail_connect {
            return Err(ParleyError::Connection {
                message: "mock connect failure".to_string(),
            });
        }

        Ok((
            Box::new(MockSink {
                fail_sends: script.fail_sends,
                sent: Arc::clone(&self.sent_frames),
            }),
            Box::new(MockEventSource {
                events: script.events.into(),
                hold_open: script.hold_open,
            }),
        ))
    }
}
