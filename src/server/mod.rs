//! Push channel server: accepts websocket clients behind an origin
//! allow-list, streams enriched results out, and routes inbound control
//! messages to the pipeline.

pub mod broadcaster;
pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::defaults;
use crate::error::{ParleyError, Result};
use crate::server::broadcaster::{Broadcaster, ClientId};
use crate::server::protocol::ClientMessage;

/// Handler for inbound control messages.
///
/// Requester-only replies go back through the broadcaster; the handler
/// decides per message whether to reply, broadcast, or stay quiet.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    async fn handle(&self, client: ClientId, message: ClientMessage);
}

/// True when `origin` may open a connection. An empty allow-list accepts
/// anyone; otherwise the Origin header must be present and listed.
fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin {
        Some(origin) => allowed.iter().any(|a| a.eq_ignore_ascii_case(origin)),
        None => false,
    }
}

/// The push channel server.
pub struct PushServer {
    listener: TcpListener,
    broadcaster: Broadcaster,
    allowed_origins: Arc<Vec<String>>,
    running: Arc<AtomicBool>,
}

impl PushServer {
    /// Bind the listening socket.
    pub async fn bind(
        addr: &str,
        broadcaster: Broadcaster,
        allowed_origins: Vec<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ParleyError::Protocol {
                message: format!("failed to bind {addr}: {e}"),
            })?;

        Ok(Self {
            listener,
            broadcaster,
            allowed_origins: Arc::new(allowed_origins),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until stopped.
    pub async fn serve<H>(&self, handler: Arc<H>) -> Result<()>
    where
        H: ControlHandler + 'static,
    {
        info!("push channel listening on {:?}", self.listener.local_addr());

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            // Accept with a timeout so the stop flag is observed.
            let accepted = tokio::time::timeout(
                defaults::QUEUE_POLL_INTERVAL,
                self.listener.accept(),
            )
            .await;

            match accepted {
                Ok(Ok((stream, peer))) => {
                    let broadcaster = self.broadcaster.clone();
                    let allowed = Arc::clone(&self.allowed_origins);
                    let handler = Arc::clone(&handler);
                    let running = Arc::clone(&self.running);
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_client(stream, peer, broadcaster, allowed, handler, running)
                                .await
                        {
                            debug!("client {peer} ended with error: {e}");
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(ParleyError::Protocol {
                        message: format!("failed to accept connection: {e}"),
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// Ask the accept loop to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn forbidden_response() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("origin not allowed".to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// Handle a single client connection from handshake to disconnect.
async fn handle_client<H>(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: Broadcaster,
    allowed_origins: Arc<Vec<String>>,
    handler: Arc<H>,
    running: Arc<AtomicBool>,
) -> Result<()>
where
    H: ControlHandler,
{
    let origin_check = {
        let allowed = Arc::clone(&allowed_origins);
        move |request: &Request, response: Response| {
            let origin = request
                .headers()
                .get("origin")
                .and_then(|value| value.to_str().ok());
            if origin_allowed(&allowed, origin) {
                Ok(response)
            } else {
                warn!("rejected connection from {peer}: origin {origin:?} not allowed");
                Err(forbidden_response())
            }
        }
    };

    let socket = accept_hdr_async(stream, origin_check)
        .await
        .map_err(|e| ParleyError::Protocol {
            message: format!("handshake with {peer} failed: {e}"),
        })?;

    let (mut sink, mut source) = socket.split();
    let (client_id, mut outbound) = broadcaster.register();
    info!("client {peer} connected as {client_id}");

    // Writer: drain the client's outbound queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match message.to_json() {
                Ok(json) => {
                    if sink.send(Message::text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("failed to serialize push message: {e}"),
            }
        }
    });

    // Every new client learns the current status before anything else.
    handler
        .handle(client_id, ClientMessage::RequestBackendStatus)
        .await;

    // Reader: parse control messages; malformed or unknown input is
    // logged and ignored, never terminates the channel.
    loop {
        let next = tokio::time::timeout(defaults::QUEUE_POLL_INTERVAL, source.next()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!("read error from client {client_id}: {e}");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
        };

        match message {
            Message::Text(text) => match ClientMessage::from_json(text.trim()) {
                Ok(control) => handler.handle(client_id, control).await,
                Err(e) => {
                    warn!("ignoring malformed control message from {client_id}: {e}");
                }
            },
            Message::Close(_) => break,
            _ => continue,
        }
    }

    broadcaster.unregister(client_id);
    writer.abort();
    info!("client {peer} ({client_id}) disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::protocol::ServerMessage;
    use std::sync::Mutex;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    struct RecordingHandler {
        broadcaster: Broadcaster,
        received: Mutex<Vec<(ClientId, ClientMessage)>>,
    }

    #[async_trait]
    impl ControlHandler for RecordingHandler {
        async fn handle(&self, client: ClientId, message: ClientMessage) {
            if message == ClientMessage::RequestBackendStatus {
                self.broadcaster
                    .send_to(client, &ServerMessage::status(true));
            }
            if let Ok(mut received) = self.received.lock() {
                received.push((client, message));
            }
        }
    }

    async fn start_server(
        allowed_origins: Vec<String>,
    ) -> (SocketAddr, Broadcaster, Arc<RecordingHandler>) {
        let broadcaster = Broadcaster::new();
        let server = PushServer::bind("127.0.0.1:0", broadcaster.clone(), allowed_origins)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handler = Arc::new(RecordingHandler {
            broadcaster: broadcaster.clone(),
            received: Mutex::new(Vec::new()),
        });

        let serve_handler = Arc::clone(&handler);
        tokio::spawn(async move { server.serve(serve_handler).await });

        (addr, broadcaster, handler)
    }

    fn request_with_origin(
        addr: SocketAddr,
        origin: &str,
    ) -> tokio_tungstenite::tungstenite::handshake::client::Request {
        let mut request = format!("ws://{addr}").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Origin", origin.parse().unwrap());
        request
    }

    #[test]
    fn origin_allowed_rules() {
        let allowed = vec!["http://localhost:5173".to_string()];

        assert!(origin_allowed(&allowed, Some("http://localhost:5173")));
        assert!(origin_allowed(&allowed, Some("HTTP://LOCALHOST:5173")));
        assert!(!origin_allowed(&allowed, Some("http://evil.example")));
        assert!(!origin_allowed(&allowed, None));

        // Empty allow-list accepts anything, including no origin at all.
        assert!(origin_allowed(&[], Some("http://anywhere")));
        assert!(origin_allowed(&[], None));
    }

    #[tokio::test]
    async fn client_receives_initial_status_on_connect() {
        let (addr, _broadcaster, _handler) =
            start_server(vec!["http://localhost:5173".to_string()]).await;

        let request = request_with_origin(addr, "http://localhost:5173");
        let (mut socket, _) = connect_async(request).await.unwrap();

        let message = socket.next().await.unwrap().unwrap();
        let text = message.into_text().unwrap();
        assert_eq!(
            ServerMessage::from_json(&text).unwrap(),
            ServerMessage::status(true)
        );
    }

    #[tokio::test]
    async fn disallowed_origin_is_rejected() {
        let (addr, _broadcaster, _handler) =
            start_server(vec!["http://localhost:5173".to_string()]).await;

        let request = request_with_origin(addr, "http://evil.example");
        assert!(connect_async(request).await.is_err());
    }

    #[tokio::test]
    async fn control_messages_reach_the_handler() {
        let (addr, _broadcaster, handler) = start_server(vec![]).await;

        let request = request_with_origin(addr, "http://anything");
        let (mut socket, _) = connect_async(request).await.unwrap();

        // Consume the initial status push.
        let _ = socket.next().await;

        socket
            .send(Message::text(r#"{"type":"stop_processing"}"#))
            .await
            .unwrap();

        for _ in 0..100 {
            let seen = handler
                .received
                .lock()
                .unwrap()
                .iter()
                .any(|(_, m)| *m == ClientMessage::StopProcessing);
            if seen {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("control message never reached the handler");
    }

    #[tokio::test]
    async fn malformed_control_messages_keep_the_connection_open() {
        let (addr, broadcaster, _handler) = start_server(vec![]).await;

        let request = request_with_origin(addr, "http://anything");
        let (mut socket, _) = connect_async(request).await.unwrap();
        let _ = socket.next().await;

        socket.send(Message::text("not json")).await.unwrap();
        socket
            .send(Message::text(r#"{"type":"reboot"}"#))
            .await
            .unwrap();

        // The connection survives: a broadcast still arrives.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        broadcaster.broadcast(&ServerMessage::status(false));

        let message = socket.next().await.unwrap().unwrap();
        assert_eq!(
            ServerMessage::from_json(&message.into_text().unwrap()).unwrap(),
            ServerMessage::status(false)
        );
    }

    #[tokio::test]
    async fn disconnect_unregisters_the_client() {
        let (addr, broadcaster, _handler) = start_server(vec![]).await;

        let request = request_with_origin(addr, "http://anything");
        let (mut socket, _) = connect_async(request).await.unwrap();
        let _ = socket.next().await;

        for _ in 0..100 {
            if broadcaster.client_count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(broadcaster.client_count(), 1);

        socket.close(None).await.unwrap();

        for _ in 0..100 {
            if broadcaster.client_count() == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("client was never unregistered");
    }
}
