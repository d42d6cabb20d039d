//! Registry of connected push-channel clients and best-effort fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::defaults;
use crate::server::protocol::ServerMessage;

pub type ClientId = u64;

/// The live set of connected output channels.
///
/// Each client gets a bounded outbound queue drained by its connection's
/// writer task. Delivery is best effort per member: a full or closed queue
/// is logged and skipped without affecting the others. Membership changes
/// on connect/disconnect.
#[derive(Clone)]
pub struct Broadcaster {
    clients: Arc<Mutex<HashMap<ClientId, mpsc::Sender<ServerMessage>>>>,
    next_id: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Attach a new client. Returns its id and the receiving end of its
    /// outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(defaults::CLIENT_QUEUE_MESSAGES);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(id, tx);
            debug!("client {id} connected, total {}", clients.len());
        }
        (id, rx)
    }

    /// Detach a client after its connection closes.
    pub fn unregister(&self, id: ClientId) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.remove(&id);
            debug!("client {id} disconnected, total {}", clients.len());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Push a message to every connected client.
    pub fn broadcast(&self, message: &ServerMessage) {
        let targets: Vec<(ClientId, mpsc::Sender<ServerMessage>)> = match self.clients.lock() {
            Ok(clients) => clients
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
            Err(_) => return,
        };

        if targets.is_empty() {
            warn!("broadcast with no clients connected");
            return;
        }

        for (id, tx) in targets {
            if let Err(e) = tx.try_send(message.clone()) {
                warn!("failed to send to client {id}: {e}");
            }
        }
    }

    /// Push a message to one client only (control-plane replies).
    pub fn send_to(&self, id: ClientId, message: &ServerMessage) {
        let tx = self
            .clients
            .lock()
            .ok()
            .and_then(|clients| clients.get(&id).cloned());

        match tx {
            Some(tx) => {
                if let Err(e) = tx.try_send(message.clone()) {
                    warn!("failed to send to client {id}: {e}");
                }
            }
            None => warn!("reply to unknown client {id} dropped"),
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
