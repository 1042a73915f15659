//! Downstream client registry.
//!
//! Tracks per-connection subscriptions and activity. Symbol release is
//! computed here: an upstream unsubscribe is only warranted when no
//! remaining client wants the symbol.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

/// Frames queued for one client's writer task.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Text(String),
    Ping,
    Pong(Vec<u8>),
    Close,
}

struct ClientHandle {
    sender: mpsc::UnboundedSender<ClientFrame>,
    subscriptions: HashSet<String>,
    last_activity: Instant,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<u64, ClientHandle>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, sender: mpsc::UnboundedSender<ClientFrame>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut clients = self.clients.write().await;
        clients.insert(
            id,
            ClientHandle {
                sender,
                subscriptions: HashSet::new(),
                last_activity: Instant::now(),
            },
        );
        id
    }

    /// Drop a client and report the symbols no other client wants.
    pub async fn remove(&self, id: u64) -> Vec<String> {
        let mut clients = self.clients.write().await;
        let Some(handle) = clients.remove(&id) else {
            return Vec::new();
        };
        let symbols: Vec<String> = handle.subscriptions.into_iter().collect();
        released_symbols(&clients, &symbols)
    }

    /// Ask an idle client to close, then drop it like `remove`.
    pub async fn evict(&self, id: u64) -> Vec<String> {
        {
            let clients = self.clients.read().await;
            if let Some(handle) = clients.get(&id) {
                let _ = handle.sender.send(ClientFrame::Close);
            }
        }
        self.remove(id).await
    }

    /// Refresh the activity stamp (inbound message or pong).
    pub async fn touch(&self, id: u64) {
        let mut clients = self.clients.write().await;
        if let Some(handle) = clients.get_mut(&id) {
            handle.last_activity = Instant::now();
        }
    }

    /// Grow a client's subscription set; returns the symbols actually
    /// added for this client.
    pub async fn subscribe(&self, id: u64, symbols: &[String]) -> Vec<String> {
        let mut clients = self.clients.write().await;
        let Some(handle) = clients.get_mut(&id) else {
            return Vec::new();
        };
        symbols
            .iter()
            .filter(|s| handle.subscriptions.insert((*s).clone()))
            .cloned()
            .collect()
    }

    /// Shrink a client's subscription set; returns the symbols no
    /// remaining client still wants (set difference across clients).
    pub async fn unsubscribe(&self, id: u64, symbols: &[String]) -> Vec<String> {
        let mut clients = self.clients.write().await;
        let Some(handle) = clients.get_mut(&id) else {
            return Vec::new();
        };
        let dropped: Vec<String> = symbols
            .iter()
            .filter(|s| handle.subscriptions.remove(*s))
            .cloned()
            .collect();
        released_symbols(&clients, &dropped)
    }

    pub async fn subscriptions_of(&self, id: u64) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut symbols: Vec<String> = clients
            .get(&id)
            .map(|h| h.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    /// Copy of every live sender, for copy-then-iterate broadcasting.
    pub async fn senders(&self) -> Vec<(u64, mpsc::UnboundedSender<ClientFrame>)> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .map(|(id, h)| (*id, h.sender.clone()))
            .collect()
    }

    pub async fn idle_clients(&self, timeout: Duration) -> Vec<u64> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .filter(|(_, h)| h.last_activity.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn released_symbols(clients: &HashMap<u64, ClientHandle>, candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter(|symbol| {
            !clients
                .values()
                .any(|h| h.subscriptions.contains(symbol.as_str()))
        })
        .cloned()
        .collect()
}
