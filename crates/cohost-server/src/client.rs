use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Opaque display-connection handle. No persistent identity across reconnects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One connected overlay display.
pub struct Client {
    pub id: ClientId,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected overlay displays. Sole owner of every
/// connection; other components only borrow it for the duration of a
/// broadcast call.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new display connection in the open state.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    /// Remove a client. Idempotent: removing an unknown id is a no-op.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Deliver an already-serialized message to every open connection.
    ///
    /// Delivery to one client never blocks or fails delivery to another: a
    /// full or closed queue is logged and the client is left for its own
    /// close signal (or the liveness sweep) to reap. Returns the number of
    /// queues the message reached. FIFO holds per connection.
    pub fn broadcast_all(&self, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if !client.is_connected() {
                continue;
            }
            match client.tx.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        client_id = %client.id,
                        msg_len = message.len(),
                        "send queue full, dropping broadcast for client"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    client.connected.store(false, Ordering::Relaxed);
                }
            }
        }
        delivered
    }

    /// Number of registered clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    fn mark_disconnected(&self, id: &ClientId) {
        if let Some(client) = self.clients.get(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    fn record_pong(&self, id: &ClientId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }

    /// Remove clients that haven't answered pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.value().id.clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        removed
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage lifecycle
/// with heartbeat. Returns when either half ends; the client is then
/// unregistered.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the per-client queue to the socket + periodic ping
    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        writer_registry.mark_disconnected(&writer_cid);
    });

    // Reader task: forward text frames to the relay, track pongs
    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    reader_registry.record_pong(&reader_cid);
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs automatically
                _ => {}
            }
        }
    });

    // Wait for either half to finish
    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "display disconnected");
}

/// Start a background task that periodically sweeps dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("client_"));
    }

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);

        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        registry.unregister(&id);
        registry.unregister(&id); // second call must be a no-op
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn broadcast_reaches_all_clients_identically() {
        let registry = ClientRegistry::new(32);
        let (_id1, mut rx1) = registry.register();
        let (_id2, mut rx2) = registry.register();
        let (_id3, mut rx3) = registry.register();

        let delivered = registry.broadcast_all(r#"{"type":"text","payload":"hi"}"#);
        assert_eq!(delivered, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert_eq!(rx.try_recv().unwrap(), r#"{"type":"text","payload":"hi"}"#);
        }
    }

    #[test]
    fn broadcast_after_unregister_reaches_nobody() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        registry.unregister(&id);

        let delivered = registry.broadcast_all("msg");
        assert_eq!(delivered, 0);
    }

    #[test]
    fn broadcast_preserves_per_client_order() {
        let registry = ClientRegistry::new(32);
        let (_id, mut rx) = registry.register();

        registry.broadcast_all("first");
        registry.broadcast_all("second");
        registry.broadcast_all("third");

        assert_eq!(rx.try_recv().unwrap(), "first");
        assert_eq!(rx.try_recv().unwrap(), "second");
        assert_eq!(rx.try_recv().unwrap(), "third");
    }

    #[test]
    fn full_queue_does_not_block_other_clients() {
        let registry = ClientRegistry::new(1); // tiny queue
        let (_slow, _rx_slow_kept_full) = registry.register();
        let (_fast, mut rx_fast) = registry.register();

        // First broadcast fills both queues
        assert_eq!(registry.broadcast_all("a"), 2);
        // Drain only the fast client
        assert_eq!(rx_fast.try_recv().unwrap(), "a");

        // Second broadcast: slow client's queue is full, fast still delivers
        let delivered = registry.broadcast_all("b");
        assert_eq!(delivered, 1);
        assert_eq!(rx_fast.try_recv().unwrap(), "b");
    }

    #[test]
    fn closed_receiver_is_marked_disconnected() {
        let registry = ClientRegistry::new(32);
        let (id, rx) = registry.register();
        drop(rx);

        assert_eq!(registry.broadcast_all("msg"), 0);
        let client = registry.clients.get(&id).unwrap();
        assert!(!client.is_connected());
    }

    #[test]
    fn cleanup_removes_expired_clients() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        assert_eq!(registry.count(), 1);

        // Pretend the client never answered a ping
        registry
            .clients
            .get(&id)
            .unwrap()
            .last_pong
            .store(0, Ordering::Relaxed);

        assert_eq!(registry.cleanup_dead_clients(), 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn pong_tracking_keeps_client_alive() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(ClientId::new(), tx);
        assert!(client.is_alive());
        client.record_pong();
        assert!(client.is_alive());
    }
}
