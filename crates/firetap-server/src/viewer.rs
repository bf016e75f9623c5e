//! Connected-viewer registry and WebSocket connection plumbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use firetap_core::ids::ViewerId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A connected viewer's send side.
pub struct Viewer {
    pub id: ViewerId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
}

impl Viewer {
    fn new(id: ViewerId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Registry of all connected viewers.
///
/// Broadcast only iterates a read view; a viewer disconnecting mid-broadcast
/// means a skipped send, never an error.
pub struct ViewerRegistry {
    viewers: DashMap<ViewerId, Arc<Viewer>>,
    max_send_queue: usize,
}

impl ViewerRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            viewers: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new viewer and return its id plus the outbound receiver.
    pub fn register(&self) -> (ViewerId, mpsc::Receiver<String>) {
        let id = ViewerId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.viewers
            .insert(id.clone(), Arc::new(Viewer::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ViewerId) {
        if let Some((_, viewer)) = self.viewers.remove(id) {
            viewer.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Queue a message for one viewer. A full or closed queue drops it.
    pub fn send_to(&self, id: &ViewerId, message: &str) -> bool {
        let Some(viewer) = self.viewers.get(id) else {
            return false;
        };
        match viewer.tx.try_send(message.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(viewer_id = %id, "send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Best-effort fan-out to every open viewer channel at call time.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.viewers.iter() {
            let viewer = entry.value();
            if viewer.is_connected() && viewer.tx.try_send(message.to_string()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Ids of every viewer whose channel is open right now.
    pub fn connected_ids(&self) -> Vec<ViewerId> {
        self.viewers
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.viewers.len()
    }
}

/// Drive one WebSocket connection until either side closes.
///
/// Writer forwards queued outbound messages and pings on an interval; reader
/// hands inbound text frames to the request channel. The viewer is
/// unregistered exactly once, here, when either task ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    viewer_id: ViewerId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ViewerRegistry>,
    requests: mpsc::Sender<(ViewerId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = viewer_id.clone();
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
                    tracing::trace!(viewer_id = %writer_id, "sent ping");
                }
            }
        }
    });

    let reader_id = viewer_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = requests.send((reader_id.clone(), text.to_string())).await;
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&viewer_id);
}
