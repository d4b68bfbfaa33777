//! Dashboard event hub.
//!
//! Accepts websocket clients on one endpoint, answers `ping`/`subscribe`,
//! and fans out file, commit and metrics broadcasts. Every client is
//! independent: a closed or failing connection is skipped and logged, never
//! allowed to hold up delivery to the others.

pub mod connection;
pub mod protocol;

pub use connection::{Connection, SendError, WsConnection};
pub use protocol::{ClientMessage, ServerMessage};

use crate::data::{CommitEvent, FileChangeEvent, SystemMetrics};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub type ClientId = u64;

/// How long a disconnecting client's writer may take to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A peer that has not finished the websocket upgrade by then is dropped
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for connection tasks in `close`; stragglers are aborted
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

struct ClientSlot {
    conn: Arc<dyn Connection>,
    /// Empty means "everything"
    channels: HashSet<String>,
}

impl ClientSlot {
    /// Whether a broadcast on `channel` goes to this client.
    ///
    /// Only known channel names ever reach `channels` (unknown ones are
    /// acknowledged at subscribe time but not recorded), so a client that
    /// only asked for misspelled channels keeps receiving everything.
    fn wants(&self, channel: Option<&str>) -> bool {
        match channel {
            Some(channel) => self.channels.is_empty() || self.channels.contains(channel),
            None => true,
        }
    }
}

pub struct EventBroadcaster {
    clients: RwLock<HashMap<ClientId, ClientSlot>>,
    next_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    closed: AtomicBool,
}

impl EventBroadcaster {
    /// A hub with no listener; connections are attached by hand.
    pub fn new() -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Bind a websocket endpoint and start accepting clients.
    pub async fn bind(addr: &str) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind dashboard endpoint {addr}"))?;
        let hub = Self::new();
        hub.serve(listener);
        Ok(hub)
    }

    /// Run the accept loop on an already-bound listener.
    pub fn serve(self: &Arc<Self>, listener: TcpListener) {
        let addr = listener.local_addr().ok();
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = addr;
        }
        if let Some(addr) = addr {
            info!(%addr, "Dashboard endpoint listening");
        }

        let hub = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    res = listener.accept() => match res {
                        Ok((stream, peer)) => {
                            let conn_task = tokio::spawn(Arc::clone(&hub).handle_socket(stream, peer));
                            hub.track(conn_task);
                        }
                        Err(e) => warn!("Dashboard accept failed: {e}"),
                    },
                }
            }
            debug!("Dashboard accept loop stopped");
        });
        self.track(task);
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }

    async fn handle_socket(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handshake =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream));
        let ws = tokio::select! {
            _ = shutdown.changed() => {
                debug!(%peer, "Hub closing during websocket handshake");
                return;
            }
            res = handshake => match res {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    debug!(%peer, "Websocket handshake failed: {e}");
                    return;
                }
                Err(_) => {
                    debug!(%peer, "Websocket handshake timed out");
                    return;
                }
            },
        };
        let (sink, mut source) = ws.split();
        let (conn, writer) = WsConnection::spawn(sink);
        let id = self.attach(conn.clone());
        info!(client_id = id, %peer, "Dashboard client connected");

        while !self.is_closed() {
            tokio::select! {
                _ = shutdown.changed() => break,
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_client_message(id, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(client_id = id, "Websocket read failed: {e}");
                        break;
                    }
                },
            }
        }

        self.detach(id);
        conn.close();
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            debug!(client_id = id, "Writer did not drain before timeout");
        }
        info!(client_id = id, "Dashboard client disconnected");
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|a| *a)
    }

    /// Register a connection and greet it with `welcome`.
    pub fn attach(&self, conn: Arc<dyn Connection>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            conn.close();
            return id;
        }

        self.send_to(id, conn.as_ref(), &ServerMessage::welcome());
        match self.clients.write() {
            Ok(mut clients) => {
                clients.insert(
                    id,
                    ClientSlot {
                        conn,
                        channels: HashSet::new(),
                    },
                );
            }
            Err(e) => warn!("Client set lock poisoned: {e}"),
        }
        id
    }

    pub fn detach(&self, id: ClientId) {
        if let Ok(mut clients) = self.clients.write() {
            clients.remove(&id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn subscriptions(&self, id: ClientId) -> Vec<String> {
        let mut channels: Vec<String> = self
            .clients
            .read()
            .ok()
            .and_then(|c| c.get(&id).map(|s| s.channels.iter().cloned().collect()))
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Handle one text frame from a client, replying on its connection.
    /// Malformed payloads are logged and ignored.
    pub fn handle_client_message(&self, id: ClientId, text: &str) -> Option<ServerMessage> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(client_id = id, "Ignoring malformed client message: {e}");
                return None;
            }
        };

        let reply = match message {
            ClientMessage::Ping => ServerMessage::Pong,
            ClientMessage::Subscribe { channel } if !protocol::is_known_channel(&channel) => {
                warn!(client_id = id, %channel, "Ignoring subscription to unknown channel");
                ServerMessage::Subscribed { channel }
            }
            ClientMessage::Subscribe { channel } => {
                if let Ok(mut clients) = self.clients.write() {
                    if let Some(slot) = clients.get_mut(&id) {
                        slot.channels.insert(channel.clone());
                    }
                }
                debug!(client_id = id, %channel, "Client subscribed");
                ServerMessage::Subscribed { channel }
            }
        };

        let conn = self
            .clients
            .read()
            .ok()
            .and_then(|c| c.get(&id).map(|s| Arc::clone(&s.conn)));
        if let Some(conn) = conn {
            self.send_to(id, conn.as_ref(), &reply);
        }
        Some(reply)
    }

    fn send_to(&self, id: ClientId, conn: &dyn Connection, message: &ServerMessage) -> bool {
        if !conn.is_open() {
            return false;
        }
        let text = match message.to_json() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to encode server message: {e}");
                return false;
            }
        };
        match conn.send(&text) {
            Ok(()) => true,
            Err(e) => {
                warn!(client_id = id, "Send to dashboard client failed: {e}");
                false
            }
        }
    }

    pub fn broadcast_file_change(&self, event: &FileChangeEvent) -> usize {
        self.broadcast(&ServerMessage::FileChange {
            data: event.clone(),
        })
    }

    pub fn broadcast_git_commit(&self, event: &CommitEvent) -> usize {
        self.broadcast(&ServerMessage::GitCommit {
            data: event.clone(),
        })
    }

    pub fn broadcast_system_metrics(&self, metrics: &SystemMetrics) -> usize {
        self.broadcast(&ServerMessage::SystemMetrics {
            data: metrics.clone(),
        })
    }

    /// Send to every open client that wants the message's channel.
    /// Returns how many clients accepted it.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        if self.is_closed() {
            return 0;
        }
        let text = match message.to_json() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to encode broadcast: {e}");
                return 0;
            }
        };
        let channel = message.channel();

        // Snapshot targets so no lock is held while sending.
        let targets: Vec<(ClientId, Arc<dyn Connection>)> = self
            .clients
            .read()
            .map(|clients| {
                clients
                    .iter()
                    .filter(|(_, slot)| slot.wants(channel))
                    .map(|(id, slot)| (*id, Arc::clone(&slot.conn)))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, conn) in targets {
            if !conn.is_open() {
                continue;
            }
            match conn.send(&text) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client_id = id, "Broadcast to dashboard client failed: {e}"),
            }
        }
        delivered
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting, close every connection and wait for connection tasks.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let drained: Vec<ClientSlot> = match self.clients.write() {
            Ok(mut clients) => clients.drain().map(|(_, slot)| slot).collect(),
            Err(e) => {
                warn!("Client set lock poisoned: {e}");
                Vec::new()
            }
        };
        for slot in drained {
            slot.conn.close();
        }

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut t| t.drain(..).collect())
            .unwrap_or_default();
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let joined = tokio::time::timeout(CLOSE_TIMEOUT, futures::future::join_all(tasks)).await;
        if joined.is_err() {
            warn!("Connection tasks did not finish in time, aborting");
            for handle in aborts {
                handle.abort();
            }
        }
        info!("Dashboard hub closed");
    }
}
