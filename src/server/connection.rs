//! Client connections as seen by the broadcaster.
//!
//! The hub only needs to know whether a connection is open and to hand it a
//! text frame without waiting. `WsConnection` satisfies that with a bounded
//! per-client queue drained by a dedicated writer task.

use futures::stream::SplitSink;
use futures::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Outbound frames buffered per client before sends start failing
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("client queue full")]
    QueueFull,
    #[error("{0}")]
    Other(String),
}

pub trait Connection: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a text frame. Must not block.
    fn send(&self, text: &str) -> Result<(), SendError>;

    fn close(&self);
}

pub struct WsConnection {
    tx: mpsc::Sender<Message>,
    open: Arc<AtomicBool>,
}

impl WsConnection {
    /// Wrap the write half of a websocket, spawning its writer task.
    pub fn spawn(
        sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(write_loop(sink, rx, Arc::clone(&open)));
        (Arc::new(Self { tx, open }), task)
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::Receiver<Message>,
    open: Arc<AtomicBool>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            tracing::debug!("Websocket write failed: {e}");
            break;
        }
        if is_close {
            break;
        }
    }
    open.store(false, Ordering::SeqCst);
    let _ = sink.close().await;
}

impl Connection for WsConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send(&self, text: &str) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.tx
            .try_send(Message::Text(text.to_string()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => {
                    self.open.store(false, Ordering::SeqCst);
                    SendError::Closed
                }
            })
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.try_send(Message::Close(None));
        }
    }
}
