//! Live Canvas Feed
//!
//! WebSocket stream of store events for passive displays. Each
//! subscriber first receives a snapshot of the open canvas, then every
//! `CanvasEvent` as JSON. A subscriber that falls behind the broadcast
//! buffer is resynced with a fresh snapshot instead of being dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::canvas::store::CanvasStore;
use crate::network::protocol::FeedMessage;

/// Live feed acceptor.
pub struct CanvasFeed {
    store: Arc<CanvasStore>,
}

impl CanvasFeed {
    /// Create a feed over a store.
    pub fn new(store: Arc<CanvasStore>) -> Self {
        Self { store }
    }

    /// Accept subscribers until shutdown.
    pub async fn serve(&self, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("Feed subscriber connected from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Feed accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Live feed stopping");
                    break;
                }
            }
        }
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let store = self.store.clone();
        // Subscribe before the snapshot so no event between them is lost.
        let mut events = store.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("Feed handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            if send_snapshot(&store, &mut ws_sender).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(event) => {
                                let text = match FeedMessage::Event(event).to_json() {
                                    Ok(t) => t,
                                    Err(e) => {
                                        error!("Failed to serialize feed event: {}", e);
                                        continue;
                                    }
                                };
                                if ws_sender.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(RecvError::Lagged(missed)) => {
                                warn!("Feed subscriber {} lagged by {} events, resyncing", addr, missed);
                                if send_snapshot(&store, &mut ws_sender).await.is_err() {
                                    break;
                                }
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Ping(payload))) => {
                                if ws_sender.send(Message::Pong(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                debug!("Feed socket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }

            debug!("Feed subscriber {} disconnected", addr);
        });
    }
}

async fn send_snapshot<S>(store: &CanvasStore, sink: &mut S) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let snapshot = store.current().await.map_err(|e| warn!("Feed snapshot failed: {}", e))?;
    let text = FeedMessage::Snapshot(snapshot)
        .to_json()
        .map_err(|e| error!("Failed to serialize snapshot: {}", e))?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
