//! Signaling relay server.
//!
//! A flat WebSocket broadcast: every text or binary frame a peer sends is
//! forwarded verbatim to every other connected peer, never back to the
//! sender. The relay does not parse messages and keeps no rooms.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

type Peers = Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<Message>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bound relay, not yet accepting.
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    peers: Peers,
}

impl RelayServer {
    /// Bind to `addr` (`host:port`; port 0 picks a free port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind relay to {addr}"))?;
        Ok(Self {
            listener,
            peers: Arc::default(),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read relay address")
    }

    /// Accept peers until the task is dropped.
    pub async fn run(self) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(serve_peer(stream, addr, Arc::clone(&self.peers)));
                    }
                    Err(e) => log::warn!("[Relay] Accept failed: {e}"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }

    /// Run in a background task.
    pub fn spawn(self) -> Result<RelayHandle> {
        let local_addr = self.local_addr()?;
        let peers = Arc::clone(&self.peers);
        log::info!("[Relay] Listening on ws://{local_addr}");
        let task = tokio::spawn(self.run());
        Ok(RelayHandle {
            local_addr,
            peers,
            task,
        })
    }
}

/// A running relay. Dropping it stops the relay and disconnects every peer.
#[derive(Debug)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    peers: Peers,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Address the relay listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL for clients.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Currently connected peers.
    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }

    /// Stop the relay.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.task.abort();
        lock(&self.peers).clear();
    }
}

async fn serve_peer(stream: TcpStream, addr: SocketAddr, peers: Peers) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("[Relay] Handshake with {addr} failed: {e}");
            return;
        }
    };

    let id = Uuid::new_v4();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let count = {
        let mut peers = lock(&peers);
        peers.insert(id, tx);
        peers.len()
    };
    log::info!("[Relay] Peer {id} connected from {addr} ({count} connected)");

    let (mut sink, mut inbound) = ws.split();
    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    broadcast(&peers, id, &message);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("[Relay] Peer {id} read error: {e}");
                    break;
                }
            },
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        log::debug!("[Relay] Peer {id} write error: {e}");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let count = {
        let mut peers = lock(&peers);
        peers.remove(&id);
        peers.len()
    };
    log::info!("[Relay] Peer {id} disconnected ({count} connected)");
}

fn broadcast(peers: &Peers, from: Uuid, message: &Message) {
    let peers = lock(peers);
    let mut forwarded = 0usize;
    for (id, tx) in peers.iter() {
        if *id != from && tx.send(message.clone()).is_ok() {
            forwarded += 1;
        }
    }
    log::debug!(
        "[Relay] Forwarded {} bytes from {from} to {forwarded} peers",
        message.len()
    );
}
