//! Per-connection lifecycle: register, read lines, broadcast, clean up.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite},
    select,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    announce::{joined_name, welcome_line},
    config::RelayConfig,
    peer::{Peer, spawn_writer},
    registry::Registry,
};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Reading,
    Closing,
    Closed,
}

/// Outcome of fanning one line out to a registry snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct ConnectionHandler<R> {
    peer: Peer,
    reader: R,
    registry: Arc<Registry>,
    writer_task: Option<JoinHandle<()>>,
    state: ConnectionState,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Takes ownership of both halves of a fresh connection, starts its
    /// writer and makes it visible to broadcasts.
    pub async fn register<W>(
        reader: R,
        writer: W,
        addr: Option<SocketAddr>,
        registry: Arc<Registry>,
        config: &RelayConfig,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (peer, outbox) = Peer::new(registry.next_id(), addr, config);
        let mut handler = Self {
            writer_task: Some(spawn_writer(peer.clone(), outbox, writer)),
            peer,
            reader,
            registry,
            state: ConnectionState::Connecting,
        };

        handler.registry.register(handler.peer.clone()).await;
        handler.transition(ConnectionState::Registered);
        info!(id = handler.peer.id(), peer = ?addr, "peer registered");
        handler
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(id = self.peer.id(), from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    /// Relays lines until the stream ends, a read fails or the peer is
    /// closed from elsewhere. Cleanup runs on every one of those paths before
    /// the read error, if any, is returned. A closed handler returns at once.
    pub async fn run(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        let outcome = self.read_loop().await;
        self.close().await;
        outcome
    }

    async fn read_loop(&mut self) -> Result<()> {
        self.transition(ConnectionState::Reading);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes = select! {
                read = self.reader.read_line(&mut line) => {
                    read.context("failed to read line from peer")?
                }
                _ = self.peer.closed() => {
                    debug!(id = self.peer.id(), "peer closed while reading");
                    return Ok(());
                }
            };
            if bytes == 0 {
                return Ok(());
            }

            self.handle_line(line.trim_end_matches(LINE_ENDINGS)).await;
        }
    }

    async fn handle_line(&self, line: &str) {
        if let Some(name) = joined_name(line) {
            debug!(id = self.peer.id(), name, "join announcement");
            self.broadcast(&welcome_line(name)).await;
        }
        self.broadcast(line).await;
    }

    pub async fn broadcast(&self, line: &str) -> BroadcastReport {
        broadcast(&self.registry, line).await
    }

    /// Unregisters the peer, then lets its writer flush whatever was queued
    /// before the stream ended. A peer closed from elsewhere has already had
    /// its queue discarded.
    async fn close(&mut self) {
        self.transition(ConnectionState::Closing);
        self.registry.unregister(self.peer.id()).await;
        self.peer.finish();

        if let Some(writer) = self.writer_task.take() {
            if let Err(err) = writer.await {
                debug!(id = self.peer.id(), error = ?err, "peer writer task failed");
            }
        }

        self.transition(ConnectionState::Closed);
        info!(id = self.peer.id(), peer = ?self.peer.addr(), "peer disconnected");
    }
}

/// Writes `line` to every peer in a fresh registry snapshot, sender included.
///
/// A peer that cannot take the line is skipped; its own handler notices the
/// dead connection and unregisters it.
pub async fn broadcast(registry: &Registry, line: &str) -> BroadcastReport {
    let line: Arc<str> = Arc::from(line);
    let mut report = BroadcastReport::default();

    for peer in registry.snapshot().await {
        match peer.deliver(Arc::clone(&line)).await {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                report.failed += 1;
                warn!(id = peer.id(), peer = ?peer.addr(), error = %err, "failed to deliver line");
            }
        }
    }

    report
}
