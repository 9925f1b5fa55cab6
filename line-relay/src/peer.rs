//! One connected participant.
//!
//! A [`Peer`] is a cheap, cloneable handle. The registry keeps one clone for
//! broadcasting while the connection handler owns the read half of the socket.
//! Writes never touch the socket directly: broadcasters push lines into a
//! bounded outbox and a dedicated writer task drains it, so a slow reader on
//! the other end can hold up its own outbox but never the broadcaster.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
    time::timeout,
};
use tracing::debug;

use crate::{config::RelayConfig, error::DeliveryError};

pub type PeerId = u64;

/// Where a peer is in its shutdown. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Registered and accepting lines.
    Open,
    /// The peer's own stream ended. Lines already queued are still written,
    /// new ones are refused.
    Draining,
    /// Nothing more is written; queued lines are discarded.
    Closed,
}

/// Receiving end of a peer's outbox, handed to its writer task.
pub type Outbox = mpsc::Receiver<Arc<str>>;

#[derive(Debug, Clone)]
pub struct Peer {
    inner: Arc<PeerShared>,
}

#[derive(Debug)]
struct PeerShared {
    id: PeerId,
    addr: Option<SocketAddr>,
    outbox: mpsc::Sender<Arc<str>>,
    liveness: watch::Sender<Liveness>,
    write_timeout: Duration,
}

impl Peer {
    pub fn new(id: PeerId, addr: Option<SocketAddr>, config: &RelayConfig) -> (Self, Outbox) {
        let (outbox, receiver) = mpsc::channel(config.outbox_capacity.max(1));
        let (liveness, _) = watch::channel(Liveness::Open);
        let peer = Self {
            inner: Arc::new(PeerShared {
                id,
                addr,
                outbox,
                liveness,
                write_timeout: config.write_timeout,
            }),
        };
        (peer, receiver)
    }

    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.inner.addr
    }

    pub fn liveness(&self) -> Liveness {
        *self.inner.liveness.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.liveness() == Liveness::Open
    }

    /// Marks the peer closed, discarding anything still queued. Returns `true`
    /// only for the call that actually performed the transition.
    pub fn close(&self) -> bool {
        self.inner.liveness.send_replace(Liveness::Closed) != Liveness::Closed
    }

    /// Stops accepting lines but lets the writer flush what is already queued.
    /// Has no effect once the peer is draining or closed.
    pub fn finish(&self) -> bool {
        self.inner.liveness.send_if_modified(|state| {
            if *state == Liveness::Open {
                *state = Liveness::Draining;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the peer has been closed, by anyone.
    pub async fn closed(&self) {
        self.wait_until(|state| state == Liveness::Closed).await;
    }

    /// Resolves with the new state once the peer stops being open.
    pub async fn ended(&self) -> Liveness {
        self.wait_until(|state| state != Liveness::Open).await
    }

    async fn wait_until(&self, reached: impl Fn(Liveness) -> bool) -> Liveness {
        let mut liveness = self.inner.liveness.subscribe();
        // The sender lives as long as `self`, so waiting cannot be cut short.
        match liveness.wait_for(|state| reached(*state)).await {
            Ok(state) => *state,
            Err(_) => Liveness::Closed,
        }
    }

    /// Queues `line` for this peer.
    ///
    /// Waits at most the write timeout for room in the outbox. A peer that
    /// stays full that long is closed and reported as stalled.
    pub async fn deliver(&self, line: Arc<str>) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }

        let line = match self.inner.outbox.try_send(line) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(DeliveryError::Closed),
            Err(TrySendError::Full(line)) => line,
        };

        match timeout(self.inner.write_timeout, self.inner.outbox.send(line)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => {
                if self.close() {
                    debug!(id = self.id(), addr = ?self.addr(), "peer outbox stalled, closing");
                }
                Err(DeliveryError::Stalled)
            }
        }
    }
}

/// Spawns the task that owns the write half of `peer`'s connection.
///
/// The task writes queued lines in order, each terminated by `\n`, until the
/// peer is closed or a write fails or exceeds the timeout. A draining peer
/// gets its remaining queue flushed first. On the way out the task closes the
/// peer and shuts the write half down.
pub fn spawn_writer<W>(peer: Peer, mut outbox: Outbox, mut writer: W) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                biased;
                state = peer.ended() => {
                    if state == Liveness::Draining {
                        drain_outbox(&peer, &mut outbox, &mut writer).await;
                    }
                    break;
                }
                queued = outbox.recv() => match queued {
                    Some(line) => line,
                    None => break,
                },
            };

            if !write_or_give_up(&peer, &mut writer, &line).await {
                break;
            }
        }

        peer.close();
        if let Err(err) = writer.shutdown().await {
            debug!(id = peer.id(), error = ?err, "failed to shut down peer writer");
        }
    })
}

async fn drain_outbox<W>(peer: &Peer, outbox: &mut Outbox, writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    while let Ok(line) = outbox.try_recv() {
        if peer.liveness() == Liveness::Closed || !write_or_give_up(peer, writer, &line).await {
            break;
        }
    }
}

/// Writes one line within the write timeout. `false` means the connection
/// is no longer worth writing to.
async fn write_or_give_up<W>(peer: &Peer, writer: &mut W, line: &str) -> bool
where
    W: AsyncWrite + Unpin,
{
    match timeout(peer.inner.write_timeout, write_line(writer, line)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(
                id = peer.id(),
                addr = ?peer.addr(),
                error = ?err,
                "write to peer failed"
            );
            false
        }
        Err(_) => {
            debug!(id = peer.id(), addr = ?peer.addr(), "write to peer timed out");
            false
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    fn config(capacity: usize, write_timeout: Duration) -> RelayConfig {
        RelayConfig {
            outbox_capacity: capacity,
            write_timeout,
        }
    }

    #[tokio::test]
    async fn close_is_one_way_and_reports_first_caller() {
        let (peer, _outbox) = Peer::new(1, None, &RelayConfig::default());
        assert!(peer.is_open());
        assert!(peer.close());
        assert!(!peer.close());
        assert!(!peer.is_open());

        // Already closed, so this must resolve immediately.
        timeout(Duration::from_secs(1), peer.closed())
            .await
            .expect("closed() should resolve");
    }

    #[tokio::test]
    async fn deliver_to_closed_peer_fails_fast() {
        let (peer, _outbox) = Peer::new(1, None, &RelayConfig::default());
        peer.close();
        assert_eq!(peer.deliver("hi".into()).await, Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn deliver_without_writer_reports_closed() {
        let (peer, outbox) = Peer::new(1, None, &RelayConfig::default());
        drop(outbox);
        assert_eq!(peer.deliver("hi".into()).await, Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn full_outbox_stalls_and_closes_peer() {
        let (peer, _outbox) = Peer::new(1, None, &config(1, Duration::from_millis(50)));

        peer.deliver("first".into()).await.expect("room for one line");
        let result = peer.deliver("second".into()).await;

        assert_eq!(result, Err(DeliveryError::Stalled));
        assert!(!peer.is_open());
    }

    #[tokio::test]
    async fn writer_emits_lines_in_order() {
        let (client, server) = tokio::io::duplex(1024);
        let (peer, outbox) = Peer::new(7, None, &RelayConfig::default());
        let writer = spawn_writer(peer.clone(), outbox, server);

        for line in ["one", "two", "three"] {
            peer.deliver(line.into()).await.expect("deliver");
        }

        let mut reader = BufReader::new(client);
        for expected in ["one", "two", "three"] {
            let mut line = String::new();
            timeout(Duration::from_secs(1), reader.read_line(&mut line))
                .await
                .expect("line in time")
                .expect("read line");
            assert_eq!(line, format!("{expected}\n"));
        }

        peer.close();
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer exits after close")
            .expect("writer task");
    }

    #[tokio::test]
    async fn finish_flushes_queued_lines_before_shutdown() {
        let (client, server) = tokio::io::duplex(1024);
        let (peer, outbox) = Peer::new(9, None, &RelayConfig::default());

        for line in ["first", "second"] {
            peer.deliver(line.into()).await.expect("deliver");
        }
        assert!(peer.finish());
        assert!(!peer.finish());
        assert_eq!(peer.deliver("too late".into()).await, Err(DeliveryError::Closed));

        let writer = spawn_writer(peer.clone(), outbox, server);
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer exits after draining")
            .expect("writer task");
        assert_eq!(peer.liveness(), Liveness::Closed);

        let mut received = String::new();
        BufReader::new(client)
            .read_to_string(&mut received)
            .await
            .expect("read to eof");
        assert_eq!(received, "first\nsecond\n");
    }

    #[tokio::test]
    async fn close_discards_queued_lines() {
        let (client, server) = tokio::io::duplex(1024);
        let (peer, outbox) = Peer::new(10, None, &RelayConfig::default());

        peer.deliver("never written".into()).await.expect("deliver");
        assert!(peer.close());
        assert!(!peer.finish());

        let writer = spawn_writer(peer.clone(), outbox, server);
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer exits after close")
            .expect("writer task");

        let mut received = String::new();
        BufReader::new(client)
            .read_to_string(&mut received)
            .await
            .expect("read to eof");
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn writer_closes_peer_when_remote_is_gone() {
        let (client, server) = tokio::io::duplex(64);
        let (peer, outbox) = Peer::new(3, None, &RelayConfig::default());
        let writer = spawn_writer(peer.clone(), outbox, server);

        drop(client);
        peer.deliver("nobody is listening".into())
            .await
            .expect("queued before the write fails");

        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer exits on write error")
            .expect("writer task");
        assert!(!peer.is_open());
    }
}
