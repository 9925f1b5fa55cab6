use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{config::RelayConfig, handler::ConnectionHandler, registry::Registry};

pub struct Relay {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            listener,
            registry,
            config,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&registry).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, config);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(registry: &Registry) {
    let peers = registry.snapshot().await;
    info!(peers = peers.len(), "relay shutting down");
    for peer in peers {
        peer.close();
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
    config: RelayConfig,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, registry, config),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<Registry>,
    config: RelayConfig,
) {
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        let reader = BufReader::new(reader);
        let mut handler =
            ConnectionHandler::register(reader, writer, Some(peer), registry, &config).await;
        if let Err(err) = handler.run().await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}
