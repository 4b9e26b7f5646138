use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    ops::RangeInclusive,
    sync::Arc,
    time::Duration,
};
use futures::StreamExt;
use tokio::{net::{TcpListener, TcpStream}, sync::RwLock, task::JoinHandle, time};
use tokio_util::codec::Framed;
use tracing::Instrument;
use crate::{
    controller::{ControllerCommand, ControllerTx},
    p2p::{handshake::{HandshakeCodec, PROTOCOL}, Inbound},
    ID,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// Controllers accepting inbound peers, by info hash.
pub type Registry = Arc<RwLock<HashMap<ID, ControllerTx>>>;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {

    #[error("no free port in {start}..={end}")]
    NoPort { start: u16, end: u16 },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

}

type Result<T> = std::result::Result<T, ServerError>;

// Accepts peer connections for every torrent of the client,
// routing them to the torrent named in their handshake.
#[derive(Debug)]
pub struct Server {

    local_addr: SocketAddr,

    registry: Registry,

    handle: Option<JoinHandle<()>>,

}

impl Server {

    // Listens on the first free port of the range.
    pub async fn bind(address: IpAddr, ports: RangeInclusive<u16>) -> Result<Server> {
        let listener = bind_first_free(address, ports).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("listening on {}", local_addr);

        let registry = Registry::default();
        let handle = tokio::spawn(
            accept_loop(listener, Arc::clone(&registry))
                .instrument(tracing::info_span!("server", address = %local_addr)),
        );

        Ok(Server {
            local_addr,
            registry,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Registry {
        Arc::clone(&self.registry)
    }

    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            handle.await.ok();
        }
        self.registry.write().await.clear();
        tracing::info!("server stopped");
    }
}

async fn bind_first_free(address: IpAddr, ports: RangeInclusive<u16>) -> Result<TcpListener> {
    let (start, end) = (*ports.start(), *ports.end());
    for port in ports {
        match TcpListener::bind((address, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::trace!("port {} unavailable: {}", port, e),
        }
    }
    tracing::error!("no free port in {}..={}", start, end);
    Err(ServerError::NoPort { start, end })
}

async fn accept_loop(listener: TcpListener, registry: Registry) {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => {
                tracing::trace!("inbound connection from {}", address);
                tokio::spawn(route_inbound(stream, address, Arc::clone(&registry)));
            },
            Err(e) => tracing::warn!("inbound peer connection error: {}", e),
        }
    }
}

// Reads the handshake and hands the connection to the torrent it asks for.
async fn route_inbound(stream: TcpStream, address: SocketAddr, registry: Registry) {

    let mut socket = Framed::new(stream, HandshakeCodec);
    let handshake = match time::timeout(HANDSHAKE_TIMEOUT, socket.next()).await {
        Ok(Some(Ok(handshake))) => handshake,
        Ok(Some(Err(e))) => {
            tracing::warn!("bad handshake from {}: {}", address, e);
            return;
        },
        Ok(None) => return,
        Err(_) => {
            tracing::warn!("handshake from {} timed out", address);
            return;
        },
    };

    if handshake.protocol != PROTOCOL {
        tracing::warn!("unknown protocol from {}", address);
        return;
    }

    let controller_tx = registry.read().await.get(&handshake.info_hash).cloned();
    match controller_tx {
        Some(controller_tx) => {
            controller_tx.send(ControllerCommand::Inbound {
                address,
                inbound: Inbound { socket, handshake },
            }).ok();
        },
        None => tracing::warn!("{} asked for unknown info hash {}", address, hex::encode(handshake.info_hash)),
    }
}
