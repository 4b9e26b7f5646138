use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;

mod config;
mod client;
mod controller;
mod server;
mod p2p;
mod store;
mod picker;
mod choker;
pub mod bitfield;
pub mod block;
pub mod descriptor;
pub mod discovery;
pub mod stats;

// Most commonly used block size - 16KB.
pub const BLOCK_SIZE: usize = 0x4000;

// 20 byte SHA1 info hash.
pub type ID = [u8; 20];

// Events the users of the client expect to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentEvent {

    // Store opened and peers requested.
    Opened { id: ID },

    PeerAdmitted { id: ID, address: SocketAddr },

    // Piece verified and written to storage.
    PieceCompleted { id: ID, idx: usize },

    // Sent once, when the last piece is stored.
    Completed { id: ID },

    // The torrent stopped on an error.
    Error { id: ID, error: String },

    Closed { id: ID },

}

pub type UserTx = mpsc::UnboundedSender<TorrentEvent>;
pub type UserRx = mpsc::UnboundedReceiver<TorrentEvent>;

use client::{ClientCommand, ClientTx};

// Re-exports
pub use config::Config;
pub use client::{Result, ClientError};
pub use controller::{Controller, ControllerCommand, ControllerTx, Mode, TorrentError, TorrentParams};
pub use choker::{ChokeCandidate, ChokeDecision, Choker};
pub use picker::{Assignment, Candidate, PieceStrategy, RandomStrategy};
pub use server::{Registry, Server, ServerError};
pub use store::{Piece, PieceStore, StoreError};
pub use p2p::{PeerError, state::{SessionState, ConnState}};
pub use descriptor::ContentDescriptor;
pub use discovery::{Discovery, DiscoveryEvent, DiscoveryTx, Event, StaticDiscovery};

// Binds the listening port and starts the client task.
pub async fn start_client(config: Option<Config>) -> Result<(Handle, UserRx)> {
    let config = config.unwrap_or_default();
    let server = Server::bind(config.listen_address, config.listen_ports.clone()).await?;
    let listen_address = server.local_addr();

    let (user_tx, user_rx) = mpsc::unbounded_channel();
    let (mut client, client_tx) = client::Client::new(config, server, user_tx);
    let client_handle = tokio::spawn(async move {
        if let Err(e) = client.run().await {
            tracing::error!("client runtime error: {:?}", e);
        }
    });

    Ok((
        Handle {
            client_tx,
            client_handle,
            listen_address,
        },
        user_rx,
    ))
}

// Handle returned to the user to interact with the client.
pub struct Handle {

    client_tx: ClientTx,

    client_handle: tokio::task::JoinHandle<()>,

    listen_address: SocketAddr,

}

impl Handle {

    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    pub fn new_torrent(&self, descriptor: ContentDescriptor, discovery: impl Discovery + 'static) -> Result<()> {
        self.client_tx.send(ClientCommand::NewTorrent {
            descriptor: Arc::new(descriptor),
            discovery: Box::new(discovery),
        })?;
        Ok(())
    }

    pub fn remove_torrent(&self, id: ID) -> Result<()> {
        self.client_tx.send(ClientCommand::RemoveTorrent(id))?;
        Ok(())
    }

    pub async fn shutdown(self) -> Result<()> {
        self.client_tx.send(ClientCommand::Shutdown).ok();
        self.client_handle.await.map_err(|_| ClientError::ClientPanic)?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use super::*;

    #[tokio::test]
    async fn test_client_lifecycle() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            dir: dir.path().to_path_buf(),
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_ports: 0..=0,
            ..Config::default()
        };
        let (handle, mut user_rx) = start_client(Some(config)).await?;
        assert_ne!(handle.listen_address().port(), 0);

        let descriptor = ContentDescriptor::new([3; 20], "data.bin", 16, vec![[0; 20]; 2], vec![("data.bin".into(), 20)]);
        let id = descriptor.info_hash;
        handle.new_torrent(descriptor, StaticDiscovery::new(vec![], 20))?;
        assert_eq!(user_rx.recv().await, Some(TorrentEvent::Opened { id }));
        assert_eq!(std::fs::metadata(dir.path().join("data.bin"))?.len(), 20);

        handle.remove_torrent(id)?;
        assert_eq!(user_rx.recv().await, Some(TorrentEvent::Closed { id }));

        handle.shutdown().await?;
        assert_eq!(user_rx.recv().await, None);
        Ok(())
    }
}
