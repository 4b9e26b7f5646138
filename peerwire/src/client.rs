use std::{collections::HashMap, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use crate::{
    choker::Choker,
    config::Config,
    controller::{Controller, ControllerCommand, ControllerTx, TorrentParams},
    descriptor::ContentDescriptor,
    discovery::Discovery,
    picker::RandomStrategy,
    server::{Server, ServerError},
    ID,
    UserTx,
};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {

    #[error("client has been unexpectedly dropped")]
    ClientDropped,

    #[error("client panicked")]
    ClientPanic,

    #[error("server error: {0}")]
    Server(#[from] ServerError),

}

impl<T> From<mpsc::error::SendError<T>> for ClientError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        ClientError::ClientDropped
    }
}

pub enum ClientCommand {

    NewTorrent {
        descriptor: Arc<ContentDescriptor>,
        discovery: Box<dyn Discovery>,
    },

    RemoveTorrent(ID),

    Shutdown,

}

pub type Result<T> = std::result::Result<T, ClientError>;
pub type ClientRx = mpsc::UnboundedReceiver<ClientCommand>;
pub type ClientTx = mpsc::UnboundedSender<ClientCommand>;

struct TorrentHandle {

    controller_tx: ControllerTx,

    handle: JoinHandle<()>,

}

impl TorrentHandle {
    async fn shutdown(self) {
        self.controller_tx.send(ControllerCommand::Shutdown).ok();
        if let Err(e) = self.handle.await {
            tracing::error!("torrent task panicked: {}", e);
        }
    }
}

pub struct Client {

    client_rx: ClientRx,

    torrents: HashMap<ID, TorrentHandle>,

    user_tx: UserTx,

    config: Config,

    // Shared by every torrent, inbound peers are routed by info hash.
    server: Server,

}

impl Client {

    pub fn new(config: Config, server: Server, user_tx: UserTx) -> (Self, ClientTx) {

        let (client_tx, client_rx) = mpsc::unbounded_channel();

        (
            Client {
                client_rx,
                torrents: HashMap::new(),
                user_tx,
                config,
                server,
            },
            client_tx,
        )
    }

    pub async fn run(&mut self) -> Result<()> {

        while let Some(cmd) = self.client_rx.recv().await {
            match cmd {

                ClientCommand::NewTorrent { descriptor, discovery } => self.new_torrent(descriptor, discovery),

                ClientCommand::RemoveTorrent(id) => {
                    if let Some(torrent) = self.torrents.remove(&id) {
                        torrent.shutdown().await;
                    } else {
                        tracing::warn!("attempted to remove non-existent torrent: {}", hex::encode(id));
                    }
                },

                ClientCommand::Shutdown => break,

            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn new_torrent(&mut self, descriptor: Arc<ContentDescriptor>, discovery: Box<dyn Discovery>) {

        let id = descriptor.info_hash;
        if self.torrents.contains_key(&id) {
            tracing::warn!("torrent already added: {}", hex::encode(id));
            return;
        }

        let (mut controller, controller_tx) = Controller::new(TorrentParams {
            descriptor,
            config: self.config.clone(),
            discovery,
            registry: self.server.registry(),
            user_tx: self.user_tx.clone(),
            strategy: Box::new(RandomStrategy::new()),
            choker: Choker::default(),
        });
        let handle = tokio::spawn(async move { controller.start().await });

        self.torrents.insert(id, TorrentHandle { controller_tx, handle });
    }

    async fn shutdown(&mut self) {
        tracing::info!("shutting down {} torrents", self.torrents.len());
        for (_, torrent) in self.torrents.drain() {
            torrent.shutdown().await;
        }
        self.server.shutdown().await;
    }
}
