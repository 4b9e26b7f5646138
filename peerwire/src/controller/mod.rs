use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};
use tokio::{sync::mpsc, time};
use tracing::Instrument;
use crate::{
    bitfield::Bitfield,
    block::BlockRequest,
    choker::{ChokeCandidate, Choker},
    config::Config,
    descriptor::ContentDescriptor,
    discovery::{Discovery, DiscoveryEvent, DiscoveryRx, DiscoveryTx, Event},
    p2p::{Inbound, PeerCommand, PeerError, PeerEvent, PeerHandle, PeerSession},
    picker::{Assignment, Candidate, PieceStrategy},
    server::Registry,
    store::{Piece, PieceStore, StoreError},
    TorrentEvent,
    UserTx,
    ID,
};

mod peer;

use peer::Peer;

// Peers asked for beyond the limit, some won't connect.
const PEER_REQUEST_EXTRA: usize = 10;

// Ask for more peers once below the limit by this much.
const PEER_LIMIT_THRESHOLD: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("torrent is not open")]
    NotOpen,

    #[error("channel error: {0}")]
    Channel(String),

}

impl<T> From<mpsc::error::SendError<T>> for TorrentError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        TorrentError::Channel(e.to_string())
    }
}

type Result<T> = std::result::Result<T, TorrentError>;
pub type ControllerTx = mpsc::UnboundedSender<ControllerCommand>;
pub type ControllerRx = mpsc::UnboundedReceiver<ControllerCommand>;

#[derive(Debug)]
pub enum ControllerCommand {

    // Sent by a peer session.
    Peer { address: SocketAddr, event: PeerEvent },

    // Sent by the server when a peer connects for this torrent.
    Inbound { address: SocketAddr, inbound: Inbound },

    // Storage failed outside the controller loop, the torrent can't continue.
    StoreFailed(StoreError),

    Shutdown,

}

// Read only state shared with every peer session of a torrent.
#[derive(Debug)]
pub struct TorrentContext {

    pub info_hash: ID,

    pub client_id: ID,

    pub descriptor: Arc<ContentDescriptor>,

    // Peer sessions report to the controller through this.
    pub controller_tx: ControllerTx,

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {

    // Downloading missing pieces.
    #[default]
    Leech,

    // Every piece stored, only uploading.
    Seed,

}

// A piece moving from a stalled peer to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transfer {
    from: SocketAddr,
    to: SocketAddr,
}

pub struct TorrentParams {

    pub descriptor: Arc<ContentDescriptor>,

    pub config: Config,

    pub discovery: Box<dyn Discovery>,

    // Where inbound connections are looked up.
    pub registry: Registry,

    pub user_tx: UserTx,

    pub strategy: Box<dyn PieceStrategy>,

    pub choker: Choker,

}

// Owns every peer session of a torrent and decides what each one does.
pub struct Controller {

    ctx: Arc<TorrentContext>,

    config: Config,

    controller_rx: ControllerRx,

    user_tx: UserTx,

    registry: Registry,

    discovery: Box<dyn Discovery>,

    discovery_tx: DiscoveryTx,

    discovery_rx: DiscoveryRx,

    store: Option<PieceStore>,

    peers: HashMap<SocketAddr, Peer>,

    // Pieces missing and not assigned to any peer.
    wanted: Vec<usize>,

    // Pieces being handed over, by index.
    transfers: HashMap<usize, Transfer>,

    strategy: Box<dyn PieceStrategy>,

    choker: Choker,

    mode: Mode,

    // Completion was reported.
    completed: bool,

}

impl Controller {

    pub fn new(params: TorrentParams) -> (Controller, ControllerTx) {

        let (controller_tx, controller_rx) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let descriptor = params.descriptor;

        (
            Controller {
                ctx: Arc::new(TorrentContext {
                    info_hash: descriptor.info_hash,
                    client_id: params.config.client_id,
                    descriptor,
                    controller_tx: controller_tx.clone(),
                }),
                config: params.config,
                controller_rx,
                user_tx: params.user_tx,
                registry: params.registry,
                discovery: params.discovery,
                discovery_tx,
                discovery_rx,
                store: None,
                peers: HashMap::new(),
                wanted: Vec::new(),
                transfers: HashMap::new(),
                strategy: params.strategy,
                choker: params.choker,
                mode: Mode::Leech,
                completed: false,
            },
            controller_tx,
        )
    }

    // Opens, runs until shut down, then closes. Errors are reported to the user.
    #[tracing::instrument(name = "torrent", skip_all, fields(name = %self.ctx.descriptor.name))]
    pub async fn start(&mut self) {
        let result = match self.open().await {
            Ok(()) => self.run().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::error!("torrent error: {}", e);
            self.send_user(TorrentEvent::Error { id: self.ctx.info_hash, error: e.to_string() });
        }
        if let Err(e) = self.close().await {
            tracing::error!("failed to close torrent: {}", e);
        }
    }

    pub async fn open(&mut self) -> Result<()> {
        tracing::info!("opening torrent {}", hex::encode(self.ctx.info_hash));

        let store = PieceStore::open(
            Arc::clone(&self.ctx.descriptor),
            &self.config.dir,
            self.config.read_cache_size,
        ).await?;

        self.wanted = store.bitfield()?.iter_zeros().collect();
        self.mode = if self.wanted.is_empty() { Mode::Seed } else { Mode::Leech };
        // Only a download finished in this run is reported.
        self.completed = self.mode == Mode::Seed;
        tracing::info!("{} pieces wanted, mode {:?}", self.wanted.len(), self.mode);

        self.discovery.attach(self.discovery_tx.clone());
        self.discovery.update_left(store.size()? as u64);
        self.discovery.send_event(Event::Started);
        self.store = Some(store);

        self.registry.write().await.insert(self.ctx.info_hash, self.ctx.controller_tx.clone());
        self.request_peers();

        self.send_user(TorrentEvent::Opened { id: self.ctx.info_hash });
        Ok(())
    }

    pub async fn run(&mut self) -> Result<()> {

        let mut choke_ticker = time::interval(self.config.choke_interval);

        loop { tokio::select! {

            t = choke_ticker.tick() => self.choke(t.into_std()),

            Some(event) = self.discovery_rx.recv() => self.handle_discovery(event),

            cmd = self.controller_rx.recv() => match cmd {
                Some(ControllerCommand::Peer { address, event }) => self.handle_peer_event(address, event).await?,
                Some(ControllerCommand::Inbound { address, inbound }) => self.connect(address, Some(inbound)),
                Some(ControllerCommand::StoreFailed(e)) => return Err(e.into()),
                Some(ControllerCommand::Shutdown) | None => break,
            },

        }}

        Ok(())
    }

    // Shuts down every session and releases the store, leaving the controller ready to open again.
    pub async fn close(&mut self) -> Result<()> {
        tracing::info!("closing torrent");

        self.choker.reset();
        self.registry.write().await.remove(&self.ctx.info_hash);

        for peer in self.peers.values() {
            peer.send(PeerCommand::Shutdown);
        }
        for (_, mut peer) in self.peers.drain() {
            peer.handle.shutdown().await;
        }

        self.wanted.clear();
        self.transfers.clear();
        self.mode = Mode::Leech;
        self.completed = false;

        let result = match self.store.take() {
            Some(store) => store.close().await.map_err(TorrentError::from),
            None => Ok(()),
        };

        self.discovery.send_event(Event::Stopped);
        self.discovery.close().await;

        self.send_user(TorrentEvent::Closed { id: self.ctx.info_hash });
        result
    }

    fn send_user(&self, event: TorrentEvent) {
        // The user may have stopped listening.
        self.user_tx.send(event).ok();
    }

    fn store(&self) -> Result<&PieceStore> {
        self.store.as_ref().ok_or(TorrentError::NotOpen)
    }

    fn num_downloading(&self) -> usize {
        self.peers.values().filter(|peer| peer.downloading).count()
    }

    fn request_peers(&mut self) {
        tracing::trace!("requesting peers");
        self.discovery.request(self.config.peer_limit + PEER_REQUEST_EXTRA);
    }

    fn handle_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Peers(addresses) => {
                tracing::info!("discovered {} peers", addresses.len());
                for address in addresses {
                    if self.peers.len() >= self.config.peer_limit {
                        break;
                    }
                    self.connect(address, None);
                }
            },
            DiscoveryEvent::Abort(reason) => tracing::warn!("peer discovery failed: {}", reason),
        }
    }

    // Starts a session unless the address is known or the peer limit is reached.
    fn connect(&mut self, address: SocketAddr, inbound: Option<Inbound>) {
        if self.peers.contains_key(&address) {
            tracing::trace!("already connected to {}", address);
            return;
        }
        if self.peers.len() >= self.config.peer_limit {
            tracing::trace!("peer limit reached, ignoring {}", address);
            return;
        }
        let (session, peer_tx) = PeerSession::new(address, Arc::clone(&self.ctx));
        let handle = PeerHandle::start_session(session, peer_tx, inbound);
        self.peers.insert(address, Peer::new(handle, Instant::now()));
    }

    async fn handle_peer_event(&mut self, address: SocketAddr, event: PeerEvent) -> Result<()> {

        let Some(peer) = self.peers.get_mut(&address) else {
            tracing::trace!("event from unknown peer {}", address);
            return Ok(());
        };

        match event {

            PeerEvent::Handshaken { id } => self.admit(address, id)?,

            PeerEvent::Bitfield(bitfield) => {
                peer.bitfield = Some(bitfield);
                let ours = self.store()?.bitfield()?;
                self.update_interest(address, &ours)?;
            },

            PeerEvent::Have(idx) => {
                let num_pieces = self.ctx.descriptor.num_pieces();
                peer.bitfield
                    .get_or_insert_with(|| Bitfield::new(num_pieces))
                    .set(idx, true);
                let ours = self.store()?.bitfield()?;
                self.update_interest(address, &ours)?;
            },

            PeerEvent::Choked => {
                peer.state.peer_choking = true;
                peer.downloading = false;
            },

            PeerEvent::Unchoked => self.handle_unchoke(address)?,

            PeerEvent::Interested => peer.state.peer_interested = true,

            PeerEvent::NotInterested => peer.state.peer_interested = false,

            PeerEvent::PieceCompleted(piece) => self.handle_piece_completed(address, piece).await?,

            PeerEvent::PieceFailed(idx) => {
                peer.pieces.remove(&idx);
                self.return_to_wanted(idx)?;
            },

            PeerEvent::Drained => {
                if peer.downloading {
                    self.assign(address)?;
                }
            },

            PeerEvent::Stalled(stalled) => {
                peer.stalled = stalled;
                if stalled {
                    tracing::info!("peer {} stalled", address);
                    self.assign_idle()?;
                }
            },

            PeerEvent::Traffic { sent, received } => {
                peer.throughput.up += sent;
                peer.throughput.down += received;
                self.discovery.update_uploaded(sent);
                self.discovery.update_downloaded(received);
            },

            PeerEvent::NeedPiece(idx) => self.serve_piece(address, idx)?,

            PeerEvent::Surrendered { idx, work } => self.handle_surrendered(address, idx, work)?,

            PeerEvent::Disconnected { error } => self.handle_disconnect(address, error)?,
        }

        Ok(())
    }

    fn admit(&mut self, address: SocketAddr, id: ID) -> Result<()> {
        if id == self.ctx.client_id {
            tracing::info!("rejecting connection to ourselves at {}", address);
            if let Some(peer) = self.peers.remove(&address) {
                peer.send(PeerCommand::Shutdown);
            }
            return Ok(());
        }

        let bitfield = self.store()?.bitfield()?;
        if let Some(peer) = self.peers.get_mut(&address) {
            tracing::info!("admitted peer {}", address);
            peer.id = Some(id);
            peer.admitted = true;
            peer.send(PeerCommand::Admitted { bitfield });
            self.send_user(TorrentEvent::PeerAdmitted { id: self.ctx.info_hash, address });
        }
        Ok(())
    }

    // Sends interest only when it changes, assigning work if the peer can take it.
    fn update_interest(&mut self, address: SocketAddr, ours: &Bitfield) -> Result<()> {
        let Some(peer) = self.peers.get_mut(&address) else {
            return Ok(());
        };
        if !peer.admitted {
            return Ok(());
        }
        let interested = peer.is_interesting(ours);
        if interested == peer.state.am_interested {
            return Ok(());
        }
        peer.state.am_interested = interested;
        peer.send(PeerCommand::SetInterest(interested));

        if peer.is_idle()
        && self.mode == Mode::Leech
        && self.num_downloading() < self.config.downloader_limit
        {
            self.assign(address)?;
        }
        Ok(())
    }

    fn handle_unchoke(&mut self, address: SocketAddr) -> Result<()> {
        let active = self.num_downloading();
        let Some(peer) = self.peers.get_mut(&address) else {
            return Ok(());
        };
        peer.state.peer_choking = false;

        if self.mode == Mode::Seed || active >= self.config.downloader_limit {
            return Ok(());
        }
        if peer.pieces.is_empty() {
            self.assign(address)?;
        } else {
            peer.downloading = true;
            peer.send(PeerCommand::Resume);
        }
        Ok(())
    }

    // Gives the peer a piece, fresh or taken from a stalled peer.
    fn assign(&mut self, address: SocketAddr) -> Result<bool> {
        if self.mode == Mode::Seed {
            return Ok(false);
        }

        let assignment = {
            let Some(peer) = self.peers.get(&address) else {
                return Ok(false);
            };
            let Some(bitfield) = peer.bitfield.as_ref().filter(|_| peer.admitted) else {
                return Ok(false);
            };
            let candidate = Candidate {
                address,
                bitfield,
                stalled: peer.stalled,
                pieces: &peer.pieces,
            };
            let mut others: Vec<Candidate<'_>> = self.peers
                .iter()
                .filter(|(other, _)| **other != address)
                .filter_map(|(other, peer)| peer.bitfield.as_ref().map(|bitfield| Candidate {
                    address: *other,
                    bitfield,
                    stalled: peer.stalled,
                    pieces: &peer.pieces,
                }))
                .collect();
            others.sort_by_key(|other| other.address);
            let in_transfer: HashSet<usize> = self.transfers.keys().copied().collect();
            self.strategy.pick(&candidate, &self.wanted, &others, &in_transfer)
        };

        match assignment {

            Some(Assignment::Fresh(idx)) => {
                self.wanted.retain(|&wanted| wanted != idx);
                let piece = self.store()?.empty_piece(idx);
                if let Some(peer) = self.peers.get_mut(&address) {
                    peer.pieces.insert(idx);
                    peer.downloading = !peer.state.peer_choking;
                    peer.send(PeerCommand::Download { piece, requests: None });
                }
                Ok(true)
            },

            Some(Assignment::Steal { from, idx }) => {
                // Bookkeeping moves now, the work follows once the victim surrenders it.
                if let Some(victim) = self.peers.get_mut(&from) {
                    victim.pieces.remove(&idx);
                    victim.downloading = false;
                    victim.send(PeerCommand::Surrender(idx));
                }
                if let Some(peer) = self.peers.get_mut(&address) {
                    peer.pieces.insert(idx);
                    peer.downloading = !peer.state.peer_choking;
                }
                self.transfers.insert(idx, Transfer { from, to: address });
                Ok(true)
            },

            None => {
                tracing::trace!("no piece for {}", address);
                Ok(false)
            },
        }
    }

    // Assigns work to unchoked peers sitting idle.
    fn assign_idle(&mut self) -> Result<()> {
        if self.mode == Mode::Seed {
            return Ok(());
        }
        let mut idle: Vec<SocketAddr> = self.peers
            .iter()
            .filter(|(_, peer)| peer.is_idle())
            .map(|(address, _)| *address)
            .collect();
        idle.sort();
        for address in idle {
            if self.num_downloading() >= self.config.downloader_limit {
                break;
            }
            self.assign(address)?;
        }
        Ok(())
    }

    // Puts a piece back up for grabs unless it's stored or someone has it.
    fn return_to_wanted(&mut self, idx: usize) -> Result<()> {
        if self.store()?.has_piece(idx)?
        || self.wanted.contains(&idx)
        || self.peers.values().any(|peer| peer.pieces.contains(&idx))
        {
            return Ok(());
        }
        tracing::trace!("piece {} wanted again", idx);
        self.wanted.push(idx);
        Ok(())
    }

    fn handle_surrendered(
        &mut self,
        from: SocketAddr,
        idx: usize,
        work: Option<(Piece, Vec<BlockRequest>)>,
    ) -> Result<()> {

        let transfer = match self.transfers.get(&idx) {
            Some(transfer) if transfer.from == from => *transfer,
            _ => {
                tracing::trace!("no transfer of piece {} from {}", idx, from);
                return Ok(());
            },
        };
        self.transfers.remove(&idx);

        let store = self.store()?.clone();
        let Some(thief) = self.peers.get_mut(&transfer.to).filter(|thief| thief.pieces.contains(&idx)) else {
            return self.return_to_wanted(idx);
        };

        match work {
            Some((piece, requests)) => {
                tracing::info!("moving piece {} from {} to {}", idx, from, transfer.to);
                thief.send(PeerCommand::Download { piece, requests: Some(requests) });
            },
            // Victim no longer held it, the thief starts over.
            None => thief.send(PeerCommand::Download { piece: store.empty_piece(idx), requests: None }),
        }
        Ok(())
    }

    async fn handle_piece_completed(&mut self, address: SocketAddr, piece: Piece) -> Result<()> {
        let idx = piece.idx;
        let store = self.store()?.clone();

        if let Some(peer) = self.peers.get_mut(&address) {
            peer.pieces.remove(&idx);
        }
        self.wanted.retain(|&wanted| wanted != idx);

        // Finished by its old owner before the handover.
        let mut thief = None;
        if let Some(transfer) = self.transfers.remove(&idx) {
            if let Some(peer) = self.peers.get_mut(&transfer.to) {
                peer.pieces.remove(&idx);
                thief = Some(transfer.to);
            }
        }

        if store.has_piece(idx)? {
            tracing::trace!("piece {} already stored", idx);
        } else {
            match store.set_piece(piece).await {
                Ok(()) => self.piece_stored(idx)?,
                Err(StoreError::Validation(_)) => {
                    tracing::warn!("piece {} from {} rejected by store", idx, address);
                    self.return_to_wanted(idx)?;
                },
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(thief) = thief {
            if self.peers.get(&thief).map(|peer| peer.downloading).unwrap_or(false) {
                self.assign(thief)?;
            }
        }
        Ok(())
    }

    fn piece_stored(&mut self, idx: usize) -> Result<()> {
        let store = self.store()?.clone();
        let ours = store.bitfield()?;
        tracing::info!("piece {} stored, have {}/{}", idx, ours.cardinality(), ours.len());

        self.discovery.update_left(self.ctx.descriptor.piece_len(idx) as u64);
        self.send_user(TorrentEvent::PieceCompleted { id: self.ctx.info_hash, idx });

        // Have goes out before interest is re-evaluated.
        for peer in self.peers.values().filter(|peer| peer.admitted) {
            peer.send(PeerCommand::Have(idx));
        }
        let addresses: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for address in addresses {
            self.update_interest(address, &ours)?;
        }

        if ours.is_complete() && !self.completed {
            tracing::info!("torrent complete");
            self.completed = true;
            self.mode = Mode::Seed;
            self.discovery.send_event(Event::Completed);
            self.send_user(TorrentEvent::Completed { id: self.ctx.info_hash });
        }
        Ok(())
    }

    fn serve_piece(&mut self, address: SocketAddr, idx: usize) -> Result<()> {
        let store = self.store()?.clone();
        let Some(peer) = self.peers.get(&address) else {
            return Ok(());
        };
        if !store.has_piece(idx)? {
            peer.send(PeerCommand::Unavailable(idx));
            return Ok(());
        }

        let peer_tx = peer.handle.peer_tx.clone();
        let controller_tx = self.ctx.controller_tx.clone();
        tokio::spawn(async move {
            match store.get_piece(idx).await {
                Ok(piece) => {
                    peer_tx.send(PeerCommand::UploadPiece(piece)).ok();
                },
                Err(e) => {
                    tracing::error!("failed to read piece {}: {}", idx, e);
                    controller_tx.send(ControllerCommand::StoreFailed(e)).ok();
                },
            }
        }.instrument(tracing::Span::current()));
        Ok(())
    }

    fn handle_disconnect(&mut self, address: SocketAddr, error: Option<PeerError>) -> Result<()> {
        let Some(peer) = self.peers.remove(&address) else {
            return Ok(());
        };
        match error {
            Some(e) => tracing::info!("peer {} disconnected: {}", address, e),
            None => tracing::info!("peer {} disconnected", address),
        }

        for idx in peer.pieces {
            if self.transfers.get(&idx).map(|transfer| transfer.to == address).unwrap_or(false) {
                self.transfers.remove(&idx);
            }
            self.return_to_wanted(idx)?;
        }

        // Pieces it was handing over go to their new owners from scratch.
        let orphaned: Vec<(usize, Transfer)> = self.transfers
            .iter()
            .filter(|(_, transfer)| transfer.from == address)
            .map(|(idx, transfer)| (*idx, *transfer))
            .collect();
        let store = self.store()?.clone();
        for (idx, transfer) in orphaned {
            self.transfers.remove(&idx);
            if let Some(thief) = self.peers.get(&transfer.to) {
                thief.send(PeerCommand::Download { piece: store.empty_piece(idx), requests: None });
            }
        }

        if self.peers.len() < self.config.peer_limit.saturating_sub(PEER_LIMIT_THRESHOLD) {
            self.request_peers();
        }
        self.assign_idle()
    }

    fn choke(&mut self, now: Instant) {
        let complete = self.mode == Mode::Seed;

        let mut candidates = Vec::new();
        for (address, peer) in self.peers.iter_mut() {
            peer.throughput.refresh(now);
            if peer.admitted {
                candidates.push(ChokeCandidate {
                    address: *address,
                    interested: peer.state.peer_interested,
                    up_rate: peer.throughput.up.rate(),
                    down_rate: peer.throughput.down.rate(),
                });
            }
        }
        candidates.sort_by_key(|candidate| candidate.address);

        let decision = self.choker.next_round(&candidates, self.config.uploader_limit, complete);
        for address in decision.unchoke {
            if let Some(peer) = self.peers.get_mut(&address) {
                peer.state.am_choking = false;
                peer.send(PeerCommand::Unchoke);
            }
        }
        for address in decision.choke {
            if let Some(peer) = self.peers.get_mut(&address) {
                peer.state.am_choking = true;
                peer.send(PeerCommand::Choke);
            }
        }
    }
}
