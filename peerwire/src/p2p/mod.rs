use std::sync::Arc;
use tokio::sync::mpsc;
use crate::{
    bitfield::{Bitfield, BitfieldError},
    block::BlockRequest,
    store::Piece,
    ID,
};

mod session;
mod download;
mod upload;
pub mod message;
pub mod handshake;
pub mod state;

pub use session::{Inbound, PeerSession};
pub use download::{DownloadError, DownloadEvent, DownloadPipeline};
pub use upload::{UploadAction, UploadPipeline};

type Result<T, E = PeerError> = std::result::Result<T, E>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;
pub type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;

const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid message ID: {0}")]
    InvalidMessageId(u8),

    #[error("message {id} has invalid length {len}")]
    InvalidLength { id: u8, len: usize },

    #[error("message length {0} exceeds maximum")]
    MessageTooLong(usize),

    #[error("invalid bitfield: {0}")]
    InvalidBitfield(#[from] BitfieldError),

    #[error("download: {0}")]
    Download(#[from] DownloadError),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("bitfield sent after piece information")]
    UnexpectedBitfield,

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("connection timeout")]
    Timeout,
}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands the controller sends to a peer session.
#[derive(Debug)]
pub enum PeerCommand {

    // Peer accepted after the handshake, carries our bitfield to announce.
    Admitted { bitfield: Bitfield },

    // Send interested or not interested if it differs from what we last sent.
    SetInterest(bool),

    // Stop serving the peer's requests.
    Choke,

    // Start serving the peer's requests.
    Unchoke,

    // Download a piece, with the outstanding requests when taken over from another peer.
    Download { piece: Piece, requests: Option<Vec<BlockRequest>> },

    // Resume downloading if the peer isn't choking us.
    Resume,

    // Give up a piece to another peer, pausing our downloads.
    Surrender(usize),

    // Tell the peer we got a piece.
    Have(usize),

    // Piece read from storage for serving requests.
    UploadPiece(Arc<Piece>),

    // Drop requests for a piece we don't have.
    Unavailable(usize),

    // End the peer session safely.
    Shutdown,

}

// Events a peer session reports to the controller.
#[derive(Debug)]
pub enum PeerEvent {

    // Handshake exchanged, waiting for admission.
    Handshaken { id: ID },

    Bitfield(Bitfield),

    Have(usize),

    Choked,

    Unchoked,

    Interested,

    NotInterested,

    PieceCompleted(Piece),

    // Piece assembled but its hash didn't match.
    PieceFailed(usize),

    // Download pipeline can take more work.
    Drained,

    Stalled(bool),

    // Bytes written and read since the last report, headers included.
    Traffic { sent: u64, received: u64 },

    // Upload pipeline needs a piece read from storage.
    NeedPiece(usize),

    // Reply to a surrender, None if the piece was no longer held.
    Surrendered { idx: usize, work: Option<(Piece, Vec<BlockRequest>)> },

    Disconnected { error: Option<PeerError> },

}

#[derive(Debug)]
pub struct PeerHandle {

    // Sends commands to the peer.
    pub peer_tx: PeerTx,

    // Handle to the peer session.
    pub session_handle: Option<tokio::task::JoinHandle<()>>,

}

impl PeerHandle {

    pub fn start_session(
        mut session: PeerSession,
        peer_tx: PeerTx,
        inbound: Option<Inbound>,
    ) -> PeerHandle {
        let handle = tokio::spawn(async move {
            session.start_session(inbound).await
        });
        PeerHandle {
            peer_tx,
            session_handle: Some(handle),
        }
    }

    pub fn send(&self, cmd: PeerCommand) {
        // A closed session reports its disconnect on its own.
        self.peer_tx.send(cmd).ok();
    }

    // Asks the session to end, aborting it if it doesn't in time.
    pub async fn shutdown(&mut self) {
        self.peer_tx.send(PeerCommand::Shutdown).ok();
        if let Some(mut handle) = self.session_handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => tracing::error!("peer session panicked: {}", e),
                Err(_) => {
                    tracing::warn!("peer session didn't shut down, aborting");
                    handle.abort();
                },
            }
        }
    }
}
