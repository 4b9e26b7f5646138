use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};
use crate::{
    block::{Block, BlockRequest},
    store::Piece,
};

// Requests beyond this are dropped.
pub const REQUEST_LIMIT: usize = 10;

// Piece buffers kept for serving, oldest evicted first.
pub const PIECE_LIMIT: usize = 2;

#[derive(Debug, PartialEq, Eq)]
pub enum UploadAction {

    // Write the block to the peer.
    Send(Block),

    // The next request needs a piece read from storage.
    NeedPiece(usize),
}

// Serves the peer's block requests while we aren't choking it.
// Paused means choking, the caller sends the choke/unchoke messages.
#[derive(Debug)]
pub struct UploadPipeline {

    paused: bool,

    requests: VecDeque<BlockRequest>,

    pieces: VecDeque<Arc<Piece>>,

    // Pieces asked for and not yet supplied.
    needed: HashSet<usize>,

}

impl Default for UploadPipeline {
    fn default() -> Self {
        Self {
            paused: true,
            requests: VecDeque::new(),
            pieces: VecDeque::new(),
            needed: HashSet::new(),
        }
    }
}

impl UploadPipeline {

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }

    // Returns true if we weren't already choking, the caller then sends choke.
    pub fn pause(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        self.requests.clear();
        self.pieces.clear();
        self.needed.clear();
        true
    }

    // Returns true if we were choking, the caller then sends unchoke.
    pub fn resume(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        self.paused = false;
        true
    }

    // Returns false if the request was dropped.
    pub fn on_request(&mut self, request: BlockRequest) -> bool {
        if self.paused || self.requests.len() >= REQUEST_LIMIT {
            return false;
        }
        self.requests.push_back(request);
        true
    }

    pub fn cancel(&mut self, request: &BlockRequest) -> bool {
        match self.requests.iter().position(|r| r == request) {
            Some(pos) => {
                self.requests.remove(pos);
                true
            },
            None => false,
        }
    }

    // Drops every request and buffer for a piece.
    pub fn remove(&mut self, idx: usize) {
        self.requests.retain(|r| r.piece_idx != idx);
        self.pieces.retain(|p| p.idx != idx);
        self.needed.remove(&idx);
    }

    // Supplies piece data, discarded if no request wants it.
    pub fn push(&mut self, piece: Arc<Piece>) {
        self.needed.remove(&piece.idx);
        if self.paused || !self.requests.iter().any(|r| r.piece_idx == piece.idx) {
            tracing::trace!("discarding unrequested upload piece {}", piece.idx);
            return;
        }
        self.pieces.retain(|p| p.idx != piece.idx);
        self.pieces.push_back(piece);
        while self.pieces.len() > PIECE_LIMIT {
            self.pieces.pop_front();
        }
    }

    // Next thing to do for the request at the front of the queue.
    pub fn poll(&mut self) -> Option<UploadAction> {
        loop {
            let request = *self.requests.front()?;
            let piece = match self.pieces.iter().find(|p| p.idx == request.piece_idx) {
                Some(piece) => piece,
                None => {
                    // Only ask once, the piece is on its way.
                    return self.needed
                        .insert(request.piece_idx)
                        .then_some(UploadAction::NeedPiece(request.piece_idx));
                },
            };
            let block = piece.get_block(&request);
            self.requests.pop_front();
            match block {
                Some(block) => return Some(UploadAction::Send(block)),
                None => tracing::warn!("request outside piece bounds: {:?}", request),
            }
        }
    }
}
