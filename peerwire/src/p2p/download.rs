use std::{
    collections::{HashSet, VecDeque},
    time::{Duration, Instant},
};
use crate::{
    block::{piece_requests, Block, BlockRequest},
    store::Piece,
};

// Maximum number of requests sent and awaiting a block.
pub const PIPELINE_DEPTH: usize = 3;

// A pipeline holding pieces that has received nothing for this long has stalled.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {

    #[error("unsolicited block: {0:?}")]
    Unsolicited(BlockRequest),

    #[error("block does not fit piece: {0:?}")]
    OutOfBounds(BlockRequest),
}

#[derive(Debug)]
pub enum DownloadEvent {

    // Every block of the piece arrived and its hash matches.
    Completed(Piece),

    // Every block of the piece arrived but its hash doesn't match.
    Failed(usize),

    // Fewer unsent requests than the pipeline depth, more work can be pushed.
    Drain,
}

// Block level download state for a single connection, no I/O of its own.
// Methods return the requests that should be written to the peer.
#[derive(Debug)]
pub struct DownloadPipeline {

    pieces: Vec<Piece>,

    // Requests not yet sent.
    queued: VecDeque<BlockRequest>,

    // Requests sent and awaiting a block.
    in_flight: Vec<BlockRequest>,

    // Requests withdrawn while in flight, late blocks for them are dropped.
    cancelled: HashSet<BlockRequest>,

    paused: bool,

    last_block_at: Instant,

    events: VecDeque<DownloadEvent>,

}

impl DownloadPipeline {

    pub fn new(now: Instant) -> Self {
        Self {
            pieces: Vec::new(),
            queued: VecDeque::new(),
            in_flight: Vec::new(),
            cancelled: HashSet::new(),
            paused: true,
            last_block_at: now,
            events: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn num_queued(&self) -> usize {
        self.queued.len()
    }

    // Adds a piece, either split into fresh requests or with the outstanding
    // requests it was taken over with.
    pub fn push(&mut self, piece: Piece, requests: Option<Vec<BlockRequest>>, now: Instant) -> Vec<BlockRequest> {
        if self.pieces.is_empty() {
            self.last_block_at = now;
        }
        let idx = piece.idx;
        self.cancelled.retain(|request| request.piece_idx != idx);
        match requests {
            Some(requests) => self.queued.extend(requests),
            None => self.queued.extend(piece_requests(idx, piece.len())),
        }
        self.pieces.push(piece);
        self.fill()
    }

    // Stops issuing requests, those in flight are left alone.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    // Re-queues whatever was in flight when paused, then fills the pipeline.
    pub fn resume(&mut self) -> Vec<BlockRequest> {
        if !self.paused {
            return Vec::new();
        }
        self.paused = false;
        for request in self.in_flight.drain(..).rev() {
            self.queued.push_front(request);
        }
        self.fill()
    }

    fn fill(&mut self) -> Vec<BlockRequest> {
        let mut requests = Vec::new();
        while !self.paused && self.in_flight.len() < PIPELINE_DEPTH {
            match self.queued.pop_front() {
                Some(request) => {
                    self.in_flight.push(request);
                    requests.push(request);
                },
                None => break,
            }
        }
        requests
    }

    pub fn on_block(&mut self, block: Block, now: Instant) -> Result<Vec<BlockRequest>, DownloadError> {
        let request = BlockRequest::from_block(&block);

        // Blocks for re-queued requests still count, the peer may have served them before a pause.
        if let Some(pos) = self.in_flight.iter().position(|r| *r == request) {
            self.in_flight.remove(pos);
        } else if let Some(pos) = self.queued.iter().position(|r| *r == request) {
            self.queued.remove(pos);
        } else if self.cancelled.remove(&request) {
            tracing::trace!("dropping block for cancelled request: {:?}", request);
            return Ok(Vec::new());
        } else {
            return Err(DownloadError::Unsolicited(request));
        }

        self.last_block_at = now;
        let pos = self.pieces
            .iter()
            .position(|piece| piece.idx == request.piece_idx)
            .ok_or(DownloadError::Unsolicited(request))?;
        if !self.pieces[pos].set_block(block.offset, &block.data) {
            return Err(DownloadError::OutOfBounds(request));
        }

        let outstanding = self.in_flight
            .iter()
            .chain(self.queued.iter())
            .any(|r| r.piece_idx == request.piece_idx);
        if !outstanding {
            let piece = self.pieces.remove(pos);
            if piece.is_valid() {
                self.events.push_back(DownloadEvent::Completed(piece));
            } else {
                tracing::warn!("piece {} failed hash verification", piece.idx);
                self.events.push_back(DownloadEvent::Failed(piece.idx));
            }
        }

        let requests = self.fill();
        if self.queued.len() < PIPELINE_DEPTH {
            self.events.push_back(DownloadEvent::Drain);
        }

        Ok(requests)
    }

    pub fn has_stalled(&self, now: Instant) -> bool {
        !self.is_empty() && now.saturating_duration_since(self.last_block_at) > STALL_TIMEOUT
    }

    // Removes a piece along with its outstanding requests, in-flight requests first.
    // Returns the piece, its requests, and the in-flight ones the peer should be told to cancel.
    pub fn take_piece(&mut self, idx: usize) -> Option<(Piece, Vec<BlockRequest>, Vec<BlockRequest>)> {
        let pos = self.pieces.iter().position(|piece| piece.idx == idx)?;
        let piece = self.pieces.remove(pos);

        let (cancels, in_flight): (Vec<_>, Vec<_>) = self.in_flight
            .drain(..)
            .partition(|r| r.piece_idx == idx);
        self.in_flight = in_flight;
        self.cancelled.extend(cancels.iter().copied());

        let mut requests = cancels.clone();
        let (taken, queued): (Vec<_>, Vec<_>) = self.queued
            .drain(..)
            .partition(|r| r.piece_idx == idx);
        self.queued = queued.into();
        requests.extend(taken);

        Some((piece, requests, cancels))
    }

    // Drops all pieces and requests, returning the indexes of the unfinished pieces.
    pub fn clear(&mut self) -> Vec<usize> {
        self.queued.clear();
        self.in_flight.clear();
        self.cancelled.clear();
        self.events.clear();
        self.pieces.drain(..).map(|piece| piece.idx).collect()
    }

    pub fn poll_event(&mut self) -> Option<DownloadEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Sha1, Digest};
    use crate::BLOCK_SIZE;

    fn piece(idx: usize, data: &[u8]) -> Piece {
        let hash: [u8; 20] = Sha1::digest(data).into();
        Piece::new(idx, data.len(), hash)
    }

    fn block(request: &BlockRequest, data: &[u8]) -> Block {
        Block {
            piece_idx: request.piece_idx,
            offset: request.offset,
            data: data[request.offset..request.offset + request.len].to_vec(),
        }
    }

    fn events(pipeline: &mut DownloadPipeline) -> Vec<DownloadEvent> {
        std::iter::from_fn(|| pipeline.poll_event()).collect()
    }

    #[test]
    fn test_paused_until_resumed() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        let data = vec![1; BLOCK_SIZE * 5];
        assert!(pipeline.push(piece(0, &data), None, now).is_empty());
        assert_eq!(pipeline.num_queued(), 5);

        let sent = pipeline.resume();
        assert_eq!(sent.len(), PIPELINE_DEPTH);
        assert_eq!(sent[0], BlockRequest { piece_idx: 0, offset: 0, len: BLOCK_SIZE });
        assert!(pipeline.resume().is_empty());
    }

    #[test]
    fn test_in_flight_never_exceeds_depth() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        let a = vec![1; BLOCK_SIZE * 4 + 7];
        let b = vec![2; BLOCK_SIZE * 2];
        pipeline.resume();
        pipeline.push(piece(0, &a), None, now);
        assert_eq!(pipeline.num_in_flight(), PIPELINE_DEPTH);
        pipeline.push(piece(1, &b), None, now);
        assert_eq!(pipeline.num_in_flight(), PIPELINE_DEPTH);

        let mut sent = vec![];
        let mut outstanding: VecDeque<_> = pipeline.in_flight.clone().into();
        while let Some(request) = outstanding.pop_front() {
            let data = if request.piece_idx == 0 { &a } else { &b };
            let more = pipeline.on_block(block(&request, data), now).unwrap();
            assert!(pipeline.num_in_flight() <= PIPELINE_DEPTH);
            outstanding.extend(more.iter().copied());
            sent.extend(more);
        }
        assert_eq!(sent.len(), 5 + 2 - PIPELINE_DEPTH);

        let completed: Vec<_> = events(&mut pipeline)
            .into_iter()
            .filter_map(|e| match e {
                DownloadEvent::Completed(piece) => Some(piece.idx),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![0, 1]);
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_resume_then_pause_keeps_requests() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        let data = vec![3; BLOCK_SIZE * 6];
        pipeline.push(piece(4, &data), None, now);
        let first = pipeline.resume();
        pipeline.pause();
        assert_eq!(pipeline.num_in_flight() + pipeline.num_queued(), 6);

        // In-flight requests go back to the front of the queue.
        let again = pipeline.resume();
        assert_eq!(again, first);
        assert_eq!(pipeline.num_in_flight() + pipeline.num_queued(), 6);
    }

    #[test]
    fn test_drain_when_queue_runs_low() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        let data = vec![5; BLOCK_SIZE * 7];
        pipeline.push(piece(0, &data), None, now);
        let sent = pipeline.resume();

        // 4 queued after the first fill, 3 after the first block arrives.
        pipeline.on_block(block(&sent[0], &data), now).unwrap();
        assert!(events(&mut pipeline).is_empty());
        pipeline.on_block(block(&sent[1], &data), now).unwrap();
        assert!(matches!(events(&mut pipeline)[..], [DownloadEvent::Drain]));
    }

    #[test]
    fn test_bad_piece_fails() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        let data = vec![9; 100];
        pipeline.push(piece(2, &data), None, now);
        let sent = pipeline.resume();
        let mut bad = block(&sent[0], &data);
        bad.data[50] = 0;
        pipeline.on_block(bad, now).unwrap();
        assert!(matches!(events(&mut pipeline)[..], [DownloadEvent::Failed(2), DownloadEvent::Drain]));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_unsolicited_block() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        let data = vec![1; 10];
        pipeline.push(piece(0, &data), None, now);
        pipeline.resume();
        let stray = Block { piece_idx: 0, offset: 0, data: vec![1; 9] };
        assert!(matches!(pipeline.on_block(stray, now), Err(DownloadError::Unsolicited(_))));
    }

    #[test]
    fn test_stall_detection() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        assert!(!pipeline.has_stalled(now + STALL_TIMEOUT * 2));

        let later = now + STALL_TIMEOUT * 2;
        let data = vec![1; BLOCK_SIZE * 2];
        pipeline.push(piece(0, &data), None, later);
        let sent = pipeline.resume();
        assert!(!pipeline.has_stalled(later + STALL_TIMEOUT));
        assert!(pipeline.has_stalled(later + STALL_TIMEOUT + Duration::from_secs(1)));

        let recv = later + STALL_TIMEOUT + Duration::from_secs(2);
        pipeline.on_block(block(&sent[0], &data), recv).unwrap();
        assert!(!pipeline.has_stalled(recv + Duration::from_secs(1)));
    }

    #[test]
    fn test_take_piece_moves_requests() {
        let now = Instant::now();
        let mut victim = DownloadPipeline::new(now);
        let data = vec![7; BLOCK_SIZE * 4];
        victim.push(piece(1, &data), None, now);
        let sent = victim.resume();
        victim.on_block(block(&sent[0], &data), now).unwrap();
        victim.pause();

        let (taken, requests, cancels) = victim.take_piece(1).unwrap();
        // The first block's arrival put the fourth request in flight.
        assert_eq!(cancels.len(), 3);
        assert_eq!(requests, cancels);
        assert!(victim.is_empty());
        assert_eq!(victim.num_in_flight() + victim.num_queued(), 0);

        // A late block for a cancelled request is dropped quietly.
        assert!(victim.on_block(block(&sent[1], &data), now).unwrap().is_empty());

        let mut thief = DownloadPipeline::new(now);
        thief.resume();
        let sent = thief.push(taken, Some(requests.clone()), now);
        assert_eq!(sent, requests);
        for request in sent {
            thief.on_block(block(&request, &data), now).unwrap();
        }
        assert!(matches!(events(&mut thief)[..], [.., DownloadEvent::Completed(_), DownloadEvent::Drain]));
    }

    #[test]
    fn test_clear_returns_pieces() {
        let now = Instant::now();
        let mut pipeline = DownloadPipeline::new(now);
        pipeline.push(piece(3, &[1; 10]), None, now);
        pipeline.push(piece(8, &[1; 10]), None, now);
        pipeline.resume();
        assert_eq!(pipeline.clear(), vec![3, 8]);
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.num_in_flight(), 0);
    }
}
