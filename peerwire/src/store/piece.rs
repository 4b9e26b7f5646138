use sha1::{Sha1, Digest};
use crate::block::{Block, BlockRequest};

// A piece being assembled from blocks or read back from storage.
#[derive(Clone, PartialEq, Eq)]
pub struct Piece {

    pub idx: usize,

    pub data: Vec<u8>,

    // Expected SHA1 hash of the data.
    hash: [u8; 20],

}

impl Piece {

    pub fn new(idx: usize, len: usize, hash: [u8; 20]) -> Self {
        Self {
            idx,
            data: vec![0; len],
            hash,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Copies a block into the buffer, returning false if it doesn't fit.
    pub fn set_block(&mut self, offset: usize, data: &[u8]) -> bool {
        match offset.checked_add(data.len()) {
            Some(end) if end <= self.data.len() => {
                self.data[offset..end].copy_from_slice(data);
                true
            },
            _ => false,
        }
    }

    pub fn get_block(&self, request: &BlockRequest) -> Option<Block> {
        debug_assert_eq!(request.piece_idx, self.idx);
        let end = request.offset.checked_add(request.len)?;
        let data = self.data.get(request.offset..end)?;
        Some(Block {
            piece_idx: self.idx,
            offset: request.offset,
            data: data.to_vec(),
        })
    }

    // Hash the piece data and compare with the expected hash.
    pub fn is_valid(&self) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(&self.data);
        let hash = hasher.finalize();
        hash.as_slice() == self.hash
    }
}

impl std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piece")
            .field("idx", &self.idx)
            .field("len", &self.data.len())
            .field("hash", &hex::encode(self.hash))
            .finish()
    }
}
