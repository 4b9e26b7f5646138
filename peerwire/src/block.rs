use crate::BLOCK_SIZE;

// A request for a block, correlated with its delivery by all three fields.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct BlockRequest {

    pub piece_idx: usize,

    pub offset: usize,

    pub len: usize,

}

impl BlockRequest {

    pub fn from_block(block: &Block) -> Self {
        Self {
            piece_idx: block.piece_idx,
            offset: block.offset,
            len: block.data.len(),
        }
    }

    // Whether the request lies within a piece of the given length.
    pub fn is_within(&self, piece_len: usize) -> bool {
        self.len > 0
            && self.len <= BLOCK_SIZE
            && self.offset.checked_add(self.len).map_or(false, |end| end <= piece_len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {

    // Index of piece that the block is contained in.
    pub piece_idx: usize,

    // Offset in bytes of block within piece.
    pub offset: usize,

    pub data: Vec<u8>,

}

pub fn block_len(piece_len: usize, block_idx: usize) -> usize {
    BLOCK_SIZE.min(piece_len - (block_idx * BLOCK_SIZE))
}

pub fn num_blocks(piece_len: usize) -> usize {
    (piece_len + (BLOCK_SIZE - 1)) / BLOCK_SIZE
}

// Splits a piece into contiguous requests of at most one block each.
pub fn piece_requests(piece_idx: usize, piece_len: usize) -> impl Iterator<Item = BlockRequest> {
    (0..num_blocks(piece_len)).map(move |block_idx| BlockRequest {
        piece_idx,
        offset: block_idx * BLOCK_SIZE,
        len: block_len(piece_len, block_idx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_len() {
        let normal_piece_len = 32_768;
        let last_piece_len = 24_930;
        let normal_block_len = 16_384;
        let last_block_len = 8546;
        assert_eq!(block_len(normal_piece_len, 0), normal_block_len);
        assert_eq!(block_len(normal_piece_len, 1), normal_block_len);
        assert_eq!(block_len(last_piece_len, 0), normal_block_len);
        assert_eq!(block_len(last_piece_len, 1), last_block_len);
    }

    #[test]
    fn test_num_blocks() {
        (0..12).for_each(|i| assert_eq!(num_blocks(BLOCK_SIZE * i), i));
        assert_eq!(num_blocks(BLOCK_SIZE + 500), 2);
        assert_eq!(num_blocks(0), 0);
    }

    #[test]
    fn test_piece_requests_cover_piece() {
        let requests: Vec<_> = piece_requests(3, BLOCK_SIZE * 2 + 10).collect();
        assert_eq!(requests, vec![
            BlockRequest { piece_idx: 3, offset: 0, len: BLOCK_SIZE },
            BlockRequest { piece_idx: 3, offset: BLOCK_SIZE, len: BLOCK_SIZE },
            BlockRequest { piece_idx: 3, offset: BLOCK_SIZE * 2, len: 10 },
        ]);
    }

    #[test]
    fn test_request_is_within() {
        let piece_len = BLOCK_SIZE + 100;
        assert!(BlockRequest { piece_idx: 0, offset: 0, len: BLOCK_SIZE }.is_within(piece_len));
        assert!(BlockRequest { piece_idx: 0, offset: BLOCK_SIZE, len: 100 }.is_within(piece_len));
        assert!(!BlockRequest { piece_idx: 0, offset: BLOCK_SIZE, len: 101 }.is_within(piece_len));
        assert!(!BlockRequest { piece_idx: 0, offset: 0, len: 0 }.is_within(piece_len));
        assert!(!BlockRequest { piece_idx: 0, offset: usize::MAX, len: 1 }.is_within(piece_len));
    }
}
