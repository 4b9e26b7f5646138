use bytes::{BufMut, Buf, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::{
    bitfield::Bitfield,
    block::{Block, BlockRequest},
};
use super::PeerError;

// Largest length prefix we accept, anything bigger closes the connection.
pub const MAX_MESSAGE_LEN: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // The keep alive message advises peers not to close the connection,
    // even if they haven’t received a message in some time.
    KeepAlive,

    // A choke message tells a peer that no further requests will be satisfied.
    Choke,

    // Conversely unchoke signifies that requests from the peer will be served.
    Unchoke,

    // Notifies a peer that the client is interested in making requests for blocks.
    Interested,

    // Notifies a peer the client is no longer interested in requesting blocks.
    NotInterested,

    // Tells a peer that the client has a piece, referenced by the piece index.
    Have { idx: u32 },

    // Short form of telling a peer every piece the client has, only valid
    // as the first message after the handshake.
    Bitfield(Bitfield),

    // Asks for a block by piece index, offset within the piece and length.
    Request(BlockRequest),

    // Carries a block of data, referencing piece index and block offset.
    Piece(Block),

    // Withdraws an earlier request.
    Cancel(BlockRequest),
}

impl Message {

    // Number of bytes the message takes on the wire, length prefix included.
    pub fn wire_len(&self) -> usize {
        4 + match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield(bitfield) => 1 + Bitfield::num_bytes(bitfield.len()),
            Message::Request(_) | Message::Cancel(_) => 13,
            Message::Piece(block) => 9 + block.data.len(),
        }
    }
}

// Post handshake codec, needs the piece count to size bitfields.
pub struct MessageCodec {
    num_pieces: usize,
}

impl MessageCodec {
    pub fn new(num_pieces: usize) -> Self {
        Self { num_pieces }
    }
}

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(msg.wire_len());
        match msg {

            // [0, 0, 0, 0]
            Message::KeepAlive => dst.put_u32(0),

            // [0, 0, 0, 1, 0]
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(0);
            },

            // [0, 0, 0, 1, 1]
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(1);
            },

            // [0, 0, 0, 1, 2]
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(2);
            },

            // [0, 0, 0, 1, 3]
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(3);
            },

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(4);
                dst.put_u32(idx);
            },

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let bytes = bitfield.pack();
                dst.put_u32(1 + bytes.len() as u32);
                dst.put_u8(5);
                dst.extend_from_slice(&bytes);
            },

            // request: <len=0013><id=6><index><begin><length>
            Message::Request(request) => {
                dst.put_u32(13);
                dst.put_u8(6);
                put_request(dst, request);
            },

            // piece: <len=0009+X><id=7><index><begin><block>
            Message::Piece(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(7);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.extend_from_slice(&block.data);
            },

            // cancel: <len=0013><id=8><index><begin><length>
            Message::Cancel(request) => {
                dst.put_u32(13);
                dst.put_u8(8);
                put_request(dst, request);
            },
        }

        Ok(())
    }
}

fn put_request(dst: &mut BytesMut, request: BlockRequest) {
    dst.put_u32(request.piece_idx as u32);
    dst.put_u32(request.offset as u32);
    dst.put_u32(request.len as u32);
}

fn get_request(src: &mut BytesMut) -> BlockRequest {
    let piece_idx = src.get_u32() as usize;
    let offset = src.get_u32() as usize;
    let len = src.get_u32() as usize;
    BlockRequest { piece_idx, offset, len }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // Can't read message length.
        if src.remaining() < 4 { return Ok(None); }

        let mut peeker = std::io::Cursor::new(&src[..4]);
        let msg_len = peeker.get_u32() as usize;

        if msg_len > MAX_MESSAGE_LEN {
            return Err(PeerError::MessageTooLong(msg_len));
        }

        if src.remaining() < 4 + msg_len {
            // Haven't recieved all of message.
            src.reserve(4 + msg_len - src.remaining());
            return Ok(None);
        }

        src.advance(4);
        if msg_len == 0 { return Ok(Some(Message::KeepAlive)); }

        let mut payload = src.split_to(msg_len);
        let id = payload.get_u8();

        // Every message but piece has a fixed length.
        let expected_len = match id {
            0..=3 => Some(1),
            4 => Some(5),
            5 => Some(1 + Bitfield::num_bytes(self.num_pieces)),
            6 | 8 => Some(13),
            7 => None,
            id => {
                tracing::warn!("invalid message id: {}", id);
                return Err(PeerError::InvalidMessageId(id));
            },
        };
        match expected_len {
            Some(expected) if expected != msg_len => return Err(PeerError::InvalidLength { id, len: msg_len }),
            None if msg_len < 9 => return Err(PeerError::InvalidLength { id, len: msg_len }),
            _ => {},
        }

        let msg = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => Message::Have { idx: payload.get_u32() },
            5 => Message::Bitfield(Bitfield::unpack(&payload, self.num_pieces)?),
            6 => Message::Request(get_request(&mut payload)),
            7 => {
                let piece_idx = payload.get_u32() as usize;
                let offset = payload.get_u32() as usize;
                Message::Piece(Block { piece_idx, offset, data: payload.to_vec() })
            },
            _ => Message::Cancel(get_request(&mut payload)),
        };

        Ok(Some(msg))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.cardinality()),
            Message::Request(request) => write!(f, "request for block {{ piece idx: {}, offset {}, length: {} }}",
                request.piece_idx,
                request.offset,
                request.len,
            ),
            Message::Piece(block) => write!(f, "block data {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Cancel(request) => write!(f, "cancel for block {{ piece idx: {}, offset: {}, length: {} }}",
                request.piece_idx,
                request.offset,
                request.len
            ),
        }
    }
}
