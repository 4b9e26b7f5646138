use bytes::{BufMut, Buf, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::ID;
use super::PeerError;

pub const PROTOCOL: &[u8] = b"BitTorrent protocol";

// Reserved, info hash and peer id.
const FIXED_LEN: usize = 8 + 20 + 20;

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol:   Vec<u8>,
    pub reserved:   [u8; 8],
    pub info_hash:  ID,
    pub peer_id:    ID,
}

impl Handshake {

    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            protocol:   PROTOCOL.to_vec(),
            reserved:   [0; 8],
            info_hash,
            peer_id,
        }
    }

    // Total length on the wire.
    pub fn wire_len(&self) -> usize {
        1 + self.protocol.len() + FIXED_LEN
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let pstrlen = u8::try_from(item.protocol.len()).map_err(|_| PeerError::IncorrectProtocol)?;
        dst.reserve(item.wire_len());
        dst.put_u8(pstrlen);
        dst.extend_from_slice(&item.protocol);
        dst.extend_from_slice(&item.reserved);
        dst.extend_from_slice(&item.info_hash);
        dst.extend_from_slice(&item.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        if src.is_empty() {
            return Ok(None);
        }

        let protocol_len = src[0] as usize;
        if src.remaining() < 1 + protocol_len + FIXED_LEN {
            // Handshake not fully recieved.
            return Ok(None);
        }
        src.advance(1);

        let protocol = src.split_to(protocol_len).to_vec();

        let mut reserved = [0; 8];
        src.copy_to_slice(&mut reserved);

        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);

        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            protocol,
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}
