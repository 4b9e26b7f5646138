use bitvec::{order::Msb0, vec::BitVec};

type Bits = BitVec<u8, Msb0>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BitfieldError {

    #[error("bitfield payload of {got} bytes cannot hold {len} pieces")]
    TooShort { got: usize, len: usize },

    #[error("bitfield payload has bits set beyond piece {len}")]
    SpareBits { len: usize },
}

// Piece possession, one bit per piece, packed most significant bit first.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Bits,
}

impl Bitfield {

    pub fn new(len: usize) -> Self {
        Self { bits: Bits::repeat(false, len) }
    }

    pub fn full(len: usize) -> Self {
        Self { bits: Bits::repeat(true, len) }
    }

    // Number of bytes needed to pack a bitfield of `len` pieces.
    pub fn num_bytes(len: usize) -> usize {
        (len + 7) / 8
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    // Panics if idx is out of range, callers validate indexes coming off the wire.
    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len(), "piece index {} out of range for bitfield of {} pieces", idx, self.len());
        self.bits[idx]
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        assert!(idx < self.len(), "piece index {} out of range for bitfield of {} pieces", idx, self.len());
        self.bits.set(idx, value);
    }

    pub fn cardinality(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_complete(&self) -> bool {
        self.bits.all()
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    pub fn iter_zeros(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_zeros()
    }

    // True if self has at least one piece that other lacks.
    pub fn has_any_missing_from(&self, other: &Bitfield) -> bool {
        self.iter_ones().any(|idx| !other.get(idx))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut bytes = self.bits.as_raw_slice().to_vec();
        bytes.truncate(Self::num_bytes(self.len()));
        // Zero the padding at the end of the last byte.
        let spare = bytes.len() * 8 - self.len();
        if let Some(last) = bytes.last_mut() {
            *last &= 0xff << spare;
        }
        bytes
    }

    // Payloads longer than needed are accepted as long as every bit past `len` is zero.
    pub fn unpack(bytes: &[u8], len: usize) -> Result<Self, BitfieldError> {
        let needed = Self::num_bytes(len);
        if bytes.len() < needed {
            return Err(BitfieldError::TooShort { got: bytes.len(), len });
        }
        let mut bits = Bits::from_slice(bytes);
        if bits[len..].any() {
            return Err(BitfieldError::SpareBits { len });
        }
        bits.truncate(len);
        Ok(Self { bits })
    }
}

impl std::fmt::Debug for Bitfield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bitfield({}/{})", self.cardinality(), self.len())
    }
}
