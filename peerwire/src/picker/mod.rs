use std::{collections::HashSet, net::SocketAddr};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use crate::bitfield::Bitfield;

// A peer as seen by the piece picker.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {

    pub address: SocketAddr,

    pub bitfield: &'a Bitfield,

    // The peer's download hasn't progressed for a while.
    pub stalled: bool,

    // Pieces assigned to the peer.
    pub pieces: &'a HashSet<usize>,

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {

    // A piece nobody is downloading.
    Fresh(usize),

    // A piece taken from a stalled peer, with its outstanding requests.
    Steal { from: SocketAddr, idx: usize },

}

// Decides which piece a peer downloads next.
pub trait PieceStrategy: Send + std::fmt::Debug {

    // `wanted` holds the pieces not assigned to anyone,
    // `in_transfer` the pieces being handed from one peer to another.
    fn pick(
        &mut self,
        peer: &Candidate<'_>,
        wanted: &[usize],
        others: &[Candidate<'_>],
        in_transfer: &HashSet<usize>,
    ) -> Option<Assignment>;

}

// Picks a random wanted piece, falling back to taking a piece from a stalled peer.
#[derive(Debug)]
pub struct RandomStrategy {
    rng: StdRng,
}

impl RandomStrategy {

    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl PieceStrategy for RandomStrategy {

    fn pick(
        &mut self,
        peer: &Candidate<'_>,
        wanted: &[usize],
        others: &[Candidate<'_>],
        in_transfer: &HashSet<usize>,
    ) -> Option<Assignment> {

        let available: Vec<usize> = wanted
            .iter()
            .copied()
            .filter(|&idx| peer.bitfield.get(idx))
            .collect();
        if let Some(&idx) = available.choose(&mut self.rng) {
            tracing::trace!("picked piece {} for {}", idx, peer.address);
            return Some(Assignment::Fresh(idx));
        }

        for other in others.iter().filter(|other| other.stalled && other.address != peer.address) {
            let mut pieces: Vec<usize> = other.pieces.iter().copied().collect();
            pieces.sort_unstable();
            let steal = pieces.into_iter().find(|idx| {
                !in_transfer.contains(idx)
                && !peer.pieces.contains(idx)
                && peer.bitfield.get(*idx)
            });
            if let Some(idx) = steal {
                tracing::info!("{} taking piece {} from stalled peer {}", peer.address, idx, other.address);
                return Some(Assignment::Steal { from: other.address, idx });
            }
        }

        None
    }
}
