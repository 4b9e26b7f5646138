use std::{cmp::Ordering, net::SocketAddr};
use rand::{rngs::StdRng, Rng, SeedableRng};

// Every third round one random peer is unchoked regardless of its rate.
const OPTIMISTIC_ROUNDS: usize = 3;

// A connected peer as seen by the choker.
#[derive(Debug, Clone, Copy)]
pub struct ChokeCandidate {

    pub address: SocketAddr,

    pub interested: bool,

    // Bytes per second we sent to the peer over the last round.
    pub up_rate: f64,

    // Bytes per second we received from the peer over the last round.
    pub down_rate: f64,

}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChokeDecision {

    pub unchoke: Vec<SocketAddr>,

    pub choke: Vec<SocketAddr>,

    // Also listed in unchoke.
    pub optimistic: Option<SocketAddr>,

}

#[derive(Debug)]
pub struct Choker {

    round: usize,

    // The opening round has run.
    started: bool,

    rng: StdRng,

}

impl Default for Choker {
    fn default() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl Choker {

    pub fn new(rng: StdRng) -> Self {
        Self {
            round: 0,
            started: false,
            rng,
        }
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn reset(&mut self) {
        self.round = 0;
        self.started = false;
    }

    // Decides who to unchoke this round. Peers are ranked by what we send them once
    // we're complete, by what they send us otherwise. Equal rates keep the given order.
    pub fn next_round(
        &mut self,
        peers: &[ChokeCandidate],
        uploader_limit: usize,
        complete: bool,
    ) -> ChokeDecision {

        let optimistic = if self.started {
            self.round += 1;
            self.round % OPTIMISTIC_ROUNDS == 0
        } else {
            self.started = true;
            false
        };

        let mut decision = ChokeDecision::default();
        if peers.is_empty() {
            return decision;
        }

        let rate = |peer: &ChokeCandidate| if complete { peer.up_rate } else { peer.down_rate };
        let mut ranked = peers.to_vec();
        ranked.sort_by(|a, b| rate(b).partial_cmp(&rate(a)).unwrap_or(Ordering::Equal));

        let mut uploading = 0;

        if optimistic {
            let pos = self.rng.gen_range(0..ranked.len());
            let peer = ranked.remove(pos);
            if peer.interested {
                uploading += 1;
            }
            decision.unchoke.push(peer.address);
            decision.optimistic = Some(peer.address);
        }

        for peer in ranked {
            if uploading < uploader_limit && peer.interested {
                uploading += 1;
                decision.unchoke.push(peer.address);
            } else {
                decision.choke.push(peer.address);
            }
        }

        tracing::info!("unchoked {} peers in round {}", uploading, self.round);
        decision
    }
}
