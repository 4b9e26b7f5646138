use std::{collections::HashSet, time::Instant};
use crate::{
    bitfield::Bitfield,
    p2p::{state::SessionState, PeerCommand, PeerHandle},
    stats::ThroughputStats,
    ID,
};

// What the controller knows about a peer session.
#[derive(Debug)]
pub struct Peer {

    pub handle: PeerHandle,

    // Known once the handshake is exchanged.
    pub id: Option<ID>,

    pub admitted: bool,

    // Mirror of the session's flags.
    pub state: SessionState,

    pub bitfield: Option<Bitfield>,

    // Pieces assigned to the peer's download pipeline.
    pub pieces: HashSet<usize>,

    // The download pipeline is issuing requests.
    pub downloading: bool,

    pub stalled: bool,

    pub throughput: ThroughputStats,

}

impl Peer {

    pub fn new(handle: PeerHandle, now: Instant) -> Self {
        Self {
            handle,
            id: None,
            admitted: false,
            state: SessionState::default(),
            bitfield: None,
            pieces: HashSet::new(),
            downloading: false,
            stalled: false,
            throughput: ThroughputStats::new(now),
        }
    }

    pub fn send(&self, cmd: PeerCommand) {
        self.handle.send(cmd);
    }

    // Peer has a piece we don't.
    pub fn is_interesting(&self, ours: &Bitfield) -> bool {
        self.bitfield
            .as_ref()
            .map(|bitfield| bitfield.has_any_missing_from(ours))
            .unwrap_or(false)
    }

    // Unchoked, interested and without work.
    pub fn is_idle(&self) -> bool {
        self.admitted
        && !self.state.peer_choking
        && self.state.am_interested
        && self.pieces.is_empty()
    }
}
