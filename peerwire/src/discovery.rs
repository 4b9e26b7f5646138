use std::net::SocketAddr;
use tokio::sync::mpsc;

pub type DiscoveryTx = mpsc::UnboundedSender<DiscoveryEvent>;
pub type DiscoveryRx = mpsc::UnboundedReceiver<DiscoveryEvent>;

// Replies to peer requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {

    // Candidate peer addresses.
    Peers(Vec<SocketAddr>),

    // Every known source failed.
    Abort(String),

}

// Lifecycle events reported to the discovery source.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Event {

    Completed,

    #[default]
    Started,

    Stopped,

}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Completed => write!(f, "completed"),
            Event::Started => write!(f, "started"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}

// Source of peer addresses for a torrent, such as a tracker client.
// Byte counts are deltas, `left` counts down from the torrent's length.
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {

    // Channel replies are sent on, given before any request.
    fn attach(&mut self, discovery_tx: DiscoveryTx);

    // Ask for up to `num_want` peers, answered asynchronously.
    fn request(&mut self, num_want: usize);

    fn update_uploaded(&mut self, delta: u64);

    fn update_downloaded(&mut self, delta: u64);

    fn update_left(&mut self, delta: u64);

    fn send_event(&mut self, event: Event);

    async fn close(&mut self);

}

// Hands out a fixed list of peers.
#[derive(Debug, Default)]
pub struct StaticDiscovery {

    peers: Vec<SocketAddr>,

    discovery_tx: Option<DiscoveryTx>,

    pub uploaded: u64,

    pub downloaded: u64,

    pub left: u64,

    pub events: Vec<Event>,

}

impl StaticDiscovery {
    pub fn new(peers: Vec<SocketAddr>, total_len: u64) -> Self {
        Self {
            peers,
            left: total_len,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Discovery for StaticDiscovery {

    fn attach(&mut self, discovery_tx: DiscoveryTx) {
        self.discovery_tx = Some(discovery_tx);
    }

    fn request(&mut self, num_want: usize) {
        let Some(tx) = &self.discovery_tx else {
            tracing::warn!("peer request before discovery attached");
            return;
        };
        let event = if self.peers.is_empty() {
            DiscoveryEvent::Abort("no peers known".into())
        } else {
            DiscoveryEvent::Peers(self.peers.iter().take(num_want).copied().collect())
        };
        tx.send(event).ok();
    }

    fn update_uploaded(&mut self, delta: u64) {
        self.uploaded += delta;
    }

    fn update_downloaded(&mut self, delta: u64) {
        self.downloaded += delta;
    }

    fn update_left(&mut self, delta: u64) {
        self.left = self.left.saturating_sub(delta);
    }

    fn send_event(&mut self, event: Event) {
        tracing::trace!("discovery event: {}", event);
        self.events.push(event);
    }

    async fn close(&mut self) {
        self.discovery_tx = None;
    }
}
