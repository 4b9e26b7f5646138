use std::{
    net::{IpAddr, Ipv4Addr},
    ops::RangeInclusive,
    path::PathBuf,
    time::Duration,
};
use crate::ID;

#[derive(Debug, Clone)]
pub struct Config {

    pub client_id: ID,

    // Directory torrents are stored in.
    pub dir: PathBuf,

    pub listen_address: IpAddr,

    // Ports tried in order until one is free.
    pub listen_ports: RangeInclusive<u16>,

    // Maximum number of connected peers per torrent.
    pub peer_limit: usize,

    // Maximum number of interested peers unchoked per choking round.
    pub uploader_limit: usize,

    // Maximum number of peers we download from at once.
    pub downloader_limit: usize,

    pub choke_interval: Duration,

    // Number of pieces kept in memory for serving uploads.
    pub read_cache_size: usize,

}

const DEFAULT_CLIENT_ID: ID = *b"-PW0100-73b3b0b0b0b0";

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID,
            dir: PathBuf::from("downloads"),
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_ports: 6881..=6889,
            peer_limit: 30,
            uploader_limit: 5,
            downloader_limit: 10,
            choke_interval: Duration::from_secs(10),
            read_cache_size: 64,
        }
    }
}
