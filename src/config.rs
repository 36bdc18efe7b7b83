use std::time::Duration;

use crate::{Error, Result, SHA1_LEN};

const DEFAULT_PEER_ID: &[u8; SHA1_LEN] = b"-BC0100-000000000000";
const DEFAULT_PORT: u16 = 6881;

/// Client settings threaded through tracker, peer and download code
#[derive(Debug, Clone)]
pub struct Config {
    /// Our peer ID, sent to the tracker and in every handshake
    pub peer_id: [u8; SHA1_LEN],
    /// Port reported to the tracker
    pub port: u16,
    /// Timeout for establishing a TCP connection to a peer
    pub connect_timeout: Duration,
    /// Timeout for any single read or write on a peer connection
    pub io_timeout: Duration,
    /// Timeout for the tracker announce round trip
    pub tracker_timeout: Duration,
    /// Number of peers to download from concurrently. `1` downloads every
    /// piece sequentially over a single connection.
    pub max_parallel_peers: usize,
    /// Index into the tracker's peer list used when downloading from one peer
    pub peer_index: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            peer_id: *DEFAULT_PEER_ID,
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(15),
            max_parallel_peers: 1,
            peer_index: 0,
        }
    }
}

impl Config {
    /// Set peer ID from a string, which must be exactly 20 bytes long
    pub fn with_peer_id(mut self, peer_id: &str) -> Result<Config> {
        self.peer_id = peer_id.as_bytes().try_into().map_err(|_| {
            Error::Validation(format!(
                "peer ID must be {} bytes, got {}",
                SHA1_LEN,
                peer_id.len()
            ))
        })?;
        Ok(self)
    }
}
