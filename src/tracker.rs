use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::metainfo::Metainfo;
use crate::{BencodeType, Config, Error, Result, SHA1_LEN};

const INTERVAL_KEY: &str = "interval";
const PEERS_KEY: &str = "peers";
const FAILURE_KEY: &str = "failure reason";
const IP_KEY: &str = "ip";
const PORT_KEY: &str = "port";
const COMPACT_PEER_LEN: usize = 6;

/// Parameters of an announce request
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    /// SHA1 hash of the `info` dict, sent as raw bytes
    pub info_hash: [u8; SHA1_LEN],
    /// Our peer ID
    pub peer_id: [u8; SHA1_LEN],
    /// Port we report to the tracker
    pub port: u16,
    /// Total bytes uploaded so far
    pub uploaded: u64,
    /// Total bytes downloaded so far
    pub downloaded: u64,
    /// Bytes still to download
    pub left: u64,
    /// Ask for the 6-bytes-per-peer compact peer list
    pub compact: bool,
}

impl AnnounceParams {
    /// Parameters for a fresh download of the whole file
    pub fn new(metainfo: &Metainfo, config: &Config) -> AnnounceParams {
        AnnounceParams {
            info_hash: metainfo.info_hash,
            peer_id: config.peer_id,
            port: config.port,
            uploaded: 0,
            downloaded: 0,
            left: metainfo.info.length,
            compact: true,
        }
    }
}

/// Percent-encode every byte, for binary query values
fn percent_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("%{:02X}", byte)).collect()
}

/// GET request to tracker
pub struct Request {
    /// URL to make GET request to tracker
    pub url: Url,
}

impl Request {
    /// Create request
    pub fn new(tracker_url: &str, params: &AnnounceParams) -> Result<Request> {
        let separator = if tracker_url.contains('?') { '&' } else { '?' };
        let string_url = format!(
            "{}{}info_hash={}&peer_id={}",
            tracker_url,
            separator,
            percent_encode(&params.info_hash),
            percent_encode(&params.peer_id)
        );
        let mut url = Url::parse(&string_url).map_err(|e| {
            Error::Validation(format!("Invalid announce URL {}: {}", tracker_url, e))
        })?;
        url.query_pairs_mut()
            .append_pair("port", &params.port.to_string())
            .append_pair("uploaded", &params.uploaded.to_string())
            .append_pair("downloaded", &params.downloaded.to_string())
            .append_pair("left", &params.left.to_string())
            .append_pair("compact", if params.compact { "1" } else { "0" });
        Ok(Request { url })
    }

    /// Send request and return response body
    pub async fn send(self, timeout: Duration) -> Result<Vec<u8>> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let response = client.get(self.url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Response from tracker
#[derive(Debug, PartialEq)]
pub enum Response {
    /// Failed query
    Failure(String),
    /// Successful query
    Success {
        /// Interval (in seconds) at which to reconnect to tracker to refresh peer list
        interval: u64,
        /// Peers of file reported by tracker
        peers: Vec<Peer>,
    },
}

impl Response {
    /// Deserialise response message body
    pub fn deserialise(data: &[u8]) -> Result<Response> {
        let value = crate::parse::parse(data)?;
        if value.as_dict().is_none() {
            return Err(Error::Validation(
                "Invalid tracker response, must be a dict".to_string(),
            ));
        }

        if let Some(reason) = value.get(FAILURE_KEY) {
            let reason = reason.as_bytes().ok_or_else(|| incorrect_type(FAILURE_KEY))?;
            return Ok(Response::Failure(
                String::from_utf8_lossy(reason).into_owned(),
            ));
        }

        let interval = match value.get(INTERVAL_KEY) {
            Some(BencodeType::Integer(int)) if *int >= 0 => *int as u64,
            Some(_) => return Err(incorrect_type(INTERVAL_KEY)),
            None => return Err(missing_key(INTERVAL_KEY)),
        };
        let peers = match value.get(PEERS_KEY) {
            Some(BencodeType::ByteString(data)) => Self::parse_compact_peers(data)?,
            Some(BencodeType::List(entries)) => Self::parse_peer_dicts(entries)?,
            Some(_) => return Err(incorrect_type(PEERS_KEY)),
            None => return Err(missing_key(PEERS_KEY)),
        };
        Ok(Response::Success { interval, peers })
    }

    /// Parse peers encoded in "compact" form
    fn parse_compact_peers(data: &[u8]) -> Result<Vec<Peer>> {
        if data.len() % COMPACT_PEER_LEN != 0 {
            return Err(Error::Validation(format!(
                "Invalid tracker response, compact peers length {} is not a multiple of {}",
                data.len(),
                COMPACT_PEER_LEN
            )));
        }
        Ok(data.chunks_exact(COMPACT_PEER_LEN).map(Peer::new).collect())
    }

    /// Parse peers given as a list of dicts with `ip` and `port` keys
    fn parse_peer_dicts(entries: &[BencodeType]) -> Result<Vec<Peer>> {
        entries
            .iter()
            .map(|entry| {
                let ip = entry
                    .get(IP_KEY)
                    .and_then(BencodeType::as_bytes)
                    .and_then(|ip| std::str::from_utf8(ip).ok())
                    .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
                    .ok_or_else(|| {
                        Error::Validation(
                            "Invalid tracker response, peer entry has no IPv4 address".to_string(),
                        )
                    })?;
                let port = entry
                    .get(PORT_KEY)
                    .and_then(BencodeType::as_integer)
                    .and_then(|port| u16::try_from(port).ok())
                    .ok_or_else(|| {
                        Error::Validation(
                            "Invalid tracker response, peer entry has an invalid port".to_string(),
                        )
                    })?;
                Ok(Peer { ip, port })
            })
            .collect()
    }
}

fn missing_key(key: &str) -> Error {
    Error::Validation(format!(
        "Invalid tracker response, missing the following key: {}",
        key
    ))
}

fn incorrect_type(key: &str) -> Error {
    Error::Validation(format!(
        "Invalid tracker response, the following key's value has an incorrect type: {}",
        key
    ))
}

/// Peer of file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    /// IP address of peer
    pub ip: Ipv4Addr,
    /// Port of peer
    pub port: u16,
}

impl Peer {
    /// Create peer from a 6 byte compact entry (IP, then big-endian port)
    fn new(data: &[u8]) -> Peer {
        Peer {
            ip: Ipv4Addr::new(data[0], data[1], data[2], data[3]),
            port: u16::from_be_bytes([data[4], data[5]]),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Announce to the tracker and return the peers it reports
pub async fn request_peers(metainfo: &Metainfo, config: &Config) -> Result<Vec<Peer>> {
    let params = AnnounceParams::new(metainfo, config);
    let body = Request::new(&metainfo.announce, &params)?
        .send(config.tracker_timeout)
        .await?;
    match Response::deserialise(&body)? {
        Response::Failure(reason) => Err(Error::Network(format!(
            "tracker returned failure: {}",
            reason
        ))),
        Response::Success { interval, peers } => {
            info!("Tracker returned {} peers", peers.len());
            debug!("Tracker re-announce interval: {}s", interval);
            Ok(peers)
        }
    }
}
