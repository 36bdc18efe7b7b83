use tracing::info;

use crate::metainfo::Metainfo;
use crate::torrent::Torrent;
use crate::tracker::request_peers;
use crate::{Config, Result};

/// Perform required setup prior to attempting file download
pub async fn init(metainfo: Metainfo, config: &Config) -> Result<Torrent> {
    info!(
        "Announcing {} ({}) to {}",
        metainfo.info.name,
        hex::encode(metainfo.info_hash),
        metainfo.announce
    );
    let peers = request_peers(&metainfo, config).await?;
    Ok(Torrent::new(metainfo, peers))
}
