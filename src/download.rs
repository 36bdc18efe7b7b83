use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::client::Client;
use crate::metainfo::{Info, Metainfo};
use crate::piece::{Piece, PieceBuffer};
use crate::torrent::Torrent;
use crate::tracker::Peer;
use crate::work::{SharedQueue, Work};
use crate::worker::Worker;
use crate::{Config, Error, Result, SHA1_LEN};

/// Download and verify one piece over a session that is ready
pub async fn download_piece<T>(
    client: &mut Client<T>,
    metainfo: &Metainfo,
    index: u32,
) -> Result<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let work = Work::from_info(&metainfo.info, index)?;
    fetch_piece(client, &work).await
}

/// Request the blocks of a piece one at a time in offset order, then verify
/// the assembled piece against its hash
pub async fn fetch_piece<T>(client: &mut Client<T>, work: &Work) -> Result<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = PieceBuffer::new(work.index, work.length);
    for (begin, length) in buffer.blocks() {
        let block = client.request_block(work.index, begin, length).await?;
        buffer.write(begin, &block)?;
    }
    let buf = buffer.verify(&work.hash)?;
    info!("Downloaded piece with index {}", work.index);
    Ok(buf)
}

/// Dial a peer and take the session through the handshake until it is ready
pub async fn connect(
    peer: &Peer,
    info_hash: [u8; SHA1_LEN],
    config: &Config,
) -> Result<Client<TcpStream>> {
    let mut client = Client::dial(peer.socket_addr(), config).await?;
    client.handshake(info_hash).await?;
    client.ready().await?;
    Ok(client)
}

/// Download the whole file
///
/// With `max_parallel_peers == 1` every piece comes from the single peer
/// chosen by `peer_index`, in index order, over one connection.
pub async fn download(torrent: &Torrent, config: &Config) -> Result<Vec<u8>> {
    if config.max_parallel_peers > 1 {
        return download_parallel(torrent, config).await;
    }

    let peer = select_peer(torrent, config)?;
    let mut client = connect(peer, torrent.info_hash(), config).await?;
    let res = fetch_all(&mut client, &torrent.metainfo.info).await;
    client.close().await;
    res
}

/// Download one piece of the file from the peer chosen by `peer_index`
pub async fn download_single_piece(
    torrent: &Torrent,
    config: &Config,
    index: u32,
) -> Result<Vec<u8>> {
    torrent.metainfo.info.piece(index)?;
    let peer = select_peer(torrent, config)?;
    let mut client = connect(peer, torrent.info_hash(), config).await?;
    let res = download_piece(&mut client, &torrent.metainfo, index).await;
    client.close().await;
    res
}

fn select_peer<'a>(torrent: &'a Torrent, config: &Config) -> Result<&'a Peer> {
    torrent.peers.get(config.peer_index).ok_or_else(|| {
        Error::Network(format!(
            "No peer at index {}, tracker returned {} peers",
            config.peer_index,
            torrent.peers.len()
        ))
    })
}

async fn fetch_all<T>(client: &mut Client<T>, info: &Info) -> Result<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(info.length as usize);
    for work in Work::all(info)? {
        buf.extend_from_slice(&fetch_piece(client, &work).await?);
    }
    Ok(buf)
}

async fn download_parallel(torrent: &Torrent, config: &Config) -> Result<Vec<u8>> {
    let info = &torrent.metainfo.info;
    let work = Work::all(info)?;
    let no_of_pieces = work.len();
    let queue = SharedQueue::new(work);
    let (tx, rx) = tokio::sync::mpsc::channel(no_of_pieces);

    let mut workers = JoinSet::new();
    for peer in torrent.peers.iter().take(config.max_parallel_peers) {
        workers.spawn(process(
            *peer,
            torrent.info_hash(),
            config.clone(),
            tx.clone(),
            queue.clone(),
        ));
    }

    drop(tx);
    let mut buf = vec![0; info.length as usize];
    let res = crate::piece::receiver(&mut buf, info.piece_length as usize, rx, no_of_pieces).await;
    // Workers left over once the file is complete, or after an abort, hold
    // open connections until they are stopped
    workers.shutdown().await;
    res?;
    Ok(buf)
}

#[instrument(skip(info_hash, config, tx, queue))]
async fn process(
    peer: Peer,
    info_hash: [u8; SHA1_LEN],
    config: Config,
    tx: Sender<Result<Piece>>,
    queue: SharedQueue,
) {
    let client = match connect(&peer, info_hash, &config).await {
        Ok(client) => client,
        Err(e) => {
            warn!("Unable to establish peer session: {}", e);
            return;
        }
    };
    info!("Established peer session");
    let mut worker = Worker::new(client, tx, queue);
    match worker.download().await {
        Err(e @ Error::Integrity { .. }) => warn!("Stopping, download aborted: {}", e),
        Err(e) => warn!("Encountered error during download: {}", e),
        Ok(()) => info!("No more work for this peer"),
    }
    worker.close().await;
}
