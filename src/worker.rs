use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::download::fetch_piece;
use crate::piece::Piece;
use crate::work::SharedQueue;
use crate::{Error, Result};

/// Piece download worker
pub struct Worker<T> {
    client: Client<T>,
    piece_sender: Sender<Result<Piece>>,
    work_queue: SharedQueue,
}

impl<T> Worker<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a worker around a session that is already ready
    pub fn new(client: Client<T>, tx: Sender<Result<Piece>>, queue: SharedQueue) -> Worker<T> {
        Worker {
            client,
            piece_sender: tx,
            work_queue: queue,
        }
    }

    /// Download pieces from connected peer until the queue holds nothing it has
    ///
    /// A piece that fails verification is reported to the receiver, which
    /// aborts the download, and is returned. Any other failure puts the piece
    /// back on the queue for another worker and is returned.
    pub async fn download(&mut self) -> Result<()> {
        let mut skipped = 0;
        while let Some(work) = self.work_queue.dequeue() {
            if !self.client.has_piece(work.index) {
                self.work_queue.enqueue(work);
                skipped += 1;
                if skipped >= self.work_queue.len() {
                    info!("Peer has none of the remaining pieces");
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }
            skipped = 0;

            let index = work.index;
            match fetch_piece(&mut self.client, &work).await {
                Ok(buf) => {
                    if self.piece_sender.send(Ok(Piece { index, buf })).await.is_err() {
                        debug!("Receiver gone, stopping worker");
                        break;
                    }
                }
                Err(e @ Error::Integrity { .. }) => {
                    let _ = self.piece_sender.send(Err(e.clone())).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!("Failed to download piece {}, putting back on queue", index);
                    self.work_queue.enqueue(work);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        self.client.close().await
    }
}
