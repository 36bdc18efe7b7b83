use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::handshake::Handshake;
use crate::message::{Bitfield, Message};
use crate::{Config, Error, Result, HANDSHAKE_BYTES_LEN, SHA1_LEN};

/// Where a [`Client`] is in the connection sequence
///
/// Sessions only move forward: `Connected -> Handshaken -> Ready`, and any of
/// them to `Disconnected` on close or error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Handshaken,
    Ready,
    Disconnected,
}

/// Connected peer
pub struct Client<T> {
    socket: T,
    state: SessionState,
    peer_id: [u8; SHA1_LEN],
    io_timeout: Duration,
    /// Peer ID the remote sent in its handshake
    remote_peer_id: Option<[u8; SHA1_LEN]>,
    /// Pieces the remote has, from its bitfield and any `have` messages
    pub bitfield: Option<Bitfield>,
    bitfield_received: bool,
    /// Whether the remote is currently choking us
    pub choked: bool,
    /// Blocks requested twice across a choke, whose second copy may still
    /// arrive after the first was returned
    stale_blocks: Vec<(u32, u32)>,
}

impl Client<TcpStream> {
    /// Open a TCP connection to a peer
    pub async fn dial(addr: SocketAddr, config: &Config) -> Result<Client<TcpStream>> {
        let socket = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Network(format!(
                    "Timed out after {:?} connecting to {}",
                    config.connect_timeout, addr
                ))
            })?
            .map_err(|e| Error::Network(format!("Unable to connect to {}: {}", addr, e)))?;
        info!("Established TCP connection to {}", addr);
        Ok(Client::new(socket, config))
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected socket
    pub fn new(socket: T, config: &Config) -> Client<T> {
        Client {
            socket,
            state: SessionState::Connected,
            peer_id: config.peer_id,
            io_timeout: config.io_timeout,
            remote_peer_id: None,
            bitfield: None,
            bitfield_received: false,
            choked: true,
            stale_blocks: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_peer_id(&self) -> Option<&[u8; SHA1_LEN]> {
        self.remote_peer_id.as_ref()
    }

    /// Check if the remote has advertised the given piece
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield
            .as_ref()
            .is_some_and(|bitfield| bitfield.has_piece(index as usize))
    }

    /// Exchange handshakes and return the remote's peer ID
    pub async fn handshake(&mut self, info_hash: [u8; SHA1_LEN]) -> Result<[u8; SHA1_LEN]> {
        let res = self.exchange_handshakes(info_hash).await;
        self.close_on_error(res).await
    }

    /// Wait for the bitfield, declare interest and wait to be unchoked
    pub async fn ready(&mut self) -> Result<()> {
        let res = self.wait_for_unchoke().await;
        self.close_on_error(res).await
    }

    /// Request one block and wait for the matching `piece` message
    pub async fn request_block(&mut self, index: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        let res = self.fetch_block(index, begin, length).await;
        self.close_on_error(res).await
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;
        if let Err(e) = self.socket.shutdown().await {
            debug!("Error shutting down peer connection: {}", e);
        }
    }

    /// Send message to peer
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.check_open()?;
        debug!("Sending message: {}", message);
        with_timeout(self.io_timeout, self.socket.write_all(&message.serialise())).await
    }

    /// Receive the next message from peer, skipping keep-alives
    pub async fn receive(&mut self) -> Result<Message> {
        self.check_open()?;
        loop {
            let message = tokio::time::timeout(self.io_timeout, Message::deserialise(&mut self.socket))
                .await
                .map_err(|_| timed_out(self.io_timeout))??;
            match message {
                Message::KeepAlive => debug!("Received keep-alive"),
                message => {
                    debug!("Received message: {}", message);
                    return Ok(message);
                }
            }
        }
    }

    async fn exchange_handshakes(&mut self, info_hash: [u8; SHA1_LEN]) -> Result<[u8; SHA1_LEN]> {
        self.expect_state(SessionState::Connected)?;
        let initial_handshake = Handshake::new(info_hash, self.peer_id);
        with_timeout(
            self.io_timeout,
            self.socket.write_all(&initial_handshake.serialise()),
        )
        .await?;

        let mut response_handshake = [0; HANDSHAKE_BYTES_LEN];
        let mut filled = 0;
        while filled < HANDSHAKE_BYTES_LEN {
            let n = with_timeout(
                self.io_timeout,
                self.socket.read(&mut response_handshake[filled..]),
            )
            .await?;
            if n == 0 {
                return Err(Error::Handshake(format!(
                    "Connection closed after {} of {} handshake bytes",
                    filled, HANDSHAKE_BYTES_LEN
                )));
            }
            filled += n;
        }

        let deserialised_response = Handshake::deserialise(&response_handshake)?;
        if deserialised_response.info_hash != initial_handshake.info_hash {
            return Err(Error::Handshake(format!(
                "Info hash mismatch: us={}, peer={}",
                hex::encode(initial_handshake.info_hash),
                hex::encode(deserialised_response.info_hash),
            )));
        }

        info!(
            "Handshake complete, remote peer ID {}",
            hex::encode(deserialised_response.peer_id)
        );
        self.remote_peer_id = Some(deserialised_response.peer_id);
        self.state = SessionState::Handshaken;
        Ok(deserialised_response.peer_id)
    }

    async fn wait_for_unchoke(&mut self) -> Result<()> {
        self.expect_state(SessionState::Handshaken)?;
        while !self.bitfield_received {
            let message = self.receive().await?;
            self.observe(message);
        }

        self.send(Message::Interested).await?;
        while self.choked {
            let message = self.receive().await?;
            self.observe(message);
        }

        info!("Unchoked by peer, ready to request blocks");
        self.state = SessionState::Ready;
        Ok(())
    }

    async fn fetch_block(&mut self, index: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        self.expect_state(SessionState::Ready)?;
        let request = Message::Request {
            index,
            begin,
            length,
        };
        self.send(request.clone()).await?;
        let mut resent = false;

        loop {
            match self.receive().await? {
                Message::Piece {
                    index: piece_index,
                    begin: piece_begin,
                    block,
                } => {
                    if (piece_index, piece_begin) != (index, begin) {
                        if let Some(pos) = self
                            .stale_blocks
                            .iter()
                            .position(|&stale| stale == (piece_index, piece_begin))
                        {
                            debug!(
                                "Dropping duplicate block at offset {} of piece {}",
                                piece_begin, piece_index
                            );
                            self.stale_blocks.swap_remove(pos);
                            continue;
                        }
                    }
                    if piece_index != index {
                        return Err(Error::Protocol(format!(
                            "Received block of piece {} while waiting for piece {}",
                            piece_index, index
                        )));
                    }
                    if piece_begin != begin {
                        warn!(
                            "Ignoring block at offset {} of piece {}, waiting for offset {}",
                            piece_begin, index, begin
                        );
                        continue;
                    }
                    if block.len() != length as usize {
                        return Err(Error::Protocol(format!(
                            "Requested {} bytes at offset {} of piece {}, received {}",
                            length,
                            begin,
                            index,
                            block.len()
                        )));
                    }
                    if resent {
                        self.stale_blocks.push((index, begin));
                    }
                    return Ok(block);
                }
                Message::Unchoke if self.choked => {
                    // Requests pending when we were choked may have been dropped
                    self.choked = false;
                    self.send(request.clone()).await?;
                    resent = true;
                }
                message => self.observe(message),
            }
        }
    }

    /// Record state carried by messages that are not being waited on
    fn observe(&mut self, message: Message) {
        match message {
            Message::Bitfield(bitfield) => {
                self.bitfield = Some(bitfield);
                self.bitfield_received = true;
            }
            Message::Have(index) => {
                self.bitfield
                    .get_or_insert_with(|| Bitfield::new(Vec::new()))
                    .set_piece(index as usize);
            }
            Message::Choke => {
                if !self.choked {
                    warn!("Choked by peer");
                }
                self.choked = true;
            }
            Message::Unchoke => self.choked = false,
            other => debug!("Ignoring message: {}", other),
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => {
                Err(Error::Network("Peer connection is closed".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        self.check_open()?;
        if self.state != expected {
            return Err(Error::Protocol(format!(
                "Session is {:?}, operation requires {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }

    async fn close_on_error<R>(&mut self, res: Result<R>) -> Result<R> {
        if res.is_err() {
            self.close().await;
        }
        res
    }
}

async fn with_timeout<F, R>(duration: Duration, fut: F) -> Result<R>
where
    F: std::future::Future<Output = std::io::Result<R>>,
{
    Ok(tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| timed_out(duration))??)
}

fn timed_out(duration: Duration) -> Error {
    Error::Network(format!("Timed out after {:?} waiting for peer", duration))
}
