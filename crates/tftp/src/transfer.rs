//! TFTP File Transfer Logic
//!
//! This module drives a single read or write transfer to completion over its
//! own UDP socket. Every outbound DATA or ACK is retransmitted on timeout until
//! the matching response arrives or the attempts run out.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use crate::netascii::NetasciiDecoder;
use crate::protocol::{
    BLOCK_SIZE, MAX_PACKET_SIZE, Packet, Request, TftpErrorCode, TftpOpcode, TransferMode, encode_ack, encode_data,
    encode_error,
};

const TIMEOUT_SECS: u64 = 1;
const MAX_ATTEMPTS: usize = 3;

const OPEN_FAILED: &str = "Not defined error: Could not open the file descriptor";

/// Transfer session configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How long to wait for a response before retransmitting
    pub timeout: Duration,
    /// Total number of sends of one packet, including the first
    pub max_attempts: usize,
    /// Local address for transfer sockets; unspecified address when `None`
    pub local_bind: Option<IpAddr>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(TIMEOUT_SECS),
            max_attempts: MAX_ATTEMPTS,
            local_bind: None,
        }
    }
}

/// Reasons a transfer ends early
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("disk full or allocation exceeded: {0}")]
    DiskFull(#[source] io::Error),
    #[error("access violation: {0}")]
    AccessViolation(String),
    #[error("unsupported transfer mode '{0}'")]
    UnsupportedMode(String),
    #[error("{0} cannot start a transfer")]
    IllegalOperation(TftpOpcode),
    #[error("could not open file: {0}")]
    Undefined(#[source] io::Error),
    #[error("no response for block {block} after {attempts} attempts")]
    RetryExhausted { block: u16, attempts: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransferError {
    /// The ERROR packet to send to the peer for this failure
    ///
    /// Retry exhaustion and I/O failures in the middle of a transfer end it
    /// without telling the peer.
    pub fn wire_error(&self) -> Option<(TftpErrorCode, &'static str)> {
        let code = match self {
            Self::NotFound(_) => TftpErrorCode::FileNotFound,
            Self::AlreadyExists(_) => TftpErrorCode::FileAlreadyExists,
            Self::DiskFull(_) => TftpErrorCode::DiskFull,
            Self::AccessViolation(_) => TftpErrorCode::AccessViolation,
            Self::UnsupportedMode(_) | Self::IllegalOperation(_) => TftpErrorCode::IllegalOperation,
            Self::Undefined(_) => return Some((TftpErrorCode::NotDefined, OPEN_FAILED)),
            Self::RetryExhausted { .. } | Self::Io(_) => return None,
        };
        Some((code, code.default_message()))
    }
}

/// What a finished transfer moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// DATA packets exchanged, including the terminating short one
    pub blocks: u64,
    /// File bytes carried by those packets
    pub bytes: u64,
}

impl TransferSummary {
    fn record(&mut self, payload_len: usize) {
        self.blocks += 1;
        self.bytes += payload_len as u64;
    }
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes in {} blocks", self.bytes, self.blocks)
    }
}

/// One read or write transfer bound to a single peer
pub struct Transfer {
    peer: SocketAddr,
    socket: UdpSocket,
    request: Request,
    path: PathBuf,
    config: TransferConfig,
}

impl Transfer {
    /// Bind the transfer socket for `request`
    pub async fn open(
        peer: SocketAddr,
        request: Request,
        path: PathBuf,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        let socket = create_ephemeral_socket(peer, config.local_bind).await?;
        Ok(Self {
            peer,
            socket,
            request,
            path,
            config,
        })
    }

    /// Address of the transfer socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Client address every packet of this transfer goes to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Run the transfer to completion
    ///
    /// Failures that have a wire representation are reported to the peer
    /// before the error is returned.
    pub async fn run(self) -> Result<TransferSummary, TransferError> {
        tracing::info!(
            "{} for '{}' in {} mode from {}",
            self.request.opcode,
            self.request.filename,
            self.request.mode,
            self.peer
        );

        let result = match self.request.opcode {
            TftpOpcode::ReadRequest => self.send_file().await,
            TftpOpcode::WriteRequest => self.receive_file().await,
            opcode => Err(TransferError::IllegalOperation(opcode)),
        };

        match &result {
            Ok(summary) => {
                tracing::info!(
                    "{} of '{}' with {} complete: {}",
                    self.request.opcode,
                    self.request.filename,
                    self.peer,
                    summary
                );
            }
            Err(e) => {
                if let Some((code, message)) = e.wire_error() {
                    self.send_error(code, message).await;
                }
            }
        }

        result
    }

    /// Serve a read request: DATA(1), DATA(2), ... each acknowledged in turn
    async fn send_file(&self) -> Result<TransferSummary, TransferError> {
        if matches!(tokio::fs::try_exists(&self.path).await, Ok(false)) {
            return Err(TransferError::NotFound(self.path.clone()));
        }

        let mut file = File::open(&self.path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TransferError::NotFound(self.path.clone()),
            _ => TransferError::Undefined(e),
        })?;

        let mut summary = TransferSummary::default();
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut block: u16 = 1;

        loop {
            let n = read_block(&mut file, &mut buf).await?;
            let packet = encode_data(block, &buf[..n]);

            self.exchange(&packet, TftpOpcode::Acknowledgment, block, |response| match response {
                Packet::Ack { block: acked } if acked == block => Ok(()),
                other => Err(other),
            })
            .await?;
            summary.record(n);

            // A short block, possibly empty, ends the transfer
            if n < BLOCK_SIZE {
                return Ok(summary);
            }

            block = block.wrapping_add(1);
        }
    }

    /// Serve a write request: ACK(0), then ACK(n) for every DATA(n)
    async fn receive_file(&self) -> Result<TransferSummary, TransferError> {
        if matches!(tokio::fs::try_exists(&self.path).await, Ok(true)) {
            return Err(TransferError::AlreadyExists(self.path.clone()));
        }

        let mode = self
            .request
            .transfer_mode()
            .ok_or_else(|| TransferError::UnsupportedMode(self.request.mode.clone()))?;

        let file = create_exclusive(&self.path).await?;
        let mut writer = BufWriter::new(file);
        let mut decoder = (mode == TransferMode::NetAscii).then(NetasciiDecoder::new);

        let received = self.receive_blocks(&mut writer, &mut decoder).await;

        // Whatever arrived stays on disk, even when the transfer was cut short
        let mut tail = Vec::new();
        if let Some(decoder) = decoder.as_mut() {
            decoder.finish(&mut tail);
        }
        let flushed = finish_output(&mut writer, &tail).await;

        match (received, flushed) {
            (Ok((summary, last_block)), Ok(())) => {
                self.socket.send_to(&encode_ack(last_block), self.peer).await?;
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(classify_write_error(e)),
            (Err(e), flushed) => {
                if let Err(flush_error) = flushed {
                    tracing::debug!("Failed to flush '{}': {}", self.path.display(), flush_error);
                }
                Err(e)
            }
        }
    }

    /// Receive DATA blocks until a short one arrives
    ///
    /// Returns the summary and the block number still to be acknowledged.
    async fn receive_blocks(
        &self,
        writer: &mut BufWriter<File>,
        decoder: &mut Option<NetasciiDecoder>,
    ) -> Result<(TransferSummary, u16), TransferError> {
        let mut summary = TransferSummary::default();
        let mut decoded = Vec::with_capacity(BLOCK_SIZE);
        let mut ack: u16 = 0;

        loop {
            let expected = ack.wrapping_add(1);
            let payload = self
                .exchange(&encode_ack(ack), TftpOpcode::Data, expected, |response| match response {
                    Packet::Data { block, payload } if block == expected => Ok(payload),
                    other => Err(other),
                })
                .await?;
            ack = expected;
            summary.record(payload.len());

            let written = match decoder.as_mut() {
                Some(decoder) => {
                    decoded.clear();
                    decoder.decode(&payload, &mut decoded);
                    writer.write_all(&decoded).await
                }
                None => writer.write_all(&payload).await,
            };
            written.map_err(classify_write_error)?;

            if payload.len() < BLOCK_SIZE {
                return Ok((summary, ack));
            }
        }
    }

    /// Send `packet` and wait for the response `accept` takes
    ///
    /// Each attempt has a fixed deadline. Packets `accept` hands back are
    /// logged and skipped without using up an attempt.
    async fn exchange<T>(
        &self,
        packet: &[u8],
        awaiting: TftpOpcode,
        block: u16,
        accept: impl Fn(Packet) -> Result<T, Packet>,
    ) -> Result<T, TransferError> {
        for attempt in 1..=self.config.max_attempts {
            self.socket.send_to(packet, self.peer).await?;
            let deadline = Instant::now() + self.config.timeout;

            while let Some(response) = self.recv_until(deadline).await? {
                match accept(response) {
                    Ok(value) => return Ok(value),
                    Err(Packet::Error { code, message }) => {
                        tracing::warn!("{} reported error {}: {}", self.peer, code, message);
                    }
                    Err(Packet::Ack { block: got }) | Err(Packet::Data { block: got, .. }) => {
                        tracing::debug!(
                            "Received block {} from {} while awaiting {} {}",
                            got,
                            self.peer,
                            awaiting,
                            block
                        );
                    }
                    Err(other) => {
                        tracing::debug!("Ignoring {} from {}", other.opcode(), self.peer);
                    }
                }
            }

            tracing::debug!(
                "Timed out awaiting {} {} from {} (attempt {}/{})",
                awaiting,
                block,
                self.peer,
                attempt,
                self.config.max_attempts
            );
        }

        tracing::warn!(
            "Giving up on '{}' with {}: no {} {} after {} attempts",
            self.request.filename,
            self.peer,
            awaiting,
            block,
            self.config.max_attempts
        );
        Err(TransferError::RetryExhausted {
            block,
            attempts: self.config.max_attempts,
        })
    }

    /// Receive the next well-formed packet from the peer, or `None` at the deadline
    async fn recv_until(&self, deadline: Instant) -> io::Result<Option<Packet>> {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            let (n, src) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };

            if src != self.peer {
                tracing::debug!("Packet from unknown source {} on transfer with {}", src, self.peer);
                let code = TftpErrorCode::UnknownTransferId;
                if let Err(e) = self
                    .socket
                    .send_to(&encode_error(code.as_u16(), code.default_message()), src)
                    .await
                {
                    tracing::debug!("Failed to send error to {}: {}", src, e);
                }
                continue;
            }

            match Packet::decode(&buf[..n]) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => tracing::debug!("Dropping malformed packet from {}: {}", src, e),
            }
        }
    }

    /// Best-effort ERROR packet to the peer
    async fn send_error(&self, code: TftpErrorCode, message: &str) {
        tracing::debug!("Sending error {} to {}: {}", code.as_u16(), self.peer, message);
        if let Err(e) = self.socket.send_to(&encode_error(code.as_u16(), message), self.peer).await {
            tracing::warn!("Failed to send error packet to {}: {}", self.peer, e);
        }
    }
}

/// Open a transfer for `request` and run it
pub async fn handle_request(
    peer: SocketAddr,
    request: Request,
    path: PathBuf,
    config: TransferConfig,
) -> Result<TransferSummary, TransferError> {
    Transfer::open(peer, request, path, config).await?.run().await
}

/// Answer a request that will not be served with its ERROR packet
///
/// The packet comes from a fresh transfer socket, as a transfer's would.
pub async fn reject_request(peer: SocketAddr, error: &TransferError, config: &TransferConfig) -> io::Result<()> {
    if let Some((code, message)) = error.wire_error() {
        let sock = create_ephemeral_socket(peer, config.local_bind).await?;
        sock.send_to(&encode_error(code.as_u16(), message), peer).await?;
    }
    Ok(())
}

/// Create an ephemeral UDP socket appropriate for the client address family
async fn create_ephemeral_socket(client: SocketAddr, local_bind: Option<IpAddr>) -> io::Result<UdpSocket> {
    let bind_addr = match (local_bind, client) {
        (Some(ip), _) => SocketAddr::new(ip, 0),
        (None, SocketAddr::V4(_)) => SocketAddr::from(([0, 0, 0, 0], 0)),
        (None, SocketAddr::V6(_)) => SocketAddr::from(([0u16; 8], 0)),
    };

    let sock = UdpSocket::bind(bind_addr).await?;
    tracing::debug!("Transfer socket bound to {}", sock.local_addr()?);
    Ok(sock)
}

/// Create `path` for writing, failing if it already exists
async fn create_exclusive(path: &Path) -> Result<File, TransferError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => TransferError::AlreadyExists(path.to_path_buf()),
            io::ErrorKind::StorageFull => TransferError::DiskFull(e),
            _ => TransferError::Undefined(e),
        })
}

fn classify_write_error(e: io::Error) -> TransferError {
    match e.kind() {
        io::ErrorKind::StorageFull => TransferError::DiskFull(e),
        _ => TransferError::Io(e),
    }
}

async fn finish_output(writer: &mut BufWriter<File>, tail: &[u8]) -> io::Result<()> {
    writer.write_all(tail).await?;
    writer.flush().await
}

/// Fill `buf` from `reader`, stopping early only at end of file
async fn read_block<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
