//! TFTP Server Implementation
//!
//! This module contains the main TFTP server logic that receives requests on
//! the well-known port and hands each one to its own transfer task.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use crate::protocol::{MAX_PACKET_SIZE, ProtocolError, Request, decode_request};
use crate::transfer::{TransferConfig, TransferError, handle_request, reject_request};

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    /// Directory requested filenames are resolved against. Without one,
    /// filenames are used as given.
    pub root_directory: Option<PathBuf>,
    pub transfer_config: TransferConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:69".to_string(),
            root_directory: None,
            transfer_config: TransferConfig::default(),
        }
    }
}

/// Main TFTP server
pub struct TftpServer {
    config: TftpServerConfig,
    socket: Option<UdpSocket>,
}

impl TftpServer {
    /// Create a new TFTP server with the given configuration
    pub fn new(config: TftpServerConfig) -> Self {
        Self { config, socket: None }
    }

    /// Create a new TFTP server with default configuration
    pub fn with_defaults() -> Self {
        Self::new(TftpServerConfig::default())
    }

    /// Create a new TFTP server with custom bind address and root directory
    pub fn with_config(bind_address: String, root_directory: Option<PathBuf>) -> Self {
        Self::new(TftpServerConfig {
            bind_address,
            root_directory,
            ..Default::default()
        })
    }

    /// Get the server's configuration
    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    /// Get a mutable reference to the server's configuration
    pub fn config_mut(&mut self) -> &mut TftpServerConfig {
        &mut self.config
    }

    /// Bind the listening socket and return its address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind TFTP server socket to {}", self.config.bind_address))?;

        let local_addr = socket.local_addr().context("Failed to get local address")?;
        match &self.config.root_directory {
            Some(root) => tracing::info!(
                "TFTP server listening on {}, serving files from {}",
                local_addr,
                root.display()
            ),
            None => tracing::info!("TFTP server listening on {}", local_addr),
        }

        self.socket = Some(socket);
        Ok(local_addr)
    }

    /// Start the TFTP server and run the main loop
    ///
    /// Binds first unless [`bind`](Self::bind) already did. Returns only when
    /// the listening socket fails.
    pub async fn run(&mut self) -> Result<()> {
        if self.socket.is_none() {
            self.bind().await?;
        }
        self.serve().await
    }

    /// Get the local address the server is bound to (if running)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Main server loop
    async fn serve(&self) -> Result<()> {
        let socket = self.socket.as_ref().context("Server must be bound before serving")?;

        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            let (len, client_addr) = match socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) if is_transient(&e) => {
                    tracing::debug!("Transient receive error: {}", e);
                    continue;
                }
                Err(e) => return Err(e).context("TFTP server socket failed"),
            };
            tracing::debug!("Received {} bytes from {}", len, client_addr);

            match decode_request(&buffer[..len]) {
                Ok(request) => self.dispatch(request, client_addr),
                Err(e @ (ProtocolError::NotARequest(_) | ProtocolError::UnknownOpcode(_))) => {
                    tracing::debug!("Ignoring packet from {}: {}", client_addr, e);
                }
                Err(e) => {
                    tracing::warn!("Invalid request from {}: {}", client_addr, e);
                }
            }
        }
    }

    /// Spawn a task to handle this request
    fn dispatch(&self, request: Request, client: SocketAddr) {
        let config = self.config.transfer_config.clone();
        let target = resolve_path(self.config.root_directory.as_deref(), &request.filename);

        tokio::spawn(async move {
            let filename = request.filename.clone();
            let result = match target {
                Ok(path) => handle_request(client, request, path, config).await.map(|_| ()),
                Err(e) => {
                    if let Err(send_error) = reject_request(client, &e, &config).await {
                        tracing::debug!("Failed to reject request from {}: {}", client, send_error);
                    }
                    Err(e)
                }
            };

            if let Err(e) = result {
                tracing::warn!("Failed to transfer '{}' with {}: {}", filename, client, e);
            }
        });
    }
}

/// Resolve a requested filename against the served directory
///
/// With a root, only plain relative names are accepted; absolute paths and
/// `..` components are an access violation.
pub fn resolve_path(root: Option<&Path>, filename: &str) -> Result<PathBuf, TransferError> {
    let requested = Path::new(filename);
    let Some(root) = root else {
        return Ok(requested.to_path_buf());
    };

    let mut path = root.to_path_buf();
    let mut names = 0;
    for component in requested.components() {
        match component {
            Component::Normal(name) => {
                path.push(name);
                names += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TransferError::AccessViolation(filename.to_string()));
            }
        }
    }
    if names == 0 {
        return Err(TransferError::AccessViolation(filename.to_string()));
    }

    Ok(path)
}

/// Receive errors the listening socket recovers from
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

/// Run a TFTP server with the given bind address and root directory
///
/// This is a convenience function that creates and runs a TFTP server.
pub async fn run_tftp_server(
    bind_address: String,
    root_directory: Option<PathBuf>,
    local_bind: Option<IpAddr>,
) -> Result<()> {
    let mut server = TftpServer::with_config(bind_address, root_directory);
    server.config.transfer_config.local_bind = local_bind;
    server.run().await
}
