//! TFTP (Trivial File Transfer Protocol) Implementation
//!
//! This crate provides an RFC 1350 TFTP server with support for:
//! - Read requests (RRQ) and write requests (WRQ)
//! - Binary (octet) and text (netascii) transfer modes
//! - Lockstep DATA/ACK exchange with timeout and retransmission
//! - One task and one UDP socket per transfer
//! - Path traversal protection when serving a root directory
//!
//! Option negotiation (RFC 2347 and friends) is not supported; every
//! transfer uses 512-byte blocks.
//!
//! # Organization
//!
//! - [`protocol`] - packet codec, opcodes and error codes
//! - [`netascii`] - line-ending normalization for inbound text transfers
//! - [`transfer`] - the per-transfer state machine
//! - [`server`] - the request dispatcher on the well-known port
//!
//! # Basic Server Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use tftp::{TftpServer, TftpServerConfig, run_tftp_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Simple usage with convenience function
//!     run_tftp_server("0.0.0.0:69".to_string(), Some(PathBuf::from("./tftp_root")), None).await?;
//!
//!     // Or use the server struct for more control
//!     let mut server = TftpServer::new(TftpServerConfig {
//!         bind_address: "127.0.0.1:6969".to_string(),
//!         root_directory: Some(PathBuf::from("./files")),
//!         ..Default::default()
//!     });
//!     let addr = server.bind().await?;
//!     println!("listening on {addr}");
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Working with Packets
//!
//! ```rust
//! use tftp::{Packet, Request, TftpErrorCode, TftpOpcode, decode_request, encode_error};
//!
//! let request = Request::write("upload.txt", "netascii");
//! let decoded = decode_request(&request.encode()).unwrap();
//! assert_eq!(decoded.opcode, TftpOpcode::WriteRequest);
//!
//! let code = TftpErrorCode::FileAlreadyExists;
//! let packet = encode_error(code.as_u16(), code.default_message());
//! assert_eq!(
//!     Packet::decode(&packet),
//!     Ok(Packet::Error { code: 6, message: "File already exists.".to_string() })
//! );
//! ```

pub mod netascii;
pub mod protocol;
pub mod server;
pub mod transfer;

pub use protocol::*;
pub use server::*;
pub use transfer::*;
