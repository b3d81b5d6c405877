//! TFTP Protocol Implementation
//!
//! This module contains the wire codec for the five RFC 1350 packet kinds
//! together with the protocol constants shared by the transfer and server
//! modules.
//!
//! # Packet layouts
//!
//! All multi-byte integers are big-endian.
//!
//! | Packet     | Layout                                        |
//! |------------|-----------------------------------------------|
//! | RRQ / WRQ  | opcode(2) · filename · 0 · mode · 0           |
//! | DATA       | opcode(2)=3 · block(2) · payload(0..=512)     |
//! | ACK        | opcode(2)=4 · block(2)                        |
//! | ERROR      | opcode(2)=5 · code(2) · message · 0           |

use std::fmt;
use std::str::FromStr;

/// Payload size of a full DATA block. A shorter block ends the transfer.
pub const BLOCK_SIZE: usize = 512;

/// Largest packet the protocol produces: 4 header bytes plus a full block.
pub const MAX_PACKET_SIZE: usize = 4 + BLOCK_SIZE;

/// Errors produced while decoding a datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("packet too short")]
    TooShort,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("{0} is not a request")]
    NotARequest(TftpOpcode),
    #[error("{0} not terminated")]
    Unterminated(&'static str),
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
}

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Client requests to read a file from the server.
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Client requests to write a file to the server. The server answers with
    /// ACK(0) and the client then sends DATA(1), DATA(2), ...
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// Carries a block number and up to 512 bytes of file content. The last
    /// packet of a transfer carries fewer than 512 bytes, possibly zero.
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Acknowledges receipt of a data packet. ACK(0) acknowledges a WRQ.
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Reports an error condition and terminates the transfer.
    Error = 5,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(6), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl From<TftpOpcode> for u16 {
    fn from(opcode: TftpOpcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined, see the error message
    NotDefined = 0,

    /// Error code 1: File not found
    FileNotFound = 1,

    /// Error code 2: Access violation
    ///
    /// Also used for filenames that would escape the served directory.
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    ///
    /// Sent to a source that is not the peer of the transfer socket.
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(6), Some(TftpErrorCode::FileAlreadyExists));
    /// assert_eq!(TftpErrorCode::from_u16(8), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the message this server sends along with the error code
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::FileNotFound.default_message(), "File not found");
    /// assert_eq!(TftpErrorCode::FileAlreadyExists.default_message(), "File already exists.");
    /// ```
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Not defined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists.",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl From<TftpErrorCode> for u16 {
    fn from(error_code: TftpErrorCode) -> Self {
        error_code.as_u16()
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
///
/// Mode strings are matched exactly as received; `"OCTET"` is not `octet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode, data is stored as received.
    Octet,

    /// Text mode. Inbound data has its netascii line endings normalized
    /// before it is stored.
    NetAscii,
}

impl TransferMode {
    /// Parse a transfer mode from its wire string
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!(TransferMode::from_str_opt("octet"), Some(TransferMode::Octet));
    /// assert_eq!(TransferMode::from_str_opt("netascii"), Some(TransferMode::NetAscii));
    /// assert_eq!(TransferMode::from_str_opt("NETASCII"), None);
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::NetAscii),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::NetAscii => "netascii",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("Unsupported transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TFTP Request (RRQ/WRQ) representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The request opcode (RRQ or WRQ)
    pub opcode: TftpOpcode,
    /// Requested filename, as sent by the client
    pub filename: String,
    /// Mode string, as sent by the client
    pub mode: String,
}

impl Request {
    /// Create a new read request
    ///
    /// # Examples
    /// ```
    /// use tftp::{Request, TftpOpcode};
    ///
    /// let request = Request::read("boot.img", "octet");
    /// assert_eq!(request.opcode, TftpOpcode::ReadRequest);
    /// assert_eq!(request.filename, "boot.img");
    /// ```
    pub fn read(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            opcode: TftpOpcode::ReadRequest,
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// Create a new write request
    pub fn write(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            opcode: TftpOpcode::WriteRequest,
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// The recognized transfer mode, if any
    pub fn transfer_mode(&self) -> Option<TransferMode> {
        TransferMode::from_str_opt(&self.mode)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(2 + self.filename.len() + 1 + self.mode.len() + 1);
        v.extend_from_slice(&self.opcode.as_u16().to_be_bytes());
        v.extend_from_slice(self.filename.as_bytes());
        v.push(0);
        v.extend_from_slice(self.mode.as_bytes());
        v.push(0);
        v
    }
}

/// A decoded TFTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest(Request),
    WriteRequest(Request),
    Data { block: u16, payload: Vec<u8> },
    Ack { block: u16 },
    Error { code: u16, message: String },
}

impl Packet {
    /// Decode any of the five packet kinds
    ///
    /// # Examples
    /// ```
    /// use tftp::{Packet, encode_ack};
    ///
    /// assert_eq!(Packet::decode(&encode_ack(7)), Ok(Packet::Ack { block: 7 }));
    /// assert!(Packet::decode(&[0, 4, 0]).is_err());
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let (opcode, rest) = decode_header(buf)?;
        match opcode {
            TftpOpcode::ReadRequest => decode_request(buf).map(Self::ReadRequest),
            TftpOpcode::WriteRequest => decode_request(buf).map(Self::WriteRequest),
            TftpOpcode::Data => Ok(Self::Data {
                block: u16::from_be_bytes([rest[0], rest[1]]),
                payload: rest[2..].to_vec(),
            }),
            TftpOpcode::Acknowledgment => Ok(Self::Ack {
                block: u16::from_be_bytes([rest[0], rest[1]]),
            }),
            TftpOpcode::Error => {
                let (code, message) = decode_error(rest)?;
                Ok(Self::Error { code, message })
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::ReadRequest(request) | Self::WriteRequest(request) => request.encode(),
            Self::Data { block, payload } => encode_data(*block, payload),
            Self::Ack { block } => encode_ack(*block),
            Self::Error { code, message } => encode_error(*code, message),
        }
    }

    pub fn opcode(&self) -> TftpOpcode {
        match self {
            Self::ReadRequest(_) => TftpOpcode::ReadRequest,
            Self::WriteRequest(_) => TftpOpcode::WriteRequest,
            Self::Data { .. } => TftpOpcode::Data,
            Self::Ack { .. } => TftpOpcode::Acknowledgment,
            Self::Error { .. } => TftpOpcode::Error,
        }
    }
}

/// Split a buffer at its first NUL byte
///
/// Returns the bytes before the NUL and the remainder starting at the NUL.
pub fn split_at_null(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    buf.iter().position(|&b| b == 0).map(|pos| buf.split_at(pos))
}

/// Decode the opcode of a packet
///
/// Returns the opcode and everything after it.
pub fn decode_header(buf: &[u8]) -> Result<(TftpOpcode, &[u8]), ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::TooShort);
    }

    let value = u16::from_be_bytes([buf[0], buf[1]]);
    let opcode = TftpOpcode::from_u16(value).ok_or(ProtocolError::UnknownOpcode(value))?;
    Ok((opcode, &buf[2..]))
}

/// Parse a TFTP Read or Write Request packet
pub fn decode_request(buf: &[u8]) -> Result<Request, ProtocolError> {
    let (opcode, rest) = decode_header(buf)?;
    if !matches!(opcode, TftpOpcode::ReadRequest | TftpOpcode::WriteRequest) {
        return Err(ProtocolError::NotARequest(opcode));
    }

    let (filename, rest) = split_at_null(rest).ok_or(ProtocolError::Unterminated("filename"))?;
    let (mode, _) = split_at_null(&rest[1..]).ok_or(ProtocolError::Unterminated("mode"))?;

    let filename = std::str::from_utf8(filename).map_err(|_| ProtocolError::InvalidUtf8("filename"))?;
    let mode = std::str::from_utf8(mode).map_err(|_| ProtocolError::InvalidUtf8("mode"))?;

    Ok(Request {
        opcode,
        filename: filename.to_string(),
        mode: mode.to_string(),
    })
}

/// Parse the body of a TFTP Error packet (everything after the opcode)
pub fn decode_error(buf: &[u8]) -> Result<(u16, String), ProtocolError> {
    if buf.len() < 2 {
        return Err(ProtocolError::TooShort);
    }

    let code = u16::from_be_bytes([buf[0], buf[1]]);
    let (message, _) = split_at_null(&buf[2..]).ok_or(ProtocolError::Unterminated("error message"))?;
    Ok((code, String::from_utf8_lossy(message).into_owned()))
}

/// Build a TFTP Data packet
///
/// The payload length is not checked; callers keep it at or below [`BLOCK_SIZE`].
pub fn encode_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + data.len());
    v.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v.extend_from_slice(data);
    v
}

/// Build a TFTP ACK packet
pub fn encode_ack(block: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(4);
    v.extend_from_slice(&TftpOpcode::Acknowledgment.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v
}

/// Build a TFTP Error packet
pub fn encode_error(code: u16, msg: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + msg.len() + 1);
    v.extend_from_slice(&TftpOpcode::Error.as_u16().to_be_bytes());
    v.extend_from_slice(&code.to_be_bytes());
    v.extend_from_slice(msg.as_bytes());
    v.push(0);
    v
}
