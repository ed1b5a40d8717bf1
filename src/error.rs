//! Error types for the 5250 client core
//!
//! Stream failures, protocol failures and configuration failures each get
//! their own enum; `TN5250Error` wraps them so the session loop can use `?`
//! across layers. Protocol negative responses are modelled here too even
//! though the engine normally reports them to the host itself.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Top-level error type for 5250 client operations
#[derive(Debug)]
pub enum TN5250Error {
    /// Socket, TLS and connection lifecycle errors
    Network(NetworkError),
    /// Telnet framing and trace-file errors
    Telnet(TelnetError),
    /// 5250 data stream errors
    Protocol(ProtocolError),
    /// Display buffer management errors
    Buffer(BufferError),
    /// Configuration errors
    Config(ConfigError),
}

/// Network connection related errors
#[derive(Debug)]
pub enum NetworkError {
    /// The peer closed the connection (distinct from "no data yet")
    Disconnected,
    /// An operation needed a connection that was never established
    NotConnected,
    /// Host string could not be parsed
    InvalidAddress { address: String },
    /// Name resolution returned nothing usable
    DnsResolution { host: String },
    /// Hard I/O failure on the socket
    Io { source: io::Error },
    /// TLS setup or handshake failure
    SslError { message: String },
}

/// Telnet layer errors
#[derive(Debug)]
pub enum TelnetError {
    /// A debug trace line could not be decoded
    MalformedTrace { line: usize, content: String },
    /// Sub-negotiation was not terminated before the connection ended
    UnterminatedSubnegotiation { option: u8 },
}

/// 5250 data stream errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The record was rejected with a negative response code
    NegativeResponse { code: u32 },
    /// A WTD order byte that cannot be decoded; the rest of the record is lost
    UnknownOrder { order: u8 },
    /// A record opcode outside the documented set
    UnknownOpcode { opcode: u8 },
    /// The record ended in the middle of a command
    UnexpectedEnd { context: &'static str },
    /// The record is too short to carry a 5250 header
    InvalidHeader { length: usize },
}

/// Display buffer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// No saved display buffer has this handle
    UnknownDisplayBuffer { id: usize },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// A value that cannot be interpreted for its key
    InvalidValue { key: String, value: String },
    /// A required key is absent
    MissingRequired { key: String },
    /// Reading or writing the configuration file failed
    FileError { path: String, error: String },
    /// The configuration file is not valid JSON
    Parse { message: String },
}

impl fmt::Display for TN5250Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TN5250Error::Network(err) => write!(f, "Network error: {err}"),
            TN5250Error::Telnet(err) => write!(f, "Telnet error: {err}"),
            TN5250Error::Protocol(err) => write!(f, "Protocol error: {err}"),
            TN5250Error::Buffer(err) => write!(f, "Buffer error: {err}"),
            TN5250Error::Config(err) => write!(f, "Configuration error: {err}"),
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Disconnected => write!(f, "Disconnected by remote host"),
            NetworkError::NotConnected => write!(f, "Not connected"),
            NetworkError::InvalidAddress { address } =>
                write!(f, "Invalid network address: {address}"),
            NetworkError::DnsResolution { host } =>
                write!(f, "DNS resolution failed for {host}"),
            NetworkError::Io { source } => write!(f, "I/O error: {source}"),
            NetworkError::SslError { message } => write!(f, "SSL/TLS error: {message}"),
        }
    }
}

impl fmt::Display for TelnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelnetError::MalformedTrace { line, content } =>
                write!(f, "Malformed trace line {line}: {content:?}"),
            TelnetError::UnterminatedSubnegotiation { option } =>
                write!(f, "Subnegotiation for option {option} never terminated"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::NegativeResponse { code } =>
                write!(f, "Negative response 0x{code:08X}"),
            ProtocolError::UnknownOrder { order } =>
                write!(f, "Unknown WTD order 0x{order:02X}"),
            ProtocolError::UnknownOpcode { opcode } =>
                write!(f, "Unknown record opcode 0x{opcode:02X}"),
            ProtocolError::UnexpectedEnd { context } =>
                write!(f, "Record ended unexpectedly while reading {context}"),
            ProtocolError::InvalidHeader { length } =>
                write!(f, "Record of {length} bytes is too short for a 5250 header"),
        }
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::UnknownDisplayBuffer { id } =>
                write!(f, "No saved display buffer with id {id}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value } =>
                write!(f, "Invalid value for '{key}': '{value}'"),
            ConfigError::MissingRequired { key } =>
                write!(f, "Missing required configuration key: {key}"),
            ConfigError::FileError { path, error } =>
                write!(f, "Configuration file error '{path}': {error}"),
            ConfigError::Parse { message } =>
                write!(f, "Configuration parse error: {message}"),
        }
    }
}

impl StdError for TN5250Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TN5250Error::Network(err) => Some(err),
            TN5250Error::Telnet(err) => Some(err),
            TN5250Error::Protocol(err) => Some(err),
            TN5250Error::Buffer(err) => Some(err),
            TN5250Error::Config(err) => Some(err),
        }
    }
}

impl StdError for NetworkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            NetworkError::Io { source } => Some(source),
            _ => None,
        }
    }
}

impl StdError for TelnetError {}
impl StdError for ProtocolError {}
impl StdError for BufferError {}
impl StdError for ConfigError {}

impl From<NetworkError> for TN5250Error {
    fn from(err: NetworkError) -> Self {
        TN5250Error::Network(err)
    }
}

impl From<TelnetError> for TN5250Error {
    fn from(err: TelnetError) -> Self {
        TN5250Error::Telnet(err)
    }
}

impl From<ProtocolError> for TN5250Error {
    fn from(err: ProtocolError) -> Self {
        TN5250Error::Protocol(err)
    }
}

impl From<BufferError> for TN5250Error {
    fn from(err: BufferError) -> Self {
        TN5250Error::Buffer(err)
    }
}

impl From<ConfigError> for TN5250Error {
    fn from(err: ConfigError) -> Self {
        TN5250Error::Config(err)
    }
}

impl From<io::Error> for TN5250Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TN5250Error::Network(NetworkError::Disconnected),
            _ => TN5250Error::Network(NetworkError::Io { source: err }),
        }
    }
}

impl From<serde_json::Error> for TN5250Error {
    fn from(err: serde_json::Error) -> Self {
        TN5250Error::Config(ConfigError::Parse { message: err.to_string() })
    }
}

impl TN5250Error {
    /// True when the error means the peer went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TN5250Error::Network(NetworkError::Disconnected))
    }

    /// The negative response code, if this error carries one
    pub fn negative_response(&self) -> Option<u32> {
        match self {
            TN5250Error::Protocol(ProtocolError::NegativeResponse { code }) => Some(*code),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TN5250Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TN5250Error::Protocol(ProtocolError::NegativeResponse { code: 0x1005_0111 });
        assert_eq!(err.to_string(), "Protocol error: Negative response 0x10050111");
        assert_eq!(err.negative_response(), Some(0x1005_0111));
    }

    #[test]
    fn test_io_error_conversion() {
        let closed: TN5250Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(closed.is_disconnect());

        let other: TN5250Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(!other.is_disconnect());
        assert!(other.source().is_some());
    }

    #[test]
    fn test_unknown_order_message() {
        let err: TN5250Error = ProtocolError::UnknownOrder { order: 0x9C }.into();
        assert!(err.to_string().contains("0x9C"));
    }
}
