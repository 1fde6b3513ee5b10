//! Error types for hostlink400 operations
//!
//! This module provides structured error types for the connection pool, the
//! host-server transport, the sign-on security check, and configuration
//! handling, along with conversions from standard IO errors.

use std::fmt;
use std::io;
use std::error::Error as StdError;

/// Top-level error type for hostlink400 operations
#[derive(Debug)]
pub enum HostlinkError {
    /// Connection pool errors
    Pool(PoolError),
    /// Host-server transport errors
    Transport(TransportError),
    /// Sign-on / security check errors
    Auth(AuthError),
    /// Configuration errors
    Config(ConfigError),
}

/// Connection pool related errors
#[derive(Debug)]
pub enum PoolError {
    /// Pool is at its configured ceiling and no connection could be reclaimed
    CapacityExceeded { max: usize },
    /// The pool item is no longer registered with the pool
    UnknownConnection { id: String },
}

/// Host-server transport errors
#[derive(Debug)]
pub enum TransportError {
    /// Connection refused by the host
    ConnectionRefused { host: String, port: u16 },
    /// TCP connect timed out
    ConnectTimeout { host: String, port: u16, timeout_secs: u64 },
    /// The transport has been closed; no further requests are possible
    Closed,
    /// Connection lost during a read or write
    ConnectionLost { reason: String },
    /// A frame arrived whose type is not valid for its exchange
    UnrecognizedFrame { service: u16, code: u16, correlation: u32 },
    /// The next correlation ID is still outstanding on this transport
    CorrelationInUse { correlation: u32 },
    /// Declared frame length is outside protocol bounds
    InvalidFrameLength { length: usize, max: usize },
    /// TLS handshake or certificate errors for secure connections
    Tls { message: String },
}

/// Sign-on security check errors
#[derive(Debug)]
pub enum AuthError {
    /// The host rejected the security check
    Rejected { code: u8 },
    /// User identifier cannot be encoded for the sign-on frame
    InvalidUserId { user: String, reason: String },
    /// Authentication token is missing or malformed
    InvalidToken { reason: String },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file could not be read or written
    FileError { path: String, error: String },
    /// Configuration file contents could not be parsed
    ParseError { path: String, error: String },
    /// Invalid configuration parameter
    InvalidParameter { parameter: String, value: String, reason: String },
}

impl fmt::Display for HostlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostlinkError::Pool(err) => write!(f, "Pool error: {err}"),
            HostlinkError::Transport(err) => write!(f, "Transport error: {err}"),
            HostlinkError::Auth(err) => write!(f, "Authentication error: {err}"),
            HostlinkError::Config(err) => write!(f, "Configuration error: {err}"),
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::CapacityExceeded { max } =>
                write!(f, "Connection pool at capacity ({max}) and no connection could be reclaimed"),
            PoolError::UnknownConnection { id } =>
                write!(f, "Connection {id} is not registered with this pool"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectionRefused { host, port } =>
                write!(f, "Connection refused to {host}:{port}"),
            TransportError::ConnectTimeout { host, port, timeout_secs } =>
                write!(f, "Connection timeout to {host}:{port} after {timeout_secs}s"),
            TransportError::Closed =>
                write!(f, "Transport is closed"),
            TransportError::ConnectionLost { reason } =>
                write!(f, "Connection lost: {reason}"),
            TransportError::UnrecognizedFrame { service, code, correlation } =>
                write!(f, "Unrecognized frame on service 0x{service:04X}: code 0x{code:04X}, correlation {correlation}"),
            TransportError::CorrelationInUse { correlation } =>
                write!(f, "Correlation ID {correlation} is still outstanding"),
            TransportError::InvalidFrameLength { length, max } =>
                write!(f, "Frame length {length} outside protocol bounds (max {max})"),
            TransportError::Tls { message } =>
                write!(f, "TLS error: {message}"),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Rejected { code } =>
                write!(f, "Security check rejected by host: return code 0x{code:02X}"),
            AuthError::InvalidUserId { user, reason } =>
                write!(f, "User ID '{user}' cannot be encoded: {reason}"),
            AuthError::InvalidToken { reason } =>
                write!(f, "Invalid authentication token: {reason}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileError { path, error } =>
                write!(f, "Configuration file error '{path}': {error}"),
            ConfigError::ParseError { path, error } =>
                write!(f, "Configuration parse error '{path}': {error}"),
            ConfigError::InvalidParameter { parameter, value, reason } =>
                write!(f, "Invalid configuration parameter '{parameter}' = '{value}': {reason}"),
        }
    }
}

impl StdError for HostlinkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            HostlinkError::Pool(err) => Some(err),
            HostlinkError::Transport(err) => Some(err),
            HostlinkError::Auth(err) => Some(err),
            HostlinkError::Config(err) => Some(err),
        }
    }
}

impl StdError for PoolError {}
impl StdError for TransportError {}
impl StdError for AuthError {}
impl StdError for ConfigError {}

impl From<PoolError> for HostlinkError {
    fn from(err: PoolError) -> Self {
        HostlinkError::Pool(err)
    }
}

impl From<TransportError> for HostlinkError {
    fn from(err: TransportError) -> Self {
        HostlinkError::Transport(err)
    }
}

impl From<AuthError> for HostlinkError {
    fn from(err: AuthError) -> Self {
        HostlinkError::Auth(err)
    }
}

impl From<ConfigError> for HostlinkError {
    fn from(err: ConfigError) -> Self {
        HostlinkError::Config(err)
    }
}

// Convert from standard IO errors at the transport level
impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost {
                reason: err.to_string(),
            },
            _ => TransportError::ConnectionLost {
                reason: format!("IO error: {err}"),
            },
        }
    }
}

impl From<io::Error> for HostlinkError {
    fn from(err: io::Error) -> Self {
        HostlinkError::Transport(TransportError::from(err))
    }
}

/// Result type alias for hostlink400 operations
pub type HostlinkResult<T> = Result<T, HostlinkError>;

/// Specialized result types for different components
pub type PoolResult<T> = Result<T, PoolError>;
pub type TransportResult<T> = Result<T, TransportError>;
pub type AuthResult<T> = Result<T, AuthError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
