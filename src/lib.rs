/// Error types shared across the crate
pub mod error;

/// Host datastream frame encoding and the correlation header
pub mod frame;

/// IBM i host server identifiers and well-known ports
pub mod service;

/// EBCDIC code page 037 conversion for sign-on fields
pub mod ebcdic;

/// SECCHK: sign-on security check frame construction
pub mod auth;

/// Correlation-multiplexed transport over one service socket
pub mod transport;

/// Logical sessions and service connection establishment
pub mod session;

/// Pooled connection bookkeeping
pub mod pool_item;

/// Connection pool with reuse, expiration, and eviction
pub mod pool;

/// Pool limits and socket options with JSON persistence
pub mod config;

// Re-export the types most callers need
pub use auth::{AuthScheme, SecurityCheck};
pub use config::{ConnectOptions, PoolConfig, PoolLimits};
pub use error::{HostlinkError, HostlinkResult};
pub use frame::Frame;
pub use pool::{ConnectionPool, PoolEvent, PoolEventKind, PoolListener, PoolStats};
pub use pool_item::{ExpirationReason, PoolItem};
pub use service::HostService;
pub use session::{Credential, HostConnection, HostConnectionFactory, HostSession, SessionFactory};
pub use transport::{HostTransport, Transport};
