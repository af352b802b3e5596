//! Synchronous transport for talking to a remote DBGp engine: session
//! lifecycle (listen/accept/close), command transmission and reply decoding.
pub mod bindings;
mod errors;
pub mod responses;
mod session;
pub mod types;

/// The port Xdebug-style engines connect back on unless configured otherwise.
pub const DEFAULT_DBGP_PORT: u16 = 9000;

pub use errors::TransportError;
pub use session::{ListenOutcome, ProtocolSession, SessionController, TransactionAllocator};
