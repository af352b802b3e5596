//! General types shared between [`crate::session`] and [`crate::responses`].

/// Correlates an outbound command with its reply. Allocated per command by
/// the session's [`crate::TransactionAllocator`].
pub type TransactionId = i64;

/// Identifier assigned by the engine when a breakpoint is set. Opaque to us,
/// and not stable across connections.
pub type BreakpointId = String;
