//! Small `tokio` building blocks used across the wallet crates: a broadcast
//! event bus, an edge-triggered notify channel, an at-most-once shutdown
//! signal, and named task handles.

pub mod bus;
pub mod notify;
pub mod shutdown;
pub mod task;

/// Default buffer size for broadcast channels.
pub const DEFAULT_CHANNEL_SIZE: usize = 256;
