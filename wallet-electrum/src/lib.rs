//! Electrum protocol client.
//!
//! One background task owns the TCP/TLS connection and speaks the Electrum
//! 1.4 line-delimited JSON-RPC protocol: requests carry monotonically
//! increasing integer ids correlated through a pending map, notifications
//! (header and scripthash subscriptions) fan out through broadcast buses.
//! Dropped connections reconnect after a fixed delay and re-establish every
//! subscription.

pub mod client;
pub mod scripthash;
pub mod types;
pub mod wire;

pub use client::{
    confirmations, ClientEvents, ElectrumClient, Error, ServerConfig,
    RECONNECT_DELAY, REQUEST_TIMEOUT,
};
pub use types::{
    AddressStatus, Balance, BalanceUpdate, ConnectionState, HeaderInfo,
    HistoryItem, MerkleInfo, TxUpdate, UnspentItem,
};
