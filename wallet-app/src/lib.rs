//! The wallet core.
//!
//! Everything above the Bitcoin primitives (`wallet-btc`) and the Electrum
//! client (`wallet-electrum`): persistent repositories, the secret store
//! with password-encrypted backup, the reorg-aware transactions index and
//! its pools, the settings store, and the [`App`] facade the UI talks to.

pub mod account;
pub mod app;
pub mod backup;
pub mod db;
pub mod ffs;
pub mod logger;
pub mod models;
pub mod pool;
pub mod secret_store;
pub mod settings;
pub mod tx_index;
pub mod wallet_store;

pub use app::{App, AppConfig};
pub use models::{TransactionModel, TxKind, TxStatus};
