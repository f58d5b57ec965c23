//! Bitcoin primitives for the wallet core.
//!
//! Everything in here is pure and deterministic: hashing and address codecs,
//! BIP39 mnemonics, BIP32/BIP84 hierarchical key derivation, the transaction
//! model with its raw decoder, and the P2WPKH spend builder/signer (BIP143).
//! Networking and persistence live in the other workspace crates.

pub mod address;
pub mod base58;
pub mod bip32;
pub mod builder;
pub mod hashes;
pub mod keys;
pub mod mnemonic;
pub mod network;
pub mod segwit;
pub mod sighash;
pub mod tx;

pub use network::Network;
pub use tx::Txid;

// Re-exported so dependents name the exact same key types.
pub use secp256k1;

/// Outputs below this value are uneconomical to spend and rejected by
/// standardness rules.
pub const DUST_LIMIT_SATS: u64 = 546;
