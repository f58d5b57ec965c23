//! Shared wallet-facing model types.

use serde::{Deserialize, Serialize};
use wallet_btc::Txid;

/// Direction of a wallet transaction, from this wallet's point of view.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Sent,
    Received,
}

/// Display status of a wallet transaction.
///
/// `Failed` is terminal and only ever set on an explicit broadcast
/// rejection; everything else moves between `Pending` and `Confirmed` as
/// confirmations come and (after a reorg) go.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Confirmations required before a transaction displays as confirmed.
pub const CONFIRMATION_THRESHOLD: u32 = 6;

/// Status from a confirmation count.
pub fn status_for_confirmations(confirmations: u32) -> TxStatus {
    if confirmations >= CONFIRMATION_THRESHOLD {
        TxStatus::Confirmed
    } else {
        TxStatus::Pending
    }
}

/// A fully built list entry for the transaction history UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionModel {
    pub txid: Txid,
    /// Absolute amount moved from this wallet's point of view, in sats.
    pub amount_sats: u64,
    /// Signed net effect on the wallet (`to_owned - from_owned`), in sats.
    pub net_sats: i64,
    pub fee_sats: u64,
    /// `None` while in the mempool.
    pub block_height: Option<u32>,
    /// Block timestamp (unix seconds); `None` while unconfirmed.
    pub timestamp: Option<u32>,
    pub kind: TxKind,
    pub status: TxStatus,
    pub confirmations: u32,
    /// The other side of the transfer: first foreign output for sends,
    /// first owned output for receives.
    pub counterparty: Option<String>,
}

impl TransactionModel {
    /// Opaque pagination cursor: `"{height_or_0}|{txid}"`.
    pub fn cursor(&self) -> String {
        format!("{}|{}", self.block_height.unwrap_or(0), self.txid)
    }
}
