//! Typed results for the Electrum RPC methods this wallet uses, plus the
//! events published by the client.

use serde::Deserialize;
use wallet_btc::Txid;

/// `blockchain.headers.subscribe` result and notification payload.
#[derive(Clone, Debug, Deserialize)]
pub struct HeaderInfo {
    pub height: i64,
    pub hex: String,
}

/// `blockchain.scripthash.get_balance` result, in sats.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// One entry of `blockchain.scripthash.get_history`.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryItem {
    pub tx_hash: Txid,
    /// Electrum sends `0` or `-1` for unconfirmed transactions.
    pub height: i64,
    #[serde(default)]
    pub fee: Option<u64>,
}

impl HistoryItem {
    /// Normalize the wire sentinel: `height <= 0` means mempool/unknown.
    pub fn confirmed_height(&self) -> Option<u32> {
        u32::try_from(self.height).ok().filter(|h| *h > 0)
    }
}

/// One entry of `blockchain.scripthash.listunspent`.
#[derive(Clone, Debug, Deserialize)]
pub struct UnspentItem {
    pub tx_hash: Txid,
    pub tx_pos: u32,
    /// Value in sats.
    pub value: u64,
    pub height: i64,
}

impl UnspentItem {
    pub fn confirmed_height(&self) -> Option<u32> {
        u32::try_from(self.height).ok().filter(|h| *h > 0)
    }
}

/// `blockchain.transaction.get_merkle` result.
#[derive(Clone, Debug, Deserialize)]
pub struct MerkleInfo {
    pub block_height: u32,
    /// Intra-block transaction position.
    pub pos: u32,
    #[serde(default)]
    pub merkle: Vec<String>,
}

/// Connection lifecycle, published on every transition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// Published when a subscribed address's status changes (or is first
/// learned).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressStatus {
    pub address: String,
    pub has_history: bool,
}

/// Published alongside [`AddressStatus`] with the refreshed balance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BalanceUpdate {
    pub address: String,
    pub confirmed_sats: i64,
    pub unconfirmed_sats: i64,
}

/// Published when the client learns a (new) height or confirmation count for
/// a tracked transaction. Last write wins; deliveries are unordered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxUpdate {
    pub txid: Txid,
    pub height: Option<u32>,
    pub confirmations: u32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn history_height_sentinels() {
        let parse = |height: i64| HistoryItem {
            tx_hash: "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16"
                .parse()
                .unwrap(),
            height,
            fee: None,
        };
        assert_eq!(parse(170).confirmed_height(), Some(170));
        assert_eq!(parse(0).confirmed_height(), None);
        assert_eq!(parse(-1).confirmed_height(), None);
    }

    #[test]
    fn deserializes_history_entry() {
        let item: HistoryItem = serde_json::from_str(
            r#"{"tx_hash":"f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16","height":170}"#,
        )
        .unwrap();
        assert_eq!(item.confirmed_height(), Some(170));
        assert_eq!(item.fee, None);
    }
}
