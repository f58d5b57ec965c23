//! Persistent wallet repository: wallets, their addresses, UTXOs, and
//! transaction metadata, one JSON document per wallet through [`Ffs`].
//!
//! Mutations follow persist-then-commit: the updated document is written to
//! storage first and only then swapped into memory, so a failed write never
//! corrupts in-memory state. All mutations serialize on one mutex (logical
//! single writer); reads return snapshots.

use std::{
    collections::BTreeMap,
    fmt, io,
    str::FromStr,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::warn;
use wallet_btc::{Network, Txid};

use crate::{
    account::{AddressDeriver, HistorySource},
    ffs::Ffs,
    models::{TxKind, TxStatus},
};

const WALLET_FILE_SUFFIX: &str = ".wallet.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet not found")]
    WalletNotFound,
    #[error("address not found")]
    AddressNotFound,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Random 128-bit wallet identifier, hex-displayed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WalletId([u8; 16]);

impl WalletId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletId({self})")
    }
}

impl FromStr for WalletId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for WalletId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WalletId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    Mainnet,
    Testnet,
    WatchOnly,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: WalletId,
    pub name: String,
    pub kind: WalletKind,
    pub network: Network,
    /// e.g. `m/84'/0'/0'`.
    pub base_path: String,
    pub created_at: u64,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    pub derivation_index: u32,
    pub is_change: bool,
    pub confirmed_sats: i64,
    pub unconfirmed_sats: i64,
    pub is_used: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub txid: Txid,
    pub vout: u32,
    pub value_sats: u64,
    pub script_pubkey_hex: String,
    pub block_height: Option<u32>,
    pub is_spent: bool,
    pub spent_by: Option<Txid>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxMetadataRecord {
    pub txid: Txid,
    /// Absolute amount moved, in sats.
    pub amount_sats: u64,
    pub fee_sats: u64,
    pub block_height: Option<u32>,
    pub timestamp: Option<u32>,
    pub kind: TxKind,
    pub status: TxStatus,
    pub counterparty: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
struct WalletDocument {
    record: WalletRecord,
    external: Vec<AddressRecord>,
    change: Vec<AddressRecord>,
    utxos: Vec<UtxoRecord>,
    tx_metadata: BTreeMap<Txid, TxMetadataRecord>,
}

pub struct WalletDb<F> {
    ffs: F,
    state: Mutex<BTreeMap<WalletId, WalletDocument>>,
}

impl<F: Ffs> WalletDb<F> {
    /// Load every wallet document from storage. Unrecognized files are
    /// skipped with a warning.
    pub fn read(ffs: F) -> anyhow::Result<Self> {
        let mut wallets = BTreeMap::new();
        let mut buf = Vec::new();

        ffs.read_dir_visitor(|filename| {
            let id = match filename
                .strip_suffix(WALLET_FILE_SUFFIX)
                .and_then(|stem| WalletId::from_str(stem).ok())
            {
                Some(id) => id,
                None => {
                    warn!("skipping unrecognized file in wallet dir: {filename}");
                    return Ok(());
                }
            };

            buf.clear();
            ffs.read_into(filename, &mut buf)?;
            let doc: WalletDocument = serde_json::from_slice(&buf).map_err(|err| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt wallet file {filename}: {err}"),
                )
            })?;

            if doc.record.id != id {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("wallet file {filename} does not match its record id"),
                ));
            }

            wallets.insert(id, doc);
            Ok(())
        })
        .context("failed to read wallet db")?;

        Ok(Self {
            ffs,
            state: Mutex::new(wallets),
        })
    }

    // --- wallet lifecycle --- //

    /// Insert a new wallet with its initial address set.
    pub fn insert_wallet(
        &self,
        record: WalletRecord,
        external: Vec<AddressRecord>,
        change: Vec<AddressRecord>,
    ) -> Result<(), StoreError> {
        let doc = WalletDocument {
            record,
            external,
            change,
            utxos: Vec::new(),
            tx_metadata: BTreeMap::new(),
        };
        let mut state = self.state.lock().unwrap();
        self.write_doc(&doc)?;
        state.insert(doc.record.id, doc);
        Ok(())
    }

    pub fn list_wallets(&self) -> Vec<WalletRecord> {
        self.state
            .lock()
            .unwrap()
            .values()
            .map(|doc| doc.record.clone())
            .collect()
    }

    pub fn wallet(&self, id: WalletId) -> Result<WalletRecord, StoreError> {
        self.state
            .lock()
            .unwrap()
            .get(&id)
            .map(|doc| doc.record.clone())
            .ok_or(StoreError::WalletNotFound)
    }

    pub fn active_wallet(&self) -> Option<WalletRecord> {
        self.state
            .lock()
            .unwrap()
            .values()
            .find(|doc| doc.record.active)
            .map(|doc| doc.record.clone())
    }

    /// Mark `id` active and every other wallet inactive.
    pub fn set_active(&self, id: WalletId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.contains_key(&id) {
            return Err(StoreError::WalletNotFound);
        }

        let ids: Vec<WalletId> = state.keys().copied().collect();
        for wallet_id in ids {
            let doc = state.get(&wallet_id).expect("listed above");
            let want_active = wallet_id == id;
            if doc.record.active != want_active {
                let mut updated = doc.clone();
                updated.record.active = want_active;
                self.write_doc(&updated)?;
                state.insert(wallet_id, updated);
            }
        }
        Ok(())
    }

    /// Remove the wallet and its on-disk document, returning the record so
    /// the caller can clean up its secrets.
    pub fn delete_wallet(&self, id: WalletId) -> Result<WalletRecord, StoreError> {
        let mut state = self.state.lock().unwrap();
        let doc = state.remove(&id).ok_or(StoreError::WalletNotFound)?;
        match self.ffs.delete(&wallet_filename(id)) {
            Ok(()) => (),
            Err(err) if err.kind() == io::ErrorKind::NotFound => (),
            Err(err) => return Err(err.into()),
        }
        Ok(doc.record)
    }

    // --- addresses --- //

    /// Addresses of one branch (or both), sorted by derivation index.
    pub fn addresses(
        &self,
        id: WalletId,
        is_change: Option<bool>,
    ) -> Result<Vec<AddressRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        let doc = state.get(&id).ok_or(StoreError::WalletNotFound)?;
        let mut addresses: Vec<AddressRecord> = match is_change {
            Some(false) => doc.external.clone(),
            Some(true) => doc.change.clone(),
            None => doc
                .external
                .iter()
                .chain(doc.change.iter())
                .cloned()
                .collect(),
        };
        addresses.sort_by_key(|a| (a.is_change, a.derivation_index));
        Ok(addresses)
    }

    pub fn update_address_balance(
        &self,
        id: WalletId,
        address: &str,
        confirmed_sats: i64,
        unconfirmed_sats: i64,
    ) -> Result<(), StoreError> {
        self.mutate(id, |doc| {
            let record = doc
                .address_mut(address)
                .ok_or(StoreError::AddressNotFound)?;
            record.confirmed_sats = confirmed_sats;
            record.unconfirmed_sats = unconfirmed_sats;
            Ok(())
        })
    }

    pub fn mark_address_used(&self, id: WalletId, address: &str) -> Result<(), StoreError> {
        self.mutate(id, |doc| {
            let record = doc
                .address_mut(address)
                .ok_or(StoreError::AddressNotFound)?;
            record.is_used = true;
            Ok(())
        })
    }

    /// Expand the external branch until `gap` consecutive addresses have no
    /// history. Returns the next underived index.
    ///
    /// A failed history lookup aborts the whole scan before anything is
    /// persisted, so the stored index never drifts past what was verified.
    pub async fn ensure_gap_limit(
        &self,
        id: WalletId,
        gap: u32,
        deriver: &impl AddressDeriver,
        history: &impl HistorySource,
    ) -> anyhow::Result<u32> {
        let (mut next_index, mut empty_run) = {
            let state = self.state.lock().unwrap();
            let doc = state.get(&id).ok_or(StoreError::WalletNotFound)?;
            let next = doc.external.len() as u32;
            let trailing_unused = doc
                .external
                .iter()
                .rev()
                .take_while(|a| !a.is_used)
                .count() as u32;
            (next, trailing_unused.min(gap))
        };

        let mut discovered = Vec::new();
        while empty_run < gap {
            let address = deriver.derive_address(false, next_index)?;
            let used = history
                .has_history(&address)
                .await
                .context("gap-limit scan aborted; keeping the persisted index")?;
            empty_run = if used { 0 } else { empty_run + 1 };
            discovered.push(AddressRecord {
                address,
                derivation_index: next_index,
                is_change: false,
                confirmed_sats: 0,
                unconfirmed_sats: 0,
                is_used: used,
            });
            next_index += 1;
        }

        if !discovered.is_empty() {
            self.mutate(id, move |doc| {
                doc.external.extend(discovered);
                Ok(())
            })?;
        }
        Ok(next_index)
    }

    /// The first external address with no history, after a gap-limit scan.
    /// Derives a fresh one if every known address is used.
    pub async fn next_receive_address(
        &self,
        id: WalletId,
        gap: u32,
        deriver: &impl AddressDeriver,
        history: &impl HistorySource,
    ) -> anyhow::Result<String> {
        self.ensure_gap_limit(id, gap, deriver, history).await?;

        let externals = self.addresses(id, Some(false))?;
        for record in &externals {
            if record.is_used {
                continue;
            }
            if history.has_history(&record.address).await? {
                self.mark_address_used(id, &record.address)?;
                continue;
            }
            return Ok(record.address.clone());
        }

        let index = externals.len() as u32;
        let address = deriver.derive_address(false, index)?;
        let record = AddressRecord {
            address: address.clone(),
            derivation_index: index,
            is_change: false,
            confirmed_sats: 0,
            unconfirmed_sats: 0,
            is_used: false,
        };
        self.mutate(id, move |doc| {
            doc.external.push(record);
            Ok(())
        })?;
        Ok(address)
    }

    /// Ensure change-0 exists and return it.
    pub fn change_address(
        &self,
        id: WalletId,
        deriver: &impl AddressDeriver,
    ) -> anyhow::Result<String> {
        {
            let state = self.state.lock().unwrap();
            let doc = state.get(&id).ok_or(StoreError::WalletNotFound)?;
            if let Some(first) = doc.change.first() {
                return Ok(first.address.clone());
            }
        }

        let address = deriver.derive_address(true, 0)?;
        let record = AddressRecord {
            address: address.clone(),
            derivation_index: 0,
            is_change: true,
            confirmed_sats: 0,
            unconfirmed_sats: 0,
            is_used: false,
        };
        self.mutate(id, move |doc| {
            // Lost the race with another caller: keep the existing one.
            if doc.change.is_empty() {
                doc.change.push(record);
            }
            Ok(())
        })?;

        let state = self.state.lock().unwrap();
        let doc = state.get(&id).ok_or(StoreError::WalletNotFound)?;
        Ok(doc.change[0].address.clone())
    }

    // --- UTXOs --- //

    /// Merge observed UTXOs by `(txid, vout)`. A UTXO already marked spent
    /// stays spent.
    pub fn upsert_utxos(
        &self,
        id: WalletId,
        utxos: Vec<UtxoRecord>,
    ) -> Result<(), StoreError> {
        self.mutate(id, move |doc| {
            for incoming in utxos {
                match doc
                    .utxos
                    .iter_mut()
                    .find(|u| u.txid == incoming.txid && u.vout == incoming.vout)
                {
                    Some(existing) => {
                        let was_spent = existing.is_spent;
                        let spent_by = existing.spent_by;
                        *existing = incoming;
                        if was_spent {
                            existing.is_spent = true;
                            existing.spent_by = spent_by;
                        }
                    }
                    None => doc.utxos.push(incoming),
                }
            }
            Ok(())
        })
    }

    pub fn utxos(&self, id: WalletId) -> Result<Vec<UtxoRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        let doc = state.get(&id).ok_or(StoreError::WalletNotFound)?;
        Ok(doc.utxos.clone())
    }

    pub fn mark_utxo_spent(
        &self,
        id: WalletId,
        txid: Txid,
        vout: u32,
        spent_by: Txid,
    ) -> Result<(), StoreError> {
        self.mutate(id, move |doc| {
            for utxo in &mut doc.utxos {
                if utxo.txid == txid && utxo.vout == vout {
                    utxo.is_spent = true;
                    utxo.spent_by = Some(spent_by);
                }
            }
            Ok(())
        })
    }

    /// Drop UTXOs that are spent and buried at least six blocks deep.
    pub fn prune_spent_utxos(&self, id: WalletId, tip: u32) -> Result<(), StoreError> {
        self.mutate(id, move |doc| {
            doc.utxos.retain(|utxo| {
                let deep = matches!(
                    utxo.block_height,
                    Some(height) if height <= tip && tip - height + 1 >= 6
                );
                !(utxo.is_spent && deep)
            });
            Ok(())
        })
    }

    // --- transaction metadata --- //

    pub fn upsert_tx_metadata(
        &self,
        id: WalletId,
        meta: TxMetadataRecord,
    ) -> Result<(), StoreError> {
        self.mutate(id, move |doc| {
            doc.tx_metadata.insert(meta.txid, meta);
            Ok(())
        })
    }

    pub fn tx_metadata(&self, id: WalletId) -> Result<Vec<TxMetadataRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        let doc = state.get(&id).ok_or(StoreError::WalletNotFound)?;
        Ok(doc.tx_metadata.values().cloned().collect())
    }

    // --- internals --- //

    fn mutate<T>(
        &self,
        id: WalletId,
        mutation: impl FnOnce(&mut WalletDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().unwrap();
        let doc = state.get(&id).ok_or(StoreError::WalletNotFound)?;

        let mut updated = doc.clone();
        let out = mutation(&mut updated)?;

        self.write_doc(&updated)?;
        state.insert(id, updated);
        Ok(out)
    }

    fn write_doc(&self, doc: &WalletDocument) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .expect("wallet document serialization is infallible");
        self.ffs.write(&wallet_filename(doc.record.id), &bytes)
    }
}

fn wallet_filename(id: WalletId) -> String {
    format!("{id}{WALLET_FILE_SUFFIX}")
}

/// Unix time in seconds, for `created_at` stamps.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the initial record for a fresh wallet.
pub fn new_wallet_record(name: &str, kind: WalletKind, network: Network) -> WalletRecord {
    WalletRecord {
        id: WalletId::generate(),
        name: name.to_owned(),
        kind,
        network,
        base_path: network.bip84_base_path(),
        created_at: unix_now(),
        active: false,
    }
}

impl WalletDocument {
    fn address_mut(&mut self, address: &str) -> Option<&mut AddressRecord> {
        self.external
            .iter_mut()
            .chain(self.change.iter_mut())
            .find(|a| a.address == address)
    }
}
