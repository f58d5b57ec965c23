//! The transactions index: a reorg-aware, cursor-paginated, incrementally
//! updated view of the wallet's on-chain history.
//!
//! The index owns the wallet's txid set (merged from every owned address's
//! Electrum history), a total order over it, and the caches that make
//! pagination cheap: intra-block positions, header timestamps, and an LRU of
//! decoded transactions. Everything lives under one mutex with short
//! lookup/insert critical sections; network I/O always happens outside it.
//!
//! Persistence is best-effort: the index and caches are mirrored to
//! per-network JSON files so a restart starts warm, and write failures are
//! logged and swallowed (memory stays the source of truth for the session).

use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BTreeMap, HashMap},
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wallet_btc::{address, tx::Transaction, Network, Txid};
use wallet_electrum::{ClientEvents, ElectrumClient, HistoryItem};
use wallet_tokio::{bus::Bus, shutdown::ShutdownSignal, task::NamedTask};

use crate::{
    ffs::Ffs,
    models::{status_for_confirmations, TransactionModel, TxKind},
    wallet_store::TxMetadataRecord,
};

/// Fan-out cap for history, decode, and position fetches.
const MAX_CONCURRENCY: usize = 6;
/// Decode cache capacity.
const DECODE_CACHE_SIZE: usize = 512;
/// Position lookups retry 3 times with exponential backoff from 200ms.
const POSITION_ATTEMPTS: u32 = 3;
const POSITION_BACKOFF_INITIAL: Duration = Duration::from_millis(200);

/// All-zero previous txid marking a coinbase input.
fn coinbase_prev() -> Txid {
    Txid::from_display_bytes([0u8; 32])
}

/// The slice of the Electrum API the index consumes, cut small so tests can
/// run against a canned implementation.
#[async_trait]
pub trait TxSource: Send + Sync + 'static {
    async fn history(&self, address: &str) -> anyhow::Result<Vec<HistoryItem>>;
    async fn transaction(&self, txid: Txid) -> anyhow::Result<Transaction>;
    async fn transaction_position(&self, txid: Txid, height: u32) -> anyhow::Result<u32>;
    async fn header_timestamp(&self, height: u32) -> anyhow::Result<u32>;
}

#[async_trait]
impl TxSource for ElectrumClient {
    async fn history(&self, address: &str) -> anyhow::Result<Vec<HistoryItem>> {
        Ok(self.get_history(address).await?)
    }

    async fn transaction(&self, txid: Txid) -> anyhow::Result<Transaction> {
        Ok(self.get_transaction(txid).await?)
    }

    async fn transaction_position(&self, txid: Txid, height: u32) -> anyhow::Result<u32> {
        Ok(self.get_transaction_position(txid, height).await?)
    }

    async fn header_timestamp(&self, height: u32) -> anyhow::Result<u32> {
        Ok(self.block_header_timestamp(height).await?)
    }
}

#[async_trait]
impl<T: TxSource> TxSource for Arc<T> {
    async fn history(&self, address: &str) -> anyhow::Result<Vec<HistoryItem>> {
        (**self).history(address).await
    }

    async fn transaction(&self, txid: Txid) -> anyhow::Result<Transaction> {
        (**self).transaction(txid).await
    }

    async fn transaction_position(&self, txid: Txid, height: u32) -> anyhow::Result<u32> {
        (**self).transaction_position(txid, height).await
    }

    async fn header_timestamp(&self, height: u32) -> anyhow::Result<u32> {
        (**self).header_timestamp(height).await
    }
}

/// The wallet facts the index needs: which addresses are ours, and where to
/// drop freshly built metadata. Metadata recording is best-effort by
/// contract; implementations log failures instead of surfacing them.
pub trait WalletView: Send + Sync {
    fn owned_addresses(&self) -> Vec<String>;
    fn record_metadata(&self, meta: TxMetadataRecord);
}

/// Events published by the index.
pub struct IndexEvents {
    /// Partial batches of freshly built models, for progressive rendering.
    /// An empty batch means "the index changed, request a new page".
    pub items_updated: Bus<Vec<TransactionModel>>,
    /// New chain tip; confirmation labels need recomputing.
    pub last_block_updated: Bus<u32>,
    pub invalidated: Bus<()>,
}

struct IndexState {
    /// txid -> height; `None` = mempool/unknown.
    height_map: HashMap<Txid, Option<u32>>,
    /// All known txids under the total order: mempool first, then height
    /// descending, txid ascending within a height (until positions refine).
    sorted: Vec<Txid>,
    pos_cache: HashMap<(u32, Txid), u32>,
    header_ts: BTreeMap<u32, u32>,
    tip_height: Option<u32>,
    invalidated: bool,
    generation: u64,
}

struct IndexInner<S, F> {
    source: S,
    ffs: F,
    network: Network,
    wallet: Arc<dyn WalletView>,
    state: Mutex<IndexState>,
    decode_cache: Mutex<LruCache<Txid, Arc<Transaction>>>,
    events: IndexEvents,
}

pub struct TxIndex<S, F> {
    inner: Arc<IndexInner<S, F>>,
}

impl<S, F> Clone for TxIndex<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, F> TxIndex<S, F>
where
    S: TxSource,
    F: Ffs + Send + Sync + 'static,
{
    /// Create the index, warm-starting from the persisted per-network files
    /// when present.
    pub fn new(source: S, ffs: F, network: Network, wallet: Arc<dyn WalletView>) -> Self {
        let state = load_state(&ffs, network);
        Self {
            inner: Arc::new(IndexInner {
                source,
                ffs,
                network,
                wallet,
                state: Mutex::new(state),
                decode_cache: Mutex::new(LruCache::new(
                    NonZeroUsize::new(DECODE_CACHE_SIZE).expect("nonzero"),
                )),
                events: IndexEvents {
                    items_updated: Bus::new(),
                    last_block_updated: Bus::new(),
                    invalidated: Bus::new(),
                },
            }),
        }
    }

    pub fn events(&self) -> &IndexEvents {
        &self.inner.events
    }

    /// Mark the index stale; the next `page`/`ensure_index` rebuilds it.
    pub fn invalidate(&self) {
        self.inner.state.lock().unwrap().invalidated = true;
        self.inner.events.invalidated.publish(());
    }

    pub fn set_tip(&self, height: u32) {
        self.inner.state.lock().unwrap().tip_height = Some(height);
    }

    pub fn tip(&self) -> Option<u32> {
        self.inner.state.lock().unwrap().tip_height
    }

    /// Number of indexed txids (test/diagnostic aid).
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the in-memory index if it has been invalidated.
    ///
    /// Address histories are fetched in chunks of [`MAX_CONCURRENCY`]. As
    /// soon as the first chunk lands and covers `min_count` entries, the
    /// remaining chunks continue in a detached background task; a newer
    /// rebuild generation abandons the stale task's writes.
    pub async fn ensure_index(&self, min_count: usize) -> anyhow::Result<()> {
        {
            let state = self.inner.state.lock().unwrap();
            if !state.invalidated && !state.height_map.is_empty() {
                return Ok(());
            }
        }

        let addresses = self.inner.wallet.owned_addresses();
        let generation = {
            let mut state = self.inner.state.lock().unwrap();
            state.generation += 1;
            state.invalidated = false;
            state.height_map.clear();
            state.sorted.clear();
            state.generation
        };

        let mut chunks = addresses
            .chunks(MAX_CONCURRENCY)
            .map(<[String]>::to_vec)
            .collect::<Vec<_>>()
            .into_iter();

        if let Some(first) = chunks.next() {
            if let Err(err) = self.fetch_history_batch(&first, generation).await {
                self.inner.state.lock().unwrap().invalidated = true;
                return Err(err);
            }
        }
        self.persist_index();

        let remaining: Vec<Vec<String>> = chunks.collect();
        if remaining.is_empty() {
            return Ok(());
        }

        let enough = self.inner.state.lock().unwrap().sorted.len() >= min_count;
        if enough {
            let index = self.clone();
            NamedTask::spawn("tx-index-rebuild", async move {
                index.finish_rebuild(remaining, generation).await;
            })
            .detach();
            return Ok(());
        }

        for chunk in remaining {
            if let Err(err) = self.fetch_history_batch(&chunk, generation).await {
                self.inner.state.lock().unwrap().invalidated = true;
                return Err(err);
            }
            self.persist_index();
        }
        Ok(())
    }

    async fn finish_rebuild(&self, chunks: Vec<Vec<String>>, generation: u64) {
        for chunk in chunks {
            if self.inner.state.lock().unwrap().generation != generation {
                debug!("abandoning stale index rebuild");
                return;
            }
            if let Err(err) = self.fetch_history_batch(&chunk, generation).await {
                warn!("background index rebuild failed: {err:#}");
                self.inner.state.lock().unwrap().invalidated = true;
                return;
            }
            self.persist_index();
        }
    }

    async fn fetch_history_batch(
        &self,
        addresses: &[String],
        generation: u64,
    ) -> anyhow::Result<()> {
        let results = join_all(
            addresses
                .iter()
                .map(|address| self.inner.source.history(address)),
        )
        .await;

        let mut merged: Vec<(Txid, Option<u32>)> = Vec::new();
        for (address, result) in addresses.iter().zip(results) {
            let items =
                result.with_context(|| format!("history fetch failed for {address}"))?;
            for item in items {
                merged.push((item.tx_hash, item.confirmed_height()));
            }
        }

        let mut state = self.inner.state.lock().unwrap();
        if state.generation != generation {
            // A newer rebuild owns the maps now; drop this batch.
            return Ok(());
        }
        for (txid, height) in merged {
            let entry = state.height_map.entry(txid).or_insert(None);
            // A known height beats mempool/unknown.
            if height.is_some() {
                *entry = height;
            }
        }
        resort(&mut state);
        Ok(())
    }

    /// One page of history, starting strictly after `cursor` (or from the
    /// top), refined to intra-block order, models built with bounded
    /// concurrency and streamed through `items_updated` chunk by chunk.
    pub async fn page(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<TransactionModel>> {
        self.ensure_index(limit).await?;

        let ids: Vec<Txid> = {
            let state = self.inner.state.lock().unwrap();
            let start = match cursor {
                None => 0,
                Some(cursor) => {
                    let (height, txid) = parse_cursor(cursor)?;
                    // First position strictly after the cursor under the
                    // total order. A cursor whose txid reorged away degrades
                    // gracefully to "everything after its old slot".
                    state.sorted.partition_point(|id| {
                        let id_height = state.height_map.get(id).copied().flatten();
                        cmp_key(id_height, *id, height, txid) != CmpOrdering::Greater
                    })
                }
            };
            state.sorted.iter().skip(start).take(limit).copied().collect()
        };

        let refined = self.refine_order_with_positions(&ids).await;

        let mut page = Vec::with_capacity(refined.len());
        for chunk in refined.chunks(MAX_CONCURRENCY) {
            let results = join_all(chunk.iter().map(|txid| self.build_model(*txid))).await;
            let mut batch = Vec::with_capacity(chunk.len());
            for (txid, result) in chunk.iter().zip(results) {
                match result {
                    Ok(model) => batch.push(model),
                    Err(err) => warn!("failed to build model for {txid}: {err:#}"),
                }
            }
            if !batch.is_empty() {
                self.inner.events.items_updated.publish(batch.clone());
                page.extend(batch);
            }
        }

        // Stabilizer: date descending, mempool (dateless) first. The sort is
        // stable, so refined intra-block order survives equal timestamps.
        page.sort_by(|a, b| match (a.timestamp, b.timestamp) {
            (None, None) => CmpOrdering::Equal,
            (None, Some(_)) => CmpOrdering::Less,
            (Some(_), None) => CmpOrdering::Greater,
            (Some(x), Some(y)) => y.cmp(&x),
        });
        Ok(page)
    }

    /// Refine page order with intra-block positions.
    ///
    /// Mempool ids keep their input order at the front. Confirmed ids group
    /// by height in first-seen order (deduped through a map, so the cost is
    /// linear in `|ids|`); each group sorts by `(position, txid)` after
    /// fetching missing positions in bounded chunks with retry/backoff. Ids
    /// whose position stays unknown after retries keep the txid tiebreak
    /// rather than getting a made-up position.
    pub async fn refine_order_with_positions(&self, ids: &[Txid]) -> Vec<Txid> {
        let mut mempool: Vec<Txid> = Vec::new();
        let mut groups: Vec<(u32, Vec<Txid>)> = Vec::new();
        let mut group_by_height: HashMap<u32, usize> = HashMap::new();
        {
            let state = self.inner.state.lock().unwrap();
            for txid in ids {
                match state.height_map.get(txid).copied().flatten() {
                    None => mempool.push(*txid),
                    Some(height) => {
                        let slot = *group_by_height.entry(height).or_insert_with(|| {
                            groups.push((height, Vec::new()));
                            groups.len() - 1
                        });
                        groups[slot].1.push(*txid);
                    }
                }
            }
        }

        let mut learned_any = false;
        let mut out = mempool;
        for (height, mut group) in groups {
            let missing: Vec<Txid> = {
                let state = self.inner.state.lock().unwrap();
                group
                    .iter()
                    .filter(|txid| !state.pos_cache.contains_key(&(height, **txid)))
                    .copied()
                    .collect()
            };

            for chunk in missing.chunks(MAX_CONCURRENCY) {
                let fetched = self.fetch_positions(height, chunk).await;
                let mut state = self.inner.state.lock().unwrap();
                for (txid, pos) in fetched {
                    if let Some(pos) = pos {
                        state.pos_cache.insert((height, txid), pos);
                        learned_any = true;
                    }
                }
            }

            {
                let state = self.inner.state.lock().unwrap();
                group.sort_by_key(|txid| {
                    (
                        state
                            .pos_cache
                            .get(&(height, *txid))
                            .copied()
                            .unwrap_or(u32::MAX),
                        *txid,
                    )
                });
            }
            out.extend(group);
        }

        if learned_any {
            self.persist_caches();
        }
        out
    }

    async fn fetch_positions(
        &self,
        height: u32,
        txids: &[Txid],
    ) -> Vec<(Txid, Option<u32>)> {
        join_all(txids.iter().map(|txid| async move {
            let mut delay = POSITION_BACKOFF_INITIAL;
            for attempt in 1..=POSITION_ATTEMPTS {
                match self
                    .inner
                    .source
                    .transaction_position(*txid, height)
                    .await
                {
                    Ok(pos) => return (*txid, Some(pos)),
                    Err(err) if attempt < POSITION_ATTEMPTS => {
                        debug!("position fetch for {txid} failed (attempt {attempt}): {err:#}");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                    Err(err) => {
                        warn!("no position for {txid} at {height} after retries: {err:#}");
                    }
                }
            }
            (*txid, None)
        }))
        .await
    }

    /// Build the display model for one txid: decode it and every input's
    /// parent, attribute values to owned addresses, date it from the header
    /// cache, and upsert the result into the wallet's metadata.
    pub async fn build_model(&self, txid: Txid) -> anyhow::Result<TransactionModel> {
        let owned_list = self.inner.wallet.owned_addresses();
        let network = self.inner.network;
        let tx = self.decoded(txid).await?;

        let (known_height, tip) = {
            let state = self.inner.state.lock().unwrap();
            (
                state.height_map.get(&txid).copied().flatten(),
                state.tip_height,
            )
        };

        let mut in_total: u64 = 0;
        let mut from_owned: u64 = 0;
        let mut coinbase = false;
        for input in &tx.inputs {
            if input.prev_txid == coinbase_prev() {
                coinbase = true;
                continue;
            }
            let parent = self
                .decoded(input.prev_txid)
                .await
                .with_context(|| format!("failed to price input of {txid}"))?;
            let prev_out = parent
                .outputs
                .get(input.vout as usize)
                .context("input references a missing parent output")?;
            in_total += prev_out.value;
            if let Some(addr) =
                address::address_from_script(&prev_out.script_pubkey, network)
            {
                if owned_list.iter().any(|owned| *owned == addr) {
                    from_owned += prev_out.value;
                }
            }
        }

        let out_total = tx.total_out();
        let mut to_owned: u64 = 0;
        let mut first_owned_output: Option<String> = None;
        let mut first_foreign_output: Option<String> = None;
        for output in &tx.outputs {
            match address::address_from_script(&output.script_pubkey, network) {
                Some(addr) if owned_list.iter().any(|owned| *owned == addr) => {
                    to_owned += output.value;
                    first_owned_output.get_or_insert(addr);
                }
                Some(addr) => {
                    first_foreign_output.get_or_insert(addr);
                }
                None => (),
            }
        }

        let fee_sats = if coinbase {
            0
        } else {
            in_total.saturating_sub(out_total)
        };
        let net_sats = to_owned as i64 - from_owned as i64;
        let kind = if net_sats >= 0 {
            TxKind::Received
        } else {
            TxKind::Sent
        };
        let counterparty = match kind {
            TxKind::Sent => first_foreign_output,
            TxKind::Received =>
                first_owned_output.or_else(|| owned_list.first().cloned()),
        };

        // Dating is best-effort: a missing header leaves the row undated
        // rather than failing the whole model.
        let timestamp = match known_height {
            Some(height) => match self.header_timestamp(height).await {
                Ok(ts) => Some(ts),
                Err(err) => {
                    warn!("no header timestamp for height {height}: {err:#}");
                    None
                }
            },
            None => None,
        };

        let confirmations = match (tip, known_height) {
            (Some(tip), Some(height)) if height <= tip => tip - height + 1,
            _ => 0,
        };
        let status = status_for_confirmations(confirmations);

        let model = TransactionModel {
            txid,
            amount_sats: net_sats.unsigned_abs(),
            net_sats,
            fee_sats,
            block_height: known_height,
            timestamp,
            kind,
            status,
            confirmations,
            counterparty,
        };

        self.inner.wallet.record_metadata(TxMetadataRecord {
            txid,
            amount_sats: model.amount_sats,
            fee_sats: model.fee_sats,
            block_height: model.block_height,
            timestamp: model.timestamp,
            kind: model.kind,
            status: model.status,
            counterparty: model.counterparty.clone(),
        });

        Ok(model)
    }

    async fn header_timestamp(&self, height: u32) -> anyhow::Result<u32> {
        if let Some(ts) = self.inner.state.lock().unwrap().header_ts.get(&height) {
            return Ok(*ts);
        }
        let ts = self.inner.source.header_timestamp(height).await?;
        self.inner.state.lock().unwrap().header_ts.insert(height, ts);
        self.persist_caches();
        Ok(ts)
    }

    async fn decoded(&self, txid: Txid) -> anyhow::Result<Arc<Transaction>> {
        if let Some(tx) = self.inner.decode_cache.lock().unwrap().get(&txid) {
            return Ok(tx.clone());
        }
        let tx = Arc::new(
            self.inner
                .source
                .transaction(txid)
                .await
                .with_context(|| format!("failed to fetch transaction {txid}"))?,
        );
        self.inner.decode_cache.lock().unwrap().put(txid, tx.clone());
        Ok(tx)
    }

    /// Consume the Electrum client's buses: track the tip, invalidate on
    /// status/tx changes for this wallet.
    pub fn spawn_event_pump(
        &self,
        client_events: &ClientEvents,
        shutdown: ShutdownSignal,
    ) -> NamedTask<()> {
        let index = self.clone();
        let mut height_rx = client_events.block_height.subscribe();
        let mut status_rx = client_events.address_status.subscribe();
        let mut tx_rx = client_events.tx_update.subscribe();
        let mut shutdown = shutdown;

        NamedTask::spawn("tx-index-pump", async move {
            loop {
                tokio::select! {
                    () = shutdown.recv() => return,

                    height = height_rx.recv() => match height {
                        Some(height) => {
                            index.set_tip(height);
                            index.inner.events.last_block_updated.publish(height);
                        }
                        None => return,
                    },

                    status = status_rx.recv() => match status {
                        Some(status) => {
                            let owned = index.inner.wallet.owned_addresses();
                            if owned.contains(&status.address) {
                                index.invalidate();
                                // Nudge consumers to request a fresh page.
                                index.inner.events.items_updated.publish(Vec::new());
                            }
                        }
                        None => return,
                    },

                    update = tx_rx.recv() => match update {
                        Some(_) => index.invalidate(),
                        None => return,
                    },
                }
            }
        })
    }

    // --- persistence --- //

    fn persist_index(&self) {
        let file = {
            let state = self.inner.state.lock().unwrap();
            IndexFile {
                network: self.inner.network,
                items: state
                    .sorted
                    .iter()
                    .map(|txid| IndexItem {
                        txid: *txid,
                        height: state.height_map.get(txid).copied().flatten(),
                    })
                    .collect(),
            }
        };
        let bytes = serde_json::to_vec(&file).expect("index serialization is infallible");
        if let Err(err) = self.inner.ffs.write(&index_filename(self.inner.network), &bytes)
        {
            warn!("failed to persist tx index: {err}");
        }
    }

    fn persist_caches(&self) {
        let file = {
            let state = self.inner.state.lock().unwrap();
            CachesFile {
                positions: state
                    .pos_cache
                    .iter()
                    .map(|((height, txid), pos)| (format!("{height}|{txid}"), *pos))
                    .collect(),
                headers: state.header_ts.clone(),
            }
        };
        let bytes = serde_json::to_vec(&file).expect("cache serialization is infallible");
        if let Err(err) = self.inner.ffs.write(&caches_filename(self.inner.network), &bytes)
        {
            warn!("failed to persist tx caches: {err}");
        }
    }
}

fn resort(state: &mut IndexState) {
    let IndexState {
        height_map, sorted, ..
    } = state;
    sorted.clear();
    sorted.extend(height_map.keys().copied());
    sorted.sort_by(|a, b| {
        let ha = height_map.get(a).copied().flatten();
        let hb = height_map.get(b).copied().flatten();
        cmp_key(ha, *a, hb, *b)
    });
}

/// The index's total order: mempool first, then height descending, txid
/// ascending as the tiebreak.
fn cmp_key(ha: Option<u32>, a: Txid, hb: Option<u32>, b: Txid) -> CmpOrdering {
    match (ha, hb) {
        (None, None) => a.cmp(&b),
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(x), Some(y)) => y.cmp(&x).then(a.cmp(&b)),
    }
}

fn parse_cursor(cursor: &str) -> anyhow::Result<(Option<u32>, Txid)> {
    let (height_str, txid_str) = cursor
        .split_once('|')
        .with_context(|| format!("malformed cursor: {cursor}"))?;
    let height: u32 = height_str
        .parse()
        .with_context(|| format!("malformed cursor height: {cursor}"))?;
    let txid: Txid = txid_str
        .parse()
        .map_err(|_| anyhow::anyhow!("malformed cursor txid: {cursor}"))?;
    Ok((if height == 0 { None } else { Some(height) }, txid))
}

fn index_filename(network: Network) -> String {
    format!("tx_index_{}.json", network.name())
}

fn caches_filename(network: Network) -> String {
    format!("tx_caches_{}.json", network.name())
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    network: Network,
    items: Vec<IndexItem>,
}

#[derive(Serialize, Deserialize)]
struct IndexItem {
    txid: Txid,
    height: Option<u32>,
}

#[derive(Default, Serialize, Deserialize)]
struct CachesFile {
    positions: BTreeMap<String, u32>,
    headers: BTreeMap<u32, u32>,
}


fn load_state<F: Ffs>(ffs: &F, network: Network) -> IndexState {
    let mut state = IndexState {
        height_map: HashMap::new(),
        sorted: Vec::new(),
        pos_cache: HashMap::new(),
        header_ts: BTreeMap::new(),
        tip_height: None,
        invalidated: true,
        generation: 0,
    };

    match ffs.read(&index_filename(network)) {
        Ok(buf) => match serde_json::from_slice::<IndexFile>(&buf) {
            Ok(file) if file.network == network => {
                for item in file.items {
                    state.height_map.insert(item.txid, item.height);
                }
                resort(&mut state);
                // Warm start: the persisted index serves until something
                // invalidates it.
                state.invalidated = false;
            }
            Ok(_) => warn!("ignoring tx index persisted for another network"),
            Err(err) => warn!("corrupt tx index file: {err}"),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => warn!("failed to read tx index file: {err}"),
    }

    match ffs.read(&caches_filename(network)) {
        Ok(buf) => match serde_json::from_slice::<CachesFile>(&buf) {
            Ok(file) => {
                for (key, pos) in file.positions {
                    if let Some((height_str, txid_str)) = key.split_once('|') {
                        if let (Ok(height), Ok(txid)) =
                            (height_str.parse::<u32>(), txid_str.parse::<Txid>())
                        {
                            state.pos_cache.insert((height, txid), pos);
                        }
                    }
                }
                state.header_ts = file.headers;
            }
            Err(err) => warn!("corrupt tx caches file: {err}"),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => warn!("failed to read tx caches file: {err}"),
    }

    state
}
