//! Pools: a caching layer between the transactions index and list consumers.
//!
//! A [`TxPool`] remembers the models already handed out (deduped by txid) so
//! scrolling only ever fetches the delta, forwards the provider's partial
//! batches, and refetches from scratch after an invalidation. A
//! [`PoolGroup`] merges several pools into one combined stream.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use wallet_btc::Txid;
use wallet_tokio::{
    bus::{Bus, BusRx},
    shutdown::ShutdownSignal,
    task::NamedTask,
};

use crate::{
    ffs::Ffs,
    models::TransactionModel,
    tx_index::{TxIndex, TxSource},
};

/// A paginated source of transaction models.
#[async_trait]
pub trait PoolProvider: Send + Sync + 'static {
    async fn items(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<TransactionModel>>;

    fn items_updated(&self) -> BusRx<Vec<TransactionModel>>;

    fn invalidated(&self) -> BusRx<()>;
}

#[async_trait]
impl<S, F> PoolProvider for TxIndex<S, F>
where
    S: TxSource,
    F: Ffs + Send + Sync + 'static,
{
    async fn items(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<TransactionModel>> {
        self.page(cursor.as_deref(), limit).await
    }

    fn items_updated(&self) -> BusRx<Vec<TransactionModel>> {
        self.events().items_updated.subscribe()
    }

    fn invalidated(&self) -> BusRx<()> {
        self.events().invalidated.subscribe()
    }
}

pub struct PoolEvents {
    pub items_updated: Bus<Vec<TransactionModel>>,
    pub invalidated: Bus<()>,
    pub syncing: Bus<bool>,
}

impl PoolEvents {
    fn new() -> Self {
        Self {
            items_updated: Bus::new(),
            invalidated: Bus::new(),
            syncing: Bus::new(),
        }
    }
}

#[derive(Default)]
struct PoolState {
    items: Vec<TransactionModel>,
    seen: HashSet<Txid>,
    invalidated: bool,
    all_loaded: bool,
}

struct PoolInner<P> {
    provider: P,
    state: Mutex<PoolState>,
    events: PoolEvents,
}

pub struct TxPool<P> {
    inner: Arc<PoolInner<P>>,
}

impl<P> Clone for TxPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: PoolProvider> TxPool<P> {
    pub fn new(provider: P) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                provider,
                state: Mutex::new(PoolState {
                    invalidated: true,
                    ..PoolState::default()
                }),
                events: PoolEvents::new(),
            }),
        }
    }

    pub fn events(&self) -> &PoolEvents {
        &self.inner.events
    }

    /// Mark the cache stale; the next request refetches from the top.
    pub fn invalidate(&self) {
        self.inner.state.lock().unwrap().invalidated = true;
        self.inner.events.invalidated.publish(());
    }

    /// Forward the provider's partial batches and invalidations into this
    /// pool's buses.
    pub fn spawn_forwarder(&self, shutdown: ShutdownSignal) -> NamedTask<()> {
        let pool = self.clone();
        let mut items_rx = pool.inner.provider.items_updated();
        let mut invalidated_rx = pool.inner.provider.invalidated();
        let mut shutdown = shutdown;

        NamedTask::spawn("tx-pool-forwarder", async move {
            loop {
                tokio::select! {
                    () = shutdown.recv() => return,
                    batch = items_rx.recv() => match batch {
                        Some(batch) => pool.inner.events.items_updated.publish(batch),
                        None => return,
                    },
                    invalidated = invalidated_rx.recv() => match invalidated {
                        Some(()) => pool.invalidate(),
                        None => return,
                    },
                }
            }
        })
    }

    /// The first `count` items.
    ///
    /// Stale cache: refetch from the top. Short cache: fetch the missing
    /// tail from the last item's cursor. Otherwise serve the cached prefix.
    pub async fn items_single(
        &self,
        count: usize,
    ) -> anyhow::Result<Vec<TransactionModel>> {
        enum Plan {
            Refetch,
            Extend { cursor: Option<String>, missing: usize },
            Cached,
        }

        let plan = {
            let state = self.inner.state.lock().unwrap();
            if state.invalidated {
                Plan::Refetch
            } else if count > state.items.len() && !state.all_loaded {
                Plan::Extend {
                    cursor: state.items.last().map(TransactionModel::cursor),
                    missing: count - state.items.len(),
                }
            } else {
                Plan::Cached
            }
        };

        match plan {
            Plan::Refetch => {
                let fetched = self.fetch(None, count).await?;
                let mut state = self.inner.state.lock().unwrap();
                state.items.clear();
                state.seen.clear();
                state.all_loaded = fetched.len() < count;
                state.invalidated = false;
                for model in fetched {
                    if state.seen.insert(model.txid) {
                        state.items.push(model);
                    }
                }
            }
            Plan::Extend { cursor, missing } => {
                let fetched = self.fetch(cursor, missing).await?;
                let mut state = self.inner.state.lock().unwrap();
                state.all_loaded = fetched.len() < missing;
                for model in fetched {
                    if state.seen.insert(model.txid) {
                        state.items.push(model);
                    }
                }
            }
            Plan::Cached => (),
        }

        let state = self.inner.state.lock().unwrap();
        Ok(state.items.iter().take(count).cloned().collect())
    }

    async fn fetch(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> anyhow::Result<Vec<TransactionModel>> {
        self.inner.events.syncing.publish(true);
        let result = self.inner.provider.items(cursor, limit).await;
        self.inner.events.syncing.publish(false);
        result
    }
}

/// Several pools merged by txid into one list and one set of streams.
pub struct PoolGroup<P> {
    pools: Vec<TxPool<P>>,
    events: PoolEvents,
}

impl<P: PoolProvider> PoolGroup<P> {
    pub fn new(pools: Vec<TxPool<P>>) -> Self {
        Self {
            pools,
            events: PoolEvents::new(),
        }
    }

    pub fn events(&self) -> &PoolEvents {
        &self.events
    }

    pub fn invalidate(&self) {
        for pool in &self.pools {
            pool.invalidate();
        }
        self.events.invalidated.publish(());
    }

    /// Forward every member pool's streams into the combined buses.
    pub fn spawn_forwarders(&self, shutdown: &ShutdownSignal) -> Vec<NamedTask<()>> {
        self.pools
            .iter()
            .map(|pool| {
                let mut items_rx = pool.events().items_updated.subscribe();
                let mut invalidated_rx = pool.events().invalidated.subscribe();
                let mut syncing_rx = pool.events().syncing.subscribe();
                let events = PoolEvents {
                    items_updated: self.events.items_updated.clone(),
                    invalidated: self.events.invalidated.clone(),
                    syncing: self.events.syncing.clone(),
                };
                let mut shutdown = shutdown.clone();

                NamedTask::spawn("tx-pool-group-forwarder", async move {
                    loop {
                        tokio::select! {
                            () = shutdown.recv() => return,
                            batch = items_rx.recv() => match batch {
                                Some(batch) => events.items_updated.publish(batch),
                                None => return,
                            },
                            invalidated = invalidated_rx.recv() => match invalidated {
                                Some(()) => events.invalidated.publish(()),
                                None => return,
                            },
                            syncing = syncing_rx.recv() => match syncing {
                                Some(flag) => events.syncing.publish(flag),
                                None => return,
                            },
                        }
                    }
                })
            })
            .collect()
    }

    /// The first `count` items across all pools, deduped by txid, newest
    /// first (dateless mempool entries at the top).
    pub async fn items_single(
        &self,
        count: usize,
    ) -> anyhow::Result<Vec<TransactionModel>> {
        let mut merged: Vec<TransactionModel> = Vec::new();
        let mut seen: HashSet<Txid> = HashSet::new();
        for pool in &self.pools {
            for model in pool.items_single(count).await? {
                if seen.insert(model.txid) {
                    merged.push(model);
                }
            }
        }

        merged.sort_by(|a, b| match (a.timestamp, b.timestamp) {
            (None, None) => CmpOrdering::Equal,
            (None, Some(_)) => CmpOrdering::Less,
            (Some(_), None) => CmpOrdering::Greater,
            (Some(x), Some(y)) => y.cmp(&x),
        });
        merged.truncate(count);
        Ok(merged)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;
    use crate::models::{TxKind, TxStatus};

    fn model(tag: u8, height: Option<u32>, timestamp: Option<u32>) -> TransactionModel {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        TransactionModel {
            txid: Txid::from_display_bytes(bytes),
            amount_sats: 1_000,
            net_sats: 1_000,
            fee_sats: 10,
            block_height: height,
            timestamp,
            kind: TxKind::Received,
            status: TxStatus::Pending,
            confirmations: 0,
            counterparty: None,
        }
    }

    struct MockProvider {
        items: Mutex<Vec<TransactionModel>>,
        calls: Mutex<Vec<(Option<String>, usize)>>,
        fetches: AtomicUsize,
        items_updated: Bus<Vec<TransactionModel>>,
        invalidated: Bus<()>,
    }

    impl MockProvider {
        fn new(items: Vec<TransactionModel>) -> Self {
            Self {
                items: Mutex::new(items),
                calls: Mutex::new(Vec::new()),
                fetches: AtomicUsize::new(0),
                items_updated: Bus::new(),
                invalidated: Bus::new(),
            }
        }
    }

    #[async_trait]
    impl PoolProvider for Arc<MockProvider> {
        async fn items(
            &self,
            cursor: Option<String>,
            limit: usize,
        ) -> anyhow::Result<Vec<TransactionModel>> {
            self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
            self.calls.lock().unwrap().push((cursor.clone(), limit));

            let items = self.items.lock().unwrap();
            let start = match cursor {
                None => 0,
                Some(cursor) => items
                    .iter()
                    .position(|m| m.cursor() == cursor)
                    .map(|idx| idx + 1)
                    .unwrap_or(items.len()),
            };
            Ok(items.iter().skip(start).take(limit).cloned().collect())
        }

        fn items_updated(&self) -> BusRx<Vec<TransactionModel>> {
            self.items_updated.subscribe()
        }

        fn invalidated(&self) -> BusRx<()> {
            self.invalidated.subscribe()
        }
    }

    fn five_models() -> Vec<TransactionModel> {
        vec![
            model(1, None, None),
            model(2, Some(102), Some(1_020)),
            model(3, Some(102), Some(1_020)),
            model(4, Some(101), Some(1_010)),
            model(5, Some(100), Some(1_000)),
        ]
    }

    #[tokio::test]
    async fn first_request_fetches_and_caches() {
        let provider = Arc::new(MockProvider::new(five_models()));
        let pool = TxPool::new(provider.clone());

        let items = pool.items_single(3).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(provider.fetches.load(AtomicOrdering::SeqCst), 1);

        // Same count again: served from cache, no fetch.
        let again = pool.items_single(3).await.unwrap();
        assert_eq!(again, items);
        assert_eq!(provider.fetches.load(AtomicOrdering::SeqCst), 1);

        // Smaller count: cached prefix.
        let fewer = pool.items_single(2).await.unwrap();
        assert_eq!(fewer, items[..2].to_vec());
        assert_eq!(provider.fetches.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn growing_count_fetches_only_the_tail() {
        let provider = Arc::new(MockProvider::new(five_models()));
        let pool = TxPool::new(provider.clone());

        pool.items_single(2).await.unwrap();
        let items = pool.items_single(5).await.unwrap();
        assert_eq!(items.len(), 5);

        let calls = provider.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (None, 2));
        // Second fetch resumed from the cached tail with the delta count.
        assert_eq!(calls[1].0, Some(five_models()[1].cursor()));
        assert_eq!(calls[1].1, 3);
    }

    #[tokio::test]
    async fn short_page_marks_all_loaded() {
        let provider = Arc::new(MockProvider::new(five_models()));
        let pool = TxPool::new(provider.clone());

        let items = pool.items_single(10).await.unwrap();
        assert_eq!(items.len(), 5);

        // Asking for even more does not refetch: everything is loaded.
        let again = pool.items_single(20).await.unwrap();
        assert_eq!(again.len(), 5);
        assert_eq!(provider.fetches.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_refetches_from_the_top() {
        let provider = Arc::new(MockProvider::new(five_models()));
        let pool = TxPool::new(provider.clone());

        pool.items_single(3).await.unwrap();
        pool.invalidate();

        let items = pool.items_single(3).await.unwrap();
        assert_eq!(items.len(), 3);

        let calls = provider.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], (None, 3));
    }

    #[tokio::test]
    async fn provider_invalidation_flows_through_the_forwarder() {
        let provider = Arc::new(MockProvider::new(five_models()));
        let pool = TxPool::new(provider.clone());
        let shutdown = ShutdownSignal::new();
        let task = pool.spawn_forwarder(shutdown.clone());

        pool.items_single(3).await.unwrap();
        assert_eq!(provider.fetches.load(AtomicOrdering::SeqCst), 1);

        let mut invalidated_rx = pool.events().invalidated.subscribe();
        provider.invalidated.publish(());
        invalidated_rx.recv().await.unwrap();

        // Next request refetches.
        pool.items_single(3).await.unwrap();
        assert_eq!(provider.fetches.load(AtomicOrdering::SeqCst), 2);

        shutdown.send();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn group_merges_and_dedupes() {
        let shared = model(3, Some(102), Some(1_020));
        let provider_a = Arc::new(MockProvider::new(vec![
            model(1, None, None),
            shared.clone(),
        ]));
        let provider_b = Arc::new(MockProvider::new(vec![
            shared.clone(),
            model(5, Some(100), Some(1_000)),
        ]));

        let group = PoolGroup::new(vec![
            TxPool::new(provider_a),
            TxPool::new(provider_b),
        ]);

        let items = group.items_single(10).await.unwrap();
        let ids: Vec<Txid> = items.iter().map(|m| m.txid).collect();
        assert_eq!(
            ids,
            vec![model(1, None, None).txid, shared.txid, model(5, None, None).txid],
        );
    }
}
