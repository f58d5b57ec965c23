//! The app facade: explicitly constructed services wired together once, and
//! the use cases the UI calls.

use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use tracing::{info, warn};
use wallet_btc::{
    address,
    builder::{self, BuildError, SpendableUtxo},
    mnemonic::Mnemonic,
    Network, Txid, DUST_LIMIT_SATS,
};
use wallet_electrum::ElectrumClient;
use wallet_tokio::{shutdown::ShutdownSignal, task::NamedTask};

use crate::{
    account::AccountKeys,
    backup::{self, BackupError},
    db::WritebackStore,
    ffs::FlatFileFs,
    models::{TransactionModel, TxKind, TxStatus},
    pool::TxPool,
    secret_store::{keys as secret_keys, SecretStore},
    settings::Settings,
    tx_index::{TxIndex, WalletView},
    wallet_store::{
        new_wallet_record, AddressRecord, TxMetadataRecord, UtxoRecord, WalletDb,
        WalletId, WalletKind, WalletRecord,
    },
};

/// Rough vbyte size of a 1-in/2-out P2WPKH spend, for the pre-selection
/// balance check.
const ROUGH_SPEND_VBYTES: u64 = 141;

pub struct AppConfig {
    /// Root directory for everything the app persists.
    pub data_dir: PathBuf,
}

/// Adapter giving the transactions index a view of the active wallet.
struct ActiveWalletView {
    wallets: Arc<WalletDb<FlatFileFs>>,
}

impl WalletView for ActiveWalletView {
    fn owned_addresses(&self) -> Vec<String> {
        let Some(active) = self.wallets.active_wallet() else {
            return Vec::new();
        };
        self.wallets
            .addresses(active.id, None)
            .map(|records| records.into_iter().map(|r| r.address).collect())
            .unwrap_or_default()
    }

    fn record_metadata(&self, meta: TxMetadataRecord) {
        let Some(active) = self.wallets.active_wallet() else {
            return;
        };
        if let Err(err) = self.wallets.upsert_tx_metadata(active.id, meta) {
            // Metadata is a projection of the index; losing a write is not
            // fatal for the session.
            warn!("failed to record tx metadata: {err}");
        }
    }
}

pub struct App {
    settings: WritebackStore<Settings>,
    secrets: Arc<SecretStore<FlatFileFs>>,
    wallets: Arc<WalletDb<FlatFileFs>>,
    electrum: ElectrumClient,
    index: TxIndex<ElectrumClient, FlatFileFs>,
    pool: TxPool<TxIndex<ElectrumClient, FlatFileFs>>,
    shutdown: ShutdownSignal,
    tasks: Vec<NamedTask<()>>,
}

impl App {
    /// Load persisted state and bring up the background services.
    pub async fn load(config: AppConfig) -> anyhow::Result<Self> {
        let settings_ffs =
            FlatFileFs::create_dir_all(config.data_dir.join("settings"))
                .context("failed to open settings dir")?;
        let settings = Settings::load(settings_ffs);
        let resolved = settings.read().resolve();

        let registry_ffs =
            FlatFileFs::create_dir_all(config.data_dir.join("secret_registry"))
                .context("failed to open secret registry dir")?;
        #[cfg(feature = "keychain")]
        let secrets = Arc::new(SecretStore::keychain(
            "app.wallet-core".to_owned(),
            registry_ffs,
        ));
        #[cfg(not(feature = "keychain"))]
        let secrets = Arc::new(
            SecretStore::file_backed(config.data_dir.join("secrets"), registry_ffs)
                .context("failed to open secret store")?,
        );

        let wallets_ffs = FlatFileFs::create_dir_all(config.data_dir.join("wallets"))
            .context("failed to open wallets dir")?;
        let wallets = Arc::new(WalletDb::read(wallets_ffs)?);

        let shutdown = ShutdownSignal::new();
        let (electrum, conn_task) =
            ElectrumClient::new(resolved.server_config(), shutdown.clone());

        let caches_ffs = FlatFileFs::create_dir_all(config.data_dir.join("caches"))
            .context("failed to open caches dir")?;
        let view = Arc::new(ActiveWalletView {
            wallets: wallets.clone(),
        });
        let index = TxIndex::new(
            electrum.clone(),
            caches_ffs,
            resolved.network,
            view as Arc<dyn WalletView>,
        );
        let pump_task = index.spawn_event_pump(electrum.events(), shutdown.clone());

        let pool = TxPool::new(index.clone());
        let forward_task = pool.spawn_forwarder(shutdown.clone());

        let app = Self {
            settings,
            secrets,
            wallets,
            electrum,
            index,
            pool,
            shutdown,
            tasks: vec![conn_task, pump_task, forward_task],
        };

        // Register subscriptions for the active wallet; they go live on (re)
        // connect.
        if let Some(active) = app.wallets.active_wallet() {
            for record in app.wallets.addresses(active.id, None)? {
                let _ = app.electrum.subscribe_address(&record.address).await;
            }
        }

        // The event pump only sees heights published after it subscribed;
        // pick up a tip the client may already have learned.
        if let Some(tip) = app.electrum.tip_height() {
            app.index.set_tip(tip);
        }

        info!("app loaded on {}", resolved.network);
        Ok(app)
    }

    pub fn electrum(&self) -> &ElectrumClient {
        &self.electrum
    }

    pub fn settings(&self) -> &WritebackStore<Settings> {
        &self.settings
    }

    pub fn list_wallets(&self) -> Vec<WalletRecord> {
        self.wallets.list_wallets()
    }

    pub fn active_wallet(&self) -> Option<WalletRecord> {
        self.wallets.active_wallet()
    }

    pub fn set_active_wallet(&self, id: WalletId) -> anyhow::Result<()> {
        self.wallets.set_active(id)?;
        self.index.invalidate();
        Ok(())
    }

    /// Merge a settings update and, if the Electrum server changed, tear
    /// down the connection and reconnect against the new one.
    pub fn apply_settings(&self, update: Settings) -> anyhow::Result<()> {
        let before = self.settings.read().resolve();
        self.settings.update(update)?;
        let after = self.settings.read().resolve();
        if after.server_config() != before.server_config() {
            self.electrum.update_server(after.server_config());
        }
        Ok(())
    }

    // --- wallet creation & import --- //

    /// Create a wallet from a fresh 12-word mnemonic and make it active.
    pub async fn create_wallet(
        &self,
        name: &str,
        network: Network,
    ) -> anyhow::Result<WalletRecord> {
        let mnemonic = Mnemonic::generate(12)
            .map_err(|err| anyhow::anyhow!("mnemonic generation failed: {err}"))?;
        self.install_wallet(mnemonic, name, network).await
    }

    /// Import a wallet from an existing BIP39 phrase and make it active.
    ///
    /// Validation errors keep their [`wallet_btc::mnemonic::MnemonicError`]
    /// cause so the UI can distinguish word-count, unknown-word, and
    /// checksum failures.
    pub async fn import_wallet(
        &self,
        phrase: &str,
        name: &str,
        network: Network,
    ) -> anyhow::Result<WalletRecord> {
        let mnemonic = Mnemonic::from_str(phrase).map_err(anyhow::Error::new)?;
        self.install_wallet(mnemonic, name, network).await
    }

    async fn install_wallet(
        &self,
        mnemonic: Mnemonic,
        name: &str,
        network: Network,
    ) -> anyhow::Result<WalletRecord> {
        anyhow::ensure!(
            self.wallets.list_wallets().iter().all(|w| w.name != name),
            "a wallet named '{name}' already exists",
        );

        let keys = AccountKeys::from_mnemonic(&mnemonic, "", network)?;
        let external0 = keys.address(false, 0)?;
        let change0 = keys.address(true, 0)?;

        // The mnemonic goes in first: a record without its secret is
        // unrecoverable, while an orphaned secret is merely overwritten on
        // retry.
        self.secrets.put(
            &secret_keys::mnemonic(name),
            mnemonic.phrase().as_bytes(),
            true,
        )?;

        let kind = match network {
            Network::Mainnet => WalletKind::Mainnet,
            Network::Testnet => WalletKind::Testnet,
        };
        let record = new_wallet_record(name, kind, network);
        let inserted = self.wallets.insert_wallet(
            record.clone(),
            vec![new_address_record(&external0, 0, false)],
            vec![new_address_record(&change0, 0, true)],
        );
        if let Err(err) = inserted {
            let _ = self.secrets.delete(&secret_keys::mnemonic(name));
            return Err(err).context("failed to persist the new wallet");
        }

        self.wallets.set_active(record.id)?;
        self.index.invalidate();
        let _ = self.electrum.subscribe_address(&external0).await;
        let _ = self.electrum.subscribe_address(&change0).await;

        Ok(self.wallets.wallet(record.id)?)
    }

    /// Import a single-address watch-only wallet.
    pub async fn import_watch_only(
        &self,
        watched_address: &str,
        name: &str,
    ) -> anyhow::Result<WalletRecord> {
        anyhow::ensure!(
            self.wallets.list_wallets().iter().all(|w| w.name != name),
            "a wallet named '{name}' already exists",
        );

        // Infer the network from the address form.
        let network = [Network::Mainnet, Network::Testnet]
            .into_iter()
            .find(|network| address::script_pubkey(watched_address, *network).is_ok())
            .context("unrecognized address")?;

        let record = new_wallet_record(name, WalletKind::WatchOnly, network);
        self.wallets.insert_wallet(
            record.clone(),
            vec![new_address_record(watched_address, 0, false)],
            Vec::new(),
        )?;
        self.wallets.set_active(record.id)?;
        self.index.invalidate();
        let _ = self.electrum.subscribe_address(watched_address).await;

        Ok(self.wallets.wallet(record.id)?)
    }

    /// Delete a wallet, its document, and its stored mnemonic.
    pub fn delete_wallet(&self, id: WalletId) -> anyhow::Result<()> {
        let record = self.wallets.delete_wallet(id)?;
        self.secrets
            .delete(&secret_keys::mnemonic(&record.name))
            .context("wallet deleted but its secret could not be removed")?;
        self.index.invalidate();
        Ok(())
    }

    // --- receive --- //

    /// The address to show on the receive screen.
    pub async fn next_receive_address(&self) -> anyhow::Result<String> {
        let resolved = self.settings.read().resolve();
        let wallet = self.active_spending_wallet()?;

        if !resolved.auto_rotate_receive {
            // Rotation off: keep handing out the first unused known address.
            let externals = self.wallets.addresses(wallet.id, Some(false))?;
            if let Some(record) = externals.iter().find(|r| !r.is_used) {
                return Ok(record.address.clone());
            }
        }

        let keys = self.account_keys(&wallet)?;
        let address = self
            .wallets
            .next_receive_address(wallet.id, resolved.gap_limit, &keys, &self.electrum)
            .await?;
        let _ = self.electrum.subscribe_address(&address).await;
        Ok(address)
    }

    // --- send --- //

    /// Build, sign, and broadcast a spend. Returns the broadcast txid.
    pub async fn send_bitcoin(
        &self,
        recipient: &str,
        amount_sats: u64,
        fee_rate_sat_vb: f64,
    ) -> anyhow::Result<Txid> {
        let wallet = self.active_spending_wallet()?;

        // Input validation first: no Electrum side effects on bad input.
        address::script_pubkey(recipient, wallet.network)
            .map_err(|err| anyhow::anyhow!("invalid recipient address: {err}"))?;
        anyhow::ensure!(
            amount_sats >= DUST_LIMIT_SATS,
            "amount {amount_sats} sats is below the dust limit",
        );

        let addresses = self.wallets.addresses(wallet.id, None)?;
        let confirmed_balance: i64 =
            addresses.iter().map(|r| r.confirmed_sats).sum();
        let rough_fee = (fee_rate_sat_vb * ROUGH_SPEND_VBYTES as f64).ceil() as u64;
        let required = amount_sats.saturating_add(rough_fee);
        if confirmed_balance < 0 || (confirmed_balance as u64) < required {
            return Err(anyhow::Error::new(BuildError::InsufficientFunds {
                available: confirmed_balance.max(0) as u64,
                required,
            }));
        }

        let keys = self.account_keys(&wallet)?;

        // Gather confirmed coins across every owned address.
        let mut spendable: Vec<SpendableUtxo> = Vec::new();
        for record in &addresses {
            let unspent = self
                .electrum
                .listunspent(&record.address)
                .await
                .with_context(|| format!("listunspent failed for {}", record.address))?;
            for item in unspent {
                if item.confirmed_height().is_none() {
                    continue;
                }
                spendable.push(SpendableUtxo {
                    txid: item.tx_hash,
                    vout: item.tx_pos,
                    value: item.value,
                    secret: keys
                        .derive_secret(record.is_change, record.derivation_index)?,
                });
            }
        }

        let change = self.wallets.change_address(wallet.id, &keys)?;
        let spend = builder::build_spend(
            wallet.network,
            recipient,
            amount_sats,
            fee_rate_sat_vb,
            &spendable,
            &change,
        )?;

        match self.electrum.broadcast(&spend.tx).await {
            Ok(txid) => {
                info!("broadcast {txid}: {} sats, fee {}", amount_sats, spend.fee_sats);
                for input in &spend.tx.inputs {
                    let _ = self.wallets.mark_utxo_spent(
                        wallet.id,
                        input.prev_txid,
                        input.vout,
                        txid,
                    );
                }
                let _ = self.wallets.upsert_tx_metadata(
                    wallet.id,
                    TxMetadataRecord {
                        txid,
                        amount_sats,
                        fee_sats: spend.fee_sats,
                        block_height: None,
                        timestamp: None,
                        kind: TxKind::Sent,
                        status: TxStatus::Pending,
                        counterparty: Some(recipient.to_owned()),
                    },
                );
                self.index.invalidate();
                Ok(txid)
            }
            Err(err) => {
                // Terminal failure: record it so the UI can show the
                // rejection, and surface the server's payload.
                let _ = self.wallets.upsert_tx_metadata(
                    wallet.id,
                    TxMetadataRecord {
                        txid: spend.tx.txid(),
                        amount_sats,
                        fee_sats: spend.fee_sats,
                        block_height: None,
                        timestamp: None,
                        kind: TxKind::Sent,
                        status: TxStatus::Failed,
                        counterparty: Some(recipient.to_owned()),
                    },
                );
                Err(anyhow::Error::new(err).context("broadcast rejected"))
            }
        }
    }

    /// Suggested fee rate in sat/vB for ~6-block confirmation.
    pub async fn recommended_fee_rate(&self) -> anyhow::Result<f64> {
        let btc_per_kb = self.electrum.estimate_fee(6).await?;
        if btc_per_kb <= 0.0 {
            // The server has no estimate; the floor relay rate.
            return Ok(1.0);
        }
        Ok(btc_per_kb * 100_000_000.0 / 1_000.0)
    }

    // --- history & balances --- //

    /// The first `count` entries of the active wallet's history.
    pub async fn transactions(&self, count: usize) -> anyhow::Result<Vec<TransactionModel>> {
        let models = if self.settings.read().resolve().use_new_tx_pipeline {
            self.pool.items_single(count).await?
        } else {
            self.legacy_transactions(count).await?
        };

        // Track what we handed out so header updates keep refreshing these
        // rows' confirmation counts.
        self.electrum
            .track_txids(models.iter().map(|m| (m.txid, m.block_height)));
        Ok(models)
    }

    /// Pre-index pipeline: list histories directly and build models without
    /// the cursor machinery. Kept behind the `use_new_tx_pipeline` toggle.
    async fn legacy_transactions(
        &self,
        count: usize,
    ) -> anyhow::Result<Vec<TransactionModel>> {
        let wallet = self.wallets.active_wallet().context("no active wallet")?;

        let mut entries: Vec<(Txid, Option<u32>)> = Vec::new();
        for record in self.wallets.addresses(wallet.id, None)? {
            for item in self.electrum.get_history(&record.address).await? {
                let entry = (item.tx_hash, item.confirmed_height());
                if !entries.iter().any(|(txid, _)| *txid == entry.0) {
                    entries.push(entry);
                }
            }
        }

        // Mempool first, then height descending.
        entries.sort_by(|a, b| match (a.1, b.1) {
            (None, None) => a.0.cmp(&b.0),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x).then(a.0.cmp(&b.0)),
        });
        entries.truncate(count);

        let mut models = Vec::with_capacity(entries.len());
        for (txid, _) in entries {
            match self.index.build_model(txid).await {
                Ok(model) => models.push(model),
                Err(err) => warn!("failed to build model for {txid}: {err:#}"),
            }
        }
        Ok(models)
    }

    /// Refresh per-address balances and the UTXO set from the server.
    pub async fn sync_balances(&self) -> anyhow::Result<()> {
        let wallet = self.wallets.active_wallet().context("no active wallet")?;
        for record in self.wallets.addresses(wallet.id, None)? {
            let balance = self.electrum.get_balance(&record.address).await?;
            self.wallets.update_address_balance(
                wallet.id,
                &record.address,
                balance.confirmed,
                balance.unconfirmed,
            )?;
            if balance.confirmed != 0 || balance.unconfirmed != 0 {
                let _ = self.wallets.mark_address_used(wallet.id, &record.address);
            }

            let script_pubkey_hex = address::script_pubkey(&record.address, wallet.network)
                .map(hex::encode)
                .unwrap_or_default();
            let unspent = self.electrum.listunspent(&record.address).await?;
            self.wallets.upsert_utxos(
                wallet.id,
                unspent
                    .into_iter()
                    .map(|item| UtxoRecord {
                        txid: item.tx_hash,
                        vout: item.tx_pos,
                        value_sats: item.value,
                        script_pubkey_hex: script_pubkey_hex.clone(),
                        block_height: item.confirmed_height(),
                        is_spent: false,
                        spent_by: None,
                    })
                    .collect(),
            )?;
        }

        // Spent coins buried deep enough are gone for good.
        if let Some(tip) = self.electrum.tip_height() {
            let _ = self.wallets.prune_spent_utxos(wallet.id, tip);
        }
        Ok(())
    }

    // --- secrets backup --- //

    pub fn export_backup(&self, password: &str) -> Result<Vec<u8>, BackupError> {
        backup::export(&self.secrets, password)
    }

    pub fn import_backup(
        &self,
        password: &str,
        data: &[u8],
    ) -> Result<usize, BackupError> {
        backup::import(&self.secrets, password, data)
    }

    // --- teardown --- //

    /// Stop background tasks and flush pending writes.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.shutdown.send();
        for task in self.tasks.drain(..) {
            let name = task.name().to_owned();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("task '{name}' did not stop in time");
            }
        }
        self.settings.shutdown().await
    }

    // --- internals --- //

    fn active_spending_wallet(&self) -> anyhow::Result<WalletRecord> {
        let wallet = self.wallets.active_wallet().context("no active wallet")?;
        anyhow::ensure!(
            wallet.kind != WalletKind::WatchOnly,
            "watch-only wallets cannot spend or derive",
        );
        Ok(wallet)
    }

    fn account_keys(&self, wallet: &WalletRecord) -> anyhow::Result<AccountKeys> {
        let secret = self
            .secrets
            .get(&secret_keys::mnemonic(&wallet.name))?
            .context("wallet mnemonic is missing from the secret store")?;
        let phrase = String::from_utf8(secret).context("stored mnemonic is not UTF-8")?;
        let mnemonic = Mnemonic::from_str(&phrase)
            .map_err(|err| anyhow::anyhow!("stored mnemonic is invalid: {err}"))?;
        AccountKeys::from_mnemonic(&mnemonic, "", wallet.network)
    }
}

fn new_address_record(address: &str, index: u32, is_change: bool) -> AddressRecord {
    AddressRecord {
        address: address.to_owned(),
        derivation_index: index,
        is_change,
        confirmed_sats: 0,
        unconfirmed_sats: 0,
        is_used: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TEST_MNEMONIC: &str = "twist outside favorite taxi bracket admit unveil \
                                 around demand number mixture civil diesel enhance \
                                 hammer meat then replace master carpet farm viable \
                                 toast muscle";

    async fn offline_app(tmp: &tempfile::TempDir) -> App {
        // Point the client at a local port nothing listens on: connects fail
        // fast, the client stays disconnected, and everything local keeps
        // working.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let settings_dir = tmp.path().join("settings");
        std::fs::create_dir_all(&settings_dir).unwrap();
        std::fs::write(
            settings_dir.join("settings.json"),
            format!(
                r#"{{"schema":1,"electrum_host":"127.0.0.1","electrum_port":{port},"electrum_ssl":false}}"#,
            ),
        )
        .unwrap();

        App::load(AppConfig {
            data_dir: tmp.path().to_path_buf(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_wallet_persists_record_and_secret() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;

        let record = app.create_wallet("main", Network::Mainnet).await.unwrap();
        assert!(record.active);
        assert_eq!(record.kind, WalletKind::Mainnet);
        assert_eq!(record.base_path, "m/84'/0'/0'");

        // index-0 external + change addresses exist.
        let addresses = app.wallets.addresses(record.id, None).unwrap();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.iter().all(|a| a.address.starts_with("bc1q")));

        // The mnemonic is in the secret store, flagged for user presence.
        let key = secret_keys::mnemonic("main");
        assert!(app.secrets.get(&key).unwrap().is_some());
        assert!(app.secrets.requires_user_presence(&key));

        app.shutdown().await.unwrap();

        // A reloaded app sees the same wallet.
        let app2 = offline_app(&tmp).await;
        let active = app2.active_wallet().unwrap();
        assert_eq!(active.name, "main");
        app2.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn import_wallet_derives_the_reference_address() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;

        let record = app
            .import_wallet(TEST_MNEMONIC, "imported", Network::Mainnet)
            .await
            .unwrap();

        let externals = app.wallets.addresses(record.id, Some(false)).unwrap();
        assert_eq!(
            externals[0].address,
            "bc1q249u4yzmkas7jk7cne0kqwr8ky8097ttxlmlrz",
        );
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn import_rejects_bad_phrases_with_cause() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;

        let err = app
            .import_wallet("abandon abandon about", "broken", Network::Mainnet)
            .await
            .unwrap_err();
        let cause = err
            .downcast_ref::<wallet_btc::mnemonic::MnemonicError>()
            .expect("mnemonic cause preserved");
        assert!(matches!(
            cause,
            wallet_btc::mnemonic::MnemonicError::InvalidWordCount(3),
        ));
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;

        app.create_wallet("main", Network::Mainnet).await.unwrap();
        assert!(app.create_wallet("main", Network::Mainnet).await.is_err());
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn delete_wallet_removes_the_secret() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;

        let record = app.create_wallet("gone", Network::Mainnet).await.unwrap();
        let key = secret_keys::mnemonic("gone");
        assert!(app.secrets.get(&key).unwrap().is_some());

        app.delete_wallet(record.id).unwrap();
        assert!(app.secrets.get(&key).unwrap().is_none());
        assert!(app.active_wallet().is_none());
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn watch_only_wallets_cannot_spend() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;

        let record = app
            .import_watch_only("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", "watch")
            .await
            .unwrap();
        assert_eq!(record.kind, WalletKind::WatchOnly);
        assert_eq!(record.network, Network::Mainnet);

        let err = app
            .send_bitcoin("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", 10_000, 2.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("watch-only"));
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn send_checks_balance_before_touching_the_network() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;
        app.create_wallet("main", Network::Mainnet).await.unwrap();

        // Zero confirmed balance: fails as insufficient before any Electrum
        // call (the client is offline, so reaching the network would fail
        // differently).
        let err = app
            .send_bitcoin("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", 10_000, 2.0)
            .await
            .unwrap_err();
        let cause = err
            .downcast_ref::<BuildError>()
            .expect("insufficient funds cause preserved");
        assert!(matches!(cause, BuildError::InsufficientFunds { .. }));
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn backup_roundtrips_through_the_facade() {
        let tmp = tempfile::tempdir().unwrap();
        let app = offline_app(&tmp).await;
        app.create_wallet("main", Network::Mainnet).await.unwrap();

        let backup = app.export_backup("a long password").unwrap();
        assert!(app.import_backup("wrong password", &backup).is_err());
        let restored = app.import_backup("a long password", &backup).unwrap();
        assert!(restored >= 1);
        app.shutdown().await.unwrap();
    }
}
