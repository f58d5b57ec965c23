//! Wallet settings: persistence, defaults, and merge semantics.

use serde::{Deserialize, Serialize};
use wallet_btc::Network;
use wallet_electrum::ServerConfig;

use crate::{
    db::{Merge, SchemaVersion, WritebackStore},
    ffs::Ffs,
};

const SETTINGS_JSON: &str = "settings.json";

/// Consecutive unused addresses before discovery stops.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Persisted wallet settings. Every field is optional; [`Settings::resolve`]
/// applies the defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schema: SchemaVersion,
    pub electrum_host: Option<String>,
    pub electrum_port: Option<u16>,
    pub electrum_ssl: Option<bool>,
    pub network: Option<Network>,
    pub gap_limit: Option<u32>,
    /// Rotate the receive address as soon as the current one gains history.
    pub auto_rotate_receive: Option<bool>,
    /// Serve transaction history through the indexed pipeline (default) or
    /// the legacy per-address listing.
    pub use_new_tx_pipeline: Option<bool>,
}

impl Settings {
    pub const CURRENT_SCHEMA: SchemaVersion = SchemaVersion(1);

    pub fn load<F: Ffs + Send + 'static>(ffs: F) -> WritebackStore<Settings> {
        WritebackStore::load(ffs, SETTINGS_JSON, "settings-persister")
    }

    /// Apply defaults to get effective values.
    pub fn resolve(&self) -> ResolvedSettings {
        let network = self.network.unwrap_or(Network::Mainnet);
        let ssl = self.electrum_ssl.unwrap_or(true);
        let host = self
            .electrum_host
            .clone()
            .unwrap_or_else(|| default_host(network).to_owned());
        let port = self.electrum_port.unwrap_or(default_port(network, ssl));
        ResolvedSettings {
            network,
            electrum_host: host,
            electrum_port: port,
            electrum_ssl: ssl,
            gap_limit: self.gap_limit.unwrap_or(DEFAULT_GAP_LIMIT),
            auto_rotate_receive: self.auto_rotate_receive.unwrap_or(true),
            use_new_tx_pipeline: self.use_new_tx_pipeline.unwrap_or(true),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema: Self::CURRENT_SCHEMA,
            electrum_host: None,
            electrum_port: None,
            electrum_ssl: None,
            network: None,
            gap_limit: None,
            auto_rotate_receive: None,
            use_new_tx_pipeline: None,
        }
    }
}

impl Merge for Settings {
    fn merge(&mut self, update: Self) -> anyhow::Result<()> {
        self.schema.ensure_matches(update.schema)?;
        self.electrum_host.merge(update.electrum_host)?;
        self.electrum_port.merge(update.electrum_port)?;
        self.electrum_ssl.merge(update.electrum_ssl)?;
        self.network.merge(update.network)?;
        self.gap_limit.merge(update.gap_limit)?;
        self.auto_rotate_receive.merge(update.auto_rotate_receive)?;
        self.use_new_tx_pipeline.merge(update.use_new_tx_pipeline)?;
        Ok(())
    }
}

impl Merge for Network {}

/// Settings with all defaults applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedSettings {
    pub network: Network,
    pub electrum_host: String,
    pub electrum_port: u16,
    pub electrum_ssl: bool,
    pub gap_limit: u32,
    pub auto_rotate_receive: bool,
    pub use_new_tx_pipeline: bool,
}

impl ResolvedSettings {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.electrum_host.clone(),
            port: self.electrum_port,
            ssl: self.electrum_ssl,
            network: self.network,
        }
    }
}

fn default_host(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "electrum.blockstream.info",
        Network::Testnet => "electrum.blockstream.info",
    }
}

fn default_port(network: Network, ssl: bool) -> u16 {
    match (network, ssl) {
        (Network::Mainnet, true) => 50002,
        (Network::Mainnet, false) => 50001,
        (Network::Testnet, true) => 60002,
        (Network::Testnet, false) => 60001,
    }
}

#[cfg(test)]
mod test {
    use proptest::proptest;

    use super::*;
    use crate::ffs::{mem::MemFs, Ffs};

    #[test]
    fn defaults_resolve_to_mainnet_tls() {
        let resolved = Settings::default().resolve();
        assert_eq!(resolved.network, Network::Mainnet);
        assert!(resolved.electrum_ssl);
        assert_eq!(resolved.electrum_port, 50002);
        assert_eq!(resolved.gap_limit, DEFAULT_GAP_LIMIT);
        assert!(resolved.auto_rotate_receive);
        assert!(resolved.use_new_tx_pipeline);
    }

    #[test]
    fn testnet_switch_changes_server_defaults() {
        let settings = Settings {
            network: Some(Network::Testnet),
            ..Default::default()
        };
        let resolved = settings.resolve();
        assert_eq!(resolved.electrum_port, 60002);
        assert_eq!(resolved.server_config().network, Network::Testnet);
    }

    #[test]
    fn explicit_server_beats_defaults() {
        let settings = Settings {
            electrum_host: Some("my.node.local".to_owned()),
            electrum_port: Some(50001),
            electrum_ssl: Some(false),
            ..Default::default()
        };
        let resolved = settings.resolve();
        assert_eq!(resolved.electrum_host, "my.node.local");
        assert_eq!(resolved.electrum_port, 50001);
        assert!(!resolved.electrum_ssl);
    }

    #[test]
    fn merge_rejects_schema_mismatch() {
        let mut settings = Settings::default();
        let update = Settings {
            schema: SchemaVersion(99),
            ..Default::default()
        };
        assert!(settings.merge(update).is_err());
    }

    #[test]
    fn load_hardcoded_json() {
        let ffs = MemFs::new();
        ffs.write(
            SETTINGS_JSON,
            br#"{
                "schema": 1,
                "electrum_host": "example.org",
                "network": "testnet",
                "gap_limit": 5
            }"#,
        )
        .unwrap();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut store = Settings::load(ffs);
            let settings = store.read();
            assert_eq!(settings.electrum_host.as_deref(), Some("example.org"));
            assert_eq!(settings.network, Some(Network::Testnet));
            assert_eq!(settings.gap_limit, Some(5));
            assert_eq!(settings.electrum_port, None);
            store.shutdown().await.unwrap();
        });
    }

    fn arb_settings() -> impl proptest::strategy::Strategy<Value = Settings> {
        use proptest::{option, prelude::*};
        (
            prop_oneof![5 => Just(SchemaVersion(1)), 1 => (0_u32..4).prop_map(SchemaVersion)],
            option::of(prop_oneof![
                Just("node.example.org".to_owned()),
                Just("127.0.0.1".to_owned()),
                Just("electrum.local".to_owned()),
            ]),
            option::of(any::<u16>()),
            option::of(any::<bool>()),
            option::of(prop_oneof![Just(Network::Mainnet), Just(Network::Testnet)]),
            option::of(1_u32..50),
            option::of(any::<bool>()),
            option::of(any::<bool>()),
        )
            .prop_map(
                |(
                    schema,
                    electrum_host,
                    electrum_port,
                    electrum_ssl,
                    network,
                    gap_limit,
                    auto_rotate_receive,
                    use_new_tx_pipeline,
                )| Settings {
                    schema,
                    electrum_host,
                    electrum_port,
                    electrum_ssl,
                    network,
                    gap_limit,
                    auto_rotate_receive,
                    use_new_tx_pipeline,
                },
            )
    }

    proptest! {
        // Merging any update into any base either fails on a schema mismatch
        // or ends with every updated field applied.
        #[test]
        fn merge_applies_some_fields(base in arb_settings(), update in arb_settings()) {
            let mut merged = base.clone();
            match merged.merge(update.clone()) {
                Err(_) => assert!(base.schema != update.schema),
                Ok(()) => {
                    assert_eq!(merged.schema, base.schema);
                    if update.gap_limit.is_some() {
                        assert_eq!(merged.gap_limit, update.gap_limit);
                    } else {
                        assert_eq!(merged.gap_limit, base.gap_limit);
                    }
                    if update.electrum_host.is_some() {
                        assert_eq!(merged.electrum_host, update.electrum_host);
                    }
                }
            }
        }
    }
}
