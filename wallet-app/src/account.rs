//! BIP84 account keys and the small traits that decouple the repository
//! from live derivation and network history.

use anyhow::Context;
use async_trait::async_trait;
use wallet_btc::{
    address,
    bip32::{DerivationPath, Xpriv},
    mnemonic::Mnemonic,
    secp256k1::SecretKey,
    Network,
};
use wallet_electrum::ElectrumClient;

/// The account-level key `m/84'/coin'/0'` plus everything needed to derive
/// per-index keys and addresses under it.
pub struct AccountKeys {
    account: Xpriv,
    network: Network,
}

impl AccountKeys {
    pub fn from_mnemonic(
        mnemonic: &Mnemonic,
        passphrase: &str,
        network: Network,
    ) -> anyhow::Result<Self> {
        let seed = mnemonic.seed(passphrase);
        let path: DerivationPath = network
            .bip84_base_path()
            .parse()
            .context("invalid base derivation path")?;
        let account = Xpriv::master(&seed)
            .context("failed to derive master key")?
            .derive_path(&path)
            .context("failed to derive account key")?;
        Ok(Self { account, network })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The child key at `…/change/index`.
    pub fn derive_key(&self, is_change: bool, index: u32) -> anyhow::Result<Xpriv> {
        self.account
            .ckd_priv(u32::from(is_change))
            .and_then(|branch| branch.ckd_priv(index))
            .context("child derivation failed")
    }

    pub fn derive_secret(&self, is_change: bool, index: u32) -> anyhow::Result<SecretKey> {
        Ok(*self.derive_key(is_change, index)?.secret_key())
    }

    pub fn address(&self, is_change: bool, index: u32) -> anyhow::Result<String> {
        let key = self.derive_key(is_change, index)?;
        Ok(address::p2wpkh_address(&key.public_key(), self.network))
    }
}

/// Derive the address at a branch/index. Implemented by [`AccountKeys`];
/// tests substitute a deterministic fake.
pub trait AddressDeriver {
    fn derive_address(&self, is_change: bool, index: u32) -> anyhow::Result<String>;
}

impl AddressDeriver for AccountKeys {
    fn derive_address(&self, is_change: bool, index: u32) -> anyhow::Result<String> {
        self.address(is_change, index)
    }
}

/// Whether an address has any on-chain (or mempool) history. Implemented by
/// the Electrum client; mocked in repository tests.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn has_history(&self, address: &str) -> anyhow::Result<bool>;
}

#[async_trait]
impl HistorySource for ElectrumClient {
    async fn has_history(&self, address: &str) -> anyhow::Result<bool> {
        let history = self
            .get_history(address)
            .await
            .with_context(|| format!("history lookup failed for {address}"))?;
        Ok(!history.is_empty())
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    const MNEMONIC: &str = "twist outside favorite taxi bracket admit unveil around \
                            demand number mixture civil diesel enhance hammer meat \
                            then replace master carpet farm viable toast muscle";

    #[test]
    fn derives_the_bip84_receive_chain() {
        let mnemonic = Mnemonic::from_str(MNEMONIC).unwrap();
        let keys =
            AccountKeys::from_mnemonic(&mnemonic, "", Network::Mainnet).unwrap();
        assert_eq!(
            keys.address(false, 0).unwrap(),
            "bc1q249u4yzmkas7jk7cne0kqwr8ky8097ttxlmlrz",
        );

        // Change chain differs from the receive chain.
        assert_ne!(keys.address(true, 0).unwrap(), keys.address(false, 0).unwrap());
        // Derivation is deterministic.
        assert_eq!(keys.address(false, 5).unwrap(), keys.address(false, 5).unwrap());
    }

    #[test]
    fn secret_matches_address() {
        let mnemonic = Mnemonic::from_str(MNEMONIC).unwrap();
        let keys =
            AccountKeys::from_mnemonic(&mnemonic, "", Network::Mainnet).unwrap();

        let secret = keys.derive_secret(false, 0).unwrap();
        let public = wallet_btc::keys::public_key(&secret);
        assert_eq!(
            wallet_btc::address::p2wpkh_address(&public, Network::Mainnet),
            keys.address(false, 0).unwrap(),
        );
    }
}
