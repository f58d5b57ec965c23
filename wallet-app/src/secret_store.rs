//! Opaque key/value secret storage.
//!
//! Secrets live in the platform keychain (behind the `keychain` cargo
//! feature) or, by default, in per-secret files inside the app data
//! directory via a [`keyring`] file credential. Values pass through the
//! keyring string API hex-encoded.
//!
//! Keychains cannot enumerate entries, so a small non-secret registry (key
//! names and their user-presence flags, never values) is kept as JSON
//! through [`Ffs`]; that is what makes [`SecretStore::list`] work.

use std::{
    collections::BTreeMap,
    io,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Context;
use keyring::credential::CredentialApi;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ffs::Ffs;

const REGISTRY_JSON: &str = "secret_registry.json";

/// Well-known key shapes. Kept here so call sites cannot drift.
pub mod keys {
    /// The active wallet's master seed.
    pub const MASTER_SEED: &str = "wallet.master.seed";
    /// Key encrypting per-wallet data blobs.
    pub const MASTER_ENCRYPTION_KEY: &str = "wallet.master.encryption.key";

    /// Mnemonic of the named wallet.
    pub fn mnemonic(wallet_name: &str) -> String {
        format!("seed_{wallet_name}")
    }

    /// Per-wallet encrypted data blob.
    pub fn wallet_data(key: &str) -> String {
        format!("wallet.data.{key}")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    entries: BTreeMap<String, EntryMeta>,
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
struct EntryMeta {
    /// The host OS should demand biometrics/passcode before releasing this
    /// entry. Enforcement is the platform keychain's job; we only carry the
    /// flag.
    requires_user_presence: bool,
}

enum Backend {
    /// Per-secret files under the app data directory.
    Files { dir: PathBuf },
    /// Platform keychain entries under a service name.
    #[cfg(feature = "keychain")]
    Keychain { service: String },
}

pub struct SecretStore<F> {
    backend: Backend,
    registry: Mutex<Registry>,
    ffs: F,
}

impl<F: Ffs> SecretStore<F> {
    /// File-backed store: secrets in `dir`, registry through `ffs`.
    pub fn file_backed(dir: PathBuf, ffs: F) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&dir).context("failed to create secrets dir")?;
        Ok(Self {
            backend: Backend::Files { dir },
            registry: Mutex::new(load_registry(&ffs)),
            ffs,
        })
    }

    /// Keychain-backed store under `service`.
    #[cfg(feature = "keychain")]
    pub fn keychain(service: String, ffs: F) -> Self {
        Self {
            backend: Backend::Keychain { service },
            registry: Mutex::new(load_registry(&ffs)),
            ffs,
        }
    }

    /// Store `value` under `key`. `require_user_presence` asks the host OS to
    /// gate reads behind biometrics/passcode where supported.
    pub fn put(
        &self,
        key: &str,
        value: &[u8],
        require_user_presence: bool,
    ) -> anyhow::Result<()> {
        self.entry(key)?
            .set_password(&hex::encode(value))
            .with_context(|| format!("failed to store secret '{key}'"))?;

        let mut registry = self.registry.lock().unwrap();
        registry.entries.insert(
            key.to_owned(),
            EntryMeta {
                requires_user_presence: require_user_presence,
            },
        );
        self.persist_registry(&registry);
        Ok(())
    }

    /// Fetch the secret under `key`, or `None` if absent.
    pub fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_password() {
            Ok(hex_value) => {
                let value = hex::decode(&hex_value)
                    .with_context(|| format!("secret '{key}' is not hex"))?;
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) =>
                Err(anyhow::Error::new(err)
                    .context(format!("failed to read secret '{key}'"))),
        }
    }

    /// Delete the secret under `key`. Deleting an absent key is not an error.
    pub fn delete(&self, key: &str) -> anyhow::Result<()> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => (),
            Err(err) =>
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to delete secret '{key}'"))),
        }
        let mut registry = self.registry.lock().unwrap();
        registry.entries.remove(key);
        self.persist_registry(&registry);
        Ok(())
    }

    /// All stored keys starting with `prefix`, sorted.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.registry
            .lock()
            .unwrap()
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Whether reads of `key` are gated behind user presence.
    pub fn requires_user_presence(&self, key: &str) -> bool {
        self.registry
            .lock()
            .unwrap()
            .entries
            .get(key)
            .map(|meta| meta.requires_user_presence)
            .unwrap_or(false)
    }

    fn entry(&self, key: &str) -> anyhow::Result<keyring::Entry> {
        match &self.backend {
            Backend::Files { dir } => {
                let credential =
                    Box::new(FileCredential::new(dir.join(format!("{key}.secret"))));
                Ok(keyring::Entry::new_with_credential(credential))
            }
            #[cfg(feature = "keychain")]
            Backend::Keychain { service } => keyring::Entry::new(service, key)
                .with_context(|| format!("failed to open keychain entry '{key}'")),
        }
    }

    fn persist_registry(&self, registry: &Registry) {
        let bytes = serde_json::to_vec_pretty(registry)
            .expect("registry serialization is infallible");
        if let Err(err) = self.ffs.write(REGISTRY_JSON, &bytes) {
            warn!("failed to persist secret registry: {err}");
        }
    }
}

fn load_registry<F: Ffs>(ffs: &F) -> Registry {
    match ffs.read(REGISTRY_JSON) {
        Ok(buf) => match serde_json::from_slice(&buf) {
            Ok(registry) => registry,
            Err(err) => {
                warn!("corrupt secret registry, starting empty: {err}");
                Registry::default()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => Registry::default(),
        Err(err) => {
            warn!("failed to read secret registry, starting empty: {err}");
            Registry::default()
        }
    }
}

/// Keyring credential that stores one secret in one file.
struct FileCredential {
    path: PathBuf,
}

impl FileCredential {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn io_err_to_keyring_err(err: io::Error) -> keyring::Error {
    match err.kind() {
        io::ErrorKind::NotFound => keyring::Error::NoEntry,
        io::ErrorKind::PermissionDenied => keyring::Error::NoStorageAccess(err.into()),
        _ => keyring::Error::PlatformFailure(err.into()),
    }
}

impl CredentialApi for FileCredential {
    fn set_password(&self, password: &str) -> keyring::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err_to_keyring_err)?;
        }
        std::fs::write(&self.path, password.as_bytes()).map_err(io_err_to_keyring_err)
    }

    fn get_password(&self) -> keyring::Result<String> {
        let bytes = std::fs::read(&self.path).map_err(io_err_to_keyring_err)?;
        String::from_utf8(bytes).map_err(|err| keyring::Error::BadEncoding(err.into_bytes()))
    }

    fn delete_password(&self) -> keyring::Result<()> {
        std::fs::remove_file(&self.path).map_err(io_err_to_keyring_err)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ffs::FlatFileFs;

    fn temp_store() -> (tempfile::TempDir, SecretStore<FlatFileFs>) {
        let tmp = tempfile::tempdir().unwrap();
        let ffs = FlatFileFs::create_dir_all(tmp.path().join("registry")).unwrap();
        let store = SecretStore::file_backed(tmp.path().join("secrets"), ffs).unwrap();
        (tmp, store)
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let (_tmp, store) = temp_store();

        assert_eq!(store.get("wallet.master.seed").unwrap(), None);

        store.put("wallet.master.seed", &[1, 2, 3], false).unwrap();
        assert_eq!(
            store.get("wallet.master.seed").unwrap(),
            Some(vec![1, 2, 3]),
        );

        store.delete("wallet.master.seed").unwrap();
        assert_eq!(store.get("wallet.master.seed").unwrap(), None);

        // Deleting again is harmless.
        store.delete("wallet.master.seed").unwrap();
    }

    #[test]
    fn list_filters_by_prefix() {
        let (_tmp, store) = temp_store();
        store.put(&keys::mnemonic("alpha"), b"m1", true).unwrap();
        store.put(&keys::mnemonic("beta"), b"m2", false).unwrap();
        store.put(keys::MASTER_SEED, b"s", false).unwrap();

        assert_eq!(
            store.list("seed_"),
            vec!["seed_alpha".to_owned(), "seed_beta".to_owned()],
        );
        assert_eq!(store.list("wallet.master."), vec![keys::MASTER_SEED.to_owned()]);
        assert!(store.requires_user_presence("seed_alpha"));
        assert!(!store.requires_user_presence("seed_beta"));
    }

    #[test]
    fn registry_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let ffs = FlatFileFs::create_dir_all(tmp.path().join("registry")).unwrap();
            let store =
                SecretStore::file_backed(tmp.path().join("secrets"), ffs).unwrap();
            store.put("seed_gamma", b"abc", true).unwrap();
        }
        let ffs = FlatFileFs::create_dir_all(tmp.path().join("registry")).unwrap();
        let store = SecretStore::file_backed(tmp.path().join("secrets"), ffs).unwrap();
        assert_eq!(store.list("seed_"), vec!["seed_gamma".to_owned()]);
        assert!(store.requires_user_presence("seed_gamma"));
        assert_eq!(store.get("seed_gamma").unwrap(), Some(b"abc".to_vec()));
    }
}
