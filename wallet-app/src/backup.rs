//! Password-encrypted backup of the secret store.
//!
//! Export format: `salt(32) || nonce(12) || ciphertext+tag`. The AEAD key is
//! PBKDF2-HMAC-SHA256(password, salt, 100_000 iterations, 32 bytes) and the
//! cipher AES-256-GCM, with the salt bound as AAD. The plaintext is the
//! JSON-serialized map of every stored entry.

use std::{collections::BTreeMap, num::NonZeroU32};

use anyhow::Context;
use rand::RngCore;
use ring::{aead, pbkdf2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ffs::Ffs, secret_store::SecretStore};

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum BackupError {
    /// Deliberately opaque: a wrong password and a corrupted file are
    /// indistinguishable by design, nothing about which entry failed leaks.
    #[error("wrong password or corrupt backup")]
    BadPasswordOrCorrupt,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Serialize, Deserialize)]
struct BackupEntry {
    requires_user_presence: bool,
    value_hex: String,
}

/// Export every stored secret, encrypted under `password`.
pub fn export<F: Ffs>(
    store: &SecretStore<F>,
    password: &str,
) -> Result<Vec<u8>, BackupError> {
    let mut entries = BTreeMap::new();
    for key in store.list("") {
        let value = store
            .get(&key)
            .with_context(|| format!("failed to read '{key}' for backup"))?
            .unwrap_or_default();
        entries.insert(
            key.clone(),
            BackupEntry {
                requires_user_presence: store.requires_user_presence(&key),
                value_hex: hex::encode(value),
            },
        );
    }
    let plaintext =
        serde_json::to_vec(&entries).context("failed to serialize backup")?;

    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext;
    key.seal_in_place_append_tag(nonce, aead::Aad::from(&salt), &mut in_out)
        .map_err(|_| BackupError::BadPasswordOrCorrupt)?;

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + in_out.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Import a backup produced by [`export`], restoring every entry.
pub fn import<F: Ffs>(
    store: &SecretStore<F>,
    password: &str,
    backup: &[u8],
) -> Result<usize, BackupError> {
    if backup.len() < SALT_LEN + NONCE_LEN + aead::AES_256_GCM.tag_len() {
        return Err(BackupError::BadPasswordOrCorrupt);
    }
    let (salt, rest) = backup.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let salt: [u8; SALT_LEN] = salt.try_into().expect("length checked");
    let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes.try_into().expect("length checked");

    let key = derive_key(password, &salt);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, aead::Aad::from(&salt), &mut in_out)
        .map_err(|_| BackupError::BadPasswordOrCorrupt)?;

    let entries: BTreeMap<String, BackupEntry> = serde_json::from_slice(plaintext)
        .map_err(|_| BackupError::BadPasswordOrCorrupt)?;

    let count = entries.len();
    for (key, entry) in entries {
        let value = hex::decode(&entry.value_hex)
            .map_err(|_| BackupError::BadPasswordOrCorrupt)?;
        store
            .put(&key, &value, entry.requires_user_presence)
            .with_context(|| format!("failed to restore '{key}'"))?;
    }
    Ok(count)
}

fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> aead::LessSafeKey {
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).expect("nonzero");
    let mut key_bytes = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut key_bytes,
    );
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .expect("32-byte AES-256 key");
    aead::LessSafeKey::new(unbound)
}
