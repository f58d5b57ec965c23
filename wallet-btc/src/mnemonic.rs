//! BIP39 mnemonic phrases.
//!
//! Wraps the `bip39` crate with an error taxonomy the UI can act on when
//! guiding a user through a mistyped import: wrong word count vs. an unknown
//! word vs. a checksum failure.

use std::{fmt, str::FromStr};

use rand::RngCore;
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MnemonicError {
    #[error("invalid word count: {0} (expected 12, 15, 18, 21 or 24)")]
    InvalidWordCount(usize),
    #[error("unknown mnemonic word: \"{0}\"")]
    InvalidWord(String),
    #[error("mnemonic checksum mismatch")]
    InvalidChecksum,
    #[error("invalid mnemonic: {0}")]
    Other(String),
}

/// A validated BIP39 mnemonic phrase.
#[derive(Clone, PartialEq)]
pub struct Mnemonic(bip39::Mnemonic);

impl Mnemonic {
    /// Generate a fresh mnemonic from OS randomness.
    /// `word_count` must be one of 12, 15, 18, 21, 24.
    pub fn generate(word_count: usize) -> Result<Self, MnemonicError> {
        let entropy_len = match word_count {
            12 => 16,
            15 => 20,
            18 => 24,
            21 => 28,
            24 => 32,
            n => return Err(MnemonicError::InvalidWordCount(n)),
        };
        let mut entropy = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut entropy[..entropy_len]);
        let inner = bip39::Mnemonic::from_entropy(&entropy[..entropy_len])
            .map_err(|err| MnemonicError::Other(err.to_string()))?;
        Ok(Self(inner))
    }

    /// Derive the 64-byte BIP39 seed:
    /// `PBKDF2-HMAC-SHA512(mnemonic, "mnemonic" + passphrase, 2048, 64)`.
    pub fn seed(&self, passphrase: &str) -> [u8; 64] {
        self.0.to_seed(passphrase)
    }

    pub fn word_count(&self) -> usize {
        self.0.word_count()
    }

    /// The space-joined phrase. Secret material; avoid logging.
    pub fn phrase(&self) -> String {
        self.0.to_string()
    }
}

impl FromStr for Mnemonic {
    type Err = MnemonicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // BIP39 requires NFKD + lowercase before wordlist lookup; the bip39
        // crate normalizes to NFKD but expects lowercase words.
        let normalized = s.trim().to_lowercase();

        let words: Vec<&str> = normalized.split_whitespace().collect();
        if !matches!(words.len(), 12 | 15 | 18 | 21 | 24) {
            return Err(MnemonicError::InvalidWordCount(words.len()));
        }

        bip39::Mnemonic::parse(&normalized)
            .map(Self)
            .map_err(|err| match err {
                bip39::Error::BadWordCount(n) => MnemonicError::InvalidWordCount(n),
                bip39::Error::UnknownWord(index) => MnemonicError::InvalidWord(
                    words.get(index).copied().unwrap_or_default().to_owned(),
                ),
                bip39::Error::InvalidChecksum => MnemonicError::InvalidChecksum,
                other => MnemonicError::Other(other.to_string()),
            })
    }
}

// Never print the phrase through Debug.
impl fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mnemonic({} words)", self.word_count())
    }
}
