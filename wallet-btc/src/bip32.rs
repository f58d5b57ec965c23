//! BIP32 hierarchical deterministic key derivation.

use std::{fmt, str::FromStr};

use secp256k1::{PublicKey, Scalar, SecretKey, SECP256K1};
use thiserror::Error;

use crate::hashes::hmac_sha512;

/// First hardened child index (`2^31`).
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DerivationError {
    #[error("seed must be 16..=64 bytes")]
    InvalidSeed,
    #[error("seed produced invalid master key material")]
    InvalidMasterKey,
    #[error("derived child key is invalid, retry with the next index")]
    InvalidChildKey,
    #[error("invalid derivation path: {0}")]
    InvalidPath(String),
    #[error("cannot derive a hardened child from a public key")]
    HardenedFromPublic,
}

/// An extended private key: a secp256k1 secret plus the BIP32 chain code.
#[derive(Clone)]
pub struct Xpriv {
    pub depth: u8,
    pub child_number: u32,
    pub chain_code: [u8; 32],
    secret: SecretKey,
}

/// An extended public key; supports non-hardened child derivation only.
#[derive(Clone)]
pub struct Xpub {
    pub depth: u8,
    pub child_number: u32,
    pub chain_code: [u8; 32],
    pub public: PublicKey,
}

impl Xpriv {
    /// Derive the master key from a BIP39 seed:
    /// `I = HMAC-SHA512("Bitcoin seed", seed)`, left half = key, right half =
    /// chain code.
    pub fn master(seed: &[u8]) -> Result<Self, DerivationError> {
        if seed.len() < 16 || seed.len() > 64 {
            return Err(DerivationError::InvalidSeed);
        }
        let i = hmac_sha512(b"Bitcoin seed", seed);
        let (il, ir) = i.split_at(32);
        let secret =
            SecretKey::from_slice(il).map_err(|_| DerivationError::InvalidMasterKey)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);
        Ok(Self {
            depth: 0,
            child_number: 0,
            chain_code,
            secret,
        })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key(&SECP256K1)
    }

    pub fn to_xpub(&self) -> Xpub {
        Xpub {
            depth: self.depth,
            child_number: self.child_number,
            chain_code: self.chain_code,
            public: self.public_key(),
        }
    }

    /// CKDpriv: derive the child private key at `index`.
    ///
    /// Hardened children (`index >= 2^31`) commit to the parent private key,
    /// normal children to the parent public key. The negligible chance that
    /// the tweaked key falls outside the group order surfaces as
    /// [`DerivationError::InvalidChildKey`]; per BIP32 the caller proceeds
    /// with the next index.
    pub fn ckd_priv(&self, index: u32) -> Result<Self, DerivationError> {
        let mut data = Vec::with_capacity(37);
        if index >= HARDENED_OFFSET {
            data.push(0x00);
            data.extend_from_slice(&self.secret.secret_bytes());
        } else {
            data.extend_from_slice(&self.public_key().serialize());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let i = hmac_sha512(&self.chain_code, &data);
        let (il, ir) = i.split_at(32);

        let tweak = scalar_from_slice(il)?;
        let secret = self
            .secret
            .add_tweak(&tweak)
            .map_err(|_| DerivationError::InvalidChildKey)?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);

        Ok(Self {
            depth: self.depth.wrapping_add(1),
            child_number: index,
            chain_code,
            secret,
        })
    }

    /// Derive sequentially along a full path.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, DerivationError> {
        let mut key = self.clone();
        for index in path.iter() {
            key = key.ckd_priv(index)?;
        }
        Ok(key)
    }
}

// Keep key material out of Debug output.
impl fmt::Debug for Xpriv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xpriv")
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .finish_non_exhaustive()
    }
}

impl Xpub {
    /// CKDpub: derive the child public key at a non-hardened `index`.
    pub fn ckd_pub(&self, index: u32) -> Result<Self, DerivationError> {
        if index >= HARDENED_OFFSET {
            return Err(DerivationError::HardenedFromPublic);
        }
        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&self.public.serialize());
        data.extend_from_slice(&index.to_be_bytes());

        let i = hmac_sha512(&self.chain_code, &data);
        let (il, ir) = i.split_at(32);

        let tweak = scalar_from_slice(il)?;
        let public = self
            .public
            .add_exp_tweak(&SECP256K1, &tweak)
            .map_err(|_| DerivationError::InvalidChildKey)?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);

        Ok(Self {
            depth: self.depth.wrapping_add(1),
            child_number: index,
            chain_code,
            public,
        })
    }
}

fn scalar_from_slice(il: &[u8]) -> Result<Scalar, DerivationError> {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(il);
    // Rejects I_L >= n.
    Scalar::from_be_bytes(bytes).map_err(|_| DerivationError::InvalidChildKey)
}

/// A parsed BIP32 derivation path like `m/84'/0'/0'/0/0`.
/// `'` (or `h`) marks hardened components.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a child index.
    pub fn child(&self, index: u32) -> Self {
        let mut components = self.0.clone();
        components.push(index);
        Self(components)
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DerivationError::InvalidPath(s.to_owned());

        let mut parts = s.split('/');
        match parts.next() {
            Some("m") | Some("M") => (),
            _ => return Err(invalid()),
        }

        let mut components = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix(['\'', 'h']) {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            let index: u32 = digits.parse().map_err(|_| invalid())?;
            if index >= HARDENED_OFFSET {
                return Err(invalid());
            }
            components.push(if hardened { index + HARDENED_OFFSET } else { index });
        }
        Ok(Self(components))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.0 {
            if *component >= HARDENED_OFFSET {
                write!(f, "/{}'", component - HARDENED_OFFSET)?;
            } else {
                write!(f, "/{component}")?;
            }
        }
        Ok(())
    }
}
