//! Address parsing, formatting, and script template matching.
//!
//! Accepted on input: Base58Check P2PKH and P2SH, Bech32 P2WPKH and P2WSH,
//! Bech32m P2TR, on both networks. Script-to-address recognition covers the
//! same templates; anything else decodes to "no address".

use secp256k1::PublicKey;
use thiserror::Error;

use crate::{
    base58::{self, Base58Error},
    hashes::hash160,
    network::Network,
    segwit::{self, SegwitError},
};

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AddressError {
    #[error("unsupported or malformed address: {0}")]
    Unsupported(String),
    #[error("address is for the wrong network")]
    WrongNetwork,
    #[error(transparent)]
    Base58(#[from] Base58Error),
    #[error(transparent)]
    Segwit(#[from] SegwitError),
}

/// Build the P2WPKH scriptPubKey `OP_0 PUSH20 <hash160(pubkey)>`.
pub fn p2wpkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.push(0x00);
    script.push(0x14);
    script.extend_from_slice(pubkey_hash);
    script
}

/// BIP84: the bech32 P2WPKH address for a compressed public key.
pub fn p2wpkh_address(pubkey: &PublicKey, network: Network) -> String {
    let pkh = hash160(&pubkey.serialize());
    segwit::encode(network.hrp(), 0, &pkh)
        .expect("20-byte v0 program always encodes")
}

/// Decode any supported address into its scriptPubKey.
pub fn script_pubkey(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    // Segwit first: bech32 strings have an unambiguous HRP prefix.
    let lowered = address.to_lowercase();
    if lowered.starts_with("bc1") || lowered.starts_with("tb1") {
        let (hrp, version, program) = segwit::decode(address)?;
        if hrp != network.hrp() {
            return Err(AddressError::WrongNetwork);
        }
        let mut script = Vec::with_capacity(2 + program.len());
        match (version, program.len()) {
            // OP_0 <20>: P2WPKH, OP_0 <32>: P2WSH
            (0, 20) | (0, 32) => script.push(0x00),
            // OP_1 <32>: P2TR
            (1, 32) => script.push(0x51),
            _ => return Err(AddressError::Unsupported(address.to_owned())),
        }
        script.push(program.len() as u8);
        script.extend_from_slice(&program);
        return Ok(script);
    }

    let (version, payload) = base58::decode_check(address)?;
    if payload.len() != 20 {
        return Err(AddressError::Unsupported(address.to_owned()));
    }
    if version == network.p2pkh_version() {
        // OP_DUP OP_HASH160 PUSH20 <pkh> OP_EQUALVERIFY OP_CHECKSIG
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[0x76, 0xa9, 0x14]);
        script.extend_from_slice(&payload);
        script.extend_from_slice(&[0x88, 0xac]);
        Ok(script)
    } else if version == network.p2sh_version() {
        // OP_HASH160 PUSH20 <sh> OP_EQUAL
        let mut script = Vec::with_capacity(23);
        script.extend_from_slice(&[0xa9, 0x14]);
        script.extend_from_slice(&payload);
        script.push(0x87);
        Ok(script)
    } else {
        Err(AddressError::WrongNetwork)
    }
}

/// Recognize a scriptPubKey and render its address, if the script matches a
/// known template. First match wins; unknown scripts have no address.
pub fn address_from_script(script: &[u8], network: Network) -> Option<String> {
    match script {
        // OP_0 PUSH20: P2WPKH
        [0x00, 0x14, program @ ..] if program.len() == 20 =>
            segwit::encode(network.hrp(), 0, program).ok(),
        // OP_1 PUSH32: P2TR
        [0x51, 0x20, program @ ..] if program.len() == 32 =>
            segwit::encode(network.hrp(), 1, program).ok(),
        // OP_DUP OP_HASH160 PUSH20 .. OP_EQUALVERIFY OP_CHECKSIG: P2PKH
        [0x76, 0xa9, 0x14, rest @ ..] if rest.len() == 22 && rest[20..] == [0x88, 0xac] =>
            Some(base58::encode_check(network.p2pkh_version(), &rest[..20])),
        // OP_HASH160 PUSH20 .. OP_EQUAL: P2SH
        [0xa9, 0x14, rest @ ..] if rest.len() == 21 && rest[20] == 0x87 =>
            Some(base58::encode_check(network.p2sh_version(), &rest[..20])),
        // OP_0 PUSH32: P2WSH
        [0x00, 0x20, program @ ..] if program.len() == 32 =>
            segwit::encode(network.hrp(), 0, program).ok(),
        _ => None,
    }
}
