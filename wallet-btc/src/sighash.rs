//! BIP143 signature hashing for segwit v0 inputs.

use crate::{
    hashes::sha256d,
    tx::{write_varint, Transaction},
};

/// `SIGHASH_ALL`.
pub const SIGHASH_ALL: u32 = 0x01;

/// Compute the BIP143 `SIGHASH_ALL` digest for the P2WPKH input at
/// `input_index`.
///
/// `pubkey_hash` is the 20-byte hash160 of the key that owns the spent
/// output, and `value` the spent output's amount in sats; both are committed
/// to by the digest.
pub fn p2wpkh_sighash_all(
    tx: &Transaction,
    input_index: usize,
    pubkey_hash: &[u8; 20],
    value: u64,
) -> [u8; 32] {
    let hash_prevouts = {
        let mut buf = Vec::with_capacity(tx.inputs.len() * 36);
        for input in &tx.inputs {
            buf.extend_from_slice(&input.prev_txid.to_wire_bytes());
            buf.extend_from_slice(&input.vout.to_le_bytes());
        }
        sha256d(&buf)
    };

    let hash_sequence = {
        let mut buf = Vec::with_capacity(tx.inputs.len() * 4);
        for input in &tx.inputs {
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        sha256d(&buf)
    };

    let hash_outputs = {
        let mut buf = Vec::new();
        for output in &tx.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut buf, output.script_pubkey.len() as u64);
            buf.extend_from_slice(&output.script_pubkey);
        }
        sha256d(&buf)
    };

    // For P2WPKH the script code is the canonical P2PKH script over the same
    // key hash.
    let mut script_code = Vec::with_capacity(25);
    script_code.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script_code.extend_from_slice(pubkey_hash);
    script_code.extend_from_slice(&[0x88, 0xac]);

    let input = &tx.inputs[input_index];

    let mut preimage = Vec::with_capacity(156 + script_code.len());
    preimage.extend_from_slice(&(tx.version as u32).to_le_bytes());
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    preimage.extend_from_slice(&input.prev_txid.to_wire_bytes());
    preimage.extend_from_slice(&input.vout.to_le_bytes());
    write_varint(&mut preimage, script_code.len() as u64);
    preimage.extend_from_slice(&script_code);
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&tx.locktime.to_le_bytes());
    preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());

    sha256d(&preimage)
}
