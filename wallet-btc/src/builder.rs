//! P2WPKH spend construction: coin selection, fee estimation, signing.

use secp256k1::SecretKey;
use thiserror::Error;

use crate::{
    address::{self, AddressError},
    hashes::hash160,
    keys,
    network::Network,
    sighash,
    tx::{Transaction, TxIn, TxOut, Txid},
    DUST_LIMIT_SATS,
};

/// Inputs sign with this sequence: final enough to confirm, below `0xFFFFFFFE`
/// so locktime stays enforceable.
const SPEND_SEQUENCE: u32 = 0xffff_fffd;

/// Weight of one P2WPKH witness (`[sig||hashtype, pubkey]`), assuming a
/// 72-byte DER signature.
const P2WPKH_WITNESS_BYTES: usize = 108;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BuildError {
    #[error("send amount {0} sats is below the dust limit")]
    BelowDust(u64),
    #[error("insufficient funds: {available} sats available, {required} sats required")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("fee rate must be a positive finite number")]
    InvalidFeeRate,
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// A confirmed P2WPKH output this wallet can spend, paired with the derived
/// key that owns it.
#[derive(Clone)]
pub struct SpendableUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub secret: SecretKey,
}

/// A fully signed spend, ready to broadcast.
#[derive(Debug)]
pub struct SignedSpend {
    pub tx: Transaction,
    pub fee_sats: u64,
    pub vbytes: u64,
    pub change_sats: u64,
}

/// Select UTXOs greedily (largest first) to cover `amount_sats` plus the fee
/// at `fee_rate_sat_vb`, pay any change of at least the dust limit to
/// `change_address`, and sign every input per BIP143.
pub fn build_spend(
    network: Network,
    recipient: &str,
    amount_sats: u64,
    fee_rate_sat_vb: f64,
    utxos: &[SpendableUtxo],
    change_address: &str,
) -> Result<SignedSpend, BuildError> {
    if amount_sats < DUST_LIMIT_SATS {
        return Err(BuildError::BelowDust(amount_sats));
    }
    if !fee_rate_sat_vb.is_finite() || fee_rate_sat_vb <= 0.0 {
        return Err(BuildError::InvalidFeeRate);
    }

    let recipient_spk = address::script_pubkey(recipient, network)?;
    let change_spk = address::script_pubkey(change_address, network)?;

    let available: u64 = utxos.iter().map(|u| u.value).sum();

    // Largest-first selection keeps the input count (and the fee) small.
    let mut sorted: Vec<&SpendableUtxo> = utxos.iter().collect();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected: Vec<&SpendableUtxo> = Vec::new();
    let mut value_in = 0_u64;
    let mut fee_with_change = 0_u64;
    let mut covered = false;
    for utxo in sorted {
        selected.push(utxo);
        value_in += utxo.value;

        let vbytes =
            estimate_vbytes(selected.len(), &[&recipient_spk, &change_spk]);
        fee_with_change = fee_for(fee_rate_sat_vb, vbytes);

        if value_in >= amount_sats.saturating_add(fee_with_change) {
            covered = true;
            break;
        }
    }

    if !covered {
        return Err(BuildError::InsufficientFunds {
            available,
            required: amount_sats.saturating_add(fee_with_change),
        });
    }

    // Sub-dust change is not worth an output; fold it into the fee.
    let change_sats = value_in - amount_sats - fee_with_change;
    let (outputs, fee_sats, change_sats) = if change_sats >= DUST_LIMIT_SATS {
        let outputs = vec![
            TxOut {
                value: amount_sats,
                script_pubkey: recipient_spk,
            },
            TxOut {
                value: change_sats,
                script_pubkey: change_spk,
            },
        ];
        (outputs, fee_with_change, change_sats)
    } else {
        let outputs = vec![TxOut {
            value: amount_sats,
            script_pubkey: recipient_spk,
        }];
        (outputs, value_in - amount_sats, 0)
    };

    let mut tx = Transaction {
        version: 2,
        inputs: selected
            .iter()
            .map(|utxo| TxIn {
                prev_txid: utxo.txid,
                vout: utxo.vout,
                script_sig: Vec::new(),
                sequence: SPEND_SEQUENCE,
                witness: Vec::new(),
            })
            .collect(),
        outputs,
        locktime: 0,
    };

    // BIP143 commits to fields only, never to witness data, so signing
    // inputs one at a time is order-independent.
    for (index, utxo) in selected.iter().enumerate() {
        let public = keys::public_key(&utxo.secret);
        let compressed = keys::compressed(&public);
        let pubkey_hash = hash160(&compressed);

        let digest = sighash::p2wpkh_sighash_all(&tx, index, &pubkey_hash, utxo.value);
        let mut signature = keys::sign_ecdsa(&utxo.secret, digest);
        signature.push(sighash::SIGHASH_ALL as u8);

        tx.inputs[index].witness = vec![signature, compressed.to_vec()];
    }

    let vbytes = tx.vsize();
    Ok(SignedSpend {
        tx,
        fee_sats,
        vbytes,
        change_sats,
    })
}

/// Estimated virtual size of a spend with `n_inputs` P2WPKH inputs and the
/// given output scripts, using BIP141 weight/4 math and 72-byte signatures.
fn estimate_vbytes(n_inputs: usize, output_spks: &[&Vec<u8>]) -> u64 {
    // version + input count + inputs + output count + outputs + locktime.
    let base = 4
        + varint_len(n_inputs as u64)
        + n_inputs * (32 + 4 + 1 + 4)
        + varint_len(output_spks.len() as u64)
        + output_spks
            .iter()
            .map(|spk| 8 + varint_len(spk.len() as u64) + spk.len())
            .sum::<usize>()
        + 4;
    // marker + flag + one witness stack per input.
    let witness = 2 + n_inputs * P2WPKH_WITNESS_BYTES;

    let weight = base * 4 + witness;
    (weight as u64 + 3) / 4
}

fn fee_for(fee_rate_sat_vb: f64, vbytes: u64) -> u64 {
    (fee_rate_sat_vb * vbytes as f64).ceil() as u64
}

fn varint_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
