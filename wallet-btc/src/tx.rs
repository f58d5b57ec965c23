//! Transaction model, raw decoding, and serialization.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::hashes::sha256d;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid transaction hex")]
    InvalidHex,
    #[error("transaction data ended unexpectedly")]
    OutOfBounds,
    #[error("trailing bytes after transaction")]
    TrailingData,
}

/// A transaction id, held in display byte order (the reverse of the wire
/// order the hash is computed in). `Ord` therefore matches the ordering of
/// the familiar hex string.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Txid([u8; 32]);

impl Txid {
    pub fn from_display_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// From the byte order transactions serialize prevout references in.
    pub fn from_wire_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    pub fn to_wire_bytes(self) -> [u8; 32] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({self})")
    }
}

impl FromStr for Txid {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| DecodeError::InvalidHex)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| DecodeError::InvalidHex)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prev_txid: Txid,
    pub vout: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    /// Witness stack; empty for non-segwit inputs.
    pub witness: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub locktime: u32,
}

impl Transaction {
    /// Decode a raw transaction from hex.
    pub fn decode_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(s.trim()).map_err(|_| DecodeError::InvalidHex)?;
        Self::decode(&bytes)
    }

    /// Decode a raw transaction, segwit marker/flag aware.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);

        let version = r.read_u32_le()? as i32;

        // A segwit tx puts `marker=0x00 flag=0x01` between version and the
        // input count. A zero input count is not a valid legacy tx, so a
        // leading zero byte reliably signals the marker.
        let mut segwit = false;
        if r.peek()? == 0x00 {
            r.read_u8()?;
            if r.read_u8()? != 0x01 {
                return Err(DecodeError::InvalidHex);
            }
            segwit = true;
        }

        let vin_count = r.read_varint()?;
        let mut inputs = Vec::with_capacity(usize_from(vin_count)?);
        for _ in 0..vin_count {
            let prev = r.read_array::<32>()?;
            let prev_txid = Txid::from_wire_bytes(prev);
            let vout = r.read_u32_le()?;
            let script_len = r.read_varint()?;
            let script_sig = r.read_exact(usize_from(script_len)?)?.to_vec();
            let sequence = r.read_u32_le()?;
            inputs.push(TxIn {
                prev_txid,
                vout,
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let vout_count = r.read_varint()?;
        let mut outputs = Vec::with_capacity(usize_from(vout_count)?);
        for _ in 0..vout_count {
            let value = r.read_u64_le()?;
            let script_len = r.read_varint()?;
            let script_pubkey = r.read_exact(usize_from(script_len)?)?.to_vec();
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        if segwit {
            for input in &mut inputs {
                let item_count = r.read_varint()?;
                let mut witness = Vec::with_capacity(usize_from(item_count)?);
                for _ in 0..item_count {
                    let item_len = r.read_varint()?;
                    witness.push(r.read_exact(usize_from(item_len)?)?.to_vec());
                }
                input.witness = witness;
            }
        }

        let locktime = r.read_u32_le()?;

        if !r.is_empty() {
            return Err(DecodeError::TrailingData);
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    /// Full serialization; includes the witness section iff any input carries
    /// a witness.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_inner(self.has_witness())
    }

    /// Witness-stripped serialization; this is what the txid commits to.
    pub fn serialize_base(&self) -> Vec<u8> {
        self.serialize_inner(false)
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    fn serialize_inner(&self, witness: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&(self.version as u32).to_le_bytes());

        if witness {
            out.push(0x00);
            out.push(0x01);
        }

        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prev_txid.to_wire_bytes());
            out.extend_from_slice(&input.vout.to_le_bytes());
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }

        if witness {
            for input in &self.inputs {
                write_varint(&mut out, input.witness.len() as u64);
                for item in &input.witness {
                    write_varint(&mut out, item.len() as u64);
                    out.extend_from_slice(item);
                }
            }
        }

        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    pub fn txid(&self) -> Txid {
        Txid::from_wire_bytes(sha256d(&self.serialize_base()))
    }

    /// BIP141 weight: base size counts four times, witness bytes once.
    pub fn weight(&self) -> usize {
        let base = self.serialize_base().len();
        let total = self.serialize().len();
        base * 3 + total
    }

    /// Virtual size: weight / 4, rounded up.
    pub fn vsize(&self) -> u64 {
        (self.weight() as u64 + 3) / 4
    }

    /// Sum of output values, in sats.
    pub fn total_out(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

fn usize_from(value: u64) -> Result<usize, DecodeError> {
    usize::try_from(value).map_err(|_| DecodeError::OutOfBounds)
}

pub(crate) fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.buf.get(self.pos).copied().ok_or(DecodeError::OutOfBounds)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::OutOfBounds)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::OutOfBounds)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let slice = self.read_exact(N)?;
        Ok(slice.try_into().expect("read_exact returned N bytes"))
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let first = self.read_u8()?;
        match first {
            0xfd => Ok(u64::from(u16::from_le_bytes(self.read_array()?))),
            0xfe => Ok(u64::from(u32::from_le_bytes(self.read_array()?))),
            0xff => Ok(u64::from_le_bytes(self.read_array()?)),
            byte => Ok(u64::from(byte)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// The first bitcoin-to-bitcoin transfer ever made, from block 170.
    const BLOCK_170_TX: &str = "0100000001c997a5e56e104102fa209c6a852dd90660a20b2d9c352423edce25857fcd3704000000004847304402204e45e16932b8af514961a1d3a1a25fd095e186f10288024700d86302dbcf8701022018152f28925b620249f22f22f30cd2241d4a377cd66b25c2b1d9dd4cd1f1dcae01ffffffff0200ca9a3b00000000434104ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84cac00286bee0000000043410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac00000000";

    /// The BIP143 "native P2WPKH" example, fully signed.
    const BIP143_SIGNED_TX: &str = "01000000000102fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f00000000494830450221008b9d1dc26ba6a9cb62127b02742fa9d754cd3bebf337f7a55d114c8e5cdd30be022040529b194ba3f9281a99f2b1c0a19c0489bc22ede944ccf4ecbab4cc618ef3ed01eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac000247304402203609e17b84f6a7d30c80bfa610b5b4542f32a8a0d5447a12fb1366d7f01cc44a0220573a954c4518331561406f90300e8f3358f51928d43c212a8caed02de67eebee0121025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee635711000000";

    #[test]
    fn decode_legacy_tx() {
        let tx = Transaction::decode_hex(BLOCK_170_TX).unwrap();
        assert_eq!(tx.version, 1);
        assert_eq!(tx.locktime, 0);

        assert_eq!(tx.inputs.len(), 1);
        let input = &tx.inputs[0];
        assert_eq!(
            input.prev_txid.to_string(),
            "0437cd7f8525ceed2324359c2d0ba26006d92d856a9c20fa0241106ee5a597c9",
        );
        assert_eq!(input.vout, 0);
        assert_eq!(input.sequence, 0xffff_ffff);
        assert!(input.witness.is_empty());

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 10_0000_0000);
        assert_eq!(tx.outputs[1].value, 40_0000_0000);

        assert_eq!(
            tx.txid().to_string(),
            "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16",
        );
    }

    #[test]
    fn legacy_tx_reencodes_byte_for_byte() {
        let raw = hex::decode(BLOCK_170_TX).unwrap();
        let tx = Transaction::decode(&raw).unwrap();
        assert_eq!(tx.serialize(), raw);
    }

    #[test]
    fn decode_segwit_tx() {
        let tx = Transaction::decode_hex(BIP143_SIGNED_TX).unwrap();
        assert_eq!(tx.version, 1);
        assert_eq!(tx.locktime, 17);
        assert_eq!(tx.inputs.len(), 2);

        // First input is legacy-signed: no witness.
        assert!(tx.inputs[0].witness.is_empty());
        assert_eq!(tx.inputs[0].sequence, 0xffff_ffee);

        // Second input is the native P2WPKH spend: [signature, pubkey].
        let witness = &tx.inputs[1].witness;
        assert_eq!(witness.len(), 2);
        assert_eq!(witness[0].len(), 71);
        assert_eq!(witness[1].len(), 33);
        assert!(tx.inputs[1].script_sig.is_empty());

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 112_340_000);
        assert_eq!(tx.outputs[1].value, 223_450_000);
    }

    #[test]
    fn segwit_tx_reencodes_byte_for_byte() {
        let raw = hex::decode(BIP143_SIGNED_TX).unwrap();
        let tx = Transaction::decode(&raw).unwrap();
        assert!(tx.has_witness());
        assert_eq!(tx.serialize(), raw);

        // The witness-stripped encoding is strictly shorter and changes the
        // length but not the txid inputs commit to.
        assert!(tx.serialize_base().len() < raw.len());
    }

    #[test]
    fn truncated_input_fails() {
        let raw = hex::decode(BLOCK_170_TX).unwrap();
        for cut in [0, 3, 4, 40, raw.len() - 1] {
            assert_eq!(
                Transaction::decode(&raw[..cut]),
                Err(DecodeError::OutOfBounds),
            );
        }
    }

    #[test]
    fn trailing_garbage_fails() {
        let mut raw = hex::decode(BLOCK_170_TX).unwrap();
        raw.push(0x00);
        assert_eq!(Transaction::decode(&raw), Err(DecodeError::TrailingData));
    }

    #[test]
    fn non_hex_fails() {
        assert_eq!(
            Transaction::decode_hex("zzzz"),
            Err(DecodeError::InvalidHex),
        );
    }

    #[test]
    fn varint_boundaries_roundtrip() {
        for value in [0_u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut r = Reader::new(&buf);
            assert_eq!(r.read_varint().unwrap(), value);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn txid_display_order_and_parse() {
        let txid = Txid::from_str(
            "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16",
        )
        .unwrap();
        assert_eq!(txid.to_wire_bytes()[0], 0x16);
        assert_eq!(
            serde_json::to_string(&txid).unwrap(),
            "\"f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16\"",
        );
        let back: Txid = serde_json::from_str(
            "\"f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16\"",
        )
        .unwrap();
        assert_eq!(back, txid);
    }
}
