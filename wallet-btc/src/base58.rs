//! Base58Check encoding and decoding.

use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Base58Error {
    #[error("invalid base58 character")]
    InvalidEncoding,
    #[error("base58check checksum mismatch")]
    InvalidChecksum,
    #[error("base58check payload has invalid length")]
    InvalidLength,
}

/// Encode `payload` with a leading `version` byte and a 4-byte sha256d
/// checksum.
pub fn encode_check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(version);
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

/// Decode a Base58Check string into its version byte and payload, verifying
/// the checksum.
pub fn decode_check(s: &str) -> Result<(u8, Vec<u8>), Base58Error> {
    let data = bs58::decode(s)
        .with_check(None)
        .into_vec()
        .map_err(|err| match err {
            bs58::decode::Error::InvalidCharacter { .. } => Base58Error::InvalidEncoding,
            bs58::decode::Error::NonAsciiCharacter { .. } => Base58Error::InvalidEncoding,
            bs58::decode::Error::InvalidChecksum { .. } => Base58Error::InvalidChecksum,
            bs58::decode::Error::NoChecksum => Base58Error::InvalidLength,
            bs58::decode::Error::BufferTooSmall => Base58Error::InvalidLength,
            _ => Base58Error::InvalidEncoding,
        })?;

    let (version, payload) = data.split_first().ok_or(Base58Error::InvalidLength)?;
    Ok((*version, payload.to_vec()))
}

#[cfg(test)]
mod test {
    use proptest::{collection::vec, prelude::any, proptest};

    use super::*;

    #[test]
    fn genesis_p2pkh_address() {
        // The genesis block coinbase payout address.
        let (version, payload) =
            decode_check("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap();
        assert_eq!(version, 0x00);
        assert_eq!(
            hex::encode(&payload),
            "62e907b15cbf27d5425399ebf6f0fb50ebb88f18",
        );
        assert_eq!(
            encode_check(version, &payload),
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
        );
    }

    #[test]
    fn rejects_non_alphabet_characters() {
        // '0', 'O', 'I', 'l' are not in the base58 alphabet.
        assert_eq!(
            decode_check("0OIl"),
            Err(Base58Error::InvalidEncoding),
        );
    }

    #[test]
    fn rejects_mutated_checksum() {
        let encoded = encode_check(0x00, &[0x42; 20]);
        let mut chars: Vec<char> = encoded.chars().collect();
        // Flip one character to a different alphabet character.
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let mutated: String = chars.into_iter().collect();
        assert_eq!(decode_check(&mutated), Err(Base58Error::InvalidChecksum));
    }

    #[test]
    fn rejects_too_short_input() {
        assert_eq!(decode_check(""), Err(Base58Error::InvalidLength));
        // Valid base58 but shorter than a checksum.
        assert_eq!(decode_check("z"), Err(Base58Error::InvalidLength));
    }

    proptest! {
        #[test]
        fn roundtrip(version in any::<u8>(), payload in vec(any::<u8>(), 0..64)) {
            let encoded = encode_check(version, &payload);
            let (version2, payload2) = decode_check(&encoded).unwrap();
            assert_eq!(version, version2);
            assert_eq!(payload, payload2);
        }
    }
}
