//! Segwit address encoding per BIP173 (Bech32, v0) and BIP350 (Bech32m, v1+).

use bech32::{primitives::decode::SegwitHrpstringError, Fe32, Hrp};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SegwitError {
    #[error("invalid bech32 string")]
    InvalidEncoding,
    #[error("bech32 checksum mismatch")]
    InvalidChecksum,
    #[error("invalid witness program length")]
    InvalidLength,
    #[error("invalid witness version")]
    InvalidVersion,
}

/// Encode `(hrp, version, program)` as a segwit address. Version 0 uses the
/// Bech32 checksum, versions 1+ use Bech32m. The program must be 20 or 32
/// bytes for v0; 2..=40 bytes otherwise.
pub fn encode(hrp: &str, version: u8, program: &[u8]) -> Result<String, SegwitError> {
    if version > 16 {
        return Err(SegwitError::InvalidVersion);
    }
    if version == 0 && program.len() != 20 && program.len() != 32 {
        return Err(SegwitError::InvalidLength);
    }
    if program.len() < 2 || program.len() > 40 {
        return Err(SegwitError::InvalidLength);
    }

    let hrp = Hrp::parse(hrp).map_err(|_| SegwitError::InvalidEncoding)?;
    let version = Fe32::try_from(version).map_err(|_| SegwitError::InvalidVersion)?;
    bech32::segwit::encode(hrp, version, program).map_err(|_| SegwitError::InvalidEncoding)
}

/// Decode a segwit address into `(hrp, version, program)`, verifying the
/// checksum variant required by the witness version.
pub fn decode(address: &str) -> Result<(String, u8, Vec<u8>), SegwitError> {
    let (hrp, version, program) = bech32::segwit::decode(address)
        .map_err(|err| classify(&err.0))?;
    Ok((hrp.to_string().to_lowercase(), version.to_u8(), program))
}

fn classify(err: &SegwitHrpstringError) -> SegwitError {
    match err {
        SegwitHrpstringError::Checksum(_) => SegwitError::InvalidChecksum,
        SegwitHrpstringError::WitnessLength(_) => SegwitError::InvalidLength,
        SegwitHrpstringError::NoData => SegwitError::InvalidLength,
        SegwitHrpstringError::InvalidWitnessVersion(_) => SegwitError::InvalidVersion,
        _ => SegwitError::InvalidEncoding,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bip173_v0_vector() {
        // BIP173 reference P2WPKH address.
        let program = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        let addr = encode("bc", 0, &program).unwrap();
        assert_eq!(addr, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");

        let (hrp, version, program2) = decode(&addr).unwrap();
        assert_eq!(hrp, "bc");
        assert_eq!(version, 0);
        assert_eq!(program2, program);
    }

    #[test]
    fn bip350_v1_vector() {
        // BIP350 reference Bech32m address (v1, 32-byte program).
        let program = hex::decode(
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        let addr = encode("bc", 1, &program).unwrap();
        assert_eq!(
            addr,
            "bc1pw508d6qejxtdg4y5r3zarvary0c5xw7kw508d6qejxtdg4y5r3zarvary0c5xw7kt5nd6y",
        );

        let (_, version, program2) = decode(&addr).unwrap();
        assert_eq!(version, 1);
        assert_eq!(program2, program);
    }

    #[test]
    fn v0_program_length_is_restricted() {
        assert_eq!(encode("bc", 0, &[0u8; 25]), Err(SegwitError::InvalidLength));
        assert!(encode("bc", 0, &[0u8; 20]).is_ok());
        assert!(encode("bc", 0, &[0u8; 32]).is_ok());
    }

    #[test]
    fn v0_must_use_bech32_checksum() {
        // BIP350 test vector: a v0 program encoded with the Bech32m checksum
        // must be rejected.
        let err = decode("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kemeawh").unwrap_err();
        assert!(matches!(
            err,
            SegwitError::InvalidChecksum | SegwitError::InvalidEncoding
        ));
    }

    #[test]
    fn mutated_character_fails_checksum() {
        let err = decode("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t5").unwrap_err();
        assert!(matches!(
            err,
            SegwitError::InvalidChecksum | SegwitError::InvalidEncoding
        ));
    }

    #[test]
    fn testnet_hrp_roundtrip() {
        let program = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        let addr = encode("tb", 0, &program).unwrap();
        let (hrp, _, _) = decode(&addr).unwrap();
        assert_eq!(hrp, "tb");
    }
}
