//! Electrum script hashes.
//!
//! Electrum keys subscriptions and queries by the SHA-256 of an output's
//! scriptPubKey with the digest byte-reversed, hex-encoded.

use wallet_btc::{
    address::{self, AddressError},
    hashes::sha256,
    Network,
};

/// Script hash of a raw scriptPubKey.
pub fn of_script(script_pubkey: &[u8]) -> String {
    let mut digest = sha256(script_pubkey);
    digest.reverse();
    hex::encode(digest)
}

/// Script hash of any supported address form (P2PKH, P2SH, P2WPKH, P2WSH,
/// P2TR).
pub fn of_address(address: &str, network: Network) -> Result<String, AddressError> {
    let script_pubkey = address::script_pubkey(address, network)?;
    Ok(of_script(&script_pubkey))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_p2wpkh_scripthash() {
        // The scriptPubKey behind this address is fixed by BIP173; the
        // script hash is the byte-reversed sha256 of it.
        let spk = hex::decode("0014751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        let mut expected = sha256(&spk);
        expected.reverse();

        let computed =
            of_address("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx", Network::Testnet)
                .unwrap();
        assert_eq!(computed, hex::encode(expected));
        assert_eq!(computed.len(), 64);
    }

    #[test]
    fn reversal_changes_the_digest() {
        let spk = hex::decode("0014751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        assert_ne!(of_script(&spk), hex::encode(sha256(&spk)));
    }

    #[test]
    fn base58_addresses_hash_too() {
        let sh = of_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Mainnet)
            .unwrap();
        assert_eq!(sh.len(), 64);
    }
}
