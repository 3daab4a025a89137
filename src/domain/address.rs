//! 地址编码
//!
//! - Hex：Keccak-256(未压缩公钥去掉 0x04) 的后 20 字节，EIP-55 大小写校验
//! - Bech32：P2WPKH（bc1q... / tb1q...）
//! - SolanaBase58：32 字节 ed25519 公钥的 Base58

use sha3::{Digest, Keccak256};

use crate::{
    domain::{
        chain_config::{AddressFormat, ChainConfig},
        keypair::PublicKey,
    },
    error::DerivationError,
};

/// 按链的地址格式编码公钥
pub fn encode(chain: &ChainConfig, public: &PublicKey) -> Result<String, DerivationError> {
    match (chain.address_format, public) {
        (AddressFormat::Hex, PublicKey::Secp256k1(key)) => {
            let uncompressed = key.to_encoded_point(false);
            Ok(evm_address(&uncompressed.as_bytes()[1..]))
        }
        (AddressFormat::Bech32, PublicKey::Secp256k1(_)) => {
            p2wpkh_address(&public.to_bytes(), bitcoin_network(chain))
        }
        (AddressFormat::SolanaBase58, PublicKey::Ed25519(key)) => {
            Ok(bs58::encode(key.to_bytes()).into_string())
        }
        (format, key) => Err(DerivationError::AddressEncoding(format!(
            "{format:?} cannot encode a {:?} key",
            key.curve()
        ))),
    }
}

pub fn bitcoin_network(chain: &ChainConfig) -> bitcoin::Network {
    if chain.is_testnet {
        bitcoin::Network::Testnet
    } else {
        bitcoin::Network::Bitcoin
    }
}

/// 64 字节未压缩公钥（不含前缀）→ EIP-55 地址
pub fn evm_address(uncompressed_xy: &[u8]) -> String {
    let hash = Keccak256::digest(uncompressed_xy);
    let mut raw = [0u8; 20];
    raw.copy_from_slice(&hash[12..]);
    to_checksum_address(&raw)
}

/// EIP-55 校验和编码
/// https://eips.ethereum.org/EIPS/eip-55
pub fn to_checksum_address(raw: &[u8; 20]) -> String {
    let lower = hex::encode(raw);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// 压缩公钥 → P2WPKH 地址
pub fn p2wpkh_address(
    compressed: &[u8],
    network: bitcoin::Network,
) -> Result<String, DerivationError> {
    use bitcoin::{secp256k1::PublicKey as Secp256k1PublicKey, Address, PublicKey};

    let secp_pubkey = Secp256k1PublicKey::from_slice(compressed)
        .map_err(|e| DerivationError::AddressEncoding(format!("invalid secp256k1 key: {e}")))?;
    let address = Address::p2wpkh(&PublicKey::new(secp_pubkey), network)
        .map_err(|e| DerivationError::AddressEncoding(e.to_string()))?;
    Ok(address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{chain_config::preset, keypair::KeyPair};

    #[test]
    fn test_eip55_known_addresses() {
        // EIP-55 规范中的示例
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let mut raw = [0u8; 20];
            raw.copy_from_slice(&hex::decode(&expected[2..].to_lowercase()).unwrap());
            assert_eq!(to_checksum_address(&raw), expected);
        }
    }

    #[test]
    fn test_curve_mismatch_is_rejected() {
        let pair = KeyPair::ed25519(ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]));
        let eth = preset("ethereum").unwrap();
        assert!(matches!(
            encode(&eth, pair.public_key()),
            Err(DerivationError::AddressEncoding(_))
        ));
    }

    #[test]
    fn test_bitcoin_network_prefix() {
        let key = k256::ecdsa::SigningKey::from_bytes(&[5u8; 32].into()).unwrap();
        let pair = KeyPair::secp256k1(key);
        let mainnet = encode(&preset("bitcoin").unwrap(), pair.public_key()).unwrap();
        let testnet = encode(&preset("bitcoin-testnet").unwrap(), pair.public_key()).unwrap();
        assert!(mainnet.starts_with("bc1q"));
        assert!(testnet.starts_with("tb1q"));
    }

    #[test]
    fn test_solana_address_is_base58_pubkey() {
        let secret = ed25519_dalek::SigningKey::from_bytes(&[8u8; 32]);
        let public = secret.verifying_key().to_bytes();
        let pair = KeyPair::ed25519(secret);
        let address = encode(&preset("solana").unwrap(), pair.public_key()).unwrap();
        assert_eq!(bs58::decode(&address).into_vec().unwrap(), public.to_vec());
    }
}
