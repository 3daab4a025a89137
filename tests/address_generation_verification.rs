//! 地址生成算法验证测试
//!
//! 使用 BIP39 标准测试向量验证地址生成结果，并与 coins-bip32 参考实现交叉校验

mod common;

use coins_bip32::xkeys::{Parent, XPriv};
use ironwallet::{
    domain::{
        chain_config::preset, CurveType, DerivationEngine, DerivationPath, DeriveParams,
        MasterSeed, PublicKey,
    },
    error::{DerivationError, WalletError},
};

use common::{abandon_seed, harness, ABANDON};

fn path(p: &str) -> DerivationPath {
    p.parse().unwrap()
}

fn compressed(key: &PublicKey) -> Vec<u8> {
    assert_eq!(key.curve(), CurveType::Secp256k1);
    key.to_bytes()
}

/// 测试向量：abandon ×11 about，m/44'/60'/0'/0/0
#[tokio::test]
async fn test_ethereum_address_generation_bip39_vector() {
    let h = harness();
    let address = h
        .wallet
        .derive_address(&DeriveParams::index("ethereum", 0))
        .unwrap();
    assert_eq!(address, "0x9858EfFD232B4033E47d90003D23EC58E053e11f");

    // 显式路径与索引形式等价
    let explicit = h
        .wallet
        .derive_address(&DeriveParams::new("eth", "m/44'/60'/0'/0/0"))
        .unwrap();
    assert_eq!(explicit, address);
}

/// BSC / Polygon 与 Ethereum 共用 coin type 60，地址相同
#[test]
fn test_evm_chains_share_addresses() {
    let seed = abandon_seed();
    let eth = preset("ethereum").unwrap();
    let p = path("m/44'/60'/0'/0/0");
    let (expected, _) = DerivationEngine::derive_address(&seed, &eth, &p).unwrap();

    for chain in ["bsc", "polygon", "arbitrum", "optimism", "avalanche", "sepolia"] {
        let config = preset(chain).unwrap();
        let (address, _) = DerivationEngine::derive_address(&seed, &config, &p).unwrap();
        assert_eq!(address, expected, "{chain}");
    }
}

#[test]
fn test_cross_check_with_coins_bip32() {
    let raw_seed = bip39::Mnemonic::parse(ABANDON).unwrap().to_seed("");
    let seed = MasterSeed::from_bytes(&raw_seed).unwrap();
    let root = XPriv::root_from_seed(&raw_seed, None).unwrap();

    for p in [
        "m/44'/60'/0'/0/0",
        "m/44'/60'/0'/0/7",
        "m/84'/0'/0'/0/0",
        "m/84'/1'/2'/1/5",
        "m/0/1/2'",
    ] {
        let reference = root.derive_path(p).unwrap();
        let reference_key: &k256::ecdsa::SigningKey = reference.as_ref();
        let expected = reference_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();

        let ours = DerivationEngine::derive(&seed, CurveType::Secp256k1, &path(p)).unwrap();
        assert_eq!(compressed(ours.public_key()), expected, "{p}");
    }
}

/// BIP84 测试向量（同一助记词）
#[test]
fn test_bitcoin_bip84_vector() {
    let seed = abandon_seed();
    let btc = preset("bitcoin").unwrap();
    let (address, _) =
        DerivationEngine::derive_address(&seed, &btc, &path("m/84'/0'/0'/0/0")).unwrap();
    assert_eq!(address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
}

#[test]
fn test_solana_address_is_base58_pubkey() {
    let seed = abandon_seed();
    let sol = preset("solana").unwrap();
    let (address, keypair) =
        DerivationEngine::derive_address(&seed, &sol, &path("m/44'/501'/0'/0'")).unwrap();
    assert_eq!(keypair.curve(), CurveType::Ed25519);
    assert_eq!(bs58::decode(&address).into_vec().unwrap(), keypair.public_key().to_bytes());
}

#[test]
fn test_solana_accounts_follow_account_change_layout() {
    let seed = abandon_seed();
    let sol = preset("solana").unwrap();

    let derive = |params: DeriveParams| {
        let p = params.resolve_path(&sol).unwrap();
        let (address, _) = DerivationEngine::derive_address(&seed, &sol, &p).unwrap();
        (p.to_string(), address)
    };

    let (p0, account0) = derive(DeriveParams::from_indices("solana", 0, 0, 0));
    let (p1, account1) = derive(DeriveParams::from_indices("solana", 1, 0, 0));
    assert_eq!(p0, "m/44'/501'/0'/0'");
    assert_eq!(p1, "m/44'/501'/1'/0'");
    assert_ne!(account0, account1);

    // 与显式路径一致
    let (explicit, _) =
        DerivationEngine::derive_address(&seed, &sol, &path("m/44'/501'/1'/0'")).unwrap();
    assert_eq!(account1, explicit);

    let (p2, indexed) = derive(DeriveParams::index("solana", 2));
    assert_eq!(p2, "m/44'/501'/0'/0'/2'");
    assert_ne!(indexed, account0);
}

#[test]
fn test_determinism_and_path_sensitivity() {
    let h = harness();
    let first = h.wallet.derive_address(&DeriveParams::index("ethereum", 3)).unwrap();
    let again = h.wallet.derive_address(&DeriveParams::index("ethereum", 3)).unwrap();
    assert_eq!(first, again);

    let other_index = h.wallet.derive_address(&DeriveParams::index("ethereum", 4)).unwrap();
    let other_account = h
        .wallet
        .derive_address(&DeriveParams::from_indices("ethereum", 1, 0, 3))
        .unwrap();
    let other_change = h
        .wallet
        .derive_address(&DeriveParams::from_indices("ethereum", 0, 1, 3))
        .unwrap();
    assert_ne!(first, other_index);
    assert_ne!(first, other_account);
    assert_ne!(first, other_change);

    // 不同种子
    let other_seed = MasterSeed::from_bytes(&[0x42u8; 64]).unwrap();
    let eth = preset("ethereum").unwrap();
    let (other, _) =
        DerivationEngine::derive_address(&other_seed, &eth, &path("m/44'/60'/0'/0/3")).unwrap();
    assert_ne!(first, other);
}

#[test]
fn test_invalid_paths() {
    let h = harness();
    let err = h
        .wallet
        .derive_address(&DeriveParams::new("ethereum", "m/44'/60'/x"))
        .unwrap_err();
    assert!(matches!(err, WalletError::Derivation(DerivationError::InvalidPath(_))));
    assert_eq!(err.code(), "invalid_path");

    // ed25519 只支持硬化派生
    let seed = abandon_seed();
    let sol = preset("solana").unwrap();
    assert!(DerivationEngine::derive_address(&seed, &sol, &path("m/44'/501'/0'/0")).is_err());
}

#[test]
fn test_seed_too_short() {
    assert_eq!(
        MasterSeed::from_bytes(&[1u8; 8]).err().map(|e| e.to_string()),
        Some(DerivationError::SeedTooShort { len: 8, min: 16 }.to_string())
    );
}
