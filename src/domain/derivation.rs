//! 派生引擎
//!
//! 为不同的加密曲线提供统一的密钥派生接口：
//! - secp256k1：BIP32（HMAC-SHA512，密钥 "Bitcoin seed"），支持扩展公钥派生
//! - ed25519：SLIP-0010（HMAC-SHA512，密钥 "ed25519 seed"），只支持硬化派生
//!
//! 纯函数，无 I/O，无缓存。

use hmac::{Hmac, Mac};
use k256::{
    ecdsa::{SigningKey, VerifyingKey},
    elliptic_curve::PrimeField,
    FieldBytes, ProjectivePoint, Scalar,
};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    domain::{
        address,
        chain_config::{ChainConfig, CurveType},
        derivation_path::{ChildIndex, DerivationPath},
        keypair::KeyPair,
        seed::{MasterSeed, MIN_SEED_LEN},
    },
    error::DerivationError,
};

type HmacSha512 = Hmac<Sha512>;

const BITCOIN_SEED_KEY: &[u8] = b"Bitcoin seed";
const ED25519_SEED_KEY: &[u8] = b"ed25519 seed";

fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<[u8; 64]>, DerivationError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| DerivationError::InvalidPath(format!("hmac key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = Zeroizing::new([0u8; 64]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn split(i: &[u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut il = [0u8; 32];
    let mut ir = [0u8; 32];
    il.copy_from_slice(&i[..32]);
    ir.copy_from_slice(&i[32..]);
    (il, ir)
}

fn check_seed(seed: &[u8]) -> Result<(), DerivationError> {
    if seed.len() < MIN_SEED_LEN {
        return Err(DerivationError::SeedTooShort {
            len: seed.len(),
            min: MIN_SEED_LEN,
        });
    }
    Ok(())
}

/// IL 解释为标量；IL >= n 时无效
fn parse_tweak(il: &[u8; 32], index: u32) -> Result<Scalar, DerivationError> {
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::clone_from_slice(il)))
        .ok_or(DerivationError::InvalidChildKey { index })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BIP32 (secp256k1)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// BIP32 扩展私钥
#[derive(Clone)]
pub struct ExtendedPrivateKey {
    key: SigningKey,
    chain_code: [u8; 32],
    depth: u8,
}

impl ExtendedPrivateKey {
    pub fn master(seed: &[u8]) -> Result<Self, DerivationError> {
        check_seed(seed)?;
        let i = hmac_sha512(BITCOIN_SEED_KEY, &[seed])?;
        let (mut il, ir) = split(&i);
        let key = SigningKey::from_bytes(FieldBytes::from_slice(&il))
            .map_err(|_| DerivationError::InvalidChildKey { index: 0 });
        il.zeroize();
        Ok(Self {
            key: key?,
            chain_code: ir,
            depth: 0,
        })
    }

    pub fn derive_child(&self, child: ChildIndex) -> Result<Self, DerivationError> {
        if usize::from(self.depth) >= crate::domain::derivation_path::MAX_DEPTH {
            return Err(DerivationError::InvalidPath("maximum depth reached".into()));
        }
        let index = child.to_bip32();
        let index_bytes = index.to_be_bytes();

        // 硬化子节点：0x00 || k_par；普通子节点：serP(K_par)
        let i = if child.is_hardened() {
            let mut secret = Zeroizing::new([0u8; 32]);
            secret.copy_from_slice(&self.key.to_bytes());
            hmac_sha512(&self.chain_code, &[&[0u8], secret.as_slice(), &index_bytes])?
        } else {
            let public = self.key.verifying_key().to_encoded_point(true);
            hmac_sha512(&self.chain_code, &[public.as_bytes(), &index_bytes])?
        };
        let (mut il, ir) = split(&i);
        let tweak = parse_tweak(&il, index);
        il.zeroize();

        let child_scalar = tweak? + self.key.as_nonzero_scalar().as_ref();
        let key = SigningKey::from_bytes(&child_scalar.to_bytes())
            .map_err(|_| DerivationError::InvalidChildKey { index })?;

        Ok(Self {
            key,
            chain_code: ir,
            depth: self.depth + 1,
        })
    }

    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, DerivationError> {
        path.iter()
            .try_fold(self.clone(), |node, child| node.derive_child(*child))
    }

    pub fn public(&self) -> ExtendedPublicKey {
        ExtendedPublicKey {
            key: *self.key.verifying_key(),
            chain_code: self.chain_code,
            depth: self.depth,
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    pub fn into_keypair(self) -> KeyPair {
        KeyPair::secp256k1(self.key.clone())
    }
}

impl Drop for ExtendedPrivateKey {
    fn drop(&mut self) {
        self.chain_code.zeroize();
    }
}

/// BIP32 扩展公钥，只能派生普通子节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    key: VerifyingKey,
    chain_code: [u8; 32],
    depth: u8,
}

impl ExtendedPublicKey {
    pub fn derive_child(&self, child: ChildIndex) -> Result<Self, DerivationError> {
        let index = child.to_bip32();
        if child.is_hardened() {
            return Err(DerivationError::HardenedFromPublic {
                index: child.index(),
            });
        }
        if usize::from(self.depth) >= crate::domain::derivation_path::MAX_DEPTH {
            return Err(DerivationError::InvalidPath("maximum depth reached".into()));
        }

        let public = self.key.to_encoded_point(true);
        let i = hmac_sha512(&self.chain_code, &[public.as_bytes(), &index.to_be_bytes()])?;
        let (il, ir) = split(&i);
        let tweak = parse_tweak(&il, index)?;

        // K_child = G·IL + K_par，结果为无穷远点时无效
        let point = ProjectivePoint::GENERATOR * tweak + ProjectivePoint::from(*self.key.as_affine());
        let key = VerifyingKey::from_affine(point.to_affine())
            .map_err(|_| DerivationError::InvalidChildKey { index })?;

        Ok(Self {
            key,
            chain_code: ir,
            depth: self.depth + 1,
        })
    }

    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, DerivationError> {
        path.iter()
            .try_fold(self.clone(), |node, child| node.derive_child(*child))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SLIP-0010 (ed25519)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SLIP-0010 ed25519 节点
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Slip10Key {
    key: [u8; 32],
    chain_code: [u8; 32],
}

impl Slip10Key {
    pub fn master(seed: &[u8]) -> Result<Self, DerivationError> {
        check_seed(seed)?;
        let i = hmac_sha512(ED25519_SEED_KEY, &[seed])?;
        let (key, chain_code) = split(&i);
        Ok(Self { key, chain_code })
    }

    /// Data = 0x00 || k_par || ser32(index)，ed25519 没有普通子节点
    pub fn derive_child(&self, child: ChildIndex) -> Result<Self, DerivationError> {
        if !child.is_hardened() {
            return Err(DerivationError::InvalidPath(format!(
                "ed25519 supports hardened derivation only, got {child}"
            )));
        }
        let i = hmac_sha512(
            &self.chain_code,
            &[&[0u8], &self.key, &child.to_bip32().to_be_bytes()],
        )?;
        let (key, chain_code) = split(&i);
        Ok(Self { key, chain_code })
    }

    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, DerivationError> {
        let mut node = Self {
            key: self.key,
            chain_code: self.chain_code,
        };
        for child in path.iter() {
            node = node.derive_child(*child)?;
        }
        Ok(node)
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn into_keypair(self) -> KeyPair {
        KeyPair::ed25519(ed25519_dalek::SigningKey::from_bytes(&self.key))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 派生策略
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 派生策略 trait
pub trait DerivationStrategy: Send + Sync {
    fn curve(&self) -> CurveType;

    /// 路径在该曲线下是否可用
    fn validate_path(&self, path: &DerivationPath) -> Result<(), DerivationError>;

    /// 从种子派生密钥对
    fn derive(&self, seed: &[u8], path: &DerivationPath) -> Result<KeyPair, DerivationError>;
}

pub struct Secp256k1Strategy;

impl DerivationStrategy for Secp256k1Strategy {
    fn curve(&self) -> CurveType {
        CurveType::Secp256k1
    }

    fn validate_path(&self, _path: &DerivationPath) -> Result<(), DerivationError> {
        Ok(())
    }

    fn derive(&self, seed: &[u8], path: &DerivationPath) -> Result<KeyPair, DerivationError> {
        let node = ExtendedPrivateKey::master(seed)?.derive_path(path)?;
        Ok(node.into_keypair())
    }
}

pub struct Ed25519Strategy;

impl DerivationStrategy for Ed25519Strategy {
    fn curve(&self) -> CurveType {
        CurveType::Ed25519
    }

    fn validate_path(&self, path: &DerivationPath) -> Result<(), DerivationError> {
        if !path.is_fully_hardened() {
            return Err(DerivationError::InvalidPath(format!(
                "{path}: ed25519 paths must be fully hardened"
            )));
        }
        Ok(())
    }

    fn derive(&self, seed: &[u8], path: &DerivationPath) -> Result<KeyPair, DerivationError> {
        self.validate_path(path)?;
        let node = Slip10Key::master(seed)?.derive_path(path)?;
        Ok(node.into_keypair())
    }
}

/// 策略工厂
pub struct DerivationStrategyFactory;

impl DerivationStrategyFactory {
    /// 根据曲线类型创建策略，不支持的曲线返回错误
    pub fn create_strategy(
        curve_type: CurveType,
    ) -> Result<Box<dyn DerivationStrategy>, DerivationError> {
        match curve_type {
            CurveType::Secp256k1 => Ok(Box::new(Secp256k1Strategy)),
            CurveType::Ed25519 => Ok(Box::new(Ed25519Strategy)),
            CurveType::Sr25519 | CurveType::P256 => {
                Err(DerivationError::UnsupportedCurve(curve_type))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 引擎入口
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DerivationEngine;

impl DerivationEngine {
    /// 按曲线和路径派生密钥对
    pub fn derive(
        seed: &MasterSeed,
        curve: CurveType,
        path: &DerivationPath,
    ) -> Result<KeyPair, DerivationError> {
        DerivationStrategyFactory::create_strategy(curve)?.derive(seed.expose(), path)
    }

    /// 派生密钥对并按链的地址格式编码地址
    pub fn derive_address(
        seed: &MasterSeed,
        chain: &ChainConfig,
        path: &DerivationPath,
    ) -> Result<(String, KeyPair), DerivationError> {
        let keypair = Self::derive(seed, chain.curve_type, path)?;
        let address = address::encode(chain, keypair.public_key())?;
        Ok((address, keypair))
    }
}
