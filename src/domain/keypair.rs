//! 按曲线区分的密钥对
//!
//! 每次派生新建，调用结束即析构；底层签名密钥类型自带析构清零。

use std::fmt;

use crate::domain::chain_config::CurveType;

pub enum SecretKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Secp256k1(k256::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    pub fn curve(&self) -> CurveType {
        match self {
            Self::Secp256k1(_) => CurveType::Secp256k1,
            Self::Ed25519(_) => CurveType::Ed25519,
        }
    }

    /// secp256k1 为 33 字节压缩格式，ed25519 为 32 字节
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Secp256k1(key) => key.to_encoded_point(true).as_bytes().to_vec(),
            Self::Ed25519(key) => key.to_bytes().to_vec(),
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({:?}, {})", self.curve(), hex::encode(self.to_bytes()))
    }
}

/// 派生得到的密钥对（不可克隆）
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn secp256k1(secret: k256::ecdsa::SigningKey) -> Self {
        let public = PublicKey::Secp256k1(*secret.verifying_key());
        Self {
            secret: SecretKey::Secp256k1(secret),
            public,
        }
    }

    pub fn ed25519(secret: ed25519_dalek::SigningKey) -> Self {
        let public = PublicKey::Ed25519(secret.verifying_key());
        Self {
            secret: SecretKey::Ed25519(secret),
            public,
        }
    }

    pub fn curve(&self) -> CurveType {
        self.public.curve()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub(crate) fn secp256k1_signing_key(&self) -> Option<&k256::ecdsa::SigningKey> {
        match &self.secret {
            SecretKey::Secp256k1(key) => Some(key),
            SecretKey::Ed25519(_) => None,
        }
    }

    pub(crate) fn ed25519_signing_key(&self) -> Option<&ed25519_dalek::SigningKey> {
        match &self.secret {
            SecretKey::Ed25519(key) => Some(key),
            SecretKey::Secp256k1(_) => None,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
