//! 主种子
//!
//! 种子只在本 crate 内部可读，析构时清零，不可序列化，`Debug` 只输出占位符。

use std::fmt;

use bip39::{Language, Mnemonic};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::DerivationError;

/// BIP32 要求的最小种子长度
pub const MIN_SEED_LEN: usize = 16;

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSeed {
    bytes: Vec<u8>,
}

impl MasterSeed {
    /// 从原始熵构造（至少 16 字节）
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DerivationError> {
        if bytes.len() < MIN_SEED_LEN {
            return Err(DerivationError::SeedTooShort {
                len: bytes.len(),
                min: MIN_SEED_LEN,
            });
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// 从 BIP39 助记词 + 口令构造
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, DerivationError> {
        let mnemonic = Mnemonic::parse_in(Language::English, phrase)
            .map_err(|_| DerivationError::InvalidMnemonic)?;
        let mut seed = mnemonic.to_seed(passphrase);
        let result = Self::from_bytes(&seed);
        seed.zeroize();
        result
    }

    /// 生成新助记词（12 或 24 词），仅供开发工具与测试使用
    #[cfg(any(test, feature = "dev-tools"))]
    pub fn generate_mnemonic(word_count: usize) -> Result<String, DerivationError> {
        use rand::RngCore;

        let entropy_len = match word_count {
            12 => 16,
            24 => 32,
            _ => return Err(DerivationError::InvalidMnemonic),
        };
        let mut entropy = vec![0u8; entropy_len];
        rand::thread_rng().fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|_| DerivationError::InvalidMnemonic);
        entropy.zeroize();
        Ok(mnemonic?.to_string())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterSeed([REDACTED; {} bytes])", self.bytes.len())
    }
}
