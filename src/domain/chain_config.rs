//! 多链配置模块
//!
//! 定义所有内置支持的区块链：曲线、地址格式、派生标准与单位精度。
//! 适配器以这里的 [`ChainConfig`] 为静态描述，注册表负责名称解析。

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::derivation_path::{ChildIndex, DerivationPath};
use crate::error::DerivationError;

/// 加密曲线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    /// secp256k1 曲线 (Bitcoin, Ethereum, BSC, Polygon, Avalanche, Arbitrum, Optimism)
    Secp256k1,
    /// ed25519 曲线 (Solana)
    Ed25519,
    /// sr25519 曲线 (Polkadot)，派生引擎不支持
    Sr25519,
    /// NIST P-256，派生引擎不支持
    P256,
}

/// 地址编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFormat {
    /// 十六进制 0x...，EIP-55 校验和 (Ethereum 系列)
    Hex,
    /// Bech32 编码 P2WPKH (Bitcoin native segwit)
    Bech32,
    /// Base58 编码 (Solana)
    SolanaBase58,
}

/// HD 派生标准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivationStandard {
    /// BIP44: m/44'/coin_type'/account'/change/index
    BIP44,
    /// BIP84: m/84'/coin_type'/account'/change/index (native segwit)
    BIP84,
    /// SLIP-0010: m/44'/coin_type'/index'/change'，全硬化
    SLIP0010,
}

/// 链家族：同一家族共享一个适配器实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
    Bitcoin,
}

/// 链配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// 规范名称（注册表主键，小写）
    pub name: String,
    /// 展示名称
    pub display_name: String,
    /// 原生资产符号
    pub symbol: String,
    /// 额外的查找别名（小写）
    pub aliases: Vec<String>,
    pub family: ChainFamily,
    pub curve_type: CurveType,
    pub address_format: AddressFormat,
    pub derivation_standard: DerivationStandard,
    /// SLIP-44 coin type
    pub coin_type: u32,
    /// EIP-155 chain id，仅 EVM 链
    pub evm_chain_id: Option<u64>,
    /// 最小单位精度 (ETH 18, SOL 9, BTC 8)
    pub decimals: u32,
    pub is_testnet: bool,
}

impl ChainConfig {
    /// 按链的派生标准展开派生路径
    ///
    /// # Arguments
    /// * `account` - 账户索引 (通常为 0)
    /// * `change` - 找零索引 (外部地址为 0，内部地址为 1)
    /// * `index` - 地址索引
    ///
    /// SLIP-0010 链使用 `m/44'/coin'/account'/change'`（全硬化），
    /// `index` 非零时追加为第五段 `index'`。
    pub fn derivation_path(
        &self,
        account: u32,
        change: u32,
        index: u32,
    ) -> Result<DerivationPath, DerivationError> {
        let indices = match self.derivation_standard {
            DerivationStandard::BIP44 => vec![
                ChildIndex::hardened(44)?,
                ChildIndex::hardened(self.coin_type)?,
                ChildIndex::hardened(account)?,
                ChildIndex::normal(change)?,
                ChildIndex::normal(index)?,
            ],
            DerivationStandard::BIP84 => vec![
                ChildIndex::hardened(84)?,
                ChildIndex::hardened(self.coin_type)?,
                ChildIndex::hardened(account)?,
                ChildIndex::normal(change)?,
                ChildIndex::normal(index)?,
            ],
            DerivationStandard::SLIP0010 => {
                let mut indices = vec![
                    ChildIndex::hardened(44)?,
                    ChildIndex::hardened(self.coin_type)?,
                    ChildIndex::hardened(account)?,
                    ChildIndex::hardened(change)?,
                ];
                if index != 0 {
                    indices.push(ChildIndex::hardened(index)?);
                }
                indices
            }
        };
        DerivationPath::from_indices(indices)
    }

    /// 路径是否符合该链的推荐布局（purpose 与 coin type）
    pub fn is_standard_path(&self, path: &DerivationPath) -> bool {
        let purpose = match self.derivation_standard {
            DerivationStandard::BIP44 | DerivationStandard::SLIP0010 => 44,
            DerivationStandard::BIP84 => 84,
        };
        let depth_ok = match self.derivation_standard {
            DerivationStandard::SLIP0010 => matches!(path.depth(), 4 | 5),
            _ => path.depth() == 5,
        };
        let slice = path.as_slice();
        depth_ok
            && slice[0].is_hardened()
            && slice[0].index() == purpose
            && slice[1].is_hardened()
            && slice[1].index() == self.coin_type
    }

    /// 名称或任一别名是否匹配（不区分大小写）
    pub fn answers_to(&self, identifier: &str) -> bool {
        let needle = identifier.trim().to_lowercase();
        self.name == needle || self.aliases.iter().any(|a| *a == needle)
    }

    /// 验证配置完整性
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.is_empty() || self.name != self.name.to_lowercase() {
            errors.push(format!("chain name '{}' must be non-empty lowercase", self.name));
        }
        if self.symbol.is_empty() {
            errors.push(format!("chain {} has empty symbol", self.name));
        }

        // 曲线、地址格式、派生标准、家族必须一致
        let consistent = matches!(
            (
                self.family,
                self.curve_type,
                self.address_format,
                self.derivation_standard
            ),
            (
                ChainFamily::Evm,
                CurveType::Secp256k1,
                AddressFormat::Hex,
                DerivationStandard::BIP44
            ) | (
                ChainFamily::Bitcoin,
                CurveType::Secp256k1,
                AddressFormat::Bech32,
                DerivationStandard::BIP84
            ) | (
                ChainFamily::Solana,
                CurveType::Ed25519,
                AddressFormat::SolanaBase58,
                DerivationStandard::SLIP0010
            )
        );
        if !consistent {
            errors.push(format!(
                "chain {} has incompatible family/curve/format/standard: {:?} / {:?} / {:?} / {:?}",
                self.name,
                self.family,
                self.curve_type,
                self.address_format,
                self.derivation_standard
            ));
        }

        if self.family == ChainFamily::Evm && self.evm_chain_id.is_none() {
            errors.push(format!("EVM chain {} has no chain id", self.name));
        }
        if self.coin_type >= 0x8000_0000 {
            errors.push(format!("chain {} has invalid coin_type", self.name));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn evm(name: &str, display: &str, symbol: &str, chain_id: u64, testnet: bool) -> ChainConfig {
    let mut aliases = vec![chain_id.to_string()];
    match name {
        "ethereum" => aliases.extend(["eth".to_string(), "mainnet".to_string()]),
        "bsc" => aliases.extend(["bnb".to_string(), "binance".to_string()]),
        "polygon" => aliases.push("matic".to_string()),
        "avalanche" => aliases.extend(["avax".to_string(), "avalanche-c".to_string()]),
        "arbitrum" => aliases.push("arbitrum-one".to_string()),
        "optimism" => aliases.push("op".to_string()),
        _ => {}
    }
    ChainConfig {
        name: name.to_string(),
        display_name: display.to_string(),
        symbol: symbol.to_string(),
        aliases,
        family: ChainFamily::Evm,
        curve_type: CurveType::Secp256k1,
        address_format: AddressFormat::Hex,
        derivation_standard: DerivationStandard::BIP44,
        coin_type: 60,
        evm_chain_id: Some(chain_id),
        decimals: 18,
        is_testnet: testnet,
    }
}

/// 内置链配置
pub static PRESETS: Lazy<Vec<ChainConfig>> = Lazy::new(|| {
    vec![
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // Secp256k1 系列 (EVM 共享实现)
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        evm("ethereum", "Ethereum", "ETH", 1, false),
        evm("sepolia", "Ethereum Sepolia", "ETH", 11_155_111, true),
        evm("bsc", "BNB Smart Chain", "BNB", 56, false),
        evm("polygon", "Polygon", "MATIC", 137, false),
        evm("arbitrum", "Arbitrum One", "ETH", 42_161, false),
        evm("optimism", "Optimism", "ETH", 10, false),
        evm("avalanche", "Avalanche C-Chain", "AVAX", 43_114, false),
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // Bitcoin (BIP84 - native segwit)
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        ChainConfig {
            name: "bitcoin".to_string(),
            display_name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            aliases: vec!["btc".to_string()],
            family: ChainFamily::Bitcoin,
            curve_type: CurveType::Secp256k1,
            address_format: AddressFormat::Bech32,
            derivation_standard: DerivationStandard::BIP84,
            coin_type: 0,
            evm_chain_id: None,
            decimals: 8,
            is_testnet: false,
        },
        ChainConfig {
            name: "bitcoin-testnet".to_string(),
            display_name: "Bitcoin Testnet".to_string(),
            symbol: "tBTC".to_string(),
            aliases: vec!["tbtc".to_string(), "btc-testnet".to_string()],
            family: ChainFamily::Bitcoin,
            curve_type: CurveType::Secp256k1,
            address_format: AddressFormat::Bech32,
            derivation_standard: DerivationStandard::BIP84,
            coin_type: 1,
            evm_chain_id: None,
            decimals: 8,
            is_testnet: true,
        },
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // Ed25519 系列 (独立实现)
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        ChainConfig {
            name: "solana".to_string(),
            display_name: "Solana".to_string(),
            symbol: "SOL".to_string(),
            aliases: vec!["sol".to_string()],
            family: ChainFamily::Solana,
            curve_type: CurveType::Ed25519,
            address_format: AddressFormat::SolanaBase58,
            derivation_standard: DerivationStandard::SLIP0010,
            coin_type: 501,
            evm_chain_id: None,
            decimals: 9,
            is_testnet: false,
        },
        ChainConfig {
            name: "solana-devnet".to_string(),
            display_name: "Solana Devnet".to_string(),
            symbol: "SOL".to_string(),
            aliases: vec!["sol-devnet".to_string()],
            family: ChainFamily::Solana,
            curve_type: CurveType::Ed25519,
            address_format: AddressFormat::SolanaBase58,
            derivation_standard: DerivationStandard::SLIP0010,
            coin_type: 501,
            evm_chain_id: None,
            decimals: 9,
            is_testnet: true,
        },
    ]
});

/// 按名称或别名查找内置配置
pub fn preset(identifier: &str) -> Option<ChainConfig> {
    PRESETS.iter().find(|c| c.answers_to(identifier)).cloned()
}
