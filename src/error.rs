//! 错误类型定义
//!
//! 分层错误：派生引擎 / 链注册表 / 链适配器，钱包门面原样向上传递。
//! 所有错误消息都不包含种子或私钥字节。

use thiserror::Error;

use crate::domain::{amount::AmountError, chain_config::CurveType};

/// 派生引擎错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    /// 派生路径格式错误，或路径与曲线不兼容
    #[error("invalid derivation path: {0}")]
    InvalidPath(String),
    /// 链要求的曲线不被支持
    #[error("unsupported curve: {0:?}")]
    UnsupportedCurve(CurveType),
    /// 种子长度不足
    #[error("seed too short: {len} bytes, at least {min} required")]
    SeedTooShort { len: usize, min: usize },
    /// 扩展公钥无法派生硬化子节点
    #[error("hardened child {index}' cannot be derived from a public key")]
    HardenedFromPublic { index: u32 },
    /// 子密钥无效（IL >= n 或结果为零，概率可忽略）
    #[error("derived key at index {index} is invalid, skip to the next index")]
    InvalidChildKey { index: u32 },
    /// 助记词校验失败（不回显助记词内容）
    #[error("invalid mnemonic")]
    InvalidMnemonic,
    /// 地址编码失败
    #[error("address encoding failed: {0}")]
    AddressEncoding(String),
}

/// 链注册表错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown chain: {0}")]
    UnknownChain(String),
    #[error("chain identifier already registered: {0}")]
    DuplicateChain(String),
}

/// 链协作方（RPC 节点）原始错误，由适配器翻译为 [`AdapterError`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

/// 链适配器错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: String, required: String },
    #[error("invalid destination address: {0}")]
    InvalidDestination(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    /// 链上拒绝（nonce 冲突、手续费过低等链特定原因）
    #[error("rejected by {chain}: {reason}")]
    Rejected { chain: String, reason: String },
    #[error("{chain} does not support {capability}")]
    Unsupported {
        chain: String,
        capability: &'static str,
    },
    #[error(transparent)]
    Derivation(#[from] DerivationError),
}

impl AdapterError {
    pub fn unsupported(chain: &str, capability: &'static str) -> Self {
        Self::Unsupported {
            chain: chain.to_string(),
            capability,
        }
    }

    /// 将协作方错误翻译为适配器错误
    ///
    /// 节点返回的 "insufficient funds" 类拒绝单独归类，其余 RPC 错误按链上拒绝处理。
    pub fn from_rpc(chain: &str, err: RpcError) -> Self {
        match err {
            RpcError::Transport(msg) | RpcError::InvalidResponse(msg) => Self::Network(msg),
            RpcError::Timeout => Self::Timeout("rpc request".to_string()),
            RpcError::Rpc { message, .. } => {
                let lower = message.to_lowercase();
                if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
                    Self::InsufficientFunds {
                        available: "unknown".to_string(),
                        required: "unknown".to_string(),
                    }
                } else {
                    Self::Rejected {
                        chain: chain.to_string(),
                        reason: message,
                    }
                }
            }
        }
    }
}

impl From<AmountError> for AdapterError {
    fn from(err: AmountError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

/// 钱包门面错误：原样包装下层错误，保留可区分的错误种类
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl WalletError {
    /// 稳定的错误码（用于日志与上层映射）
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::Derivation(e) => match e {
                DerivationError::InvalidPath(_) => "invalid_path",
                DerivationError::UnsupportedCurve(_) => "unsupported_curve",
                DerivationError::SeedTooShort { .. } => "seed_too_short",
                DerivationError::HardenedFromPublic { .. } => "hardened_from_public",
                DerivationError::InvalidChildKey { .. } => "invalid_child_key",
                DerivationError::InvalidMnemonic => "invalid_mnemonic",
                DerivationError::AddressEncoding(_) => "address_encoding",
            },
            WalletError::Registry(e) => match e {
                RegistryError::UnknownChain(_) => "unknown_chain",
                RegistryError::DuplicateChain(_) => "duplicate_chain",
            },
            WalletError::Adapter(e) => match e {
                AdapterError::InsufficientFunds { .. } => "insufficient_funds",
                AdapterError::InvalidDestination(_) => "invalid_destination",
                AdapterError::InvalidAmount(_) => "invalid_amount",
                AdapterError::Network(_) => "network",
                AdapterError::Timeout(_) => "timeout",
                AdapterError::Rejected { .. } => "rejected",
                AdapterError::Unsupported { .. } => "unsupported",
                AdapterError::Derivation(inner) => {
                    WalletError::Derivation(inner.clone()).code()
                }
            },
        }
    }
}
