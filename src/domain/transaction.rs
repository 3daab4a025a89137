//! 交易相关的领域类型

use serde::{Deserialize, Serialize};

use super::amount::Amount;

/// 发送交易的结果：链特定的不透明交易标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionResult {
    pub tx_hash: String,
}

impl TransactionResult {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
        }
    }
}

/// 转账方向（相对于查询地址）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
    /// 自己转给自己
    SelfTransfer,
}

/// 归一化的历史记录条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    pub direction: TransferDirection,
    /// 区块高度 / slot；未确认时为 `None`
    pub block: Option<u64>,
}

impl TransferRecord {
    /// 地址按原样比较；大小写不敏感的格式（EVM hex）由调用方先归一化
    pub fn direction_for(owner: &str, from: &str, to: &str) -> TransferDirection {
        let sent = from == owner;
        let received = to == owner;
        match (sent, received) {
            (true, true) => TransferDirection::SelfTransfer,
            (true, false) => TransferDirection::Outgoing,
            _ => TransferDirection::Incoming,
        }
    }
}

/// 入账通知：`(tx_hash, amount)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingTransfer {
    pub tx_hash: String,
    pub amount: Amount,
}

/// 手续费明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeDetail {
    Evm { gas_limit: u64, gas_price: Amount },
    Solana { lamports_per_signature: u64 },
    Bitcoin { vsize: u64, fee_rate_sat_vb: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub fee: Amount,
    pub detail: FeeDetail,
}

/// 待签名的原生资产转账
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransfer {
    pub to: String,
    pub amount: Amount,
}

impl UnsignedTransfer {
    pub fn new(to: impl Into<String>, amount: Amount) -> Self {
        Self {
            to: to.into(),
            amount,
        }
    }
}

/// 已签名、未广播的交易
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// 链原生的序列化字节
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
    /// 节点广播所需的文本编码（EVM `0x` hex、Solana base64、Bitcoin hex）
    pub encoded: String,
    /// 广播前即可确定的交易标识
    pub tx_hash: String,
}

impl std::fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("tx_hash", &self.tx_hash)
            .field("len", &self.raw.len())
            .finish()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// 按链类型区分的发送配置，未指定的字段由适配器从节点获取
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "chain", rename_all = "snake_case")]
pub enum TxConfig {
    Evm {
        gas_price: Option<Amount>,
        gas_limit: Option<u64>,
        nonce: Option<u64>,
    },
    Solana {
        recent_blockhash: Option<String>,
    },
    Bitcoin {
        fee_rate_sat_vb: Option<u64>,
    },
}
