//! 链协作方接口
//!
//! 适配器只通过这些 trait 访问节点；HTTP 实现位于 `infrastructure`，
//! 测试用内存实现替换。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{domain::Amount, error::RpcError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EVM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 区块中的一笔原生转账
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTransfer {
    pub hash: String,
    pub from: String,
    /// 合约创建交易为 `None`
    pub to: Option<String>,
    pub value: Amount,
    pub block: u64,
}

#[async_trait]
pub trait EvmRpc: Send + Sync {
    /// eth_getBalance (latest)
    async fn get_balance(&self, address: &str) -> Result<Amount, RpcError>;

    /// eth_getTransactionCount (pending)
    async fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError>;

    async fn gas_price(&self) -> Result<Amount, RpcError>;

    async fn estimate_gas(&self, from: &str, to: &str, value: &Amount) -> Result<u64, RpcError>;

    /// eth_sendRawTransaction，返回交易哈希
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    /// 区块内全部交易（eth_getBlockByNumber, full = true）
    async fn block_transfers(&self, number: u64) -> Result<Vec<EvmTransfer>, RpcError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Solana
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// getSignaturesForAddress 的条目（按时间倒序返回）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub failed: bool,
}

/// 交易中的一条 system program 转账指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolanaTransfer {
    pub signature: String,
    pub from: String,
    pub to: String,
    pub lamports: u64,
    pub slot: u64,
}

#[async_trait]
pub trait SolanaRpc: Send + Sync {
    /// lamports
    async fn get_balance(&self, address: &str) -> Result<u64, RpcError>;

    async fn get_latest_blockhash(&self) -> Result<String, RpcError>;

    /// 参数为 base64 编码的消息
    async fn get_fee_for_message(&self, message_base64: &str) -> Result<u64, RpcError>;

    /// 参数为 base64 编码的已签名交易，返回签名
    async fn send_transaction(&self, tx_base64: &str) -> Result<String, RpcError>;

    /// `before` 为翻页游标：只返回早于该签名的条目
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, RpcError>;

    /// 交易中的原生转账（jsonParsed）；交易不存在时返回空
    async fn get_transfers(&self, signature: &str) -> Result<Vec<SolanaTransfer>, RpcError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bitcoin (Esplora)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// sats
    pub value: u64,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEndpoint {
    pub address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinTx {
    pub txid: String,
    pub block_height: Option<u64>,
    pub inputs: Vec<TxEndpoint>,
    pub outputs: Vec<TxEndpoint>,
}

impl BitcoinTx {
    pub fn received_by(&self, address: &str) -> u64 {
        self.outputs
            .iter()
            .filter(|o| o.address.as_deref() == Some(address))
            .map(|o| o.value)
            .sum()
    }

    pub fn spent_by(&self, address: &str) -> u64 {
        self.inputs
            .iter()
            .filter(|i| i.address.as_deref() == Some(address))
            .map(|i| i.value)
            .sum()
    }
}

#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    /// 已确认 + 未确认余额（sats）
    async fn get_balance(&self, address: &str) -> Result<u64, RpcError>;

    async fn list_utxos(&self, address: &str) -> Result<Vec<Utxo>, RpcError>;

    /// 目标确认块数下的费率 (sat/vB)
    async fn fee_rate(&self, target_blocks: u16) -> Result<u64, RpcError>;

    /// 广播原始交易（hex），返回 txid
    async fn broadcast(&self, raw_hex: &str) -> Result<String, RpcError>;

    /// 地址相关交易，按时间倒序
    async fn address_transactions(&self, address: &str) -> Result<Vec<BitcoinTx>, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitcoin_tx_net_amounts() {
        let tx = BitcoinTx {
            txid: "aa".into(),
            block_height: Some(10),
            inputs: vec![TxEndpoint {
                address: Some("bc1qme".into()),
                value: 10_000,
            }],
            outputs: vec![
                TxEndpoint {
                    address: Some("bc1qother".into()),
                    value: 6_000,
                },
                TxEndpoint {
                    address: Some("bc1qme".into()),
                    value: 3_500,
                },
                TxEndpoint {
                    address: None,
                    value: 0,
                },
            ],
        };
        assert_eq!(tx.spent_by("bc1qme"), 10_000);
        assert_eq!(tx.received_by("bc1qme"), 3_500);
        assert_eq!(tx.received_by("bc1qother"), 6_000);
    }
}
