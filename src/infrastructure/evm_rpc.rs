//! 以太坊 JSON-RPC 客户端（EVM 兼容链通用）

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{
    config::NetworkConfig,
    domain::Amount,
    error::RpcError,
    infrastructure::{json_rpc::JsonRpcClient, rpc_validator},
    service::chain_client::{EvmRpc, EvmTransfer},
};

pub struct HttpEvmRpc {
    client: JsonRpcClient,
}

impl HttpEvmRpc {
    pub fn new(url: impl Into<String>, config: &NetworkConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: JsonRpcClient::new(url, config)?,
        })
    }
}



#[derive(Debug, Deserialize)]
struct RpcBlock {
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
}

fn parse_block(number: u64, block: Option<RpcBlock>) -> Result<Vec<EvmTransfer>, RpcError> {
    let Some(block) = block else {
        return Ok(Vec::new());
    };
    block
        .transactions
        .into_iter()
        .map(|tx| {
            Ok(EvmTransfer {
                hash: rpc_validator::validate_tx_hash(&tx.hash)?,
                from: tx.from.to_lowercase(),
                to: tx.to.map(|t| t.to_lowercase()),
                value: rpc_validator::validate_balance(&tx.value)?,
                block: number,
            })
        })
        .collect()
}

#[async_trait]
impl EvmRpc for HttpEvmRpc {
    async fn get_balance(&self, address: &str) -> Result<Amount, RpcError> {
        let hex: String = self
            .client
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        rpc_validator::validate_balance(&hex)
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let hex: String = self
            .client
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        rpc_validator::validate_u64(&hex)
    }

    async fn gas_price(&self) -> Result<Amount, RpcError> {
        let hex: String = self.client.call("eth_gasPrice", json!([])).await?;
        rpc_validator::validate_balance(&hex)
    }

    async fn estimate_gas(&self, from: &str, to: &str, value: &Amount) -> Result<u64, RpcError> {
        let hex: String = self
            .client
            .call(
                "eth_estimateGas",
                json!([{ "from": from, "to": to, "value": value.to_hex_quantity() }]),
            )
            .await?;
        rpc_validator::validate_gas(&hex)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        let hash: String = self
            .client
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        rpc_validator::validate_tx_hash(&hash)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let hex: String = self.client.call("eth_blockNumber", json!([])).await?;
        rpc_validator::validate_u64(&hex)
    }

    async fn block_transfers(&self, number: u64) -> Result<Vec<EvmTransfer>, RpcError> {
        let block: Option<RpcBlock> = self
            .client
            .call("eth_getBlockByNumber", json!([format!("0x{number:x}"), true]))
            .await?;
        parse_block(number, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_encoding() {
        assert_eq!(Amount::ZERO.to_hex_quantity(), "0x0");
        assert_eq!(
            Amount::parse("1000000000000000000").unwrap().to_hex_quantity(),
            "0xde0b6b3a7640000"
        );
    }

    #[test]
    fn test_parse_block() {
        let block: RpcBlock = serde_json::from_value(json!({
            "number": "0x10",
            "transactions": [
                {
                    "hash": format!("0x{}", "11".repeat(32)),
                    "from": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                    "to": "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB",
                    "value": "0x64"
                },
                {
                    "hash": format!("0x{}", "22".repeat(32)),
                    "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "to": null,
                    "value": "0x0"
                }
            ]
        }))
        .unwrap();
        let transfers = parse_block(16, Some(block)).unwrap();
        assert_eq!(transfers.len(), 2);
        assert_eq!(
            transfers[0].to.as_deref(),
            Some("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
        );
        assert_eq!(transfers[0].value, Amount::from_u64(100));
        assert!(transfers[1].to.is_none());

        assert!(parse_block(17, None).unwrap().is_empty());
    }
}
