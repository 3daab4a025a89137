//! Solana JSON-RPC 客户端

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    config::NetworkConfig,
    error::RpcError,
    infrastructure::json_rpc::JsonRpcClient,
    service::chain_client::{SignatureInfo, SolanaRpc, SolanaTransfer},
};

pub struct HttpSolanaRpc {
    client: JsonRpcClient,
}

impl HttpSolanaRpc {
    pub fn new(url: impl Into<String>, config: &NetworkConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: JsonRpcClient::new(url, config)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
struct RpcSignature {
    signature: String,
    slot: u64,
    #[serde(default)]
    err: Option<Value>,
}

/// 从 jsonParsed 交易中提取 system program 的 transfer 指令
fn parse_transfers(signature: &str, tx: &Value) -> Vec<SolanaTransfer> {
    let slot = tx.get("slot").and_then(Value::as_u64).unwrap_or(0);
    let instructions = tx
        .pointer("/transaction/message/instructions")
        .and_then(Value::as_array);

    instructions
        .into_iter()
        .flatten()
        .filter(|ix| ix.get("program").and_then(Value::as_str) == Some("system"))
        .filter_map(|ix| {
            let parsed = ix.get("parsed")?;
            let kind = parsed.get("type").and_then(Value::as_str)?;
            if kind != "transfer" && kind != "transferWithSeed" {
                return None;
            }
            let info = parsed.get("info")?;
            Some(SolanaTransfer {
                signature: signature.to_string(),
                from: info.get("source")?.as_str()?.to_string(),
                to: info.get("destination")?.as_str()?.to_string(),
                lamports: info.get("lamports")?.as_u64()?,
                slot,
            })
        })
        .collect()
}

#[async_trait]
impl SolanaRpc for HttpSolanaRpc {
    async fn get_balance(&self, address: &str) -> Result<u64, RpcError> {
        let result: WithContext<u64> = self
            .client
            .call("getBalance", json!([address, { "commitment": "confirmed" }]))
            .await?;
        Ok(result.value)
    }

    async fn get_latest_blockhash(&self) -> Result<String, RpcError> {
        let result: WithContext<BlockhashValue> = self
            .client
            .call("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
            .await?;
        Ok(result.value.blockhash)
    }

    async fn get_fee_for_message(&self, message_base64: &str) -> Result<u64, RpcError> {
        let result: WithContext<Option<u64>> = self
            .client
            .call(
                "getFeeForMessage",
                json!([message_base64, { "commitment": "processed" }]),
            )
            .await?;
        result
            .value
            .ok_or_else(|| RpcError::InvalidResponse("blockhash not found or expired".into()))
    }

    async fn send_transaction(&self, tx_base64: &str) -> Result<String, RpcError> {
        self.client
            .call(
                "sendTransaction",
                json!([tx_base64, { "encoding": "base64", "preflightCommitment": "confirmed" }]),
            )
            .await
    }

    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, RpcError> {
        let mut options = json!({ "limit": limit, "commitment": "confirmed" });
        if let Some(before) = before {
            options["before"] = json!(before);
        }
        let result: Vec<RpcSignature> = self
            .client
            .call("getSignaturesForAddress", json!([address, options]))
            .await?;
        Ok(result
            .into_iter()
            .map(|s| SignatureInfo {
                signature: s.signature,
                slot: s.slot,
                failed: s.err.map(|e| !e.is_null()).unwrap_or(false),
            })
            .collect())
    }

    async fn get_transfers(&self, signature: &str) -> Result<Vec<SolanaTransfer>, RpcError> {
        let tx: Value = self
            .client
            .call(
                "getTransaction",
                json!([signature, {
                    "encoding": "jsonParsed",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0
                }]),
            )
            .await?;
        if tx.is_null() {
            return Ok(Vec::new());
        }
        Ok(parse_transfers(signature, &tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfers() {
        let tx = json!({
            "slot": 250,
            "transaction": {
                "message": {
                    "instructions": [
                        {
                            "program": "system",
                            "parsed": {
                                "type": "transfer",
                                "info": { "source": "Alice", "destination": "Bob", "lamports": 5000 }
                            }
                        },
                        {
                            "program": "spl-token",
                            "parsed": { "type": "transfer", "info": {} }
                        },
                        { "programId": "ComputeBudget111111111111111111111111111111", "data": "x" }
                    ]
                }
            }
        });
        let transfers = parse_transfers("sig1", &tx);
        assert_eq!(
            transfers,
            vec![SolanaTransfer {
                signature: "sig1".into(),
                from: "Alice".into(),
                to: "Bob".into(),
                lamports: 5000,
                slot: 250,
            }]
        );
    }
}
