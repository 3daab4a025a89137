//! Esplora REST 客户端（blockstream.info / mempool.space 兼容）

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    config::NetworkConfig,
    error::RpcError,
    infrastructure::json_rpc::{http_client, map_reqwest, RetryPolicy},
    service::chain_client::{BitcoinRpc, BitcoinTx, TxEndpoint, Utxo},
};

pub struct EsploraClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl EsploraClient {
    pub fn new(base_url: impl Into<String>, config: &NetworkConfig) -> Result<Self, RpcError> {
        Ok(Self {
            http: http_client(config)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RpcError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            Err(RpcError::Transport(format!("HTTP {status}: {body}")))
        } else {
            Err(RpcError::Rpc {
                code: i64::from(status.as_u16()),
                message: body,
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RpcError> {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        let http = &self.http;
        self.retry
            .run(path, move || async move {
                tracing::debug!(url = %url, "Esplora request");
                let response = http.get(url).send().await.map_err(map_reqwest)?;
                Self::check(response)
                    .await?
                    .json::<T>()
                    .await
                    .map_err(map_reqwest)
            })
            .await
    }
}

#[derive(Debug, Deserialize)]
struct Stats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: Stats,
    mempool_stats: Stats,
}

#[derive(Debug, Deserialize)]
struct Status {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: Status,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    #[serde(default)]
    prevout: Option<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    txid: String,
    status: Status,
    vin: Vec<RawInput>,
    vout: Vec<RawOutput>,
}

impl From<RawOutput> for TxEndpoint {
    fn from(out: RawOutput) -> Self {
        TxEndpoint {
            address: out.scriptpubkey_address,
            value: out.value,
        }
    }
}

impl From<RawTx> for BitcoinTx {
    fn from(tx: RawTx) -> Self {
        BitcoinTx {
            txid: tx.txid,
            block_height: tx.status.block_height.filter(|_| tx.status.confirmed),
            inputs: tx
                .vin
                .into_iter()
                .filter_map(|i| i.prevout)
                .map(TxEndpoint::from)
                .collect(),
            outputs: tx.vout.into_iter().map(TxEndpoint::from).collect(),
        }
    }
}

/// 选取不晚于目标块数的最近估算，向上取整，至少 1 sat/vB
fn pick_fee_rate(estimates: &HashMap<String, f64>, target_blocks: u16) -> Option<u64> {
    let mut candidates: Vec<(u16, f64)> = estimates
        .iter()
        .filter_map(|(k, v)| Some((k.parse::<u16>().ok()?, *v)))
        .filter(|(_, v)| v.is_finite() && *v > 0.0)
        .collect();
    candidates.sort_by_key(|(blocks, _)| *blocks);

    let chosen = candidates
        .iter()
        .rev()
        .find(|(blocks, _)| *blocks <= target_blocks)
        .or_else(|| candidates.first())?;
    Some((chosen.1.ceil() as u64).max(1))
}

#[async_trait]
impl BitcoinRpc for EsploraClient {
    async fn get_balance(&self, address: &str) -> Result<u64, RpcError> {
        let info: AddressInfo = self.get_json(&format!("/address/{address}")).await?;
        let confirmed = info
            .chain_stats
            .funded_txo_sum
            .saturating_sub(info.chain_stats.spent_txo_sum);
        let pending_in = info.mempool_stats.funded_txo_sum;
        let pending_out = info.mempool_stats.spent_txo_sum;
        Ok((confirmed + pending_in).saturating_sub(pending_out))
    }

    async fn list_utxos(&self, address: &str) -> Result<Vec<Utxo>, RpcError> {
        let raw: Vec<RawUtxo> = self.get_json(&format!("/address/{address}/utxo")).await?;
        Ok(raw
            .into_iter()
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
                confirmed: u.status.confirmed,
            })
            .collect())
    }

    async fn fee_rate(&self, target_blocks: u16) -> Result<u64, RpcError> {
        let estimates: HashMap<String, f64> = self.get_json("/fee-estimates").await?;
        pick_fee_rate(&estimates, target_blocks)
            .ok_or_else(|| RpcError::InvalidResponse("empty fee estimates".into()))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, RpcError> {
        let url = format!("{}/tx", self.base_url);
        // 广播不重试：节点可能已接收
        let response = self
            .http
            .post(&url)
            .body(raw_hex.to_string())
            .send()
            .await
            .map_err(map_reqwest)?;
        let txid = Self::check(response)
            .await?
            .text()
            .await
            .map_err(map_reqwest)?;
        let txid = txid.trim().to_string();
        if txid.len() != 64 || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RpcError::InvalidResponse(format!("unexpected txid: {txid}")));
        }
        Ok(txid)
    }

    async fn address_transactions(&self, address: &str) -> Result<Vec<BitcoinTx>, RpcError> {
        let raw: Vec<RawTx> = self.get_json(&format!("/address/{address}/txs")).await?;
        Ok(raw.into_iter().map(BitcoinTx::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_fee_rate() {
        let estimates: HashMap<String, f64> = [("1", 25.3), ("3", 12.0), ("6", 8.2), ("144", 1.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(pick_fee_rate(&estimates, 6), Some(9));
        assert_eq!(pick_fee_rate(&estimates, 2), Some(26));
        assert_eq!(pick_fee_rate(&estimates, 1000), Some(1));
        assert_eq!(pick_fee_rate(&HashMap::new(), 6), None);
    }

    #[test]
    fn test_raw_tx_conversion() {
        let raw: RawTx = serde_json::from_value(serde_json::json!({
            "txid": "ab".repeat(32),
            "status": { "confirmed": true, "block_height": 840000 },
            "vin": [ { "prevout": { "scriptpubkey_address": "bc1qa", "value": 5000 } }, { "prevout": null } ],
            "vout": [ { "scriptpubkey_address": "bc1qb", "value": 4000 }, { "value": 0 } ]
        }))
        .unwrap();
        let tx = BitcoinTx::from(raw);
        assert_eq!(tx.block_height, Some(840000));
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.received_by("bc1qb"), 4000);
        assert_eq!(tx.outputs[1].address, None);
    }
}
