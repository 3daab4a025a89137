//! 链适配器接口
//!
//! 每条链一个适配器：地址派生（经派生引擎）、余额、发送为必选能力，
//! 手续费估算、签名、历史、最新交易、入账订阅为可选能力，默认返回 `Unsupported`。

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::NetworkConfig,
    domain::{
        Amount, ChainConfig, DerivationEngine, DeriveParams, FeeEstimate, KeyPair, MasterSeed,
        SignedTransaction, TransactionResult, TransferRecord, TxConfig, UnsignedTransfer,
    },
    error::{AdapterError, DerivationError, RpcError},
    infrastructure::log_redact::redact_address,
    service::incoming_feed::IncomingFeed,
};

/// 可选能力标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub estimate_fee: bool,
    pub sign: bool,
    pub history: bool,
    pub latest_tx: bool,
    pub subscribe: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        estimate_fee: true,
        sign: true,
        history: true,
        latest_tx: true,
        subscribe: true,
    };
}

/// 适配器运行参数
#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    /// 单次协作方调用的上限
    pub request_timeout: Duration,
    /// 入账订阅的轮询间隔
    pub poll_interval: Duration,
}

impl AdapterSettings {
    pub fn from_config(network: &NetworkConfig, poll_override_secs: Option<u64>) -> Self {
        Self {
            request_timeout: Duration::from_secs(network.request_timeout_secs),
            poll_interval: Duration::from_secs(
                poll_override_secs.unwrap_or(network.poll_interval_secs),
            ),
        }
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(15),
        }
    }
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn config(&self) -> &ChainConfig;

    /// 规范链名
    fn chain_name(&self) -> &str {
        &self.config().name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn supports_fee_estimation(&self) -> bool {
        self.capabilities().estimate_fee
    }

    fn supports_signing(&self) -> bool {
        self.capabilities().sign
    }

    fn supports_history(&self) -> bool {
        self.capabilities().history
    }

    fn supports_latest_tx(&self) -> bool {
        self.capabilities().latest_tx
    }

    fn supports_subscribe(&self) -> bool {
        self.capabilities().subscribe
    }

    /// 派生密钥对与地址；密钥对随返回值析构
    fn derive_keypair(
        &self,
        seed: &MasterSeed,
        params: &DeriveParams,
    ) -> Result<(String, KeyPair), DerivationError> {
        let config = self.config();
        let path = params.resolve_path(config)?;
        if !config.is_standard_path(&path) {
            tracing::warn!(
                chain = %config.name,
                path = %path,
                "deriving from a non-standard path"
            );
        }
        DerivationEngine::derive_address(seed, config, &path)
    }

    fn derive_address(
        &self,
        seed: &MasterSeed,
        params: &DeriveParams,
    ) -> Result<String, DerivationError> {
        self.derive_keypair(seed, params).map(|(address, _)| address)
    }

    /// 原生资产余额（最小单位）
    async fn balance(&self, address: &str) -> Result<Amount, AdapterError>;

    /// 构建、签名并广播原生资产转账
    async fn send(
        &self,
        seed: &MasterSeed,
        params: &DeriveParams,
        to: &str,
        amount: Amount,
        config: Option<&TxConfig>,
    ) -> Result<TransactionResult, AdapterError>;

    async fn estimate_fee(
        &self,
        _from: &str,
        _to: &str,
        _amount: Amount,
    ) -> Result<FeeEstimate, AdapterError> {
        Err(AdapterError::unsupported(self.chain_name(), "fee estimation"))
    }

    /// 构建并签名，不广播
    async fn sign(
        &self,
        _seed: &MasterSeed,
        _params: &DeriveParams,
        _transfer: &UnsignedTransfer,
        _config: Option<&TxConfig>,
    ) -> Result<SignedTransaction, AdapterError> {
        Err(AdapterError::unsupported(self.chain_name(), "signing"))
    }

    /// 最近的转账记录，新的在前
    async fn history(
        &self,
        _address: &str,
        _limit: usize,
    ) -> Result<Vec<TransferRecord>, AdapterError> {
        Err(AdapterError::unsupported(self.chain_name(), "history"))
    }

    async fn fetch_latest_tx(
        &self,
        _address: &str,
    ) -> Result<Option<TransferRecord>, AdapterError> {
        Err(AdapterError::unsupported(self.chain_name(), "latest transaction"))
    }

    /// 打开入账通知流；轮询任务由返回的 feed 持有
    async fn subscribe(&self, _address: &str) -> Result<IncomingFeed, AdapterError> {
        Err(AdapterError::unsupported(self.chain_name(), "subscription"))
    }
}

/// 为协作方调用加超时，并翻译错误
pub(crate) async fn bounded<T, F>(
    settings: &AdapterSettings,
    chain: &str,
    operation: &'static str,
    fut: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(settings.request_timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(chain = chain, operation = operation, error = %e, "collaborator call failed");
            Err(AdapterError::from_rpc(chain, e))
        }
        Err(_) => {
            tracing::warn!(
                chain = chain,
                operation = operation,
                timeout_secs = settings.request_timeout.as_secs(),
                "collaborator call timed out"
            );
            Err(AdapterError::Timeout(format!("{chain} {operation}")))
        }
    }
}

/// 发送前的金额检查
pub(crate) fn require_positive(amount: &Amount) -> Result<(), AdapterError> {
    if amount.is_zero() {
        return Err(AdapterError::InvalidAmount(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// 余额不足时给出可用 / 所需金额
pub(crate) fn require_funds(available: Amount, required: Amount) -> Result<(), AdapterError> {
    if available < required {
        return Err(AdapterError::InsufficientFunds {
            available: available.to_string(),
            required: required.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn log_send(chain: &str, from: &str, to: &str, amount: &Amount, tx_hash: &str) {
    tracing::info!(
        chain = chain,
        from = %redact_address(from),
        to = %redact_address(to),
        amount = %amount,
        tx_hash = tx_hash,
        "transaction submitted"
    );
}
