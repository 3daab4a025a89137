//! HD 钱包门面
//!
//! 独占主种子，按 `DeriveParams.chain` 从注册表取适配器并转发操作。
//! 种子只以引用形式交给适配器，不会出现在任何返回值或错误里。
//! 钱包析构时关闭全部订阅，种子随之清零。

use std::sync::Arc;

use crate::{
    domain::{
        Amount, DeriveParams, FeeEstimate, IncomingTransfer, MasterSeed, SignedTransaction,
        TransactionResult, TransferRecord, TxConfig, UnsignedTransfer,
    },
    error::WalletError,
    infrastructure::log_redact::{redact_address, SensitiveRedact},
    service::{
        chain_adapter::{Capabilities, ChainAdapter},
        chain_registry::ChainRegistry,
        subscription_manager::{SubscriptionHandle, SubscriptionManager, TransferCallback},
    },
};

pub struct HdWallet {
    seed: MasterSeed,
    registry: Arc<ChainRegistry>,
    subscriptions: SubscriptionManager,
}

impl HdWallet {
    pub fn new(seed: MasterSeed, registry: Arc<ChainRegistry>) -> Self {
        tracing::info!(chains = ?registry.supported_chains(), "wallet opened");
        Self {
            seed,
            registry,
            subscriptions: SubscriptionManager::new(),
        }
    }

    fn adapter(&self, chain: &str) -> Result<Arc<dyn ChainAdapter>, WalletError> {
        self.registry.resolve(chain).map_err(|e| {
            tracing::warn!(chain = chain, "unknown chain requested");
            WalletError::from(e)
        })
    }

    /// 派生地址，返回适配器供后续调用
    fn resolve_address(
        &self,
        params: &DeriveParams,
    ) -> Result<(Arc<dyn ChainAdapter>, String), WalletError> {
        let adapter = self.adapter(&params.chain)?;
        let address = adapter.derive_address(&self.seed, params).map_err(|e| {
            tracing::warn!(params = %params.redact(), error = %e, "derivation failed");
            WalletError::from(e)
        })?;
        Ok((adapter, address))
    }

    pub fn derive_address(&self, params: &DeriveParams) -> Result<String, WalletError> {
        let (adapter, address) = self.resolve_address(params)?;
        tracing::debug!(
            chain = adapter.chain_name(),
            address = %redact_address(&address),
            "address derived"
        );
        Ok(address)
    }

    pub async fn balance(&self, params: &DeriveParams) -> Result<Amount, WalletError> {
        let (adapter, address) = self.resolve_address(params)?;
        adapter
            .balance(&address)
            .await
            .map_err(|e| failed(adapter.chain_name(), "balance", e.into()))
    }

    pub async fn send(
        &self,
        params: &DeriveParams,
        to: &str,
        amount: Amount,
        config: Option<&TxConfig>,
    ) -> Result<TransactionResult, WalletError> {
        let adapter = self.adapter(&params.chain)?;
        adapter
            .send(&self.seed, params, to, amount, config)
            .await
            .map_err(|e| failed(adapter.chain_name(), "send", e.into()))
    }

    pub async fn estimate_fee(
        &self,
        params: &DeriveParams,
        to: &str,
        amount: Amount,
    ) -> Result<FeeEstimate, WalletError> {
        let (adapter, from) = self.resolve_address(params)?;
        adapter
            .estimate_fee(&from, to, amount)
            .await
            .map_err(|e| failed(adapter.chain_name(), "estimate_fee", e.into()))
    }

    /// 签名但不广播
    pub async fn sign(
        &self,
        params: &DeriveParams,
        transfer: &UnsignedTransfer,
        config: Option<&TxConfig>,
    ) -> Result<SignedTransaction, WalletError> {
        let adapter = self.adapter(&params.chain)?;
        adapter
            .sign(&self.seed, params, transfer, config)
            .await
            .map_err(|e| failed(adapter.chain_name(), "sign", e.into()))
    }

    pub async fn history(
        &self,
        params: &DeriveParams,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, WalletError> {
        let (adapter, address) = self.resolve_address(params)?;
        adapter
            .history(&address, limit)
            .await
            .map_err(|e| failed(adapter.chain_name(), "history", e.into()))
    }

    pub async fn fetch_latest_tx(
        &self,
        params: &DeriveParams,
    ) -> Result<Option<TransferRecord>, WalletError> {
        let (adapter, address) = self.resolve_address(params)?;
        adapter
            .fetch_latest_tx(&address)
            .await
            .map_err(|e| failed(adapter.chain_name(), "fetch_latest_tx", e.into()))
    }

    /// 订阅派生地址的入账；同一地址的多个订阅共享一个轮询任务
    pub async fn subscribe<F>(
        &self,
        params: &DeriveParams,
        callback: F,
    ) -> Result<SubscriptionHandle, WalletError>
    where
        F: Fn(IncomingTransfer) + Send + Sync + 'static,
    {
        let (adapter, address) = self.resolve_address(params)?;
        let chain = adapter.chain_name().to_string();
        let callback: TransferCallback = Arc::new(callback);
        self.subscriptions
            .subscribe(adapter, &address, callback)
            .await
            .map_err(|e| failed(&chain, "subscribe", e.into()))
    }

    pub fn supported_chains(&self) -> Vec<String> {
        self.registry.supported_chains()
    }

    pub fn capabilities(&self, chain: &str) -> Result<Capabilities, WalletError> {
        Ok(self.adapter(chain)?.capabilities())
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_subscriptions()
    }

    /// 关闭所有订阅；之后的订阅仍可重新建立
    pub fn shutdown(&self) {
        self.subscriptions.shutdown();
    }
}

impl Drop for HdWallet {
    fn drop(&mut self) {
        self.shutdown();
        tracing::debug!("wallet closed");
    }
}

impl std::fmt::Debug for HdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdWallet")
            .field("seed", &"<redacted>")
            .field("registry", &self.registry)
            .finish()
    }
}

fn failed(chain: &str, operation: &'static str, err: WalletError) -> WalletError {
    tracing::warn!(chain = chain, operation = operation, code = err.code(), error = %err, "wallet operation failed");
    err
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::{chain_config::preset, ChainConfig},
        error::{AdapterError, RegistryError},
    };

    struct Fixed {
        config: ChainConfig,
    }

    #[async_trait]
    impl ChainAdapter for Fixed {
        fn config(&self) -> &ChainConfig {
            &self.config
        }

        async fn balance(&self, _address: &str) -> Result<Amount, AdapterError> {
            Ok(Amount::from_u64(42))
        }

        async fn send(
            &self,
            _seed: &MasterSeed,
            _params: &DeriveParams,
            to: &str,
            _amount: Amount,
            _config: Option<&TxConfig>,
        ) -> Result<TransactionResult, AdapterError> {
            Err(AdapterError::InvalidDestination(to.to_string()))
        }
    }

    fn wallet() -> HdWallet {
        let mut builder = ChainRegistry::builder();
        builder
            .register(Arc::new(Fixed {
                config: preset("ethereum").unwrap(),
            }))
            .unwrap();
        HdWallet::new(
            MasterSeed::from_bytes(&[1u8; 32]).unwrap(),
            Arc::new(builder.build()),
        )
    }

    #[tokio::test]
    async fn test_forwards_to_adapter() {
        let wallet = wallet();
        let params = DeriveParams::index("eth", 0);
        assert!(wallet.derive_address(&params).unwrap().starts_with("0x"));
        assert_eq!(wallet.balance(&params).await.unwrap(), Amount::from_u64(42));
        assert_eq!(wallet.supported_chains(), vec!["ethereum"]);
    }

    #[tokio::test]
    async fn test_errors_propagate_unchanged() {
        let wallet = wallet();
        let params = DeriveParams::index("ethereum", 0);

        let err = wallet
            .send(&params, "nope", Amount::from_u64(1), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::Adapter(AdapterError::InvalidDestination("nope".into()))
        );

        let err = wallet
            .history(&params, 5)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported");

        let err = wallet.balance(&DeriveParams::index("dogecoin", 0)).await.unwrap_err();
        assert_eq!(
            err,
            WalletError::Registry(RegistryError::UnknownChain("dogecoin".into()))
        );
        assert!(wallet.capabilities("dogecoin").is_err());
    }

    #[tokio::test]
    async fn test_subscribe_unsupported() {
        let wallet = wallet();
        let err = wallet
            .subscribe(&DeriveParams::index("ethereum", 0), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported");
        assert_eq!(wallet.active_subscriptions(), 0);
    }

    #[test]
    fn test_debug_hides_seed() {
        let rendered = format!("{:?}", wallet());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("0101"));
    }
}
