//! 各链族适配器及其装配
//!
//! `build_registry` 按配置中的端点逐条构建适配器并注册。

pub mod bitcoin;
pub mod evm;
pub mod solana;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use self::{bitcoin::BitcoinAdapter, evm::EvmAdapter, solana::SolanaAdapter};
use crate::{
    config::{ChainEndpoint, Config, NetworkConfig},
    domain::{chain_config, ChainFamily},
    infrastructure::{esplora::EsploraClient, evm_rpc::HttpEvmRpc, solana_rpc::HttpSolanaRpc},
    service::{
        chain_adapter::{AdapterSettings, ChainAdapter},
        chain_registry::ChainRegistry,
    },
};

/// 为单个端点构建适配器
pub fn build_adapter(
    endpoint: &ChainEndpoint,
    network: &NetworkConfig,
) -> Result<Arc<dyn ChainAdapter>> {
    let config = chain_config::preset(&endpoint.chain)
        .with_context(|| format!("unknown chain in config: {}", endpoint.chain))?;
    let settings = AdapterSettings::from_config(network, endpoint.poll_interval_secs);

    let adapter: Arc<dyn ChainAdapter> = match config.family {
        ChainFamily::Evm => {
            let rpc = HttpEvmRpc::new(&endpoint.rpc_url, network)
                .with_context(|| format!("{} rpc client", config.name))?;
            Arc::new(EvmAdapter::new(config, Arc::new(rpc), settings))
        }
        ChainFamily::Solana => {
            let rpc = HttpSolanaRpc::new(&endpoint.rpc_url, network)
                .with_context(|| format!("{} rpc client", config.name))?;
            Arc::new(SolanaAdapter::new(config, Arc::new(rpc), settings))
        }
        ChainFamily::Bitcoin => {
            let rpc = EsploraClient::new(&endpoint.rpc_url, network)
                .with_context(|| format!("{} esplora client", config.name))?;
            Arc::new(BitcoinAdapter::new(config, Arc::new(rpc), settings))
        }
    };
    Ok(adapter)
}

/// 按配置装配链注册表
pub fn build_registry(config: &Config) -> Result<ChainRegistry> {
    let mut builder = ChainRegistry::builder();
    for endpoint in &config.chains {
        let adapter = build_adapter(endpoint, &config.network)?;
        builder.register(adapter)?;
    }
    let registry = builder.build();
    tracing::info!(chains = ?registry.supported_chains(), "chain registry ready");
    Ok(registry)
}
