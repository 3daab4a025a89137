//! ironwallet - 多链 HD 钱包
//!
//! 从单一主种子派生 EVM / Solana / Bitcoin 地址，查询余额、签名并广播原生转账，
//! 轮询订阅入账。种子只由钱包门面持有。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use error::{AdapterError, DerivationError, RegistryError, RpcError, WalletError};
pub use service::HdWallet;

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{Amount, ChainConfig, DeriveParams, MasterSeed, TxConfig, UnsignedTransfer},
        error::WalletError,
        service::{
            adapters::build_registry, ChainAdapter, ChainRegistry, HdWallet, SubscriptionHandle,
        },
    };
}
