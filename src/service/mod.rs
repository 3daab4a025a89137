//! 服务层：链适配器、注册表、订阅与钱包门面

pub mod adapters;
pub mod chain_adapter;
pub mod chain_client; // 链协作方接口
pub mod chain_registry;
pub mod incoming_feed;
pub mod subscription_manager;
pub mod wallet;

pub use chain_adapter::{AdapterSettings, Capabilities, ChainAdapter};
pub use chain_registry::{ChainRegistry, ChainRegistryBuilder};
pub use subscription_manager::{SubscriptionHandle, SubscriptionManager, TransferCallback};
pub use wallet::HdWallet;
