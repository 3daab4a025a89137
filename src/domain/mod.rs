//! Domain 模块
//!
//! 纯领域模型：金额、链配置、派生路径、种子与密钥、派生引擎、交易类型。
//! 这一层不做任何 I/O。

pub mod address;
pub mod amount;
pub mod chain_config;
pub mod derivation;
pub mod derivation_path;
pub mod derive_params;
pub mod keypair;
pub mod seed;
pub mod transaction;

// 重新导出常用类型
pub use amount::{Amount, AmountError};
pub use chain_config::{AddressFormat, ChainConfig, ChainFamily, CurveType, DerivationStandard};
pub use derivation::{DerivationEngine, DerivationStrategy, DerivationStrategyFactory};
pub use derivation_path::{ChildIndex, DerivationPath};
pub use derive_params::{DeriveParams, PathSelector};
pub use keypair::{KeyPair, PublicKey};
pub use seed::MasterSeed;
pub use transaction::{
    FeeDetail, FeeEstimate, IncomingTransfer, SignedTransaction, TransactionResult,
    TransferDirection, TransferRecord, TxConfig, UnsignedTransfer,
};
