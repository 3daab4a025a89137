//! 派生参数：链标识 + 路径选择

use serde::{Deserialize, Serialize};

use super::{chain_config::ChainConfig, derivation_path::DerivationPath};
use crate::error::DerivationError;

/// 路径选择：显式路径，或由链模板展开的 account/change/index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSelector {
    Path(String),
    Indices { account: u32, change: u32, index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeriveParams {
    pub chain: String,
    pub selector: PathSelector,
}

impl DeriveParams {
    /// 显式路径，如 `m/44'/60'/0'/0/0`
    pub fn new(chain: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            selector: PathSelector::Path(path.into()),
        }
    }

    pub fn from_indices(chain: impl Into<String>, account: u32, change: u32, index: u32) -> Self {
        Self {
            chain: chain.into(),
            selector: PathSelector::Indices {
                account,
                change,
                index,
            },
        }
    }

    /// 第 `index` 个外部收款地址（account 0, change 0）
    pub fn index(chain: impl Into<String>, index: u32) -> Self {
        Self::from_indices(chain, 0, 0, index)
    }

    /// 解析为具体路径
    pub fn resolve_path(&self, config: &ChainConfig) -> Result<DerivationPath, DerivationError> {
        match &self.selector {
            PathSelector::Path(path) => path.parse(),
            PathSelector::Indices {
                account,
                change,
                index,
            } => config.derivation_path(*account, *change, *index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain_config::preset;

    #[test]
    fn test_resolve_path() {
        let eth = preset("ethereum").unwrap();
        assert_eq!(
            DeriveParams::index("ethereum", 4)
                .resolve_path(&eth)
                .unwrap()
                .to_string(),
            "m/44'/60'/0'/0/4"
        );
        assert_eq!(
            DeriveParams::new("ethereum", "m/0/1")
                .resolve_path(&eth)
                .unwrap()
                .to_string(),
            "m/0/1"
        );
        assert!(DeriveParams::new("ethereum", "44/60")
            .resolve_path(&eth)
            .is_err());
    }
}
