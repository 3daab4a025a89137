//! 链注册表
//!
//! 构建期注册适配器，`build()` 之后只读，通过 `Arc` 共享。
//! 查找不区分大小写，别名（如 `eth`、`1`）与规范名等价。

use std::{collections::HashMap, sync::Arc};

use crate::{error::RegistryError, service::chain_adapter::ChainAdapter};

#[derive(Default)]
pub struct ChainRegistryBuilder {
    adapters: Vec<Arc<dyn ChainAdapter>>,
    index: HashMap<String, usize>,
}

impl ChainRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册适配器；规范名或任一别名已被占用时整体拒绝
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) -> Result<&mut Self, RegistryError> {
        let config = adapter.config();
        let mut keys: Vec<String> = std::iter::once(&config.name)
            .chain(config.aliases.iter())
            .map(|k| k.trim().to_lowercase())
            .collect();
        keys.sort();
        keys.dedup();

        if let Some(taken) = keys.iter().find(|k| self.index.contains_key(*k)) {
            return Err(RegistryError::DuplicateChain(taken.clone()));
        }

        let slot = self.adapters.len();
        for key in keys {
            self.index.insert(key, slot);
        }
        tracing::debug!(chain = %config.name, aliases = ?config.aliases, "chain adapter registered");
        self.adapters.push(adapter);
        Ok(self)
    }

    pub fn build(self) -> ChainRegistry {
        ChainRegistry {
            adapters: self.adapters,
            index: self.index,
        }
    }
}

pub struct ChainRegistry {
    adapters: Vec<Arc<dyn ChainAdapter>>,
    index: HashMap<String, usize>,
}

impl ChainRegistry {
    pub fn builder() -> ChainRegistryBuilder {
        ChainRegistryBuilder::new()
    }

    pub fn resolve(&self, chain: &str) -> Result<Arc<dyn ChainAdapter>, RegistryError> {
        self.index
            .get(&chain.trim().to_lowercase())
            .and_then(|slot| self.adapters.get(*slot))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownChain(chain.to_string()))
    }

    pub fn contains(&self, chain: &str) -> bool {
        self.index.contains_key(&chain.trim().to_lowercase())
    }

    /// 规范链名，按注册顺序
    pub fn supported_chains(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|a| a.chain_name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRegistry")
            .field("chains", &self.supported_chains())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::{
            chain_config::preset, Amount, ChainConfig, DeriveParams, MasterSeed,
            TransactionResult, TxConfig,
        },
        error::AdapterError,
    };

    struct Stub(ChainConfig);

    #[async_trait]
    impl ChainAdapter for Stub {
        fn config(&self) -> &ChainConfig {
            &self.0
        }

        async fn balance(&self, _address: &str) -> Result<Amount, AdapterError> {
            Ok(Amount::ZERO)
        }

        async fn send(
            &self,
            _seed: &MasterSeed,
            _params: &DeriveParams,
            _to: &str,
            _amount: Amount,
            _config: Option<&TxConfig>,
        ) -> Result<TransactionResult, AdapterError> {
            Ok(TransactionResult::new("stub"))
        }
    }

    fn stub(name: &str) -> Arc<dyn ChainAdapter> {
        Arc::new(Stub(preset(name).unwrap()))
    }

    #[test]
    fn test_resolve_by_name_and_alias() {
        let mut builder = ChainRegistry::builder();
        builder.register(stub("ethereum")).unwrap();
        builder.register(stub("solana")).unwrap();
        let registry = builder.build();

        assert_eq!(registry.resolve("ethereum").unwrap().chain_name(), "ethereum");
        assert_eq!(registry.resolve("ETH").unwrap().chain_name(), "ethereum");
        assert_eq!(registry.resolve(" 1 ").unwrap().chain_name(), "ethereum");
        assert_eq!(registry.resolve("Solana").unwrap().chain_name(), "solana");
        assert_eq!(registry.supported_chains(), vec!["ethereum", "solana"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_chain() {
        let registry = ChainRegistry::builder().build();
        assert!(registry.is_empty());
        assert_eq!(
            registry.resolve("doesnotexist").err(),
            Some(RegistryError::UnknownChain("doesnotexist".into()))
        );
    }

    #[test]
    fn test_duplicate_rejected_atomically() {
        let mut builder = ChainRegistry::builder();
        builder.register(stub("ethereum")).unwrap();

        assert_eq!(
            builder.register(stub("ethereum")).err(),
            Some(RegistryError::DuplicateChain("1".into()))
        );

        // 别名冲突同样拒绝，且不留下部分注册
        let mut clash = preset("polygon").unwrap();
        clash.aliases.push("eth".into());
        assert!(matches!(
            builder.register(Arc::new(Stub(clash))),
            Err(RegistryError::DuplicateChain(_))
        ));
        let registry = builder.build();
        assert!(!registry.contains("polygon"));
        assert_eq!(registry.resolve("eth").unwrap().chain_name(), "ethereum");
    }
}
