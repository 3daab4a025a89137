//! 测试辅助模块
//! 内存版链协作方与钱包装配

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use sha3::Digest;
use ironwallet::{
    domain::{chain_config::preset, Amount, MasterSeed},
    error::RpcError,
    service::{
        adapters::{BitcoinAdapter, EvmAdapter},
        chain_client::{BitcoinRpc, BitcoinTx, EvmRpc, EvmTransfer, Utxo},
        AdapterSettings, ChainRegistry, HdWallet,
    },
};

pub const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn abandon_seed() -> MasterSeed {
    MasterSeed::from_mnemonic(ABANDON, "").expect("valid mnemonic")
}

/// 轮询间隔足够短，测试内可观察到多次轮询
pub fn fast_settings() -> AdapterSettings {
    AdapterSettings {
        request_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(20),
    }
}

/// 内存 EVM 节点
#[derive(Default)]
pub struct MockEvm {
    pub balances: Mutex<HashMap<String, Amount>>,
    pub head: Mutex<u64>,
    pub blocks: Mutex<Vec<EvmTransfer>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub reject_with: Mutex<Option<String>>,
}

impl MockEvm {
    pub fn set_balance(&self, address: &str, amount: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_lowercase(), Amount::from_u64(amount));
    }

    /// 出一个新块，返回块高
    pub fn mine(&self, transfers: Vec<(&str, &str, u64)>) -> u64 {
        let mut head = self.head.lock().unwrap();
        *head += 1;
        let mut blocks = self.blocks.lock().unwrap();
        for (hash, to, value) in transfers {
            blocks.push(EvmTransfer {
                hash: hash.to_string(),
                from: "0x0000000000000000000000000000000000000001".to_string(),
                to: Some(to.to_lowercase()),
                value: Amount::from_u64(value),
                block: *head,
            });
        }
        *head
    }
}

#[async_trait]
impl EvmRpc for MockEvm {
    async fn get_balance(&self, address: &str) -> Result<Amount, RpcError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn get_transaction_count(&self, _address: &str) -> Result<u64, RpcError> {
        Ok(self.sent.lock().unwrap().len() as u64)
    }

    async fn gas_price(&self) -> Result<Amount, RpcError> {
        Ok(Amount::from_u64(1_000_000_000))
    }

    async fn estimate_gas(&self, _from: &str, _to: &str, _value: &Amount) -> Result<u64, RpcError> {
        Ok(21_000)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        if let Some(message) = self.reject_with.lock().unwrap().clone() {
            return Err(RpcError::Rpc {
                code: -32000,
                message,
            });
        }
        self.sent.lock().unwrap().push(raw.to_vec());
        let hash: [u8; 32] = sha3::Keccak256::digest(raw).into();
        Ok(format!("0x{}", hex::encode(hash)))
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn block_transfers(&self, number: u64) -> Result<Vec<EvmTransfer>, RpcError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.block == number)
            .cloned()
            .collect())
    }
}

/// 内存 Esplora
#[derive(Default)]
pub struct MockEsplora {
    pub utxos: Mutex<Vec<Utxo>>,
    pub txs: Mutex<Vec<BitcoinTx>>,
    pub broadcast: Mutex<Vec<String>>,
}

#[async_trait]
impl BitcoinRpc for MockEsplora {
    async fn get_balance(&self, _address: &str) -> Result<u64, RpcError> {
        Ok(self.utxos.lock().unwrap().iter().map(|u| u.value).sum())
    }

    async fn list_utxos(&self, _address: &str) -> Result<Vec<Utxo>, RpcError> {
        Ok(self.utxos.lock().unwrap().clone())
    }

    async fn fee_rate(&self, _target_blocks: u16) -> Result<u64, RpcError> {
        Ok(5)
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, RpcError> {
        self.broadcast.lock().unwrap().push(raw_hex.to_string());
        let raw = hex::decode(raw_hex).map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        let mut hash: [u8; 32] = sha2::Sha256::digest(sha2::Sha256::digest(&raw)).into();
        hash.reverse();
        Ok(hex::encode(hash))
    }

    async fn address_transactions(&self, _address: &str) -> Result<Vec<BitcoinTx>, RpcError> {
        Ok(self.txs.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub wallet: HdWallet,
    pub evm: Arc<MockEvm>,
    pub esplora: Arc<MockEsplora>,
}

/// ethereum + bitcoin-testnet，种子为 BIP39 标准测试助记词
pub fn harness() -> Harness {
    let evm = Arc::new(MockEvm::default());
    let esplora = Arc::new(MockEsplora::default());

    let mut builder = ChainRegistry::builder();
    builder
        .register(Arc::new(EvmAdapter::new(
            preset("ethereum").unwrap(),
            evm.clone(),
            fast_settings(),
        )))
        .unwrap();
    builder
        .register(Arc::new(BitcoinAdapter::new(
            preset("bitcoin-testnet").unwrap(),
            esplora.clone(),
            fast_settings(),
        )))
        .unwrap();

    Harness {
        wallet: HdWallet::new(abandon_seed(), Arc::new(builder.build())),
        evm,
        esplora,
    }
}

/// 等待条件成立，超时返回 false
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
