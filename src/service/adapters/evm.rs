//! EVM 链适配器
//!
//! 以太坊及兼容链共用一套实现：BIP44 coin 60 派生，EIP-155 legacy 交易，
//! RLP 编码后用可恢复 ECDSA 签名。入账订阅通过逐块扫描实现。

use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};

use crate::{
    domain::{
        Amount, ChainConfig, DeriveParams, FeeDetail, FeeEstimate, IncomingTransfer, MasterSeed,
        SignedTransaction, TransactionResult, TxConfig, UnsignedTransfer,
    },
    error::AdapterError,
    service::{
        chain_adapter::{
            bounded, log_send, require_funds, require_positive, AdapterSettings, Capabilities,
            ChainAdapter,
        },
        chain_client::EvmRpc,
        incoming_feed::{IncomingFeed, IncomingSource, SeenSet},
    },
    utils::address_validator::AddressValidator,
};

/// 原生转账的 gas 上限
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// 单次轮询最多追赶的区块数
const MAX_BLOCKS_PER_POLL: u64 = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EIP-155 legacy 交易
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub chain_id: u64,
}

/// 大端整数去掉前导零（RLP 整数编码）
fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

impl LegacyTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to.to_vec());
        stream.append(&self.value);
        stream.append(&Vec::<u8>::new());
    }

    /// 签名哈希：keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new();
        stream.begin_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        Keccak256::digest(stream.out()).into()
    }

    /// 签名并返回 (raw, tx_hash)
    pub fn sign(&self, key: &SigningKey) -> Result<(Vec<u8>, String), k256::ecdsa::Error> {
        let (signature, recovery_id) = key.sign_prehash_recoverable(&self.signing_hash())?;
        let v = u64::from(recovery_id.to_byte()) + self.chain_id * 2 + 35;
        let r = signature.r().to_bytes();
        let s = signature.s().to_bytes();

        let mut stream = RlpStream::new();
        stream.begin_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&trim_leading_zeros(&r));
        stream.append(&trim_leading_zeros(&s));
        let raw = stream.out().to_vec();
        let tx_hash = format!("0x{}", hex::encode(Keccak256::digest(&raw)));
        Ok((raw, tx_hash))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 适配器
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EvmAdapter {
    config: ChainConfig,
    rpc: Arc<dyn EvmRpc>,
    settings: AdapterSettings,
}

struct FeeParams {
    nonce: u64,
    gas_price: Amount,
    gas_limit: u64,
}

impl EvmAdapter {
    pub fn new(config: ChainConfig, rpc: Arc<dyn EvmRpc>, settings: AdapterSettings) -> Self {
        Self {
            config,
            rpc,
            settings,
        }
    }

    fn chain_id(&self) -> Result<u64, AdapterError> {
        self.config.evm_chain_id.ok_or_else(|| AdapterError::Rejected {
            chain: self.config.name.clone(),
            reason: "missing EIP-155 chain id".to_string(),
        })
    }

    async fn fee_params(
        &self,
        from: &str,
        config: Option<&TxConfig>,
    ) -> Result<FeeParams, AdapterError> {
        let (gas_price, gas_limit, nonce) = match config {
            None => (None, None, None),
            Some(TxConfig::Evm {
                gas_price,
                gas_limit,
                nonce,
            }) => (*gas_price, *gas_limit, *nonce),
            Some(_) => {
                return Err(AdapterError::Rejected {
                    chain: self.config.name.clone(),
                    reason: "transaction config is not for an EVM chain".to_string(),
                })
            }
        };

        let nonce = match nonce {
            Some(n) => n,
            None => {
                bounded(
                    &self.settings,
                    &self.config.name,
                    "eth_getTransactionCount",
                    self.rpc.get_transaction_count(from),
                )
                .await?
            }
        };
        let gas_price = match gas_price {
            Some(p) => p,
            None => {
                bounded(
                    &self.settings,
                    &self.config.name,
                    "eth_gasPrice",
                    self.rpc.gas_price(),
                )
                .await?
            }
        };

        Ok(FeeParams {
            nonce,
            gas_price,
            gas_limit: gas_limit.unwrap_or(TRANSFER_GAS_LIMIT),
        })
    }

    fn build(
        &self,
        transfer: &UnsignedTransfer,
        fee: &FeeParams,
    ) -> Result<LegacyTransaction, AdapterError> {
        require_positive(&transfer.amount)?;
        Ok(LegacyTransaction {
            nonce: fee.nonce,
            gas_price: fee.gas_price.to_u128()?,
            gas_limit: fee.gas_limit,
            to: AddressValidator::parse_evm(&transfer.to)?,
            value: transfer.amount.to_u128()?,
            chain_id: self.chain_id()?,
        })
    }

    fn finish(
        &self,
        tx: &LegacyTransaction,
        key: &SigningKey,
    ) -> Result<SignedTransaction, AdapterError> {
        let (raw, tx_hash) = tx.sign(key).map_err(|e| AdapterError::Rejected {
            chain: self.config.name.clone(),
            reason: format!("signing failed: {e}"),
        })?;
        Ok(SignedTransaction {
            encoded: format!("0x{}", hex::encode(&raw)),
            raw,
            tx_hash,
        })
    }

    fn signing_key<'a>(
        &self,
        keypair: &'a crate::domain::KeyPair,
    ) -> Result<&'a SigningKey, AdapterError> {
        keypair.secp256k1_signing_key().ok_or_else(|| {
            AdapterError::Derivation(crate::error::DerivationError::UnsupportedCurve(
                keypair.curve(),
            ))
        })
    }

    fn total_cost(value: Amount, fee: &FeeParams) -> Result<Amount, AdapterError> {
        fee.gas_price
            .checked_mul(Amount::from_u64(fee.gas_limit))
            .and_then(|f| f.checked_add(value))
            .ok_or_else(|| AdapterError::InvalidAmount("amount plus fee overflows".to_string()))
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            estimate_fee: true,
            sign: true,
            history: false,
            latest_tx: false,
            subscribe: true,
        }
    }

    async fn balance(&self, address: &str) -> Result<Amount, AdapterError> {
        bounded(
            &self.settings,
            &self.config.name,
            "eth_getBalance",
            self.rpc.get_balance(address),
        )
        .await
    }

    async fn send(
        &self,
        seed: &MasterSeed,
        params: &DeriveParams,
        to: &str,
        amount: Amount,
        config: Option<&TxConfig>,
    ) -> Result<TransactionResult, AdapterError> {
        let (from, keypair) = self.derive_keypair(seed, params)?;
        let transfer = UnsignedTransfer::new(to, amount);

        // 先做本地校验，避免无效请求触达节点
        require_positive(&amount)?;
        AddressValidator::parse_evm(to)?;

        let fee = self.fee_params(&from, config).await?;
        let tx = self.build(&transfer, &fee)?;

        let available = self.balance(&from).await?;
        require_funds(available, Self::total_cost(amount, &fee)?)?;

        let signed = self.finish(&tx, self.signing_key(&keypair)?)?;
        drop(keypair);

        let tx_hash = bounded(
            &self.settings,
            &self.config.name,
            "eth_sendRawTransaction",
            self.rpc.send_raw_transaction(&signed.raw),
        )
        .await?;
        if !tx_hash.eq_ignore_ascii_case(&signed.tx_hash) {
            tracing::warn!(
                chain = %self.config.name,
                local = %signed.tx_hash,
                node = %tx_hash,
                "node returned a different transaction hash"
            );
        }

        log_send(&self.config.name, &from, to, &amount, &tx_hash);
        Ok(TransactionResult::new(tx_hash))
    }

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<FeeEstimate, AdapterError> {
        AddressValidator::parse_evm(to)?;
        let gas_price = bounded(
            &self.settings,
            &self.config.name,
            "eth_gasPrice",
            self.rpc.gas_price(),
        )
        .await?;
        let gas_limit = bounded(
            &self.settings,
            &self.config.name,
            "eth_estimateGas",
            self.rpc.estimate_gas(from, to, &amount),
        )
        .await?
        .max(TRANSFER_GAS_LIMIT);

        let fee = gas_price
            .checked_mul(Amount::from_u64(gas_limit))
            .ok_or_else(|| AdapterError::InvalidAmount("fee overflows".to_string()))?;
        Ok(FeeEstimate {
            fee,
            detail: FeeDetail::Evm {
                gas_limit,
                gas_price,
            },
        })
    }

    async fn sign(
        &self,
        seed: &MasterSeed,
        params: &DeriveParams,
        transfer: &UnsignedTransfer,
        config: Option<&TxConfig>,
    ) -> Result<SignedTransaction, AdapterError> {
        let (from, keypair) = self.derive_keypair(seed, params)?;
        require_positive(&transfer.amount)?;
        AddressValidator::parse_evm(&transfer.to)?;

        let fee = self.fee_params(&from, config).await?;
        let tx = self.build(transfer, &fee)?;
        self.finish(&tx, self.signing_key(&keypair)?)
    }

    async fn subscribe(&self, address: &str) -> Result<IncomingFeed, AdapterError> {
        AddressValidator::parse_evm(address)?;
        let scanner = BlockScanner {
            chain: self.config.name.clone(),
            rpc: self.rpc.clone(),
            settings: self.settings,
            address: address.to_lowercase(),
            next_block: None,
            seen: SeenSet::new(1024),
        };
        Ok(IncomingFeed::spawn(
            scanner,
            self.settings.poll_interval,
            format!("{}:{}", self.config.name, address),
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 入账扫描
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct BlockScanner {
    chain: String,
    rpc: Arc<dyn EvmRpc>,
    settings: AdapterSettings,
    /// 小写
    address: String,
    next_block: Option<u64>,
    seen: SeenSet,
}

#[async_trait]
impl IncomingSource for BlockScanner {
    async fn poll(&mut self) -> Result<Vec<IncomingTransfer>, AdapterError> {
        let head = bounded(
            &self.settings,
            &self.chain,
            "eth_blockNumber",
            self.rpc.block_number(),
        )
        .await?;

        // 首次轮询只记录起点
        let Some(start) = self.next_block else {
            self.next_block = Some(head + 1);
            return Ok(Vec::new());
        };
        if start > head {
            return Ok(Vec::new());
        }

        let end = head.min(start + MAX_BLOCKS_PER_POLL - 1);
        let mut incoming = Vec::new();
        for number in start..=end {
            let transfers = match bounded(
                &self.settings,
                &self.chain,
                "eth_getBlockByNumber",
                self.rpc.block_transfers(number),
            )
            .await
            {
                Ok(t) => t,
                Err(e) if incoming.is_empty() => return Err(e),
                Err(_) => break,
            };
            for transfer in transfers {
                if transfer.to.as_deref() == Some(self.address.as_str())
                    && !transfer.value.is_zero()
                    && self.seen.insert(&transfer.hash)
                {
                    incoming.push(IncomingTransfer {
                        tx_hash: transfer.hash,
                        amount: transfer.value,
                    });
                }
            }
            self.next_block = Some(number + 1);
        }
        Ok(incoming)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    use super::*;
    use crate::{
        domain::{address::evm_address, chain_config::preset},
        error::RpcError,
        service::chain_client::EvmTransfer,
    };

    #[derive(Default)]
    struct MockRpc {
        balance: Mutex<Amount>,
        head: Mutex<u64>,
        blocks: Mutex<Vec<EvmTransfer>>,
        sent: Mutex<Vec<Vec<u8>>>,
        /// 查询该块时超时
        failing_block: Mutex<Option<u64>>,
    }

    #[async_trait]
    impl EvmRpc for MockRpc {
        async fn get_balance(&self, _address: &str) -> Result<Amount, RpcError> {
            Ok(*self.balance.lock().unwrap())
        }

        async fn get_transaction_count(&self, _address: &str) -> Result<u64, RpcError> {
            Ok(3)
        }

        async fn gas_price(&self) -> Result<Amount, RpcError> {
            Ok(Amount::from_u64(1_000_000_000))
        }

        async fn estimate_gas(&self, _f: &str, _t: &str, _v: &Amount) -> Result<u64, RpcError> {
            Ok(21_000)
        }

        async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
            self.sent.lock().unwrap().push(raw.to_vec());
            Ok(format!("0x{}", hex::encode(Keccak256::digest(raw))))
        }

        async fn block_number(&self) -> Result<u64, RpcError> {
            Ok(*self.head.lock().unwrap())
        }

        async fn block_transfers(&self, number: u64) -> Result<Vec<EvmTransfer>, RpcError> {
            if *self.failing_block.lock().unwrap() == Some(number) {
                return Err(RpcError::Timeout);
            }
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

    fn adapter(rpc: Arc<MockRpc>) -> EvmAdapter {
        EvmAdapter::new(preset("ethereum").unwrap(), rpc, AdapterSettings::default())
    }

    fn seed() -> MasterSeed {
        MasterSeed::from_bytes(&[9u8; 32]).unwrap()
    }

    const DEST: &str = "0x3535353535353535353535353535353535353535";

    /// EIP-155 规范中的示例交易
    #[test]
    fn test_eip155_example() {
        let tx = LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: [0x35; 20],
            value: 1_000_000_000_000_000_000,
            chain_id: 1,
        };
        assert_eq!(
            hex::encode(tx.signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );

        let key = SigningKey::from_bytes(&[0x46u8; 32].into()).unwrap();
        let (raw, tx_hash) = tx.sign(&key).unwrap();
        let encoded = hex::encode(&raw);
        assert!(encoded.starts_with("f8"));
        assert!(encoded[4..].starts_with(
            "098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080"
        ));
        let v: u64 = rlp::Rlp::new(&raw).val_at(6).unwrap();
        assert!(v == 37 || v == 38);
        assert_eq!(tx_hash, format!("0x{}", hex::encode(Keccak256::digest(&raw))));
    }

    #[test]
    fn test_signature_recovers_sender() {
        let key = SigningKey::from_bytes(&[0x11u8; 32].into()).unwrap();
        let tx = LegacyTransaction {
            nonce: 0,
            gas_price: 1,
            gas_limit: 21_000,
            to: [0x01; 20],
            value: 5,
            chain_id: 137,
        };
        let (raw, _) = tx.sign(&key).unwrap();
        let decoded = rlp::Rlp::new(&raw);
        let v: u64 = decoded.val_at(6).unwrap();
        let r: Vec<u8> = decoded.val_at(7).unwrap();
        let s: Vec<u8> = decoded.val_at(8).unwrap();

        let mut sig = [0u8; 64];
        sig[32 - r.len()..32].copy_from_slice(&r);
        sig[64 - s.len()..].copy_from_slice(&s);
        let signature = Signature::from_slice(&sig).unwrap();
        let recid = RecoveryId::from_byte((v - 137 * 2 - 35) as u8).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&tx.signing_hash(), &signature, recid).unwrap();
        assert_eq!(recovered, *key.verifying_key());
    }

    #[tokio::test]
    async fn test_send_checks_funds_and_broadcasts() {
        let rpc = Arc::new(MockRpc::default());
        let eth = adapter(rpc.clone());

        *rpc.balance.lock().unwrap() = Amount::from_u64(1_000);
        let err = eth
            .send(&seed(), &DeriveParams::index("ethereum", 0), DEST, Amount::from_u64(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InsufficientFunds { .. }));
        assert!(rpc.sent.lock().unwrap().is_empty());

        *rpc.balance.lock().unwrap() = Amount::parse("1000000000000000000").unwrap();
        let result = eth
            .send(&seed(), &DeriveParams::index("ethereum", 0), DEST, Amount::from_u64(10), None)
            .await
            .unwrap();
        assert!(result.tx_hash.starts_with("0x"));
        assert_eq!(rpc.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_rejects_bad_input() {
        let rpc = Arc::new(MockRpc::default());
        let eth = adapter(rpc);
        let params = DeriveParams::index("ethereum", 0);

        assert!(matches!(
            eth.send(&seed(), &params, "0x1234", Amount::from_u64(1), None).await,
            Err(AdapterError::InvalidDestination(_))
        ));
        assert!(matches!(
            eth.send(&seed(), &params, DEST, Amount::ZERO, None).await,
            Err(AdapterError::InvalidAmount(_))
        ));
        let wrong = TxConfig::Solana {
            recent_blockhash: None,
        };
        assert!(matches!(
            eth.send(&seed(), &params, DEST, Amount::from_u64(1), Some(&wrong)).await,
            Err(AdapterError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_sign_uses_config_overrides() {
        let rpc = Arc::new(MockRpc::default());
        let eth = adapter(rpc);
        let config = TxConfig::Evm {
            gas_price: Some(Amount::from_u64(7)),
            gas_limit: Some(30_000),
            nonce: Some(42),
        };
        let signed = eth
            .sign(
                &seed(),
                &DeriveParams::index("ethereum", 0),
                &UnsignedTransfer::new(DEST, Amount::from_u64(1)),
                Some(&config),
            )
            .await
            .unwrap();
        let decoded = rlp::Rlp::new(&signed.raw);
        assert_eq!(decoded.val_at::<u64>(0).unwrap(), 42);
        assert_eq!(decoded.val_at::<u64>(1).unwrap(), 7);
        assert_eq!(decoded.val_at::<u64>(2).unwrap(), 30_000);
        assert!(signed.encoded.starts_with("0x"));
    }

    #[tokio::test]
    async fn test_fee_estimate() {
        let eth = adapter(Arc::new(MockRpc::default()));
        let estimate = eth
            .estimate_fee(DEST, DEST, Amount::from_u64(1))
            .await
            .unwrap();
        assert_eq!(estimate.fee, Amount::from_u64(21_000_000_000_000));
        assert_eq!(
            estimate.detail,
            FeeDetail::Evm {
                gas_limit: 21_000,
                gas_price: Amount::from_u64(1_000_000_000)
            }
        );
    }

    #[tokio::test]
    async fn test_block_scanner_skips_baseline() {
        let rpc = Arc::new(MockRpc::default());
        let me = evm_address(&[0xab; 64]).to_lowercase();
        let transfer = |hash: &str, block: u64, to: &str| EvmTransfer {
            hash: hash.to_string(),
            from: "0xffffffffffffffffffffffffffffffffffffffff".to_string(),
            to: Some(to.to_string()),
            value: Amount::from_u64(50),
            block,
        };
        *rpc.head.lock().unwrap() = 10;
        rpc.blocks.lock().unwrap().push(transfer("0xold", 10, &me));

        let mut scanner = BlockScanner {
            chain: "ethereum".into(),
            rpc: rpc.clone(),
            settings: AdapterSettings::default(),
            address: me.clone(),
            next_block: None,
            seen: SeenSet::new(16),
        };
        assert!(scanner.poll().await.unwrap().is_empty());

        rpc.blocks.lock().unwrap().extend([
            transfer("0xnew", 11, &me),
            transfer("0xother", 11, DEST),
            transfer("0xlater", 12, &me),
        ]);
        *rpc.head.lock().unwrap() = 12;
        let got: Vec<String> = scanner
            .poll()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.tx_hash)
            .collect();
        assert_eq!(got, vec!["0xnew", "0xlater"]);
        assert!(scanner.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_block_scanner_resumes_after_failed_block() {
        let rpc = Arc::new(MockRpc::default());
        let me = evm_address(&[0xcd; 64]).to_lowercase();
        let mut scanner = BlockScanner {
            chain: "ethereum".into(),
            rpc: rpc.clone(),
            settings: AdapterSettings::default(),
            address: me.clone(),
            next_block: None,
            seen: SeenSet::new(16),
        };
        *rpc.head.lock().unwrap() = 1;
        assert!(scanner.poll().await.unwrap().is_empty());

        for (hash, block) in [("0xa", 2), ("0xb", 3)] {
            rpc.blocks.lock().unwrap().push(EvmTransfer {
                hash: hash.to_string(),
                from: DEST.to_string(),
                to: Some(me.clone()),
                value: Amount::from_u64(1),
                block,
            });
        }
        *rpc.head.lock().unwrap() = 3;
        *rpc.failing_block.lock().unwrap() = Some(3);

        // 块 3 失败时保留块 2 的结果
        let got = scanner.poll().await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tx_hash, "0xa");

        *rpc.failing_block.lock().unwrap() = None;
        let got = scanner.poll().await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tx_hash, "0xb");
    }
}
