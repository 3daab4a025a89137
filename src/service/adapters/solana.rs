//! Solana 适配器
//!
//! SLIP-0010 ed25519 派生（`m/44'/501'/account'/change'`），
//! System Program transfer 指令，legacy 消息格式，ed25519 签名。

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::Signer;

use crate::{
    domain::{
        Amount, ChainConfig, DeriveParams, FeeDetail, FeeEstimate, IncomingTransfer, KeyPair,
        MasterSeed, SignedTransaction, TransactionResult, TransferRecord, TxConfig,
        UnsignedTransfer,
    },
    error::{AdapterError, DerivationError},
    infrastructure::log_redact::redact_address,
    service::{
        chain_adapter::{
            bounded, log_send, require_funds, require_positive, AdapterSettings, Capabilities,
            ChainAdapter,
        },
        chain_client::{SignatureInfo, SolanaRpc},
        incoming_feed::{IncomingFeed, IncomingSource, SeenSet},
    },
    utils::address_validator::AddressValidator,
};

/// System Program 地址（全零公钥）
const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];
/// SystemInstruction::Transfer
const TRANSFER_INSTRUCTION: u32 = 2;
/// 订阅轮询每页拉取的签名数
const POLL_SIGNATURE_LIMIT: usize = 25;
/// 单次轮询最多回溯的页数
const POLL_MAX_PAGES: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Legacy 消息编码
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// compact-u16（shortvec）长度前缀
fn encode_compact_u16(mut value: u16, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// 单条 transfer 指令的消息
pub fn transfer_message(
    from: &[u8; 32],
    to: &[u8; 32],
    lamports: u64,
    recent_blockhash: &[u8; 32],
) -> Vec<u8> {
    // 账户顺序：签名可写 → 非签名可写 → 只读非签名
    let mut keys: Vec<&[u8; 32]> = vec![from];
    if to != from {
        keys.push(to);
    }
    keys.push(&SYSTEM_PROGRAM_ID);
    let to_index = if to == from { 0u8 } else { 1u8 };
    let program_index = (keys.len() - 1) as u8;

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&TRANSFER_INSTRUCTION.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    let mut message = Vec::with_capacity(160);
    // header: 1 个签名者，0 个只读签名者，1 个只读非签名者
    message.extend_from_slice(&[1, 0, 1]);
    encode_compact_u16(keys.len() as u16, &mut message);
    for key in &keys {
        message.extend_from_slice(*key);
    }
    message.extend_from_slice(recent_blockhash);

    encode_compact_u16(1, &mut message);
    message.push(program_index);
    encode_compact_u16(2, &mut message);
    message.extend_from_slice(&[0, to_index]);
    encode_compact_u16(data.len() as u16, &mut message);
    message.extend_from_slice(&data);
    message
}

/// 签名后的交易：签名数 + 签名 + 消息
fn signed_transaction(signature: &[u8; 64], message: &[u8]) -> Vec<u8> {
    let mut tx = Vec::with_capacity(1 + 64 + message.len());
    encode_compact_u16(1, &mut tx);
    tx.extend_from_slice(signature);
    tx.extend_from_slice(message);
    tx
}

fn decode_blockhash(blockhash: &str) -> Result<[u8; 32], AdapterError> {
    bs58::decode(blockhash)
        .into_vec()
        .ok()
        .and_then(|v| <[u8; 32]>::try_from(v).ok())
        .ok_or_else(|| AdapterError::Network(format!("invalid blockhash: {blockhash}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 适配器
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SolanaAdapter {
    config: ChainConfig,
    rpc: Arc<dyn SolanaRpc>,
    settings: AdapterSettings,
}

struct Prepared {
    message: Vec<u8>,
    fee: u64,
}

impl SolanaAdapter {
    pub fn new(config: ChainConfig, rpc: Arc<dyn SolanaRpc>, settings: AdapterSettings) -> Self {
        Self {
            config,
            rpc,
            settings,
        }
    }

    async fn recent_blockhash(&self, config: Option<&TxConfig>) -> Result<[u8; 32], AdapterError> {
        let configured = match config {
            None => None,
            Some(TxConfig::Solana { recent_blockhash }) => recent_blockhash.clone(),
            Some(_) => {
                return Err(AdapterError::Rejected {
                    chain: self.config.name.clone(),
                    reason: "transaction config is not for Solana".to_string(),
                })
            }
        };
        let blockhash = match configured {
            Some(b) => b,
            None => {
                bounded(
                    &self.settings,
                    &self.config.name,
                    "getLatestBlockhash",
                    self.rpc.get_latest_blockhash(),
                )
                .await?
            }
        };
        decode_blockhash(&blockhash)
    }

    async fn prepare(
        &self,
        from: &str,
        transfer: &UnsignedTransfer,
        config: Option<&TxConfig>,
    ) -> Result<Prepared, AdapterError> {
        require_positive(&transfer.amount)?;
        let lamports = transfer.amount.to_u64()?;
        let to = AddressValidator::parse_solana(&transfer.to)?;
        let from = AddressValidator::parse_solana(from)?;

        let blockhash = self.recent_blockhash(config).await?;
        let message = transfer_message(&from, &to, lamports, &blockhash);
        let fee = bounded(
            &self.settings,
            &self.config.name,
            "getFeeForMessage",
            self.rpc.get_fee_for_message(&BASE64.encode(&message)),
        )
        .await?;
        Ok(Prepared { message, fee })
    }

    fn sign_message(keypair: &KeyPair, message: &[u8]) -> Result<SignedTransaction, AdapterError> {
        let key = keypair.ed25519_signing_key().ok_or_else(|| {
            AdapterError::Derivation(DerivationError::UnsupportedCurve(keypair.curve()))
        })?;
        let signature = key.sign(message).to_bytes();
        let raw = signed_transaction(&signature, message);
        Ok(SignedTransaction {
            encoded: BASE64.encode(&raw),
            raw,
            tx_hash: bs58::encode(signature).into_string(),
        })
    }

    /// 从最近 `signature_limit` 笔签名中提取与地址相关的转账
    async fn transfer_records(
        &self,
        address: &str,
        signature_limit: usize,
        max_records: usize,
    ) -> Result<Vec<TransferRecord>, AdapterError> {
        let signatures = bounded(
            &self.settings,
            &self.config.name,
            "getSignaturesForAddress",
            self.rpc.get_signatures_for_address(address, signature_limit, None),
        )
        .await?;

        let mut records = Vec::new();
        for info in signatures.into_iter().filter(|s| !s.failed) {
            let transfers = bounded(
                &self.settings,
                &self.config.name,
                "getTransaction",
                self.rpc.get_transfers(&info.signature),
            )
            .await?;
            for t in transfers {
                if t.from != address && t.to != address {
                    continue;
                }
                records.push(TransferRecord {
                    direction: TransferRecord::direction_for(address, &t.from, &t.to),
                    tx_hash: t.signature,
                    from: t.from,
                    to: t.to,
                    amount: Amount::from_u64(t.lamports),
                    block: Some(t.slot),
                });
                if records.len() >= max_records {
                    return Ok(records);
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    async fn balance(&self, address: &str) -> Result<Amount, AdapterError> {
        let lamports = bounded(
            &self.settings,
            &self.config.name,
            "getBalance",
            self.rpc.get_balance(address),
        )
        .await?;
        Ok(Amount::from_u64(lamports))
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
        let prepared = self.prepare(&from, &transfer, config).await?;

        let available = self.balance(&from).await?;
        let required = amount
            .checked_add(Amount::from_u64(prepared.fee))
            .ok_or_else(|| AdapterError::InvalidAmount("amount plus fee overflows".to_string()))?;
        require_funds(available, required)?;

        let signed = Self::sign_message(&keypair, &prepared.message)?;
        drop(keypair);

        let signature = bounded(
            &self.settings,
            &self.config.name,
            "sendTransaction",
            self.rpc.send_transaction(&signed.encoded),
        )
        .await?;

        log_send(&self.config.name, &from, to, &amount, &signature);
        Ok(TransactionResult::new(signature))
    }

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<FeeEstimate, AdapterError> {
        let prepared = self
            .prepare(from, &UnsignedTransfer::new(to, amount), None)
            .await?;
        Ok(FeeEstimate {
            fee: Amount::from_u64(prepared.fee),
            detail: FeeDetail::Solana {
                lamports_per_signature: prepared.fee,
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
        let prepared = self.prepare(&from, transfer, config).await?;
        Self::sign_message(&keypair, &prepared.message)
    }

    async fn history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, AdapterError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.transfer_records(address, limit, limit).await
    }

    async fn fetch_latest_tx(
        &self,
        address: &str,
    ) -> Result<Option<TransferRecord>, AdapterError> {
        Ok(self
            .transfer_records(address, 10, 1)
            .await?
            .into_iter()
            .next())
    }

    async fn subscribe(&self, address: &str) -> Result<IncomingFeed, AdapterError> {
        AddressValidator::parse_solana(address)?;
        let poller = SignaturePoller {
            chain: self.config.name.clone(),
            rpc: self.rpc.clone(),
            settings: self.settings,
            address: address.to_string(),
            seen: SeenSet::new(1024),
            primed: false,
        };
        Ok(IncomingFeed::spawn(
            poller,
            self.settings.poll_interval,
            format!("{}:{}", self.config.name, address),
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 入账轮询
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SignaturePoller {
    chain: String,
    rpc: Arc<dyn SolanaRpc>,
    settings: AdapterSettings,
    address: String,
    seen: SeenSet,
    /// 首轮只记录已有签名
    primed: bool,
}

impl SignaturePoller {
    async fn page(&self, before: Option<&str>) -> Result<Vec<SignatureInfo>, AdapterError> {
        bounded(
            &self.settings,
            &self.chain,
            "getSignaturesForAddress",
            self.rpc
                .get_signatures_for_address(&self.address, POLL_SIGNATURE_LIMIT, before),
        )
        .await
    }

    /// 向前翻页直到遇见已处理的签名，返回新签名（时间倒序）
    async fn unseen_signatures(&self) -> Result<Vec<SignatureInfo>, AdapterError> {
        let mut unseen = Vec::new();
        for _ in 0..POLL_MAX_PAGES {
            let before = unseen.last().map(|s: &SignatureInfo| s.signature.clone());
            let page = self.page(before.as_deref()).await?;
            let full = page.len() >= POLL_SIGNATURE_LIMIT;
            for info in page {
                if self.seen.contains(&info.signature) {
                    return Ok(unseen);
                }
                unseen.push(info);
            }
            if !full {
                return Ok(unseen);
            }
        }
        tracing::warn!(
            chain = %self.chain,
            address = %redact_address(&self.address),
            scanned = unseen.len(),
            "signature backlog exceeds poll window, older signatures skipped"
        );
        Ok(unseen)
    }
}

#[async_trait]
impl IncomingSource for SignaturePoller {
    async fn poll(&mut self) -> Result<Vec<IncomingTransfer>, AdapterError> {
        if !self.primed {
            for info in self.page(None).await? {
                self.seen.insert(&info.signature);
            }
            self.primed = true;
            return Ok(Vec::new());
        }

        let signatures = self.unseen_signatures().await?;
        let mut incoming = Vec::new();
        // 接口按时间倒序返回，按链上顺序投递；失败时保留后续签名留待下轮
        for info in signatures.iter().rev() {
            if !info.failed {
                let transfers = match bounded(
                    &self.settings,
                    &self.chain,
                    "getTransaction",
                    self.rpc.get_transfers(&info.signature),
                )
                .await
                {
                    Ok(t) => t,
                    Err(e) if incoming.is_empty() => return Err(e),
                    Err(_) => break,
                };
                incoming.extend(
                    transfers
                        .into_iter()
                        .filter(|t| t.to == self.address && t.lamports > 0)
                        .map(|t| IncomingTransfer {
                            tx_hash: t.signature,
                            amount: Amount::from_u64(t.lamports),
                        }),
                );
            }
            self.seen.insert(&info.signature);
        }
        Ok(incoming)
    }
}
