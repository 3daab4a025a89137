//! 比特币适配器（UTXO 模型）
//!
//! BIP84 派生，P2WPKH 地址。发送时按面额从大到小选取 UTXO，找零回到发送地址，
//! 每个输入用 BIP143 sighash 签名。节点访问走 Esplora 风格接口。

use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use sha2::{Digest, Sha256};

use crate::{
    domain::{
        address::bitcoin_network, Amount, ChainConfig, DeriveParams, FeeDetail, FeeEstimate,
        IncomingTransfer, KeyPair, MasterSeed, SignedTransaction, TransactionResult,
        TransferDirection, TransferRecord, TxConfig, UnsignedTransfer,
    },
    error::{AdapterError, DerivationError},
    service::{
        chain_adapter::{
            bounded, log_send, require_positive, AdapterSettings, Capabilities, ChainAdapter,
        },
        chain_client::{BitcoinRpc, BitcoinTx, Utxo},
        incoming_feed::{IncomingFeed, IncomingSource, SeenSet},
    },
    utils::address_validator::AddressValidator,
};

/// 低于该值的输出视为粉尘（sats）
pub const DUST_LIMIT: u64 = 546;
/// 默认目标确认块数
const FEE_TARGET_BLOCKS: u16 = 6;
const TX_VERSION: u32 = 2;
/// 启用 RBF，无锁定时间
const SEQUENCE: u32 = 0xffff_fffd;
const SIGHASH_ALL: u32 = 1;

fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

fn write_varint(n: u64, out: &mut Vec<u8>) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// 估算 P2WPKH 输入 + 给定输出脚本的虚拟大小
pub fn estimate_vsize(inputs: usize, output_scripts: &[usize]) -> u64 {
    let outputs: u64 = output_scripts.iter().map(|len| 9 + *len as u64).sum();
    11 + 68 * inputs as u64 + outputs
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 交易构建与签名
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// 内部字节序（即 txid hex 反转）
    pub prev_txid: [u8; 32],
    pub vout: u32,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegwitTransaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl TxInput {
    pub fn from_utxo(utxo: &Utxo) -> Result<Self, AdapterError> {
        let mut prev_txid = [0u8; 32];
        hex::decode_to_slice(&utxo.txid, &mut prev_txid)
            .map_err(|_| AdapterError::Network(format!("invalid utxo txid: {}", utxo.txid)))?;
        prev_txid.reverse();
        Ok(Self {
            prev_txid,
            vout: utxo.vout,
            value: utxo.value,
        })
    }

    fn write_outpoint(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.prev_txid);
        out.extend_from_slice(&self.vout.to_le_bytes());
    }
}

impl TxOutput {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_varint(self.script_pubkey.len() as u64, out);
        out.extend_from_slice(&self.script_pubkey);
    }
}

impl SegwitTransaction {
    /// BIP143 签名哈希；`pubkey_hash` 为花费者 HASH160
    pub fn sighash(&self, index: usize, pubkey_hash: &[u8; 20]) -> [u8; 32] {
        let mut prevouts = Vec::with_capacity(36 * self.inputs.len());
        let mut sequences = Vec::with_capacity(4 * self.inputs.len());
        for input in &self.inputs {
            input.write_outpoint(&mut prevouts);
            sequences.extend_from_slice(&SEQUENCE.to_le_bytes());
        }
        let mut outputs = Vec::new();
        for output in &self.outputs {
            output.write(&mut outputs);
        }

        let input = &self.inputs[index];
        let mut preimage = Vec::with_capacity(182);
        preimage.extend_from_slice(&TX_VERSION.to_le_bytes());
        preimage.extend_from_slice(&sha256d(&prevouts));
        preimage.extend_from_slice(&sha256d(&sequences));
        input.write_outpoint(&mut preimage);
        // scriptCode: OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
        preimage.extend_from_slice(&[0x19, 0x76, 0xa9, 0x14]);
        preimage.extend_from_slice(pubkey_hash);
        preimage.extend_from_slice(&[0x88, 0xac]);
        preimage.extend_from_slice(&input.value.to_le_bytes());
        preimage.extend_from_slice(&SEQUENCE.to_le_bytes());
        preimage.extend_from_slice(&sha256d(&outputs));
        preimage.extend_from_slice(&0u32.to_le_bytes());
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        sha256d(&preimage)
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        write_varint(self.inputs.len() as u64, out);
        for input in &self.inputs {
            input.write_outpoint(out);
            out.push(0x00);
            out.extend_from_slice(&SEQUENCE.to_le_bytes());
        }
        write_varint(self.outputs.len() as u64, out);
        for output in &self.outputs {
            output.write(out);
        }
    }

    /// 不含见证数据的序列化哈希（反转后的 hex）
    pub fn txid(&self) -> String {
        let mut legacy = Vec::new();
        legacy.extend_from_slice(&TX_VERSION.to_le_bytes());
        self.write_body(&mut legacy);
        legacy.extend_from_slice(&0u32.to_le_bytes());
        let mut hash = sha256d(&legacy);
        hash.reverse();
        hex::encode(hash)
    }

    /// 所有输入都属于同一个 P2WPKH 地址
    pub fn sign(
        &self,
        key: &SigningKey,
        pubkey_hash: &[u8; 20],
    ) -> Result<Vec<u8>, k256::ecdsa::Error> {
        let pubkey = key.verifying_key().to_encoded_point(true);

        let mut raw = Vec::new();
        raw.extend_from_slice(&TX_VERSION.to_le_bytes());
        raw.extend_from_slice(&[0x00, 0x01]);
        self.write_body(&mut raw);

        for index in 0..self.inputs.len() {
            let signature: Signature = key.sign_prehash(&self.sighash(index, pubkey_hash))?;
            let signature = signature.normalize_s().unwrap_or(signature);
            let mut der = signature.to_der().as_bytes().to_vec();
            der.push(SIGHASH_ALL as u8);

            write_varint(2, &mut raw);
            write_varint(der.len() as u64, &mut raw);
            raw.extend_from_slice(&der);
            write_varint(pubkey.as_bytes().len() as u64, &mut raw);
            raw.extend_from_slice(pubkey.as_bytes());
        }
        raw.extend_from_slice(&0u32.to_le_bytes());
        Ok(raw)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UTXO 选择
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub fee: u64,
    pub vsize: u64,
    /// 0 表示不产生找零输出
    pub change: u64,
}

fn fee_for(vsize: u64, fee_rate: u64) -> Result<u64, AdapterError> {
    vsize.checked_mul(fee_rate).ok_or_else(|| {
        AdapterError::InvalidAmount(format!("fee rate {fee_rate} sat/vB overflows"))
    })
}

fn with_fee(amount: u64, fee: u64) -> Result<u64, AdapterError> {
    amount
        .checked_add(fee)
        .ok_or_else(|| AdapterError::InvalidAmount("amount plus fee overflows".to_string()))
}

/// 面额从大到小累加，直到覆盖金额与手续费
///
/// 优先带找零；找零低于粉尘线或不足以支付找零输出时不设找零，余额并入手续费。
pub fn select_utxos(
    mut utxos: Vec<Utxo>,
    amount: u64,
    fee_rate: u64,
    destination_script_len: usize,
    change_script_len: usize,
) -> Result<Selection, AdapterError> {
    utxos.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut total: u64 = 0;
    for utxo in utxos.iter() {
        total = total.saturating_add(utxo.value);
        selected.push(utxo.clone());

        let with_change = estimate_vsize(selected.len(), &[destination_script_len, change_script_len]);
        let fee = fee_for(with_change, fee_rate)?;
        let required = with_fee(amount, fee)?;
        if total >= required && total - required >= DUST_LIMIT {
            return Ok(Selection {
                inputs: selected,
                fee,
                vsize: with_change,
                change: total - required,
            });
        }

        let without_change = estimate_vsize(selected.len(), &[destination_script_len]);
        let fee = fee_for(without_change, fee_rate)?;
        if total >= with_fee(amount, fee)? {
            return Ok(Selection {
                inputs: selected,
                fee: total - amount,
                vsize: without_change,
                change: 0,
            });
        }
    }

    // 全部输入、无找零时的最低需求
    let vsize = estimate_vsize(utxos.len().max(1), &[destination_script_len]);
    let required = with_fee(amount, fee_for(vsize, fee_rate)?)?;
    Err(AdapterError::InsufficientFunds {
        available: total.to_string(),
        required: required.to_string(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 适配器
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BitcoinAdapter {
    config: ChainConfig,
    rpc: Arc<dyn BitcoinRpc>,
    settings: AdapterSettings,
}

impl BitcoinAdapter {
    pub fn new(config: ChainConfig, rpc: Arc<dyn BitcoinRpc>, settings: AdapterSettings) -> Self {
        Self {
            config,
            rpc,
            settings,
        }
    }

    fn script_pubkey(&self, address: &str) -> Result<Vec<u8>, AdapterError> {
        let parsed = AddressValidator::parse_bitcoin(address, bitcoin_network(&self.config))?;
        Ok(parsed.script_pubkey().as_bytes().to_vec())
    }

    async fn fee_rate(&self, config: Option<&TxConfig>) -> Result<u64, AdapterError> {
        match config {
            Some(TxConfig::Bitcoin {
                fee_rate_sat_vb: Some(rate),
            }) => Ok((*rate).max(1)),
            None | Some(TxConfig::Bitcoin { .. }) => bounded(
                &self.settings,
                &self.config.name,
                "fee-estimates",
                self.rpc.fee_rate(FEE_TARGET_BLOCKS),
            )
            .await
            .map(|rate| rate.max(1)),
            Some(_) => Err(AdapterError::Rejected {
                chain: self.config.name.clone(),
                reason: "transaction config is not for Bitcoin".to_string(),
            }),
        }
    }

    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, AdapterError> {
        bounded(
            &self.settings,
            &self.config.name,
            "address/utxo",
            self.rpc.list_utxos(address),
        )
        .await
    }

    async fn build_signed(
        &self,
        keypair: &KeyPair,
        from: &str,
        transfer: &UnsignedTransfer,
        config: Option<&TxConfig>,
    ) -> Result<SignedTransaction, AdapterError> {
        require_positive(&transfer.amount)?;
        let amount = transfer.amount.to_u64()?;
        if amount < DUST_LIMIT {
            return Err(AdapterError::InvalidAmount(format!(
                "{amount} sats is below the dust limit of {DUST_LIMIT}"
            )));
        }
        let destination = self.script_pubkey(&transfer.to)?;
        let change_script = self.script_pubkey(from)?;
        let pubkey_hash: [u8; 20] = change_script
            .get(2..22)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                AdapterError::Derivation(DerivationError::AddressEncoding(
                    "sender is not a P2WPKH address".to_string(),
                ))
            })?;

        let fee_rate = self.fee_rate(config).await?;
        let utxos = self.utxos(from).await?;
        let selection = select_utxos(
            utxos,
            amount,
            fee_rate,
            destination.len(),
            change_script.len(),
        )?;

        let mut outputs = vec![TxOutput {
            value: amount,
            script_pubkey: destination,
        }];
        if selection.change > 0 {
            outputs.push(TxOutput {
                value: selection.change,
                script_pubkey: change_script,
            });
        }
        let tx = SegwitTransaction {
            inputs: selection
                .inputs
                .iter()
                .map(TxInput::from_utxo)
                .collect::<Result<_, _>>()?,
            outputs,
        };

        let key = keypair.secp256k1_signing_key().ok_or_else(|| {
            AdapterError::Derivation(DerivationError::UnsupportedCurve(keypair.curve()))
        })?;
        let raw = tx.sign(key, &pubkey_hash).map_err(|e| AdapterError::Rejected {
            chain: self.config.name.clone(),
            reason: format!("signing failed: {e}"),
        })?;

        tracing::debug!(
            chain = %self.config.name,
            inputs = tx.inputs.len(),
            fee = selection.fee,
            vsize = selection.vsize,
            change = selection.change,
            "bitcoin transaction built"
        );
        Ok(SignedTransaction {
            encoded: hex::encode(&raw),
            raw,
            tx_hash: tx.txid(),
        })
    }

    async fn transactions(&self, address: &str) -> Result<Vec<BitcoinTx>, AdapterError> {
        bounded(
            &self.settings,
            &self.config.name,
            "address/txs",
            self.rpc.address_transactions(address),
        )
        .await
    }
}

/// 从地址视角归一化一笔交易
fn to_record(address: &str, tx: BitcoinTx) -> TransferRecord {
    let spent = tx.spent_by(address);
    let received = tx.received_by(address);
    let first_other_output = tx
        .outputs
        .iter()
        .find(|o| o.address.as_deref().is_some_and(|a| a != address))
        .and_then(|o| o.address.clone());

    let (direction, from, to, amount) = if spent == 0 {
        let from = tx
            .inputs
            .iter()
            .find_map(|i| i.address.clone())
            .unwrap_or_default();
        (TransferDirection::Incoming, from, address.to_string(), received)
    } else if let Some(to) = first_other_output {
        let sent: u64 = tx
            .outputs
            .iter()
            .filter(|o| o.address.as_deref() != Some(address))
            .map(|o| o.value)
            .sum();
        (TransferDirection::Outgoing, address.to_string(), to, sent)
    } else {
        (
            TransferDirection::SelfTransfer,
            address.to_string(),
            address.to_string(),
            received,
        )
    };

    TransferRecord {
        tx_hash: tx.txid,
        from,
        to,
        amount: Amount::from_u64(amount),
        direction,
        block: tx.block_height,
    }
}

#[async_trait]
impl ChainAdapter for BitcoinAdapter {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    async fn balance(&self, address: &str) -> Result<Amount, AdapterError> {
        let sats = bounded(
            &self.settings,
            &self.config.name,
            "address",
            self.rpc.get_balance(address),
        )
        .await?;
        Ok(Amount::from_u64(sats))
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
        let signed = self
            .build_signed(&keypair, &from, &UnsignedTransfer::new(to, amount), config)
            .await?;
        drop(keypair);

        let txid = bounded(
            &self.settings,
            &self.config.name,
            "tx",
            self.rpc.broadcast(&signed.encoded),
        )
        .await?;
        if txid != signed.tx_hash {
            tracing::warn!(
                chain = %self.config.name,
                local = %signed.tx_hash,
                node = %txid,
                "node returned a different txid"
            );
        }

        log_send(&self.config.name, &from, to, &amount, &txid);
        Ok(TransactionResult::new(txid))
    }

    async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<FeeEstimate, AdapterError> {
        let amount = amount.to_u64()?;
        let destination = self.script_pubkey(to)?;
        let change_script = self.script_pubkey(from)?;
        let fee_rate = self.fee_rate(None).await?;
        let utxos = self.utxos(from).await?;

        let (fee, vsize) = match select_utxos(
            utxos,
            amount,
            fee_rate,
            destination.len(),
            change_script.len(),
        ) {
            Ok(selection) => (selection.fee, selection.vsize),
            // 余额不足时按单输入、带找零估算
            Err(AdapterError::InsufficientFunds { .. }) => {
                let vsize = estimate_vsize(1, &[destination.len(), change_script.len()]);
                (fee_for(vsize, fee_rate)?, vsize)
            }
            Err(e) => return Err(e),
        };

        Ok(FeeEstimate {
            fee: Amount::from_u64(fee),
            detail: FeeDetail::Bitcoin {
                vsize,
                fee_rate_sat_vb: fee_rate,
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
        self.build_signed(&keypair, &from, transfer, config).await
    }

    async fn history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, AdapterError> {
        Ok(self
            .transactions(address)
            .await?
            .into_iter()
            .take(limit)
            .map(|tx| to_record(address, tx))
            .collect())
    }

    async fn fetch_latest_tx(
        &self,
        address: &str,
    ) -> Result<Option<TransferRecord>, AdapterError> {
        Ok(self
            .transactions(address)
            .await?
            .into_iter()
            .next()
            .map(|tx| to_record(address, tx)))
    }

    async fn subscribe(&self, address: &str) -> Result<IncomingFeed, AdapterError> {
        self.script_pubkey(address)?;
        let poller = AddressPoller {
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

struct AddressPoller {
    chain: String,
    rpc: Arc<dyn BitcoinRpc>,
    settings: AdapterSettings,
    address: String,
    seen: SeenSet,
    primed: bool,
}

#[async_trait]
impl IncomingSource for AddressPoller {
    async fn poll(&mut self) -> Result<Vec<IncomingTransfer>, AdapterError> {
        let txs = bounded(
            &self.settings,
            &self.chain,
            "address/txs",
            self.rpc.address_transactions(&self.address),
        )
        .await?;

        if !self.primed {
            for tx in &txs {
                self.seen.insert(&tx.txid);
            }
            self.primed = true;
            return Ok(Vec::new());
        }

        let mut incoming = Vec::new();
        for tx in txs.iter().rev() {
            if !self.seen.insert(&tx.txid) {
                continue;
            }
            let received = tx.received_by(&self.address);
            if received > 0 && tx.spent_by(&self.address) == 0 {
                incoming.push(IncomingTransfer {
                    tx_hash: tx.txid.clone(),
                    amount: Amount::from_u64(received),
                });
            }
        }
        Ok(incoming)
    }
}
