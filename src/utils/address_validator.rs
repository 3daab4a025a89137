//! 地址验证模块
//!
//! 按链的地址格式解析转账目标地址，失败统一返回 `InvalidDestination`。

use std::str::FromStr;

use crate::{
    domain::{
        address::{bitcoin_network, to_checksum_address},
        chain_config::{AddressFormat, ChainConfig},
    },
    error::AdapterError,
};

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 验证地址格式
    pub fn validate(chain: &ChainConfig, address: &str) -> Result<(), AdapterError> {
        match chain.address_format {
            AddressFormat::Hex => Self::parse_evm(address).map(|_| ()),
            AddressFormat::SolanaBase58 => Self::parse_solana(address).map(|_| ()),
            AddressFormat::Bech32 => Self::parse_bitcoin(address, bitcoin_network(chain)).map(|_| ()),
        }
    }

    /// 解析 EVM 地址（支持 EIP-55 Checksum）
    ///
    /// 全小写或全大写视为未带校验和；大小写混合时必须与 EIP-55 编码一致。
    pub fn parse_evm(address: &str) -> Result<[u8; 20], AdapterError> {
        let invalid = |reason: &str| AdapterError::InvalidDestination(format!("{address}: {reason}"));

        let hex_part = address
            .strip_prefix("0x")
            .ok_or_else(|| invalid("missing 0x prefix"))?;
        if hex_part.len() != 40 {
            return Err(invalid("expected 20 bytes"));
        }

        let mut raw = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut raw).map_err(|_| invalid("not hex"))?;

        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && to_checksum_address(&raw) != address {
            return Err(invalid("EIP-55 checksum mismatch"));
        }

        Ok(raw)
    }

    /// 解析 Solana 地址（32 字节 Base58）
    pub fn parse_solana(address: &str) -> Result<[u8; 32], AdapterError> {
        let bytes = bs58::decode(address)
            .into_vec()
            .map_err(|e| AdapterError::InvalidDestination(format!("{address}: {e}")))?;
        bytes.try_into().map_err(|v: Vec<u8>| {
            AdapterError::InvalidDestination(format!("{address}: expected 32 bytes, got {}", v.len()))
        })
    }

    /// 解析比特币地址并校验网络
    pub fn parse_bitcoin(
        address: &str,
        network: bitcoin::Network,
    ) -> Result<bitcoin::Address, AdapterError> {
        bitcoin::Address::from_str(address)
            .map_err(|e| AdapterError::InvalidDestination(format!("{address}: {e}")))?
            .require_network(network)
            .map_err(|e| AdapterError::InvalidDestination(format!("{address}: {e}")))
    }
}
