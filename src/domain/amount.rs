//! 精确金额类型
//!
//! 金额始终以链的最小单位（wei / lamports / sats）表示，底层为 256 位无符号整数，
//! 覆盖 EVM 的全部数值范围。人类可读单位的换算走 `rust_decimal`，不做任何浮点运算。

use std::{fmt, str::FromStr};

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `rust_decimal` 尾数位宽
const DECIMAL_MANTISSA_BITS: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount must not be negative")]
    Negative,
    #[error("amount has sub-unit precision: {0}")]
    Fractional(String),
    #[error("amount out of range: {0}")]
    Overflow(String),
    #[error("cannot parse amount: {0}")]
    Parse(String),
}

/// 链最小单位下的非负整数金额
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256([0; 4]));

    pub fn from_u64(value: u64) -> Self {
        Self(U256::from(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(U256::from(value))
    }

    /// 解析十进制字符串（如 "21000"），拒绝负数和小数；"5.000" 视为 5
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let parse_err = || AmountError::Parse(input.to_string());
        let trimmed = input.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (integer, fraction) = body.split_once('.').unwrap_or((body, ""));
        if integer.is_empty() && fraction.is_empty() {
            return Err(parse_err());
        }
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(integer) || !all_digits(fraction) {
            return Err(parse_err());
        }
        if !fraction.trim_end_matches('0').is_empty() {
            return Err(AmountError::Fractional(input.to_string()));
        }

        let value = if integer.is_empty() {
            U256::zero()
        } else {
            // 已确认全为数字，失败只可能是超出 256 位
            U256::from_dec_str(integer).map_err(|_| AmountError::Overflow(input.to_string()))?
        };
        if negative && !value.is_zero() {
            return Err(AmountError::Negative);
        }
        Ok(Self(value))
    }

    /// 解析 JSON-RPC 十六进制数量（如 "0x1bc16d674ec80000"）
    pub fn from_hex_quantity(input: &str) -> Result<Self, AmountError> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        if digits.is_empty() {
            return Err(AmountError::Parse(input.to_string()));
        }
        let significant = digits.trim_start_matches('0');
        if significant.is_empty() {
            return Ok(Self::ZERO);
        }
        if significant.len() > 64 {
            return Err(AmountError::Overflow(input.to_string()));
        }
        U256::from_str_radix(significant, 16)
            .map(Self)
            .map_err(|_| AmountError::Parse(input.to_string()))
    }

    /// JSON-RPC 十六进制数量
    pub fn to_hex_quantity(&self) -> String {
        format!("0x{:x}", self.0)
    }

    /// 从人类可读单位换算（如 1.5 ETH → wei），多余精度直接拒绝
    pub fn from_units(value: Decimal, decimals: u32) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative);
        }
        let normalized = value.normalize();
        let scale = normalized.scale();
        if scale > decimals {
            return Err(AmountError::Fractional(value.to_string()));
        }
        let overflow = || AmountError::Overflow(format!("{value} with {decimals} decimals"));
        let factor = U256::from(10u64)
            .checked_pow(U256::from(decimals - scale))
            .ok_or_else(overflow)?;
        U256::from(normalized.mantissa().unsigned_abs())
            .checked_mul(factor)
            .map(Self)
            .ok_or_else(overflow)
    }

    /// 换算为人类可读单位（如 wei → ETH），结果精确；超出 `Decimal` 范围时报错
    pub fn to_units(&self, decimals: u32) -> Result<Decimal, AmountError> {
        if self.0.bits() > DECIMAL_MANTISSA_BITS {
            return Err(AmountError::Overflow(self.0.to_string()));
        }
        let mantissa = i128::try_from(self.0.low_u128())
            .map_err(|_| AmountError::Overflow(self.0.to_string()))?;
        Decimal::try_from_i128_with_scale(mantissa, decimals)
            .map(|d| d.normalize())
            .map_err(|_| AmountError::Overflow(format!("{decimals} decimals")))
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// 结果为负时返回 `None`
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, other: Amount) -> Option<Amount> {
        self.0.checked_mul(other.0).map(Amount)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_u64(&self) -> Result<u64, AmountError> {
        if self.0.bits() > 64 {
            return Err(AmountError::Overflow(self.0.to_string()));
        }
        Ok(self.0.low_u64())
    }

    pub fn to_u128(&self) -> Result<u128, AmountError> {
        if self.0.bits() > 128 {
            return Err(AmountError::Overflow(self.0.to_string()));
        }
        Ok(self.0.low_u128())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_string()
    }
}
