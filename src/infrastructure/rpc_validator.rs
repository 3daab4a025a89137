// RPC响应校验模块 - 防止链上数据污染

use serde_json::Value;

use crate::{domain::Amount, error::RpcError};

fn invalid(msg: impl Into<String>) -> RpcError {
    RpcError::InvalidResponse(msg.into())
}

/// 验证RPC返回的余额值（十六进制 quantity）
pub fn validate_balance(balance_hex: &str) -> Result<Amount, RpcError> {
    if !balance_hex.starts_with("0x") {
        return Err(invalid(format!("balance is not a hex quantity: {balance_hex}")));
    }
    // 最多32字节 = 64个十六进制字符
    if balance_hex.len() > 66 {
        return Err(invalid(format!(
            "balance hex string too long: {}",
            balance_hex.len()
        )));
    }
    Amount::from_hex_quantity(balance_hex).map_err(|e| invalid(e.to_string()))
}

/// 验证十六进制 u64（nonce、gas、区块号）
pub fn validate_u64(hex_value: &str) -> Result<u64, RpcError> {
    let digits = hex_value
        .strip_prefix("0x")
        .ok_or_else(|| invalid(format!("not a hex quantity: {hex_value}")))?;
    if digits.is_empty() || digits.len() > 16 {
        return Err(invalid(format!("bad hex quantity length: {hex_value}")));
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid(format!("bad hex quantity: {hex_value}")))
}

/// 验证RPC返回的gas值
pub fn validate_gas(gas_hex: &str) -> Result<u64, RpcError> {
    let gas = validate_u64(gas_hex)?;

    // 最大gas limit：通常不超过30,000,000
    const MAX_REASONABLE_GAS: u64 = 30_000_000;
    if gas > MAX_REASONABLE_GAS {
        return Err(invalid(format!("gas exceeds reasonable maximum: {gas}")));
    }

    Ok(gas)
}

/// 验证交易哈希格式（32字节 = 64个十六进制字符）
pub fn validate_tx_hash(tx_hash: &str) -> Result<String, RpcError> {
    let hash = tx_hash.trim_start_matches("0x");

    if hash.len() != 64 {
        return Err(invalid(format!(
            "invalid transaction hash length: expected 64, got {}",
            hash.len()
        )));
    }

    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("invalid transaction hash: contains non-hex characters"));
    }

    Ok(format!("0x{}", hash.to_lowercase()))
}

/// 验证 JSON-RPC 响应信封，返回 `result` 字段
pub fn validate_rpc_response(mut json: Value) -> Result<Value, RpcError> {
    // 检查是否有error字段
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Err(RpcError::Rpc { code, message });
    }

    // 检查jsonrpc版本
    if let Some(version) = json.get("jsonrpc") {
        if version.as_str() != Some("2.0") {
            return Err(invalid(format!("unsupported JSON-RPC version: {version}")));
        }
    }

    // 检查是否有result字段
    json.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| invalid("missing result field in RPC response"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_validate_balance() {
        assert_eq!(
            validate_balance("0x1bc16d674ec80000").unwrap(),
            Amount::parse("2000000000000000000").unwrap()
        );
        assert_eq!(validate_balance("0x0").unwrap(), Amount::ZERO);
        assert!(validate_balance("invalid").is_err());
        assert!(validate_balance(&format!("0x{}", "f".repeat(65))).is_err());

        // 超过 2^96 的代币余额
        let large = validate_balance(&format!("0x{}", "f".repeat(40))).unwrap();
        assert_eq!(large.to_hex_quantity(), format!("0x{}", "f".repeat(40)));
    }

    #[test]
    fn test_validate_u64() {
        assert_eq!(validate_u64("0x5").unwrap(), 5);
        assert!(validate_u64("0x").is_err());
        assert!(validate_u64("12").is_err());
        assert!(validate_gas("0x5208").is_ok());
        assert!(validate_gas("0xffffffff").is_err());
    }

    #[test]
    fn test_validate_tx_hash() {
        let hash = format!("0x{}", "AB".repeat(32));
        assert_eq!(validate_tx_hash(&hash).unwrap(), format!("0x{}", "ab".repeat(32)));
        assert!(validate_tx_hash("0x1234").is_err());
    }

    #[test]
    fn test_validate_rpc_response() {
        let ok = json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"});
        assert_eq!(validate_rpc_response(ok).unwrap(), json!("0x10"));

        let err = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "nonce too low"}});
        assert_eq!(
            validate_rpc_response(err).unwrap_err(),
            RpcError::Rpc {
                code: -32000,
                message: "nonce too low".into()
            }
        );

        let missing = json!({"jsonrpc": "2.0", "id": 1});
        assert!(matches!(
            validate_rpc_response(missing),
            Err(RpcError::InvalidResponse(_))
        ));

        // result 为 null 也是合法响应（如查询不存在的交易）
        let null_result = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        assert_eq!(validate_rpc_response(null_result).unwrap(), Value::Null);
    }
}
