//! 日志脱敏工具
//!
//! 地址、交易载荷只以截断形式进入日志；种子和私钥永远不进入日志。

/// 可脱敏trait
pub trait SensitiveRedact {
    fn redact(&self) -> String;
}

/// 脱敏十六进制字符串（显示前缀和后缀）
pub fn redact_hex_string(hex: &str, show_chars: usize) -> String {
    if hex.len() <= show_chars * 2 || !hex.is_ascii() {
        return "*".repeat(hex.chars().count());
    }

    let prefix = &hex[..show_chars];
    let suffix = &hex[hex.len() - show_chars..];
    format!("{}...{}", prefix, suffix)
}

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 || !address.is_ascii() {
        return "*".repeat(address.chars().count());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

impl SensitiveRedact for crate::domain::DeriveParams {
    fn redact(&self) -> String {
        // 只保留链名和路径深度
        match &self.selector {
            crate::domain::PathSelector::Path(path) => {
                format!("{}:depth={}", self.chain, path.matches('/').count())
            }
            crate::domain::PathSelector::Indices { .. } => format!("{}:indices", self.chain),
        }
    }
}
