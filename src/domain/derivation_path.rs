//! BIP32 派生路径
//!
//! 语法：`m/<seg>(/<seg>)*`，每段为 `< 2^31` 的十进制数，
//! 可带硬化标记 `'`、`h` 或 `H`。单独的 `m` 表示主节点。

use std::{fmt, str::FromStr};

use crate::error::DerivationError;

/// 硬化索引偏移量
pub const HARDENED_OFFSET: u32 = 0x8000_0000;
/// BIP32 序列化深度字段为 1 字节
pub const MAX_DEPTH: usize = 255;

/// 单个子节点索引（不含硬化偏移），只能经由范围检查的构造函数创建
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildIndex {
    index: u32,
    hardened: bool,
}

impl ChildIndex {
    pub fn normal(index: u32) -> Result<Self, DerivationError> {
        check_range(index)?;
        Ok(Self {
            index,
            hardened: false,
        })
    }

    pub fn hardened(index: u32) -> Result<Self, DerivationError> {
        check_range(index)?;
        Ok(Self {
            index,
            hardened: true,
        })
    }

    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    /// 去掉硬化偏移后的索引
    pub fn index(&self) -> u32 {
        self.index
    }

    /// BIP32 序列化形式（硬化索引加上 2^31）
    pub fn to_bip32(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED_OFFSET
        } else {
            self.index
        }
    }
}

fn check_range(index: u32) -> Result<(), DerivationError> {
    if index >= HARDENED_OFFSET {
        return Err(DerivationError::InvalidPath(format!(
            "index {index} must be below 2^31"
        )));
    }
    Ok(())
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// 已解析的派生路径
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DerivationPath(Vec<ChildIndex>);

impl DerivationPath {
    pub fn master() -> Self {
        Self(Vec::new())
    }

    pub fn from_indices(indices: Vec<ChildIndex>) -> Result<Self, DerivationError> {
        if indices.len() > MAX_DEPTH {
            return Err(DerivationError::InvalidPath(format!(
                "depth {} exceeds {MAX_DEPTH}",
                indices.len()
            )));
        }
        Ok(Self(indices))
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_master(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_fully_hardened(&self) -> bool {
        self.0.iter().all(ChildIndex::is_hardened)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildIndex> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ChildIndex] {
        &self.0
    }

    /// 追加一个子节点，返回新路径
    pub fn child(&self, index: ChildIndex) -> Result<Self, DerivationError> {
        let mut indices = self.0.clone();
        indices.push(index);
        Self::from_indices(indices)
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DerivationError::InvalidPath(format!("{path}: {reason}"));

        // 1. 根节点
        let mut segments = path.split('/');
        if segments.next() != Some("m") {
            return Err(invalid("must start with 'm'"));
        }

        // 2. 逐段解析
        let mut indices = Vec::new();
        for segment in segments {
            let (digits, hardened) = match segment
                .strip_suffix('\'')
                .or_else(|| segment.strip_suffix('h'))
                .or_else(|| segment.strip_suffix('H'))
            {
                Some(rest) => (rest, true),
                None => (segment, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(&format!("bad segment '{segment}'")));
            }
            let value: u32 = digits
                .parse()
                .map_err(|_| invalid(&format!("segment '{segment}' out of range")))?;
            let index = if hardened {
                ChildIndex::hardened(value)
            } else {
                ChildIndex::normal(value)
            }
            .map_err(|_| invalid(&format!("segment '{segment}' must be below 2^31")))?;
            indices.push(index);

            // 3. 深度上限
            if indices.len() > MAX_DEPTH {
                return Err(invalid(&format!("depth exceeds {MAX_DEPTH}")));
            }
        }

        Ok(Self(indices))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

impl TryFrom<&str> for DerivationPath {
    type Error = DerivationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}
