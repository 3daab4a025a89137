//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::chain_config;

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    /// 要注册的链及其 RPC 端点
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainEndpoint>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// 链协作方调用参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 单次 RPC 调用的超时
    pub request_timeout_secs: u64,
    /// 入账轮询间隔
    pub poll_interval_secs: u64,
    /// 传输层失败的重试次数
    pub max_retries: u32,
    /// 线性退避基数
    pub retry_delay_ms: u64,
}

/// 单条链的端点配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoint {
    /// 内置链名称或别名（见 `chain_config::PRESETS`）
    pub chain: String,
    /// EVM / Solana 为 JSON-RPC 地址，Bitcoin 为 Esplora REST 根地址
    pub rpc_url: String,
    /// 覆盖全局轮询间隔
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: std::env::var("LOG_FILE_ENABLED")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: std::env::var("RPC_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            poll_interval_secs: std::env::var("POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            max_retries: std::env::var("RPC_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: std::env::var("RPC_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        }
    }
}

fn endpoint(chain: &str, env_key: &str, fallback: Option<&str>) -> Option<ChainEndpoint> {
    let rpc_url = std::env::var(env_key)
        .ok()
        .or_else(|| fallback.map(str::to_string))?;
    Some(ChainEndpoint {
        chain: chain.to_string(),
        rpc_url,
        poll_interval_secs: None,
    })
}

/// 主网默认使用公共端点，测试网只在设置了环境变量时启用
fn default_chains() -> Vec<ChainEndpoint> {
    [
        endpoint("ethereum", "ETH_RPC_URL", Some("https://ethereum-rpc.publicnode.com")),
        endpoint("sepolia", "SEPOLIA_RPC_URL", None),
        endpoint("bsc", "BSC_RPC_URL", Some("https://bsc-dataseed1.binance.org")),
        endpoint("polygon", "POLYGON_RPC_URL", Some("https://polygon-rpc.com")),
        endpoint("arbitrum", "ARBITRUM_RPC_URL", Some("https://arb1.arbitrum.io/rpc")),
        endpoint("optimism", "OPTIMISM_RPC_URL", Some("https://mainnet.optimism.io")),
        endpoint(
            "avalanche",
            "AVALANCHE_RPC_URL",
            Some("https://api.avax.network/ext/bc/C/rpc"),
        ),
        endpoint(
            "solana",
            "SOLANA_RPC_URL",
            Some("https://api.mainnet-beta.solana.com"),
        ),
        endpoint("solana-devnet", "SOLANA_DEVNET_RPC_URL", None),
        endpoint("bitcoin", "BITCOIN_RPC_URL", Some("https://blockstream.info/api")),
        endpoint("bitcoin-testnet", "BITCOIN_TESTNET_RPC_URL", None),
    ]
    .into_iter()
    .flatten()
    .collect()
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            logging: LoggingConfig::default(),
            network: NetworkConfig::default(),
            chains: default_chains(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path),
            _ => Self::from_env(),
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.network.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }
        if self.network.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        // 验证链端点
        let mut seen = HashSet::new();
        for endpoint in &self.chains {
            let preset = chain_config::preset(&endpoint.chain)
                .with_context(|| format!("Unknown chain in config: {}", endpoint.chain))?;
            if !seen.insert(preset.name.clone()) {
                anyhow::bail!("Chain configured twice: {}", preset.name);
            }
            if !endpoint.rpc_url.starts_with("http://") && !endpoint.rpc_url.starts_with("https://")
            {
                anyhow::bail!(
                    "rpc_url for {} must start with http:// or https://",
                    endpoint.chain
                );
            }
            if endpoint.poll_interval_secs == Some(0) {
                anyhow::bail!("poll_interval_secs for {} must be greater than 0", endpoint.chain);
            }
        }

        Ok(())
    }
}
