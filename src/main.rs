//! ironwallet 开发工具
//!
//! 加载配置、初始化日志、装配链注册表，并为 `WALLET_MNEMONIC` 打印各链派生地址；
//! 未设置时生成一次性助记词。
//! 仅用于测试环境。

use std::sync::Arc;

use anyhow::{Context, Result};
use ironwallet::{
    config::Config,
    domain::{DeriveParams, MasterSeed},
    infrastructure::init_logging,
    service::{adapters::build_registry, HdWallet},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量
    dotenvy::dotenv().ok();

    // 2. 加载配置（CONFIG_PATH 可选）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate()?;

    // 3. 日志；guard 必须存活到进程结束
    let _log_guard = init_logging(&config.logging)?;
    tracing::info!(chains = config.chains.len(), "ironwallet dev-tools starting");

    // 4. 注册表与钱包
    let registry = Arc::new(build_registry(&config)?);
    let phrase = match std::env::var("WALLET_MNEMONIC") {
        Ok(phrase) => phrase,
        // 未配置时生成一次性助记词（WALLET_WORD_COUNT: 12 或 24）
        Err(_) => {
            let words: usize = std::env::var("WALLET_WORD_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12);
            let phrase = MasterSeed::generate_mnemonic(words)
                .context("WALLET_WORD_COUNT must be 12 or 24")?;
            tracing::warn!(words = words, "WALLET_MNEMONIC not set, using a freshly generated mnemonic");
            println!("mnemonic	{phrase}");
            phrase
        }
    };
    let passphrase = std::env::var("WALLET_PASSPHRASE").unwrap_or_default();
    let seed = MasterSeed::from_mnemonic(phrase.trim(), &passphrase)?;
    drop(phrase);
    let wallet = HdWallet::new(seed, registry);

    let count: u32 = std::env::var("WALLET_ADDRESS_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    for chain in wallet.supported_chains() {
        for index in 0..count {
            let params = DeriveParams::index(chain.as_str(), index);
            match wallet.derive_address(&params) {
                Ok(address) => println!("{chain}\t{index}\t{address}"),
                Err(e) => tracing::error!(chain = %chain, index = index, error = %e, "derivation failed"),
            }
        }
    }

    wallet.shutdown();
    Ok(())
}
