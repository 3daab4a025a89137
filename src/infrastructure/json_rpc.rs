//! JSON-RPC / REST HTTP 传输
//!
//! 传输层失败（连接、超时、5xx）按线性退避重试；节点返回的 JSON-RPC 错误不重试。

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{config::NetworkConfig, error::RpcError, infrastructure::rpc_validator};

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// 执行带重试的请求；只有 `Transport` / `Timeout` 会重试
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e @ (RpcError::Transport(_) | RpcError::Timeout))
                    if attempt < self.max_retries =>
                {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        request = label,
                        "RPC attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub(crate) fn http_client(config: &NetworkConfig) -> Result<reqwest::Client, RpcError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| RpcError::Transport(e.to_string()))
}

pub(crate) fn map_reqwest(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout
    } else if err.is_decode() {
        RpcError::InvalidResponse(err.to_string())
    } else {
        RpcError::Transport(err.to_string())
    }
}

/// JSON-RPC 2.0 客户端
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, config: &NetworkConfig) -> Result<Self, RpcError> {
        Ok(Self {
            http: http_client(config)?,
            url: url.into(),
            retry: RetryPolicy::from_config(config),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 调用方法并反序列化 `result`
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let result = self
            .retry
            .run(method, || self.call_once(method, params.clone()))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("{method}: {e}")))
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(method = method, id = id, endpoint = %self.url, "JSON-RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RpcError::Transport(format!("HTTP {status}")));
        }

        let body: Value = response.json().await.map_err(map_reqwest)?;
        rpc_validator::validate_rpc_response(body)
    }
}
