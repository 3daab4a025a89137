//! 入账通知流
//!
//! 适配器提供一个 [`IncomingSource`]，这里负责按固定间隔轮询并把结果推进通道。
//! feed 被丢弃时轮询任务随之终止。

use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{domain::IncomingTransfer, error::AdapterError};

const FEED_BUFFER: usize = 64;

/// 一次轮询返回自上次以来的新入账，按协作方给出的顺序
#[async_trait]
pub trait IncomingSource: Send + 'static {
    async fn poll(&mut self) -> Result<Vec<IncomingTransfer>, AdapterError>;
}

pub struct IncomingFeed {
    rx: mpsc::Receiver<IncomingTransfer>,
    task: Option<JoinHandle<()>>,
}

impl IncomingFeed {
    /// 启动轮询任务；首个 tick 立即执行
    pub fn spawn<S: IncomingSource>(mut source: S, interval: Duration, label: String) -> Self {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(feed = %label, interval_ms = interval.as_millis() as u64, "incoming feed started");
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match source.poll().await {
                    Ok(transfers) => {
                        for transfer in transfers {
                            if tx.send(transfer).await.is_err() {
                                tracing::debug!(feed = %label, "incoming feed receiver dropped");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(feed = %label, error = %e, "incoming poll failed");
                    }
                }
            }
        });

        Self {
            rx,
            task: Some(task),
        }
    }

    /// 由外部通道驱动（推送型协作方或测试）
    pub fn from_receiver(rx: mpsc::Receiver<IncomingTransfer>) -> Self {
        Self { rx, task: None }
    }

    /// 下一笔入账；来源结束时返回 `None`
    pub async fn next(&mut self) -> Option<IncomingTransfer> {
        self.rx.recv().await
    }
}

impl Drop for IncomingFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 有界去重集合，超出容量时淘汰最早的条目
#[derive(Debug)]
pub struct SeenSet {
    order: VecDeque<String>,
    set: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// 首次出现返回 `true`
    pub fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.set.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
