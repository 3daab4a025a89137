//! 订阅管理
//!
//! 每个 (chain, address) 只有一个监听任务，多个句柄共享；最后一个句柄释放时任务停止。
//! 回调在不持锁的情况下执行，所以在回调里取消订阅是安全的。
//! `unsubscribe` 只做标记和摘除，不等待任务结束。
//! feed 自行结束时监听被摘除，已有句柄随之失效。

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use tokio::task::JoinHandle;

use crate::{
    domain::IncomingTransfer,
    error::AdapterError,
    infrastructure::log_redact::redact_address,
    service::{chain_adapter::ChainAdapter, incoming_feed::IncomingFeed},
};

/// 入账回调
pub type TransferCallback = Arc<dyn Fn(IncomingTransfer) + Send + Sync>;

type ListenerKey = (String, String);

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: TransferCallback,
}

struct Listener {
    generation: u64,
    subscribers: Vec<Subscriber>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    listeners: HashMap<ListenerKey, Listener>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct SubscriptionManager {
    inner: Arc<Mutex<Inner>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅地址入账；已有监听时复用，否则向适配器申请新的 feed
    pub async fn subscribe(
        &self,
        adapter: Arc<dyn ChainAdapter>,
        address: &str,
        callback: TransferCallback,
    ) -> Result<SubscriptionHandle, AdapterError> {
        let key: ListenerKey = (adapter.chain_name().to_string(), address.to_string());

        if let Some(handle) = self.attach(&key, &callback) {
            return Ok(handle);
        }

        let feed = adapter.subscribe(address).await?;

        let mut inner = lock(&self.inner);
        // 等待 feed 期间可能已有其它调用建立了监听
        if inner.listeners.contains_key(&key) {
            drop(inner);
            drop(feed);
            return self
                .attach(&key, &callback)
                .ok_or_else(|| AdapterError::Network("listener vanished during subscribe".into()));
        }

        let generation = inner.next_id();
        let task = tokio::spawn(dispatch(
            Arc::downgrade(&self.inner),
            key.clone(),
            generation,
            feed,
        ));
        inner.listeners.insert(
            key.clone(),
            Listener {
                generation,
                subscribers: Vec::new(),
                task: Some(task),
            },
        );
        let handle = Self::add_subscriber(&mut inner, &self.inner, &key, &callback);
        drop(inner);

        tracing::info!(
            chain = %key.0,
            address = %redact_address(&key.1),
            "incoming listener started"
        );
        handle.ok_or_else(|| AdapterError::Network("listener vanished during subscribe".into()))
    }

    fn attach(&self, key: &ListenerKey, callback: &TransferCallback) -> Option<SubscriptionHandle> {
        let mut inner = lock(&self.inner);
        Self::add_subscriber(&mut inner, &self.inner, key, callback)
    }

    fn add_subscriber(
        inner: &mut Inner,
        shared: &Arc<Mutex<Inner>>,
        key: &ListenerKey,
        callback: &TransferCallback,
    ) -> Option<SubscriptionHandle> {
        if !inner.listeners.contains_key(key) {
            return None;
        }
        let id = inner.next_id();
        let active = Arc::new(AtomicBool::new(true));
        let listener = inner.listeners.get_mut(key)?;
        listener.subscribers.push(Subscriber {
            id,
            active: active.clone(),
            callback: callback.clone(),
        });
        Some(SubscriptionHandle {
            id,
            key: key.clone(),
            active,
            manager: Arc::downgrade(shared),
        })
    }

    /// 活跃订阅数
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.inner)
            .listeners
            .values()
            .map(|l| l.subscribers.len())
            .sum()
    }

    /// 监听任务数
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// 终止全部监听，所有句柄失效
    pub fn shutdown(&self) {
        let listeners: Vec<Listener> = {
            let mut inner = lock(&self.inner);
            inner.listeners.drain().map(|(_, l)| l).collect()
        };
        if listeners.is_empty() {
            return;
        }
        let count = listeners.len();
        for mut listener in listeners {
            for subscriber in &listener.subscribers {
                subscriber.active.store(false, Ordering::SeqCst);
            }
            if let Some(task) = listener.task.take() {
                task.abort();
            }
        }
        tracing::info!(listeners = count, "all subscriptions closed");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 从 feed 取入账并分发给当前订阅者
async fn dispatch(
    inner: Weak<Mutex<Inner>>,
    key: ListenerKey,
    generation: u64,
    mut feed: IncomingFeed,
) {
    while let Some(transfer) = feed.next().await {
        let targets: Vec<(Arc<AtomicBool>, TransferCallback)> = {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let guard = lock(&inner);
            match guard.listeners.get(&key) {
                Some(listener) if listener.generation == generation => listener
                    .subscribers
                    .iter()
                    .map(|s| (s.active.clone(), s.callback.clone()))
                    .collect(),
                _ => return,
            }
        };

        for (active, callback) in targets {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            let transfer = transfer.clone();
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(transfer))).is_err() {
                tracing::error!(chain = %key.0, "subscription callback panicked");
            }
        }
    }

    // feed 已结束：摘除本代监听，后续订阅会重新建立
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let closed = {
        let mut guard = lock(&inner);
        if guard.listeners.get(&key).map(|l| l.generation) == Some(generation) {
            guard.listeners.remove(&key)
        } else {
            None
        }
    };
    if let Some(listener) = closed {
        for subscriber in &listener.subscribers {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        tracing::info!(
            chain = %key.0,
            address = %redact_address(&key.1),
            subscribers = listener.subscribers.len(),
            "incoming feed closed, listener removed"
        );
    }
}

/// 一个活跃订阅；丢弃即取消
pub struct SubscriptionHandle {
    id: u64,
    key: ListenerKey,
    active: Arc<AtomicBool>,
    manager: Weak<Mutex<Inner>>,
}

impl SubscriptionHandle {
    pub fn chain(&self) -> &str {
        &self.key.0
    }

    pub fn address(&self) -> &str {
        &self.key.1
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 幂等；可在回调内调用
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.manager.upgrade() else {
            return;
        };

        let stopped = {
            let mut guard = lock(&inner);
            let Some(listener) = guard.listeners.get_mut(&self.key) else {
                return;
            };
            listener.subscribers.retain(|s| s.id != self.id);
            if listener.subscribers.is_empty() {
                guard.listeners.remove(&self.key)
            } else {
                None
            }
        };

        if let Some(mut listener) = stopped {
            if let Some(task) = listener.task.take() {
                task.abort();
            }
            tracing::info!(
                chain = %self.key.0,
                address = %redact_address(&self.key.1),
                "incoming listener stopped"
            );
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("chain", &self.key.0)
            .field("address", &redact_address(&self.key.1))
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::{
        chain_config::preset, Amount, ChainConfig, DeriveParams, MasterSeed, TransactionResult,
        TxConfig,
    };

    /// 每次 subscribe 交出一个由测试推送的通道
    struct PushAdapter {
        config: ChainConfig,
        senders: Mutex<Vec<mpsc::Sender<IncomingTransfer>>>,
        opened: AtomicUsize,
    }

    impl PushAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                config: preset("solana").unwrap(),
                senders: Mutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
            })
        }

        async fn push(&self, hash: &str) {
            let sender = self.senders.lock().unwrap().last().cloned().unwrap();
            sender
                .send(IncomingTransfer {
                    tx_hash: hash.to_string(),
                    amount: Amount::from_u64(1),
                })
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl ChainAdapter for PushAdapter {
        fn config(&self) -> &ChainConfig {
            &self.config
        }

        async fn balance(&self, _address: &str) -> Result<Amount, AdapterError> {
            Ok(Amount::ZERO)
        }

        async fn send(
            &self,
            _seed: &MasterSeed,
            _params: &DeriveParams,
            _to: &str,
            _amount: Amount,
            _config: Option<&TxConfig>,
        ) -> Result<TransactionResult, AdapterError> {
            Ok(TransactionResult::new("x"))
        }

        async fn subscribe(&self, _address: &str) -> Result<IncomingFeed, AdapterError> {
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push(tx);
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(IncomingFeed::from_receiver(rx))
        }
    }

    fn collector() -> (TransferCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: TransferCallback =
            Arc::new(move |t: IncomingTransfer| sink.lock().unwrap().push(t.tx_hash));
        (callback, seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_shared_listener_per_address() {
        let adapter = PushAdapter::new();
        let manager = SubscriptionManager::new();
        let (cb1, seen1) = collector();
        let (cb2, seen2) = collector();

        let h1 = manager.subscribe(adapter.clone(), "addr", cb1).await.unwrap();
        let h2 = manager.subscribe(adapter.clone(), "addr", cb2).await.unwrap();
        assert_eq!(adapter.opened.load(Ordering::SeqCst), 1);
        assert_eq!(manager.listener_count(), 1);
        assert_eq!(manager.active_subscriptions(), 2);

        adapter.push("tx1").await;
        settle().await;
        assert_eq!(*seen1.lock().unwrap(), vec!["tx1"]);
        assert_eq!(*seen2.lock().unwrap(), vec!["tx1"]);

        h1.unsubscribe();
        adapter.push("tx2").await;
        settle().await;
        assert_eq!(*seen1.lock().unwrap(), vec!["tx1"]);
        assert_eq!(*seen2.lock().unwrap(), vec!["tx1", "tx2"]);
        assert_eq!(manager.listener_count(), 1);

        drop(h2);
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let adapter = PushAdapter::new();
        let manager = SubscriptionManager::new();
        let (cb, _) = collector();

        let handle = manager.subscribe(adapter, "addr", cb).await.unwrap();
        assert!(handle.is_active());
        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());
        assert_eq!(manager.active_subscriptions(), 0);
        drop(handle);
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_from_inside_callback() {
        let adapter = PushAdapter::new();
        let manager = SubscriptionManager::new();
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_in_cb = slot.clone();
        let calls_in_cb = calls.clone();
        let callback: TransferCallback = Arc::new(move |_| {
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = slot_in_cb.lock().unwrap().as_ref() {
                handle.unsubscribe();
            }
        });

        let handle = manager.subscribe(adapter.clone(), "addr", callback).await.unwrap();
        *slot.lock().unwrap() = Some(handle);

        adapter.push("tx1").await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_invalidates_handles() {
        let adapter = PushAdapter::new();
        let manager = SubscriptionManager::new();
        let (cb, _) = collector();
        let a = manager.subscribe(adapter.clone(), "a", cb.clone()).await.unwrap();
        let b = manager.subscribe(adapter.clone(), "b", cb).await.unwrap();
        assert_eq!(manager.listener_count(), 2);

        manager.shutdown();
        assert!(!a.is_active());
        assert!(!b.is_active());
        assert_eq!(manager.listener_count(), 0);
        a.unsubscribe();
    }

    #[tokio::test]
    async fn test_handle_outlives_manager() {
        let adapter = PushAdapter::new();
        let manager = SubscriptionManager::new();
        let (cb, _) = collector();
        let handle = manager.subscribe(adapter, "addr", cb).await.unwrap();
        drop(manager);
        assert!(!handle.is_active());
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_closed_feed_removes_listener() {
        let adapter = PushAdapter::new();
        let manager = SubscriptionManager::new();
        let (cb, seen) = collector();

        let stale = manager.subscribe(adapter.clone(), "addr", cb.clone()).await.unwrap();
        // 推送端关闭，feed 结束
        adapter.senders.lock().unwrap().clear();
        settle().await;
        assert_eq!(manager.listener_count(), 0);
        assert!(!stale.is_active());

        let fresh = manager.subscribe(adapter.clone(), "addr", cb).await.unwrap();
        assert_eq!(adapter.opened.load(Ordering::SeqCst), 2);
        adapter.push("tx1").await;
        settle().await;
        assert_eq!(*seen.lock().unwrap(), vec!["tx1"]);

        // 旧句柄不影响新监听
        drop(stale);
        assert!(fresh.is_active());
        assert_eq!(manager.listener_count(), 1);
    }
}
