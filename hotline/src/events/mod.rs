//! 事件总线
//!
//! 把后端报告的触发转发给订阅者，并在投递前按动作去抖。
//! 另有一条失败通道，子系统进入终止失败时通知一次。
//!
//! # 使用方法
//!
//! ```
//! use hotline_lib::events::EventBus;
//! use hotline_lib::hotkey::ActionId;
//!
//! let bus = EventBus::default();
//! bus.subscribe(ActionId::Screenshot, |action| {
//!     println!("{action} pressed");
//! });
//! assert!(bus.trigger(ActionId::Screenshot));
//! // 去抖窗口内的第二次触发被丢弃
//! assert!(!bus.trigger(ActionId::Screenshot));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::hotkey::ActionId;

/// 默认去抖窗口
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// 动作回调
pub type ActionCallback = Arc<dyn Fn(ActionId) + Send + Sync>;

/// 失败回调，参数为失败原因
pub type FailureCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// 回调调度器
///
/// 决定订阅者回调在哪个线程执行。默认直接在调用线程上执行
pub type Dispatcher = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// 通过 [`EventBus::listen`] 推送的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BusEvent {
    /// 动作被触发（已去抖）
    Triggered(ActionId),
    /// 子系统进入终止失败
    Failed(String),
}

/// 事件总线
pub struct EventBus {
    debounce: Duration,
    subscribers: Mutex<HashMap<ActionId, Vec<ActionCallback>>>,
    failure_subscribers: Mutex<Vec<FailureCallback>>,
    last_dispatch: Mutex<HashMap<ActionId, Instant>>,
    listeners: Mutex<Vec<mpsc::Sender<BusEvent>>>,
    dispatcher: Dispatcher,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    /// 创建事件总线
    ///
    /// # Arguments
    ///
    /// * `debounce` - 同一动作两次投递之间的最短间隔
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            subscribers: Mutex::new(HashMap::new()),
            failure_subscribers: Mutex::new(Vec::new()),
            last_dispatch: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            dispatcher: Arc::new(|job| job()),
        }
    }

    /// 指定回调调度器
    ///
    /// 例如把回调转交给 UI 线程或 tokio 任务，避免阻塞投递线程
    pub fn with_dispatcher(
        mut self,
        dispatcher: impl Fn(Box<dyn FnOnce() + Send>) + Send + Sync + 'static,
    ) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// 订阅某个动作
    pub fn subscribe(&self, action: ActionId, callback: impl Fn(ActionId) + Send + Sync + 'static) {
        lock(&self.subscribers)
            .entry(action)
            .or_default()
            .push(Arc::new(callback));
    }

    /// 订阅终止失败通知
    pub fn subscribe_failure(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        lock(&self.failure_subscribers).push(Arc::new(callback));
    }

    /// 以通道形式接收全部事件
    ///
    /// 接收方消费过慢时事件会被丢弃
    pub fn listen(&self) -> mpsc::Receiver<BusEvent> {
        let (tx, rx) = mpsc::channel(64);
        lock(&self.listeners).push(tx);
        rx
    }

    pub fn subscriber_count(&self, action: ActionId) -> usize {
        lock(&self.subscribers).get(&action).map_or(0, Vec::len)
    }

    /// 报告一次触发
    ///
    /// 距离该动作上次投递不足去抖窗口时丢弃并返回 `false`
    pub fn trigger(&self, action: ActionId) -> bool {
        self.trigger_at(action, Instant::now())
    }

    pub(crate) fn trigger_at(&self, action: ActionId, now: Instant) -> bool {
        {
            let mut last = lock(&self.last_dispatch);
            if let Some(previous) = last.get(&action) {
                if now.saturating_duration_since(*previous) < self.debounce {
                    tracing::debug!(action = %action, "Trigger suppressed by debounce");
                    return false;
                }
            }
            last.insert(action, now);
        }

        tracing::debug!(action = %action, "Dispatching hotkey action");

        let callbacks = lock(&self.subscribers)
            .get(&action)
            .cloned()
            .unwrap_or_default();
        if !callbacks.is_empty() {
            (self.dispatcher)(Box::new(move || {
                for callback in &callbacks {
                    callback(action);
                }
            }));
        }

        self.notify_listeners(BusEvent::Triggered(action));
        true
    }

    /// 通知终止失败
    pub fn emit_failure(&self, reason: &str) {
        tracing::error!(reason = %reason, "Hotkey subsystem failed permanently");

        let callbacks = lock(&self.failure_subscribers).clone();
        if !callbacks.is_empty() {
            let reason = reason.to_string();
            (self.dispatcher)(Box::new(move || {
                for callback in &callbacks {
                    callback(&reason);
                }
            }));
        }

        self.notify_listeners(BusEvent::Failed(reason.to_string()));
    }

    fn notify_listeners(&self, event: BusEvent) {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|tx| !tx.is_closed());
        for listener in listeners.iter() {
            let _ = listener.try_send(event.clone());
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }
}
