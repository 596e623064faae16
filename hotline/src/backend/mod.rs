//! 热键后端
//!
//! 把绑定表交给操作系统，并在组合键被按下时回调触发函数。
//!
//! # 策略
//!
//! - [`BackendKind::Registered`]：系统热键注册，在专用线程上创建仅消息窗口并注册全部组合键
//! - [`BackendKind::LowLevelHook`]：低级键盘钩子，在专用线程上自行跟踪修饰键并匹配组合
//! - [`BackendKind::Simulated`]：不触碰操作系统，用于测试和非 Windows 平台
//!
//! 两种原生策略都只在 Windows 上可用。每次启动都构造全新的后端实例，
//! 旧实例的线程和操作系统资源在 [`HotkeyBackend::stop`] 中回收。

mod error;
mod keystate;
mod simulated;
mod thread;

#[cfg(target_os = "windows")]
mod hook;
#[cfg(target_os = "windows")]
mod registered;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::hotkey::{ActionId, BindingTable};
use crate::state::SupervisorConfig;

pub use error::{OsError, OsResult, ResourceLeakWarning};
pub use keystate::KeyStateTracker;
pub use simulated::{SimulatedBackend, SimulatedControl};
pub use thread::{DeliveryThread, StartupSignal};

#[cfg(target_os = "windows")]
pub use hook::LowLevelHookBackend;
#[cfg(target_os = "windows")]
pub use registered::RegisteredHotkeyBackend;

/// 组合键被按下时调用，参数为对应动作
///
/// 在投递线程上执行，实现必须尽快返回
pub type TriggerCallback = Arc<dyn Fn(ActionId) + Send + Sync>;

/// 构造全新后端实例的工厂
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn HotkeyBackend> + Send + Sync>;

/// 后端策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// 系统热键注册
    #[default]
    Registered,
    /// 低级键盘钩子
    LowLevelHook,
    /// 模拟后端
    Simulated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => f.write_str("registered"),
            Self::LowLevelHook => f.write_str("low_level_hook"),
            Self::Simulated => f.write_str("simulated"),
        }
    }
}

/// 后端运行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendOptions {
    /// 同一组合键的去抖窗口（低级钩子使用）
    pub debounce: Duration,
    /// 等待投递线程就绪的时间
    pub startup_timeout: Duration,
    /// 等待投递线程退出的时间
    pub join_timeout: Duration,
    /// 金丝雀探测的超时
    pub probe_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for BackendOptions {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            debounce: config.debounce(),
            startup_timeout: config.startup_timeout(),
            join_timeout: config.join_timeout(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

/// 后端句柄的不透明标识，绑定记录通过它引用所属的后端实例
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleToken(u64);

impl fmt::Display for HandleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// 一次成功启动的后端实例
///
/// 句柄只属于创建它的实例，重建后端会得到新的句柄
#[derive(Debug, Clone)]
pub struct BackendHandle {
    token: HandleToken,
    kind: BackendKind,
    native: usize,
    alive: Arc<AtomicBool>,
    started_at: Instant,
}

impl BackendHandle {
    /// # Arguments
    ///
    /// * `kind` - 后端策略
    /// * `native` - 原生句柄的数值（窗口或钩子），模拟后端为 0
    /// * `alive` - 投递线程的存活标记
    pub fn new(kind: BackendKind, native: usize, alive: Arc<AtomicBool>) -> Self {
        Self {
            token: HandleToken(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            native,
            alive,
            started_at: Instant::now(),
        }
    }

    pub fn token(&self) -> HandleToken {
        self.token
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn native(&self) -> usize {
        self.native
    }

    /// 投递线程是否仍在运行
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

/// 金丝雀探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanaryStatus {
    /// 组合键仍归本进程所有，捕获通路正常
    Owned,
    /// 捕获已失效
    Lost(String),
    /// 投递线程没有在超时内响应
    Unresponsive,
}

impl CanaryStatus {
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned)
    }
}

/// 热键后端
///
/// 实现方负责全部操作系统交互。`start` 之后的所有注册、注销都必须在
/// 同一条投递线程上完成。
pub trait HotkeyBackend: Send {
    fn kind(&self) -> BackendKind;

    /// 注册绑定表并开始投递
    ///
    /// 重复调用会先丢弃上一次的句柄
    fn start(
        &mut self,
        bindings: &BindingTable,
        on_trigger: TriggerCallback,
    ) -> Result<BackendHandle, OsError>;

    /// 注销并回收投递线程
    ///
    /// 线程未在限定时间内退出时返回 [`ResourceLeakWarning`]，不会无限阻塞
    fn stop(&mut self, handle: BackendHandle) -> Result<(), ResourceLeakWarning>;

    /// 主动确认捕获通路仍然有效
    fn probe(&self, handle: &BackendHandle) -> CanaryStatus;
}

/// 按配置构造后端工厂
///
/// 原生策略在非 Windows 平台上退回模拟后端
pub fn default_factory(config: &SupervisorConfig) -> BackendFactory {
    let options = BackendOptions::from(config);

    match config.backend {
        #[cfg(target_os = "windows")]
        BackendKind::Registered => Arc::new(move || -> Box<dyn HotkeyBackend> {
            Box::new(RegisteredHotkeyBackend::new(options))
        }),
        #[cfg(target_os = "windows")]
        BackendKind::LowLevelHook => Arc::new(move || -> Box<dyn HotkeyBackend> {
            Box::new(LowLevelHookBackend::new(options))
        }),
        BackendKind::Simulated => SimulatedControl::new().factory(options),
        #[cfg(not(target_os = "windows"))]
        kind => {
            tracing::warn!(
                backend = %kind,
                "Native hotkey backends require Windows, falling back to simulated backend"
            );
            SimulatedControl::new().factory(options)
        }
    }
}
