//! 热键服务
//!
//! 把注册表、健康监控、恢复控制器和事件总线组装为一个对外接口。
//!
//! # 使用方法
//!
//! ```no_run
//! use hotline_lib::hotkey::ActionId;
//! use hotline_lib::service::HotkeyService;
//! use hotline_lib::state::AppConfig;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let service = HotkeyService::with_default_backend(AppConfig::default());
//! service.subscribe(ActionId::Screenshot, |_| println!("take screenshot"));
//! service.subscribe_failure(|reason| eprintln!("hotkeys lost: {reason}"));
//!
//! service.start().await.unwrap();
//! // ...
//! service.stop().await;
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::backend::{BackendFactory, TriggerCallback, default_factory};
use crate::events::{BusEvent, EventBus};
use crate::health::{HealthMonitor, HealthSample, HealthState, MonitorHandle, RecoveryReason};
use crate::hotkey::{ActionId, HotkeyConfig};
use crate::recovery::RecoveryController;
use crate::registry::{HotkeyRegistry, LiveRegistry};
use crate::state::{AppConfig, GlobalConfig, StateManager, SubsystemState};
use crate::utils::error::HotkeyResult;

/// 热键服务
pub struct HotkeyService {
    config: GlobalConfig,
    registry: Arc<HotkeyRegistry>,
    health: Arc<HealthState>,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    monitor: Arc<HealthMonitor>,
    recovery: Arc<RecoveryController>,
    monitor_handle: Mutex<Option<MonitorHandle>>,
}

impl HotkeyService {
    /// 使用指定的后端工厂创建服务
    pub fn new(config: AppConfig, factory: BackendFactory) -> Self {
        let bus = EventBus::new(config.supervisor.debounce());
        Self::with_event_bus(config, factory, bus)
    }

    /// 按配置中的后端策略创建服务
    pub fn with_default_backend(config: AppConfig) -> Self {
        let factory = default_factory(&config.supervisor);
        Self::new(config, factory)
    }

    /// 使用自定义事件总线（例如自定义调度器）创建服务
    ///
    /// 监督参数无效时记录警告，并把取值为零的字段换回默认值
    pub fn with_event_bus(mut config: AppConfig, factory: BackendFactory, bus: EventBus) -> Self {
        if let Err(e) = config.supervisor.validate() {
            tracing::warn!(error = %e, "Invalid supervisor config, zero values replaced by defaults");
            config.supervisor = config.supervisor.sanitized();
        }
        let supervisor = config.supervisor.clone();
        let bus = Arc::new(bus);
        let health = Arc::new(HealthState::new(supervisor.failure_ceiling));
        let state = Arc::new(StateManager::new());

        let on_trigger: TriggerCallback = {
            let health = Arc::clone(&health);
            let bus = Arc::clone(&bus);
            Arc::new(move |action| {
                health.record_trigger();
                bus.trigger(action);
            })
        };

        let registry = Arc::new(HotkeyRegistry::new(factory, on_trigger));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::clone(&state),
            &supervisor,
        ));
        let recovery = Arc::new(RecoveryController::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::clone(&state),
            Arc::clone(&bus),
            &supervisor,
        ));

        Self {
            config: GlobalConfig::new(config),
            registry,
            health,
            state,
            bus,
            monitor,
            recovery,
            monitor_handle: Mutex::new(None),
        }
    }

    /// 启动服务：校验绑定、激活后端并开始健康监控
    ///
    /// 后端启动失败时服务进入 Degraded，监控会继续重试直到达到失败上限
    ///
    /// # Errors
    ///
    /// 绑定无效时返回配置错误，此时不会启动任何东西
    pub async fn start(&self) -> HotkeyResult<()> {
        let config = self.config.get();
        self.registry.configure(&config.hotkeys)?;

        let result = self.launch().await;
        self.ensure_monitor().await;
        result
    }

    /// 替换热键绑定
    ///
    /// 新绑定无效时返回错误，正在运行的绑定完全不受影响
    pub async fn reconfigure(&self, hotkeys: HotkeyConfig) -> HotkeyResult<()> {
        self.registry.configure(&hotkeys)?;
        self.config.set_hotkeys(hotkeys);
        tracing::info!("Hotkey bindings reconfigured");

        if self.state.current().is_stopped() {
            return Ok(());
        }
        self.launch().await
    }

    /// 显式重启，可以离开终止失败状态
    pub async fn restart(&self) -> HotkeyResult<()> {
        if self.registry.configured().is_none() {
            let config = self.config.get();
            self.registry.configure(&config.hotkeys)?;
        }

        let result = self.launch().await;
        self.ensure_monitor().await;
        result
    }

    /// 停止监控并注销全部热键
    pub async fn stop(&self) {
        if let Some(mut handle) = self.monitor_handle.lock().await.take() {
            handle.stop().await;
        }

        let recovery = Arc::clone(&self.recovery);
        match tokio::task::spawn_blocking(move || recovery.stop()).await {
            Ok(Ok(())) => tracing::info!("Hotkey service stopped"),
            Ok(Err(leak)) => tracing::warn!(error = %leak, "Hotkey service stopped with a leaked thread"),
            Err(e) => tracing::error!(error = %e, "Stopping hotkey service panicked"),
        }
    }

    async fn launch(&self) -> HotkeyResult<()> {
        let recovery = Arc::clone(&self.recovery);
        tokio::task::spawn_blocking(move || recovery.launch()).await?
    }

    async fn ensure_monitor(&self) {
        let mut handle = self.monitor_handle.lock().await;
        if handle.is_none() {
            let supervisor = self.config.supervisor();
            *handle = Some(
                Arc::clone(&self.monitor).spawn(Arc::clone(&self.recovery), &supervisor),
            );
        }
    }

    /// 订阅某个动作
    pub fn subscribe(&self, action: ActionId, callback: impl Fn(ActionId) + Send + Sync + 'static) {
        self.bus.subscribe(action, callback);
    }

    /// 订阅终止失败
    pub fn subscribe_failure(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.bus.subscribe_failure(callback);
    }

    /// 以通道形式接收触发和失败事件
    pub fn listen(&self) -> mpsc::Receiver<BusEvent> {
        self.bus.listen()
    }

    /// 订阅生命周期状态变更
    pub fn subscribe_state(&self) -> mpsc::Receiver<SubsystemState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> Arc<SubsystemState> {
        self.state.current()
    }

    pub fn health(&self) -> HealthSample {
        self.health.snapshot()
    }

    /// 最近一次自动重建的原因
    pub fn last_recovery_reason(&self) -> Option<RecoveryReason> {
        self.monitor.last_recovery_reason()
    }

    /// 当前生效的绑定快照
    pub fn live(&self) -> Option<Arc<LiveRegistry>> {
        self.registry.live()
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.get()
    }
}
