use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::mpsc;

use super::error::{StateError, StateResult};

/// 热键子系统的生命周期状态
///
/// ```text
/// Stopped -> Starting -> Running
/// Running -> Degraded -> Recovering -> Running
/// Recovering -> Failed   (连续失败达到上限)
/// Failed -> Starting     (仅限显式重启)
/// 任意状态 -> Stopped
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SubsystemState {
    /// 未启动或已停止
    Stopped,

    /// 正在首次启动或按新配置重建
    Starting,

    /// 正常捕获中
    Running,

    /// 检测到故障，等待恢复
    Degraded(String),

    /// 正在重建后端
    Recovering,

    /// 连续失败达到上限，停止自动恢复
    Failed(String),
}

impl SubsystemState {
    /// 创建降级状态
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded(reason.into())
    }

    /// 创建终止失败状态
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, Self::Recovering)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// 是否处于需要健康监控的状态（Running 或 Degraded）
    pub fn is_supervised(&self) -> bool {
        matches!(self, Self::Running | Self::Degraded(_))
    }

    /// 降级或失败的原因
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Degraded(reason) | Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// 状态名称（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Degraded(_) => "Degraded",
            Self::Recovering => "Recovering",
            Self::Failed(_) => "Failed",
        }
    }
}

impl Default for SubsystemState {
    fn default() -> Self {
        Self::Stopped
    }
}

/// 状态管理器
///
/// 读取无锁；每次成功的转换都推送给所有订阅者
pub struct StateManager {
    /// 当前状态（使用 ArcSwap 实现无锁读取）
    state: ArcSwap<SubsystemState>,

    /// 状态变更监听器列表
    listeners: Mutex<Vec<mpsc::Sender<SubsystemState>>>,
}

impl StateManager {
    /// 创建新的状态管理器
    ///
    /// # Examples
    ///
    /// ```
    /// use hotline_lib::state::StateManager;
    ///
    /// let manager = StateManager::new();
    /// assert!(manager.current().is_stopped());
    /// ```
    pub fn new() -> Self {
        Self {
            state: ArcSwap::new(Arc::new(SubsystemState::Stopped)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// 获取当前状态
    pub fn current(&self) -> Arc<SubsystemState> {
        self.state.load_full()
    }

    /// 转换到新状态
    ///
    /// # Errors
    ///
    /// 如果状态转换不合法，返回 [`StateError::InvalidTransition`]
    ///
    /// # Examples
    ///
    /// ```
    /// use hotline_lib::state::{StateManager, SubsystemState};
    ///
    /// let manager = StateManager::new();
    ///
    /// assert!(manager.transition(SubsystemState::Starting).is_ok());
    /// assert!(manager.transition(SubsystemState::Running).is_ok());
    ///
    /// // Running 不能直接进入 Failed
    /// assert!(manager.transition(SubsystemState::failed("boom")).is_err());
    /// ```
    pub fn transition(&self, new_state: SubsystemState) -> StateResult<()> {
        let mut current = self.current();
        while !self.transition_from(&current, new_state.clone())? {
            current = self.current();
        }
        Ok(())
    }

    /// 仅当当前状态仍是调用方读到的那份快照时转换
    ///
    /// 返回 `Ok(false)` 表示状态已被其他线程改变，本次转换没有生效
    ///
    /// # Errors
    ///
    /// 如果从 `expected` 出发的转换不合法，返回 [`StateError::InvalidTransition`]
    pub fn transition_from(
        &self,
        expected: &Arc<SubsystemState>,
        new_state: SubsystemState,
    ) -> StateResult<bool> {
        if !Self::is_valid_transition(expected, &new_state) {
            return Err(StateError::InvalidTransition {
                from: (**expected).clone(),
                to: new_state,
            });
        }

        let previous = self
            .state
            .compare_and_swap(expected, Arc::new(new_state.clone()));
        if !Arc::ptr_eq(&*previous, expected) {
            return Ok(false);
        }

        tracing::debug!(from = expected.name(), to = new_state.name(), "Subsystem state changed");
        self.notify_listeners(new_state);
        Ok(true)
    }

    /// 强制设置状态（跳过验证）
    pub fn force_set(&self, new_state: SubsystemState) {
        self.state.store(Arc::new(new_state.clone()));
        self.notify_listeners(new_state);
    }

    /// 订阅状态变更
    ///
    /// 订阅者消费过慢时通知会被丢弃，不会阻塞状态转换
    pub fn subscribe(&self) -> mpsc::Receiver<SubsystemState> {
        let (tx, rx) = mpsc::channel(32);
        self.lock_listeners().push(tx);
        rx
    }

    /// 获取当前监听器数量
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<SubsystemState>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_listeners(&self, new_state: SubsystemState) {
        let mut listeners = self.lock_listeners();
        listeners.retain(|tx| !tx.is_closed());
        for listener in listeners.iter() {
            // 使用 try_send 避免阻塞
            let _ = listener.try_send(new_state.clone());
        }
    }

    fn is_valid_transition(from: &SubsystemState, to: &SubsystemState) -> bool {
        use SubsystemState::*;

        match (from, to) {
            // 任何状态都可以停止
            (_, Stopped) => true,

            (Stopped, Starting) => true,

            (Starting, Running) => true,
            (Starting, Degraded(_)) => true,
            (Starting, Failed(_)) => true,

            // 重新配置会从 Running/Degraded 重新进入 Starting
            (Running, Starting) => true,
            (Running, Degraded(_)) => true,
            (Running, Recovering) => true,

            (Degraded(_), Starting) => true,
            (Degraded(_), Recovering) => true,

            (Recovering, Running) => true,
            (Recovering, Degraded(_)) => true,
            (Recovering, Failed(_)) => true,

            // 终止状态只能通过显式重启离开
            (Failed(_), Starting) => true,

            _ => false,
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
