//! 健康监控
//!
//! 判断热键捕获是否仍然有效，发现问题时交给 [`RecoveryController`] 重建。
//!
//! # 检查
//!
//! - 存活检查（默认每 1.5 秒）：投递线程已退出即判定失败
//! - 陈旧度检查（默认每 20 秒）：长时间没有触发时发起金丝雀探测，
//!   只有探测失败才判定失败，用户单纯没有按键不会引起重建
//! - 强制重建（可选）：按固定周期无条件重建
//!
//! 健康检查只读取注册表，从不直接修改它。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};

use crate::backend::CanaryStatus;
use crate::recovery::RecoveryController;
use crate::registry::HotkeyRegistry;
use crate::state::{StateManager, SubsystemState, SupervisorConfig};

/// 检查周期下限，`interval_at` 不接受零周期
const MIN_CHECK_PERIOD: Duration = Duration::from_millis(1);

/// 触发重建的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    /// 投递线程已退出
    DeliveryThreadDead,
    /// 金丝雀探测失败
    CanaryLost,
    /// 周期性强制重建
    ForcedRestart,
    /// 上一次启动或重建失败
    StartFailed,
}

impl std::fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::DeliveryThreadDead => "delivery thread dead",
            Self::CanaryLost => "canary lost",
            Self::ForcedRestart => "forced restart",
            Self::StartFailed => "start failed",
        };
        f.write_str(text)
    }
}

/// 一次健康检查的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// 子系统不在受监督的状态，或检查期间状态已被改变，未下结论
    Skipped,
    /// 需要重建
    Unhealthy(RecoveryReason),
}

/// 健康采样
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
    /// 最近一次触发（或最近一次成功重建）的时间
    pub last_trigger_at: Instant,
    pub delivery_thread_alive: bool,
    pub consecutive_failures: u32,
}

/// 共享的健康数据
///
/// 触发路径、健康监控和恢复控制器都会更新它
#[derive(Debug)]
pub struct HealthState {
    sample: Mutex<HealthSample>,
    ceiling: u32,
}

impl HealthState {
    /// # Arguments
    ///
    /// * `ceiling` - 连续失败上限，失败计数不会超过它
    pub fn new(ceiling: u32) -> Self {
        Self {
            sample: Mutex::new(HealthSample {
                last_trigger_at: Instant::now(),
                delivery_thread_alive: false,
                consecutive_failures: 0,
            }),
            ceiling: ceiling.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HealthSample> {
        self.sample
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> HealthSample {
        self.lock().clone()
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// 记录一次触发
    pub fn record_trigger(&self) {
        self.lock().last_trigger_at = Instant::now();
    }

    pub fn set_delivery_alive(&self, alive: bool) {
        self.lock().delivery_thread_alive = alive;
    }

    /// 失败计数加一并返回新值，最大为上限
    pub fn record_failure(&self) -> u32 {
        let mut sample = self.lock();
        sample.consecutive_failures = (sample.consecutive_failures + 1).min(self.ceiling);
        sample.consecutive_failures
    }

    /// 成功重建后清零
    pub fn record_recovery(&self) {
        let mut sample = self.lock();
        sample.consecutive_failures = 0;
        sample.delivery_thread_alive = true;
        sample.last_trigger_at = Instant::now();
    }

    /// 显式重启前清零失败计数
    pub fn reset_failures(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn ceiling_reached(&self) -> bool {
        self.lock().consecutive_failures >= self.ceiling
    }
}

/// 健康监控
pub struct HealthMonitor {
    registry: Arc<HotkeyRegistry>,
    health: Arc<HealthState>,
    state: Arc<StateManager>,
    staleness_window: Duration,
    forced_restart: bool,
    last_reason: Mutex<Option<RecoveryReason>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<HotkeyRegistry>,
        health: Arc<HealthState>,
        state: Arc<StateManager>,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            health,
            state,
            staleness_window: config.staleness_window(),
            forced_restart: config.forced_restart_interval().is_some(),
            last_reason: Mutex::new(None),
        }
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// 记录一次触发
    pub fn record_trigger(&self) {
        self.health.record_trigger();
    }

    /// 存活检查
    ///
    /// 投递线程退出时立即判定失败，不等待陈旧度窗口
    pub fn check_liveness(&self) -> HealthVerdict {
        let observed = self.state.current();
        match &*observed {
            SubsystemState::Running => {}
            SubsystemState::Degraded(_) => return HealthVerdict::Unhealthy(RecoveryReason::StartFailed),
            _ => return HealthVerdict::Skipped,
        }

        let alive = self
            .registry
            .live()
            .is_some_and(|live| live.is_delivery_alive());
        self.health.set_delivery_alive(alive);

        if alive {
            HealthVerdict::Healthy
        } else if self.mark_degraded(&observed, RecoveryReason::DeliveryThreadDead) {
            tracing::warn!("Hotkey delivery thread is no longer running");
            HealthVerdict::Unhealthy(RecoveryReason::DeliveryThreadDead)
        } else {
            HealthVerdict::Skipped
        }
    }

    /// 陈旧度检查
    ///
    /// 长时间没有触发只是发起探测的理由，本身不算失败
    pub fn check_staleness(&self) -> HealthVerdict {
        let observed = self.state.current();
        if !observed.is_running() {
            return HealthVerdict::Skipped;
        }

        let since = self.health.snapshot().last_trigger_at.elapsed();
        if since < self.staleness_window {
            return HealthVerdict::Healthy;
        }

        match self.registry.probe_canary() {
            CanaryStatus::Owned => {
                tracing::debug!(
                    idle_secs = since.as_secs(),
                    "No recent triggers but canary still owned"
                );
                HealthVerdict::Healthy
            }
            status => {
                if !self.mark_degraded(&observed, RecoveryReason::CanaryLost) {
                    // 探测期间子系统已被重建，结果属于旧后端
                    return HealthVerdict::Skipped;
                }
                let failures = self.health.record_failure();
                tracing::warn!(
                    status = ?status,
                    idle_secs = since.as_secs(),
                    consecutive_failures = failures,
                    "Canary probe failed"
                );
                HealthVerdict::Unhealthy(RecoveryReason::CanaryLost)
            }
        }
    }

    /// 强制重建检查
    pub fn check_forced_restart(&self) -> HealthVerdict {
        if !self.forced_restart || !self.state.current().is_running() {
            return HealthVerdict::Skipped;
        }
        tracing::info!("Periodic forced restart due");
        HealthVerdict::Unhealthy(RecoveryReason::ForcedRestart)
    }

    /// 最近一次下达重建的原因
    pub fn last_recovery_reason(&self) -> Option<RecoveryReason> {
        *self.lock_reason()
    }

    fn lock_reason(&self) -> MutexGuard<'_, Option<RecoveryReason>> {
        self.last_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn note_recovery(&self, reason: RecoveryReason) {
        *self.lock_reason() = Some(reason);
    }

    /// 只有状态仍是检查开始时读到的 Running 才标记为 Degraded
    ///
    /// 检查期间其他线程重建或停止了子系统时返回 `false`
    fn mark_degraded(&self, observed: &Arc<SubsystemState>, reason: RecoveryReason) -> bool {
        observed.is_running()
            && self
                .state
                .transition_from(observed, SubsystemState::degraded(reason.to_string()))
                .unwrap_or(false)
    }

    /// 启动后台监控任务
    ///
    /// 需要在 tokio 运行时中调用。重建在阻塞线程池中执行，不占用异步工作线程
    pub fn spawn(
        self: Arc<Self>,
        recovery: Arc<RecoveryController>,
        config: &SupervisorConfig,
    ) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let liveness_period = config.liveness_interval().max(MIN_CHECK_PERIOD);
        let staleness_period = config.staleness_check_interval().max(MIN_CHECK_PERIOD);
        let forced_period = config
            .forced_restart_interval()
            .map(|period| period.max(MIN_CHECK_PERIOD));

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut liveness = interval_at(start + liveness_period, liveness_period);
            let mut staleness = interval_at(start + staleness_period, staleness_period);
            // 未开启时周期无意义，分支被禁用
            let forced_every = forced_period.unwrap_or(Duration::from_secs(3600));
            let mut forced = interval_at(start + forced_every, forced_every);

            liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
            staleness.set_missed_tick_behavior(MissedTickBehavior::Delay);
            forced.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let verdict = tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::debug!("Health monitor stopped");
                        break;
                    }
                    _ = liveness.tick() => self.check_liveness(),
                    _ = staleness.tick() => {
                        let monitor = Arc::clone(&self);
                        tokio::task::spawn_blocking(move || monitor.check_staleness())
                            .await
                            .unwrap_or(HealthVerdict::Skipped)
                    }
                    _ = forced.tick(), if forced_period.is_some() => self.check_forced_restart(),
                };

                if let HealthVerdict::Unhealthy(reason) = verdict {
                    self.note_recovery(reason);
                    let recovery = Arc::clone(&recovery);
                    match tokio::task::spawn_blocking(move || recovery.restart(reason)).await {
                        Ok(Ok(())) => tracing::info!(reason = %reason, "Hotkey capture recovered"),
                        Ok(Err(e)) => tracing::warn!(reason = %reason, error = %e, "Hotkey recovery failed"),
                        Err(e) => tracing::error!(error = %e, "Recovery task panicked"),
                    }
                }
            }
        });

        tracing::info!(
            liveness_ms = liveness_period.as_millis() as u64,
            staleness_ms = staleness_period.as_millis() as u64,
            forced_restart = forced_period.is_some(),
            "Health monitor started"
        );

        MonitorHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// 后台监控任务句柄
///
/// 丢弃时发送停止信号
pub struct MonitorHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// 停止监控并等待任务结束
    ///
    /// 正在进行的重建会先完成
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
    }
}
