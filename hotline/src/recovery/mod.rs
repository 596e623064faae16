//! 恢复控制器
//!
//! 串行地执行"撤下-停用-等待-重新激活"，并在连续失败达到上限时让子系统进入终止状态。
//!
//! 所有步骤都在注册表锁内完成，与 `configure`/`activate` 互斥。进入
//! [`SubsystemState::Failed`] 后自动恢复不再调用激活，只能通过 [`RecoveryController::launch`]
//! （显式重启）离开。

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{OsError, ResourceLeakWarning};
use crate::events::EventBus;
use crate::health::{HealthState, RecoveryReason};
use crate::registry::{HotkeyRegistry, RegistryGuard};
use crate::state::{StateManager, SubsystemState, SupervisorConfig};
use crate::utils::error::{HotkeyError, HotkeyResult};

/// 恢复控制器
pub struct RecoveryController {
    registry: Arc<HotkeyRegistry>,
    health: Arc<HealthState>,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    settle_delay: Duration,
}

impl RecoveryController {
    pub fn new(
        registry: Arc<HotkeyRegistry>,
        health: Arc<HealthState>,
        state: Arc<StateManager>,
        bus: Arc<EventBus>,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            health,
            state,
            bus,
            settle_delay: config.settle_delay(),
        }
    }

    /// 自动恢复：重建后端
    ///
    /// # Errors
    ///
    /// - [`HotkeyError::TerminalFailure`] - 已处于终止状态，或本次失败达到上限
    /// - [`HotkeyError::Os`] - 重建失败但尚未达到上限
    pub fn restart(&self, reason: RecoveryReason) -> HotkeyResult<()> {
        let mut guard = self.registry.lock();

        match &*self.state.current() {
            SubsystemState::Failed(message) => {
                tracing::debug!(reason = %reason, "Recovery refused, subsystem failed permanently");
                return Err(HotkeyError::TerminalFailure(message.clone()));
            }
            SubsystemState::Running | SubsystemState::Degraded(_) => {}
            other => {
                tracing::debug!(state = other.name(), reason = %reason, "Nothing to recover");
                return Ok(());
            }
        }

        tracing::info!(reason = %reason, "Rebuilding hotkey backend");
        self.state.transition(SubsystemState::Recovering)?;

        guard.mark_inactive();
        if let Err(leak) = guard.deactivate() {
            tracing::warn!(error = %leak, "Ignoring teardown failure during recovery");
        }

        std::thread::sleep(self.settle_delay);

        self.finish_activation(&mut guard)
    }

    /// 显式启动或重启
    ///
    /// 清零失败计数，也是离开终止状态的唯一途径
    pub fn launch(&self) -> HotkeyResult<()> {
        let mut guard = self.registry.lock();

        self.health.reset_failures();
        self.state.transition(SubsystemState::Starting)?;

        if guard.is_active() {
            guard.mark_inactive();
            if let Err(leak) = guard.deactivate() {
                tracing::warn!(error = %leak, "Ignoring teardown failure before launch");
            }
            std::thread::sleep(self.settle_delay);
        }

        self.finish_activation(&mut guard)
    }

    /// 停止并注销全部热键
    pub fn stop(&self) -> Result<(), ResourceLeakWarning> {
        let mut guard = self.registry.lock();
        let result = guard.deactivate();
        self.health.set_delivery_alive(false);
        // 任何状态都可以进入 Stopped
        let _ = self.state.transition(SubsystemState::Stopped);
        result
    }

    fn finish_activation(&self, guard: &mut RegistryGuard<'_>) -> HotkeyResult<()> {
        match guard.activate() {
            Ok(()) => {
                self.health.record_recovery();
                self.state.transition(SubsystemState::Running)?;
                Ok(())
            }
            Err(e) => self.activation_failed(e),
        }
    }

    fn activation_failed(&self, error: OsError) -> HotkeyResult<()> {
        let failures = self.health.record_failure();
        let ceiling = self.health.ceiling();

        if failures >= ceiling {
            let message = format!("hotkey capture failed {failures} times in a row: {error}");
            tracing::error!(
                consecutive_failures = failures,
                ceiling,
                error = %error,
                "Failure ceiling reached, giving up on automatic recovery"
            );
            self.state.transition(SubsystemState::failed(message.clone()))?;
            self.bus.emit_failure(&message);
            return Err(HotkeyError::TerminalFailure(message));
        }

        tracing::warn!(
            consecutive_failures = failures,
            ceiling,
            error = %error,
            "Hotkey backend activation failed"
        );
        self.state
            .transition(SubsystemState::degraded(error.to_string()))?;
        Err(HotkeyError::Os(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, SimulatedControl};
    use crate::hotkey::HotkeyConfig;

    fn setup(control: &SimulatedControl, ceiling: u32) -> (RecoveryController, Arc<StateManager>) {
        let options = BackendOptions {
            join_timeout: Duration::from_millis(200),
            ..BackendOptions::default()
        };
        let registry = Arc::new(HotkeyRegistry::new(control.factory(options), Arc::new(|_| {})));
        registry.configure(&HotkeyConfig::default()).unwrap();

        let config = SupervisorConfig {
            settle_delay_ms: 1,
            failure_ceiling: ceiling,
            ..SupervisorConfig::default()
        };
        let state = Arc::new(StateManager::new());
        let controller = RecoveryController::new(
            registry,
            Arc::new(HealthState::new(ceiling)),
            Arc::clone(&state),
            Arc::new(EventBus::default()),
            &config,
        );
        (controller, state)
    }

    #[test]
    fn test_launch_and_restart() {
        let control = SimulatedControl::new();
        let (controller, state) = setup(&control, 3);

        controller.launch().unwrap();
        assert!(state.current().is_running());

        controller.restart(RecoveryReason::ForcedRestart).unwrap();
        assert!(state.current().is_running());
        assert_eq!(control.start_calls(), 2);
    }

    #[test]
    fn test_restart_when_stopped_is_noop() {
        let control = SimulatedControl::new();
        let (controller, _state) = setup(&control, 3);
        controller.restart(RecoveryReason::CanaryLost).unwrap();
        assert_eq!(control.start_calls(), 0);
    }

    #[test]
    fn test_failed_launch_degrades() {
        let control = SimulatedControl::new();
        control.fail_next_starts(1);
        let (controller, state) = setup(&control, 3);

        assert!(matches!(controller.launch(), Err(HotkeyError::Os(_))));
        assert!(state.current().is_degraded());
    }

    #[test]
    fn test_ceiling_of_one_fails_immediately() {
        let control = SimulatedControl::new();
        control.fail_starts(true);
        let (controller, state) = setup(&control, 1);

        assert!(matches!(
            controller.launch(),
            Err(HotkeyError::TerminalFailure(_))
        ));
        assert!(state.current().is_failed());
    }

    #[test]
    fn test_stop() {
        let control = SimulatedControl::new();
        let (controller, state) = setup(&control, 3);
        controller.launch().unwrap();
        controller.stop().unwrap();
        assert!(state.current().is_stopped());
        assert!(control.claimed().is_empty());
    }
}
