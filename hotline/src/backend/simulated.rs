//! 模拟后端
//!
//! 不调用任何操作系统接口，但保留真实后端的线程模型：
//! 每个实例一条投递线程，触发在该线程上回调。通过 [`SimulatedControl`]
//! 可以从外部按键、杀死线程、让启动失败或让金丝雀丢失。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use super::error::{OsError, ResourceLeakWarning};
use super::thread::DeliveryThread;
use super::{
    BackendFactory, BackendHandle, BackendKind, BackendOptions, CanaryStatus, HandleToken,
    HotkeyBackend, TriggerCallback,
};
use crate::hotkey::{ActionId, BindingTable, KeyCombination};

enum SimCommand {
    Fire(ActionId),
    Die,
    Stop,
}

#[derive(Default)]
struct ControlState {
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    failing_starts: AtomicUsize,
    canary_lost: AtomicBool,
    ignore_stop: AtomicBool,
    claimed: Mutex<BTreeMap<ActionId, KeyCombination>>,
    current: Mutex<Option<(HandleToken, mpsc::Sender<SimCommand>)>>,
}

/// 模拟后端的外部控制面
///
/// 克隆共享同一份状态；由它创建的所有后端实例都受其控制
#[derive(Clone, Default)]
pub struct SimulatedControl {
    inner: Arc<ControlState>,
}

impl SimulatedControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回每次构造新 [`SimulatedBackend`] 的工厂
    pub fn factory(&self, options: BackendOptions) -> BackendFactory {
        let control = self.clone();
        Arc::new(move || -> Box<dyn super::HotkeyBackend> {
            Box::new(SimulatedBackend::new(control.clone(), options))
        })
    }

    fn send(&self, command: SimCommand) -> bool {
        let current = self.lock_current();
        match current.as_ref() {
            Some((_, tx)) => tx.send(command).is_ok(),
            None => false,
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<(HandleToken, mpsc::Sender<SimCommand>)>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_claimed(&self) -> std::sync::MutexGuard<'_, BTreeMap<ActionId, KeyCombination>> {
        self.inner
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 模拟用户按下某个动作的组合键
    ///
    /// 没有运行中的投递线程时返回 `false`
    pub fn fire(&self, action: ActionId) -> bool {
        self.send(SimCommand::Fire(action))
    }

    /// 让当前投递线程静默退出
    pub fn kill_delivery_thread(&self) -> bool {
        self.send(SimCommand::Die)
    }

    /// 让之后的所有启动失败（或恢复正常）
    pub fn fail_starts(&self, fail: bool) {
        let remaining = if fail { usize::MAX } else { 0 };
        self.inner.failing_starts.store(remaining, Ordering::SeqCst);
    }

    /// 让接下来的 `count` 次启动失败
    pub fn fail_next_starts(&self, count: usize) {
        self.inner.failing_starts.store(count, Ordering::SeqCst);
    }

    /// 让金丝雀探测报告组合键已不归本进程所有
    pub fn set_canary_lost(&self, lost: bool) {
        self.inner.canary_lost.store(lost, Ordering::SeqCst);
    }

    /// 让投递线程拒绝停止请求，用于验证回收超时
    pub fn ignore_stop(&self, ignore: bool) {
        self.inner.ignore_stop.store(ignore, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> usize {
        self.inner.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.inner.stop_calls.load(Ordering::SeqCst)
    }

    /// 当前被"占用"的组合键
    pub fn claimed(&self) -> BTreeMap<ActionId, KeyCombination> {
        self.lock_claimed().clone()
    }

    /// 是否有投递线程在运行
    pub fn is_running(&self) -> bool {
        self.lock_current().is_some()
    }

    fn take_start_failure(&self) -> bool {
        self.inner
            .failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

struct Running {
    token: HandleToken,
    thread: DeliveryThread,
    commands: mpsc::Sender<SimCommand>,
}

/// 模拟后端实例
pub struct SimulatedBackend {
    control: SimulatedControl,
    options: BackendOptions,
    running: Option<Running>,
}

impl SimulatedBackend {
    pub fn new(control: SimulatedControl, options: BackendOptions) -> Self {
        Self {
            control,
            options,
            running: None,
        }
    }

    fn shutdown(&mut self, running: Running) -> Result<(), ResourceLeakWarning> {
        self.control.inner.stop_calls.fetch_add(1, Ordering::SeqCst);
        let _ = running.commands.send(SimCommand::Stop);

        {
            let mut current = self.control.lock_current();
            if current.as_ref().is_some_and(|(token, _)| *token == running.token) {
                *current = None;
            }
        }
        self.control.lock_claimed().clear();

        let result = running.thread.join_timeout(self.options.join_timeout);
        // 丢弃发送端，被泄漏的线程随后自行退出
        drop(running.commands);
        result
    }
}

impl HotkeyBackend for SimulatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }

    fn start(
        &mut self,
        bindings: &BindingTable,
        on_trigger: TriggerCallback,
    ) -> Result<BackendHandle, OsError> {
        self.control.inner.start_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(previous) = self.running.take() {
            if let Err(leak) = self.shutdown(previous) {
                tracing::warn!(error = %leak, "Previous simulated backend leaked");
            }
        }

        if self.control.take_start_failure() {
            return Err(OsError::Simulated("start refused".to_string()));
        }

        let (tx, rx) = mpsc::channel::<SimCommand>();
        let control = self.control.clone();
        let (thread, ()) = DeliveryThread::spawn(
            "hotline-simulated",
            self.options.startup_timeout,
            move |signal| {
                if !signal.ready(()) {
                    return;
                }
                while let Ok(command) = rx.recv() {
                    match command {
                        SimCommand::Fire(action) => on_trigger(action),
                        SimCommand::Die => {
                            tracing::debug!("Simulated delivery thread killed");
                            return;
                        }
                        SimCommand::Stop => {
                            if control.inner.ignore_stop.load(Ordering::SeqCst) {
                                continue;
                            }
                            return;
                        }
                    }
                }
            },
        )?;

        let handle = BackendHandle::new(BackendKind::Simulated, 0, thread.alive_flag());
        *self.control.lock_current() = Some((handle.token(), tx.clone()));
        *self.control.lock_claimed() = bindings.clone();

        self.running = Some(Running {
            token: handle.token(),
            thread,
            commands: tx,
        });

        Ok(handle)
    }

    fn stop(&mut self, handle: BackendHandle) -> Result<(), ResourceLeakWarning> {
        match self.running.take() {
            Some(running) if running.token == handle.token() => self.shutdown(running),
            other => {
                self.running = other;
                Ok(())
            }
        }
    }

    fn probe(&self, handle: &BackendHandle) -> CanaryStatus {
        match &self.running {
            Some(running) if running.token == handle.token() => {
                if !running.thread.is_alive() {
                    CanaryStatus::Unresponsive
                } else if self.control.inner.canary_lost.load(Ordering::SeqCst) {
                    CanaryStatus::Lost("canary combination no longer owned".to_string())
                } else {
                    CanaryStatus::Owned
                }
            }
            _ => CanaryStatus::Lost("backend not running".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::HotkeyConfig;
    use std::time::Duration;

    fn options() -> BackendOptions {
        BackendOptions {
            join_timeout: Duration::from_millis(200),
            ..BackendOptions::default()
        }
    }

    fn recorder() -> (TriggerCallback, mpsc::Receiver<ActionId>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: TriggerCallback = Arc::new(move |action| {
            let _ = tx.lock().unwrap().send(action);
        });
        (callback, rx)
    }

    #[test]
    fn test_fire_delivers_on_thread() {
        let control = SimulatedControl::new();
        let mut backend = SimulatedBackend::new(control.clone(), options());
        let (callback, rx) = recorder();

        let table = HotkeyConfig::default().parse().unwrap();
        let handle = backend.start(&table, callback).unwrap();
        assert_eq!(control.claimed().len(), 6);

        assert!(control.fire(ActionId::Screenshot));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            ActionId::Screenshot
        );

        backend.stop(handle).unwrap();
        assert!(control.claimed().is_empty());
        assert!(!control.fire(ActionId::Screenshot));
    }

    #[test]
    fn test_kill_marks_handle_dead() {
        let control = SimulatedControl::new();
        let mut backend = SimulatedBackend::new(control.clone(), options());
        let (callback, _rx) = recorder();
        let handle = backend
            .start(&HotkeyConfig::default().parse().unwrap(), callback)
            .unwrap();

        assert!(control.kill_delivery_thread());
        for _ in 0..100 {
            if !handle.is_alive() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_alive());
        assert_eq!(backend.probe(&handle), CanaryStatus::Unresponsive);
        assert!(backend.stop(handle).is_ok());
    }

    #[test]
    fn test_fail_next_starts() {
        let control = SimulatedControl::new();
        control.fail_next_starts(1);
        let mut backend = SimulatedBackend::new(control.clone(), options());
        let table = HotkeyConfig::default().parse().unwrap();

        let (callback, _rx) = recorder();
        assert!(backend.start(&table, Arc::clone(&callback)).is_err());
        assert!(backend.start(&table, callback).is_ok());
        assert_eq!(control.start_calls(), 2);
    }

    #[test]
    fn test_probe_reports_lost_canary() {
        let control = SimulatedControl::new();
        let mut backend = SimulatedBackend::new(control.clone(), options());
        let (callback, _rx) = recorder();
        let handle = backend
            .start(&HotkeyConfig::default().parse().unwrap(), callback)
            .unwrap();

        assert!(backend.probe(&handle).is_owned());
        control.set_canary_lost(true);
        assert!(matches!(backend.probe(&handle), CanaryStatus::Lost(_)));
    }

    #[test]
    fn test_stop_times_out_when_thread_hangs() {
        let control = SimulatedControl::new();
        control.ignore_stop(true);
        let mut backend = SimulatedBackend::new(control.clone(), options());
        let (callback, _rx) = recorder();
        let handle = backend
            .start(&HotkeyConfig::default().parse().unwrap(), callback)
            .unwrap();

        let started = std::time::Instant::now();
        let leak = backend.stop(handle).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(leak.timeout_ms, 200);
    }
}
