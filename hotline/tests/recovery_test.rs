use hotline_lib::backend::{BackendOptions, SimulatedControl};
use hotline_lib::events::EventBus;
use hotline_lib::health::{HealthState, RecoveryReason};
use hotline_lib::hotkey::HotkeyConfig;
use hotline_lib::recovery::RecoveryController;
use hotline_lib::registry::HotkeyRegistry;
use hotline_lib::state::{StateManager, SupervisorConfig};
use hotline_lib::utils::error::HotkeyError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Fixture {
    control: SimulatedControl,
    registry: Arc<HotkeyRegistry>,
    health: Arc<HealthState>,
    state: Arc<StateManager>,
    failures: Arc<AtomicUsize>,
    recovery: RecoveryController,
}

fn fixture(ceiling: u32) -> Fixture {
    let control = SimulatedControl::new();
    let config = SupervisorConfig {
        failure_ceiling: ceiling,
        settle_delay_ms: 5,
        join_timeout_ms: 200,
        ..SupervisorConfig::default()
    };

    let registry = Arc::new(HotkeyRegistry::new(
        control.factory(BackendOptions::from(&config)),
        Arc::new(|_| {}),
    ));
    registry.configure(&HotkeyConfig::default()).unwrap();

    let health = Arc::new(HealthState::new(ceiling));
    let state = Arc::new(StateManager::new());
    let bus = Arc::new(EventBus::default());
    let failures = Arc::new(AtomicUsize::new(0));
    let f = failures.clone();
    bus.subscribe_failure(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let recovery = RecoveryController::new(
        registry.clone(),
        health.clone(),
        state.clone(),
        bus,
        &config,
    );

    Fixture {
        control,
        registry,
        health,
        state,
        failures,
        recovery,
    }
}

#[test]
fn test_restart_rebuilds_backend() {
    let fx = fixture(3);
    fx.recovery.launch().unwrap();
    let first = fx.registry.live().unwrap().handle.token();

    fx.recovery.restart(RecoveryReason::CanaryLost).unwrap();

    let second = fx.registry.live().unwrap().handle.token();
    assert_ne!(first, second);
    assert!(fx.state.current().is_running());
    assert_eq!(fx.control.stop_calls(), 1);
    assert_eq!(fx.health.snapshot().consecutive_failures, 0);
}

#[test]
fn test_ceiling_stops_automatic_recovery() {
    let fx = fixture(3);
    fx.control.fail_starts(true);

    // 第一次启动失败，进入降级
    assert!(matches!(fx.recovery.launch(), Err(HotkeyError::Os(_))));
    assert!(fx.state.current().is_degraded());

    // 第二次
    assert!(matches!(
        fx.recovery.restart(RecoveryReason::StartFailed),
        Err(HotkeyError::Os(_))
    ));
    assert_eq!(fx.health.snapshot().consecutive_failures, 2);

    // 第三次达到上限
    assert!(matches!(
        fx.recovery.restart(RecoveryReason::StartFailed),
        Err(HotkeyError::TerminalFailure(_))
    ));
    assert!(fx.state.current().is_failed());
    assert_eq!(fx.control.start_calls(), 3);
    assert_eq!(fx.failures.load(Ordering::SeqCst), 1);

    // 终止后不再尝试激活
    assert!(matches!(
        fx.recovery.restart(RecoveryReason::StartFailed),
        Err(HotkeyError::TerminalFailure(_))
    ));
    assert_eq!(fx.control.start_calls(), 3);
    assert_eq!(fx.failures.load(Ordering::SeqCst), 1);
}

#[test]
fn test_explicit_launch_leaves_failed() {
    let fx = fixture(1);
    fx.control.fail_starts(true);
    assert!(fx.recovery.launch().is_err());
    assert!(fx.state.current().is_failed());

    fx.control.fail_starts(false);
    fx.recovery.launch().unwrap();

    assert!(fx.state.current().is_running());
    assert!(fx.registry.is_active());
    assert_eq!(fx.health.snapshot().consecutive_failures, 0);
}

#[test]
fn test_success_resets_failure_count() {
    let fx = fixture(3);
    fx.control.fail_next_starts(2);

    assert!(fx.recovery.launch().is_err());
    assert!(fx.recovery.restart(RecoveryReason::StartFailed).is_err());
    assert_eq!(fx.health.snapshot().consecutive_failures, 2);

    fx.recovery.restart(RecoveryReason::StartFailed).unwrap();
    assert!(fx.state.current().is_running());
    assert_eq!(fx.health.snapshot().consecutive_failures, 0);
    assert_eq!(fx.failures.load(Ordering::SeqCst), 0);
}

#[test]
fn test_restart_after_stop_is_ignored() {
    let fx = fixture(3);
    fx.recovery.launch().unwrap();
    fx.recovery.stop().unwrap();

    fx.recovery.restart(RecoveryReason::ForcedRestart).unwrap();
    assert!(fx.state.current().is_stopped());
    assert!(!fx.registry.is_active());
    assert_eq!(fx.control.start_calls(), 1);
}

#[test]
fn test_concurrent_restarts_do_not_interleave() {
    let fx = Arc::new(fixture(3));
    fx.recovery.launch().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fx = fx.clone();
            std::thread::spawn(move || fx.recovery.restart(RecoveryReason::ForcedRestart))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // 每次重建都先停掉上一个后端，同一时刻只有一个后端在运行
    assert_eq!(fx.control.start_calls(), 5);
    assert_eq!(fx.control.stop_calls(), 4);
    assert!(fx.control.is_running());
    assert!(fx.state.current().is_running());

    fx.recovery.stop().unwrap();
}
