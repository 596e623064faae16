use hotline_lib::backend::BackendKind;
use hotline_lib::hotkey::{ActionId, HotkeyConfig};
use hotline_lib::state::{
    AppConfig, ConfigManager, SettingsError, StateError, StateManager, SubsystemState,
    SupervisorConfig,
};
use std::path::PathBuf;
use std::time::Duration;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("hotline-state-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn test_state_manager_default() {
    let manager = StateManager::default();
    assert!(manager.current().is_stopped());
}

#[tokio::test]
async fn test_complete_lifecycle() {
    let manager = StateManager::new();
    let mut rx = manager.subscribe();

    // 1. Stopped -> Starting -> Running
    manager.transition(SubsystemState::Starting).unwrap();
    manager.transition(SubsystemState::Running).unwrap();

    // 2. Running -> Degraded -> Recovering -> Running
    manager
        .transition(SubsystemState::degraded("delivery thread dead"))
        .unwrap();
    manager.transition(SubsystemState::Recovering).unwrap();
    manager.transition(SubsystemState::Running).unwrap();

    // 3. Running -> Stopped
    manager.transition(SubsystemState::Stopped).unwrap();

    let mut seen = Vec::new();
    while let Ok(state) = rx.try_recv() {
        seen.push(state.name());
    }
    assert_eq!(
        seen,
        vec!["Starting", "Running", "Degraded", "Recovering", "Running", "Stopped"]
    );
}

#[test]
fn test_failed_only_leaves_through_start_or_stop() {
    let manager = StateManager::new();
    manager.transition(SubsystemState::Starting).unwrap();
    manager
        .transition(SubsystemState::failed("ceiling reached"))
        .unwrap();

    let err = manager.transition(SubsystemState::Recovering).unwrap_err();
    let StateError::InvalidTransition { from, to } = err;
    assert!(from.is_failed());
    assert!(to.is_recovering());

    assert_eq!(manager.current().reason(), Some("ceiling reached"));
    manager.transition(SubsystemState::Starting).unwrap();
}

#[test]
fn test_supervisor_defaults() {
    let config = SupervisorConfig::default();
    assert_eq!(config.backend, BackendKind::Registered);
    assert_eq!(config.debounce(), Duration::from_millis(300));
    assert_eq!(config.liveness_interval(), Duration::from_millis(1_500));
    assert_eq!(config.staleness_window(), Duration::from_secs(20));
    assert_eq!(config.failure_ceiling, 3);
    assert_eq!(config.forced_restart_interval(), None);
}

#[test]
fn test_partial_config_uses_defaults() {
    let config = ConfigManager::parse(
        r#"{ "supervisor": { "backend": "low_level_hook", "failure_ceiling": 5 } }"#,
    )
    .unwrap();

    assert_eq!(config.supervisor.backend, BackendKind::LowLevelHook);
    assert_eq!(config.supervisor.failure_ceiling, 5);
    assert_eq!(config.supervisor.debounce_ms, 300);
    assert_eq!(config.hotkeys, HotkeyConfig::default());
}

#[test]
fn test_legacy_config_file() {
    let config = ConfigManager::parse(
        r#"{ "hotkey1": "Alt+Q", "screenshot_hotkey": "Ctrl+Shift+S", "language": "zh" }"#,
    )
    .unwrap();

    assert_eq!(config.hotkeys.get(ActionId::SelectionToInput), Some("Alt+Q"));
    assert_eq!(config.hotkeys.get(ActionId::Screenshot), Some("Ctrl+Shift+S"));
    assert_eq!(config.hotkeys.get(ActionId::ToggleInput), Some("Alt+2"));
    assert_eq!(config.hotkeys.len(), 6);
    assert_eq!(config.supervisor, SupervisorConfig::default());
}

#[test]
fn test_settings_window_file_shape() {
    // 旧版设置窗口保存的完整文件：AI 设置与五个快捷键，没有 command_hotkey
    let content = r#"{
        "api_key": "sk-test",
        "base_url": "https://api.example.com/v1",
        "model": "gpt-4o-mini",
        "proxy_enabled": false,
        "image_api_key": "",
        "image_model": "gpt-4o",
        "hotkey1": "Alt+Q",
        "hotkey2": "Alt+W",
        "selection_hotkey": "Alt+2",
        "screenshot_hotkey": "Alt+3",
        "chat_hotkey": "ctrl+4"
    }"#;
    let config = ConfigManager::parse(content).unwrap();

    let hotkeys = &config.hotkeys;
    assert_eq!(hotkeys.len(), 6);
    assert_eq!(hotkeys.get(ActionId::SelectionToInput), Some("Alt+Q"));
    assert_eq!(hotkeys.get(ActionId::ToggleInput), Some("Alt+W"));
    assert_eq!(hotkeys.get(ActionId::SelectionSearch), Some("Alt+2"));
    assert_eq!(hotkeys.get(ActionId::Screenshot), Some("Alt+3"));
    assert_eq!(hotkeys.get(ActionId::ChatWindow), Some("ctrl+4"));
    assert_eq!(hotkeys.get(ActionId::CommandPalette), Some("Alt+5"));

    let table = hotkeys.parse().unwrap();
    assert_eq!(table[&ActionId::ChatWindow].to_string(), "Ctrl+4");
}

#[test]
fn test_malformed_config_is_an_error() {
    assert!(ConfigManager::parse("{ not json").is_err());
}

#[test]
fn test_zero_check_period_is_rejected() {
    let content = r#"{ "supervisor": { "staleness_check_interval_ms": 0 } }"#;
    match ConfigManager::parse(content) {
        Err(SettingsError::Invalid { field, .. }) => {
            assert_eq!(field, "staleness_check_interval_ms")
        }
        other => panic!("expected invalid supervisor config, got {other:?}"),
    }

    let path = temp_path("zero-period.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "supervisor": { "liveness_interval_ms": 0 } }"#).unwrap();
    assert!(ConfigManager::load(&path).is_err());
    assert_eq!(ConfigManager::load_or_default(&path), AppConfig::default());
    ConfigManager::delete(&path).unwrap();
}

#[test]
fn test_save_load_and_reset() {
    let path = temp_path("config.json");
    let _ = ConfigManager::delete(&path);

    // 文件不存在时返回默认配置
    assert_eq!(ConfigManager::load(&path).unwrap(), AppConfig::default());

    let config = AppConfig {
        hotkeys: HotkeyConfig::default().with_binding(ActionId::ChatWindow, "Ctrl+Alt+C"),
        supervisor: SupervisorConfig::default().with_forced_restart(Duration::from_secs(600)),
    };
    ConfigManager::save(&path, &config).unwrap();
    assert_eq!(ConfigManager::load(&path).unwrap(), config);

    let reset = ConfigManager::reset(&path).unwrap();
    assert_eq!(reset, AppConfig::default());
    assert_eq!(ConfigManager::load(&path).unwrap(), AppConfig::default());

    ConfigManager::delete(&path).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_load_or_default_on_garbage() {
    let path = temp_path("garbage.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "][").unwrap();

    assert_eq!(ConfigManager::load_or_default(&path), AppConfig::default());
    ConfigManager::delete(&path).unwrap();
}
