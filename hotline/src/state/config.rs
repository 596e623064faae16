//! 应用配置模块
//!
//! 提供热键绑定与监督参数的加载、保存和管理功能
//!
//! # 配置文件
//!
//! JSON 格式，默认位于 `config/config.json`：
//!
//! ```json
//! {
//!   "hotkeys": { "toggle_input": "Alt+2", "screenshot": "Alt+4" },
//!   "supervisor": { "backend": "registered", "failure_ceiling": 3 }
//! }
//! ```
//!
//! 旧版扁平格式（`hotkey1`、`screenshot_hotkey` 等顶层键）同样可以读取。
//!
//! # 使用示例
//!
//! ```no_run
//! use hotline_lib::state::config::ConfigManager;
//!
//! let config = ConfigManager::load("config/config.json").unwrap();
//! ConfigManager::save("config/config.json", &config).unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendKind;
use crate::hotkey::HotkeyConfig;

/// 配置文件错误类型
#[derive(Error, Debug)]
pub enum SettingsError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 路径错误
    #[error("Path error: {0}")]
    Path(String),

    /// 字段取值无效
    #[error("Invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// 配置文件结果类型
pub type SettingsResult<T> = Result<T, SettingsError>;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 热键绑定
    pub hotkeys: HotkeyConfig,
    /// 健康监督与恢复参数
    pub supervisor: SupervisorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hotkeys: HotkeyConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// 监督配置
///
/// 时间参数以毫秒存储，便于在 JSON 中书写
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// 后端策略
    pub backend: BackendKind,
    /// 同一动作重复触发的去抖窗口
    pub debounce_ms: u64,
    /// 投递线程存活检查间隔
    pub liveness_interval_ms: u64,
    /// 陈旧度检查间隔
    pub staleness_check_interval_ms: u64,
    /// 多久没有触发后才发起金丝雀探测
    pub staleness_window_ms: u64,
    /// 周期性强制重建间隔，`None` 表示关闭
    pub forced_restart_interval_ms: Option<u64>,
    /// 连续失败上限，达到后进入终止状态
    pub failure_ceiling: u32,
    /// 注销与重新注册之间的等待
    pub settle_delay_ms: u64,
    /// 等待投递线程退出的上限
    pub join_timeout_ms: u64,
    /// 等待投递线程就绪的上限
    pub startup_timeout_ms: u64,
    /// 金丝雀探测超时
    pub probe_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            debounce_ms: 300,
            liveness_interval_ms: 1_500,
            staleness_check_interval_ms: 20_000,
            staleness_window_ms: 20_000,
            forced_restart_interval_ms: None,
            failure_ceiling: 3,
            settle_delay_ms: 200,
            join_timeout_ms: 2_000,
            startup_timeout_ms: 2_000,
            probe_timeout_ms: 500,
        }
    }
}

impl SupervisorConfig {
    /// 开启周期性强制重建
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use hotline_lib::state::SupervisorConfig;
    ///
    /// let config = SupervisorConfig::default().with_forced_restart(Duration::from_secs(60));
    /// assert_eq!(config.forced_restart_interval(), Some(Duration::from_secs(60)));
    /// ```
    pub fn with_forced_restart(mut self, interval: Duration) -> Self {
        self.forced_restart_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// 设置后端策略
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// 校验监督参数
    ///
    /// 检查周期、超时和失败上限都必须大于零
    ///
    /// # Errors
    ///
    /// 返回第一个取值无效的字段
    pub fn validate(&self) -> SettingsResult<()> {
        let positive = [
            ("liveness_interval_ms", self.liveness_interval_ms),
            ("staleness_check_interval_ms", self.staleness_check_interval_ms),
            ("forced_restart_interval_ms", self.forced_restart_interval_ms.unwrap_or(1)),
            ("failure_ceiling", u64::from(self.failure_ceiling)),
            ("join_timeout_ms", self.join_timeout_ms),
            ("startup_timeout_ms", self.startup_timeout_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
        ];

        match positive.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(SettingsError::Invalid {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }

    /// 把取值为零的字段换回默认值，零间隔的强制重建视为关闭
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let or_default = |value: u64, default: u64| if value == 0 { default } else { value };

        Self {
            liveness_interval_ms: or_default(self.liveness_interval_ms, defaults.liveness_interval_ms),
            staleness_check_interval_ms: or_default(
                self.staleness_check_interval_ms,
                defaults.staleness_check_interval_ms,
            ),
            forced_restart_interval_ms: self.forced_restart_interval_ms.filter(|ms| *ms > 0),
            failure_ceiling: if self.failure_ceiling == 0 {
                defaults.failure_ceiling
            } else {
                self.failure_ceiling
            },
            join_timeout_ms: or_default(self.join_timeout_ms, defaults.join_timeout_ms),
            startup_timeout_ms: or_default(self.startup_timeout_ms, defaults.startup_timeout_ms),
            probe_timeout_ms: or_default(self.probe_timeout_ms, defaults.probe_timeout_ms),
            ..self
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn staleness_check_interval(&self) -> Duration {
        Duration::from_millis(self.staleness_check_interval_ms)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }

    pub fn forced_restart_interval(&self) -> Option<Duration> {
        self.forced_restart_interval_ms.map(Duration::from_millis)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// 配置管理器
///
/// 负责配置文件的加载和保存
pub struct ConfigManager;

impl ConfigManager {
    /// 加载配置
    ///
    /// 文件不存在时返回默认配置
    ///
    /// # Arguments
    ///
    /// * `path` - 配置文件路径
    pub fn load(path: impl AsRef<Path>) -> SettingsResult<AppConfig> {
        let path = path.as_ref();

        tracing::debug!(path = %path.display(), "Loading config");

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        tracing::info!(path = %path.display(), "Config loaded successfully");
        Ok(config)
    }

    /// 加载配置，任何错误都退回默认配置
    pub fn load_or_default(path: impl AsRef<Path>) -> AppConfig {
        let path = path.as_ref();
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        })
    }

    /// 解析配置文本，兼容旧版扁平格式
    ///
    /// # Errors
    ///
    /// JSON 无效或监督参数无效（例如检查间隔为零）时返回错误
    pub fn parse(content: &str) -> SettingsResult<AppConfig> {
        let value: serde_json::Value = serde_json::from_str(content)?;

        if let Some(object) = value.as_object() {
            let structured = object.contains_key("hotkeys") || object.contains_key("supervisor");
            if !structured {
                if let Some(hotkeys) = HotkeyConfig::from_legacy(object) {
                    tracing::info!(bindings = hotkeys.len(), "Loaded legacy hotkey config");
                    return Ok(AppConfig {
                        hotkeys,
                        ..AppConfig::default()
                    });
                }
            }
        }

        let config: AppConfig = serde_json::from_value(value)?;
        config.supervisor.validate()?;
        Ok(config)
    }

    /// 保存配置
    ///
    /// # Arguments
    ///
    /// * `path` - 配置文件路径，父目录不存在时自动创建
    /// * `config` - 要保存的配置
    pub fn save(path: impl AsRef<Path>, config: &AppConfig) -> SettingsResult<()> {
        let path = path.as_ref();

        tracing::debug!(path = %path.display(), "Saving config");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "Config saved successfully");
        Ok(())
    }

    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// 删除配置文件
    pub fn delete(path: impl AsRef<Path>) -> SettingsResult<()> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
            tracing::info!(path = %path.display(), "Config deleted");
        }
        Ok(())
    }

    /// 重置为默认配置
    pub fn reset(path: impl AsRef<Path>) -> SettingsResult<AppConfig> {
        let config = AppConfig::default();
        Self::save(path, &config)?;
        tracing::info!("Config reset to defaults");
        Ok(config)
    }
}

/// 当前生效的配置
///
/// 使用 ArcSwap 实现无锁读取
pub struct GlobalConfig {
    config: ArcSwap<AppConfig>,
}

impl GlobalConfig {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: ArcSwap::new(Arc::new(config)),
        }
    }

    /// 获取当前配置
    pub fn get(&self) -> Arc<AppConfig> {
        self.config.load_full()
    }

    /// 只替换热键绑定
    pub fn set_hotkeys(&self, hotkeys: HotkeyConfig) {
        let mut config = (*self.config.load_full()).clone();
        config.hotkeys = hotkeys;
        self.config.store(Arc::new(config));
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        self.config.load().supervisor.clone()
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}
