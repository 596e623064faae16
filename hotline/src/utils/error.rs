//! 全局错误处理模块
//!
//! 聚合各模块的错误类型，并提供错误代码、用户可读消息和恢复建议
//!
//! # 使用示例
//!
//! ```
//! use hotline_lib::hotkey::ConfigError;
//! use hotline_lib::utils::error::{ErrorCode, HotkeyError};
//!
//! let err = HotkeyError::from(ConfigError::EmptyBindings);
//! assert_eq!(err.code(), ErrorCode::ConfigInvalid);
//! assert!(!err.is_recoverable());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{OsError, ResourceLeakWarning};
use crate::hotkey::ConfigError;
use crate::state::{SettingsError, StateError};

/// 热键子系统错误类型
#[derive(Error, Debug)]
pub enum HotkeyError {
    /// 绑定配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 配置文件错误
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// 操作系统错误
    #[error("OS error: {0}")]
    Os(#[from] OsError),

    /// 投递线程泄漏
    #[error("Resource leak: {0}")]
    ResourceLeak(#[from] ResourceLeakWarning),

    /// 状态机错误
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// 连续失败达到上限，自动恢复已停止
    #[error("Hotkey subsystem failed permanently: {0}")]
    TerminalFailure(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 配置错误 (1xxx)
    /// 绑定无效
    ConfigInvalid,
    /// 组合键重复
    ConfigDuplicate,
    /// 配置文件读写失败
    ConfigLoadFailed,

    // 系统错误 (2xxx)
    /// 组合键被占用
    HotkeyOccupied,
    /// 注册失败
    HotkeyRegistrationFailed,
    /// 投递线程启动失败
    DeliveryThreadFailed,
    /// 平台不支持
    PlatformUnsupported,
    /// 资源泄漏
    ResourceLeaked,

    // 生命周期错误 (3xxx)
    /// 非法状态转换
    InvalidState,
    /// 终止失败
    TerminalFailure,

    // 通用错误 (9xxx)
    /// 内部错误
    InternalError,
}

/// 错误上下文信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// 错误代码
    pub code: ErrorCode,
    /// 用户可读的错误消息
    pub message: String,
    /// 详细错误信息（用于日志）
    pub detail: Option<String>,
    /// 恢复建议
    pub recovery_hint: Option<String>,
    /// 是否可恢复
    pub recoverable: bool,
}

impl ErrorContext {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            recovery_hint: None,
            recoverable: true,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_recovery_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    pub fn not_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

impl HotkeyError {
    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            HotkeyError::Config(ConfigError::DuplicateCombination { .. }) => {
                ErrorCode::ConfigDuplicate
            }
            HotkeyError::Config(_) => ErrorCode::ConfigInvalid,
            HotkeyError::Settings(_) => ErrorCode::ConfigLoadFailed,

            HotkeyError::Os(OsError::Occupied(_)) => ErrorCode::HotkeyOccupied,
            HotkeyError::Os(OsError::RegistrationFailed { .. }) => {
                ErrorCode::HotkeyRegistrationFailed
            }
            HotkeyError::Os(OsError::Unsupported(_)) => ErrorCode::PlatformUnsupported,
            HotkeyError::Os(OsError::NotConfigured) => ErrorCode::ConfigInvalid,
            HotkeyError::Os(_) => ErrorCode::DeliveryThreadFailed,
            HotkeyError::ResourceLeak(_) => ErrorCode::ResourceLeaked,

            HotkeyError::State(_) => ErrorCode::InvalidState,
            HotkeyError::TerminalFailure(_) => ErrorCode::TerminalFailure,
            HotkeyError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// 用户可读的错误消息
    pub fn user_message(&self) -> String {
        match self {
            HotkeyError::Config(ConfigError::DuplicateCombination { combo, .. }) => {
                format!("快捷键 {combo} 被绑定到了多个功能")
            }
            HotkeyError::Config(_) => "快捷键格式无效".to_string(),
            HotkeyError::Settings(_) => "无法读取配置文件".to_string(),
            HotkeyError::Os(OsError::Occupied(combo)) => {
                format!("快捷键 {combo} 已被其他程序占用")
            }
            HotkeyError::Os(OsError::Unsupported(_)) => "当前系统不支持全局快捷键".to_string(),
            HotkeyError::Os(_) => "全局快捷键注册失败".to_string(),
            HotkeyError::ResourceLeak(_) => "快捷键线程未能正常退出".to_string(),
            HotkeyError::State(_) => "快捷键服务状态异常".to_string(),
            HotkeyError::TerminalFailure(_) => "全局快捷键已失效，请手动重启快捷键服务".to_string(),
            HotkeyError::Internal(msg) => format!("内部错误: {msg}"),
        }
    }

    /// 恢复建议
    pub fn recovery_hint(&self) -> Option<String> {
        match self {
            HotkeyError::Config(_) => Some("请检查配置中的组合键，例如 Alt+1、Ctrl+Shift+S".to_string()),
            HotkeyError::Os(OsError::Occupied(_)) => {
                Some("请关闭占用该快捷键的程序，或更换其他组合键".to_string())
            }
            HotkeyError::TerminalFailure(_) => Some("在设置中重新启动快捷键服务".to_string()),
            _ => None,
        }
    }

    /// 获取完整的错误上下文
    pub fn to_context(&self) -> ErrorContext {
        let mut ctx = ErrorContext::new(self.code(), self.user_message()).with_detail(self.to_string());
        ctx.recovery_hint = self.recovery_hint();

        if !self.is_recoverable() {
            ctx = ctx.not_recoverable();
        }
        ctx
    }

    /// 自动恢复能否处理该错误
    ///
    /// 配置错误和终止失败需要用户介入
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            HotkeyError::Config(_)
                | HotkeyError::Settings(_)
                | HotkeyError::TerminalFailure(_)
                | HotkeyError::Internal(_)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HotkeyError::TerminalFailure(_))
    }
}

/// 子系统结果类型
pub type HotkeyResult<T> = Result<T, HotkeyError>;

impl From<tokio::task::JoinError> for HotkeyError {
    fn from(err: tokio::task::JoinError) -> Self {
        HotkeyError::Internal(format!("blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = HotkeyError::from(OsError::Occupied("Alt+1".to_string()));
        assert_eq!(err.code(), ErrorCode::HotkeyOccupied);

        let err = HotkeyError::from(ConfigError::DuplicateCombination {
            combo: "Alt+1".to_string(),
            first: crate::hotkey::ActionId::ToggleInput,
            second: crate::hotkey::ActionId::Screenshot,
        });
        assert_eq!(err.code(), ErrorCode::ConfigDuplicate);

        let err = HotkeyError::TerminalFailure("gone".to_string());
        assert_eq!(err.code(), ErrorCode::TerminalFailure);
    }

    #[test]
    fn test_recoverable() {
        assert!(HotkeyError::from(OsError::StartupAborted).is_recoverable());
        assert!(!HotkeyError::from(ConfigError::EmptyBindings).is_recoverable());

        let terminal = HotkeyError::TerminalFailure("x".to_string());
        assert!(!terminal.is_recoverable());
        assert!(terminal.is_terminal());
    }

    #[test]
    fn test_error_context() {
        let ctx = HotkeyError::from(OsError::Occupied("Alt+4".to_string())).to_context();
        assert_eq!(ctx.code, ErrorCode::HotkeyOccupied);
        assert!(ctx.message.contains("Alt+4"));
        assert!(ctx.detail.is_some());
        assert!(ctx.recovery_hint.is_some());
        assert!(ctx.recoverable);

        let ctx = HotkeyError::TerminalFailure("ceiling".to_string()).to_context();
        assert!(!ctx.recoverable);
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::HotkeyOccupied).unwrap();
        assert_eq!(json, "\"HOTKEY_OCCUPIED\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::HotkeyOccupied);
    }
}
