//! 热键配置错误类型

use thiserror::Error;

use super::action::ActionId;

/// 热键配置错误
///
/// 组合键解析或绑定表校验失败时返回，任何一项失败都会使整份配置被拒绝
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// 绑定表为空
    #[error("No hotkey bindings configured")]
    EmptyBindings,

    /// 组合键字符串为空
    #[error("Hotkey combination is empty")]
    EmptyCombination,

    /// 格式错误（例如连续的 `+` 或结尾的 `+`）
    #[error("Invalid hotkey format: {0}")]
    InvalidFormat(String),

    /// 缺少修饰键
    #[error("Hotkey '{0}' has no modifier key")]
    MissingModifier(String),

    /// 缺少非修饰键
    #[error("Hotkey '{0}' has no non-modifier key")]
    MissingKey(String),

    /// 无法识别的按键名
    #[error("Unknown key '{token}' in hotkey '{combo}'")]
    UnknownKey { combo: String, token: String },

    /// 出现了多个非修饰键
    #[error("Ambiguous hotkey '{combo}': both '{first}' and '{second}' are non-modifier keys")]
    AmbiguousKey {
        combo: String,
        first: String,
        second: String,
    },

    /// 同一组合键被绑定到两个动作
    #[error("Hotkey '{combo}' is bound to both {first} and {second}")]
    DuplicateCombination {
        combo: String,
        first: ActionId,
        second: ActionId,
    },

    /// 无法识别的动作名
    #[error("Unknown hotkey action: {0}")]
    UnknownAction(String),
}

/// 热键配置的结果类型
pub type ConfigResult<T> = Result<T, ConfigError>;
