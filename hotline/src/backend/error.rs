//! 后端错误类型

use thiserror::Error;

/// 与操作系统交互失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OsError {
    /// 热键注册失败
    #[error("Failed to register hotkey '{combo}': {reason}")]
    RegistrationFailed { combo: String, reason: String },

    /// 热键被系统或其他程序占用
    #[error("Hotkey '{0}' is occupied by system or another application")]
    Occupied(String),

    /// 消息窗口创建失败
    #[error("Failed to create message window: {0}")]
    WindowCreationFailed(String),

    /// 键盘钩子安装失败
    #[error("Failed to install keyboard hook: {0}")]
    HookInstallFailed(String),

    /// 投递线程创建失败
    #[error("Failed to spawn delivery thread: {0}")]
    ThreadSpawnFailed(String),

    /// 投递线程未在限定时间内就绪
    #[error("Delivery thread did not report readiness within {0}ms")]
    StartupTimeout(u64),

    /// 投递线程在就绪前退出
    #[error("Delivery thread exited during startup")]
    StartupAborted,

    /// 尚未配置任何绑定
    #[error("No hotkey bindings configured")]
    NotConfigured,

    /// 当前平台不支持该后端
    #[error("Hotkey backend is not supported on this platform: {0}")]
    Unsupported(String),

    /// 模拟后端注入的故障
    #[error("Simulated OS failure: {0}")]
    Simulated(String),
}

/// 投递线程未能在超时内退出
///
/// 线程被放弃（泄漏），调用方记录日志后继续，绝不无限等待
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Delivery thread '{thread}' did not exit within {timeout_ms}ms and was leaked")]
pub struct ResourceLeakWarning {
    pub thread: String,
    pub timeout_ms: u64,
}

/// 后端模块的结果类型
pub type OsResult<T> = Result<T, OsError>;
