//! 状态管理模块
//!
//! 提供子系统生命周期状态机与配置管理
//!
//! # 模块结构
//!
//! - `subsystem` - 生命周期状态定义和状态管理器
//! - `config` - 配置文件与监督参数
//! - `error` - 状态相关错误类型

pub mod config;
mod error;
mod subsystem;

pub use config::{AppConfig, ConfigManager, GlobalConfig, SettingsError, SupervisorConfig};
pub use error::{StateError, StateResult};
pub use subsystem::{StateManager, SubsystemState};
