//! 热键模型
//!
//! 描述"哪个组合键触发哪个动作"，不涉及任何操作系统调用
//!
//! # 功能
//!
//! - [`ActionId`]：封闭的动作集合
//! - [`KeyCombination`]：组合键解析与规范化
//! - [`HotkeyConfig`]：可序列化的绑定配置，解析为 [`BindingTable`]
//!
//! # 使用方法
//!
//! ```
//! use hotline_lib::hotkey::{ActionId, HotkeyConfig};
//!
//! let table = HotkeyConfig::default().parse().unwrap();
//! assert_eq!(table[&ActionId::Screenshot].to_string(), "Alt+4");
//! ```

mod action;
mod combo;
mod config;
mod error;

pub use action::ActionId;
pub use combo::{Key, KeyCombination, Modifiers, NamedKey};
pub use config::{BindingTable, HotkeyConfig};
pub use error::{ConfigError, ConfigResult};
