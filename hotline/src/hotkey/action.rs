//! 热键动作标识
//!
//! 每个热键绑定到一个封闭枚举中的动作，配置解析完成后不再出现自由字符串

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// 热键可以触发的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    /// 把当前选中文本送入输入框
    SelectionToInput,
    /// 显示/隐藏输入窗口
    ToggleInput,
    /// 以选中文本发起搜索
    SelectionSearch,
    /// 截图
    Screenshot,
    /// 打开聊天窗口
    ChatWindow,
    /// 打开命令面板
    CommandPalette,
}

impl ActionId {
    /// 全部动作，按原生热键 id 排序
    pub const ALL: [ActionId; 6] = [
        ActionId::SelectionToInput,
        ActionId::ToggleInput,
        ActionId::SelectionSearch,
        ActionId::Screenshot,
        ActionId::ChatWindow,
        ActionId::CommandPalette,
    ];

    /// 配置文件与日志中使用的名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectionToInput => "selection_to_input",
            Self::ToggleInput => "toggle_input",
            Self::SelectionSearch => "selection_search",
            Self::Screenshot => "screenshot",
            Self::ChatWindow => "chat_window",
            Self::CommandPalette => "command_palette",
        }
    }

    /// 旧版配置文件使用的键名
    pub fn legacy_key(&self) -> &'static str {
        match self {
            Self::SelectionToInput => "hotkey1",
            Self::ToggleInput => "hotkey2",
            Self::SelectionSearch => "selection_hotkey",
            Self::Screenshot => "screenshot_hotkey",
            Self::ChatWindow => "chat_hotkey",
            Self::CommandPalette => "command_hotkey",
        }
    }

    /// 从旧版键名查找动作
    pub fn from_legacy_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.legacy_key() == key)
    }

    /// 向操作系统注册时使用的热键 id
    ///
    /// id 在进程内稳定，重建后端时沿用同一编号
    pub fn native_id(&self) -> i32 {
        match self {
            Self::SelectionToInput => 1,
            Self::ToggleInput => 2,
            Self::SelectionSearch => 3,
            Self::Screenshot => 4,
            Self::ChatWindow => 5,
            Self::CommandPalette => 6,
        }
    }

    /// 从原生热键 id 还原动作
    pub fn from_native_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.native_id() == id)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionId {
    type Err = ConfigError;

    /// 接受 snake_case 名称（大小写不敏感）或旧版键名
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(trimmed))
            .or_else(|| Self::from_legacy_key(trimmed))
            .ok_or_else(|| ConfigError::UnknownAction(s.to_string()))
    }
}
