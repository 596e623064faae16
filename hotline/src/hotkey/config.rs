//! 热键配置模块
//!
//! 定义动作到组合键字符串的映射、默认值以及旧版配置键的兼容读取

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::ActionId;
use super::combo::KeyCombination;
use super::error::{ConfigError, ConfigResult};

/// 解析完成的绑定表
pub type BindingTable = BTreeMap<ActionId, KeyCombination>;

/// 热键配置
///
/// 保存原始的组合键字符串，调用 [`HotkeyConfig::parse`] 后才得到经过校验的绑定表
///
/// # Examples
///
/// ```
/// use hotline_lib::hotkey::{ActionId, HotkeyConfig};
///
/// let config = HotkeyConfig::default();
/// assert_eq!(config.get(ActionId::ToggleInput), Some("Alt+2"));
///
/// let config = HotkeyConfig::new()
///     .with_binding(ActionId::Screenshot, "Ctrl+Shift+S");
/// assert_eq!(config.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HotkeyConfig {
    bindings: BTreeMap<ActionId, String>,
}

impl HotkeyConfig {
    /// 创建空配置
    pub fn new() -> Self {
        Self {
            bindings: BTreeMap::new(),
        }
    }

    /// 设置某个动作的组合键
    ///
    /// # Arguments
    ///
    /// * `action` - 动作
    /// * `combo` - 组合键字符串，例如 `"Alt+3"`
    pub fn with_binding(mut self, action: ActionId, combo: impl Into<String>) -> Self {
        self.bindings.insert(action, combo.into());
        self
    }

    /// 移除某个动作的绑定
    pub fn without_binding(mut self, action: ActionId) -> Self {
        self.bindings.remove(&action);
        self
    }

    pub fn set(&mut self, action: ActionId, combo: impl Into<String>) {
        self.bindings.insert(action, combo.into());
    }

    pub fn get(&self, action: ActionId) -> Option<&str> {
        self.bindings.get(&action).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionId, &str)> {
        self.bindings
            .iter()
            .map(|(action, combo)| (*action, combo.as_str()))
    }

    /// 从旧版扁平配置读取（`hotkey1`、`screenshot_hotkey` 等键）
    ///
    /// 缺失的键沿用默认绑定；非字符串值和未知键被忽略。
    /// 一个旧版键都没有时返回 `None`
    pub fn from_legacy(object: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        let mut config = Self::default();
        let mut found = 0;

        for (key, value) in object {
            let Some(action) = ActionId::from_legacy_key(key) else {
                continue;
            };
            found += 1;
            if let Some(combo) = value.as_str() {
                config.set(action, combo);
            }
        }

        (found > 0).then_some(config)
    }

    /// 解析并校验全部绑定
    ///
    /// 全有或全无：任一组合键无效，或两个动作使用了同一组合键，整份配置都被拒绝
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyBindings`] - 没有任何绑定
    /// - [`ConfigError::DuplicateCombination`] - 组合键重复
    /// - 组合键解析产生的其他 [`ConfigError`]
    pub fn parse(&self) -> ConfigResult<BindingTable> {
        if self.bindings.is_empty() {
            return Err(ConfigError::EmptyBindings);
        }

        let mut table = BindingTable::new();
        let mut owners: BTreeMap<KeyCombination, ActionId> = BTreeMap::new();

        for (action, text) in &self.bindings {
            let combo = KeyCombination::parse(text).inspect_err(|e| {
                tracing::warn!(action = %action, combo = %text, error = %e, "Invalid hotkey binding");
            })?;

            if let Some(first) = owners.insert(combo, *action) {
                return Err(ConfigError::DuplicateCombination {
                    combo: combo.to_string(),
                    first,
                    second: *action,
                });
            }
            table.insert(*action, combo);
        }

        Ok(table)
    }
}

impl Default for HotkeyConfig {
    /// 默认绑定
    ///
    /// - selection_to_input: `Alt+1`
    /// - toggle_input: `Alt+2`
    /// - selection_search: `Alt+3`
    /// - screenshot: `Alt+4`
    /// - chat_window: `Control+4`
    /// - command_palette: `Alt+5`
    fn default() -> Self {
        Self::new()
            .with_binding(ActionId::SelectionToInput, "Alt+1")
            .with_binding(ActionId::ToggleInput, "Alt+2")
            .with_binding(ActionId::SelectionSearch, "Alt+3")
            .with_binding(ActionId::Screenshot, "Alt+4")
            .with_binding(ActionId::ChatWindow, "Control+4")
            .with_binding(ActionId::CommandPalette, "Alt+5")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HotkeyConfig::default();
        assert_eq!(config.len(), 6);
        assert_eq!(config.get(ActionId::SelectionToInput), Some("Alt+1"));
        assert_eq!(config.get(ActionId::ChatWindow), Some("Control+4"));

        let table = config.parse().unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table[&ActionId::ChatWindow].to_string(), "Ctrl+4");
    }

    #[test]
    fn test_config_builder_pattern() {
        let config = HotkeyConfig::default()
            .without_binding(ActionId::CommandPalette)
            .with_binding(ActionId::Screenshot, "Ctrl+Shift+S");

        assert_eq!(config.len(), 5);
        assert_eq!(config.get(ActionId::CommandPalette), None);
        assert_eq!(config.get(ActionId::Screenshot), Some("Ctrl+Shift+S"));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(HotkeyConfig::new().parse(), Err(ConfigError::EmptyBindings));
    }

    #[test]
    fn test_parse_rejects_whole_table_on_single_error() {
        let config = HotkeyConfig::default().with_binding(ActionId::Screenshot, "Alt+Nope");
        assert!(matches!(config.parse(), Err(ConfigError::UnknownKey { .. })));
    }

    #[test]
    fn test_parse_rejects_duplicate_combination() {
        let config = HotkeyConfig::new()
            .with_binding(ActionId::ToggleInput, "Alt+Q")
            .with_binding(ActionId::Screenshot, "alt + q");

        assert_eq!(
            config.parse(),
            Err(ConfigError::DuplicateCombination {
                combo: "Alt+Q".to_string(),
                first: ActionId::ToggleInput,
                second: ActionId::Screenshot,
            })
        );
    }

    #[test]
    fn test_from_legacy() {
        let value = serde_json::json!({
            "hotkey1": "Alt+1",
            "screenshot_hotkey": "Ctrl+Alt+A",
            "theme": "dark",
            "hotkey2": 42
        });
        let config = HotkeyConfig::from_legacy(value.as_object().unwrap()).unwrap();
        assert_eq!(config.len(), 6);
        assert_eq!(config.get(ActionId::Screenshot), Some("Ctrl+Alt+A"));
        // 非字符串值保留默认
        assert_eq!(config.get(ActionId::ToggleInput), Some("Alt+2"));
        assert_eq!(config.get(ActionId::ChatWindow), Some("Control+4"));

        let unrelated = serde_json::json!({ "theme": "dark" });
        assert!(HotkeyConfig::from_legacy(unrelated.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = HotkeyConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["toggle_input"], "Alt+2");

        let back: HotkeyConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
