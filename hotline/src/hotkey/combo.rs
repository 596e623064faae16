//! 组合键解析
//!
//! 把 `"Ctrl+Alt+Q"` 这类人类可读的字符串解析为 [`KeyCombination`]，
//! 并提供与 Win32 虚拟键码、修饰键标志的映射
//!
//! # 规则
//!
//! - 以 `+` 分隔，忽略大小写和各段两端的空白
//! - 至少一个修饰键（Ctrl / Alt / Shift / Win）
//! - 恰好一个非修饰键
//!
//! # Examples
//!
//! ```
//! use hotline_lib::hotkey::{Key, KeyCombination, Modifiers};
//!
//! let combo = KeyCombination::parse("alt + shift + q").unwrap();
//! assert_eq!(combo.modifiers(), Modifiers::ALT | Modifiers::SHIFT);
//! assert_eq!(combo.key(), Key::Char('Q'));
//! assert_eq!(combo.to_string(), "Alt+Shift+Q");
//! ```

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// 修饰键集合
///
/// 位值与 Win32 的 `MOD_ALT` / `MOD_CONTROL` / `MOD_SHIFT` / `MOD_WIN` 一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const ALT: Self = Self(0x1);
    pub const CONTROL: Self = Self(0x2);
    pub const SHIFT: Self = Self(0x4);
    pub const WIN: Self = Self(0x8);

    /// 规范顺序，决定 `Display` 输出
    const CANONICAL: [(Modifiers, &'static str); 4] = [
        (Modifiers::CONTROL, "Ctrl"),
        (Modifiers::ALT, "Alt"),
        (Modifiers::SHIFT, "Shift"),
        (Modifiers::WIN, "Win"),
    ];

    /// 是否包含 `other` 中的全部修饰键
    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Modifiers) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Modifiers) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 作为 `RegisterHotKey` 的 `fsModifiers` 参数
    pub fn bits(self) -> u32 {
        u32::from(self.0)
    }

    /// 解析单个修饰键名称
    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "ctrl" | "control" | "ctl" => Some(Self::CONTROL),
            "alt" | "menu" | "option" => Some(Self::ALT),
            "shift" => Some(Self::SHIFT),
            "win" | "windows" | "super" | "meta" | "cmd" | "command" => Some(Self::WIN),
            _ => None,
        }
    }

    /// 从虚拟键码识别修饰键（区分左右键的键码也会归并）
    pub fn from_virtual_key(vk: u32) -> Option<Self> {
        match vk {
            0x10 | 0xA0 | 0xA1 => Some(Self::SHIFT),
            0x11 | 0xA2 | 0xA3 => Some(Self::CONTROL),
            0x12 | 0xA4 | 0xA5 => Some(Self::ALT),
            0x5B | 0x5C => Some(Self::WIN),
            _ => None,
        }
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (modifier, name) in Self::CANONICAL {
            if self.contains(modifier) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// 具名按键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamedKey {
    Space,
    Tab,
    Enter,
    Escape,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    PrintScreen,
    Pause,
}

impl NamedKey {
    const ALL: [NamedKey; 17] = [
        NamedKey::Space,
        NamedKey::Tab,
        NamedKey::Enter,
        NamedKey::Escape,
        NamedKey::Backspace,
        NamedKey::Delete,
        NamedKey::Insert,
        NamedKey::Home,
        NamedKey::End,
        NamedKey::PageUp,
        NamedKey::PageDown,
        NamedKey::Up,
        NamedKey::Down,
        NamedKey::Left,
        NamedKey::Right,
        NamedKey::PrintScreen,
        NamedKey::Pause,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::Space => "Space",
            Self::Tab => "Tab",
            Self::Enter => "Enter",
            Self::Escape => "Escape",
            Self::Backspace => "Backspace",
            Self::Delete => "Delete",
            Self::Insert => "Insert",
            Self::Home => "Home",
            Self::End => "End",
            Self::PageUp => "PageUp",
            Self::PageDown => "PageDown",
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Left => "Left",
            Self::Right => "Right",
            Self::PrintScreen => "PrintScreen",
            Self::Pause => "Pause",
        }
    }

    fn virtual_key(&self) -> u32 {
        match self {
            Self::Space => 0x20,
            Self::Tab => 0x09,
            Self::Enter => 0x0D,
            Self::Escape => 0x1B,
            Self::Backspace => 0x08,
            Self::Delete => 0x2E,
            Self::Insert => 0x2D,
            Self::Home => 0x24,
            Self::End => 0x23,
            Self::PageUp => 0x21,
            Self::PageDown => 0x22,
            Self::Up => 0x26,
            Self::Down => 0x28,
            Self::Left => 0x25,
            Self::Right => 0x27,
            Self::PrintScreen => 0x2C,
            Self::Pause => 0x13,
        }
    }

    fn from_token(lower: &str) -> Option<Self> {
        let alias = match lower {
            "esc" => Some(Self::Escape),
            "return" => Some(Self::Enter),
            "del" => Some(Self::Delete),
            "ins" => Some(Self::Insert),
            "pgup" => Some(Self::PageUp),
            "pgdn" => Some(Self::PageDown),
            "arrowup" => Some(Self::Up),
            "arrowdown" => Some(Self::Down),
            "arrowleft" => Some(Self::Left),
            "arrowright" => Some(Self::Right),
            "prtsc" | "printscr" => Some(Self::PrintScreen),
            _ => None,
        };
        alias.or_else(|| {
            Self::ALL
                .into_iter()
                .find(|key| key.name().eq_ignore_ascii_case(lower))
        })
    }
}

/// 组合键中的非修饰键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// 单字符键：字母（统一为大写）、数字或标点
    Char(char),
    /// 功能键 F1-F24
    Function(u8),
    /// 具名键
    Named(NamedKey),
}

impl Key {
    /// 解析单个按键名称，无法识别时返回 `None`
    fn from_token(token: &str) -> Option<Self> {
        let lower = token.to_ascii_lowercase();

        let mut chars = lower.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            let c = c.to_ascii_uppercase();
            return char_virtual_key(c).map(|_| Self::Char(c));
        }

        if let Some(named) = NamedKey::from_token(&lower) {
            return Some(Self::Named(named));
        }

        match lower.as_str() {
            "backquote" | "backtick" | "grave" => return Some(Self::Char('`')),
            "minus" => return Some(Self::Char('-')),
            "equal" | "equals" => return Some(Self::Char('=')),
            "comma" => return Some(Self::Char(',')),
            "period" => return Some(Self::Char('.')),
            "slash" => return Some(Self::Char('/')),
            "semicolon" => return Some(Self::Char(';')),
            _ => {}
        }

        lower
            .strip_prefix('f')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=24).contains(n))
            .map(Self::Function)
    }

    /// Win32 虚拟键码
    ///
    /// 字母和数字直接使用其 ASCII 码，标点映射到 `VK_OEM_*`
    pub fn virtual_key(&self) -> u32 {
        match self {
            // 构造时已校验过字符
            Self::Char(c) => char_virtual_key(*c).unwrap_or(0),
            Self::Function(n) => 0x70 + u32::from(*n) - 1,
            Self::Named(named) => named.virtual_key(),
        }
    }
}

fn char_virtual_key(c: char) -> Option<u32> {
    match c {
        'A'..='Z' | '0'..='9' => Some(c as u32),
        ';' => Some(0xBA),
        '=' => Some(0xBB),
        ',' => Some(0xBC),
        '-' => Some(0xBD),
        '.' => Some(0xBE),
        '/' => Some(0xBF),
        '`' => Some(0xC0),
        '[' => Some(0xDB),
        '\\' => Some(0xDC),
        ']' => Some(0xDD),
        '\'' => Some(0xDE),
        _ => None,
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{c}"),
            Self::Function(n) => write!(f, "F{n}"),
            Self::Named(named) => f.write_str(named.name()),
        }
    }
}

/// 已校验的组合键：至少一个修饰键加恰好一个非修饰键
///
/// 序列化为规范字符串形式，反序列化时重新校验
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCombination {
    modifiers: Modifiers,
    key: Key,
}

impl KeyCombination {
    /// 解析组合键字符串
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyCombination`] - 空字符串
    /// - [`ConfigError::InvalidFormat`] - 出现空段，例如 `"Alt++Q"`
    /// - [`ConfigError::UnknownKey`] - 无法识别的按键名
    /// - [`ConfigError::AmbiguousKey`] - 多于一个非修饰键
    /// - [`ConfigError::MissingKey`] - 只有修饰键
    /// - [`ConfigError::MissingModifier`] - 没有修饰键
    ///
    /// # Examples
    ///
    /// ```
    /// use hotline_lib::hotkey::{ConfigError, KeyCombination};
    ///
    /// assert!(KeyCombination::parse("Control+4").is_ok());
    /// assert!(matches!(
    ///     KeyCombination::parse("Alt"),
    ///     Err(ConfigError::MissingKey(_))
    /// ));
    /// assert!(matches!(
    ///     KeyCombination::parse("Q"),
    ///     Err(ConfigError::MissingModifier(_))
    /// ));
    /// ```
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyCombination);
        }

        let mut modifiers = Modifiers::NONE;
        let mut key: Option<Key> = None;

        for raw in trimmed.split('+') {
            let token = raw.trim();
            if token.is_empty() {
                return Err(ConfigError::InvalidFormat(text.to_string()));
            }

            if let Some(modifier) = Modifiers::from_token(token) {
                modifiers.insert(modifier);
                continue;
            }

            let parsed = Key::from_token(token).ok_or_else(|| ConfigError::UnknownKey {
                combo: text.to_string(),
                token: token.to_string(),
            })?;

            if let Some(first) = key {
                return Err(ConfigError::AmbiguousKey {
                    combo: text.to_string(),
                    first: first.to_string(),
                    second: parsed.to_string(),
                });
            }
            key = Some(parsed);
        }

        let key = key.ok_or_else(|| ConfigError::MissingKey(text.to_string()))?;
        if modifiers.is_empty() {
            return Err(ConfigError::MissingModifier(text.to_string()));
        }

        Ok(Self { modifiers, key })
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// 非修饰键的虚拟键码
    pub fn virtual_key(&self) -> u32 {
        self.key.virtual_key()
    }

    /// 当前按下的修饰键与按键是否精确匹配此组合
    pub fn matches(&self, held: Modifiers, vk: u32) -> bool {
        self.modifiers == held && self.virtual_key() == vk
    }
}

impl fmt::Display for KeyCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.modifiers, self.key)
    }
}

impl FromStr for KeyCombination {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyCombination {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyCombination> for String {
    fn from(combo: KeyCombination) -> Self {
        combo.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_and_whitespace_insensitive() {
        let a = KeyCombination::parse("CTRL+alt+q").unwrap();
        let b = KeyCombination::parse(" Control + Alt + Q ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Ctrl+Alt+Q");
    }

    #[test]
    fn test_canonical_modifier_order() {
        let combo = KeyCombination::parse("Win+Shift+Alt+Ctrl+F5").unwrap();
        assert_eq!(combo.to_string(), "Ctrl+Alt+Shift+Win+F5");
    }

    #[test]
    fn test_modifier_bits_match_win32() {
        let combo = KeyCombination::parse("Ctrl+Alt+Shift+Win+A").unwrap();
        assert_eq!(combo.modifiers().bits(), 0x1 | 0x2 | 0x4 | 0x8);
    }

    #[test]
    fn test_virtual_keys() {
        assert_eq!(KeyCombination::parse("Alt+1").unwrap().virtual_key(), 0x31);
        assert_eq!(KeyCombination::parse("Alt+q").unwrap().virtual_key(), 0x51);
        assert_eq!(KeyCombination::parse("Alt+F1").unwrap().virtual_key(), 0x70);
        assert_eq!(KeyCombination::parse("Alt+F24").unwrap().virtual_key(), 0x87);
        assert_eq!(KeyCombination::parse("Alt+Space").unwrap().virtual_key(), 0x20);
        assert_eq!(KeyCombination::parse("Alt+Esc").unwrap().virtual_key(), 0x1B);
        assert_eq!(KeyCombination::parse("Alt+`").unwrap().virtual_key(), 0xC0);
        assert_eq!(
            KeyCombination::parse("Alt+Backquote").unwrap().virtual_key(),
            0xC0
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(KeyCombination::parse("   "), Err(ConfigError::EmptyCombination));
        assert!(matches!(
            KeyCombination::parse("Alt++Q"),
            Err(ConfigError::InvalidFormat(_))
        ));
        assert!(matches!(
            KeyCombination::parse("Alt+Q+"),
            Err(ConfigError::InvalidFormat(_))
        ));
        assert!(matches!(
            KeyCombination::parse("Ctrl+Shift"),
            Err(ConfigError::MissingKey(_))
        ));
        assert!(matches!(
            KeyCombination::parse("F5"),
            Err(ConfigError::MissingModifier(_))
        ));
        assert!(matches!(
            KeyCombination::parse("Alt+F25"),
            Err(ConfigError::UnknownKey { .. })
        ));
        assert!(matches!(
            KeyCombination::parse("Alt+Q+W"),
            Err(ConfigError::AmbiguousKey { .. })
        ));
    }

    #[test]
    fn test_duplicate_modifier_is_idempotent() {
        let combo = KeyCombination::parse("Alt+alt+Q").unwrap();
        assert_eq!(combo.to_string(), "Alt+Q");
    }

    #[test]
    fn test_matches_is_exact() {
        let combo = KeyCombination::parse("Alt+Q").unwrap();
        assert!(combo.matches(Modifiers::ALT, 0x51));
        assert!(!combo.matches(Modifiers::ALT | Modifiers::CONTROL, 0x51));
        assert!(!combo.matches(Modifiers::ALT, 0x57));
    }

    #[test]
    fn test_modifier_virtual_keys() {
        assert_eq!(Modifiers::from_virtual_key(0xA4), Some(Modifiers::ALT));
        assert_eq!(Modifiers::from_virtual_key(0xA3), Some(Modifiers::CONTROL));
        assert_eq!(Modifiers::from_virtual_key(0x5C), Some(Modifiers::WIN));
        assert_eq!(Modifiers::from_virtual_key(0x51), None);
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let combo = KeyCombination::parse("shift+ctrl+k").unwrap();
        let json = serde_json::to_string(&combo).unwrap();
        assert_eq!(json, "\"Ctrl+Shift+K\"");
        let back: KeyCombination = serde_json::from_str(&json).unwrap();
        assert_eq!(back, combo);
        assert!(serde_json::from_str::<KeyCombination>("\"K\"").is_err());
    }
}
