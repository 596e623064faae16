//! 按键状态跟踪
//!
//! 低级钩子只能看到单个按键事件，需要自行维护修饰键状态并匹配组合

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::hotkey::{ActionId, BindingTable, KeyCombination, Modifiers};

/// 修饰键状态与组合匹配
///
/// 按下触发；按住产生的自动重复事件被忽略；同一组合在去抖窗口内只触发一次
#[derive(Debug)]
pub struct KeyStateTracker {
    bindings: Vec<(KeyCombination, ActionId)>,
    held_modifiers: HashSet<u32>,
    pressed: HashSet<u32>,
    last_fired: HashMap<ActionId, Instant>,
    debounce: Duration,
}

impl KeyStateTracker {
    pub fn new(bindings: &BindingTable, debounce: Duration) -> Self {
        Self {
            bindings: bindings
                .iter()
                .map(|(action, combo)| (*combo, *action))
                .collect(),
            held_modifiers: HashSet::new(),
            pressed: HashSet::new(),
            last_fired: HashMap::new(),
            debounce,
        }
    }

    /// 当前按住的修饰键
    pub fn held(&self) -> Modifiers {
        self.held_modifiers
            .iter()
            .filter_map(|vk| Modifiers::from_virtual_key(*vk))
            .fold(Modifiers::NONE, |acc, m| acc | m)
    }

    /// 处理按下事件，匹配成功时返回动作
    pub fn key_down(&mut self, vk: u32, now: Instant) -> Option<ActionId> {
        if Modifiers::from_virtual_key(vk).is_some() {
            self.held_modifiers.insert(vk);
            return None;
        }

        if !self.pressed.insert(vk) {
            return None;
        }

        let held = self.held();
        let action = self
            .bindings
            .iter()
            .find(|(combo, _)| combo.matches(held, vk))
            .map(|(_, action)| *action)?;

        if let Some(last) = self.last_fired.get(&action) {
            if now.saturating_duration_since(*last) < self.debounce {
                tracing::debug!(action = %action, "Hotkey press suppressed by debounce");
                return None;
            }
        }

        self.last_fired.insert(action, now);
        Some(action)
    }

    pub fn key_up(&mut self, vk: u32) {
        if Modifiers::from_virtual_key(vk).is_some() {
            self.held_modifiers.remove(&vk);
        } else {
            self.pressed.remove(&vk);
        }
    }
}
