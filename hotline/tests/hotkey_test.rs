use hotline_lib::hotkey::{
    ActionId, ConfigError, HotkeyConfig, Key, KeyCombination, Modifiers, NamedKey,
};

#[test]
fn test_parse_alt_digit() {
    let combo = KeyCombination::parse("Alt+1").unwrap();
    assert_eq!(combo.modifiers(), Modifiers::ALT);
    assert_eq!(combo.key(), Key::Char('1'));
    assert_eq!(combo.virtual_key(), 0x31);
}

#[test]
fn test_parse_is_case_and_space_insensitive() {
    let inputs = ["ctrl+shift+s", "CTRL+SHIFT+S", " Ctrl + Shift + S ", "shift+control+s"];
    let expected = KeyCombination::parse("Ctrl+Shift+S").unwrap();

    for input in inputs {
        assert_eq!(KeyCombination::parse(input).unwrap(), expected, "input: {input}");
    }
}

#[test]
fn test_display_round_trips() {
    for text in ["Alt+1", "Ctrl+4", "Ctrl+Alt+Shift+Win+F12", "Alt+Space", "Shift+PageUp"] {
        let combo = KeyCombination::parse(text).unwrap();
        let again = KeyCombination::parse(&combo.to_string()).unwrap();
        assert_eq!(combo, again);
    }
}

#[test]
fn test_named_keys() {
    assert_eq!(
        KeyCombination::parse("Alt+Space").unwrap().key(),
        Key::Named(NamedKey::Space)
    );
    assert_eq!(
        KeyCombination::parse("Ctrl+F5").unwrap().key(),
        Key::Function(5)
    );
}

#[test]
fn test_modifier_only_is_rejected() {
    assert!(matches!(
        KeyCombination::parse("Ctrl+Alt"),
        Err(ConfigError::MissingKey(_))
    ));
}

#[test]
fn test_key_without_modifier_is_rejected() {
    assert!(matches!(
        KeyCombination::parse("Q"),
        Err(ConfigError::MissingModifier(_))
    ));
}

#[test]
fn test_two_keys_are_ambiguous() {
    assert!(matches!(
        KeyCombination::parse("Ctrl+A+B"),
        Err(ConfigError::AmbiguousKey { .. })
    ));
}

#[test]
fn test_malformed_inputs() {
    assert_eq!(KeyCombination::parse(""), Err(ConfigError::EmptyCombination));
    assert_eq!(KeyCombination::parse("   "), Err(ConfigError::EmptyCombination));
    assert!(matches!(
        KeyCombination::parse("Ctrl++A"),
        Err(ConfigError::InvalidFormat(_))
    ));
    assert!(matches!(
        KeyCombination::parse("Ctrl+"),
        Err(ConfigError::InvalidFormat(_))
    ));
    assert!(matches!(
        KeyCombination::parse("Ctrl+Banana"),
        Err(ConfigError::UnknownKey { .. })
    ));
}

#[test]
fn test_exact_modifier_match() {
    let combo = KeyCombination::parse("Alt+1").unwrap();
    assert!(combo.matches(Modifiers::ALT, 0x31));
    assert!(!combo.matches(Modifiers::ALT | Modifiers::SHIFT, 0x31));
    assert!(!combo.matches(Modifiers::CONTROL, 0x31));
    assert!(!combo.matches(Modifiers::ALT, 0x32));
}

#[test]
fn test_default_bindings_are_valid() {
    let table = HotkeyConfig::default().parse().unwrap();
    assert_eq!(table.len(), ActionId::ALL.len());
    assert_eq!(
        table[&ActionId::ChatWindow],
        KeyCombination::parse("Control+4").unwrap()
    );
}

#[test]
fn test_one_invalid_binding_rejects_all() {
    let config = HotkeyConfig::default().with_binding(ActionId::Screenshot, "Alt+");
    assert!(config.parse().is_err());
}

#[test]
fn test_duplicate_combination_rejected() {
    let config = HotkeyConfig::default().with_binding(ActionId::CommandPalette, "alt+1");
    match config.parse() {
        Err(ConfigError::DuplicateCombination { first, second, .. }) => {
            assert_eq!(first, ActionId::SelectionToInput);
            assert_eq!(second, ActionId::CommandPalette);
        }
        other => panic!("expected duplicate error, got {other:?}"),
    }
}

#[test]
fn test_empty_config_rejected() {
    assert_eq!(HotkeyConfig::new().parse(), Err(ConfigError::EmptyBindings));
}

#[test]
fn test_config_json_shape() {
    let config = HotkeyConfig::new()
        .with_binding(ActionId::ToggleInput, "Alt+2")
        .with_binding(ActionId::Screenshot, "Alt+4");
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "toggle_input": "Alt+2", "screenshot": "Alt+4" })
    );

    let back: HotkeyConfig = serde_json::from_value(json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_legacy_flat_keys() {
    let legacy = serde_json::json!({
        "hotkey1": "Alt+1",
        "hotkey2": "Alt+2",
        "chat_hotkey": "Ctrl+Shift+4",
        "theme": "dark"
    });
    let config = HotkeyConfig::from_legacy(legacy.as_object().unwrap()).unwrap();
    assert_eq!(config.len(), 6);
    assert_eq!(config.get(ActionId::ChatWindow), Some("Ctrl+Shift+4"));
    assert_eq!(config.get(ActionId::CommandPalette), Some("Alt+5"));
}

#[test]
fn test_action_names() {
    for action in ActionId::ALL {
        assert_eq!(action.name().parse::<ActionId>().unwrap(), action);
        assert_eq!(ActionId::from_native_id(action.native_id()), Some(action));
    }
    assert!(matches!(
        "teleport".parse::<ActionId>(),
        Err(ConfigError::UnknownAction(_))
    ));
}
