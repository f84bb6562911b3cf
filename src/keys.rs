use crate::error::SkillError;

/// Modifier bitmask values per the CDP `Input.dispatchKeyEvent` contract.
const ALT: u8 = 1;
const CTRL: u8 = 2;
const META: u8 = 4;
const SHIFT: u8 = 8;

const MODIFIERS: &[(&str, u8, &str)] = &[
    ("Alt", ALT, "AltLeft"),
    ("Control", CTRL, "ControlLeft"),
    ("Meta", META, "MetaLeft"),
    ("Shift", SHIFT, "ShiftLeft"),
];

/// Named non-modifier keys the `press` step accepts, beyond single
/// characters and digits.
const NAMED_KEYS: &[&str] = &[
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12",
    "ArrowUp", "ArrowDown", "ArrowLeft", "ArrowRight", "Home", "End", "PageUp", "PageDown",
    "Backspace", "Delete", "Insert", "Tab", "Enter", "Escape", "Space",
    "Minus", "Equal", "BracketLeft", "BracketRight", "Backslash", "Semicolon", "Quote",
    "Backquote", "Comma", "Period", "Slash", "CapsLock", "NumLock", "ContextMenu",
];

fn is_modifier(part: &str) -> bool {
    MODIFIERS.iter().any(|(name, _, _)| *name == part)
}

fn is_known_key(part: &str) -> bool {
    if part.len() == 1 {
        let c = part.chars().next().unwrap_or(' ');
        return c.is_ascii_alphanumeric();
    }
    NAMED_KEYS.contains(&part)
}

/// A parsed `"Control+Shift+P"`-style combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    pub modifiers: u8,
    pub key: String,
}

/// Parse and validate a key combination.
///
/// # Errors
///
/// Returns a `StepValidationError` for unknown parts, duplicate modifiers,
/// or a combination with more than one primary key.
pub fn parse_combo(input: &str) -> Result<KeyCombo, SkillError> {
    let mut modifiers: u8 = 0;
    let mut primary: Option<&str> = None;

    for part in input.split('+') {
        if let Some((_, bit, _)) = MODIFIERS.iter().find(|(name, _, _)| *name == part) {
            if modifiers & bit != 0 {
                return Err(SkillError::step_validation(format!(
                    "duplicate modifier {part:?} in {input:?}"
                )));
            }
            modifiers |= bit;
        } else if is_known_key(part) {
            if let Some(existing) = primary {
                return Err(SkillError::step_validation(format!(
                    "key combination {input:?} has two primary keys: {existing:?} and {part:?}"
                )));
            }
            primary = Some(part);
        } else {
            return Err(SkillError::step_validation(format!(
                "unknown key {part:?} in {input:?}"
            )));
        }
    }

    // A bare modifier chord ("Shift") presses that modifier as the key.
    let key = primary
        .map(ToOwned::to_owned)
        .or_else(|| input.split('+').next_back().map(ToOwned::to_owned))
        .filter(|k| !k.is_empty())
        .ok_or_else(|| SkillError::step_validation("empty key combination"))?;

    Ok(KeyCombo { modifiers, key })
}

/// The CDP `key` field for a key name.
#[must_use]
pub fn cdp_key(key: &str) -> &str {
    match key {
        "Enter" => "\r",
        "Tab" => "\t",
        "Space" => " ",
        "Minus" => "-",
        "Equal" => "=",
        "BracketLeft" => "[",
        "BracketRight" => "]",
        "Backslash" => "\\",
        "Semicolon" => ";",
        "Quote" => "'",
        "Backquote" => "`",
        "Comma" => ",",
        "Period" => ".",
        "Slash" => "/",
        other => other,
    }
}

/// The CDP `code` field for a key name.
#[must_use]
pub fn cdp_code(key: &str) -> String {
    if key.len() == 1 {
        let c = key.chars().next().unwrap_or(' ');
        if c.is_ascii_alphabetic() {
            return format!("Key{}", c.to_ascii_uppercase());
        }
        if c.is_ascii_digit() {
            return format!("Digit{c}");
        }
    }
    match key {
        "Alt" => "AltLeft".to_owned(),
        "Control" => "ControlLeft".to_owned(),
        "Meta" => "MetaLeft".to_owned(),
        "Shift" => "ShiftLeft".to_owned(),
        other => other.to_owned(),
    }
}

/// Windows virtual-key code, needed for chords like Control+A to register
/// as editing commands rather than plain text.
#[must_use]
pub fn windows_vk(key: &str) -> Option<u32> {
    if key.len() == 1 {
        let c = key.chars().next().unwrap_or(' ').to_ascii_uppercase();
        if c.is_ascii_alphanumeric() {
            return Some(u32::from(c));
        }
    }
    match key {
        "Enter" => Some(13),
        "Tab" => Some(9),
        "Escape" => Some(27),
        "Backspace" => Some(8),
        "Delete" => Some(46),
        "Space" => Some(32),
        "ArrowLeft" => Some(37),
        "ArrowUp" => Some(38),
        "ArrowRight" => Some(39),
        "ArrowDown" => Some(40),
        "Home" => Some(36),
        "End" => Some(35),
        "PageUp" => Some(33),
        "PageDown" => Some(34),
        _ => None,
    }
}

/// The modifier press/release order: (bitmask, CDP key, CDP code).
#[must_use]
pub fn modifier_sequence(modifiers: u8) -> Vec<(&'static str, &'static str)> {
    MODIFIERS
        .iter()
        .filter(|(_, bit, _)| modifiers & bit != 0)
        .map(|(name, _, code)| (*name, *code))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_key() {
        let combo = parse_combo("Enter").unwrap();
        assert_eq!(combo.modifiers, 0);
        assert_eq!(combo.key, "Enter");
    }

    #[test]
    fn chord_with_modifiers() {
        let combo = parse_combo("Control+Shift+p").unwrap();
        assert_eq!(combo.modifiers, CTRL | SHIFT);
        assert_eq!(combo.key, "p");
    }

    #[test]
    fn duplicate_modifier_rejected() {
        let err = parse_combo("Control+Control+a").unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn two_primary_keys_rejected() {
        let err = parse_combo("a+b").unwrap_err();
        assert!(err.message.contains("two primary keys"));
    }

    #[test]
    fn unknown_key_rejected() {
        let err = parse_combo("Hyper+x").unwrap_err();
        assert_eq!(err.type_name(), "StepValidationError");
    }

    #[test]
    fn bare_modifier_is_its_own_key() {
        let combo = parse_combo("Shift").unwrap();
        assert_eq!(combo.key, "Shift");
        assert_eq!(combo.modifiers, SHIFT);
    }

    #[test]
    fn cdp_key_mappings() {
        assert_eq!(cdp_key("Enter"), "\r");
        assert_eq!(cdp_key("Space"), " ");
        assert_eq!(cdp_key("Comma"), ",");
        assert_eq!(cdp_key("ArrowDown"), "ArrowDown");
        assert_eq!(cdp_key("a"), "a");
    }

    #[test]
    fn cdp_code_mappings() {
        assert_eq!(cdp_code("a"), "KeyA");
        assert_eq!(cdp_code("7"), "Digit7");
        assert_eq!(cdp_code("Control"), "ControlLeft");
        assert_eq!(cdp_code("PageDown"), "PageDown");
    }

    #[test]
    fn vk_codes_for_editing_chords() {
        assert_eq!(windows_vk("a"), Some(65));
        assert_eq!(windows_vk("Enter"), Some(13));
        assert_eq!(windows_vk("F5"), None);
    }

    #[test]
    fn modifier_sequence_order() {
        let seq = modifier_sequence(CTRL | SHIFT);
        assert_eq!(seq, vec![("Control", "ControlLeft"), ("Shift", "ShiftLeft")]);
    }
}
