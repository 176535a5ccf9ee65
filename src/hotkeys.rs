use crate::errors::AppError;
use serde::Serialize;
use std::fmt;

/// Modifier flags in canonical display order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Modifiers {
    pub cmd_or_ctrl: bool,
    pub cmd: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub super_key: bool,
}

impl Modifiers {
    fn any(&self) -> bool {
        self.cmd_or_ctrl || self.cmd || self.ctrl || self.alt || self.shift || self.super_key
    }
}

/// The single main key of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MainKey {
    /// A-Z, stored uppercase.
    Letter(char),
    /// 0-9.
    Digit(char),
    /// F1-F24.
    Function(u8),
    /// Space, Tab, Enter, Escape, arrows, navigation and editing keys.
    Named(&'static str),
    /// The macOS globe/function key. Must stand alone.
    Fn,
}

const NAMED_KEYS: [&str; 15] = [
    "Space", "Tab", "Enter", "Escape", "Up", "Down", "Left", "Right", "Home", "End", "PageUp",
    "PageDown", "Insert", "Delete", "Backspace",
];

/// Parsed form of a `Mod+Mod+...+Key` binding string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotkeyBinding {
    pub mods: Modifiers,
    pub key: MainKey,
}

impl HotkeyBinding {
    pub fn is_fn_only(&self) -> bool {
        self.key == MainKey::Fn
    }

    /// Accelerator string for the global-shortcut plugin. `Fn` bindings never
    /// go through the plugin; callers route them to the flags-changed monitor.
    pub fn plugin_accelerator(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.mods.cmd_or_ctrl {
            parts.push("CommandOrControl".to_string());
        }
        if self.mods.cmd {
            parts.push("Command".to_string());
        }
        if self.mods.ctrl {
            parts.push("Control".to_string());
        }
        if self.mods.alt {
            parts.push("Alt".to_string());
        }
        if self.mods.shift {
            parts.push("Shift".to_string());
        }
        if self.mods.super_key {
            parts.push("Super".to_string());
        }
        parts.push(key_token(&self.key));
        parts.join("+")
    }
}

impl fmt::Display for HotkeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.mods.cmd_or_ctrl {
            parts.push("CmdOrCtrl".to_string());
        }
        if self.mods.cmd {
            parts.push("Cmd".to_string());
        }
        if self.mods.ctrl {
            parts.push("Ctrl".to_string());
        }
        if self.mods.alt {
            parts.push("Alt".to_string());
        }
        if self.mods.shift {
            parts.push("Shift".to_string());
        }
        if self.mods.super_key {
            parts.push("Super".to_string());
        }
        parts.push(key_token(&self.key));
        write!(f, "{}", parts.join("+"))
    }
}

fn key_token(key: &MainKey) -> String {
    match key {
        MainKey::Letter(c) => c.to_string(),
        MainKey::Digit(c) => c.to_string(),
        MainKey::Function(n) => format!("F{}", n),
        MainKey::Named(name) => (*name).to_string(),
        MainKey::Fn => "Fn".to_string(),
    }
}

fn parse_modifier(token: &str) -> Option<&'static str> {
    match token.to_ascii_lowercase().as_str() {
        "cmdorctrl" | "commandorcontrol" => Some("CmdOrCtrl"),
        "cmd" | "command" => Some("Cmd"),
        "ctrl" | "control" => Some("Ctrl"),
        "alt" | "option" => Some("Alt"),
        "shift" => Some("Shift"),
        "super" | "meta" => Some("Super"),
        _ => None,
    }
}

fn parse_main_key(token: &str) -> Option<MainKey> {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return Some(MainKey::Letter(c.to_ascii_uppercase()));
        }
        if c.is_ascii_digit() {
            return Some(MainKey::Digit(c));
        }
        return None;
    }

    if token.eq_ignore_ascii_case("fn") {
        return Some(MainKey::Fn);
    }

    let lowered = token.to_ascii_lowercase();
    if let Some(rest) = lowered.strip_prefix('f') {
        if let Ok(n) = rest.parse::<u8>() {
            if (1..=24).contains(&n) {
                return Some(MainKey::Function(n));
            }
        }
    }

    for &name in NAMED_KEYS.iter() {
        if token.eq_ignore_ascii_case(name) {
            return Some(MainKey::Named(name));
        }
    }
    // Arrow aliases used by some frontends.
    match lowered.as_str() {
        "arrowup" => Some(MainKey::Named("Up")),
        "arrowdown" => Some(MainKey::Named("Down")),
        "arrowleft" => Some(MainKey::Named("Left")),
        "arrowright" => Some(MainKey::Named("Right")),
        _ => None,
    }
}

/// Parse a binding string. Canonicalization is idempotent:
/// `parse(display(b)) == b` for every binding that parses.
pub fn parse_binding(raw: &str) -> Result<HotkeyBinding, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::HotkeyInvalid("hotkey cannot be empty".to_string()));
    }

    let tokens: Vec<&str> = raw.split('+').map(str::trim).collect();
    let mut mods = Modifiers::default();
    let mut main: Option<MainKey> = None;

    for token in &tokens {
        if token.is_empty() {
            return Err(AppError::HotkeyInvalid(
                "empty token in hotkey string".to_string(),
            ));
        }
        if let Some(canonical) = parse_modifier(token) {
            match canonical {
                "CmdOrCtrl" => mods.cmd_or_ctrl = true,
                "Cmd" => mods.cmd = true,
                "Ctrl" => mods.ctrl = true,
                "Alt" => mods.alt = true,
                "Shift" => mods.shift = true,
                "Super" => mods.super_key = true,
                _ => unreachable!(),
            }
            continue;
        }
        let Some(key) = parse_main_key(token) else {
            return Err(AppError::HotkeyInvalid(format!(
                "unrecognized key token '{}'",
                token
            )));
        };
        if main.is_some() {
            return Err(AppError::HotkeyInvalid(
                "hotkey has more than one main key".to_string(),
            ));
        }
        main = Some(key);
    }

    let Some(key) = main else {
        return Err(AppError::HotkeyInvalid(
            "hotkey is missing a main key".to_string(),
        ));
    };

    if mods.cmd_or_ctrl && (mods.cmd || mods.ctrl) {
        return Err(AppError::HotkeyInvalid(
            "CmdOrCtrl cannot be combined with Cmd or Ctrl".to_string(),
        ));
    }
    if key == MainKey::Fn && mods.any() {
        return Err(AppError::HotkeyInvalid(
            "Fn must stand alone, without modifiers".to_string(),
        ));
    }

    Ok(HotkeyBinding { mods, key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers_and_letter() {
        let binding = parse_binding("CmdOrCtrl+Shift+D").unwrap();
        assert!(binding.mods.cmd_or_ctrl);
        assert!(binding.mods.shift);
        assert_eq!(binding.key, MainKey::Letter('D'));
    }

    #[test]
    fn aliases_are_case_insensitive() {
        let binding = parse_binding("control+OPTION+space").unwrap();
        assert!(binding.mods.ctrl);
        assert!(binding.mods.alt);
        assert_eq!(binding.key, MainKey::Named("Space"));
        assert_eq!(binding.to_string(), "Ctrl+Alt+Space");
    }

    #[test]
    fn display_order_is_canonical() {
        let binding = parse_binding("shift+super+alt+F9").unwrap();
        assert_eq!(binding.to_string(), "Alt+Shift+Super+F9");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for raw in [
            "CmdOrCtrl+Shift+D",
            "ctrl+alt+Delete",
            "meta+Z",
            "Fn",
            "Shift+F12",
            "Cmd+Up",
            "Alt+3",
            "command+option+shift+Backspace",
        ] {
            let binding = parse_binding(raw).unwrap();
            let reparsed = parse_binding(&binding.to_string()).unwrap();
            assert_eq!(binding, reparsed, "raw: {}", raw);
        }
    }

    #[test]
    fn fn_stands_alone() {
        let binding = parse_binding("Fn").unwrap();
        assert!(binding.is_fn_only());
        assert!(matches!(
            parse_binding("Shift+Fn"),
            Err(AppError::HotkeyInvalid(_))
        ));
    }

    #[test]
    fn rejects_empty_and_dangling_tokens() {
        assert!(matches!(parse_binding(""), Err(AppError::HotkeyInvalid(_))));
        assert!(matches!(
            parse_binding("Ctrl++D"),
            Err(AppError::HotkeyInvalid(_))
        ));
        assert!(matches!(
            parse_binding("Ctrl+"),
            Err(AppError::HotkeyInvalid(_))
        ));
    }

    #[test]
    fn rejects_two_main_keys() {
        assert!(matches!(
            parse_binding("Ctrl+A+B"),
            Err(AppError::HotkeyInvalid(_))
        ));
    }

    #[test]
    fn rejects_cmd_or_ctrl_with_explicit_cmd() {
        assert!(matches!(
            parse_binding("CmdOrCtrl+Cmd+D"),
            Err(AppError::HotkeyInvalid(_))
        ));
        assert!(matches!(
            parse_binding("CmdOrCtrl+Ctrl+D"),
            Err(AppError::HotkeyInvalid(_))
        ));
    }

    #[test]
    fn rejects_modifier_only_strings() {
        assert!(matches!(
            parse_binding("Ctrl+Shift"),
            Err(AppError::HotkeyInvalid(_))
        ));
    }

    #[test]
    fn function_keys_cover_f1_to_f24() {
        assert_eq!(parse_binding("F1").unwrap().key, MainKey::Function(1));
        assert_eq!(parse_binding("f24").unwrap().key, MainKey::Function(24));
        assert!(parse_binding("F25").is_err());
        assert!(parse_binding("F0").is_err());
    }

    #[test]
    fn plugin_accelerator_expands_aliases() {
        let binding = parse_binding("CmdOrCtrl+Shift+Space").unwrap();
        assert_eq!(binding.plugin_accelerator(), "CommandOrControl+Shift+Space");
    }

    #[test]
    fn arrow_aliases_normalize() {
        let binding = parse_binding("Ctrl+ArrowUp").unwrap();
        assert_eq!(binding.to_string(), "Ctrl+Up");
    }
}
