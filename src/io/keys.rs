use enigo::{Direction, Enigo, Key, Keyboard as _, Settings};
use thiserror::Error;
use tracing::{info, trace};

/// Errors raised while injecting a key.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error("failed to initialize input backend: {0}")]
    Init(String),

    #[error("key injection failed: {0}")]
    Io(String),
}

/// Capability to press a key on behalf of a skill.
pub trait KeySender: Send {
    fn send_key(&mut self, key: &str) -> Result<(), KeyError>;
}

/// A parsed key combination such as `ctrl+shift+f1`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChord {
    pub modifiers: Vec<Key>,
    pub key: Key,
}

/// Parse the trigger syntax used by profiles: `+`-separated modifiers
/// (`ctrl`, `shift`, `alt`, `meta`) followed by one key, which is either a
/// single character or a name (`space`, `enter`, `tab`, `esc`, `f1`..`f12`, ...).
pub fn parse_key(spec: &str) -> Result<KeyChord, KeyError> {
    let parts: Vec<&str> = spec.split('+').map(str::trim).collect();
    let Some((last, mods)) = parts.split_last() else {
        return Err(KeyError::InvalidKey(spec.to_string()));
    };
    if last.is_empty() {
        return Err(KeyError::InvalidKey(spec.to_string()));
    }

    let modifiers = mods
        .iter()
        .map(|m| match m.to_lowercase().as_str() {
            "ctrl" | "control" => Ok(Key::Control),
            "shift" => Ok(Key::Shift),
            "alt" => Ok(Key::Alt),
            "meta" | "win" | "cmd" => Ok(Key::Meta),
            _ => Err(KeyError::InvalidKey(spec.to_string())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let key = named_key(last).ok_or_else(|| KeyError::InvalidKey(spec.to_string()))?;
    Ok(KeyChord { modifiers, key })
}

fn named_key(name: &str) -> Option<Key> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(Key::Unicode(c.to_ascii_lowercase()));
    }
    let key = match name.to_lowercase().as_str() {
        "space" => Key::Space,
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => return None,
    };
    Some(key)
}

/// Sends keys through Enigo, or only logs them in dry-run mode.
pub struct EnigoKeySender {
    dry_run: bool,
    enigo: Option<Enigo>,
}

impl EnigoKeySender {
    /// Create a new sender.
    /// - dry_run: when true, only logs instead of simulating real input.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            enigo: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn ensure_enigo(&mut self) -> Result<&mut Enigo, KeyError> {
        if self.enigo.is_none() {
            trace!(target: "rotabot::keys", "Initializing Enigo");
            let enigo =
                Enigo::new(&Settings::default()).map_err(|e| KeyError::Init(e.to_string()))?;
            self.enigo = Some(enigo);
        }
        self.enigo
            .as_mut()
            .ok_or_else(|| KeyError::Init("Enigo unavailable".to_string()))
    }
}

impl KeySender for EnigoKeySender {
    fn send_key(&mut self, key: &str) -> Result<(), KeyError> {
        let chord = parse_key(key)?;
        if self.dry_run {
            info!(target: "rotabot::keys", %key, "DRY-RUN send_key");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "rotabot::keys", %key, "send_key");
        let io = |e: enigo::InputError| KeyError::Io(e.to_string());

        for m in &chord.modifiers {
            enigo.key(*m, Direction::Press).map_err(io)?;
        }
        let clicked = enigo.key(chord.key, Direction::Click).map_err(io);
        // Release modifiers even when the click failed.
        for m in chord.modifiers.iter().rev() {
            enigo.key(*m, Direction::Release).map_err(io)?;
        }
        clicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_characters_and_names() {
        assert_eq!(parse_key("1").unwrap().key, Key::Unicode('1'));
        assert_eq!(parse_key("Q").unwrap().key, Key::Unicode('q'));
        assert_eq!(parse_key("F5").unwrap().key, Key::F5);
        assert_eq!(parse_key("space").unwrap().key, Key::Space);
    }

    #[test]
    fn parses_modifier_chords() {
        let chord = parse_key("ctrl + shift + 3").unwrap();
        assert_eq!(chord.modifiers, vec![Key::Control, Key::Shift]);
        assert_eq!(chord.key, Key::Unicode('3'));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_key("").is_err());
        assert!(parse_key("hyper+1").is_err());
        assert!(parse_key("ctrl+").is_err());
        assert!(parse_key("nosuchkey").is_err());
    }

    #[test]
    fn dry_run_validates_but_does_not_inject() {
        let mut sender = EnigoKeySender::new(true);
        assert!(sender.is_dry_run());
        assert!(sender.send_key("alt+f4").is_ok());
        assert!(matches!(sender.send_key("???"), Err(KeyError::InvalidKey(_))));
    }
}
