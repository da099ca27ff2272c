//! Keyed player input

use std::collections::HashMap;

/// Pressed state of every logical control, decoded from one input message.
///
/// A new message replaces the previous state wholesale; keys absent from the
/// message count as released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub brake: bool,
    pub drift: bool,
}

impl InputState {
    /// Decode a raw key map. Unknown key names are ignored.
    pub fn from_keys(keys: &HashMap<String, bool>) -> Self {
        let mut state = Self::default();
        for (name, &pressed) in keys {
            if !pressed {
                continue;
            }
            match name.to_ascii_lowercase().as_str() {
                "arrowup" | "w" => state.forward = true,
                "arrowdown" | "s" => state.backward = true,
                "arrowleft" | "a" | "left" => state.left = true,
                "arrowright" | "d" | "right" => state.right = true,
                " " | "space" | "brake" => state.brake = true,
                "shift" | "drift" => state.drift = true,
                _ => {}
            }
        }
        state
    }

    /// Either throttle key is held
    pub fn throttle(&self) -> bool {
        self.forward || self.backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn known_keys_are_decoded() {
        let input = InputState::from_keys(&keys(&[
            ("ArrowUp", true),
            ("arrowleft", true),
            ("shift", true),
            (" ", true),
        ]));
        assert!(input.forward && input.left && input.drift && input.brake);
        assert!(!input.backward && !input.right);
    }

    #[test]
    fn unknown_and_released_keys_are_ignored() {
        let input = InputState::from_keys(&keys(&[("F13", true), ("arrowup", false)]));
        assert_eq!(input, InputState::default());
    }
}
