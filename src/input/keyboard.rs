//! Keyboard state and keymap text

use log::debug;

use crate::compositor::SurfaceId;

/// Linux evdev code of the Escape key
pub const KEY_ESC: u32 = 1;

/// Modifier masks of the built-in keymap
pub const MOD_SHIFT: u32 = 1 << 0;
pub const MOD_CTRL: u32 = 1 << 2;
pub const MOD_ALT: u32 = 1 << 3;
pub const MOD_SUPER: u32 = 1 << 6;

/// Keyboard state
#[derive(Debug)]
pub struct Keyboard {
    /// Currently focused surface
    focus: Option<SurfaceId>,
    /// Currently pressed keys (evdev keycodes)
    pressed_keys: Vec<u32>,
    /// Modifier state
    modifiers: ModifierState,
    /// Repeat rate (characters per second)
    repeat_rate: i32,
    /// Repeat delay (milliseconds)
    repeat_delay: i32,
}

/// Keyboard modifier state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    /// Depressed modifiers (currently held down)
    pub depressed: u32,
    /// Latched modifiers (sticky, cleared on next key)
    pub latched: u32,
    /// Locked modifiers (toggled, like caps lock)
    pub locked: u32,
    /// Keyboard group/layout
    pub group: u32,
}

impl ModifierState {
    /// Shift, Ctrl, Alt and Super as currently in effect; locks are ignored
    pub fn active(&self) -> u32 {
        (self.depressed | self.latched) & (MOD_SHIFT | MOD_CTRL | MOD_ALT | MOD_SUPER)
    }
}

/// Key state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Released,
    Pressed,
}

/// Keyboard events sent to clients
#[derive(Debug, Clone, PartialEq)]
pub enum KeyboardEvent {
    /// Keyboard focus entered a surface
    Enter {
        serial: u32,
        surface: SurfaceId,
        pressed_keys: Vec<u32>,
    },
    /// Keyboard focus left a surface
    Leave { serial: u32, surface: SurfaceId },
    /// Key press or release
    Key {
        serial: u32,
        time: u32,
        key: u32,
        state: KeyState,
    },
    /// Modifier state changed
    Modifiers { serial: u32, state: ModifierState },
}

impl Keyboard {
    /// Create a new keyboard
    pub fn new(repeat_rate: i32, repeat_delay: i32) -> Self {
        Self {
            focus: None,
            pressed_keys: Vec::new(),
            modifiers: ModifierState::default(),
            repeat_rate,
            repeat_delay,
        }
    }

    /// Set keyboard focus, returning the previous focus
    pub fn set_focus(&mut self, surface: Option<SurfaceId>) -> Option<SurfaceId> {
        std::mem::replace(&mut self.focus, surface)
    }

    /// Get the currently focused surface
    pub fn focus(&self) -> Option<SurfaceId> {
        self.focus
    }

    /// Handle a key press
    pub fn key_press(&mut self, keycode: u32) -> bool {
        if !self.pressed_keys.contains(&keycode) {
            self.pressed_keys.push(keycode);
            debug!("Key pressed: {}", keycode);
            true
        } else {
            false // Key already pressed (repeat)
        }
    }

    /// Handle a key release
    pub fn key_release(&mut self, keycode: u32) -> bool {
        if let Some(idx) = self.pressed_keys.iter().position(|&k| k == keycode) {
            self.pressed_keys.remove(idx);
            debug!("Key released: {}", keycode);
            true
        } else {
            false
        }
    }

    /// Update modifier state; returns whether anything changed
    pub fn update_modifiers(&mut self, modifiers: ModifierState) -> bool {
        std::mem::replace(&mut self.modifiers, modifiers) != modifiers
    }

    /// Get current modifier state
    pub fn modifiers(&self) -> ModifierState {
        self.modifiers
    }

    /// Get currently pressed keys
    pub fn pressed_keys(&self) -> &[u32] {
        &self.pressed_keys
    }

    /// Get repeat info
    pub fn repeat_info(&self) -> (i32, i32) {
        (self.repeat_rate, self.repeat_delay)
    }

    /// A US layout keymap in XKB text form, resolved by the client's
    /// xkbcommon from its own include path
    pub fn default_keymap() -> String {
        String::from(
            r#"xkb_keymap {
    xkb_keycodes  { include "evdev+aliases(qwerty)" };
    xkb_types     { include "complete" };
    xkb_compat    { include "complete" };
    xkb_symbols   { include "pc+us+inet(evdev)" };
    xkb_geometry  { include "pc(pc105)" };
};"#,
        )
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new(25, 600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_new() {
        let keyboard = Keyboard::default();
        assert!(keyboard.focus().is_none());
        assert!(keyboard.pressed_keys().is_empty());
        assert_eq!(keyboard.repeat_info(), (25, 600));
    }

    #[test]
    fn test_key_press_release() {
        let mut keyboard = Keyboard::default();

        assert!(keyboard.key_press(30));
        assert!(keyboard.pressed_keys().contains(&30));
        // Press same key again should return false (already pressed)
        assert!(!keyboard.key_press(30));

        assert!(keyboard.key_release(30));
        assert!(!keyboard.pressed_keys().contains(&30));
        assert!(!keyboard.key_release(30));
    }

    #[test]
    fn test_focus_change() {
        let mut keyboard = Keyboard::default();
        assert_eq!(keyboard.set_focus(Some(SurfaceId(1))), None);
        assert_eq!(keyboard.set_focus(Some(SurfaceId(2))), Some(SurfaceId(1)));
        assert_eq!(keyboard.focus(), Some(SurfaceId(2)));
    }

    #[test]
    fn test_modifiers() {
        let mut keyboard = Keyboard::default();
        let mods = ModifierState {
            depressed: 1,
            latched: 0,
            locked: 2,
            group: 0,
        };
        assert!(keyboard.update_modifiers(mods));
        assert!(!keyboard.update_modifiers(mods));
        assert_eq!(keyboard.modifiers().locked, 2);
    }

    #[test]
    fn test_default_keymap_uses_includes() {
        let keymap = Keyboard::default_keymap();
        assert!(keymap.starts_with("xkb_keymap"));
        assert!(keymap.contains("include \"pc+us"));
    }
}
