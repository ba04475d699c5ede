//! Compositor configuration
//!
//! Flat option structs with defaults, optionally overridden from `WINLAND_*`
//! environment variables.

use std::time::Duration;

use crate::compositor::OutputMode;
use crate::input::{MOD_ALT, MOD_SHIFT, MOD_SUPER};
use crate::layout::{Direction, LayoutCommand, LayoutPolicy, SplitAxis};

// evdev codes used by the default bindings
const KEY_1: u32 = 2;
const KEY_TAB: u32 = 15;
const KEY_Q: u32 = 16;
const KEY_E: u32 = 18;
const KEY_F: u32 = 33;
const KEY_H: u32 = 35;
const KEY_J: u32 = 36;
const KEY_K: u32 = 37;
const KEY_L: u32 = 38;
const KEY_V: u32 = 47;
const KEY_B: u32 = 48;
const KEY_SPACE: u32 = 57;
const KEY_UP: u32 = 103;
const KEY_LEFT: u32 = 105;
const KEY_RIGHT: u32 = 106;
const KEY_DOWN: u32 = 108;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// The virtual output created at startup
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub name: String,
    pub width: i32,
    pub height: i32,
    /// Refresh rate in mHz
    pub refresh_mhz: i32,
    pub scale: i32,
    /// Physical size in millimeters
    pub physical_size: (i32, i32),
}

impl OutputConfig {
    pub fn mode(&self) -> OutputMode {
        OutputMode {
            width: self.width,
            height: self.height,
            refresh: self.refresh_mhz,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: "HEADLESS-1".to_string(),
            width: 1920,
            height: 1080,
            refresh_mhz: 60_000,
            scale: 1,
            physical_size: (527, 296),
        }
    }
}

/// Tiling layout options, handed to the layout engine at construction
#[derive(Debug, Clone, PartialEq)]
pub struct TilingOptions {
    /// Outer gap around the usable area
    pub gap_size: i32,
    /// Space reserved at the top for a bar
    pub bar_height: i32,
    pub border_width: i32,
    pub border_color_focused: u32,
    pub border_color_unfocused: u32,
    pub border_color_urgent: u32,
    pub default_layout: LayoutPolicy,
    pub workspace_count: usize,
    /// Height of title strips in stacked and tabbed layouts
    pub title_height: i32,
    pub default_split: SplitAxis,
}

impl Default for TilingOptions {
    fn default() -> Self {
        Self {
            gap_size: 4,
            bar_height: 30,
            border_width: 2,
            border_color_focused: 0xFF4C7899,
            border_color_unfocused: 0xFF333333,
            border_color_urgent: 0xFFFF0000,
            default_layout: LayoutPolicy::Tiling,
            workspace_count: 10,
            title_height: 20,
            default_split: SplitAxis::Vertical,
        }
    }
}

/// What a compositor shortcut does
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindingAction {
    Layout(LayoutCommand),
    /// Ask the focused window to close
    CloseFocused,
    /// Stop the compositor
    Quit,
}

/// A key combination handled by the compositor instead of the client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyBinding {
    /// Exact set of Shift/Ctrl/Alt/Super that must be held
    pub modifiers: u32,
    /// evdev keycode
    pub key: u32,
    pub action: BindingAction,
}

impl KeyBinding {
    pub const fn new(modifiers: u32, key: u32, action: BindingAction) -> Self {
        Self {
            modifiers,
            key,
            action,
        }
    }

    /// Super-based defaults; workspaces beyond ten get no number key
    pub fn defaults(workspace_count: usize) -> Vec<KeyBinding> {
        use BindingAction::{CloseFocused, Layout, Quit};

        let mut bindings = vec![
            KeyBinding::new(MOD_SUPER, KEY_LEFT, Layout(LayoutCommand::Focus(Direction::Left))),
            KeyBinding::new(MOD_SUPER, KEY_RIGHT, Layout(LayoutCommand::Focus(Direction::Right))),
            KeyBinding::new(MOD_SUPER, KEY_UP, Layout(LayoutCommand::Focus(Direction::Up))),
            KeyBinding::new(MOD_SUPER, KEY_DOWN, Layout(LayoutCommand::Focus(Direction::Down))),
            KeyBinding::new(MOD_ALT, KEY_TAB, Layout(LayoutCommand::FocusNext)),
            KeyBinding::new(MOD_ALT | MOD_SHIFT, KEY_TAB, Layout(LayoutCommand::FocusPrev)),
            KeyBinding::new(MOD_SUPER, KEY_J, Layout(LayoutCommand::SwapWithNext)),
            KeyBinding::new(MOD_SUPER, KEY_K, Layout(LayoutCommand::SwapWithPrev)),
            KeyBinding::new(MOD_SUPER, KEY_H, Layout(LayoutCommand::DecreaseSplitRatio)),
            KeyBinding::new(MOD_SUPER, KEY_L, Layout(LayoutCommand::IncreaseSplitRatio)),
            KeyBinding::new(MOD_SUPER, KEY_SPACE, Layout(LayoutCommand::NextLayout)),
            KeyBinding::new(MOD_SUPER | MOD_SHIFT, KEY_SPACE, Layout(LayoutCommand::PrevLayout)),
            KeyBinding::new(MOD_SUPER, KEY_F, Layout(LayoutCommand::ToggleFullscreen)),
            KeyBinding::new(MOD_SUPER | MOD_SHIFT, KEY_F, Layout(LayoutCommand::ToggleFloating)),
            KeyBinding::new(MOD_SUPER, KEY_V, Layout(LayoutCommand::Split(SplitAxis::Vertical))),
            KeyBinding::new(MOD_SUPER, KEY_B, Layout(LayoutCommand::Split(SplitAxis::Horizontal))),
            KeyBinding::new(MOD_SUPER, KEY_Q, CloseFocused),
            KeyBinding::new(MOD_SUPER | MOD_SHIFT, KEY_E, Quit),
        ];
        // KEY_1..KEY_9 then KEY_0 are consecutive codes
        for index in 0..workspace_count.min(10) {
            let key = KEY_1 + index as u32;
            bindings.push(KeyBinding::new(MOD_SUPER, key, Layout(LayoutCommand::SwitchWorkspace(index))));
            bindings.push(KeyBinding::new(
                MOD_SUPER | MOD_SHIFT,
                key,
                Layout(LayoutCommand::MoveToWorkspace(index)),
            ));
        }
        bindings
    }
}

/// Top-level compositor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CompositorConfig {
    /// Explicit socket name; `None` picks the first free `wayland-N`
    pub socket_name: Option<String>,
    pub seat_name: String,
    pub output: OutputConfig,
    pub tiling: TilingOptions,
    /// Key repeat rate (characters per second)
    pub repeat_rate: i32,
    /// Key repeat delay (milliseconds)
    pub repeat_delay: i32,
    /// Minimum time between frames; zero disables throttling
    pub frame_interval: Duration,
    /// Compositor shortcuts, consumed before clients see the key
    pub bindings: Vec<KeyBinding>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            socket_name: None,
            seat_name: "seat0".to_string(),
            output: OutputConfig::default(),
            tiling: TilingOptions::default(),
            repeat_rate: 25,
            repeat_delay: 600,
            frame_interval: Duration::from_micros(16_666),
            bindings: KeyBinding::defaults(TilingOptions::default().workspace_count),
        }
    }
}

impl CompositorConfig {
    /// Action bound to `key` with exactly the `active` modifiers held
    pub fn binding(&self, active: u32, key: u32) -> Option<BindingAction> {
        self.bindings
            .iter()
            .find(|b| b.key == key && b.modifiers == active)
            .map(|b| b.action)
    }

    /// Defaults overridden from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("WINLAND_SOCKET") {
            config.socket_name = Some(name);
        }
        if let Some(value) = lookup("WINLAND_OUTPUT") {
            let (width, height, refresh) = parse_output_mode(&value)?;
            config.output.width = width;
            config.output.height = height;
            if let Some(refresh) = refresh {
                config.output.refresh_mhz = refresh;
            }
        }
        if let Some(value) = lookup("WINLAND_LAYOUT") {
            config.tiling.default_layout = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "WINLAND_LAYOUT",
                value: value.clone(),
                expected: "a layout name such as tiling or monocle",
            })?;
        }
        if let Some(value) = lookup("WINLAND_GAPS") {
            config.tiling.gap_size = parse_non_negative("WINLAND_GAPS", &value)?;
        }
        if let Some(value) = lookup("WINLAND_BAR_HEIGHT") {
            config.tiling.bar_height = parse_non_negative("WINLAND_BAR_HEIGHT", &value)?;
        }
        if let Some(value) = lookup("WINLAND_WORKSPACES") {
            let count = parse_non_negative("WINLAND_WORKSPACES", &value)?;
            if count == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "WINLAND_WORKSPACES",
                    value,
                    expected: "at least one workspace",
                });
            }
            config.tiling.workspace_count = count as usize;
            config.bindings = KeyBinding::defaults(config.tiling.workspace_count);
        }

        Ok(config)
    }
}

fn parse_non_negative(key: &'static str, value: &str) -> Result<i32, ConfigError> {
    value
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|v| *v >= 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "a non-negative integer",
        })
}

/// Parse `WxH` or `WxH@Hz` into pixels and a refresh rate in mHz
fn parse_output_mode(value: &str) -> Result<(i32, i32, Option<i32>), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "WINLAND_OUTPUT",
        value: value.to_string(),
        expected: "WIDTHxHEIGHT or WIDTHxHEIGHT@HZ",
    };

    let (size, refresh) = match value.trim().split_once('@') {
        Some((size, hz)) => {
            let hz: f64 = hz.parse().map_err(|_| invalid())?;
            if hz <= 0.0 {
                return Err(invalid());
            }
            (size, Some((hz * 1000.0).round() as i32))
        }
        None => (value.trim(), None),
    };
    let (width, height) = size.split_once('x').ok_or_else(invalid)?;
    let width: i32 = width.parse().map_err(|_| invalid())?;
    let height: i32 = height.parse().map_err(|_| invalid())?;
    if width <= 0 || height <= 0 {
        return Err(invalid());
    }
    Ok((width, height, refresh))
}
